//! Session identities.
//!
//! A session carries two names:
//! - `SessionName`: public, safe to log and to publish in point-to-point addressing
//! - `SecretToken`: bearer credential, never logged, zeroized on drop

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Tokens shorter than this are ignored and a fresh one is minted.
pub const MIN_TOKEN_LEN: usize = 2;

/// Public name of one login session: `client/<login>/session/<public_id>`.
///
/// Server-generated ids are negative, client-chosen ids are positive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionName {
    pub login: String,
    pub public_id: i64,
}

impl SessionName {
    pub fn new(login: impl Into<String>, public_id: i64) -> Self {
        Self {
            login: login.into(),
            public_id,
        }
    }

    /// True if the public id was chosen by the client rather than generated.
    pub fn is_pub_session_id_user(&self) -> bool {
        self.public_id > 0
    }

    /// `client/<login>`, the subject part of the name.
    pub fn subject_path(&self) -> String {
        format!("client/{}", self.login)
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client/{}/session/{}", self.login, self.public_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed session name '{0}'")]
pub struct SessionNameError(pub String);

impl FromStr for SessionName {
    type Err = SessionNameError;

    /// Accepts `client/<login>/session/<id>` and the short form `<login>/<id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('/').unwrap_or(s);
        let rest = rest.strip_prefix("node/").map_or(rest, |r| {
            r.split_once('/').map_or(r, |(_, tail)| tail)
        });
        let rest = rest.strip_prefix("client/").unwrap_or(rest);
        let (login, id) = match rest.split_once("/session/") {
            Some(parts) => parts,
            None => rest
                .rsplit_once('/')
                .ok_or_else(|| SessionNameError(s.to_string()))?,
        };
        if login.is_empty() {
            return Err(SessionNameError(s.to_string()));
        }
        let public_id = id
            .parse::<i64>()
            .map_err(|_| SessionNameError(s.to_string()))?;
        Ok(Self::new(login, public_id))
    }
}

/// Secret session token.
///
/// Deliberately has no `Display`; `Debug` prints a redacted placeholder.
#[derive(Clone, PartialEq, Eq, Hash, Zeroize, ZeroizeOnDrop)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Mint a token as `<ip>-<login>-<epoch_ms>-<random>-<counter>`.
    ///
    /// The counter component makes tokens unique within one process.
    pub fn generate(ip: &str, login: &str, counter: u64) -> Self {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let random: u32 = rand::thread_rng().gen();
        Self(format!("{ip}-{login}-{now_ms}-{random}-{counter}"))
    }

    /// Raw token text. Only hand this to the client that owns it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Too short to be a caller-supplied token worth honoring.
    pub fn is_usable(&self) -> bool {
        self.0.len() >= MIN_TOKEN_LEN
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(<redacted>)")
    }
}

impl Borrow<str> for SecretToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}
