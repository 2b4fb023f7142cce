//! Registry status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    node_id: String,
    uptime_secs: u64,
    num_subjects: usize,
    num_sessions: usize,
    consistent: bool,
    sessions: Vec<SessionInfo>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
pub(crate) struct SessionInfo {
    pub name: String,
    pub login: String,
    pub public_id: i64,
    pub uptime_secs: u64,
    pub num_updates: u64,
    pub queue_entries: usize,
    pub queue_max_entries: usize,
    pub has_callback: bool,
    pub expires_in_ms: Option<u64>,
}

pub(crate) fn print_session(s: &SessionInfo) {
    let expires = match s.expires_in_ms {
        Some(ms) => format!("{}s", ms / 1000),
        None => "never".to_string(),
    };
    println!("  ┌─ {}", s.name);
    println!("  │  callback : {}", if s.has_callback { "yes" } else { "no" });
    println!("  │  queue    : {}/{}", s.queue_entries, s.queue_max_entries);
    println!("  │  updates  : {}", s.num_updates);
    println!("  │  uptime   : {}s", s.uptime_secs);
    println!("  └─ expires  : {}", expires);
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Courier Registry Status");
    println!("═══════════════════════════════════════");
    println!("  Node            : {}", resp.node_id);
    println!("  Uptime          : {}s", resp.uptime_secs);
    println!("  Subjects        : {}", resp.num_subjects);
    println!("  Active sessions : {}", resp.num_sessions);
    if !resp.consistent {
        println!("  ⚠ registry indexes disagree, see daemon log");
    }

    if resp.sessions.is_empty() {
        println!("\n  No active sessions.");
    } else {
        println!("\n  Sessions:");
        for s in &resp.sessions {
            print_session(s);
        }
    }

    Ok(())
}
