//! courier integration test harness.
//!
//! Tests drive a whole registry in-process through its public API:
//!
//!   cargo test --test integration
//!
//! Each test builds its own registry; nothing is shared between tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use courier_core::config::CourierConfig;
use courier_core::{CallbackAddress, ConnectRequest, ConnectReturn, Credentials, QueueEntry};
use courier_services::{Authenticate, Collaborators, TimerService};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Config accepting any login, with an advertised IP so no local IP lookup runs.
pub fn test_config() -> CourierConfig {
    let mut config = CourierConfig::default();
    config.security.allow_anonymous = true;
    config.node.advertised_ip = "10.0.0.1".into();
    config
}

/// Registry with in-memory collaborators, on the current runtime.
pub fn registry(config: CourierConfig) -> Arc<Authenticate> {
    let collab = Collaborators::in_memory(&config);
    registry_with(config, collab)
}

pub fn registry_with(config: CourierConfig, collab: Collaborators) -> Arc<Authenticate> {
    let timers = TimerService::current().expect("tests run inside a tokio runtime");
    Authenticate::new(config, collab, timers)
}

pub fn callback() -> CallbackAddress {
    CallbackAddress::new("SOCKET", "127.0.0.1:7607")
}

/// Connect request with a callback address.
pub fn request(login: &str) -> ConnectRequest {
    ConnectRequest::new(Credentials::new(login, "secret")).with_callback(callback())
}

pub fn login(registry: &Authenticate, name: &str) -> ConnectReturn {
    registry
        .connect(request(name))
        .unwrap_or_else(|e| panic!("login of {name} failed: {e}"))
}

pub fn entry(payload: &str) -> QueueEntry {
    QueueEntry::new("ptp", "client/sender/session/1", payload.to_string())
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if cond() {
        return Ok(());
    }
    bail!("condition not met within {:?}", timeout)
}

// ── Test modules ──────────────────────────────────────────────────────────────

mod concurrency;
mod delivery;
mod lifecycle;
