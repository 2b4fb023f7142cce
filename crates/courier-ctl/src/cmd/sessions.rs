//! Session management commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, delete_json, get_json};

pub async fn cmd_session_kill(port: u16, login: &str, public_id: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct KillResponse {
        session: String,
        killed: bool,
    }

    let resp: KillResponse =
        delete_json(&format!("{}/sessions/{}/{}", base_url(port), login, public_id)).await?;

    if resp.killed {
        println!("✓ Session scheduled for removal: {}", resp.session);
    } else {
        println!("Session not found: {}/{}", login, public_id);
    }

    Ok(())
}

pub async fn cmd_session_inspect(port: u16, login: &str, public_id: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct InspectResponse {
        name: String,
        instance_id: i64,
        uptime_secs: u64,
        num_updates: u64,
        queue_entries: usize,
        queue_max_entries: usize,
        has_callback: bool,
        expires_in_ms: Option<u64>,
        subscriptions: Vec<String>,
    }

    let resp: InspectResponse =
        get_json(&format!("{}/sessions/{}/{}", base_url(port), login, public_id)).await?;

    println!("═══════════════════════════════════════");
    println!("  Session Details");
    println!("═══════════════════════════════════════");
    println!("  Name          : {}", resp.name);
    println!("  Instance      : {}", resp.instance_id);
    println!("  Uptime        : {}s", resp.uptime_secs);
    println!("  Updates       : {}", resp.num_updates);
    println!("  Queue         : {}/{}", resp.queue_entries, resp.queue_max_entries);
    println!("  Callback      : {}", resp.has_callback);
    match resp.expires_in_ms {
        Some(ms) => println!("  Expires in    : {}ms", ms),
        None => println!("  Expires in    : never"),
    }
    if !resp.subscriptions.is_empty() {
        println!("  Subscriptions : {}", resp.subscriptions.join(", "));
    }

    Ok(())
}
