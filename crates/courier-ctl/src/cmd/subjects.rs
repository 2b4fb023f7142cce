//! Subject listing and login blocking commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};
use super::status::{print_session, SessionInfo};

pub async fn cmd_subjects(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct SubjectsResponse {
        subjects: Vec<SubjectSummary>,
    }

    #[derive(Deserialize)]
    struct SubjectSummary {
        login: String,
        num_sessions: usize,
        holding_queue_entries: usize,
        login_blocked: bool,
    }

    let resp: SubjectsResponse = get_json(&format!("{}/subjects", base_url(port))).await?;

    if resp.subjects.is_empty() {
        println!("No subjects logged in.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Subjects ({})", resp.subjects.len());
    println!("═══════════════════════════════════════");
    for s in &resp.subjects {
        let blocked = if s.login_blocked { "  [blocked]" } else { "" };
        println!(
            "  {:<20} sessions: {:<3} held: {}{}",
            s.login, s.num_sessions, s.holding_queue_entries, blocked
        );
    }

    Ok(())
}

pub async fn cmd_subject(port: u16, login: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct SubjectResponse {
        login: String,
        num_sessions: usize,
        max_sessions: usize,
        holding_queue_entries: usize,
        holding_queue_max_entries: usize,
        num_updates: u64,
        login_blocked: bool,
        sessions: Vec<SessionInfo>,
    }

    let resp: SubjectResponse =
        get_json(&format!("{}/subjects/{}", base_url(port), login)).await?;

    println!("═══════════════════════════════════════");
    println!("  Subject {}", resp.login);
    println!("═══════════════════════════════════════");
    println!("  Sessions      : {}/{}", resp.num_sessions, resp.max_sessions);
    println!(
        "  Holding queue : {}/{}",
        resp.holding_queue_entries, resp.holding_queue_max_entries
    );
    println!("  Updates       : {}", resp.num_updates);
    println!("  Login blocked : {}", resp.login_blocked);
    for s in &resp.sessions {
        print_session(s);
    }

    Ok(())
}

pub async fn cmd_block(port: u16, login: &str, block: bool) -> Result<()> {
    #[derive(Deserialize)]
    struct BlockResponse {
        login: String,
        blocked: bool,
    }

    let action = if block { "block" } else { "unblock" };
    let resp: BlockResponse =
        post_json(&format!("{}/subjects/{}/{}", base_url(port), login, action)).await?;

    if resp.blocked {
        println!("✓ Logins blocked for {}", resp.login);
    } else {
        println!("✓ Logins allowed for {}", resp.login);
    }

    Ok(())
}
