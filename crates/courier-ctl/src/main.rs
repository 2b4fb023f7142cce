//! courier-ctl — command-line interface for the courier daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("courier-ctl — inspect and manage a running courierd");
    println!();
    println!("USAGE:");
    println!("  courier-ctl [--port <port>] <command>");
    println!();
    println!("COMMANDS:");
    println!("  status                          Registry overview and live sessions");
    println!("  subjects                        List logged-in subjects");
    println!("  subject <login>                 Subject details and its sessions");
    println!("  block <login>                   Refuse new logins for a subject");
    println!("  unblock <login>                 Allow logins again");
    println!("  sessions inspect <login> <id>   Inspect one session");
    println!("  sessions kill <login> <id>      Disconnect one session");
    println!("  help                            Show this message");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["subjects"] => cmd::subjects::cmd_subjects(port).await,
        ["subject", login] => cmd::subjects::cmd_subject(port, login).await,
        ["block", login] => cmd::subjects::cmd_block(port, login, true).await,
        ["unblock", login] => cmd::subjects::cmd_block(port, login, false).await,
        ["sessions", "inspect", login, id] => {
            cmd::sessions::cmd_session_inspect(port, login, id).await
        }
        ["sessions", "kill", login, id] => cmd::sessions::cmd_session_kill(port, login, id).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
