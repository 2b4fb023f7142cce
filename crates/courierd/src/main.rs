//! courierd — session registry daemon.
//!
//! Hosts the registry on the tokio runtime and serves the admin API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use courier_core::config::CourierConfig;
use courier_services::{Authenticate, Collaborators, TimerService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => CourierConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => load_default_config(),
    };
    tracing::info!(
        node = %config.node.node_id,
        api_port = config.node.api_port,
        anonymous = config.security.allow_anonymous,
        users = config.security.users.len(),
        "courierd starting"
    );

    let timers = TimerService::current()?;
    let collab = Collaborators::in_memory(&config);
    let api_port = config.node.api_port;
    let snapshot_every = config.session.snapshot_interval_secs;
    let registry = Authenticate::new(config, collab, timers);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let api_task = {
        let state = courier_api::ApiState {
            registry: registry.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = courier_api::serve(state, api_port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    let snapshot_printer = tokio::spawn(snapshot_loop(registry.clone(), snapshot_every));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = api_task            => tracing::error!("API task exited: {:?}", r),
        r = snapshot_printer    => tracing::error!("snapshot printer exited: {:?}", r),
    }

    registry.shutdown();
    tracing::info!(
        sessions = registry.num_sessions(),
        subjects = registry.num_subjects(),
        "registry stopped"
    );
    Ok(())
}

fn load_default_config() -> CourierConfig {
    if let Err(e) = CourierConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    CourierConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CourierConfig::default()
    })
}

/// Periodically log the registry contents. An interval of 0 disables it.
async fn snapshot_loop(registry: Arc<Authenticate>, every_secs: u64) {
    if every_secs == 0 {
        std::future::pending::<()>().await;
    }
    let mut interval = tokio::time::interval(Duration::from_secs(every_secs));
    loop {
        interval.tick().await;
        let status = registry.status();
        tracing::info!(
            subjects = status.num_subjects,
            sessions = status.num_sessions,
            consistent = status.consistent,
            "registry snapshot"
        );
        for subject in &status.subjects {
            for session in &subject.sessions {
                tracing::info!(
                    session = %session.name,
                    queued = session.queue_entries,
                    updates = session.num_updates,
                    expires_in_ms = ?session.expires_in_ms,
                    "  session"
                );
            }
        }
    }
}
