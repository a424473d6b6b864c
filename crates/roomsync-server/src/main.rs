use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use roomsync_core::sandbox::SandboxNetwork;
use roomsync_core::{Connector, Engine};
use roomsync_models::{RoomKind, SenderId};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roomsync_core=info,roomsync_server=info"));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = config::Config::load(&args.config)?;
    tracing::info!(
        accounts = config.accounts.len(),
        send_delay_ms = config.engine.send_delay_ms,
        forwarding_enabled = config.engine.forwarding_enabled,
        room_swap = config.room_swap.enabled,
        expert = config.expert.enabled,
        alert = config.alert.enabled,
        "configuration loaded"
    );

    let connector: Arc<dyn Connector> = if args.sandbox {
        seed_sandbox(&config).connector()
    } else {
        bail!("no platform connector is built into this binary; run with --sandbox for a dry run");
    };

    let engine = Engine::new(config.engine_config(), config.runtime_settings(), connector);
    engine.start();

    let submit_timeout = engine.config.submit_timeout;
    for account in &config.accounts {
        if !engine.wait_until_live(&account.phone, submit_timeout).await {
            tracing::warn!(account = %account.phone, "account did not come online");
        }
    }

    // ── One-shot commands ────────────────────────────────────────────────────
    if args.apply_permissions {
        match engine.apply_admin_settings().await {
            Ok(outcomes) => tracing::info!(
                outcomes = %serde_json::to_string(&outcomes).unwrap_or_default(),
                "permission push finished"
            ),
            Err(e) => tracing::warn!(error = %e, "permission push not started"),
        }
    }
    if let Some(link) = &args.join {
        report_command("join", engine.join_all(link).await);
    }
    if let Some(link) = &args.leave {
        report_command("leave", engine.leave_all(link).await);
    }

    tracing::info!("running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    let stats = engine.stats();
    tracing::info!(
        forward_records = stats.store.forward_records,
        sender_assignments = stats.store.sender_assignments,
        "final mapping state"
    );
    tokio::time::timeout(Duration::from_secs(10), engine.shutdown())
        .await
        .unwrap_or_else(|_| tracing::warn!("shutdown timed out"));
    Ok(())
}

fn report_command(
    name: &str,
    result: Result<Vec<roomsync_core::commands::CommandOutcome>, roomsync_core::CoreError>,
) {
    match result {
        Ok(outcomes) => {
            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            tracing::info!(command = name, accounts = outcomes.len(), failed, "room command finished");
        }
        Err(e) => tracing::warn!(command = name, error = %e, "room command not started"),
    }
}

/// Build a sandbox world containing every configured account and room.
fn seed_sandbox(config: &config::Config) -> SandboxNetwork {
    let network = SandboxNetwork::new();
    for room in config.referenced_rooms() {
        network.add_room(room, format!("room {room}"), RoomKind::Supergroup);
    }
    for (index, account) in config.accounts.iter().enumerate() {
        network.add_account(account.phone.as_str(), SenderId(index as i64 + 1));
    }
    tracing::info!(
        rooms = config.referenced_rooms().len(),
        accounts = config.accounts.len(),
        "sandbox platform seeded"
    );
    network
}
