// crates/monitor/src/main.rs
//! fedwatch monitor binary.
//!
//! `fedwatch login` stores a session; `fedwatch watch` restores it, seeds the
//! round log over REST, then follows the live stream until Ctrl-C.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fedwatch_core::{ClientConfig, FedwatchClient};
use fedwatch_monitor::cli::{Cli, Command};
use fedwatch_monitor::{fl, report};
use fedwatch_types::{AuthState, ConnectionStatus};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // reqwest pulls in aws-lc-rs, sentry's transport pulls in ring; rustls
    // refuses to pick one implicitly.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let _guard = fedwatch_observability::init(&cli.log_options())?;

    let mut config = ClientConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    let client = FedwatchClient::new(config).context("building HTTP client")?;

    match &cli.command {
        Command::Login { username, password } => login(&client, username, password).await,
        Command::Logout => {
            client.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Whoami => whoami(&client).await,
        Command::Status => status(&client).await,
        Command::Watch {
            every,
            json,
            reset_on_start,
        } => watch(&client, Duration::from_secs((*every).max(1)), *json, *reset_on_start).await,
    }
}

async fn login(client: &FedwatchClient, username: &str, password: &str) -> Result<()> {
    let session = client.tokens().login(username, password).await?;
    match session.user() {
        Some(user) => println!("Logged in as {} ({}).", user.username, user.role),
        None => println!("Logged in as {username}."),
    }
    Ok(())
}

/// Restore the stored session or fail with a hint.
async fn require_session(client: &FedwatchClient) -> Result<()> {
    match client.tokens().restore_session().await {
        AuthState::Authenticated => Ok(()),
        _ => bail!("not logged in; run `fedwatch login` first"),
    }
}

async fn whoami(client: &FedwatchClient) -> Result<()> {
    require_session(client).await?;
    match client.tokens().user() {
        Some(user) => println!("{} <{}> role={}", user.username, user.email, user.role),
        None => println!("authenticated (profile unavailable)"),
    }
    Ok(())
}

async fn status(client: &FedwatchClient) -> Result<()> {
    require_session(client).await?;
    let status = fl::fetch_status(client.gateway()).await?;
    let rounds = fl::fetch_rounds(client.gateway()).await?;
    println!(
        "training={} round={} of {} active_clients={} completed={}",
        status.is_training,
        status.current_round.map_or_else(|| "-".to_string(), |r| r.to_string()),
        status.total_rounds.map_or_else(|| "-".to_string(), |r| r.to_string()),
        status.active_clients,
        status.total_rounds_completed,
    );
    for round in rounds {
        println!(
            "  round {:>3}  loss={}  acc={}  clients={}",
            round.round_number,
            round.loss.map_or_else(|| "-".to_string(), |v| format!("{v:.4}")),
            round.accuracy.map_or_else(|| "-".to_string(), |v| format!("{v:.3}")),
            round.num_clients.map_or_else(|| "-".to_string(), |v| v.to_string()),
        );
    }
    Ok(())
}

async fn watch(client: &FedwatchClient, every: Duration, json: bool, reset_on_start: bool) -> Result<()> {
    require_session(client).await?;

    let live = client.attach_state();
    match fl::fetch_rounds(client.gateway()).await {
        Ok(rounds) => {
            let seeded = live.seed_rounds(rounds);
            info!(seeded, "round log seeded from REST");
        }
        Err(e) => warn!(error = %e, "could not seed round log"),
    }

    if reset_on_start {
        live.reset_on_run_start(client.channel());
    }

    let channel = client.channel();
    channel.connect();
    let mut status_rx = channel.status_changes();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                info!(status = %report::status_label(status), "live channel");
                match status {
                    ConnectionStatus::Unauthorized => {
                        error!("stream credential rejected; log in again");
                        break;
                    }
                    ConnectionStatus::Closed => {
                        warn!("live channel closed");
                        break;
                    }
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                let snap = live.snapshot();
                if json {
                    println!("{}", serde_json::to_string(&snap)?);
                } else {
                    println!("{}", report::summary_line(channel.status(), &snap));
                }
            }
        }
    }

    live.detach();
    channel.shutdown();
    Ok(())
}
