//! # mirror-agent
//!
//! Command-line front end for the Mirror sync engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           mirror-agent run                              │
//! │                                                                         │
//! │  stdin ──► console::parse_line ──► SynchronizerHandle ──► Transport    │
//! │                                          │                    │         │
//! │                                          ▼                    ▼         │
//! │                                   mirror_db::Database    WsConnector   │
//! │                                   (optional)             (ws / wss)    │
//! │                                                                         │
//! │  SIGINT / SIGTERM ──► shutdown synchronizer, close transport            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mirror_db::{Database, DbConfig};
use mirror_sync::{
    HubServer, SyncConfig, SynchronizerBuilder, SynchronizerHandle, TracingNotifier, Transport,
    TransportHandle, WsConnector,
};

use crate::console::Input;

/// Keeps a local change log in sync with a Mirror relay.
#[derive(Parser)]
#[command(name = "mirror-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to sync.toml (defaults to the platform config directory)
    #[arg(global = true, short, long, env = "MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the relay and track changes read from stdin
    Run(RunArgs),

    /// Serve the reference relay
    Hub {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Relay WebSocket URL
    #[arg(short, long)]
    url: Option<String>,

    /// SQLite file for pending/confirmed state
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Exit once stdin closes and every tracked change is confirmed
    #[arg(long)]
    exit_when_idle: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run(cli.config, args).await,
        Commands::Hub { port, bind } => hub(cli.config, port, bind).await,
        Commands::InitConfig { force } => init_config(cli.config, force),
    }
}

// =============================================================================
// run
// =============================================================================

async fn run(config_path: Option<PathBuf>, args: RunArgs) -> anyhow::Result<()> {
    let mut config = SyncConfig::load(config_path).context("Failed to load sync config")?;
    if let Some(url) = args.url {
        config.server.url = url;
    }
    if let Some(path) = args.database {
        config.storage.database_path = Some(path);
    }
    config.validate()?;

    info!(
        device_id = %config.device_id(),
        url = %config.server.url,
        "Starting mirror agent"
    );

    let transport = Transport::spawn(config.transport_config(), WsConnector::new());
    let mut builder = SynchronizerBuilder::new(config.synchronizer_config(), transport.clone())
        .with_notifier(Arc::new(TracingNotifier));

    let database = match &config.storage.database_path {
        Some(path) => {
            let db = Database::new(DbConfig::new(path))
                .await
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            if !db.health_check().await {
                anyhow::bail!("Database {} is not answering queries", path.display());
            }
            info!(path = %path.display(), "Database opened");
            builder = builder.with_persistence(Arc::new(db.clone()));
            Some(db)
        }
        None => {
            warn!("No database configured, state is kept in memory only");
            None
        }
    };

    let sync = builder.spawn();
    transport.open();

    let mut receipts = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(&sync, &transport, &line, &mut receipts).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        stdin_open = false;
                        if args.exit_when_idle && receipts.is_empty() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        stdin_open = false;
                    }
                }
            }

            Some(_) = receipts.join_next(), if !receipts.is_empty() => {
                if args.exit_when_idle && !stdin_open && receipts.is_empty() {
                    info!("All tracked changes confirmed");
                    break;
                }
            }
        }
    }

    sync.shutdown();
    transport.close();
    receipts.shutdown().await;
    if let Some(db) = database {
        db.close().await;
    }

    info!("Agent stopped");
    Ok(())
}

/// Returns `false` when the agent should stop.
async fn handle_line(
    sync: &SynchronizerHandle,
    transport: &TransportHandle,
    line: &str,
    receipts: &mut JoinSet<()>,
) -> bool {
    let input = match console::parse_line(line) {
        Ok(Some(input)) => input,
        Ok(None) => return true,
        Err(e) => {
            warn!(error = %e, "Ignoring invalid input line");
            return true;
        }
    };

    match input {
        Input::Track(draft) => match sync.track_change(*draft).await {
            Ok(tracked) => {
                info!(change_id = %tracked.id(), "Change tracked");
                receipts.spawn(async move {
                    let id = tracked.id().to_string();
                    match tracked.confirmed().await {
                        Ok(_) => info!(change_id = %id, "Change confirmed"),
                        Err(e) => warn!(change_id = %id, error = %e, "Change not confirmed"),
                    }
                });
            }
            Err(e) => warn!(error = %e, "Change rejected"),
        },
        Input::Sync => match sync.sync_changes().await {
            Ok(outcome) => info!(applied = outcome.applied, cursor = %outcome.cursor, "Sync complete"),
            Err(e) => warn!(error = %e, "Sync failed"),
        },
        Input::Retry => match sync.retry_failed().await {
            Ok(sent) => info!(sent, "Retry complete"),
            Err(e) => warn!(error = %e, "Retry failed"),
        },
        Input::Status => match sync.status().await {
            Ok(status) => info!(
                state = %status.connection_state,
                attempts = status.transport_attempts,
                pending = status.pending_count,
                confirmed = status.confirmed_count,
                stuck = status.stuck_count,
                cursor = %status.cursor,
                last_error = ?status.last_error,
                "Sync status"
            ),
            Err(e) => warn!(error = %e, "Status unavailable"),
        },
        Input::Snapshot => match sync.snapshot().await {
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!(error = %e, "Failed to encode snapshot"),
            },
            Err(e) => warn!(error = %e, "Snapshot unavailable"),
        },
        Input::Clear => match sync.clear().await {
            Ok(()) => info!("Local state cleared"),
            Err(e) => warn!(error = %e, "Clear failed"),
        },
        Input::Online => {
            info!("Network reported online");
            transport.notify_online();
        }
        Input::Offline => {
            info!("Network reported offline");
            transport.notify_offline();
        }
        Input::Quit => return false,
    }

    true
}

// =============================================================================
// hub
// =============================================================================

async fn hub(config_path: Option<PathBuf>, port: Option<u16>, bind: Option<String>) -> anyhow::Result<()> {
    let config = SyncConfig::load_or_default(config_path);
    let mut hub_config = config.hub_config();
    if let Some(port) = port {
        hub_config.port = port;
    }
    if let Some(bind) = bind {
        hub_config.bind_addr = bind;
    }

    let handle = HubServer::new(hub_config)
        .start()
        .await
        .context("Failed to start relay")?;
    info!(url = %handle.ws_url(), "Relay listening");

    shutdown_signal().await;

    info!(
        clients = handle.client_count().await,
        changes = handle.change_count().await,
        "Stopping relay"
    );
    handle.shutdown().await?;
    Ok(())
}

// =============================================================================
// init-config
// =============================================================================

fn init_config(config_path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = config_path
        .or_else(SyncConfig::default_config_path)
        .context("No config path available on this platform")?;

    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let written = SyncConfig::new().save(Some(path))?;
    println!("{}", written.display());
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
