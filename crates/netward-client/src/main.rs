//! netward client: entry point.
//!
//! # Usage
//!
//! ```text
//! netward [--config <PATH>] [--log-level <LEVEL>] <COMMAND>
//!
//! Commands:
//!   discover                      List sensors advertised on the LAN
//!   pair --code <CODE> [--sensor] Pair with a sensor and store the identity
//!   watch                         Keep a live session and log state changes
//!   unpair                        Delete the stored identity
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable            | Description                          |
//! |---------------------|--------------------------------------|
//! | `NETWARD_CONFIG`    | Path to `config.toml`                |
//! | `NETWARD_LOG_LEVEL` | Log level when `RUST_LOG` is unset   |
//! | `NETWARD_SENSOR`    | `host:port` used by `pair`           |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use netward_core::{ConnectionState, DiscoveredSensor, PairingCode};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use netward_client::application::pairing::{pair_and_store, CredentialStore, PairingHandshake};
use netward_client::application::session::SessionManager;
use netward_client::application::state::{AppState, StateStore};
use netward_client::infrastructure::discovery;
use netward_client::infrastructure::http::{HttpPairingClient, HttpSensorTransport};
use netward_client::infrastructure::storage::config::{
    config_file_path, load_config_from, ClientConfig,
};
use netward_client::infrastructure::storage::credentials::{
    FileCredentialStore, IDENTITY_FILE_NAME,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Pairs with a netward sensor and mirrors its state.
#[derive(Debug, Parser)]
#[command(name = "netward", about = "Client for netward network sensors", version)]
struct Cli {
    /// Path to `config.toml`.  Defaults to the platform config directory.
    #[arg(long, global = true, env = "NETWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is unset.  Overrides the config file.
    #[arg(long, global = true, env = "NETWARD_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List sensors advertised on the local network.
    Discover {
        /// Seconds to browse.  Overrides the config file.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Pair with a sensor using the 6-digit code it displays.
    Pair {
        /// The code shown on the sensor.
        #[arg(long)]
        code: String,

        /// `host:port` of the sensor.  Without it, the only sensor found by
        /// discovery is used.
        #[arg(long, env = "NETWARD_SENSOR")]
        sensor: Option<String>,
    },

    /// Keep a live session to the paired sensor until Ctrl-C.
    Watch,

    /// Forget the paired sensor.
    Unpair,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_file_path().context("locating the config file")?,
    };
    let config = load_config_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.client.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .init();

    let identity_path = config_path
        .parent()
        .map(|dir| dir.join(IDENTITY_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(IDENTITY_FILE_NAME));
    let store = FileCredentialStore::new(identity_path);

    match cli.command {
        Command::Discover { timeout_secs } => run_discover(&config, timeout_secs).await,
        Command::Pair { code, sensor } => run_pair(&config, &store, &code, sensor).await,
        Command::Watch => run_watch(&config, &store).await,
        Command::Unpair => {
            if store.delete()? {
                println!("Identity removed.");
            } else {
                println!("Not paired.");
            }
            Ok(())
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn run_discover(config: &ClientConfig, timeout_secs: Option<u64>) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(timeout_secs.unwrap_or(config.discovery.timeout_secs));
    let sensors = discovery::discover(&config.discovery.service_type, timeout).await?;
    if sensors.is_empty() {
        println!("No sensors found.");
    }
    for sensor in sensors {
        println!(
            "{}\t{}\t{}",
            sensor.name,
            sensor.address,
            sensor.sensor_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_pair(
    config: &ClientConfig,
    store: &FileCredentialStore,
    code: &str,
    sensor: Option<String>,
) -> anyhow::Result<()> {
    let code = PairingCode::parse(code).context("reading the pairing code")?;
    let sensor = match sensor {
        Some(address) => DiscoveredSensor {
            name: address.clone(),
            sensor_id: None,
            address,
        },
        None => single_discovered_sensor(config).await?,
    };

    let transport = Arc::new(HttpPairingClient::new(&config.transport)?);
    let handshake = PairingHandshake::new(transport, config.client.name.clone());

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("pairing interrupted");
            on_ctrl_c.cancel();
        }
    });

    let identity = pair_and_store(&handshake, store, &sensor, &code, &cancel).await?;
    println!(
        "Paired with {} ({}) at {}.",
        identity.sensor_name, identity.sensor_id, identity.sensor_address
    );
    Ok(())
}

async fn single_discovered_sensor(config: &ClientConfig) -> anyhow::Result<DiscoveredSensor> {
    let timeout = Duration::from_secs(config.discovery.timeout_secs);
    let mut sensors = discovery::discover(&config.discovery.service_type, timeout).await?;
    match sensors.len() {
        0 => bail!("no sensor found on the network; pass --sensor host:port"),
        1 => Ok(sensors.remove(0)),
        n => {
            for sensor in &sensors {
                println!("{}\t{}", sensor.name, sensor.address);
            }
            bail!("{n} sensors found; choose one with --sensor host:port")
        }
    }
}

async fn run_watch(config: &ClientConfig, store: &FileCredentialStore) -> anyhow::Result<()> {
    let identity = store
        .load()?
        .context("not paired; run `netward pair --code <CODE>` first")?;

    let state = StateStore::new();
    let session = SessionManager::new(
        Arc::new(HttpSensorTransport::new(&config.transport)),
        state.clone(),
        config.session.to_session_config(),
    );
    let mut transitions = state.transitions();
    let mut updates = state.subscribe();
    session.connect(Arc::new(identity))?;
    info!("watching sensor.  Press Ctrl-C to exit.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break Ok(());
            }
            hop = transitions.recv() => match hop {
                Ok(hop) => {
                    info!(from = %hop.from, to = %hop.to, "connection state");
                    if hop.to == ConnectionState::AuthFailed {
                        error!("the sensor no longer accepts this client");
                        break Err(anyhow::anyhow!(
                            "credentials rejected; run `netward pair` again"
                        ));
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "state feed lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = updates.borrow_and_update().clone();
                log_summary(&snapshot);
            }
        }
    };

    session.disconnect();
    outcome
}

fn log_summary(state: &AppState) {
    let online = state.devices.iter().filter(|d| d.online).count();
    let unacknowledged = state.alerts.iter().filter(|a| !a.acknowledged).count();
    info!(
        state = %state.connection,
        devices = state.devices.len(),
        online,
        alerts = state.alerts.len(),
        unacknowledged,
        decoys = state.decoys.len(),
        last_error = state.last_error.as_deref().unwrap_or("-"),
        "sensor state"
    );
    if let Some(newest) = state.alerts.first() {
        info!(id = newest.id, severity = ?newest.severity, title = %newest.title, "latest alert");
    }
}
