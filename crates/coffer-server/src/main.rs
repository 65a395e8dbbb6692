//! Console host for the Coffer economy.
//!
//! Brings up the balance store, keeps its connection healthy, and drives
//! account lifecycle events from standard input until the input closes or
//! the process is interrupted.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `economy-config.yaml`
//! 3. Create the database and table if needed
//! 4. Spawn the health monitor
//! 5. Run the console
//! 6. Stop the monitor and flush every cached balance

mod console;
mod error;

use std::path::Path;
use std::sync::Arc;

use coffer_core::{Economy, EconomyConfig};
use coffer_db::{HealthMonitor, MySqlBalanceStore};
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::console::Console;
use crate::error::ServerError;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, store bring-up, or console I/O fails.
#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("coffer-server starting");

    // 2. Load configuration.
    let config = load_config()?;
    let mysql = config.mysql();
    info!(
        database_url = mysql.database_url(),
        probe_interval_secs = config.health.probe_interval_secs,
        "Configuration loaded"
    );

    // 3. Bring up the store. Nothing may touch balances before this returns.
    info!("Setting up database...");
    let store = Arc::new(MySqlBalanceStore::open(mysql).await?);
    info!("Database setup complete");

    // 4. Health monitor.
    let (stop_tx, stop_rx) = watch::channel(false);
    let monitor =
        HealthMonitor::new(Arc::clone(&store), config.probe_interval()).spawn(stop_rx);

    // 5. Console.
    let economy = Arc::new(Economy::new(Arc::clone(&store)));
    let console = Console::new(Arc::clone(&economy));
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "unable to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };
    let session = console
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), interrupted)
        .await;

    // 6. Shut down, flushing even if the console failed.
    if stop_tx.send(true).is_err() {
        warn!("health monitor already stopped");
    }
    match monitor.await {
        Ok(report) => info!(
            probes = report.probes,
            failures = report.failures,
            reconnects = report.reconnects,
            "Health monitor stopped"
        ),
        Err(e) => warn!(error = %e, "health monitor task failed"),
    }

    let flushed = economy.shutdown().await;
    store.close().await;
    info!(
        saved = flushed.saved,
        failed = flushed.failed,
        "coffer-server stopped"
    );
    session
}

/// Load configuration from `economy-config.yaml`.
///
/// Falls back to defaults (plus environment overrides) if the file does
/// not exist.
fn load_config() -> Result<EconomyConfig, ServerError> {
    let config_path = Path::new("economy-config.yaml");
    if config_path.exists() {
        Ok(EconomyConfig::from_file(config_path)?)
    } else {
        info!("Config file not found, using defaults");
        Ok(EconomyConfig::from_env()?)
    }
}
