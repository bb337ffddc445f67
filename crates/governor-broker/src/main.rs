//! Governor broker: watches a Juju model for unit changes.
//!
//! The broker holds an all-watcher open on the configured model. Every unit
//! that appears or disappears becomes an event in the SQLite store under
//! the snap's common directory, and the leader of the governor application
//! is woken with an action so it can drain the store.
//!
//! # Architecture
//!
//! ```text
//! AllWatcher.Next --> translate --> event store --> Action.EnqueueOperation
//!        |                                                 (governor leader)
//!        +--> unit registry (known units)
//! ```
//!
//! Any fatal error ends the process with a non-zero status; the supervisor
//! restarts it and the watch starts over from a fresh baseline.

mod config;
mod error;
mod juju_model;
mod rpc;
mod session;
mod tls;
mod watcher;

#[cfg(test)]
mod fake_controller;

use std::sync::Arc;

use governor_core::Governor;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::juju_model::{JujuModel, UnitRegistry};
use crate::watcher::AllWatcherFeed;

/// Application entry point.
///
/// Initializes logging, loads configuration, opens the model connection and
/// runs the watch loop until a signal arrives or a fatal error occurs.
///
/// # Errors
///
/// Returns an error if configuration, the Juju session or the watch loop
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("governor-broker starting");

    if let Err(e) = run().await {
        error!(error = %e, "governor-broker stopped");
        return Err(e.into());
    }
    Ok(())
}

async fn run() -> Result<(), BrokerError> {
    let config = BrokerConfig::from_env()?;
    info!(
        storage_root = %config.storage_root.display(),
        creds = %config.creds_path.display(),
        model = config.credentials.model,
        application = config.credentials.governor_charm,
        action = config.credentials.governor_action,
        dispatch_timeout_ms = config.dispatch_timeout.as_millis(),
        retry_interval_ms = config.retry_interval.map(|d| d.as_millis()),
        "configuration loaded"
    );

    let (client, model) = session::open(&config.credentials).await?;
    let client = Arc::new(client);
    let registry = UnitRegistry::default();

    let feed = AllWatcherFeed::start(Arc::clone(&client), registry.clone()).await?;
    let juju = JujuModel::new(client, registry);

    let mut governor = Governor::new(feed, juju, config.governor_config());
    let exit = governor.run(shutdown_signal()).await?;
    info!(
        model = model.name,
        ticks = exit.ticks,
        pending = exit.pending,
        "governor-broker shut down"
    );
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for SIGINT");
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
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("SIGINT received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}
