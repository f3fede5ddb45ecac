//! Harvest command: discover chats, enumerate members and record new users
//! while draining the live update stream.

use std::sync::Arc;

use tracing::{info, warn};

use crate::client::{spawn_update_feed, GrammersBackend};
use crate::config::Config;
use crate::discovery::{run_discovery, DiscoveryOptions};
use crate::error::{Error, Result};
use crate::recorder::UserRecorder;
use crate::session::{SessionLock, TelegramClient};
use crate::store::open_store;
use crate::updates::drain_updates;

/// Command-line overrides for one harvest run.
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Skip direct paging of member listings.
    pub search_only: bool,
    /// Only page groups above the large-group threshold.
    pub large_group_only: bool,
    pub driver: Option<String>,
    pub connection: Option<String>,
    pub chat_limit: Option<usize>,
}

impl HarvestOptions {
    /// Apply the overrides on top of the loaded configuration.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(driver) = self.driver.as_ref().filter(|d| !d.is_empty()) {
            config.db_driver = driver.clone();
        }
        if let Some(connection) = self.connection.as_ref().filter(|c| !c.is_empty()) {
            config.db_connection = connection.clone();
        }
        if let Some(limit) = self.chat_limit {
            config.chat_limit = limit;
        }
        config
    }

    pub fn discovery(&self, config: &Config) -> DiscoveryOptions {
        DiscoveryOptions::from_config(config, self.search_only, self.large_group_only)
    }
}

/// Run the harvester until the update stream closes.
///
/// A termination signal tears down the connection and exits with status 1.
pub async fn run(config: Config, options: HarvestOptions) -> Result<()> {
    let config = options.apply(config);
    let _lock = SessionLock::acquire(&config.lock_file)?;

    let mut telegram = TelegramClient::connect(&config).await?;
    telegram.authorize(&config).await?;

    let store = open_store(&config.db_driver, &config.db_connection).await?;
    let backend = Arc::new(
        GrammersBackend::new(telegram.client.clone()).with_session(telegram.session.clone()),
    );
    let recorder = UserRecorder::new(backend.clone(), store);

    let updates_rx = telegram
        .take_updates()
        .ok_or_else(|| Error::TelegramError("Updates stream already taken".into()))?;
    let records = spawn_update_feed(telegram.client.clone(), updates_rx, backend.clone());
    let drain = tokio::spawn(drain_updates(records, recorder.clone()));

    let telegram = Arc::new(telegram);
    spawn_signal_watcher(telegram.clone());

    let discovery = options.discovery(&config);
    info!(
        chat_limit = discovery.chat_limit,
        search_only = discovery.policy.search_only,
        large_group_only = discovery.policy.large_group_only,
        "Starting discovery"
    );
    run_discovery(backend, recorder, &discovery).await?;

    info!("Discovery done, listening for updates");
    let stats = drain.await?;
    info!(
        received = stats.received,
        inserted = stats.inserted,
        known = stats.known,
        "Update drain finished"
    );

    Ok(())
}

fn spawn_signal_watcher(telegram: Arc<TelegramClient>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Termination signal received, closing Telegram connection");
        telegram.shutdown();
        std::process::exit(1);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!("Can't listen for SIGTERM: {}", err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
