//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Config watcher that monitors file changes and sends reload notifications
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `config_path` and load the initial config
    pub async fn new(config_path: impl Into<PathBuf>) -> Result<(Self, AppConfig)> {
        let config_path = config_path.into();
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();
        let reload_path = config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_)) => {
                    debug!("Config file modified: {:?}", event.paths);
                    let config_path = reload_path.clone();
                    let tx = tx.clone();

                    runtime_handle.spawn(async move {
                        // Let the writer finish
                        tokio::time::sleep(DEBOUNCE).await;

                        match AppConfig::load(&config_path).await {
                            Ok(new_config) => {
                                info!("Configuration reloaded");
                                if let Err(e) = tx.send(new_config).await {
                                    debug!("Config update dropped: {}", e);
                                }
                            }
                            Err(e) => {
                                warn!("Failed to reload config (keeping old config): {:#}", e);
                            }
                        }
                    });
                }
                Ok(_) => {}
                Err(e) => error!("Watch error: {}", e),
            }
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path.display()))?;

        info!("Config file watcher started for: {}", config_path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial_config,
        ))
    }

    /// Wait for the next config update
    ///
    /// Returns None if the watcher has been closed. Several writes in a row
    /// may yield the same config more than once.
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}
