//! Debounced configuration file watching.
//!
//! Every change to the watched file is reloaded through [`load_config`] and,
//! if it validates, forwarded to the receiver. Invalid edits are logged and
//! skipped so the running configuration stays in effect.

use std::path::PathBuf;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::loader::load_config;
use crate::settings::SbguardConfig;
use crate::{ConfigError, Result};

/// Handle for a running watcher
pub struct WatchHandle {
    handle: tokio::task::JoinHandle<()>,
    shutdown: tokio::sync::oneshot::Sender<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

/// Watches one configuration file.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: Duration::from_millis(500),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Reloaded configurations are sent on `tx`.
    pub fn watch(&self, tx: mpsc::Sender<SbguardConfig>) -> Result<WatchHandle> {
        let path = self.path.clone();
        let debounce = self.debounce;

        if !path.exists() {
            return Err(ConfigError::watcher(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        // Watch the parent directory so editors that replace the file still trigger.
        let watch_path = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut debouncer =
            new_debouncer(debounce, notify_tx).map_err(|e| ConfigError::watcher(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::watcher(e.to_string()))?;

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            // Keep the debouncer alive for the lifetime of the task.
            let _debouncer = debouncer;
            info!("Started watching config file: {:?}", path);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Config watcher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        let mut changed = false;
                        while let Ok(events) = notify_rx.try_recv() {
                            match events {
                                Ok(events) => {
                                    changed |= events
                                        .iter()
                                        .any(|event| event.path.file_name() == path.file_name());
                                }
                                Err(e) => error!("File watcher error: {:?}", e),
                            }
                        }
                        if !changed {
                            continue;
                        }

                        debug!("Config file changed: {:?}", path);
                        match load_config(Some(&path)) {
                            Ok(cfg) => {
                                info!("configuration reloaded successfully");
                                if tx.send(cfg).await.is_err() {
                                    warn!("Config change receiver dropped");
                                    return;
                                }
                            }
                            Err(e) => error!("configuration reload failed: {}", e),
                        }
                    }
                }
            }
        });

        Ok(WatchHandle {
            handle,
            shutdown: shutdown_tx,
        })
    }
}
