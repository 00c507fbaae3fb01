//! Configuration hot reload
//!
//! Watches a property file by polling its modification time and pushes
//! re-parsed configurations into the queue service, so operators change
//! thread counts and timeouts without restarting workers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::reader::QueueConfigsReader;
use crate::service::QueueService;

/// Handle to a running configuration reloader.
///
/// Dropping the handle without calling [`shutdown`](ConfigReloader::shutdown)
/// leaves the watch task running for the process lifetime.
pub struct ConfigReloader {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ConfigReloader {
    /// Spawn a watch task re-reading `path` every `poll_interval`.
    ///
    /// On every modification-time change the file is re-parsed and applied
    /// via [`QueueService::update_queue_configs`]; parse errors and update
    /// rejections are logged and the previous configuration stays in
    /// effect. Must be called within a Tokio runtime.
    pub fn spawn(
        service: Arc<QueueService>,
        reader: QueueConfigsReader,
        path: PathBuf,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut last_modified: Option<SystemTime> = None;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match std::fs::metadata(&path).and_then(|meta| meta.modified()) {
                            Ok(modified) => {
                                if last_modified == Some(modified) {
                                    continue;
                                }
                                let first_pass = last_modified.is_none();
                                last_modified = Some(modified);
                                if first_pass {
                                    // the service was configured from this file at startup
                                    debug!(path = %path.display(), "config watch primed");
                                    continue;
                                }
                                reload(&service, &reader, &path);
                            }
                            Err(error) => {
                                warn!(path = %path.display(), %error, "cannot stat config file");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("config reloader shutting down");
                        break;
                    }
                }
            }
        });

        Self { shutdown_tx, join }
    }

    /// Stop the watch task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

fn reload(service: &QueueService, reader: &QueueConfigsReader, path: &std::path::Path) {
    info!(path = %path.display(), "config file changed, reloading");
    let configs = match reader.parse_file(path) {
        Ok(configs) => configs,
        Err(error) => {
            error!(%error, "config reload failed, keeping previous configuration");
            return;
        }
    };

    match service.update_queue_configs(&configs) {
        Ok(diffs) if diffs.is_empty() => {
            info!("config reloaded, nothing changed");
        }
        Ok(diffs) => {
            for (queue_id, diff) in diffs {
                info!(queue_id = %queue_id, %diff, "queue settings changed");
            }
        }
        Err(error) => {
            error!(%error, "config update rejected, keeping previous configuration");
        }
    }
}
