//! Configuration file watcher for hot reload.
//!
//! # Design Decisions
//! - The parent directory is watched, so editors that save by renaming a
//!   fresh file over the old one keep triggering reloads
//! - Only events naming the config file cause a reload
//! - A file that fails to load or validate is logged and skipped; the running
//!   configuration stays in place

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventHandler, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::HubConfig;

/// Poll interval for platforms without native file events.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Sends a freshly loaded `HubConfig` whenever the config file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<HubConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<HubConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching on notify's background thread.
    ///
    /// The returned watcher must be kept alive for updates to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let root = watch_root(&self.path);
        let handler = ReloadHandler {
            path: self.path.clone(),
            tx: self.update_tx,
        };

        let mut watcher =
            RecommendedWatcher::new(handler, Config::default().with_poll_interval(POLL_INTERVAL))?;
        watcher.watch(&root, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, directory = ?root, "Config watcher started");
        Ok(watcher)
    }
}

/// Directory holding `path`; a bare file name lives in the working directory.
fn watch_root(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

struct ReloadHandler {
    path: PathBuf,
    tx: mpsc::UnboundedSender<HubConfig>,
}

impl ReloadHandler {
    /// Notify reports absolute paths, so only the file name is compared.
    fn concerns_config(&self, event: &Event) -> bool {
        (event.kind.is_modify() || event.kind.is_create())
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }

    fn reload(&self) {
        match load_config(&self.path) {
            Ok(config) => {
                if self.tx.send(config).is_err() {
                    tracing::debug!("Config receiver dropped, ignoring change");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            }
        }
    }
}

impl EventHandler for ReloadHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        match event {
            Ok(event) if self.concerns_config(&event) => {
                tracing::info!(path = ?self.path, kind = ?event.kind, "Config file change detected, reloading");
                self.reload();
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Config watch error"),
        }
    }
}
