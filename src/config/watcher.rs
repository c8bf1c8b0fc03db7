//! Bus bootstrap file watcher.
//!
//! The bootstrap file names the broadcast endpoint and channel. It changes
//! when cluster topology changes, and every accepted change is pushed to the
//! notification subscriber so it can resubscribe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;

use crate::bus::BusSettings;
use crate::config::loader::ConfigError;

/// Read bus settings from a TOML bootstrap file.
pub fn load_bootstrap(path: &Path) -> Result<BusSettings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let settings: BusSettings = toml::from_str(&content)?;
    Ok(settings)
}

/// A watcher that monitors the bootstrap file for changes.
pub struct BootstrapWatcher {
    path: PathBuf,
    settings_tx: watch::Sender<BusSettings>,
}

impl BootstrapWatcher {
    /// Create a new BootstrapWatcher seeded with `initial`.
    ///
    /// Returns the watcher and a receiver that always holds the latest settings.
    pub fn new(path: &Path, initial: BusSettings) -> (Self, watch::Receiver<BusSettings>) {
        let (settings_tx, settings_rx) = watch::channel(initial);

        (
            Self {
                path: path.to_path_buf(),
                settings_tx,
            },
            settings_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive for as long as
    /// updates are wanted; dropping it stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.settings_tx;
        let path = self.path.clone();
        // Editors and config agents usually replace the file, so watch the
        // directory and filter on the file name.
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !touches_file || !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }

                    match load_bootstrap(&path) {
                        Ok(settings) => {
                            let changed = tx.send_if_modified(|current| {
                                if *current == settings {
                                    false
                                } else {
                                    *current = settings;
                                    true
                                }
                            });
                            if changed {
                                tracing::info!(path = ?path, "Bus bootstrap settings changed");
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                "Failed to reload bus bootstrap: {}. Keeping current settings.",
                                e
                            );
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Bootstrap watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.toml");
        std::fs::write(&path, "url = \"ws://10.0.0.5:5680/\"\nchannel = \"proxy-notify\"\n").unwrap();

        let settings = load_bootstrap(&path).unwrap();
        assert_eq!(settings.url.host_str(), Some("10.0.0.5"));
        assert_eq!(settings.channel, "proxy-notify");
    }

    #[test]
    fn test_load_bootstrap_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.toml");
        std::fs::write(&path, "url = 12").unwrap();
        assert!(matches!(load_bootstrap(&path), Err(ConfigError::Parse(_))));
    }
}
