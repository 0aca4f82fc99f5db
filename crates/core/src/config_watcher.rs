use crate::config::EngineConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Publishes reloaded engine configs when the config file changes.
pub struct ConfigWatcher {
    tx: watch::Sender<EngineConfig>,
    path: PathBuf,
    profile: Option<String>,
}

impl ConfigWatcher {
    /// Creates a new configuration watcher with an initial configuration.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(
        initial_config: EngineConfig,
        path: impl Into<PathBuf>,
    ) -> (Self, watch::Receiver<EngineConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (
            Self {
                tx,
                path: path.into(),
                profile: None,
            },
            rx,
        )
    }

    /// Reloads through the `Config.{profile}.toml` overlay as well as the base file.
    #[must_use]
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Reloads the file and publishes it if it parses and validates.
    ///
    /// Invalid files are logged and the previous config stays in force.
    pub fn reload(&self) -> bool {
        reload_into(&self.tx, &self.path, self.profile.as_deref())
    }

    /// Watches the configuration file for changes and broadcasts updates.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(&self) -> Result<()> {
        let tx = self.tx.clone();
        let config_path = self.path.clone();
        let profile = self.profile.clone();

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(Path::new(&config_path), RecursiveMode::NonRecursive)?;

            for event in notify_rx {
                if event.kind.is_modify() {
                    tracing::info!(path = %config_path.display(), "Config file changed, reloading");
                    reload_into(&tx, &config_path, profile.as_deref());
                }
                if tx.is_closed() {
                    break;
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

fn reload_into(tx: &watch::Sender<EngineConfig>, path: &Path, profile: Option<&str>) -> bool {
    let loaded = match profile {
        Some(profile) => ConfigLoader::load_with_profile(path, profile),
        None => ConfigLoader::load_from(path),
    };
    match loaded {
        Ok(new_config) => {
            let _ = tx.send(new_config);
            tracing::info!("Config reloaded successfully");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config, keeping previous");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn reload_publishes_valid_config() {
        Jail::expect_with(|jail| {
            jail.create_file("engine.toml", "[rotation]\nmargin = 25.0\n")?;
            let (watcher, rx) = ConfigWatcher::new(EngineConfig::default(), "engine.toml");

            assert!(watcher.reload());
            assert_eq!(rx.borrow().rotation.margin, 25.0);
            Ok(())
        });
    }

    #[test]
    fn reload_keeps_profile_overlay() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "Config.toml",
                "[rotation]\nmargin = 25.0\n[exit]\nmax_hold_minutes = 90\n",
            )?;
            jail.create_file("Config.fast.toml", "[exit]\nmax_hold_minutes = 30\n")?;
            let (watcher, rx) = ConfigWatcher::new(EngineConfig::default(), "Config.toml");
            let watcher = watcher.with_profile(Some("fast".to_string()));

            assert!(watcher.reload());
            assert_eq!(rx.borrow().exit.max_hold_minutes, 30);
            assert_eq!(rx.borrow().rotation.margin, 25.0);

            jail.create_file("Config.toml", "[rotation]\nmargin = 40.0\n")?;
            assert!(watcher.reload());
            assert_eq!(rx.borrow().exit.max_hold_minutes, 30);
            assert_eq!(rx.borrow().rotation.margin, 40.0);
            Ok(())
        });
    }

    #[test]
    fn reload_keeps_previous_on_invalid_config() {
        Jail::expect_with(|jail| {
            jail.create_file("engine.toml", "[exit]\nflip_long_rsi = 250.0\n")?;
            let (watcher, rx) = ConfigWatcher::new(EngineConfig::default(), "engine.toml");

            assert!(!watcher.reload());
            assert_eq!(rx.borrow().exit.flip_long_rsi, 65.0);
            Ok(())
        });
    }
}
