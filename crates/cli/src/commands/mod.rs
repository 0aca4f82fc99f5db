//! CLI commands for the position rotation engine.

pub mod replay;
pub mod score;
pub mod show_config;

pub use replay::{run_replay, ReplayArgs};
pub use score::{run_score, ScoreArgs};
pub use show_config::{run_show_config, ConfigArgs};

use anyhow::Result;
use rotator_core::{ConfigLoader, EngineConfig};
use std::path::Path;

/// Loads the engine config from `path`, with an optional profile overlay.
/// A missing file yields the defaults.
pub(crate) fn load_config(path: &Path, profile: Option<&str>) -> Result<EngineConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "Config file not found, using defaults");
    }
    match profile {
        Some(profile) => ConfigLoader::load_with_profile(path, profile),
        None => ConfigLoader::load_from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("Config.toml"), None).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn profile_overlays_base_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Config.toml");
        let mut file = std::fs::File::create(&base).unwrap();
        writeln!(file, "[exit]\nmax_hold_minutes = 90\n[rotation]\nmargin = 15.0").unwrap();
        let mut overlay = std::fs::File::create(dir.path().join("Config.fast.toml")).unwrap();
        writeln!(overlay, "[exit]\nmax_hold_minutes = 30").unwrap();

        let config = load_config(&base, Some("fast")).unwrap();
        assert_eq!(config.exit.max_hold_minutes, 30);
        assert!((config.rotation.margin - 15.0).abs() < f64::EPSILON);
    }
}
