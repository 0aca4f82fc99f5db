//! Engine state persistence for surviving restarts.
//!
//! Open positions (including trailing stop state) are written to a JSON file
//! after every tick that changed the store. Writes go to a sibling temp file
//! which is then renamed over the target, so a crash mid-write leaves the
//! previous state intact.

use chrono::{DateTime, Utc};
use rotator_core::Position;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub positions: Vec<Position>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StatePersistence {
    path: PathBuf,
}

impl StatePersistence {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves `positions` atomically.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save(&self, positions: &[Position]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let state = PersistedState {
            positions: positions.to_vec(),
            saved_at: Utc::now(),
        };

        let tmp = self.tmp_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &state)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            positions = positions.len(),
            "Saved engine state"
        );
        Ok(())
    }

    /// Loads persisted positions.
    ///
    /// A missing or unreadable file yields an empty list: the engine starts
    /// flat rather than refusing to run.
    #[must_use]
    pub fn load(&self) -> Vec<Position> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No engine state file found, starting fresh");
            return Vec::new();
        }

        match self.load_raw() {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    positions = state.positions.len(),
                    saved_at = %state.saved_at,
                    "Loaded engine state"
                );
                state.positions
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to load engine state, starting fresh"
                );
                Vec::new()
            }
        }
    }

    /// Reads the file without any fallback.
    pub fn load_raw(&self) -> Result<PersistedState, PersistenceError> {
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotator_core::{Side, TrailingStop};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn temp_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("engine.json");
        (dir, path)
    }

    #[test]
    fn missing_file_starts_empty() {
        let (_dir, path) = temp_path();
        assert!(StatePersistence::new(path).load().is_empty());
    }

    #[test]
    fn save_then_load_keeps_trailing_stop() {
        let (_dir, path) = temp_path();
        let persistence = StatePersistence::new(&path);

        let mut sol = Position::open("SOL", Side::Long, dec!(100), dec!(10), 50, Utc::now());
        sol.trailing_stop = Some(TrailingStop {
            activation_pnl_pct: dec!(100),
            trail_step: dec!(0.015),
            stop_price: dec!(102.44),
            high_water_mark: dec!(104),
            activated_at: Utc::now(),
            triggered: false,
        });
        let eth = Position::open("ETH", Side::Short, dec!(3000), dec!(1), 10, Utc::now());

        persistence.save(&[eth.clone(), sol.clone()]).unwrap();
        let loaded = persistence.load();

        assert_eq!(loaded, vec![eth, sol]);
        assert!(!path.with_file_name("engine.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let (_dir, path) = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        let persistence = StatePersistence::new(&path);
        assert!(persistence.load().is_empty());
        assert!(matches!(persistence.load_raw(), Err(PersistenceError::Json(_))));
    }

    #[test]
    fn save_overwrites_previous_state() {
        let (_dir, path) = temp_path();
        let persistence = StatePersistence::new(&path);

        let btc = Position::open("BTC", Side::Long, dec!(60000), dec!(0.1), 20, Utc::now());
        persistence.save(&[btc]).unwrap();
        persistence.save(&[]).unwrap();

        assert!(persistence.load().is_empty());
    }
}
