use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub exit: ExitThresholds,
    pub trailing: TrailingStopConfig,
    pub scoring: ScoringConfig,
    pub rotation: RotationConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    /// Timeout applied to every collaborator call. Must be shorter than the tick.
    pub call_timeout_ms: u64,
    /// JSON file used to recover open positions after a restart.
    pub state_path: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            call_timeout_ms: 5_000,
            state_path: None,
        }
    }
}

/// Thresholds for the ordered exit rule chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitThresholds {
    /// Long positions flip to short at or above this RSI.
    pub flip_long_rsi: f64,
    /// Short positions flip to long at or below this RSI.
    pub flip_short_rsi: f64,
    pub exit_long_rsi: f64,
    pub exit_short_rsi: f64,
    /// Advisory confidence required by the RSI exit rule.
    pub min_exit_confidence: u8,
    pub max_hold_minutes: i64,
    pub exhaustion_volatility_pct: f64,
    pub exhaustion_rsi: f64,
}

impl Default for ExitThresholds {
    fn default() -> Self {
        Self {
            flip_long_rsi: 65.0,
            flip_short_rsi: 35.0,
            exit_long_rsi: 50.0,
            exit_short_rsi: 50.0,
            min_exit_confidence: 70,
            max_hold_minutes: 120,
            exhaustion_volatility_pct: 1.0,
            exhaustion_rsi: 45.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingStopConfig {
    /// Leveraged unrealized PnL (%) at which the stop activates.
    pub activation_pnl_pct: Decimal,
    /// Distance of the stop from the best price, as a fraction (0.015 = 1.5%).
    pub trail_step: Decimal,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            activation_pnl_pct: Decimal::ONE_HUNDRED,
            trail_step: Decimal::new(15, 3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Volatility band (%) that gets the full multiplier.
    pub min_volatility_pct: f64,
    pub max_volatility_pct: f64,
    /// Multiplier at zero volatility.
    pub low_volatility_floor: f64,
    /// Lowest multiplier for volatility far above the band.
    pub high_volatility_floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_volatility_pct: 0.5,
            max_volatility_pct: 8.0,
            low_volatility_floor: 0.5,
            high_volatility_floor: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub enabled: bool,
    /// Score points a candidate must beat the held symbol by.
    pub margin: f64,
    pub watch_list: Vec<String>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            margin: 10.0,
            watch_list: vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Number of decision outcomes remembered for idempotent replay.
    pub idempotency_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            idempotency_capacity: 1024,
        }
    }
}

/// Upper bound for `exit.max_hold_minutes`: one year.
pub const MAX_HOLD_MINUTES: i64 = 525_600;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid config: {0}")]
pub struct ConfigError(pub String);

impl EngineConfig {
    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.tick_interval_secs == 0 {
            return Err(ConfigError("tick_interval_secs must be positive".into()));
        }
        if s.call_timeout_ms == 0 || s.call_timeout_ms >= s.tick_interval_secs.saturating_mul(1000) {
            return Err(ConfigError(format!(
                "call_timeout_ms ({}) must be positive and shorter than the tick interval ({}s)",
                s.call_timeout_ms, s.tick_interval_secs
            )));
        }

        let e = &self.exit;
        for (name, value) in [
            ("flip_long_rsi", e.flip_long_rsi),
            ("flip_short_rsi", e.flip_short_rsi),
            ("exit_long_rsi", e.exit_long_rsi),
            ("exit_short_rsi", e.exit_short_rsi),
            ("exhaustion_rsi", e.exhaustion_rsi),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError(format!("{name} must be within 0-100, got {value}")));
            }
        }
        if e.min_exit_confidence > 100 {
            return Err(ConfigError("min_exit_confidence must be within 0-100".into()));
        }
        if !(1..=MAX_HOLD_MINUTES).contains(&e.max_hold_minutes) {
            return Err(ConfigError(format!(
                "max_hold_minutes must be within 1-{MAX_HOLD_MINUTES}, got {}",
                e.max_hold_minutes
            )));
        }

        let t = &self.trailing;
        if t.trail_step <= Decimal::ZERO || t.trail_step >= Decimal::ONE {
            return Err(ConfigError("trail_step must be between 0 and 1".into()));
        }

        let sc = &self.scoring;
        if sc.min_volatility_pct < 0.0 || sc.max_volatility_pct <= sc.min_volatility_pct {
            return Err(ConfigError("scoring volatility band is empty".into()));
        }
        if !(0.0..=1.0).contains(&sc.low_volatility_floor)
            || !(0.0..=1.0).contains(&sc.high_volatility_floor)
        {
            return Err(ConfigError("volatility floors must be within 0-1".into()));
        }

        let r = &self.rotation;
        if r.enabled && r.watch_list.is_empty() {
            return Err(ConfigError("rotation enabled with an empty watch_list".into()));
        }
        if r.margin < 0.0 {
            return Err(ConfigError("rotation margin must not be negative".into()));
        }

        if self.execution.idempotency_capacity == 0 {
            return Err(ConfigError("idempotency_capacity must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = EngineConfig::default();
        assert_eq!(config.exit.flip_long_rsi, 65.0);
        assert_eq!(config.exit.exit_long_rsi, 50.0);
        assert_eq!(config.exit.min_exit_confidence, 70);
        assert_eq!(config.exit.max_hold_minutes, 120);
        assert_eq!(config.exit.exhaustion_volatility_pct, 1.0);
        assert_eq!(config.exit.exhaustion_rsi, 45.0);
        assert_eq!(config.trailing.activation_pnl_pct, dec!(100));
        assert_eq!(config.trailing.trail_step, dec!(0.015));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn timeout_must_be_shorter_than_tick() {
        let mut config = EngineConfig::default();
        config.scheduler.call_timeout_ms = 30_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn hold_limit_is_bounded() {
        let mut config = EngineConfig::default();
        config.exit.max_hold_minutes = MAX_HOLD_MINUTES;
        assert!(config.validate().is_ok());
        config.exit.max_hold_minutes = MAX_HOLD_MINUTES + 1;
        assert!(config.validate().unwrap_err().to_string().contains("max_hold_minutes"));
        config.exit.max_hold_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn huge_tick_interval_does_not_overflow() {
        let mut config = EngineConfig::default();
        config.scheduler.tick_interval_secs = u64::MAX;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rsi_threshold_out_of_range_rejected() {
        let mut config = EngineConfig::default();
        config.exit.flip_long_rsi = 120.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("flip_long_rsi"));
    }

    #[test]
    fn empty_watch_list_rejected_only_when_rotating() {
        let mut config = EngineConfig::default();
        config.rotation.watch_list.clear();
        assert!(config.validate().is_err());
        config.rotation.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"rotation":{"margin":5.0}}"#).unwrap();
        assert_eq!(config.rotation.margin, 5.0);
        assert_eq!(config.rotation.watch_list.len(), 3);
        assert_eq!(config.exit, ExitThresholds::default());
    }
}
