use async_trait::async_trait;
use rotator_core::{AdvisorySignal, CollaboratorError, MarketSignalSnapshot};
use std::collections::HashMap;

/// Advisory that always answers with the same confidence, optionally
/// overridden per symbol.
#[derive(Debug, Clone, Default)]
pub struct FixedAdvisory {
    confidence: Option<u8>,
    overrides: HashMap<String, u8>,
}

impl FixedAdvisory {
    #[must_use]
    pub fn new(confidence: u8) -> Self {
        Self {
            confidence: Some(confidence.min(100)),
            overrides: HashMap::new(),
        }
    }

    /// An advisory that is never available. Confidence-gated rules never fire.
    #[must_use]
    pub fn offline() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_override(mut self, symbol: impl Into<String>, confidence: u8) -> Self {
        self.overrides.insert(symbol.into(), confidence.min(100));
        self
    }
}

#[async_trait]
impl AdvisorySignal for FixedAdvisory {
    async fn get_confidence(
        &self,
        symbol: &str,
        _snapshot: &MarketSignalSnapshot,
    ) -> Result<u8, CollaboratorError> {
        self.overrides
            .get(symbol)
            .copied()
            .or(self.confidence)
            .ok_or_else(|| CollaboratorError::Unavailable("advisory offline".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snap(symbol: &str) -> MarketSignalSnapshot {
        MarketSignalSnapshot {
            symbol: symbol.to_string(),
            price: dec!(100),
            rsi: 50.0,
            volatility_pct: 2.0,
            change_24h_pct: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn overrides_win_and_values_are_capped() {
        let advisory = FixedAdvisory::new(150).with_override("ETH", 40);
        assert_eq!(advisory.get_confidence("BTC", &snap("BTC")).await, Ok(100));
        assert_eq!(advisory.get_confidence("ETH", &snap("ETH")).await, Ok(40));
    }

    #[tokio::test]
    async fn offline_is_unavailable() {
        let advisory = FixedAdvisory::offline();
        assert!(advisory.get_confidence("BTC", &snap("BTC")).await.is_err());
    }
}
