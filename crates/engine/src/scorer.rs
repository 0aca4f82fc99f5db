//! Opportunity scoring over the watch-list.
//!
//! `score = extremity × volatility_multiplier`, where extremity maps
//! `max(RSI, 100 - RSI)` from [50, 100] onto [0, 100]. The multiplier is 1.0
//! inside the configured volatility band, tapers linearly towards
//! `low_volatility_floor` below it, and decays as `max / vol` above it
//! (never under `high_volatility_floor`). The multiplier is always positive,
//! so a more extreme RSI at equal volatility never scores lower.

use rotator_core::{MarketSignalSnapshot, ScoringConfig, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityScore {
    pub symbol: String,
    pub score: f64,
    pub price: Decimal,
    pub rsi: f64,
    pub volatility_pct: f64,
    /// Mean-reversion side: short when overbought, long otherwise.
    pub preferred_side: Side,
}

#[derive(Debug, Clone)]
pub struct OpportunityScorer {
    config: ScoringConfig,
}

impl OpportunityScorer {
    #[must_use]
    pub const fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn score(&self, snapshot: &MarketSignalSnapshot) -> OpportunityScore {
        // unusable RSI reads as neutral so it can never rank first
        let rsi = finite_or(snapshot.rsi, 50.0).clamp(0.0, 100.0);
        let volatility = finite_or(snapshot.volatility_pct, 0.0).max(0.0);

        let extremity = (rsi.max(100.0 - rsi) - 50.0) * 2.0;
        let score = extremity * self.volatility_multiplier(volatility);

        OpportunityScore {
            symbol: snapshot.symbol.clone(),
            score,
            price: snapshot.price,
            rsi,
            volatility_pct: volatility,
            preferred_side: if rsi >= 50.0 { Side::Short } else { Side::Long },
        }
    }

    /// Scores every snapshot, best first. Equal scores are ordered by symbol.
    #[must_use]
    pub fn rank(&self, snapshots: &[MarketSignalSnapshot]) -> Vec<OpportunityScore> {
        let mut scores: Vec<OpportunityScore> = snapshots.iter().map(|s| self.score(s)).collect();
        scores.sort_by(compare_ranked);
        scores
    }

    fn volatility_multiplier(&self, volatility: f64) -> f64 {
        let c = &self.config;
        if volatility < c.min_volatility_pct {
            let progress = if c.min_volatility_pct > 0.0 {
                volatility / c.min_volatility_pct
            } else {
                1.0
            };
            c.low_volatility_floor + (1.0 - c.low_volatility_floor) * progress
        } else if volatility > c.max_volatility_pct {
            (c.max_volatility_pct / volatility).max(c.high_volatility_floor)
        } else {
            1.0
        }
    }
}

/// Best score first, ties broken by lexicographic symbol order.
pub(crate) fn compare_ranked(a: &OpportunityScore, b: &OpportunityScore) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.symbol.cmp(&b.symbol))
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snap(symbol: &str, rsi: f64, volatility_pct: f64) -> MarketSignalSnapshot {
        MarketSignalSnapshot {
            symbol: symbol.to_string(),
            price: dec!(100),
            rsi,
            volatility_pct,
            change_24h_pct: 0.0,
            timestamp: Utc::now(),
        }
    }

    fn scorer() -> OpportunityScorer {
        OpportunityScorer::new(ScoringConfig::default())
    }

    #[test]
    fn more_extreme_rsi_never_scores_lower() {
        let s = scorer();
        assert!(s.score(&snap("SOL", 80.0, 3.0)).score >= s.score(&snap("SOL", 60.0, 3.0)).score);

        for vol in [0.0, 0.2, 1.0, 5.0, 8.0, 20.0, 100.0] {
            let mut last = f64::MIN;
            for step in 0..=50 {
                let rsi = 50.0 + f64::from(step);
                let score = s.score(&snap("X", rsi, vol)).score;
                assert!(score >= last, "non-monotonic at rsi={rsi} vol={vol}");
                last = score;
            }
        }
    }

    #[test]
    fn oversold_and_overbought_are_symmetric() {
        let s = scorer();
        let high = s.score(&snap("BTC", 80.0, 3.0));
        let low = s.score(&snap("BTC", 20.0, 3.0));
        assert!((high.score - low.score).abs() < f64::EPSILON);
        assert_eq!(high.preferred_side, Side::Short);
        assert_eq!(low.preferred_side, Side::Long);
    }

    #[test]
    fn neutral_rsi_scores_zero() {
        assert_eq!(scorer().score(&snap("ETH", 50.0, 3.0)).score, 0.0);
    }

    #[test]
    fn volatility_band_gets_full_weight() {
        let s = scorer();
        assert!((s.score(&snap("ETH", 90.0, 3.0)).score - 80.0).abs() < 1e-9);
        // dead market: half weight at zero volatility
        assert!((s.score(&snap("ETH", 90.0, 0.0)).score - 40.0).abs() < 1e-9);
        // wild market: 8 / 16 = 0.5
        assert!((s.score(&snap("ETH", 90.0, 16.0)).score - 40.0).abs() < 1e-9);
        // floor
        assert!((s.score(&snap("ETH", 90.0, 1000.0)).score - 20.0).abs() < 1e-9);
    }

    #[test]
    fn rank_orders_by_score_then_symbol() {
        let ranked = scorer().rank(&[
            snap("SOL", 70.0, 3.0),
            snap("BTC", 85.0, 3.0),
            snap("ETH", 15.0, 3.0),
            snap("AVAX", 30.0, 3.0),
        ]);
        let order: Vec<&str> = ranked.iter().map(|s| s.symbol.as_str()).collect();
        // ETH and BTC tie at 70; AVAX and SOL tie at 40
        assert_eq!(order, vec!["BTC", "ETH", "AVAX", "SOL"]);
    }

    #[test]
    fn garbage_inputs_do_not_panic() {
        let s = scorer();
        assert_eq!(s.score(&snap("X", f64::NAN, f64::NAN)).score, 0.0);
        assert_eq!(s.score(&snap("X", f64::INFINITY, 2.0)).score, 0.0);
        assert!(s.score(&snap("X", 150.0, -3.0)).score <= 100.0);
    }

    #[test]
    fn non_finite_rsi_never_wins_rotation() {
        use crate::rotation::RotationCoordinator;
        use rotator_core::{Position, RotationConfig, Side};
        use std::collections::HashSet;

        let ranked = scorer().rank(&[
            snap("BTC", 35.0, 2.0),
            snap("ETH", 92.5, 2.0),
            snap("AAA", f64::NAN, 2.0),
        ]);
        assert_eq!(ranked[0].symbol, "ETH");
        assert_eq!(ranked.last().unwrap().symbol, "AAA");

        let held = Position::open("BTC", Side::Long, dec!(100), dec!(1), 10, Utc::now());
        let excluded: HashSet<String> = ["BTC".to_string()].into_iter().collect();
        let rotation = RotationCoordinator::new(RotationConfig::default())
            .evaluate(&held, &ranked, &excluded)
            .unwrap();
        assert_eq!(rotation.to_symbol, "ETH");
    }
}
