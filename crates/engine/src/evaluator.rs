//! Exit rule chain.
//!
//! Rules are checked in a fixed order and the first one that fires wins.
//! No rule fires means hold. The chain is pure: identical inputs always give
//! the identical decision.

use chrono::Duration;
use rotator_core::{CloseReason, ExitThresholds, MarketSignalSnapshot, Position, Side};

use crate::decision::{ExitAction, ExitDecision};

/// Everything one evaluation looks at.
#[derive(Debug, Clone, Copy)]
pub struct ExitContext<'a> {
    pub position: &'a Position,
    pub snapshot: &'a MarketSignalSnapshot,
    /// Advisory confidence, `None` if the advisory was unavailable.
    pub confidence: Option<u8>,
    pub elapsed: Duration,
}

type Predicate = fn(&ExitContext<'_>, &ExitThresholds) -> bool;

/// One predicate -> decision pair of the chain.
#[derive(Debug, Clone, Copy)]
pub struct ExitRule {
    pub name: &'static str,
    pub reason: CloseReason,
    fires: Predicate,
    flips: bool,
}

impl ExitRule {
    #[must_use]
    pub fn fires(&self, ctx: &ExitContext<'_>, thresholds: &ExitThresholds) -> bool {
        (self.fires)(ctx, thresholds)
    }

    fn decide(&self, position: &Position, snapshot: &MarketSignalSnapshot) -> ExitDecision {
        let action = if self.flips {
            ExitAction::Flip {
                to: position.side.opposite(),
            }
        } else {
            ExitAction::Exit
        };
        ExitDecision {
            symbol: position.symbol.clone(),
            side: position.side,
            action,
            reason: self.reason,
            price: snapshot.price,
        }
    }
}

/// The chain, highest precedence first.
pub const EXIT_RULES: [ExitRule; 5] = [
    ExitRule {
        name: "rsi_extreme_flip",
        reason: CloseReason::RsiFlip,
        fires: rsi_extreme,
        flips: true,
    },
    ExitRule {
        name: "rsi_confidence_exit",
        reason: CloseReason::RsiExit,
        fires: rsi_with_confidence,
        flips: false,
    },
    ExitRule {
        name: "trailing_stop",
        reason: CloseReason::TrailingStop,
        fires: trailing_stop_breached,
        flips: false,
    },
    ExitRule {
        name: "timeout",
        reason: CloseReason::Timeout,
        fires: held_too_long,
        flips: false,
    },
    ExitRule {
        name: "volatility_exhaustion",
        reason: CloseReason::VolatilityExhaustion,
        fires: volatility_exhausted,
        flips: false,
    },
];

fn rsi_extreme(ctx: &ExitContext<'_>, t: &ExitThresholds) -> bool {
    match ctx.position.side {
        Side::Long => ctx.snapshot.rsi >= t.flip_long_rsi,
        Side::Short => ctx.snapshot.rsi <= t.flip_short_rsi,
    }
}

fn rsi_with_confidence(ctx: &ExitContext<'_>, t: &ExitThresholds) -> bool {
    let Some(confidence) = ctx.confidence else {
        return false;
    };
    if confidence < t.min_exit_confidence {
        return false;
    }
    match ctx.position.side {
        Side::Long => ctx.snapshot.rsi >= t.exit_long_rsi,
        Side::Short => ctx.snapshot.rsi <= t.exit_short_rsi,
    }
}

fn trailing_stop_breached(ctx: &ExitContext<'_>, _t: &ExitThresholds) -> bool {
    ctx.position.trailing_stop.as_ref().is_some_and(|stop| {
        stop.triggered || stop.is_breached(ctx.position.side, ctx.snapshot.price)
    })
}

fn held_too_long(ctx: &ExitContext<'_>, t: &ExitThresholds) -> bool {
    // a limit chrono cannot represent never times out
    Duration::try_minutes(t.max_hold_minutes).is_some_and(|limit| ctx.elapsed >= limit)
}

fn volatility_exhausted(ctx: &ExitContext<'_>, t: &ExitThresholds) -> bool {
    ctx.snapshot.volatility_pct < t.exhaustion_volatility_pct && ctx.snapshot.rsi < t.exhaustion_rsi
}

#[derive(Debug, Clone)]
pub struct ExitConditionEvaluator {
    thresholds: ExitThresholds,
}

impl ExitConditionEvaluator {
    #[must_use]
    pub const fn new(thresholds: ExitThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn rules() -> &'static [ExitRule] {
        &EXIT_RULES
    }

    /// Returns the first rule that fires, or `None` to hold.
    #[must_use]
    pub fn evaluate(&self, ctx: &ExitContext<'_>) -> Option<ExitDecision> {
        EXIT_RULES
            .iter()
            .find(|rule| rule.fires(ctx, &self.thresholds))
            .map(|rule| rule.decide(ctx.position, ctx.snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rotator_core::TrailingStop;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(symbol: &str, price: Decimal, rsi: f64, volatility_pct: f64) -> MarketSignalSnapshot {
        MarketSignalSnapshot {
            symbol: symbol.to_string(),
            price,
            rsi,
            volatility_pct,
            change_24h_pct: 0.0,
            timestamp: Utc::now(),
        }
    }

    fn long(symbol: &str, entry: Decimal, leverage: u32) -> Position {
        Position::open(symbol, Side::Long, entry, dec!(1), leverage, Utc::now())
    }

    fn evaluate(
        position: &Position,
        snap: &MarketSignalSnapshot,
        confidence: Option<u8>,
        elapsed_min: i64,
    ) -> Option<ExitDecision> {
        ExitConditionEvaluator::new(ExitThresholds::default()).evaluate(&ExitContext {
            position,
            snapshot: snap,
            confidence,
            elapsed: Duration::minutes(elapsed_min),
        })
    }

    #[test]
    fn sol_overbought_flips_to_short_regardless_of_confidence() {
        let pos = long("SOL", dec!(150), 50);
        let snap = snapshot("SOL", dec!(160), 66.0, 2.0);
        for confidence in [None, Some(0), Some(75), Some(100)] {
            let decision = evaluate(&pos, &snap, confidence, 10).unwrap();
            assert_eq!(decision.action, ExitAction::Flip { to: Side::Short });
            assert_eq!(decision.reason, CloseReason::RsiFlip);
        }
    }

    #[test]
    fn flip_precedes_trailing_stop_and_timeout() {
        let mut pos = long("SOL", dec!(150), 50);
        pos.trailing_stop = Some(TrailingStop {
            activation_pnl_pct: dec!(100),
            trail_step: dec!(0.015),
            stop_price: dec!(170),
            high_water_mark: dec!(172),
            activated_at: Utc::now(),
            triggered: true,
        });
        let snap = snapshot("SOL", dec!(160), 70.0, 0.5);
        let decision = evaluate(&pos, &snap, Some(90), 500).unwrap();
        assert_eq!(decision.reason, CloseReason::RsiFlip);
    }

    #[test]
    fn rsi_exit_needs_confidence() {
        let pos = long("ETH", dec!(3000), 10);
        let snap = snapshot("ETH", dec!(3010), 55.0, 2.0);

        assert_eq!(evaluate(&pos, &snap, Some(75), 10).unwrap().reason, CloseReason::RsiExit);
        assert_eq!(evaluate(&pos, &snap, Some(70), 10).unwrap().action, ExitAction::Exit);
        assert!(evaluate(&pos, &snap, Some(69), 10).is_none());
        assert!(evaluate(&pos, &snap, None, 10).is_none());
    }

    #[test]
    fn rsi_exit_boundary_at_fifty() {
        let pos = long("ETH", dec!(3000), 10);
        assert!(evaluate(&pos, &snapshot("ETH", dec!(3000), 50.0, 2.0), Some(70), 0).is_some());
        assert!(evaluate(&pos, &snapshot("ETH", dec!(3000), 49.9, 2.0), Some(70), 0).is_none());
    }

    #[test]
    fn eth_at_rsi_48_exits_only_with_lowered_threshold() {
        let pos = long("ETH", dec!(3000), 10);
        let snap = snapshot("ETH", dec!(3000), 48.0, 2.0);
        assert!(evaluate(&pos, &snap, Some(75), 10).is_none());

        let thresholds = ExitThresholds {
            exit_long_rsi: 48.0,
            ..ExitThresholds::default()
        };
        let decision = ExitConditionEvaluator::new(thresholds)
            .evaluate(&ExitContext {
                position: &pos,
                snapshot: &snap,
                confidence: Some(75),
                elapsed: Duration::minutes(10),
            })
            .unwrap();
        assert_eq!(decision.reason, CloseReason::RsiExit);
    }

    #[test]
    fn oversized_hold_limit_is_rejected_and_never_panics() {
        let mut config = rotator_core::EngineConfig::default();
        config.exit.max_hold_minutes = i64::MAX / 2;
        assert!(config.validate().is_err());

        let pos = long("BTC", dec!(60000), 20);
        let snap = snapshot("BTC", dec!(60000), 48.0, 2.0);
        let decision = ExitConditionEvaluator::new(config.exit).evaluate(&ExitContext {
            position: &pos,
            snapshot: &snap,
            confidence: None,
            elapsed: Duration::days(365 * 100),
        });
        assert!(decision.is_none());
    }

    #[test]
    fn btc_timeout_overrides_low_confidence() {
        let pos = long("BTC", dec!(60000), 20);
        let snap = snapshot("BTC", dec!(60100), 40.0, 2.0);
        let decision = evaluate(&pos, &snap, Some(10), 125).unwrap();
        assert_eq!(decision.reason, CloseReason::Timeout);
        assert_eq!(decision.action, ExitAction::Exit);
    }

    #[test]
    fn timeout_is_unconditional_at_exactly_limit() {
        let pos = long("BTC", dec!(60000), 20);
        let snap = snapshot("BTC", dec!(60000), 50.0, 3.0);
        // rule 2 cannot fire at confidence 0, so the timeout decides
        assert_eq!(evaluate(&pos, &snap, Some(0), 120).unwrap().reason, CloseReason::Timeout);
        assert!(evaluate(&pos, &snap, Some(0), 119).is_none());
    }

    #[test]
    fn trailing_breach_exits() {
        let mut pos = long("SOL", dec!(100), 50);
        pos.trailing_stop = Some(TrailingStop {
            activation_pnl_pct: dec!(100),
            trail_step: dec!(0.015),
            stop_price: dec!(102.44),
            high_water_mark: dec!(104),
            activated_at: Utc::now(),
            triggered: false,
        });
        let snap = snapshot("SOL", dec!(102.40), 48.0, 2.0);
        assert_eq!(evaluate(&pos, &snap, None, 5).unwrap().reason, CloseReason::TrailingStop);
    }

    #[test]
    fn volatility_exhaustion_exits() {
        let pos = long("ETH", dec!(3000), 10);
        let snap = snapshot("ETH", dec!(3000), 44.0, 0.8);
        assert_eq!(
            evaluate(&pos, &snap, None, 5).unwrap().reason,
            CloseReason::VolatilityExhaustion
        );
        // enough movement left: hold
        assert!(evaluate(&pos, &snapshot("ETH", dec!(3000), 44.0, 1.0), None, 5).is_none());
    }

    #[test]
    fn short_side_mirror() {
        let pos = Position::open("ETH", Side::Short, dec!(3000), dec!(1), 10, Utc::now());

        let flip = evaluate(&pos, &snapshot("ETH", dec!(2900), 35.0, 2.0), None, 5).unwrap();
        assert_eq!(flip.action, ExitAction::Flip { to: Side::Long });

        let exit = evaluate(&pos, &snapshot("ETH", dec!(2900), 48.0, 2.0), Some(80), 5).unwrap();
        assert_eq!(exit.reason, CloseReason::RsiExit);

        // overbought does not flip a short
        assert!(evaluate(&pos, &snapshot("ETH", dec!(2900), 70.0, 2.0), Some(80), 5).is_none());
    }

    #[test]
    fn hold_when_nothing_fires() {
        let pos = long("BTC", dec!(60000), 20);
        let snap = snapshot("BTC", dec!(60500), 47.0, 2.5);
        assert!(evaluate(&pos, &snap, Some(95), 30).is_none());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let pos = long("SOL", dec!(150), 50);
        let snap = snapshot("SOL", dec!(151), 52.0, 1.5);
        let first = evaluate(&pos, &snap, Some(72), 60);
        for _ in 0..10 {
            assert_eq!(evaluate(&pos, &snap, Some(72), 60), first);
        }
    }

    #[test]
    fn rule_order_is_stable() {
        let names: Vec<&str> = ExitConditionEvaluator::rules().iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "rsi_extreme_flip",
                "rsi_confidence_exit",
                "trailing_stop",
                "timeout",
                "volatility_exhaustion"
            ]
        );
    }
}
