//! Trailing stop state machine: inactive -> active -> triggered.

use chrono::{DateTime, Utc};
use rotator_core::{Position, Side, TrailingStop, TrailingStopConfig};
use rust_decimal::Decimal;

/// What happened to a position's trailing stop on one price update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrailingUpdate {
    /// PnL has not yet reached the activation threshold.
    Inactive,
    Activated { stop_price: Decimal },
    Ratcheted { from: Decimal, to: Decimal },
    /// Active, stop unchanged.
    Holding { stop_price: Decimal },
    /// Price crossed the stop. Terminal for the position.
    Triggered { stop_price: Decimal },
}

#[derive(Debug, Clone)]
pub struct TrailingStopManager {
    config: TrailingStopConfig,
}

impl TrailingStopManager {
    #[must_use]
    pub const fn new(config: TrailingStopConfig) -> Self {
        Self { config }
    }

    /// Feeds the latest price into the position's trailing stop.
    ///
    /// Must be called under the symbol's lock: the stop is read and written
    /// in one step.
    pub fn update(&self, position: &mut Position, price: Decimal, now: DateTime<Utc>) -> TrailingUpdate {
        let side = position.side;

        let Some(stop) = position.trailing_stop.as_mut() else {
            if position.unrealized_pnl_pct(price) < self.config.activation_pnl_pct {
                return TrailingUpdate::Inactive;
            }
            let stop_price = stop_from(side, price, self.config.trail_step);
            position.trailing_stop = Some(TrailingStop {
                activation_pnl_pct: self.config.activation_pnl_pct,
                trail_step: self.config.trail_step,
                stop_price,
                high_water_mark: price,
                activated_at: now,
                triggered: false,
            });
            tracing::info!(
                symbol = %position.symbol,
                %price,
                %stop_price,
                "Trailing stop activated"
            );
            return TrailingUpdate::Activated { stop_price };
        };

        if stop.triggered {
            return TrailingUpdate::Triggered {
                stop_price: stop.stop_price,
            };
        }

        if stop.is_breached(side, price) {
            stop.triggered = true;
            tracing::info!(
                symbol = %position.symbol,
                %price,
                stop_price = %stop.stop_price,
                "Trailing stop breached"
            );
            return TrailingUpdate::Triggered {
                stop_price: stop.stop_price,
            };
        }

        if !is_more_favorable(side, price, stop.high_water_mark) {
            return TrailingUpdate::Holding {
                stop_price: stop.stop_price,
            };
        }

        stop.high_water_mark = price;
        let candidate = stop_from(side, price, stop.trail_step);
        if is_more_favorable(side, candidate, stop.stop_price) {
            let from = stop.stop_price;
            stop.stop_price = candidate;
            tracing::debug!(symbol = %position.symbol, %from, to = %candidate, "Trailing stop ratcheted");
            TrailingUpdate::Ratcheted {
                from,
                to: candidate,
            }
        } else {
            TrailingUpdate::Holding {
                stop_price: stop.stop_price,
            }
        }
    }
}

fn stop_from(side: Side, price: Decimal, step: Decimal) -> Decimal {
    match side {
        Side::Long => price * (Decimal::ONE - step),
        Side::Short => price * (Decimal::ONE + step),
    }
}

/// True if `a` is better than `b` for a position on `side`.
fn is_more_favorable(side: Side, a: Decimal, b: Decimal) -> bool {
    match side {
        Side::Long => a > b,
        Side::Short => a < b,
    }
}
