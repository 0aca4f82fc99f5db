use crate::position::{OrderSide, Position, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time market read for one instrument. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSignalSnapshot {
    pub symbol: String,
    pub price: Decimal,
    /// Relative Strength Index, 0-100.
    pub rsi: f64,
    /// Realized volatility in percent.
    pub volatility_pct: f64,
    pub change_24h_pct: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Size in base units.
    pub size: Decimal,
    pub leverage: u32,
    pub reduce_only: bool,
    /// Reference price at decision time, used by simulated gateways.
    pub reference_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub filled_size: Decimal,
    pub avg_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    RsiFlip,
    RsiExit,
    TrailingStop,
    Timeout,
    VolatilityExhaustion,
    Rotation,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsiFlip => write!(f, "rsi_flip"),
            Self::RsiExit => write!(f, "rsi_exit"),
            Self::TrailingStop => write!(f, "trailing_stop"),
            Self::Timeout => write!(f, "timeout"),
            Self::VolatilityExhaustion => write!(f, "volatility_exhaustion"),
            Self::Rotation => write!(f, "rotation"),
        }
    }
}

/// Events published by the engine for dashboards and loggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    PositionOpened {
        position: Position,
        order_id: String,
    },
    PositionClosed {
        symbol: String,
        side: Side,
        reason: CloseReason,
        exit_price: Decimal,
        realized_pnl: Decimal,
        order_id: String,
        timestamp: DateTime<Utc>,
    },
    TrailingStopActivated {
        symbol: String,
        stop_price: Decimal,
        timestamp: DateTime<Utc>,
    },
    TrailingStopRatcheted {
        symbol: String,
        from: Decimal,
        to: Decimal,
        timestamp: DateTime<Utc>,
    },
    ExecutionFailed {
        symbol: String,
        class: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    SymbolHalted {
        symbol: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::PositionOpened { position, .. } => &position.symbol,
            Self::PositionClosed { symbol, .. }
            | Self::TrailingStopActivated { symbol, .. }
            | Self::TrailingStopRatcheted { symbol, .. }
            | Self::ExecutionFailed { symbol, .. }
            | Self::SymbolHalted { symbol, .. } => symbol,
        }
    }
}
