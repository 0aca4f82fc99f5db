use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a leveraged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Returns the opposite side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// `+1` for long, `-1` for short.
    #[must_use]
    pub fn direction(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Order side that opens a position on this side.
    #[must_use]
    pub const fn entry_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position on this side.
    #[must_use]
    pub const fn exit_order_side(self) -> OrderSide {
        self.opposite().entry_order_side()
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.pad("long"),
            Self::Short => f.pad("short"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Self::Long),
            "short" | "sell" => Ok(Self::Short),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

/// Trailing stop attached to one open position.
///
/// Created the first time the position's leveraged PnL reaches the activation
/// threshold. `stop_price` only ever moves in the direction that locks in more
/// profit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub activation_pnl_pct: Decimal,
    pub trail_step: Decimal,
    pub stop_price: Decimal,
    /// Best favorable price seen since activation.
    pub high_water_mark: Decimal,
    pub activated_at: DateTime<Utc>,
    pub triggered: bool,
}

impl TrailingStop {
    /// Returns true if `price` has crossed the stop against a position on `side`.
    #[must_use]
    pub fn is_breached(&self, side: Side, price: Decimal) -> bool {
        match side {
            Side::Long => price <= self.stop_price,
            Side::Short => price >= self.stop_price,
        }
    }
}

/// An open (or closing) leveraged position, unique per symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Size in base units.
    pub size: Decimal,
    pub leverage: u32,
    pub status: PositionStatus,
    #[serde(default)]
    pub trailing_stop: Option<TrailingStop>,
}

impl Position {
    #[must_use]
    pub fn open(
        symbol: impl Into<String>,
        side: Side,
        entry_price: Decimal,
        size: Decimal,
        leverage: u32,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            entry_price,
            entry_time,
            size,
            leverage: leverage.max(1),
            status: PositionStatus::Open,
            trailing_stop: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Effective exposure: size × price × leverage.
    #[must_use]
    pub fn notional(&self, price: Decimal) -> Decimal {
        self.size * price * Decimal::from(self.leverage)
    }

    /// Leveraged unrealized PnL as a percentage of margin.
    #[must_use]
    pub fn unrealized_pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.direction() * (price - self.entry_price) / self.entry_price
            * Decimal::from(self.leverage)
            * Decimal::ONE_HUNDRED
    }

    /// Realized PnL in quote currency if the position were closed at `price`.
    #[must_use]
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        self.side.direction() * (price - self.entry_price) * self.size
    }
}
