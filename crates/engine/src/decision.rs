//! Transient decision values handed from the evaluators to the executor.

use chrono::{DateTime, Utc};
use rotator_core::{CloseReason, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionKind {
    Exit,
    Flip,
    Rotate,
    Hold,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit => write!(f, "exit"),
            Self::Flip => write!(f, "flip"),
            Self::Rotate => write!(f, "rotate"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitAction {
    Exit,
    /// Close, then open on the given side.
    Flip { to: Side },
}

/// Output of the exit rule chain for one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub symbol: String,
    pub side: Side,
    pub action: ExitAction,
    pub reason: CloseReason,
    /// Snapshot price the decision was made at.
    pub price: Decimal,
}

impl ExitDecision {
    #[must_use]
    pub const fn kind(&self) -> DecisionKind {
        match self.action {
            ExitAction::Exit => DecisionKind::Exit,
            ExitAction::Flip { .. } => DecisionKind::Flip,
        }
    }
}

/// Close the held position and redeploy into a better-scoring symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationDecision {
    pub from_symbol: String,
    pub from_side: Side,
    pub from_price: Decimal,
    pub to_symbol: String,
    pub to_side: Side,
    pub to_price: Decimal,
    pub held_score: f64,
    pub candidate_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    Hold { symbol: String },
    Exit(ExitDecision),
    Rotate(RotationDecision),
}

impl Decision {
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Hold { symbol } => symbol,
            Self::Exit(d) => &d.symbol,
            Self::Rotate(d) => &d.from_symbol,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> DecisionKind {
        match self {
            Self::Hold { .. } => DecisionKind::Hold,
            Self::Exit(d) => d.kind(),
            Self::Rotate(_) => DecisionKind::Rotate,
        }
    }
}

/// Identity of one decision instance: (symbol, kind, tick timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionKey {
    pub symbol: String,
    pub kind: DecisionKind,
    pub tick_at: DateTime<Utc>,
}

impl DecisionKey {
    #[must_use]
    pub fn new(decision: &Decision, tick_at: DateTime<Utc>) -> Self {
        Self {
            symbol: decision.symbol().to_string(),
            kind: decision.kind(),
            tick_at,
        }
    }
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.symbol, self.kind, self.tick_at.timestamp_millis())
    }
}
