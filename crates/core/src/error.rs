//! Error taxonomy shared by the engine and its collaborators.
//!
//! Every failure the engine sees is ultimately classified as transient,
//! rejected, inconsistent or an invariant violation (see [`ErrorClass`]).

use std::fmt;
use thiserror::Error;

/// How the engine reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network, timeout or rate limit. No state change, retried next tick.
    Transient,
    /// Exchange-side validation failure. Decision abandoned for this tick.
    Rejected,
    /// Close leg succeeded but open leg failed. Position recorded closed.
    Inconsistent,
    /// Programming-fatal. Symbol halted until manual intervention.
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Rejected => write!(f, "rejected"),
            Self::Inconsistent => write!(f, "inconsistent"),
            Self::InvariantViolation => write!(f, "invariant_violation"),
        }
    }
}

/// Failure of the market-data or advisory collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("call timed out after {0}ms")]
    Timeout(u64),
}

/// Failure reported by the order gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("transient gateway error: {0}")]
    Transient(String),

    #[error("gateway call timed out after {0}ms")]
    Timeout(u64),
}

impl GatewayError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no position for {symbol}")]
    NotFound { symbol: String },

    #[error("invariant violation for {symbol}: {detail}")]
    InvariantViolation { symbol: String, detail: String },
}

impl StoreError {
    pub fn not_found(symbol: impl Into<String>) -> Self {
        Self::NotFound {
            symbol: symbol.into(),
        }
    }

    pub fn invariant(symbol: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            symbol: symbol.into(),
            detail: detail.into(),
        }
    }
}

/// Failure of the action executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("transient failure on {symbol}: {message}")]
    Transient { symbol: String, message: String },

    #[error("order rejected on {symbol}: {message}")]
    Rejected { symbol: String, message: String },

    /// The close leg filled but the open leg did not.
    #[error(
        "inconsistent on {symbol}: closed by order {close_order_id} but open leg on {target} failed: {message}"
    )]
    Inconsistent {
        symbol: String,
        target: String,
        close_order_id: String,
        message: String,
    },

    #[error("no open position for {symbol}")]
    NotFound { symbol: String },

    #[error("invariant violation on {symbol}: {detail}")]
    InvariantViolation { symbol: String, detail: String },

    #[error("decision for {symbol} is already in flight")]
    InFlight { symbol: String },
}

impl ExecutionError {
    /// Maps a gateway failure onto the executor taxonomy.
    pub fn from_gateway(symbol: impl Into<String>, err: &GatewayError) -> Self {
        let symbol = symbol.into();
        if err.is_transient() {
            Self::Transient {
                symbol,
                message: err.to_string(),
            }
        } else {
            Self::Rejected {
                symbol,
                message: err.to_string(),
            }
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            // A concurrent close may have removed the position; the next tick sorts it out.
            Self::Transient { .. } | Self::NotFound { .. } | Self::InFlight { .. } => {
                ErrorClass::Transient
            }
            Self::Rejected { .. } => ErrorClass::Rejected,
            Self::Inconsistent { .. } => ErrorClass::Inconsistent,
            Self::InvariantViolation { .. } => ErrorClass::InvariantViolation,
        }
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Transient { symbol, .. }
            | Self::Rejected { symbol, .. }
            | Self::Inconsistent { symbol, .. }
            | Self::NotFound { symbol }
            | Self::InvariantViolation { symbol, .. }
            | Self::InFlight { symbol } => symbol,
        }
    }
}

impl From<StoreError> for ExecutionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { symbol } => Self::NotFound { symbol },
            StoreError::InvariantViolation { symbol, detail } => {
                Self::InvariantViolation { symbol, detail }
            }
        }
    }
}
