//! Paper collaborators for the rotator engine.
//!
//! Nothing in this crate talks to an exchange: market data is replayed from
//! CSV bars and orders are filled locally.

pub mod advisory;
pub mod bars;
pub mod gateway;
pub mod indicators;
pub mod market_data;

pub use advisory::FixedAdvisory;
pub use bars::{group_by_symbol, load_bars, Bar, BarSeries};
pub use gateway::PaperOrderGateway;
pub use market_data::{MarkPriceSource, ReplayMarketData};
