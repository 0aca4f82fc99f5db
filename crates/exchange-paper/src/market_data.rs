use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rotator_core::{Clock, CollaboratorError, MarketDataSource, MarketSignalSnapshot};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::bars::{load_bars, Bar, BarSeries};
use crate::indicators::{change_pct, realized_volatility_pct, wilder_rsi};

pub const DEFAULT_RSI_PERIOD: usize = 14;
pub const DEFAULT_VOLATILITY_WINDOW: usize = 20;

/// Last known price for a symbol. Lets the paper gateway fill at the price the
/// replay is currently showing.
pub trait MarkPriceSource: Send + Sync {
    fn mark_price(&self, symbol: &str) -> Option<Decimal>;
}

/// Serves snapshots from historical bars as of the clock's current time.
///
/// Only bars with `timestamp <= clock.now()` are visible, so the replay
/// never looks ahead.
pub struct ReplayMarketData {
    series: BarSeries,
    clock: Arc<dyn Clock>,
    rsi_period: usize,
    volatility_window: usize,
}

impl ReplayMarketData {
    #[must_use]
    pub fn new(series: BarSeries, clock: Arc<dyn Clock>) -> Self {
        Self {
            series,
            clock,
            rsi_period: DEFAULT_RSI_PERIOD,
            volatility_window: DEFAULT_VOLATILITY_WINDOW,
        }
    }

    /// Loads bars from `path`. See [`load_bars`] for the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_csv(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let series = load_bars(path)?;
        tracing::info!(
            symbols = series.len(),
            bars = series.values().map(Vec::len).sum::<usize>(),
            "Loaded replay bars"
        );
        Ok(Self::new(series, clock))
    }

    #[must_use]
    pub fn with_periods(mut self, rsi_period: usize, volatility_window: usize) -> Self {
        self.rsi_period = rsi_period.max(1);
        self.volatility_window = volatility_window.max(1);
        self
    }

    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    /// Every distinct bar timestamp across all symbols, ascending.
    #[must_use]
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.series
            .values()
            .flatten()
            .map(|b| b.timestamp)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Bars of `symbol` visible at `at`.
    fn visible(&self, symbol: &str, at: DateTime<Utc>) -> &[Bar] {
        let Some(bars) = self.series.get(symbol) else {
            return &[];
        };
        let end = bars.partition_point(|b| b.timestamp <= at);
        &bars[..end]
    }

    /// Builds the snapshot of `symbol` as of `at`.
    ///
    /// # Errors
    ///
    /// `Unavailable` for unknown symbols or too little history for the indicators.
    pub fn snapshot_at(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
    ) -> Result<MarketSignalSnapshot, CollaboratorError> {
        let bars = self.visible(symbol, at);
        let Some(last) = bars.last() else {
            return Err(CollaboratorError::Unavailable(format!("no bars for {symbol} at {at}")));
        };

        let closes: Vec<f64> = bars
            .iter()
            .map(|b| b.close.to_f64().unwrap_or(f64::NAN))
            .collect();

        let rsi = wilder_rsi(&closes, self.rsi_period).ok_or_else(|| {
            CollaboratorError::Unavailable(format!(
                "{symbol}: {} bars, RSI needs {}",
                closes.len(),
                self.rsi_period + 1
            ))
        })?;
        let volatility_pct =
            realized_volatility_pct(&closes, self.volatility_window).ok_or_else(|| {
                CollaboratorError::Unavailable(format!(
                    "{symbol}: {} bars, volatility needs {}",
                    closes.len(),
                    self.volatility_window + 1
                ))
            })?;

        let day_ago = last.timestamp - Duration::hours(24);
        let base = bars
            .iter()
            .rev()
            .find(|b| b.timestamp <= day_ago)
            .unwrap_or(&bars[0]);
        let change_24h_pct = change_pct(
            base.close.to_f64().unwrap_or(0.0),
            last.close.to_f64().unwrap_or(0.0),
        );

        Ok(MarketSignalSnapshot {
            symbol: symbol.to_string(),
            price: last.close,
            rsi,
            volatility_pct,
            change_24h_pct,
            timestamp: last.timestamp,
        })
    }
}

#[async_trait]
impl MarketDataSource for ReplayMarketData {
    async fn get_snapshot(&self, symbol: &str) -> Result<MarketSignalSnapshot, CollaboratorError> {
        self.snapshot_at(symbol, self.clock.now())
    }
}

impl MarkPriceSource for ReplayMarketData {
    fn mark_price(&self, symbol: &str) -> Option<Decimal> {
        self.visible(symbol, self.clock.now()).last().map(|b| b.close)
    }
}
