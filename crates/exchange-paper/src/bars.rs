use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Bars grouped by symbol, each series in chronological order.
pub type BarSeries = BTreeMap<String, Vec<Bar>>;

/// Reads bars from a CSV file.
///
/// Expected header: `timestamp,symbol,open,high,low,close,volume` with RFC 3339
/// timestamps.
///
/// # Errors
///
/// Returns an error if:
/// - The CSV file cannot be opened
/// - A row has fewer than seven columns
/// - Timestamp parsing fails
/// - Decimal parsing fails for OHLCV values
pub fn load_bars(path: impl AsRef<Path>) -> Result<BarSeries> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open bar file {}", path.display()))?;

    let mut bars = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result?;
        let row = line + 2;
        if record.len() < 7 {
            anyhow::bail!("row {row}: expected 7 columns, found {}", record.len());
        }
        let decimal = |idx: usize| {
            Decimal::from_str(record[idx].trim())
                .with_context(|| format!("row {row}: invalid decimal {:?}", &record[idx]))
        };

        bars.push(Bar {
            timestamp: record[0]
                .trim()
                .parse()
                .with_context(|| format!("row {row}: invalid timestamp {:?}", &record[0]))?,
            symbol: record[1].trim().to_string(),
            open: decimal(2)?,
            high: decimal(3)?,
            low: decimal(4)?,
            close: decimal(5)?,
            volume: decimal(6)?,
        });
    }

    Ok(group_by_symbol(bars))
}

/// Groups bars by symbol and sorts each series by timestamp.
#[must_use]
pub fn group_by_symbol(bars: Vec<Bar>) -> BarSeries {
    let mut series = BarSeries::new();
    for bar in bars {
        series.entry(bar.symbol.clone()).or_default().push(bar);
    }
    for bars in series.values_mut() {
        bars.sort_by_key(|b| b.timestamp);
    }
    series
}
