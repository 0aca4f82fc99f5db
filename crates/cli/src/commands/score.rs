//! Score CLI command.
//!
//! Ranks every symbol in a bar file by opportunity score as of its last bar.

use anyhow::{bail, Context, Result};
use clap::Args;
use rotator_core::{CollaboratorError, ManualClock};
use rotator_engine::OpportunityScorer;
use rotator_paper::ReplayMarketData;
use std::path::PathBuf;
use std::sync::Arc;

use super::load_config;

/// Arguments for the score command.
#[derive(Args, Debug, Clone)]
pub struct ScoreArgs {
    /// Bar CSV file (timestamp,symbol,open,high,low,close,volume)
    #[arg(short, long)]
    pub data: PathBuf,

    /// Config file path
    #[arg(short, long, default_value = rotator_core::config_loader::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Config profile overlay
    #[arg(long, env = "ROTATOR_PROFILE")]
    pub profile: Option<String>,
}

/// Runs the score command.
///
/// # Errors
/// Returns an error if the config or bar file cannot be loaded or holds no bars.
pub fn run_score(args: &ScoreArgs) -> Result<()> {
    let config = load_config(&args.config, args.profile.as_deref())?;

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let market = ReplayMarketData::from_csv(&args.data, clock.clone())
        .with_context(|| format!("Failed to load bars from {}", args.data.display()))?;
    let Some(&last) = market.timestamps().last() else {
        bail!("{} contains no bars", args.data.display());
    };
    clock.set(last);

    let mut snapshots = Vec::new();
    let mut unavailable: Vec<(String, CollaboratorError)> = Vec::new();
    for symbol in market.symbols() {
        match market.snapshot_at(&symbol, last) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => unavailable.push((symbol, e)),
        }
    }

    let ranked = OpportunityScorer::new(config.scoring).rank(&snapshots);

    println!("Opportunity scores at {last}");
    println!(
        "{:<4} {:<8} {:>8} {:>7} {:>8} {:>6}  {}",
        "#", "symbol", "score", "rsi", "vol %", "side", "price"
    );
    for (rank, score) in ranked.iter().enumerate() {
        println!(
            "{:<4} {:<8} {:>8.2} {:>7.2} {:>8.3} {:>6}  {}",
            rank + 1,
            score.symbol,
            score.score,
            score.rsi,
            score.volatility_pct,
            score.preferred_side,
            score.price
        );
    }

    if !unavailable.is_empty() {
        println!();
        println!("unavailable:");
        for (symbol, err) in unavailable {
            println!("  {symbol:<8} {err}");
        }
    }
    Ok(())
}
