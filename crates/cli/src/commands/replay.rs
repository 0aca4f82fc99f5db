//! Replay CLI command.
//!
//! Steps a manual clock through every bar timestamp of a CSV file and runs
//! one engine tick per step against paper collaborators.

use anyhow::{bail, Context, Result};
use clap::Args;
use rotator_core::{ConfigWatcher, EngineEvent, ManualClock, Position, Side};
use rotator_engine::{Collaborators, EngineLoop, OutcomeStatus, StatePersistence};
use rotator_paper::{FixedAdvisory, MarkPriceSource, PaperOrderGateway, ReplayMarketData};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::load_config;

/// A position to hold when the replay starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSpec {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub leverage: u32,
}

impl FromStr for OpenSpec {
    type Err = String;

    /// Parses `SYMBOL:SIDE:SIZE:LEVERAGE`, e.g. `SOL:long:10:50`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [symbol, side, size, leverage] = parts.as_slice() else {
            return Err(format!("expected SYMBOL:SIDE:SIZE:LEVERAGE, got {s:?}"));
        };
        let size = Decimal::from_str(size).map_err(|e| format!("invalid size {size:?}: {e}"))?;
        if size <= Decimal::ZERO {
            return Err(format!("size must be positive, got {size}"));
        }
        let leverage: u32 = leverage
            .parse()
            .map_err(|e| format!("invalid leverage {leverage:?}: {e}"))?;
        if leverage == 0 {
            return Err("leverage must be at least 1".to_string());
        }
        Ok(Self {
            symbol: symbol.to_uppercase(),
            side: side.parse()?,
            size,
            leverage,
        })
    }
}

/// Arguments for the replay command.
#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Bar CSV file (timestamp,symbol,open,high,low,close,volume)
    #[arg(short, long)]
    pub data: PathBuf,

    /// Config file path
    #[arg(short, long, default_value = rotator_core::config_loader::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Config profile overlay (loads Config.{profile}.toml next to the config file)
    #[arg(long, env = "ROTATOR_PROFILE")]
    pub profile: Option<String>,

    /// Position held at the first bar, as SYMBOL:SIDE:SIZE:LEVERAGE (repeatable)
    #[arg(long = "open")]
    pub open: Vec<OpenSpec>,

    /// Advisory confidence returned for every symbol. Omit to run without advisory.
    #[arg(long)]
    pub confidence: Option<u8>,

    /// Paper fill slippage in basis points
    #[arg(long, default_value = "5")]
    pub slippage_bps: Decimal,

    /// Engine state file (overrides scheduler.state_path)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Reload the config file when it changes while the replay runs
    #[arg(long)]
    pub watch_config: bool,
}

#[derive(Debug, Default)]
struct ReplaySummary {
    ticks: usize,
    opened: usize,
    closed: usize,
    failures: usize,
    realized_pnl: Decimal,
}

/// Runs the replay command.
///
/// # Errors
/// Returns an error if the config or bar file cannot be loaded, the file holds
/// no bars, or an `--open` position has no price at the first bar.
pub async fn run_replay(args: ReplayArgs) -> Result<()> {
    let config = load_config(&args.config, args.profile.as_deref())?;

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let market = Arc::new(
        ReplayMarketData::from_csv(&args.data, clock.clone())
            .with_context(|| format!("Failed to load bars from {}", args.data.display()))?,
    );
    let timestamps = market.timestamps();
    let Some(&first) = timestamps.first() else {
        bail!("{} contains no bars", args.data.display());
    };
    clock.set(first);

    let gateway = Arc::new(
        PaperOrderGateway::new(args.slippage_bps, clock.clone()).with_mark_prices(market.clone()),
    );
    let advisory = Arc::new(args.confidence.map_or_else(FixedAdvisory::offline, FixedAdvisory::new));

    let (watcher, config_rx) = ConfigWatcher::new(config, &args.config);
    let watcher = watcher.with_profile(args.profile.clone());
    if args.watch_config {
        tokio::spawn(async move {
            if let Err(e) = watcher.watch().await {
                tracing::warn!(error = %e, "Config watcher stopped");
            }
        });
    }

    let mut engine = EngineLoop::new(
        config_rx,
        Collaborators {
            market_data: market.clone(),
            advisory,
            gateway,
            clock: clock.clone(),
        },
    );
    if let Some(state) = &args.state {
        engine = engine.with_persistence(StatePersistence::new(state));
    }
    let restored = engine.restore_state();

    for spec in &args.open {
        let price = market
            .mark_price(&spec.symbol)
            .with_context(|| format!("{} has no bar at {first}", spec.symbol))?;
        engine
            .store()
            .upsert(Position::open(
                spec.symbol.clone(),
                spec.side,
                price,
                spec.size,
                spec.leverage,
                first,
            ))
            .with_context(|| format!("Cannot open {} {}", spec.side, spec.symbol))?;
    }

    tracing::info!(
        bars = timestamps.len(),
        restored,
        opened = args.open.len(),
        "Starting replay"
    );

    let mut events = engine.subscribe();
    let mut summary = ReplaySummary::default();

    for ts in timestamps {
        clock.set(ts);
        let report = engine.tick().await;
        summary.ticks += 1;
        for outcome in &report.outcomes {
            if matches!(
                outcome.status,
                OutcomeStatus::Rejected { .. } | OutcomeStatus::Inconsistent { .. }
            ) {
                println!("{ts}  {:<6} {} -> {}", outcome.symbol, outcome.decision, outcome.status);
            }
        }
        drain_events(&mut events, &mut summary);
    }

    print_summary(&engine, &market, &summary);
    Ok(())
}

fn drain_events(events: &mut broadcast::Receiver<EngineEvent>, summary: &mut ReplaySummary) {
    loop {
        match events.try_recv() {
            Ok(EngineEvent::PositionOpened { position, .. }) => {
                summary.opened += 1;
                println!(
                    "{}  OPEN   {:<6} {:<5} size={} entry={} lev={}x",
                    position.entry_time,
                    position.symbol,
                    position.side,
                    position.size,
                    position.entry_price,
                    position.leverage
                );
            }
            Ok(EngineEvent::PositionClosed {
                symbol,
                side,
                reason,
                exit_price,
                realized_pnl,
                timestamp,
                ..
            }) => {
                summary.closed += 1;
                summary.realized_pnl += realized_pnl;
                println!(
                    "{timestamp}  CLOSE  {symbol:<6} {side:<5} exit={exit_price} pnl={realized_pnl} reason={reason}"
                );
            }
            Ok(EngineEvent::ExecutionFailed { .. } | EngineEvent::SymbolHalted { .. }) => {
                summary.failures += 1;
            }
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Replay output lagged behind engine events");
            }
            Err(_) => break,
        }
    }
}

fn print_summary(engine: &EngineLoop, market: &ReplayMarketData, summary: &ReplaySummary) {
    println!();
    println!("=== Replay summary ===");
    println!("ticks:         {}", summary.ticks);
    println!("opened:        {}", summary.opened);
    println!("closed:        {}", summary.closed);
    println!("failures:      {}", summary.failures);
    println!("realized pnl:  {}", summary.realized_pnl.round_dp(4));

    let open = engine.store().list_open();
    if open.is_empty() {
        println!("open positions: none");
    } else {
        println!("open positions:");
        for position in open {
            let mark = market.mark_price(&position.symbol).unwrap_or(position.entry_price);
            println!(
                "  {:<6} {:<5} size={} entry={} mark={} pnl={}%",
                position.symbol,
                position.side,
                position.size,
                position.entry_price,
                mark,
                position.unrealized_pnl_pct(mark).round_dp(2)
            );
        }
    }

    let halted = engine.halted_symbols();
    if !halted.is_empty() {
        println!("halted: {}", halted.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_spec() {
        let spec: OpenSpec = "sol:long:10:50".parse().unwrap();
        assert_eq!(
            spec,
            OpenSpec {
                symbol: "SOL".into(),
                side: Side::Long,
                size: Decimal::from(10),
                leverage: 50,
            }
        );
        assert_eq!("ETH:short:0.5:5".parse::<OpenSpec>().unwrap().side, Side::Short);
    }

    #[test]
    fn rejects_malformed_open_spec() {
        assert!("SOL:long:10".parse::<OpenSpec>().is_err());
        assert!("SOL:up:10:5".parse::<OpenSpec>().is_err());
        assert!("SOL:long:-1:5".parse::<OpenSpec>().is_err());
        assert!("SOL:long:1:0".parse::<OpenSpec>().is_err());
    }
}
