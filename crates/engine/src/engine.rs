//! Periodic scheduler driving evaluation and execution.
//!
//! One tick:
//! 1. read the latest config and take a consistent snapshot of held positions
//! 2. fetch market snapshots for held and watch-list symbols concurrently
//! 3. rank the watch-list
//! 4. per held symbol, under that symbol's lock: update the trailing stop,
//!    evaluate the exit chain, otherwise consider rotation, then execute
//! 5. persist state if the store changed

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use rotator_core::{
    AdvisorySignal, Clock, CollaboratorError, EngineConfig, EngineEvent, ErrorClass,
    ExecutionError, MarketDataSource, MarketSignalSnapshot, OrderGateway, Position,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::decision::{Decision, DecisionKind};
use crate::evaluator::{ExitConditionEvaluator, ExitContext};
use crate::executor::ActionExecutor;
use crate::rotation::RotationCoordinator;
use crate::scorer::{OpportunityScore, OpportunityScorer};
use crate::state::StatePersistence;
use crate::store::{PositionStore, SymbolLocks};
use crate::trailing::{TrailingStopManager, TrailingUpdate};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub market_data: Arc<dyn MarketDataSource>,
    pub advisory: Arc<dyn AdvisorySignal>,
    pub gateway: Arc<dyn OrderGateway>,
    pub clock: Arc<dyn Clock>,
}

/// What happened to one held symbol during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Held,
    Executed,
    /// Transient failure, retried next tick.
    Skipped { reason: String },
    Rejected { message: String },
    Inconsistent { message: String },
    Halted { reason: String },
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Held => write!(f, "held"),
            Self::Executed => write!(f, "executed"),
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Rejected { message } => write!(f, "rejected ({message})"),
            Self::Inconsistent { message } => write!(f, "inconsistent ({message})"),
            Self::Halted { reason } => write!(f, "halted ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub decision: DecisionKind,
    /// Rotation target, if the decision was a rotation.
    pub target: Option<String>,
    pub status: OutcomeStatus,
}

impl SymbolOutcome {
    fn new(symbol: &str, decision: DecisionKind, status: OutcomeStatus) -> Self {
        Self {
            symbol: symbol.to_string(),
            decision,
            target: None,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub at: DateTime<Utc>,
    /// One entry per symbol held at tick start, ordered by symbol.
    pub outcomes: Vec<SymbolOutcome>,
    pub scores: Vec<OpportunityScore>,
}

impl TickReport {
    #[must_use]
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes.iter().find(|o| o.symbol == symbol)
    }

    #[must_use]
    pub fn executed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Executed)
            .count()
    }
}

/// Per-tick view shared by every symbol task.
struct TickContext<'a> {
    at: DateTime<Utc>,
    snapshots: &'a HashMap<String, Result<MarketSignalSnapshot, CollaboratorError>>,
    scores: &'a [OpportunityScore],
    evaluator: ExitConditionEvaluator,
    trailing: TrailingStopManager,
    rotation: RotationCoordinator,
    /// Symbols rotation may not target: held at tick start plus claimed this tick.
    excluded: Mutex<HashSet<String>>,
}

pub struct EngineLoop {
    config: watch::Receiver<EngineConfig>,
    store: Arc<PositionStore>,
    locks: SymbolLocks,
    market_data: Arc<dyn MarketDataSource>,
    advisory: Arc<dyn AdvisorySignal>,
    clock: Arc<dyn Clock>,
    executor: ActionExecutor,
    events: broadcast::Sender<EngineEvent>,
    halted: Mutex<BTreeMap<String, String>>,
    persistence: Option<StatePersistence>,
    tick_interval: Duration,
    call_timeout: Duration,
    ticks: AtomicU64,
}

impl EngineLoop {
    /// Builds an engine that picks up config changes published on `config`.
    ///
    /// The tick interval, call timeout and idempotency capacity are read once
    /// here. Everything else is re-read at the start of every tick.
    #[must_use]
    pub fn new(config: watch::Receiver<EngineConfig>, collaborators: Collaborators) -> Self {
        let initial = config.borrow().clone();
        let store = Arc::new(PositionStore::new());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let call_timeout = Duration::from_millis(initial.scheduler.call_timeout_ms);

        let executor = ActionExecutor::new(
            collaborators.gateway,
            store.clone(),
            events.clone(),
            call_timeout,
            initial.execution.idempotency_capacity,
        );

        Self {
            config,
            store,
            locks: SymbolLocks::new(),
            market_data: collaborators.market_data,
            advisory: collaborators.advisory,
            clock: collaborators.clock,
            executor,
            events,
            halted: Mutex::new(BTreeMap::new()),
            persistence: initial.scheduler.state_path.as_ref().map(StatePersistence::new),
            tick_interval: Duration::from_secs(initial.scheduler.tick_interval_secs.max(1)),
            call_timeout,
            ticks: AtomicU64::new(0),
        }
    }

    /// Builds an engine with a config that never changes.
    #[must_use]
    pub fn with_static_config(config: EngineConfig, collaborators: Collaborators) -> Self {
        let (_tx, rx) = watch::channel(config);
        Self::new(rx, collaborators)
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: StatePersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Symbols skipped until [`Self::resume_symbol`] is called.
    #[must_use]
    pub fn halted_symbols(&self) -> Vec<String> {
        self.halted.lock().keys().cloned().collect()
    }

    /// Clears the halt on `symbol`. Returns false if it was not halted.
    pub fn resume_symbol(&self, symbol: &str) -> bool {
        let resumed = self.halted.lock().remove(symbol).is_some();
        if resumed {
            info!(symbol = %symbol, "Symbol resumed");
        }
        resumed
    }

    /// Loads persisted positions into the store. Returns how many were restored.
    ///
    /// A symbol recorded more than once is dropped and halted.
    pub fn restore_state(&self) -> usize {
        let Some(persistence) = &self.persistence else {
            return 0;
        };
        let conflicting = self.store.restore(persistence.load());
        for symbol in conflicting {
            error!(
                symbol = %symbol,
                path = %persistence.path().display(),
                "State file holds more than one position for symbol"
            );
            self.halt(&symbol, "duplicate positions in recovered state");
        }
        let restored = self.store.len();
        info!(restored, "Engine state restored");
        restored
    }

    /// Runs ticks on the configured interval until `shutdown` turns true.
    ///
    /// A tick that has started always runs to completion, so executor calls
    /// in flight are never abandoned. No tick starts after shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            call_timeout_ms = u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            "Engine loop started"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    debug!(tick = report.tick, executed = report.executed(), "Tick complete");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(ticks = self.ticks.load(Ordering::Relaxed), "Engine loop stopped");
    }

    /// Runs one evaluation pass over every held position.
    pub async fn tick(&self) -> TickReport {
        let config = self.config.borrow().clone();
        let at = self.clock.now();
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let before = self.store.snapshot();
        let held: Vec<Position> = before.iter().filter(|p| p.is_open()).cloned().collect();

        let mut symbols: BTreeSet<String> = held.iter().map(|p| p.symbol.clone()).collect();
        if config.rotation.enabled {
            symbols.extend(config.rotation.watch_list.iter().cloned());
        }
        let snapshots = self.fetch_snapshots(symbols).await;

        let available: Vec<MarketSignalSnapshot> =
            snapshots.values().filter_map(|s| s.as_ref().ok().cloned()).collect();
        let scores = OpportunityScorer::new(config.scoring.clone()).rank(&available);

        let ctx = TickContext {
            at,
            snapshots: &snapshots,
            scores: &scores,
            evaluator: ExitConditionEvaluator::new(config.exit.clone()),
            trailing: TrailingStopManager::new(config.trailing.clone()),
            rotation: RotationCoordinator::new(config.rotation.clone()),
            excluded: Mutex::new(before.iter().map(|p| p.symbol.clone()).collect()),
        };

        debug!(tick, held = held.len(), scored = scores.len(), "Tick started");

        let outcomes = join_all(held.iter().map(|p| self.process_symbol(&p.symbol, &ctx))).await;

        if self.store.snapshot() != before {
            self.persist();
        }

        TickReport {
            tick,
            at,
            outcomes,
            scores,
        }
    }

    async fn fetch_snapshots(
        &self,
        symbols: BTreeSet<String>,
    ) -> HashMap<String, Result<MarketSignalSnapshot, CollaboratorError>> {
        let fetches = symbols.into_iter().map(|symbol| async move {
            let result = self
                .bounded(self.market_data.get_snapshot(&symbol))
                .await;
            if let Err(e) = &result {
                debug!(symbol = %symbol, error = %e, "Snapshot unavailable");
            }
            (symbol, result)
        });
        join_all(fetches).await.into_iter().collect()
    }

    async fn process_symbol(&self, symbol: &str, ctx: &TickContext<'_>) -> SymbolOutcome {
        if let Some(reason) = self.halted.lock().get(symbol).cloned() {
            return SymbolOutcome::new(symbol, DecisionKind::Hold, OutcomeStatus::Halted { reason });
        }

        let _guard = self.locks.acquire(symbol).await;

        let position = match self.store.get(symbol) {
            Ok(p) if p.is_open() => p,
            _ => {
                debug!(symbol = %symbol, "Position no longer open, skipping");
                return SymbolOutcome::new(
                    symbol,
                    DecisionKind::Hold,
                    OutcomeStatus::Skipped {
                        reason: "position no longer open".to_string(),
                    },
                );
            }
        };

        let snapshot = match ctx.snapshots.get(symbol) {
            Some(Ok(snapshot)) => snapshot,
            Some(Err(e)) => {
                warn!(symbol = %symbol, error = %e, "No market snapshot, skipping this tick");
                return SymbolOutcome::new(
                    symbol,
                    DecisionKind::Hold,
                    OutcomeStatus::Skipped {
                        reason: e.to_string(),
                    },
                );
            }
            None => {
                return SymbolOutcome::new(
                    symbol,
                    DecisionKind::Hold,
                    OutcomeStatus::Skipped {
                        reason: "no market snapshot".to_string(),
                    },
                );
            }
        };

        let position = self.update_trailing(position, snapshot, ctx);

        let confidence = match self.bounded(self.advisory.get_confidence(symbol, snapshot)).await {
            Ok(c) => Some(c.min(100)),
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "Advisory confidence unavailable");
                None
            }
        };

        let exit = ctx.evaluator.evaluate(&ExitContext {
            position: &position,
            snapshot,
            confidence,
            elapsed: self.clock.elapsed_since(position.entry_time),
        });

        let decision = match exit {
            Some(exit) => Decision::Exit(exit),
            None => {
                let mut excluded = ctx.excluded.lock();
                match ctx.rotation.evaluate(&position, ctx.scores, &excluded) {
                    Some(rotation) => {
                        excluded.insert(rotation.to_symbol.clone());
                        Decision::Rotate(rotation)
                    }
                    None => Decision::Hold {
                        symbol: symbol.to_string(),
                    },
                }
            }
        };

        let kind = decision.kind();
        let target = match &decision {
            Decision::Rotate(r) => Some(r.to_symbol.clone()),
            _ => None,
        };

        match &decision {
            Decision::Hold { .. } => {
                debug!(
                    symbol = %symbol,
                    price = %snapshot.price,
                    rsi = snapshot.rsi,
                    ?confidence,
                    pnl_pct = %position.unrealized_pnl_pct(snapshot.price).round_dp(2),
                    "Holding"
                );
                return SymbolOutcome::new(symbol, kind, OutcomeStatus::Held);
            }
            Decision::Exit(d) => {
                info!(symbol = %symbol, decision = %kind, reason = %d.reason, rsi = snapshot.rsi, ?confidence, "Exit rule fired");
            }
            Decision::Rotate(r) => {
                info!(
                    symbol = %symbol,
                    target = %r.to_symbol,
                    held_score = r.held_score,
                    candidate_score = r.candidate_score,
                    margin = ctx.rotation.margin(),
                    "Rotating"
                );
            }
        }

        let status = match self.executor.execute(&decision, ctx.at).await {
            Ok(_) => OutcomeStatus::Executed,
            Err(err) => self.handle_failure(&err),
        };

        SymbolOutcome {
            symbol: symbol.to_string(),
            decision: kind,
            target,
            status,
        }
    }

    /// Feeds the snapshot price to the position's trailing stop and returns
    /// the updated position.
    fn update_trailing(
        &self,
        position: Position,
        snapshot: &MarketSignalSnapshot,
        ctx: &TickContext<'_>,
    ) -> Position {
        let mut update = TrailingUpdate::Inactive;
        let updated = self.store.update(&position.symbol, |p| {
            update = ctx.trailing.update(p, snapshot.price, ctx.at);
        });

        match update {
            TrailingUpdate::Activated { stop_price } => {
                self.emit(EngineEvent::TrailingStopActivated {
                    symbol: position.symbol.clone(),
                    stop_price,
                    timestamp: ctx.at,
                });
            }
            TrailingUpdate::Ratcheted { from, to } => {
                self.emit(EngineEvent::TrailingStopRatcheted {
                    symbol: position.symbol.clone(),
                    from,
                    to,
                    timestamp: ctx.at,
                });
            }
            _ => {}
        }

        updated.unwrap_or(position)
    }

    fn handle_failure(&self, err: &ExecutionError) -> OutcomeStatus {
        let class = err.class();
        self.emit(EngineEvent::ExecutionFailed {
            symbol: err.symbol().to_string(),
            class: class.to_string(),
            message: err.to_string(),
            timestamp: self.clock.now(),
        });

        match class {
            ErrorClass::Transient => {
                warn!(symbol = %err.symbol(), error = %err, "Transient failure, retrying next tick");
                OutcomeStatus::Skipped {
                    reason: err.to_string(),
                }
            }
            ErrorClass::Rejected => {
                warn!(symbol = %err.symbol(), error = %err, "Decision rejected, position unchanged");
                OutcomeStatus::Rejected {
                    message: err.to_string(),
                }
            }
            ErrorClass::Inconsistent => OutcomeStatus::Inconsistent {
                message: err.to_string(),
            },
            ErrorClass::InvariantViolation => {
                error!(symbol = %err.symbol(), error = %err, "Invariant violated, halting symbol");
                self.halt(err.symbol(), &err.to_string());
                OutcomeStatus::Halted {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn halt(&self, symbol: &str, reason: &str) {
        self.halted
            .lock()
            .insert(symbol.to_string(), reason.to_string());
        self.emit(EngineEvent::SymbolHalted {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
            timestamp: self.clock.now(),
        });
    }

    fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.save(&self.store.snapshot()) {
            warn!(path = %persistence.path().display(), error = %e, "Failed to save engine state");
        }
    }

    /// Bounds one collaborator call by the per-call timeout.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(
                u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}
