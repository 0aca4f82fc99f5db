//! The only component allowed to talk to the order gateway.
//!
//! Each decision instance is executed at most once: outcomes are cached by
//! [`DecisionKey`] and a retried call returns the cached confirmation without
//! submitting again. Flips and rotations run as two ordered legs. The close
//! leg must fill before the open leg is attempted, and a failed close rolls
//! the position back to `Open`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rotator_core::{
    CloseReason, EngineEvent, ExecutionError, GatewayError, OrderConfirmation, OrderGateway,
    OrderRequest, Position, PositionStatus, Side,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::decision::{Decision, DecisionKey, ExitAction};
use crate::store::PositionStore;

/// Result of one executed decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub key: DecisionKey,
    /// Fill of the closing order. `None` only for a hold.
    pub close: Option<OrderConfirmation>,
    /// Fill of the opening order on flip and rotate.
    pub open: Option<OrderConfirmation>,
    /// Position opened by the second leg.
    pub opened: Option<Position>,
    pub realized_pnl: Decimal,
}

impl Confirmation {
    fn hold(key: DecisionKey) -> Self {
        Self {
            key,
            close: None,
            open: None,
            opened: None,
            realized_pnl: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Completed(Confirmation),
    /// Terminal: the open leg is never retried for the same decision.
    Inconsistent(ExecutionError),
}

/// Bounded FIFO of decision outcomes plus the set of decisions in flight.
#[derive(Debug)]
struct OutcomeCache {
    capacity: usize,
    outcomes: HashMap<DecisionKey, Outcome>,
    order: VecDeque<DecisionKey>,
    in_flight: HashSet<DecisionKey>,
}

impl OutcomeCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            outcomes: HashMap::new(),
            order: VecDeque::new(),
            in_flight: HashSet::new(),
        }
    }

    fn record(&mut self, key: DecisionKey, outcome: Outcome) {
        if self.outcomes.insert(key.clone(), outcome).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.outcomes.remove(&evicted);
            }
        }
    }
}

/// One order leg: what to send and where it came from.
struct Leg<'a> {
    symbol: &'a str,
    side: Side,
    size: Decimal,
    leverage: u32,
    reference_price: Decimal,
}

pub struct ActionExecutor {
    gateway: Arc<dyn OrderGateway>,
    store: Arc<PositionStore>,
    events: broadcast::Sender<EngineEvent>,
    call_timeout: Duration,
    cache: Mutex<OutcomeCache>,
}

impl ActionExecutor {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        store: Arc<PositionStore>,
        events: broadcast::Sender<EngineEvent>,
        call_timeout: Duration,
        idempotency_capacity: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            events,
            call_timeout,
            cache: Mutex::new(OutcomeCache::new(idempotency_capacity)),
        }
    }

    /// Executes `decision`, identified by the tick it was made in.
    ///
    /// Calling again with the same decision identity returns the cached
    /// confirmation (or the cached `Inconsistent` error) without touching the
    /// gateway. Transient and rejected failures are not cached: the decision
    /// had no effect and a later call may try again.
    ///
    /// # Errors
    ///
    /// See [`ExecutionError`]; use [`ExecutionError::class`] to decide how to react.
    pub async fn execute(
        &self,
        decision: &Decision,
        tick_at: DateTime<Utc>,
    ) -> Result<Confirmation, ExecutionError> {
        let key = DecisionKey::new(decision, tick_at);
        if matches!(decision, Decision::Hold { .. }) {
            return Ok(Confirmation::hold(key));
        }

        {
            let mut cache = self.cache.lock();
            match cache.outcomes.get(&key) {
                Some(Outcome::Completed(confirmation)) => {
                    info!(decision = %key, "Decision already executed, returning cached confirmation");
                    return Ok(confirmation.clone());
                }
                Some(Outcome::Inconsistent(err)) => return Err(err.clone()),
                None => {}
            }
            if !cache.in_flight.insert(key.clone()) {
                return Err(ExecutionError::InFlight {
                    symbol: key.symbol.clone(),
                });
            }
        }

        let result = self.perform(decision, &key).await;

        let mut cache = self.cache.lock();
        cache.in_flight.remove(&key);
        match &result {
            Ok(confirmation) => cache.record(key, Outcome::Completed(confirmation.clone())),
            Err(err @ ExecutionError::Inconsistent { .. }) => {
                cache.record(key, Outcome::Inconsistent(err.clone()));
            }
            Err(_) => {}
        }
        result
    }

    async fn perform(
        &self,
        decision: &Decision,
        key: &DecisionKey,
    ) -> Result<Confirmation, ExecutionError> {
        let (symbol, side, reason, price) = match decision {
            Decision::Hold { .. } => return Ok(Confirmation::hold(key.clone())),
            Decision::Exit(d) => (d.symbol.as_str(), d.side, d.reason, d.price),
            Decision::Rotate(d) => (
                d.from_symbol.as_str(),
                d.from_side,
                CloseReason::Rotation,
                d.from_price,
            ),
        };

        let position = self.store.get(symbol)?;
        if position.status == PositionStatus::Closing {
            return Err(ExecutionError::InFlight {
                symbol: symbol.to_string(),
            });
        }
        if !position.is_open() || position.side != side {
            return Err(ExecutionError::NotFound {
                symbol: symbol.to_string(),
            });
        }

        if let Decision::Rotate(d) = decision {
            if self.store.contains(&d.to_symbol) {
                return Err(ExecutionError::Rejected {
                    symbol: symbol.to_string(),
                    message: format!("rotation target {} is already held", d.to_symbol),
                });
            }
            if d.to_price <= Decimal::ZERO {
                return Err(ExecutionError::Rejected {
                    symbol: symbol.to_string(),
                    message: format!("no usable price for rotation target {}", d.to_symbol),
                });
            }
        }

        let close = self.close_leg(&position, reason, price).await?;
        let exit_price = close.avg_price.unwrap_or(price);
        let realized_pnl = position.pnl_at(exit_price);

        let next = match decision {
            Decision::Exit(d) => match d.action {
                ExitAction::Exit => None,
                ExitAction::Flip { to } => Some(Leg {
                    symbol,
                    side: to,
                    size: position.size,
                    leverage: position.leverage,
                    reference_price: exit_price,
                }),
            },
            Decision::Rotate(d) => Some(Leg {
                symbol: &d.to_symbol,
                side: d.to_side,
                size: (position.size * exit_price / d.to_price).round_dp(8),
                leverage: position.leverage,
                reference_price: d.to_price,
            }),
            Decision::Hold { .. } => None,
        };

        let Some(leg) = next else {
            return Ok(Confirmation {
                key: key.clone(),
                close: Some(close),
                open: None,
                opened: None,
                realized_pnl,
            });
        };

        match self.open_leg(&leg).await {
            Ok((open, opened)) => Ok(Confirmation {
                key: key.clone(),
                close: Some(close),
                open: Some(open),
                opened: Some(opened),
                realized_pnl,
            }),
            Err(OpenLegError::Store(err)) => {
                error!(
                    symbol = %leg.symbol,
                    error = %err,
                    "Open leg filled but store refused the position"
                );
                Err(err.into())
            }
            Err(OpenLegError::Gateway(err)) => {
                let err = ExecutionError::Inconsistent {
                    symbol: symbol.to_string(),
                    target: leg.symbol.to_string(),
                    close_order_id: close.order_id.clone(),
                    message: err.to_string(),
                };
                error!(
                    symbol = %symbol,
                    target = %leg.symbol,
                    decision = %key,
                    error = %err,
                    "Close leg filled but open leg failed, position recorded closed"
                );
                Err(err)
            }
        }
    }

    /// Marks the position closing, submits the reduce-only order and removes
    /// the position once filled. Restores `Open` if the order fails.
    async fn close_leg(
        &self,
        position: &Position,
        reason: CloseReason,
        price: Decimal,
    ) -> Result<OrderConfirmation, ExecutionError> {
        let symbol = position.symbol.as_str();
        self.store.set_status(symbol, PositionStatus::Closing)?;

        let request = OrderRequest {
            symbol: symbol.to_string(),
            side: position.side.exit_order_side(),
            size: position.size,
            leverage: position.leverage,
            reduce_only: true,
            reference_price: price,
        };

        let confirmation = match self.call(self.gateway.submit_market_order(&request)).await {
            Ok(confirmation) => confirmation,
            Err(err) => {
                if let Err(restore) = self.store.set_status(symbol, PositionStatus::Open) {
                    warn!(symbol = %symbol, error = %restore, "Could not restore position after failed close");
                }
                let err = ExecutionError::from_gateway(symbol, &err);
                warn!(symbol = %symbol, %reason, error = %err, "Close order failed, still holding");
                return Err(err);
            }
        };

        self.store.remove(symbol)?;
        let exit_price = confirmation.avg_price.unwrap_or(price);
        let realized_pnl = position.pnl_at(exit_price);
        info!(
            symbol = %symbol,
            side = %position.side,
            %reason,
            %exit_price,
            %realized_pnl,
            order_id = %confirmation.order_id,
            "Position closed"
        );
        self.emit(EngineEvent::PositionClosed {
            symbol: symbol.to_string(),
            side: position.side,
            reason,
            exit_price,
            realized_pnl,
            order_id: confirmation.order_id.clone(),
            timestamp: confirmation.timestamp,
        });

        Ok(confirmation)
    }

    async fn open_leg(&self, leg: &Leg<'_>) -> Result<(OrderConfirmation, Position), OpenLegError> {
        self.call(self.gateway.set_leverage(leg.symbol, leg.leverage))
            .await
            .map_err(OpenLegError::Gateway)?;

        let request = OrderRequest {
            symbol: leg.symbol.to_string(),
            side: leg.side.entry_order_side(),
            size: leg.size,
            leverage: leg.leverage,
            reduce_only: false,
            reference_price: leg.reference_price,
        };
        let confirmation = self
            .call(self.gateway.submit_market_order(&request))
            .await
            .map_err(OpenLegError::Gateway)?;

        let size = if confirmation.filled_size > Decimal::ZERO {
            confirmation.filled_size
        } else {
            leg.size
        };
        let position = Position::open(
            leg.symbol,
            leg.side,
            confirmation.avg_price.unwrap_or(leg.reference_price),
            size,
            leg.leverage,
            confirmation.timestamp,
        );
        self.store
            .upsert(position.clone())
            .map_err(OpenLegError::Store)?;

        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry_price = %position.entry_price,
            size = %position.size,
            leverage = position.leverage,
            order_id = %confirmation.order_id,
            "Position opened"
        );
        self.emit(EngineEvent::PositionOpened {
            position: position.clone(),
            order_id: confirmation.order_id.clone(),
        });

        Ok((confirmation, position))
    }

    /// Bounds one gateway call by the per-call timeout.
    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(
                u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    fn emit(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

enum OpenLegError {
    Gateway(GatewayError),
    Store(rotator_core::StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{ExitDecision, RotationDecision};
    use async_trait::async_trait;
    use rotator_core::OrderSide;
    use rust_decimal_macros::dec;

    /// Gateway that fills everything at the reference price unless told otherwise.
    #[derive(Default)]
    struct ScriptedGateway {
        orders: Mutex<Vec<OrderRequest>>,
        leverage_calls: Mutex<Vec<(String, u32)>>,
        fail_close: Mutex<Option<GatewayError>>,
        fail_open: Mutex<Option<GatewayError>>,
    }

    #[async_trait]
    impl OrderGateway for ScriptedGateway {
        async fn submit_market_order(
            &self,
            order: &OrderRequest,
        ) -> Result<OrderConfirmation, GatewayError> {
            let scripted = if order.reduce_only {
                self.fail_close.lock().clone()
            } else {
                self.fail_open.lock().clone()
            };
            if let Some(err) = scripted {
                return Err(err);
            }
            let mut orders = self.orders.lock();
            orders.push(order.clone());
            Ok(OrderConfirmation {
                order_id: format!("ord-{}", orders.len()),
                symbol: order.symbol.clone(),
                side: order.side,
                filled_size: order.size,
                avg_price: Some(order.reference_price),
                timestamp: Utc::now(),
            })
        }

        async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
            self.leverage_calls.lock().push((symbol.to_string(), leverage));
            Ok(())
        }
    }

    fn setup(gateway: Arc<ScriptedGateway>) -> (ActionExecutor, Arc<PositionStore>, broadcast::Receiver<EngineEvent>) {
        let store = Arc::new(PositionStore::new());
        let (tx, rx) = broadcast::channel(64);
        let executor = ActionExecutor::new(gateway, store.clone(), tx, Duration::from_secs(1), 16);
        (executor, store, rx)
    }

    fn flip_sol(price: Decimal) -> Decision {
        Decision::Exit(ExitDecision {
            symbol: "SOL".into(),
            side: Side::Long,
            action: ExitAction::Flip { to: Side::Short },
            reason: CloseReason::RsiFlip,
            price,
        })
    }

    fn sol_long() -> Position {
        Position::open("SOL", Side::Long, dec!(150), dec!(2), 50, Utc::now())
    }

    #[tokio::test]
    async fn flip_closes_before_opening_opposite_side() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (executor, store, mut events) = setup(gateway.clone());
        store.upsert(sol_long()).unwrap();

        let confirmation = executor.execute(&flip_sol(dec!(160)), Utc::now()).await.unwrap();

        let orders = gateway.orders.lock().clone();
        assert_eq!(orders.len(), 2);
        assert!(orders[0].reduce_only);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert!(!orders[1].reduce_only);
        assert_eq!(orders[1].side, OrderSide::Sell);

        let held = store.get("SOL").unwrap();
        assert_eq!(held.side, Side::Short);
        assert_eq!(held.entry_price, dec!(160));
        assert_eq!(held.leverage, 50);
        assert_eq!(confirmation.realized_pnl, dec!(20));
        assert_eq!(gateway.leverage_calls.lock().clone(), vec![("SOL".to_string(), 50)]);

        assert!(matches!(events.try_recv().unwrap(), EngineEvent::PositionClosed { reason: CloseReason::RsiFlip, .. }));
        assert!(matches!(events.try_recv().unwrap(), EngineEvent::PositionOpened { .. }));
    }

    #[tokio::test]
    async fn same_decision_submits_once() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (executor, store, _events) = setup(gateway.clone());
        store.upsert(sol_long()).unwrap();

        let tick_at = Utc::now();
        let decision = Decision::Exit(ExitDecision {
            symbol: "SOL".into(),
            side: Side::Long,
            action: ExitAction::Exit,
            reason: CloseReason::Timeout,
            price: dec!(151),
        });

        let first = executor.execute(&decision, tick_at).await.unwrap();
        let second = executor.execute(&decision, tick_at).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.orders.lock().len(), 1);
        assert!(!store.contains("SOL"));
    }

    #[tokio::test]
    async fn failed_close_rolls_back_without_opening() {
        let gateway = Arc::new(ScriptedGateway::default());
        *gateway.fail_close.lock() = Some(GatewayError::InsufficientBalance("margin".into()));
        let (executor, store, _events) = setup(gateway.clone());
        store.upsert(sol_long()).unwrap();

        let err = executor.execute(&flip_sol(dec!(160)), Utc::now()).await.unwrap_err();

        assert_eq!(err.class(), rotator_core::ErrorClass::Rejected);
        let held = store.get("SOL").unwrap();
        assert_eq!(held.side, Side::Long);
        assert_eq!(held.status, PositionStatus::Open);
        assert!(gateway.orders.lock().is_empty());
        assert!(gateway.leverage_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_open_is_inconsistent_and_cached() {
        let gateway = Arc::new(ScriptedGateway::default());
        *gateway.fail_open.lock() = Some(GatewayError::Rejected("size too small".into()));
        let (executor, store, _events) = setup(gateway.clone());
        store.upsert(sol_long()).unwrap();

        let tick_at = Utc::now();
        let err = executor.execute(&flip_sol(dec!(160)), tick_at).await.unwrap_err();
        assert_eq!(err.class(), rotator_core::ErrorClass::Inconsistent);
        assert!(!store.contains("SOL"));

        // retrying the same decision must not resubmit the open leg
        *gateway.fail_open.lock() = None;
        let again = executor.execute(&flip_sol(dec!(160)), tick_at).await.unwrap_err();
        assert_eq!(again, err);
        assert_eq!(gateway.orders.lock().len(), 1);
    }

    #[tokio::test]
    async fn rotation_redeploys_closed_notional() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (executor, store, _events) = setup(gateway.clone());
        store
            .upsert(Position::open("BTC", Side::Long, dec!(60000), dec!(0.1), 20, Utc::now()))
            .unwrap();

        let decision = Decision::Rotate(RotationDecision {
            from_symbol: "BTC".into(),
            from_side: Side::Long,
            from_price: dec!(60000),
            to_symbol: "ETH".into(),
            to_side: Side::Short,
            to_price: dec!(3000),
            held_score: 30.0,
            candidate_score: 85.0,
        });
        let confirmation = executor.execute(&decision, Utc::now()).await.unwrap();

        assert!(!store.contains("BTC"));
        let eth = store.get("ETH").unwrap();
        assert_eq!(eth.side, Side::Short);
        assert_eq!(eth.size, dec!(2));
        assert_eq!(eth.leverage, 20);
        assert_eq!(confirmation.opened, Some(eth));
    }

    #[tokio::test]
    async fn rotation_into_held_symbol_is_refused_before_closing() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (executor, store, _events) = setup(gateway.clone());
        store
            .upsert(Position::open("BTC", Side::Long, dec!(60000), dec!(0.1), 20, Utc::now()))
            .unwrap();
        store
            .upsert(Position::open("ETH", Side::Long, dec!(3000), dec!(1), 10, Utc::now()))
            .unwrap();

        let decision = Decision::Rotate(RotationDecision {
            from_symbol: "BTC".into(),
            from_side: Side::Long,
            from_price: dec!(60000),
            to_symbol: "ETH".into(),
            to_side: Side::Short,
            to_price: dec!(3000),
            held_score: 30.0,
            candidate_score: 85.0,
        });
        let err = executor.execute(&decision, Utc::now()).await.unwrap_err();

        assert_eq!(err.class(), rotator_core::ErrorClass::Rejected);
        assert!(store.get("BTC").unwrap().is_open());
        assert!(gateway.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_position_is_not_found() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (executor, _store, _events) = setup(gateway.clone());

        let err = executor.execute(&flip_sol(dec!(160)), Utc::now()).await.unwrap_err();
        assert_eq!(err, ExecutionError::NotFound { symbol: "SOL".into() });
        assert!(gateway.orders.lock().is_empty());
    }

    #[test]
    fn outcome_cache_is_bounded() {
        let mut cache = OutcomeCache::new(2);
        let base = Utc::now();
        for i in 0..3 {
            let key = DecisionKey {
                symbol: "SOL".into(),
                kind: crate::decision::DecisionKind::Exit,
                tick_at: base + chrono::Duration::seconds(i),
            };
            cache.record(key.clone(), Outcome::Completed(Confirmation::hold(key)));
        }
        assert_eq!(cache.outcomes.len(), 2);
        assert_eq!(cache.order.front().unwrap().tick_at, base + chrono::Duration::seconds(1));
    }
}
