use async_trait::async_trait;
use parking_lot::Mutex;
use rotator_core::{
    Clock, GatewayError, OrderConfirmation, OrderGateway, OrderRequest, OrderSide,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::market_data::MarkPriceSource;

/// Simulated order gateway.
///
/// Fills every market order immediately, at the mark price when a
/// [`MarkPriceSource`] is attached and at the order's reference price
/// otherwise, with slippage applied against the taker.
///
/// # Safety
///
/// This gateway makes **zero** network calls. It cannot place real orders.
pub struct PaperOrderGateway {
    slippage_bps: Decimal,
    max_leverage: u32,
    clock: Arc<dyn Clock>,
    marks: Option<Arc<dyn MarkPriceSource>>,
    leverage: Mutex<HashMap<String, u32>>,
    fills: Mutex<Vec<OrderConfirmation>>,
    scripted_failures: Mutex<VecDeque<GatewayError>>,
}

impl PaperOrderGateway {
    /// # Arguments
    ///
    /// * `slippage_bps` - Slippage in basis points (e.g. 5 = 0.05%)
    #[must_use]
    pub fn new(slippage_bps: Decimal, clock: Arc<dyn Clock>) -> Self {
        Self {
            slippage_bps,
            max_leverage: 100,
            clock,
            marks: None,
            leverage: Mutex::new(HashMap::new()),
            fills: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn with_mark_prices(mut self, marks: Arc<dyn MarkPriceSource>) -> Self {
        self.marks = Some(marks);
        self
    }

    #[must_use]
    pub fn with_max_leverage(mut self, max_leverage: u32) -> Self {
        self.max_leverage = max_leverage.max(1);
        self
    }

    /// Makes the next order submission fail with `err`. Failures queue up and
    /// are consumed one per submission.
    pub fn fail_next(&self, err: GatewayError) {
        self.scripted_failures.lock().push_back(err);
    }

    #[must_use]
    pub fn leverage_for(&self, symbol: &str) -> Option<u32> {
        self.leverage.lock().get(symbol).copied()
    }

    #[must_use]
    pub fn fills(&self) -> Vec<OrderConfirmation> {
        self.fills.lock().clone()
    }

    fn apply_slippage(&self, price: Decimal, side: OrderSide) -> Decimal {
        let slippage = price * self.slippage_bps / Decimal::from(10_000);
        match side {
            OrderSide::Buy => price + slippage,
            OrderSide::Sell => price - slippage,
        }
    }
}

#[async_trait]
impl OrderGateway for PaperOrderGateway {
    async fn submit_market_order(
        &self,
        order: &OrderRequest,
    ) -> Result<OrderConfirmation, GatewayError> {
        if let Some(err) = self.scripted_failures.lock().pop_front() {
            tracing::debug!(symbol = %order.symbol, error = %err, "Scripted paper failure");
            return Err(err);
        }
        if order.size <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!(
                "{}: order size must be positive, got {}",
                order.symbol, order.size
            )));
        }

        let base = self
            .marks
            .as_ref()
            .and_then(|m| m.mark_price(&order.symbol))
            .unwrap_or(order.reference_price);
        if base <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!("{}: no price to fill at", order.symbol)));
        }

        let confirmation = OrderConfirmation {
            order_id: uuid::Uuid::new_v4().to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            filled_size: order.size,
            avg_price: Some(self.apply_slippage(base, order.side)),
            timestamp: self.clock.now(),
        };

        tracing::debug!(
            symbol = %confirmation.symbol,
            side = %confirmation.side,
            size = %confirmation.filled_size,
            reduce_only = order.reduce_only,
            "Paper fill"
        );
        self.fills.lock().push(confirmation.clone());
        Ok(confirmation)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        if leverage == 0 || leverage > self.max_leverage {
            return Err(GatewayError::Rejected(format!(
                "{symbol}: leverage {leverage} outside 1..={}",
                self.max_leverage
            )));
        }
        self.leverage.lock().insert(symbol.to_string(), leverage);
        Ok(())
    }
}
