use crate::error::{CollaboratorError, GatewayError};
use crate::events::{MarketSignalSnapshot, OrderConfirmation, OrderRequest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_snapshot(&self, symbol: &str) -> Result<MarketSignalSnapshot, CollaboratorError>;
}

/// External decision-advisory service. The returned confidence (0-100) is opaque
/// to the engine.
#[async_trait]
pub trait AdvisorySignal: Send + Sync {
    async fn get_confidence(
        &self,
        symbol: &str,
        snapshot: &MarketSignalSnapshot,
    ) -> Result<u8, CollaboratorError>;
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_market_order(
        &self,
        order: &OrderRequest,
    ) -> Result<OrderConfirmation, GatewayError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        self.now() - start
    }
}
