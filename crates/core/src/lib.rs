pub mod clock;
pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod error;
pub mod events;
pub mod position;
pub mod traits;

pub use clock::{ManualClock, SystemClock};
pub use config::{
    ConfigError, EngineConfig, ExecutionConfig, ExitThresholds, RotationConfig, SchedulerConfig,
    ScoringConfig, TrailingStopConfig,
};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use error::{CollaboratorError, ErrorClass, ExecutionError, GatewayError, StoreError};
pub use events::{
    CloseReason, EngineEvent, MarketSignalSnapshot, OrderConfirmation, OrderRequest,
};
pub use position::{OrderSide, Position, PositionStatus, Side, TrailingStop};
pub use traits::{AdvisorySignal, Clock, MarketDataSource, OrderGateway};
