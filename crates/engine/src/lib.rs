//! Exit, flip and capital-rotation engine for leveraged positions.
//!
//! [`EngineLoop`] drives everything: per tick it pulls market snapshots,
//! ratchets trailing stops, runs the exit rule chain, considers rotation and
//! hands the resulting decision to the [`ActionExecutor`].

pub mod decision;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod rotation;
pub mod scorer;
pub mod state;
pub mod store;
pub mod trailing;

pub use decision::{Decision, DecisionKey, DecisionKind, ExitAction, ExitDecision, RotationDecision};
pub use engine::{Collaborators, EngineLoop, OutcomeStatus, SymbolOutcome, TickReport};
pub use evaluator::{ExitConditionEvaluator, ExitContext, ExitRule, EXIT_RULES};
pub use executor::{ActionExecutor, Confirmation};
pub use rotation::RotationCoordinator;
pub use scorer::{OpportunityScore, OpportunityScorer};
pub use state::{PersistedState, PersistenceError, StatePersistence};
pub use store::{PositionStore, SymbolLocks};
pub use trailing::{TrailingStopManager, TrailingUpdate};
