//! Tripwire Domain Layer
//!
//! Pure domain types with zero I/O dependencies: rule documents,
//! snapshots, position events, filters, orders and event records.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod credentials;
pub mod events;
pub mod order;
pub mod position;
pub mod rule;
pub mod snapshot;
pub mod value_objects;

// Re-export commonly used types
pub use credentials::Credentials;
pub use events::{EventType, TriggerEvent};
pub use order::{OrderRequest, SafetyConfig};
pub use position::{PositionEvent, PositionFilter, TradeStatus};
pub use rule::{
    derive_rule_id, Condition, ConditionGroup, ConditionItem, GroupKind, Operator, OrderParams,
    Rule, MAX_CONDITION_DEPTH, MIN_COOLDOWN_SECS,
};
pub use snapshot::Snapshot;
pub use value_objects::{DomainError, OrderSide, OrderType, RuleStatus, TimeInForce};
