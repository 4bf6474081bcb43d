//! Tripwire Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes a snapshot (and the previous one) and returns decisions: which
//! rules match, whether a gate blocks them, whether an order is safe.

#![warn(clippy::all)]

pub mod evaluator;
pub mod gate;
pub mod safety;

pub use evaluator::{evaluate, evaluate_condition, test_rule, RuleMatch, EPSILON};
pub use gate::{GateDecision, TriggerGate};
pub use safety::{validate_daily_loss, validate_order, SafetyViolation};
