//! Tripwire Storage Layer
//!
//! File-backed persistence for rule documents and the position filter.
//! Every profile owns one directory:
//!
//! ```text
//! <state_dir>/<profile>/
//!   rules/<rule_id>.json
//!   filter.json
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod filters;
pub mod rules;

pub use error::{StoreError, StoreResult};
pub use filters::FilterStore;
pub use rules::{FileRuleStore, LoadReport, RejectedRule, RuleRepository};
