//! Tripwire Execution Layer
//!
//! Owns the mutable trigger state and turns engine decisions into broker
//! orders, once.
//!
//! # Architecture
//!
//! ```text
//! Snapshot / PositionEvent → SignalEngine → Safety → Journal → Broker
//!                                  ↓
//!                              EventSink
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the broker, the credential vault and event output
//! - **Order Journal**: Refuses a second submission of the same client order id
//! - **Endpoint Guard**: Allow-listed broker endpoint check
//! - **SignalEngine**: Rule trigger path and copy-trade path behind one lock
//! - **Stub**: In-memory broker for development
//!
//! # Example
//!
//! ```rust,ignore
//! use tripwire_exec::{EndpointGuard, EngineConfig, RecordingSink, SignalEngine, StubBroker};
//! use std::sync::Arc;
//!
//! let engine = SignalEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(StubBroker::new()),
//!     Arc::new(RecordingSink::new()),
//!     EndpointGuard::new("sandbox"),
//! );
//! engine.set_rules(rules).await;
//! let events = engine.evaluate(snapshot).await;
//! ```

#![warn(clippy::all)]

pub mod copy_trade;
pub mod engine;
pub mod error;
pub mod guard;
pub mod journal;
pub mod ports;
pub mod sink;
pub mod stub;

// Re-exports for convenience
pub use engine::{EngineConfig, EngineStatus, SignalEngine, TrackedPosition};
pub use error::{ExecError, ExecResult};
pub use guard::EndpointGuard;
pub use journal::{JournalEntry, OrderJournal, SubmissionStatus};
pub use ports::{
    aggregate_unrealized_pl, BrokerPort, BrokerPosition, CredentialSource, OrderResult,
    OrderUpdate, StaticCredentials,
};
pub use sink::{EventSink, RecordingSink};
pub use stub::{StubBroker, STUB_ENDPOINT};
