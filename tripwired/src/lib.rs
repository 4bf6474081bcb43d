//! Tripwire Daemon Library
//!
//! Runtime for the signal engine.
//!
//! # Architecture
//!
//! ```text
//! Telemetry stream → Daemon → SignalEngine → Broker
//!                                  ↓
//!                             QueueSink → log line + collector
//!                                  ↑
//!                       API Server (status)
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Lifecycle**: One instance per profile (pid marker)
//! - **Outbound**: Bounded event queue and collector delivery
//! - **API**: HTTP status endpoints
//! - **Control**: Start/stop/status, rule and filter management
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use tripwired::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod outbound;

// Re-exports for convenience
pub use api::{HealthResponse, StatusResponse};
pub use config::{ApiConfig, BrokerConfig, Config, StreamConfig};
pub use control::{DaemonStatus, RuleCounts};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use lifecycle::{InstanceHandle, Lifecycle, PidFileLifecycle};
pub use outbound::{QueueSink, EVENT_QUEUE_CAPACITY};
