//! Tripwire Connectors
//!
//! Adapters for the services around the daemon:
//! - Telemetry stream (WebSocket, reconnecting)
//! - Event collector (REST)
//! - Upstream health probes

#![warn(clippy::all)]

// Public modules
pub mod collector;
pub mod frames;
pub mod health;
pub mod stream;

// Re-exports
pub use collector::{CollectorClient, CollectorError, RuleSyncResponse, DEFAULT_HISTORY_LIMIT};
pub use frames::{parse_frame, FrameError, InboundFrame};
pub use health::{probe_all, ProbeResult};
pub use stream::{Backoff, FrameHandler, StreamClient, StreamError, INITIAL_BACKOFF, MAX_BACKOFF};
