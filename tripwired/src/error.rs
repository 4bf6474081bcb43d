//! Daemon error types.

use std::path::PathBuf;

use thiserror::Error;
use tripwire_connectors::CollectorError;
use tripwire_store::StoreError;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Collector error
    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),

    /// Another live instance owns the profile
    #[error("Daemon already running for profile '{profile}' (pid {pid})")]
    AlreadyRunning { profile: String, pid: u32 },

    /// No live instance for the profile
    #[error("Daemon not running for profile '{0}'")]
    NotRunning(String),

    /// Instance marker could not be read or written
    #[error("Instance marker error at {path}: {reason}")]
    Lifecycle { path: PathBuf, reason: String },

    /// Log file could not be opened
    #[error("Failed to open log file {path}: {reason}")]
    Logging { path: PathBuf, reason: String },

    /// Rule not found in the profile's rule directory
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    /// Status API unreachable or answered badly
    #[error("Status API error: {0}")]
    Api(String),

    /// Collector URL not configured
    #[error("Collector not configured (set TRIPWIRE_COLLECTOR_URL)")]
    CollectorNotConfigured,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
