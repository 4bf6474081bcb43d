//! Structured JSON logging to the per-profile log file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{DaemonError, DaemonResult};

/// Directives used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "tripwired=info,tripwire_exec=info,tripwire_connectors=info,tripwire_store=info,tripwire::event=info";

/// Install the global subscriber: one JSON object per line, appended to
/// `path`. Failure to open the file is fatal to startup.
pub fn init(path: &Path) -> DaemonResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| log_error(path, e))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| log_error(path, e))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| DaemonError::Logging {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn log_error(path: &Path, e: std::io::Error) -> DaemonError {
    DaemonError::Logging {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
