//! Tripwire Daemon
//!
//! Runs the signal engine for one profile in the foreground. Logs go to
//! `<state_dir>/<profile>/daemon.log` as JSON lines.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p tripwired
//!
//! # Paper profile, evaluate only
//! TRIPWIRE_PROFILE=paper TRIPWIRE_DRY_RUN=true cargo run -p tripwired
//! ```
//!
//! # Environment Variables
//!
//! - `TRIPWIRE_PROFILE`: Profile name (default: default)
//! - `TRIPWIRE_STATE_DIR`: State root (default: $HOME/.tripwire)
//! - `TRIPWIRE_STREAM_URL` / `TRIPWIRE_STREAM_TOKEN`: Telemetry stream
//! - `TRIPWIRE_COLLECTOR_URL`: Event collector (optional)
//! - `TRIPWIRE_BROKER_ENDPOINT` / `TRIPWIRE_ALLOWED_ENDPOINT`: Broker target and allow-list
//! - `TRIPWIRE_DRY_RUN`: Evaluate and log only
//! - `TRIPWIRE_MAX_ORDER_QTY`, `TRIPWIRE_MAX_ORDER_VALUE`, `TRIPWIRE_DAILY_LOSS_LIMIT`: Safety ceiling
//! - `TRIPWIRE_MAX_TRIGGERS_PER_RULE_PER_HOUR`, `TRIPWIRE_MAX_ORDERS_PER_SESSION`: Rate caps
//! - `TRIPWIRE_API_HOST` / `TRIPWIRE_API_PORT`: Status API (default: 127.0.0.1:8787)
//! - `TRIPWIRE_HEALTH_TARGETS`: Comma separated upstream health URLs
//! - `TRIPWIRE_REQUIRE_CONFIRMATION`: Log orders as needing out-of-band confirmation
//! - `TRIPWIRE_DAEMON_BIN`: Executable for background starts (default: `tripwired` next to the caller)

use tripwired::{control, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Log file, instance marker, then the run loop
    control::start_foreground(config).await?;

    Ok(())
}
