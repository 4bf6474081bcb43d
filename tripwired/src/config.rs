//! Daemon configuration.
//!
//! Loads configuration from environment variables (and an optional `.env`)
//! with sensible defaults. Every profile owns one directory under the
//! state dir:
//!
//! ```text
//! <state_dir>/<profile>/
//!   rules/
//!   filter.json
//!   daemon.pid
//!   daemon.log
//! ```

use crate::error::{DaemonError, DaemonResult};
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tripwire_domain::SafetyConfig;
use tripwire_exec::EngineConfig;

/// File name of the daemon binary.
pub const DAEMON_BIN_NAME: &str = "tripwired";

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Profile name (one daemon per profile)
    pub profile: String,

    /// Root of all profile directories
    pub state_dir: PathBuf,

    /// Status API configuration
    pub api: ApiConfig,

    /// Telemetry stream configuration
    pub stream: StreamConfig,

    /// Broker endpoint and allow-list
    pub broker: BrokerConfig,

    /// Engine configuration
    pub engine: EngineConfig,

    /// Remote event collector base URL
    pub collector_url: Option<String>,

    /// Upstream URLs probed by the health check
    pub health_targets: Vec<String>,

    /// Daemon executable used for background starts
    pub daemon_bin: Option<PathBuf>,
}

/// Status API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Telemetry stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL
    pub url: String,
    /// Handshake token
    pub token: String,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Endpoint the broker adapter talks to
    pub endpoint: String,
    /// Substring every broker endpoint must contain
    pub allowed_endpoint: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let profile = vars.string("TRIPWIRE_PROFILE", "default");
        if profile.is_empty() || !profile.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(DaemonError::Config(format!("Invalid TRIPWIRE_PROFILE: {}", profile)));
        }

        let state_dir = match lookup("TRIPWIRE_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => lookup("HOME")
                .map(|home| PathBuf::from(home).join(".tripwire"))
                .ok_or_else(|| DaemonError::Config("Neither TRIPWIRE_STATE_DIR nor HOME is set".to_string()))?,
        };

        let api = ApiConfig {
            host: vars.string("TRIPWIRE_API_HOST", "127.0.0.1"),
            port: vars.parsed("TRIPWIRE_API_PORT", 8787u16)?,
        };

        let stream = StreamConfig {
            url: vars.string("TRIPWIRE_STREAM_URL", "ws://127.0.0.1:8765/stream"),
            token: vars.string("TRIPWIRE_STREAM_TOKEN", ""),
        };

        let broker = BrokerConfig {
            endpoint: vars.string("TRIPWIRE_BROKER_ENDPOINT", tripwire_exec::STUB_ENDPOINT),
            allowed_endpoint: vars.string("TRIPWIRE_ALLOWED_ENDPOINT", "sandbox"),
        };

        let defaults = SafetyConfig::default();
        let safety = SafetyConfig {
            max_order_qty: vars.decimal("TRIPWIRE_MAX_ORDER_QTY", defaults.max_order_qty)?,
            max_order_value: vars.decimal("TRIPWIRE_MAX_ORDER_VALUE", defaults.max_order_value)?,
            daily_loss_limit: vars.decimal("TRIPWIRE_DAILY_LOSS_LIMIT", defaults.daily_loss_limit)?,
            require_confirmation: vars.bool("TRIPWIRE_REQUIRE_CONFIRMATION", defaults.require_confirmation)?,
        };

        let engine = EngineConfig {
            daemon_id: vars.string("TRIPWIRE_DAEMON_ID", &format!("tripwired-{}", profile)),
            dry_run: vars.bool("TRIPWIRE_DRY_RUN", false)?,
            safety,
            max_triggers_per_rule_per_hour: vars.parsed("TRIPWIRE_MAX_TRIGGERS_PER_RULE_PER_HOUR", 10usize)?,
            max_orders_per_session: vars.parsed("TRIPWIRE_MAX_ORDERS_PER_SESSION", 50usize)?,
        };

        let collector_url = lookup("TRIPWIRE_COLLECTOR_URL").filter(|url| !url.trim().is_empty());

        let health_targets = lookup("TRIPWIRE_HEALTH_TARGETS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let daemon_bin = lookup("TRIPWIRE_DAEMON_BIN")
            .filter(|bin| !bin.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            profile,
            state_dir,
            api,
            stream,
            broker,
            engine,
            collector_url,
            health_targets,
            daemon_bin,
        })
    }

    /// Create test configuration rooted at `state_dir`.
    pub fn test(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile: "test".to_string(),
            state_dir: state_dir.into(),
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            stream: StreamConfig {
                url: "ws://127.0.0.1:1/stream".to_string(),
                token: "test-token".to_string(),
            },
            broker: BrokerConfig {
                endpoint: tripwire_exec::STUB_ENDPOINT.to_string(),
                allowed_endpoint: "sandbox".to_string(),
            },
            engine: EngineConfig {
                daemon_id: "tripwired-test".to_string(),
                ..EngineConfig::default()
            },
            collector_url: None,
            health_targets: Vec::new(),
            daemon_bin: None,
        }
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.state_dir.join(&self.profile)
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.profile_dir().join("rules")
    }

    pub fn filter_path(&self) -> PathBuf {
        self.profile_dir().join("filter.json")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.profile_dir().join("daemon.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.profile_dir().join("daemon.log")
    }

    /// Owner used when deriving missing rule ids.
    pub fn rule_owner(&self) -> &str {
        &self.profile
    }

    /// Base URL of the local status API, as seen by a client.
    pub fn api_base_url(&self) -> String {
        let host = match self.api.host.as_str() {
            "0.0.0.0" => "127.0.0.1",
            host => host,
        };
        format!("http://{}:{}", host, self.api.port)
    }

    /// Executable launched by a background start: `TRIPWIRE_DAEMON_BIN`,
    /// else the `tripwired` binary next to the running executable.
    pub fn daemon_executable(&self) -> DaemonResult<PathBuf> {
        let bin = match &self.daemon_bin {
            Some(bin) => bin.clone(),
            None => {
                let exe = env::current_exe()?;
                exe.parent()
                    .map(|dir| dir.join(DAEMON_BIN_NAME))
                    .ok_or_else(|| DaemonError::Config(format!("No parent directory for {}", exe.display())))?
            }
        };

        if !bin.is_file() {
            return Err(DaemonError::Config(format!("Daemon executable not found: {}", bin.display())));
        }
        Ok(bin)
    }

    /// Ensure the profile directory tree exists.
    pub fn ensure_dirs(&self) -> DaemonResult<()> {
        std::fs::create_dir_all(self.rules_dir())?;
        Ok(())
    }
}

// =============================================================================
// Lookup helpers
// =============================================================================

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> DaemonResult<T> {
        match (self.0)(key) {
            Some(val) => val
                .trim()
                .parse::<T>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            None => Ok(default),
        }
    }

    fn decimal(&self, key: &str, default: Decimal) -> DaemonResult<Decimal> {
        match (self.0)(key) {
            Some(val) => Decimal::from_str(val.trim())
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            None => Ok(default),
        }
    }

    fn bool(&self, key: &str, default: bool) -> DaemonResult<bool> {
        match (self.0)(key) {
            Some(val) => match val.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" | "" => Ok(false),
                _ => Err(DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            },
            None => Ok(default),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> DaemonResult<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("HOME", "/home/alice")]).unwrap();

        assert_eq!(config.profile, "default");
        assert_eq!(config.state_dir, PathBuf::from("/home/alice/.tripwire"));
        assert_eq!(config.api.port, 8787);
        assert_eq!(config.broker.allowed_endpoint, "sandbox");
        assert_eq!(config.engine.max_triggers_per_rule_per_hour, 10);
        assert_eq!(config.engine.max_orders_per_session, 50);
        assert_eq!(config.engine.safety.max_order_qty, dec!(1000));
        assert!(!config.engine.dry_run);
        assert!(config.collector_url.is_none());
        assert!(config.health_targets.is_empty());
        assert!(config.daemon_bin.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TRIPWIRE_STATE_DIR", "/var/lib/tripwire"),
            ("TRIPWIRE_PROFILE", "paper"),
            ("TRIPWIRE_DRY_RUN", "true"),
            ("TRIPWIRE_MAX_ORDER_QTY", "25"),
            ("TRIPWIRE_MAX_ORDERS_PER_SESSION", "3"),
            ("TRIPWIRE_COLLECTOR_URL", "http://collector:9000"),
            ("TRIPWIRE_HEALTH_TARGETS", "http://a/health, ,http://b/health"),
            ("TRIPWIRE_DAEMON_BIN", "/opt/tripwire/bin/tripwired"),
        ])
        .unwrap();

        assert_eq!(config.pid_path(), PathBuf::from("/var/lib/tripwire/paper/daemon.pid"));
        assert_eq!(config.rules_dir(), PathBuf::from("/var/lib/tripwire/paper/rules"));
        assert_eq!(config.engine.daemon_id, "tripwired-paper");
        assert!(config.engine.dry_run);
        assert_eq!(config.engine.safety.max_order_qty, dec!(25));
        assert_eq!(config.engine.max_orders_per_session, 3);
        assert_eq!(config.collector_url.as_deref(), Some("http://collector:9000"));
        assert_eq!(config.health_targets, vec!["http://a/health", "http://b/health"]);
        assert_eq!(config.daemon_bin, Some(PathBuf::from("/opt/tripwire/bin/tripwired")));
    }

    #[test]
    fn test_daemon_executable_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tripwired");
        std::fs::write(&bin, "").unwrap();

        let mut config = Config::test(dir.path());
        config.daemon_bin = Some(bin.clone());
        assert_eq!(config.daemon_executable().unwrap(), bin);

        config.daemon_bin = Some(dir.path().join("missing"));
        assert!(matches!(config.daemon_executable(), Err(DaemonError::Config(_))));

        // The test harness has no tripwired sibling
        config.daemon_bin = None;
        let sibling = std::env::current_exe().unwrap().with_file_name(DAEMON_BIN_NAME);
        assert_eq!(config.daemon_executable().is_ok(), sibling.is_file());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            load(&[("HOME", "/h"), ("TRIPWIRE_API_PORT", "http")]),
            Err(DaemonError::Config(_))
        ));
        assert!(matches!(
            load(&[("HOME", "/h"), ("TRIPWIRE_DRY_RUN", "maybe")]),
            Err(DaemonError::Config(_))
        ));
        assert!(matches!(
            load(&[("HOME", "/h"), ("TRIPWIRE_DAILY_LOSS_LIMIT", "lots")]),
            Err(DaemonError::Config(_))
        ));
        assert!(matches!(
            load(&[("HOME", "/h"), ("TRIPWIRE_PROFILE", "../etc")]),
            Err(DaemonError::Config(_))
        ));
        assert!(matches!(load(&[]), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_api_base_url_maps_wildcard_host() {
        let mut config = Config::test("/tmp/x");
        config.api.host = "0.0.0.0".to_string();
        config.api.port = 9001;

        assert_eq!(config.api_base_url(), "http://127.0.0.1:9001");
    }
}
