//! Lifecycle control surface.
//!
//! Operations an operator tool drives against one profile: start and stop
//! the daemon, inspect it, manage rule documents, dry-run a rule, sync and
//! pull from the collector, edit the position filter.
//!
//! Rule and filter edits land in the profile directory; a running daemon
//! picks them up on its next start.

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use tripwire_connectors::{CollectorClient, RuleSyncResponse};
use tripwire_domain::{PositionFilter, Rule, RuleStatus, Snapshot, TriggerEvent};
use tripwire_engine::RuleMatch;
use tripwire_store::{FileRuleStore, FilterStore, LoadReport, RuleRepository, StoreError};

use crate::api::StatusResponse;
use crate::config::Config;
use crate::daemon::Daemon;
use crate::error::{DaemonError, DaemonResult};
use crate::lifecycle::{process_alive, Lifecycle, PidFileLifecycle};
use crate::logging;

/// Poll interval while waiting for a stopping daemon.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default time `stop` waits for the marker to disappear.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the status API call.
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Status
// =============================================================================

/// Rule documents by status, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleCounts {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub disabled: usize,
    pub rejected: usize,
}

impl RuleCounts {
    fn from_report(report: &LoadReport) -> Self {
        let count = |status: RuleStatus| report.rules.iter().filter(|r| r.status == status).count();
        Self {
            total: report.rules.len(),
            active: count(RuleStatus::Active),
            paused: count(RuleStatus::Paused),
            disabled: count(RuleStatus::Disabled),
            rejected: report.rejected.len(),
        }
    }
}

/// Combined liveness and rule view of a profile.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub profile: String,
    pub running: bool,
    pub pid: Option<u32>,
    pub rules: RuleCounts,
    /// Live engine view, when the daemon answered
    pub live: Option<StatusResponse>,
}

// =============================================================================
// Start / stop
// =============================================================================

/// Run the daemon in this process until SIGINT/SIGTERM.
pub async fn start_foreground(config: Config) -> DaemonResult<()> {
    logging::init(&config.log_path())?;
    Daemon::new_stub(config).run().await
}

/// Launch the daemon binary ([`Config::daemon_executable`]) detached from
/// this terminal. Returns the child pid.
pub fn start_background(config: &Config) -> DaemonResult<u32> {
    let lifecycle = PidFileLifecycle::new(&config.state_dir);
    if let Some(existing) = lifecycle.current(&config.profile)? {
        if lifecycle.is_alive(&existing) {
            return Err(DaemonError::AlreadyRunning {
                profile: config.profile.clone(),
                pid: existing.pid,
            });
        }
    }
    config.ensure_dirs()?;

    let exe = config.daemon_executable()?;
    let child = Command::new(&exe)
        .env("TRIPWIRE_PROFILE", &config.profile)
        .env("TRIPWIRE_STATE_DIR", &config.state_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()?;

    info!(
        profile = %config.profile,
        pid = child.id(),
        exe = %exe.display(),
        "Daemon started in background"
    );
    Ok(child.id())
}

/// Send SIGTERM to the running daemon and wait for it to release its
/// marker. Returns the pid that was stopped.
pub async fn stop(config: &Config, timeout: Duration) -> DaemonResult<u32> {
    let lifecycle = PidFileLifecycle::new(&config.state_dir);
    let handle = lifecycle
        .current(&config.profile)?
        .filter(|handle| lifecycle.is_alive(handle))
        .ok_or_else(|| DaemonError::NotRunning(config.profile.clone()))?;

    let status = Command::new("kill")
        .arg("-TERM")
        .arg(handle.pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if !status.success() {
        return Err(DaemonError::NotRunning(config.profile.clone()));
    }

    let deadline = Instant::now() + timeout;
    while handle.path.exists() && process_alive(handle.pid) {
        if Instant::now() >= deadline {
            return Err(DaemonError::Lifecycle {
                path: handle.path.clone(),
                reason: format!("pid {} did not stop within {:?}", handle.pid, timeout),
            });
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }

    info!(profile = %config.profile, pid = handle.pid, "Daemon stopped");
    Ok(handle.pid)
}

/// Liveness from the marker, rule counts from disk, engine view from the
/// status API when reachable.
pub async fn status(config: &Config) -> DaemonResult<DaemonStatus> {
    let lifecycle = PidFileLifecycle::new(&config.state_dir);
    let pid = lifecycle
        .current(&config.profile)?
        .filter(|handle| lifecycle.is_alive(handle))
        .map(|handle| handle.pid);

    let report = rule_store(config).load_all().await?;

    let live = match pid {
        Some(_) => fetch_live_status(config).await.ok(),
        None => None,
    };

    Ok(DaemonStatus {
        profile: config.profile.clone(),
        running: pid.is_some(),
        pid,
        rules: RuleCounts::from_report(&report),
        live,
    })
}

async fn fetch_live_status(config: &Config) -> DaemonResult<StatusResponse> {
    let url = format!("{}/status", config.api_base_url());
    let response = reqwest::Client::new()
        .get(&url)
        .timeout(STATUS_TIMEOUT)
        .send()
        .await
        .map_err(|e| DaemonError::Api(e.to_string()))?;

    if !response.status().is_success() {
        return Err(DaemonError::Api(format!("HTTP {}", response.status())));
    }
    response
        .json::<StatusResponse>()
        .await
        .map_err(|e| DaemonError::Api(e.to_string()))
}

// =============================================================================
// Rules
// =============================================================================

fn rule_store(config: &Config) -> FileRuleStore {
    FileRuleStore::new(config.rules_dir(), config.rule_owner())
}

fn rule_error(rule_id: &str, e: StoreError) -> DaemonError {
    match e {
        StoreError::NotFound { .. } => DaemonError::RuleNotFound(rule_id.to_string()),
        other => other.into(),
    }
}

/// Normalize, validate and store a rule. Returns the stored form.
pub async fn add_rule(config: &Config, rule: Rule) -> DaemonResult<Rule> {
    Ok(rule_store(config).save(rule).await?)
}

/// Every rule document, valid ones and rejected ones.
pub async fn list_rules(config: &Config) -> DaemonResult<LoadReport> {
    Ok(rule_store(config).load_all().await?)
}

pub async fn remove_rule(config: &Config, rule_id: &str) -> DaemonResult<()> {
    rule_store(config)
        .remove(rule_id)
        .await
        .map_err(|e| rule_error(rule_id, e))
}

pub async fn enable_rule(config: &Config, rule_id: &str) -> DaemonResult<Rule> {
    rule_store(config)
        .set_status(rule_id, RuleStatus::Active)
        .await
        .map_err(|e| rule_error(rule_id, e))
}

pub async fn pause_rule(config: &Config, rule_id: &str) -> DaemonResult<Rule> {
    rule_store(config)
        .set_status(rule_id, RuleStatus::Paused)
        .await
        .map_err(|e| rule_error(rule_id, e))
}

/// Dry-run one stored rule against a snapshot pair. No state is touched
/// and nothing is submitted.
pub async fn test_rule(
    config: &Config,
    rule_id: &str,
    current: &Snapshot,
    previous: Option<&Snapshot>,
) -> DaemonResult<RuleMatch> {
    let rule = rule_store(config)
        .get(rule_id)
        .await?
        .ok_or_else(|| DaemonError::RuleNotFound(rule_id.to_string()))?;

    Ok(tripwire_engine::test_rule(&rule, current, previous))
}

// =============================================================================
// Collector
// =============================================================================

fn collector(config: &Config) -> DaemonResult<CollectorClient> {
    config
        .collector_url
        .as_deref()
        .map(CollectorClient::new)
        .ok_or(DaemonError::CollectorNotConfigured)
}

/// Push every valid local rule to the collector.
pub async fn sync_rules(config: &Config) -> DaemonResult<RuleSyncResponse> {
    let client = collector(config)?;
    let report = rule_store(config).load_all().await?;
    let response = client.sync_rules(&report.rules).await?;

    info!(
        sent = report.rules.len(),
        accepted = response.accepted,
        rejected = response.rejected.len(),
        "Rules synced"
    );
    Ok(response)
}

/// Recorded events from the collector, optionally for one rule.
pub async fn pull_history(
    config: &Config,
    rule_id: Option<&str>,
    limit: usize,
) -> DaemonResult<Vec<TriggerEvent>> {
    Ok(collector(config)?.fetch_events(rule_id, limit).await?)
}

// =============================================================================
// Filter
// =============================================================================

pub async fn show_filter(config: &Config) -> DaemonResult<PositionFilter> {
    Ok(FilterStore::new(config.filter_path()).load().await?)
}

pub async fn set_filter(config: &Config, filter: &PositionFilter) -> DaemonResult<()> {
    Ok(FilterStore::new(config.filter_path()).save(filter).await?)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn rule(name: &str) -> Rule {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "symbols": ["SPY"],
            "entry": { "any_of": [ { "kpi": "Delta", "operator": "crosses_above", "value": 0.5 } ] },
            "order": { "side": "buy", "qty": 1 }
        }))
        .unwrap()
    }

    fn snapshot(delta: f64) -> Snapshot {
        Snapshot::new("test", Utc::now()).with_kpi("Delta", delta)
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let dir = TempDir::new().unwrap();
        let config = Config::test(dir.path());

        let stored = add_rule(&config, rule("cross")).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(list_rules(&config).await.unwrap().rules.len(), 1);

        let paused = pause_rule(&config, &stored.rule_id).await.unwrap();
        assert_eq!(paused.status, RuleStatus::Paused);
        let enabled = enable_rule(&config, &stored.rule_id).await.unwrap();
        assert_eq!(enabled.status, RuleStatus::Active);

        remove_rule(&config, &stored.rule_id).await.unwrap();
        assert!(list_rules(&config).await.unwrap().rules.is_empty());

        assert!(matches!(
            remove_rule(&config, &stored.rule_id).await,
            Err(DaemonError::RuleNotFound(_))
        ));
        assert!(matches!(
            pause_rule(&config, "missing").await,
            Err(DaemonError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_rule_refused() {
        let dir = TempDir::new().unwrap();
        let config = Config::test(dir.path());
        let mut bad = rule("bad");
        bad.order.qty = dec!(0);

        assert!(add_rule(&config, bad).await.is_err());
        assert!(list_rules(&config).await.unwrap().rules.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_rule() {
        let dir = TempDir::new().unwrap();
        let config = Config::test(dir.path());
        let stored = add_rule(&config, rule("cross")).await.unwrap();

        let crossed = test_rule(&config, &stored.rule_id, &snapshot(0.6), Some(&snapshot(0.4)))
            .await
            .unwrap();
        assert_eq!(crossed, RuleMatch::Entry);

        // No previous snapshot, no crossing
        let first = test_rule(&config, &stored.rule_id, &snapshot(0.6), None).await.unwrap();
        assert_eq!(first, RuleMatch::None);

        assert!(matches!(
            test_rule(&config, "missing", &snapshot(0.6), None).await,
            Err(DaemonError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_when_stopped() {
        let dir = TempDir::new().unwrap();
        let config = Config::test(dir.path());
        add_rule(&config, rule("a")).await.unwrap();
        let b = add_rule(&config, rule("b")).await.unwrap();
        pause_rule(&config, &b.rule_id).await.unwrap();

        let status = status(&config).await.unwrap();

        assert!(!status.running);
        assert_eq!(status.pid, None);
        assert!(status.live.is_none());
        assert_eq!(status.rules.total, 2);
        assert_eq!(status.rules.active, 1);
        assert_eq!(status.rules.paused, 1);
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let dir = TempDir::new().unwrap();
        let config = Config::test(dir.path());

        assert!(matches!(
            stop(&config, DEFAULT_STOP_TIMEOUT).await,
            Err(DaemonError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_start_background_refused_while_running() {
        let dir = TempDir::new().unwrap();
        let config = Config::test(dir.path());
        let _held = PidFileLifecycle::new(dir.path())
            .acquire_exclusive(&config.profile)
            .unwrap();

        assert!(matches!(
            start_background(&config),
            Err(DaemonError::AlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_background_launches_daemon_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("fake-tripwired");
        std::fs::write(
            &bin,
            "#!/bin/sh\necho \"$TRIPWIRE_PROFILE\" > \"$TRIPWIRE_STATE_DIR/launched.tmp\"\nmv \"$TRIPWIRE_STATE_DIR/launched.tmp\" \"$TRIPWIRE_STATE_DIR/launched\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::test(dir.path());
        config.daemon_bin = Some(bin);

        // A freshly written script can briefly report ETXTBSY while another
        // test thread forks
        let mut launch = start_background(&config);
        for _ in 0..20 {
            match &launch {
                Err(DaemonError::Io(e)) if e.raw_os_error() == Some(26) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    launch = start_background(&config);
                }
                _ => break,
            }
        }
        assert!(launch.unwrap() > 0);

        let launched = dir.path().join("launched");
        for _ in 0..100 {
            if launched.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(std::fs::read_to_string(&launched).unwrap().trim(), "test");
    }

    #[tokio::test]
    async fn test_start_background_missing_executable() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::test(dir.path());
        config.daemon_bin = Some(dir.path().join("nope"));

        assert!(matches!(start_background(&config), Err(DaemonError::Config(_))));
    }

    #[tokio::test]
    async fn test_filter_show_and_set() {
        let dir = TempDir::new().unwrap();
        let config = Config::test(dir.path());
        assert!(!show_filter(&config).await.unwrap().enabled);

        let filter: PositionFilter = serde_json::from_value(serde_json::json!({
            "enabled": true,
            "underlyings": ["SPY"],
            "max_qty": 3
        }))
        .unwrap();
        set_filter(&config, &filter).await.unwrap();

        let shown = show_filter(&config).await.unwrap();
        assert!(shown.enabled);
        assert_eq!(shown.underlyings, vec!["SPY"]);
        assert_eq!(shown.max_qty, Some(dec!(3)));
    }

    #[tokio::test]
    async fn test_collector_operations_need_url() {
        let dir = TempDir::new().unwrap();
        let config = Config::test(dir.path());

        assert!(matches!(sync_rules(&config).await, Err(DaemonError::CollectorNotConfigured)));
        assert!(matches!(
            pull_history(&config, None, 10).await,
            Err(DaemonError::CollectorNotConfigured)
        ));
    }
}
