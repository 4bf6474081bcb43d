//! Per-rule trigger gate: cooldown and rolling hourly cap.
//!
//! All methods take `now` explicitly so callers (and tests) control time.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Rule may trigger
    Allowed,
    /// Cooldown still running
    Cooldown { until: DateTime<Utc> },
    /// Rolling one-hour trigger count reached the cap
    HourlyCap { count: usize, max: usize },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::Allowed => write!(f, "allowed"),
            GateDecision::Cooldown { until } => {
                write!(f, "cooldown active until {}", until.to_rfc3339())
            }
            GateDecision::HourlyCap { count, max } => {
                write!(f, "hourly trigger cap reached ({}/{})", count, max)
            }
        }
    }
}

/// Cooldown map plus sliding one-hour trigger history, keyed by rule id.
#[derive(Debug, Clone)]
pub struct TriggerGate {
    max_per_hour: usize,
    cooldowns: HashMap<String, DateTime<Utc>>,
    history: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl TriggerGate {
    pub fn new(max_per_hour: usize) -> Self {
        Self {
            max_per_hour,
            cooldowns: HashMap::new(),
            history: HashMap::new(),
        }
    }

    /// Check cooldown first, then the hourly cap. Stale history entries
    /// are pruned as a side effect.
    pub fn check(&mut self, rule_id: &str, now: DateTime<Utc>) -> GateDecision {
        if let Some(until) = self.cooldowns.get(rule_id) {
            if now < *until {
                return GateDecision::Cooldown { until: *until };
            }
        }

        let count = self.prune(rule_id, now);
        if count >= self.max_per_hour {
            return GateDecision::HourlyCap {
                count,
                max: self.max_per_hour,
            };
        }

        GateDecision::Allowed
    }

    /// Arm the cooldown and record the trigger timestamp.
    pub fn record(&mut self, rule_id: &str, now: DateTime<Utc>, cooldown: Duration) {
        let until = now
            .checked_add_signed(cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.cooldowns.insert(rule_id.to_string(), until);
        self.history
            .entry(rule_id.to_string())
            .or_default()
            .push_back(now);
    }

    /// Triggers recorded for a rule within the hour before `now`.
    pub fn recent_triggers(&mut self, rule_id: &str, now: DateTime<Utc>) -> usize {
        self.prune(rule_id, now)
    }

    /// Drop state for rules no longer loaded.
    pub fn retain_rules<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.cooldowns.retain(|id, _| keep(id));
        self.history.retain(|id, _| keep(id));
    }

    fn prune(&mut self, rule_id: &str, now: DateTime<Utc>) -> usize {
        let Some(entries) = self.history.get_mut(rule_id) else {
            return 0;
        };
        let horizon = now - Duration::hours(1);
        while entries.front().is_some_and(|t| *t <= horizon) {
            entries.pop_front();
        }
        entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_cooldown_boundary() {
        let mut gate = TriggerGate::new(10);
        gate.record("r1", t0(), Duration::seconds(300));

        assert!(matches!(
            gate.check("r1", t0() + Duration::seconds(299)),
            GateDecision::Cooldown { .. }
        ));
        assert!(gate.check("r1", t0() + Duration::seconds(300)).is_allowed());
        assert!(gate.check("r2", t0()).is_allowed());
    }

    #[test]
    fn test_unbounded_cooldown_saturates() {
        let mut gate = TriggerGate::new(10);
        gate.record("r1", t0(), Duration::MAX);

        assert!(matches!(
            gate.check("r1", t0() + Duration::days(365 * 100)),
            GateDecision::Cooldown { .. }
        ));
    }

    #[test]
    fn test_eleventh_trigger_within_hour_blocked() {
        let mut gate = TriggerGate::new(10);
        let cooldown = Duration::seconds(60);

        for i in 0..10 {
            let now = t0() + Duration::minutes(i);
            assert!(gate.check("r1", now).is_allowed(), "trigger {}", i + 1);
            gate.record("r1", now, cooldown);
        }

        let eleventh = t0() + Duration::minutes(10);
        assert_eq!(
            gate.check("r1", eleventh),
            GateDecision::HourlyCap { count: 10, max: 10 }
        );

        // First entry leaves the window exactly one hour after it was recorded
        assert!(gate.check("r1", t0() + Duration::minutes(60)).is_allowed());
        assert_eq!(gate.recent_triggers("r1", t0() + Duration::minutes(60)), 9);
    }

    #[test]
    fn test_retain_rules_drops_state() {
        let mut gate = TriggerGate::new(10);
        gate.record("r1", t0(), Duration::seconds(300));
        gate.record("r2", t0(), Duration::seconds(300));

        gate.retain_rules(|id| id == "r2");

        assert!(gate.check("r1", t0()).is_allowed());
        assert!(!gate.check("r2", t0()).is_allowed());
    }
}
