//! KPI snapshots.
//!
//! A snapshot is one timestamped set of KPI values delivered by the
//! telemetry stream. The engine keeps the most recent one around so that
//! edge-triggered operators can compare two consecutive snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One timestamped set of KPI values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Business date the values belong to (as sent by the source)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// When the source computed the values
    pub updated_at: DateTime<Utc>,
    /// Origin of the snapshot (e.g. "portfolio", "account")
    #[serde(default)]
    pub source: String,
    /// KPI name → value
    pub kpis: BTreeMap<String, f64>,
}

impl Snapshot {
    /// Create an empty snapshot stamped `updated_at`.
    pub fn new(source: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            date: None,
            updated_at,
            source: source.into(),
            kpis: BTreeMap::new(),
        }
    }

    /// Builder-style KPI insertion.
    pub fn with_kpi(mut self, name: impl Into<String>, value: f64) -> Self {
        self.kpis.insert(name.into(), value);
        self
    }

    /// Look up a KPI value.
    pub fn get(&self, kpi: &str) -> Option<f64> {
        self.kpis.get(kpi).copied()
    }

    /// Number of KPIs carried.
    pub fn len(&self) -> usize {
        self.kpis.len()
    }

    /// Whether the snapshot carries no KPI at all.
    pub fn is_empty(&self) -> bool {
        self.kpis.is_empty()
    }

    /// Compact JSON of the KPI map, attached to trigger events.
    pub fn kpis_json(&self) -> String {
        serde_json::to_string(&self.kpis).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = Snapshot::new("portfolio", Utc::now())
            .with_kpi("Delta", 0.6)
            .with_kpi("Gamma", 0.05);

        assert_eq!(snapshot.get("Delta"), Some(0.6));
        assert_eq!(snapshot.get("Vega"), None);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.kpis_json(), r#"{"Delta":0.6,"Gamma":0.05}"#);
    }
}
