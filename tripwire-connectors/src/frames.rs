//! Inbound stream frames.
//!
//! Every frame is a JSON object with a `type` discriminator:
//!
//! ```json
//! { "type": "hello", "message": "welcome" }
//! { "type": "snapshot", "date": "2024-03-01", "updated_at": "2024-03-01T14:30:00Z",
//!   "source": "portfolio", "rows": [ { "kpi": "Delta", "value": 0.61 } ] }
//! { "type": "position_events", "positions": [ { "id": "t-1", "underlying": "SPY", ... } ] }
//! ```
//!
//! Parsing is lenient inside a frame: KPI rows without a numeric value and
//! positions that do not deserialize are dropped one by one, the rest of
//! the frame is kept.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use tripwire_domain::{PositionEvent, Snapshot};

/// Frame that could not be used at all.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing frame type")]
    MissingType,

    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    #[error("Malformed {kind} frame: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

/// Parsed inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Informational greeting
    Hello(Value),
    /// KPI snapshot
    Snapshot(Snapshot),
    /// Batch of position lifecycle events
    PositionEvents(Vec<PositionEvent>),
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Hello(_) => "hello",
            InboundFrame::Snapshot(_) => "snapshot",
            InboundFrame::PositionEvents(_) => "position_events",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotFrame {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    rows: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PositionEventsFrame {
    #[serde(default)]
    positions: Vec<Value>,
}

/// Parse one text frame.
pub fn parse_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let json: Value =
        serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

    let frame_type = json
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?;

    match frame_type {
        "hello" => Ok(InboundFrame::Hello(json)),
        "snapshot" => {
            let frame: SnapshotFrame =
                serde_json::from_value(json).map_err(|e| FrameError::Malformed {
                    kind: "snapshot",
                    reason: e.to_string(),
                })?;
            Ok(InboundFrame::Snapshot(snapshot_from(frame)))
        }
        "position_events" => {
            let frame: PositionEventsFrame =
                serde_json::from_value(json).map_err(|e| FrameError::Malformed {
                    kind: "position_events",
                    reason: e.to_string(),
                })?;
            Ok(InboundFrame::PositionEvents(positions_from(frame)))
        }
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

fn snapshot_from(frame: SnapshotFrame) -> Snapshot {
    let updated_at = frame
        .updated_at
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut snapshot = Snapshot::new(frame.source.unwrap_or_default(), updated_at);
    snapshot.date = frame.date;

    for row in &frame.rows {
        match kpi_row(row) {
            Some((kpi, value)) => snapshot = snapshot.with_kpi(kpi, value),
            None => debug!(%row, "Non-numeric KPI row dropped"),
        }
    }
    snapshot
}

/// `{kpi, value}` with a finite numeric value (number or numeric string).
fn kpi_row(row: &Value) -> Option<(String, f64)> {
    let kpi = row.get("kpi")?.as_str()?.trim();
    if kpi.is_empty() {
        return None;
    }

    let value = match row.get("value")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    value.is_finite().then(|| (kpi.to_string(), value))
}

fn positions_from(frame: PositionEventsFrame) -> Vec<PositionEvent> {
    frame
        .positions
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<PositionEvent>(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "Malformed position dropped");
                None
            }
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
