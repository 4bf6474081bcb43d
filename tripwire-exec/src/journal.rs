//! Order journal for idempotent submission.
//!
//! Every order is recorded under its client order id before it is handed
//! to the broker. A second submission with the same client id is refused
//! without a broker call, so a redelivered trigger can never place the
//! same order twice.
//!
//! # Flow
//!
//! 1. Record entry (before submission)
//! 2. Submit to broker
//! 3. Complete entry (with result)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use tripwire_domain::OrderRequest;

use crate::error::{ExecError, ExecResult};

// =============================================================================
// Journal Types
// =============================================================================

/// A submission recorded before it reaches the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Idempotency key
    pub client_order_id: String,
    /// Rule id or `position:<external id>`
    pub source: String,
    /// The order as submitted
    pub request: OrderRequest,
    /// Current status
    pub status: SubmissionStatus,
    /// Broker order id once accepted
    pub broker_order_id: Option<String>,
    /// Failure reason if rejected
    pub error: Option<String>,
    /// When the entry was recorded
    pub recorded_at: DateTime<Utc>,
    /// When the broker answered
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Recorded, broker call in flight
    Pending,
    /// Broker accepted
    Accepted,
    /// Broker refused or transport failed
    Failed,
}

// =============================================================================
// Order Journal
// =============================================================================

/// In-memory journal, one per daemon session.
pub struct OrderJournal {
    entries: RwLock<HashMap<String, JournalEntry>>,
}

impl OrderJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a submission before sending it.
    ///
    /// Returns `AlreadySubmitted` if the client order id is known.
    pub fn record(&self, source: &str, request: &OrderRequest) -> ExecResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ExecError::Journal(format!("Failed to acquire write lock: {}", e)))?;

        if entries.contains_key(&request.client_order_id) {
            return Err(ExecError::AlreadySubmitted(request.client_order_id.clone()));
        }

        entries.insert(
            request.client_order_id.clone(),
            JournalEntry {
                client_order_id: request.client_order_id.clone(),
                source: source.to_string(),
                request: request.clone(),
                status: SubmissionStatus::Pending,
                broker_order_id: None,
                error: None,
                recorded_at: Utc::now(),
                completed_at: None,
            },
        );
        Ok(())
    }

    /// Mark a submission accepted.
    pub fn accept(&self, client_order_id: &str, broker_order_id: &str) -> ExecResult<()> {
        self.complete(client_order_id, |entry| {
            entry.status = SubmissionStatus::Accepted;
            entry.broker_order_id = Some(broker_order_id.to_string());
        })
    }

    /// Mark a submission failed.
    pub fn fail(&self, client_order_id: &str, reason: &str) -> ExecResult<()> {
        self.complete(client_order_id, |entry| {
            entry.status = SubmissionStatus::Failed;
            entry.error = Some(reason.to_string());
        })
    }

    fn complete<F>(&self, client_order_id: &str, update: F) -> ExecResult<()>
    where
        F: FnOnce(&mut JournalEntry),
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ExecError::Journal(format!("Failed to acquire write lock: {}", e)))?;

        let entry = entries.get_mut(client_order_id).ok_or_else(|| {
            ExecError::Journal(format!("Entry not found: {}", client_order_id))
        })?;

        update(entry);
        entry.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Look up an entry.
    pub fn get(&self, client_order_id: &str) -> ExecResult<Option<JournalEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ExecError::Journal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(entries.get(client_order_id).cloned())
    }

    /// Entries still waiting for a broker answer.
    pub fn get_pending(&self) -> ExecResult<Vec<JournalEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ExecError::Journal(format!("Failed to acquire read lock: {}", e)))?;

        Ok(entries
            .values()
            .filter(|e| e.status == SubmissionStatus::Pending)
            .cloned()
            .collect())
    }

    /// Entries recorded for a rule or position.
    pub fn get_by_source(&self, source: &str) -> ExecResult<Vec<JournalEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ExecError::Journal(format!("Failed to acquire read lock: {}", e)))?;

        let mut found: Vec<JournalEntry> =
            entries.values().filter(|e| e.source == source).cloned().collect();
        found.sort_by_key(|e| e.recorded_at);
        Ok(found)
    }

    /// Number of recorded submissions.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OrderJournal {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
