//! Event collector REST client.
//!
//! Endpoints:
//! - `POST /events` - deliver one event record
//! - `GET /events?rule_id=&limit=` - pull recorded history
//! - `POST /rules/sync` - push the full rule set

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use tripwire_domain::{Rule, TriggerEvent};

// =============================================================================
// Constants
// =============================================================================

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default page size for history pulls
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the collector client.
#[derive(Debug, Clone, Error)]
pub enum CollectorError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Collector answered with a non-success status
    #[error("Collector error: HTTP {status} - {body}")]
    ApiError { status: u16, body: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,
}

/// Response to a bulk rule sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSyncResponse {
    #[serde(default)]
    pub accepted: usize,
    #[serde(default)]
    pub rejected: Vec<String>,
}

#[derive(Serialize)]
struct RuleSyncRequest<'a> {
    rules: &'a [Rule],
}

// =============================================================================
// Collector Client
// =============================================================================

/// Client for the remote event collector.
#[derive(Clone)]
pub struct CollectorClient {
    client: Client,
    base_url: String,
}

impl CollectorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Deliver one event record.
    pub async fn post_event(&self, event: &TriggerEvent) -> Result<(), CollectorError> {
        let url = format!("{}/events", self.base_url);
        self.send(self.client.post(&url).json(event)).await?;
        Ok(())
    }

    /// Pull recorded events, newest first, optionally for one rule.
    pub async fn fetch_events(
        &self,
        rule_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TriggerEvent>, CollectorError> {
        let url = format!("{}/events", self.base_url);
        let mut query = vec![("limit", limit.to_string())];
        if let Some(rule_id) = rule_id {
            query.push(("rule_id", rule_id.to_string()));
        }

        let body = self.send(self.client.get(&url).query(&query)).await?;
        serde_json::from_str(&body).map_err(|e| CollectorError::ParseError(e.to_string()))
    }

    /// Push the full local rule set.
    pub async fn sync_rules(&self, rules: &[Rule]) -> Result<RuleSyncResponse, CollectorError> {
        let url = format!("{}/rules/sync", self.base_url);
        let body = self
            .send(self.client.post(&url).json(&RuleSyncRequest { rules }))
            .await?;

        if body.trim().is_empty() {
            return Ok(RuleSyncResponse {
                accepted: rules.len(),
                rejected: Vec::new(),
            });
        }
        serde_json::from_str(&body).map_err(|e| CollectorError::ParseError(e.to_string()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, CollectorError> {
        let response = timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), request.send())
            .await
            .map_err(|_| CollectorError::Timeout)?
            .map_err(|e| CollectorError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CollectorError::ParseError(e.to_string()))?;

        if !status.is_success() {
            return Err(CollectorError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = CollectorClient::new("http://collector.local:9000/");
        assert_eq!(client.base_url(), "http://collector.local:9000");
    }

    #[test]
    fn test_sync_response_defaults() {
        let parsed: RuleSyncResponse = serde_json::from_str(r#"{"accepted": 3}"#).unwrap();
        assert_eq!(parsed.accepted, 3);
        assert!(parsed.rejected.is_empty());
    }
}
