//! Upstream health probes.
//!
//! `probe_all` fans out one GET per target with bounded concurrency and
//! returns once every probe has finished.

use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Per-probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub target: String,
    pub healthy: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Probe every target, at most `concurrency` at a time. Results come back
/// in the order of `targets`.
pub async fn probe_all(client: &Client, targets: &[String], concurrency: usize) -> Vec<ProbeResult> {
    let mut results: Vec<(usize, ProbeResult)> = stream::iter(targets.iter().cloned().enumerate())
        .map(|(index, target)| async move { (index, probe(client, &target).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

async fn probe(client: &Client, target: &str) -> ProbeResult {
    let started = Instant::now();
    let outcome = client.get(target).timeout(PROBE_TIMEOUT).send().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(response) => {
            let status = response.status();
            tracing::debug!(%target, status = status.as_u16(), latency_ms, "Probe finished");
            ProbeResult {
                target: target.to_string(),
                healthy: status.is_success(),
                status: Some(status.as_u16()),
                latency_ms,
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(%target, error = %e, "Probe failed");
            ProbeResult {
                target: target.to_string(),
                healthy: false,
                status: None,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}
