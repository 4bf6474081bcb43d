//! Outbound event queue.
//!
//! The engine emits into a bounded channel without ever waiting; a worker
//! drains it and posts each record to the collector, best effort.
//!
//! ```text
//! SignalEngine → QueueSink ──(cap 100, drop newest)──→ delivery worker → collector
//!                    ↓
//!            log line (tripwire::event)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tripwire_connectors::CollectorClient;
use tripwire_domain::TriggerEvent;
use tripwire_exec::EventSink;

/// Capacity of the outbound queue.
pub const EVENT_QUEUE_CAPACITY: usize = 100;

/// Event sink backed by the bounded outbound queue.
pub struct QueueSink {
    sender: mpsc::Sender<TriggerEvent>,
    dropped: AtomicU64,
}

impl QueueSink {
    /// Create the sink and the receiving end for the delivery worker.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TriggerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for QueueSink {
    fn emit(&self, event: TriggerEvent) {
        log_event(&event);

        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(event_id = %event.event_id, dropped, "Outbound queue full, event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                debug!(event_id = %event.event_id, "Outbound queue closed");
            }
        }
    }
}

/// One structured line per event record.
fn log_event(event: &TriggerEvent) {
    info!(
        target: "tripwire::event",
        event_id = %event.event_id,
        rule_id = %event.rule_id,
        event_type = %event.event_type,
        symbol = event.symbol.as_deref().unwrap_or_default(),
        order_id = event.order_id.as_deref().unwrap_or_default(),
        order_side = event.order_side.map(|s| s.to_string()).unwrap_or_default(),
        order_qty = event.order_qty.map(|q| q.to_string()).unwrap_or_default(),
        order_price = event.order_price.map(|p| p.to_string()).unwrap_or_default(),
        detail = event.detail.as_deref().unwrap_or_default(),
        trigger_snapshot_json = event.trigger_snapshot_json.as_deref().unwrap_or_default(),
        daemon_id = %event.daemon_id,
        created_at = %event.created_at.to_rfc3339(),
        "event"
    );
}

/// Drain the queue until cancelled or every sender is gone. Without a
/// collector records are only consumed.
pub async fn run_delivery(
    mut receiver: mpsc::Receiver<TriggerEvent>,
    collector: Option<CollectorClient>,
    cancel: CancellationToken,
) -> u64 {
    let mut delivered = 0u64;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(collector) = &collector else {
            continue;
        };

        match collector.post_event(&event).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(event_id = %event.event_id, error = %e, "Event delivery failed"),
        }
    }

    info!(delivered, "Event delivery stopped");
    delivered
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tripwire_domain::EventType;

    fn event(rule_id: &str) -> TriggerEvent {
        TriggerEvent::new(rule_id, EventType::EntryTriggered, "d1", Utc::now())
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (sink, mut receiver) = QueueSink::new(2);

        sink.emit(event("a"));
        sink.emit(event("b"));
        sink.emit(event("c"));

        assert_eq!(sink.dropped(), 1);
        assert_eq!(receiver.recv().await.unwrap().rule_id, "a");
        assert_eq!(receiver.recv().await.unwrap().rule_id, "b");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_after_worker_gone_does_not_panic() {
        let (sink, receiver) = QueueSink::new(EVENT_QUEUE_CAPACITY);
        drop(receiver);

        sink.emit(event("a"));
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_delivery_without_collector_drains() {
        let (sink, receiver) = QueueSink::new(EVENT_QUEUE_CAPACITY);
        sink.emit(event("a"));
        sink.emit(event("b"));
        drop(sink);

        let delivered = run_delivery(receiver, None, CancellationToken::new()).await;

        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_delivery_stops_on_cancel() {
        let (_sink, receiver) = QueueSink::new(EVENT_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let delivered = run_delivery(receiver, None, cancel).await;

        assert_eq!(delivered, 0);
    }
}
