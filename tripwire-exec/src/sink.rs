//! Event sink port.
//!
//! The engine hands every event record to a sink while it still holds its
//! state lock, so implementations must not block.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tripwire_domain::{EventType, TriggerEvent};

/// Non-blocking destination for event records.
pub trait EventSink: Send + Sync {
    /// Accept an event. Must return immediately; dropping is allowed.
    fn emit(&self, event: TriggerEvent);
}

/// Sink that keeps every event in memory (tests, dry-run inspection).
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TriggerEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far, in emission order.
    pub fn events(&self) -> Vec<TriggerEvent> {
        self.lock().clone()
    }

    /// Events of one type.
    pub fn of_type(&self, event_type: EventType) -> Vec<TriggerEvent> {
        self.lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.lock().iter().filter(|e| e.event_type == event_type).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TriggerEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: TriggerEvent) {
        self.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_recording_sink_filters_by_type() {
        let sink = RecordingSink::new();
        sink.emit(TriggerEvent::new("r1", EventType::EntryTriggered, "d", Utc::now()));
        sink.emit(TriggerEvent::new("r1", EventType::OrderPlaced, "d", Utc::now()));
        sink.emit(TriggerEvent::new("r2", EventType::EntryTriggered, "d", Utc::now()));

        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.count(EventType::EntryTriggered), 2);
        assert_eq!(sink.of_type(EventType::OrderPlaced)[0].rule_id, "r1");

        sink.clear();
        assert!(sink.events().is_empty());
    }
}
