//! Delivery event bus: trait for emitting delivery lifecycle events from any module.
//!
//! Modules accept an `Arc<dyn EventSink>` to report scheduled, cancelled,
//! sent, failed and skipped deliveries.

use crate::types::{DeliveryEvent, DeliveryEventType};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Trait for emitting delivery events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DeliveryEvent);
}

/// No-op sink for modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: DeliveryEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<DeliveryEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: DeliveryEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: DeliveryEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for creating a `DeliveryEvent` with minimal boilerplate.
pub fn make_event(
    event_type: DeliveryEventType,
    campaign_id: impl Into<String>,
    subject_id: Option<String>,
    channel: Option<String>,
) -> DeliveryEvent {
    DeliveryEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id: campaign_id.into(),
        subject_id,
        channel,
        detail: None,
        node_id: "local".into(),
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
