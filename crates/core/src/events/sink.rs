//! Enrichment event sink trait and implementations.

use std::sync::{Arc, Mutex};

use super::EnrichmentEvent;

/// Trait for receiving enrichment events.
///
/// # Design Rules
///
/// - `emit()` must be fast and non-blocking (no network calls)
/// - Failure to emit must not affect the session (best-effort)
pub trait EnrichmentEventSink: Send + Sync {
    /// Emit a single event.
    fn emit(&self, event: EnrichmentEvent);

    /// Emit multiple events.
    ///
    /// Default implementation calls `emit()` for each event.
    fn emit_batch(&self, events: Vec<EnrichmentEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// No-op implementation for contexts that don't need events.
#[derive(Clone, Default)]
pub struct NoOpEnrichmentEventSink;

impl EnrichmentEventSink for NoOpEnrichmentEventSink {
    fn emit(&self, _event: EnrichmentEvent) {}
}

/// Mock sink for testing - collects emitted events.
#[derive(Clone, Default)]
pub struct MockEnrichmentEventSink {
    events: Arc<Mutex<Vec<EnrichmentEvent>>>,
}

impl MockEnrichmentEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    pub fn events(&self) -> Vec<EnrichmentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// Returns the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    /// Returns true if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EnrichmentEventSink for MockEnrichmentEventSink {
    fn emit(&self, event: EnrichmentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
