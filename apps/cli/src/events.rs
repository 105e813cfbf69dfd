//! Event sink that reports session events through `tracing`.

use enrichsync_core::events::{EnrichmentEvent, EnrichmentEventSink};

/// Logs every enrichment event. Background failures are surfaced at `warn`.
#[derive(Clone, Default)]
pub struct TracingEventSink;

impl EnrichmentEventSink for TracingEventSink {
    fn emit(&self, event: EnrichmentEvent) {
        match &event {
            EnrichmentEvent::PageLoaded {
                generation,
                page,
                entity_count,
                pending_count,
            } => tracing::info!(
                generation,
                page,
                entity_count,
                pending_count,
                "Page loaded"
            ),
            EnrichmentEvent::EnrichmentTriggered {
                generation,
                entity_ids,
            } => tracing::info!(generation, count = entity_ids.len(), "Enrichment started"),
            EnrichmentEvent::TriggerFailed {
                generation,
                entity_ids,
                message,
            } => tracing::warn!(
                generation,
                count = entity_ids.len(),
                error = %message,
                "Could not start enrichment"
            ),
            EnrichmentEvent::PollStarted {
                generation,
                pending_count,
            } => tracing::debug!(generation, pending_count, "Polling started"),
            EnrichmentEvent::EntitiesUpdated {
                generation,
                entity_ids,
            } => tracing::info!(generation, count = entity_ids.len(), "Rows updated"),
            EnrichmentEvent::PollTickFailed {
                generation,
                tick,
                message,
            } => tracing::warn!(generation, tick, error = %message, "Status query failed"),
            EnrichmentEvent::PollFinished {
                generation,
                state,
                ticks,
                remaining,
            } => tracing::info!(
                generation,
                state = %state,
                ticks,
                remaining = remaining.len(),
                "Polling finished"
            ),
        }
    }
}
