//! Enrichment event types.

use serde::{Deserialize, Serialize};

use crate::entities::{EntityId, PollState};

/// Events emitted by an enrichment session as the listing changes.
///
/// These are facts about store changes. The presentation layer subscribes to
/// them to re-project the view and to surface background failures as toasts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrichmentEvent {
    /// A new page window replaced the store.
    PageLoaded {
        generation: u64,
        page: u32,
        entity_count: usize,
        pending_count: usize,
    },

    /// Enrichment jobs were started for these ids.
    EnrichmentTriggered {
        generation: u64,
        entity_ids: Vec<EntityId>,
    },

    /// Starting enrichment failed; the ids stay `unknown` and can be retried.
    TriggerFailed {
        generation: u64,
        entity_ids: Vec<EntityId>,
        message: String,
    },

    /// A poll run started for this generation.
    PollStarted {
        generation: u64,
        pending_count: usize,
    },

    /// A merge changed these entities.
    EntitiesUpdated {
        generation: u64,
        entity_ids: Vec<EntityId>,
    },

    /// One status query failed; polling continues on the next tick.
    PollTickFailed {
        generation: u64,
        tick: u32,
        message: String,
    },

    /// A poll run reached a terminal state.
    PollFinished {
        generation: u64,
        state: PollState,
        ticks: u32,
        remaining: Vec<EntityId>,
    },
}

impl EnrichmentEvent {
    /// Generation of the store the event refers to.
    pub fn generation(&self) -> u64 {
        match self {
            EnrichmentEvent::PageLoaded { generation, .. }
            | EnrichmentEvent::EnrichmentTriggered { generation, .. }
            | EnrichmentEvent::TriggerFailed { generation, .. }
            | EnrichmentEvent::PollStarted { generation, .. }
            | EnrichmentEvent::EntitiesUpdated { generation, .. }
            | EnrichmentEvent::PollTickFailed { generation, .. }
            | EnrichmentEvent::PollFinished { generation, .. } => *generation,
        }
    }

    /// Creates an EntitiesUpdated event.
    pub fn entities_updated(generation: u64, entity_ids: Vec<EntityId>) -> Self {
        Self::EntitiesUpdated {
            generation,
            entity_ids,
        }
    }

    /// Creates a TriggerFailed event.
    pub fn trigger_failed(
        generation: u64,
        entity_ids: Vec<EntityId>,
        message: impl Into<String>,
    ) -> Self {
        Self::TriggerFailed {
            generation,
            entity_ids,
            message: message.into(),
        }
    }
}
