//! Canonical in-memory table of the entities displayed by one listing session.

use log::warn;
use std::collections::{BTreeSet, HashMap};

use super::entity_model::{EnrichmentState, Entity, ListQuery, ListResponse};
use super::entity_types::EntityId;
use super::page_window::{PageWindow, PollState};
use crate::errors::ValidationError;

/// Entities of the current page keyed by id, tagged with the generation of the
/// page fetch that produced them.
///
/// Only the merge engine and the sync job tracker mutate entities; everything
/// else reads through [`crate::enrichment::ViewProjector`].
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    generation: u64,
    window: Option<PageWindow>,
    entities: HashMap<EntityId, Entity>,
    /// Enriched fields the engine merges. `None` accepts any field.
    vocabulary: Option<BTreeSet<String>>,
    last_poll: PollState,
}

impl EntityStore {
    /// An empty store at generation 0, before any page was fetched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the store for a freshly fetched page.
    ///
    /// Duplicate ids in the listing keep their first occurrence.
    pub fn from_listing(
        generation: u64,
        query: ListQuery,
        response: ListResponse,
        vocabulary: Option<BTreeSet<String>>,
    ) -> Self {
        let mut ids = Vec::with_capacity(response.items.len());
        let mut entities = HashMap::with_capacity(response.items.len());

        for listed in response.items {
            if entities.contains_key(&listed.id) {
                warn!(
                    "[EntityStore] Duplicate id '{}' in listing page {}, keeping first",
                    listed.id, query.page
                );
                continue;
            }
            ids.push(listed.id.clone());
            entities.insert(listed.id.clone(), Entity::from_listed(listed));
        }

        let window = PageWindow {
            generation,
            query,
            ids,
            total_count: response.total_count,
            has_more: response.has_more,
        };

        Self {
            generation,
            window: Some(window),
            entities,
            vocabulary,
            last_poll: PollState::Idle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn window(&self) -> Option<&PageWindow> {
        self.window.as_ref()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn vocabulary(&self) -> Option<&BTreeSet<String>> {
        self.vocabulary.as_ref()
    }

    /// Whether an enriched field with this name may be merged.
    pub fn accepts_field(&self, field: &str) -> bool {
        self.vocabulary
            .as_ref()
            .map(|vocabulary| vocabulary.contains(field))
            .unwrap_or(true)
    }

    /// Outcome of the most recent poll run of this generation.
    pub fn last_poll(&self) -> PollState {
        self.last_poll
    }

    /// Entities in page order.
    pub fn iter_window(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.window
            .iter()
            .flat_map(|window| window.ids.iter())
            .filter_map(move |id| self.entities.get(id))
    }

    /// Ids in the given state, in page order.
    pub fn ids_in_state(&self, state: EnrichmentState) -> Vec<EntityId> {
        self.iter_window()
            .filter(|entity| entity.enrichment_state == state)
            .map(|entity| entity.id.clone())
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<EntityId> {
        self.ids_in_state(EnrichmentState::Pending)
    }

    pub fn loading_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_loading()).count()
    }

    /// Reset an entity to `Unknown` so it re-enters the enrichment pipeline.
    ///
    /// This is the only backward transition. Enriched attributes and the error
    /// reason are cleared; base attributes and the recency stamp are kept so
    /// older in-flight responses still lose. Returns the previous state.
    pub fn reset(&mut self, id: &EntityId) -> Result<EnrichmentState, ValidationError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownEntity(id.to_string()))?;
        let previous = entity.enrichment_state;
        entity.enrichment_state = EnrichmentState::Unknown;
        entity.enriched_attributes = None;
        entity.error_reason = None;
        if self.last_poll == PollState::TimedOut {
            self.last_poll = PollState::Idle;
        }
        Ok(previous)
    }

    pub(crate) fn entity_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Record how a poll run of `generation` ended. Ignored for older generations.
    pub(crate) fn record_poll_state(&mut self, generation: u64, state: PollState) -> bool {
        if generation != self.generation {
            return false;
        }
        self.last_poll = state;
        true
    }
}
