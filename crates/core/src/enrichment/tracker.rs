//! Sync job tracker - decides which entities need enrichment work.
//!
//! `compute_work` is the single place where `unknown -> pending` originates. The
//! tracker also remembers which ids it already triggered in this session so a
//! lagging listing that still reports "not started" does not cause a second
//! trigger for the same id.

use log::debug;
use std::collections::HashSet;

use crate::entities::{EnrichmentState, EntityId, EntityStore};

/// Classification of one page window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkPlan {
    pub generation: u64,
    /// Ids the poll has to await, in page order
    pub pending_ids: Vec<EntityId>,
    /// Subset of `pending_ids` that needs an enrichment-start request
    pub to_trigger: Vec<EntityId>,
    /// Ids already `ready` or `failed`
    pub already_converged: Vec<EntityId>,
}

impl WorkPlan {
    /// Split the ids to trigger into request-sized chunks.
    pub fn trigger_batches(&self, batch_size: usize) -> Vec<Vec<EntityId>> {
        self.to_trigger
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

/// Session-scoped bookkeeping of enrichment requests.
///
/// The requested set lives exactly as long as the owning session and is not
/// bounded. Ids leave it only through `forget` or `trigger_failed`; dropping
/// an id earlier would let a lagging listing trigger it twice.
#[derive(Debug, Clone, Default)]
pub struct SyncJobTracker {
    requested: HashSet<EntityId>,
}

impl SyncJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every entity of the current window and flip the ones that need
    /// a trigger from `unknown` to `pending`.
    ///
    /// Calling this twice without new poll results yields an empty `to_trigger`
    /// the second time.
    pub fn compute_work(&mut self, store: &mut EntityStore) -> WorkPlan {
        let mut plan = WorkPlan {
            generation: store.generation(),
            ..WorkPlan::default()
        };

        let ids: Vec<EntityId> = store
            .window()
            .map(|window| window.ids.clone())
            .unwrap_or_default();

        for id in ids {
            let Some(entity) = store.entity_mut(&id) else {
                continue;
            };
            match entity.enrichment_state {
                EnrichmentState::Unknown => {
                    entity.enrichment_state = EnrichmentState::Pending;
                    if self.requested.insert(id.clone()) {
                        plan.to_trigger.push(id.clone());
                    } else {
                        debug!(
                            "[SyncJobTracker] '{}' already triggered this session, awaiting only",
                            id
                        );
                    }
                    plan.pending_ids.push(id);
                }
                EnrichmentState::Pending => {
                    self.requested.insert(id.clone());
                    plan.pending_ids.push(id);
                }
                EnrichmentState::Ready | EnrichmentState::Failed => {
                    plan.already_converged.push(id);
                }
            }
        }

        plan
    }

    /// Undo the `pending` flip for ids whose enrichment-start request failed.
    ///
    /// The ids return to `unknown` and are forgotten, so the next list fetch or
    /// an explicit refresh triggers them again. Returns the ids reverted.
    pub fn trigger_failed(&mut self, store: &mut EntityStore, ids: &[EntityId]) -> Vec<EntityId> {
        let mut reverted = Vec::new();
        for id in ids {
            self.requested.remove(id);
            let Some(entity) = store.entity_mut(id) else {
                continue;
            };
            if entity.enrichment_state == EnrichmentState::Pending {
                entity.enrichment_state = EnrichmentState::Unknown;
                reverted.push(id.clone());
            }
        }
        reverted
    }

    /// Forget that an id was triggered, making it eligible again.
    pub fn forget(&mut self, id: &EntityId) -> bool {
        self.requested.remove(id)
    }

    /// Ids triggered so far in this session.
    pub fn requested_count(&self) -> usize {
        self.requested.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        Attributes, EntityKind, ListQuery, ListResponse, ListedEntity, RemoteEnrichment,
    };

    fn store(generation: u64, rows: &[(&str, RemoteEnrichment)]) -> EntityStore {
        let items = rows
            .iter()
            .map(|(id, enrichment)| {
                ListedEntity::new(*id, EntityKind::Contact, Attributes::new())
                    .with_enrichment(enrichment.clone())
            })
            .collect();
        EntityStore::from_listing(
            generation,
            ListQuery::new(1, 25),
            ListResponse {
                items,
                total_count: rows.len() as u64,
                has_more: false,
            },
            None,
        )
    }

    fn ids(values: &[&str]) -> Vec<EntityId> {
        values.iter().map(|v| EntityId::from(*v)).collect()
    }

    fn complete() -> RemoteEnrichment {
        RemoteEnrichment::Complete {
            attributes: Attributes::new(),
            observed_at: None,
        }
    }

    #[test]
    fn test_classifies_by_state() {
        let mut store = store(
            1,
            &[
                ("a", RemoteEnrichment::NotStarted),
                ("b", RemoteEnrichment::Running),
                ("c", complete()),
                (
                    "d",
                    RemoteEnrichment::Failed {
                        reason: "x".into(),
                        observed_at: None,
                    },
                ),
            ],
        );
        let mut tracker = SyncJobTracker::new();

        let plan = tracker.compute_work(&mut store);

        assert_eq!(plan.generation, 1);
        assert_eq!(plan.to_trigger, ids(&["a"]));
        assert_eq!(plan.pending_ids, ids(&["a", "b"]));
        assert_eq!(plan.already_converged, ids(&["c", "d"]));
        assert_eq!(store.pending_ids(), ids(&["a", "b"]));
    }

    #[test]
    fn test_second_pass_does_not_retrigger() {
        let mut store = store(1, &[("a", RemoteEnrichment::NotStarted)]);
        let mut tracker = SyncJobTracker::new();

        let first = tracker.compute_work(&mut store);
        let second = tracker.compute_work(&mut store);

        assert_eq!(first.to_trigger, ids(&["a"]));
        assert!(second.to_trigger.is_empty());
        assert_eq!(second.pending_ids, ids(&["a"]));
    }

    #[test]
    fn test_lagging_listing_does_not_retrigger_in_same_session() {
        let mut tracker = SyncJobTracker::new();
        let mut first_page = store(1, &[("a", RemoteEnrichment::NotStarted)]);
        tracker.compute_work(&mut first_page);

        // Re-fetch still reports "not started" for the id we already triggered.
        let mut refetched = store(2, &[("a", RemoteEnrichment::NotStarted)]);
        let plan = tracker.compute_work(&mut refetched);

        assert!(plan.to_trigger.is_empty());
        assert_eq!(plan.pending_ids, ids(&["a"]));
    }

    #[test]
    fn test_trigger_failure_reverts_to_unknown() {
        let mut store = store(
            1,
            &[
                ("a", RemoteEnrichment::NotStarted),
                ("b", RemoteEnrichment::NotStarted),
            ],
        );
        let mut tracker = SyncJobTracker::new();
        tracker.compute_work(&mut store);

        let reverted = tracker.trigger_failed(&mut store, &ids(&["b"]));

        assert_eq!(reverted, ids(&["b"]));
        assert_eq!(
            store.get(&EntityId::from("b")).unwrap().enrichment_state,
            EnrichmentState::Unknown
        );
        assert_eq!(tracker.requested_count(), 1);

        let retry = tracker.compute_work(&mut store);
        assert_eq!(retry.to_trigger, ids(&["b"]));
    }

    #[test]
    fn test_trigger_batches_chunking() {
        let plan = WorkPlan {
            generation: 1,
            pending_ids: ids(&["a", "b", "c"]),
            to_trigger: ids(&["a", "b", "c"]),
            already_converged: vec![],
        };
        let batches = plan.trigger_batches(2);
        assert_eq!(batches, vec![ids(&["a", "b"]), ids(&["c"])]);
        assert_eq!(plan.trigger_batches(0).len(), 3);
    }

    #[test]
    fn test_nothing_to_do_when_all_converged() {
        let mut store = store(1, &[("a", complete()), ("b", complete())]);
        let plan = SyncJobTracker::new().compute_work(&mut store);
        assert!(plan.pending_ids.is_empty());
        assert!(plan.to_trigger.is_empty());
    }
}
