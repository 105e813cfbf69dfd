//! Merge engine - folds status results into the entity store.
//!
//! `merge` is pure and total: it takes the store by value, applies every item it
//! can, and returns the new store together with a report of what happened.
//! Unresolvable items are skipped and only show up in the report, which the
//! caller logs.

use std::collections::BTreeSet;

use crate::entities::{
    Attributes, BatchResult, EnrichmentState, Entity, EntityId, EntityStore, RemoteStatus,
    StatusItem,
};

/// What a merge did, item by item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entities whose visible data changed
    pub changed: Vec<EntityId>,
    pub became_ready: Vec<EntityId>,
    pub became_failed: Vec<EntityId>,
    /// Ids not present in the store (superseded page)
    pub unknown_ids: Vec<EntityId>,
    /// Items older than the entity's last observation
    pub stale_items: Vec<EntityId>,
    /// Items that would move an entity backward or skip `pending`
    pub rejected: Vec<EntityId>,
    /// Enriched fields dropped for colliding with base fields or the vocabulary
    pub dropped_fields: usize,
    /// The whole batch belonged to an older generation and was ignored
    pub stale_generation: bool,
}

impl MergeReport {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Number of items that were not applied.
    pub fn skipped(&self) -> usize {
        self.unknown_ids.len() + self.stale_items.len() + self.rejected.len()
    }
}

/// Result of a merge: the new store and the report.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub store: EntityStore,
    pub report: MergeReport,
}

/// Fold one status batch into the store.
pub fn merge(mut store: EntityStore, batch: &BatchResult) -> MergeOutcome {
    let mut report = MergeReport::default();

    if batch.generation != store.generation() {
        report.stale_generation = true;
        return MergeOutcome { store, report };
    }

    let vocabulary = store.vocabulary().cloned();

    for item in &batch.items {
        let Some(entity) = store.entity_mut(&item.id) else {
            report.unknown_ids.push(item.id.clone());
            continue;
        };
        apply_item(entity, item, vocabulary.as_ref(), &mut report);
    }

    MergeOutcome { store, report }
}

fn apply_item(
    entity: &mut Entity,
    item: &StatusItem,
    vocabulary: Option<&BTreeSet<String>>,
    report: &mut MergeReport,
) {
    if let Some(last) = entity.last_observed_at {
        if item.observed_at < last {
            report.stale_items.push(item.id.clone());
            return;
        }
    }

    let incoming = item.enriched_attributes.as_ref();
    let current = entity.enrichment_state;
    let next = item.state.enrichment_state();

    match (current, next) {
        // Only the tracker moves an entity out of `unknown`.
        (EnrichmentState::Unknown, _) => {
            report.rejected.push(item.id.clone());
        }
        // Same-state reports may carry further enriched fields.
        (EnrichmentState::Pending, EnrichmentState::Pending)
        | (EnrichmentState::Ready, EnrichmentState::Ready) => {
            entity.last_observed_at = Some(item.observed_at);
            if union_enriched(entity, incoming, vocabulary, report) {
                report.changed.push(item.id.clone());
            }
        }
        (from, to) if from.can_transition_to(to) => {
            entity.last_observed_at = Some(item.observed_at);
            if to == EnrichmentState::Failed {
                entity.record_failure(item.error_reason.as_deref());
                report.became_failed.push(item.id.clone());
            } else {
                entity.enrichment_state = to;
                entity.error_reason = None;
                if entity.enriched_attributes.is_none() {
                    entity.enriched_attributes = Some(Attributes::new());
                }
                union_enriched(entity, incoming, vocabulary, report);
                report.became_ready.push(item.id.clone());
            }
            report.changed.push(item.id.clone());
        }
        // Terminal states never move.
        _ => {
            report.rejected.push(item.id.clone());
        }
    }
}

/// Shallow union of incoming enriched fields. Returns true if anything changed.
///
/// Fields colliding with base attributes or outside the vocabulary are dropped,
/// and `null` never lands in the map.
fn union_enriched(
    entity: &mut Entity,
    incoming: Option<&Attributes>,
    vocabulary: Option<&BTreeSet<String>>,
    report: &mut MergeReport,
) -> bool {
    let Some(incoming) = incoming else {
        return false;
    };

    let mut changed = false;
    for (key, value) in incoming {
        let allowed = vocabulary.map(|v| v.contains(key)).unwrap_or(true);
        if !allowed || entity.base_attributes.contains_key(key) {
            report.dropped_fields += 1;
            continue;
        }
        if value.is_null() {
            continue;
        }
        let enriched = entity.enriched_attributes.get_or_insert_with(Attributes::new);
        if enriched.get(key) != Some(value) {
            enriched.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        EntityKind, ListQuery, ListResponse, ListedEntity, RemoteEnrichment,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Store at generation 1 with every listed id already pending.
    fn pending_store(ids: &[&str]) -> EntityStore {
        let items = ids
            .iter()
            .map(|id| {
                ListedEntity::new(*id, EntityKind::Call, attrs(&[("duration", json!(42))]))
                    .with_enrichment(RemoteEnrichment::Running)
            })
            .collect();
        EntityStore::from_listing(
            1,
            ListQuery::new(1, 25),
            ListResponse {
                items,
                total_count: ids.len() as u64,
                has_more: false,
            },
            Some(EntityKind::Call.default_vocabulary()),
        )
    }

    fn state(store: &EntityStore, id: &str) -> EnrichmentState {
        store.get(&EntityId::from(id)).unwrap().enrichment_state
    }

    #[test]
    fn test_ready_item_completes_pending_entity() {
        let store = pending_store(&["1"]);
        let batch = BatchResult::new(
            1,
            vec![StatusItem::ready("1", attrs(&[("ai_grade", json!("A"))]), t0())],
        );

        let MergeOutcome { store, report } = merge(store, &batch);

        let entity = store.get(&EntityId::from("1")).unwrap();
        assert_eq!(entity.enrichment_state, EnrichmentState::Ready);
        assert_eq!(entity.attribute("ai_grade"), Some(&json!("A")));
        assert_eq!(entity.last_observed_at, Some(t0()));
        assert_eq!(report.became_ready, vec![EntityId::from("1")]);
    }

    #[test]
    fn test_failed_item_records_reason() {
        let store = pending_store(&["7"]);
        let batch = BatchResult::new(1, vec![StatusItem::failed("7", "analysis_error", t0())]);

        let outcome = merge(store, &batch);

        let entity = outcome.store.get(&EntityId::from("7")).unwrap();
        assert_eq!(entity.enrichment_state, EnrichmentState::Failed);
        assert_eq!(entity.error_reason.as_deref(), Some("analysis_error"));
        assert!(entity.enriched_attributes.is_none());
        assert_eq!(entity.attribute("duration"), Some(&json!(42)));
    }

    #[test]
    fn test_failed_item_without_reason_gets_placeholder() {
        let store = pending_store(&["7"]);
        let mut item = StatusItem::failed("7", "", t0());
        item.error_reason = None;

        let outcome = merge(store, &BatchResult::new(1, vec![item]));
        assert_eq!(
            outcome.store.get(&EntityId::from("7")).unwrap().error_reason.as_deref(),
            Some("unspecified_error")
        );
    }

    #[test]
    fn test_older_observation_is_noop() {
        let store = pending_store(&["1"]);
        let first = BatchResult::new(1, vec![StatusItem::failed("1", "quota", t0())]);
        let store = merge(store, &first).store;

        // Response issued earlier but arriving later.
        let late = BatchResult::new(
            1,
            vec![StatusItem::ready(
                "1",
                attrs(&[("ai_grade", json!("A"))]),
                t0() - Duration::seconds(5),
            )],
        );
        let MergeOutcome { store, report } = merge(store, &late);

        assert_eq!(state(&store, "1"), EnrichmentState::Failed);
        assert_eq!(report.stale_items, vec![EntityId::from("1")]);
        assert!(!report.has_changes());
    }

    #[test]
    fn test_terminal_states_never_regress() {
        let store = pending_store(&["1"]);
        let store = merge(
            store,
            &BatchResult::new(1, vec![StatusItem::ready("1", Attributes::new(), t0())]),
        )
        .store;

        let later = t0() + Duration::seconds(10);
        let MergeOutcome { store, report } = merge(
            store,
            &BatchResult::new(
                1,
                vec![
                    StatusItem::pending("1", later),
                    StatusItem::failed("1", "late failure", later),
                ],
            ),
        );

        assert_eq!(state(&store, "1"), EnrichmentState::Ready);
        assert_eq!(report.rejected.len(), 2);
    }

    #[test]
    fn test_unknown_entity_cannot_skip_pending() {
        let mut store = pending_store(&["1"]);
        store.reset(&EntityId::from("1")).unwrap();

        let MergeOutcome { store, report } = merge(
            store,
            &BatchResult::new(1, vec![StatusItem::ready("1", Attributes::new(), t0())]),
        );

        assert_eq!(state(&store, "1"), EnrichmentState::Unknown);
        assert_eq!(report.rejected, vec![EntityId::from("1")]);
    }

    #[test]
    fn test_state_changes_follow_transition_table() {
        let listed = [
            ("u", RemoteEnrichment::NotStarted),
            ("p", RemoteEnrichment::Running),
            (
                "r",
                RemoteEnrichment::Complete {
                    attributes: Attributes::new(),
                    observed_at: None,
                },
            ),
            (
                "f",
                RemoteEnrichment::Failed {
                    reason: "quota".into(),
                    observed_at: None,
                },
            ),
        ];
        let items = listed
            .iter()
            .map(|(id, enrichment)| {
                ListedEntity::new(*id, EntityKind::Call, Attributes::new())
                    .with_enrichment(enrichment.clone())
            })
            .collect();
        let store = EntityStore::from_listing(
            1,
            ListQuery::new(1, 25),
            ListResponse {
                items,
                total_count: 4,
                has_more: false,
            },
            None,
        );

        for (id, _) in &listed {
            for remote in [RemoteStatus::Pending, RemoteStatus::Ready, RemoteStatus::Failed] {
                let before = state(&store, id);
                let item = StatusItem {
                    id: EntityId::from(*id),
                    state: remote,
                    enriched_attributes: None,
                    error_reason: None,
                    observed_at: t0(),
                };
                let outcome = merge(store.clone(), &BatchResult::new(1, vec![item]));
                let after = state(&outcome.store, id);

                let next = remote.enrichment_state();
                let in_place = before == next && before != EnrichmentState::Unknown;
                if before.can_transition_to(next) && before != EnrichmentState::Unknown {
                    assert_eq!(after, next, "{} -> {:?}", before, remote);
                } else {
                    assert_eq!(after, before, "{} -> {:?}", before, remote);
                    assert_eq!(
                        outcome.report.rejected.is_empty(),
                        in_place,
                        "{} -> {:?}",
                        before,
                        remote
                    );
                }
            }
        }
    }

    #[test]
    fn test_absent_ids_are_ignored() {
        let store = pending_store(&["1"]);
        let MergeOutcome { store, report } = merge(
            store,
            &BatchResult::new(1, vec![StatusItem::ready("99", Attributes::new(), t0())]),
        );

        assert_eq!(report.unknown_ids, vec![EntityId::from("99")]);
        assert_eq!(store.len(), 1);
        assert_eq!(state(&store, "1"), EnrichmentState::Pending);
    }

    #[test]
    fn test_stale_generation_batch_is_dropped() {
        let store = pending_store(&["1"]);
        let MergeOutcome { store, report } = merge(
            store,
            &BatchResult::new(0, vec![StatusItem::ready("1", Attributes::new(), t0())]),
        );

        assert!(report.stale_generation);
        assert_eq!(state(&store, "1"), EnrichmentState::Pending);
    }

    #[test]
    fn test_enrichment_never_touches_base_fields() {
        let store = pending_store(&["1"]);
        let incoming = attrs(&[
            ("duration", json!(null)),
            ("ai_grade", json!("C")),
            ("owner_email", json!("x@example.com")),
        ]);
        let MergeOutcome { store, report } =
            merge(store, &BatchResult::new(1, vec![StatusItem::ready("1", incoming, t0())]));

        let entity = store.get(&EntityId::from("1")).unwrap();
        assert_eq!(entity.base_attributes.get("duration"), Some(&json!(42)));
        let enriched = entity.enriched_attributes.as_ref().unwrap();
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched.get("ai_grade"), Some(&json!("C")));
        assert_eq!(report.dropped_fields, 2);
    }

    #[test]
    fn test_partial_payload_while_pending() {
        let store = pending_store(&["1"]);
        let partial = StatusItem::pending("1", t0()).with_attributes(attrs(&[("tasks", json!(["call back"]))]));

        let MergeOutcome { store, report } = merge(store, &BatchResult::new(1, vec![partial]));

        let entity = store.get(&EntityId::from("1")).unwrap();
        assert!(entity.is_loading());
        assert_eq!(entity.attribute("tasks"), Some(&json!(["call back"])));
        assert_eq!(report.changed, vec![EntityId::from("1")]);

        // The full payload later adds the rest without losing the partial field.
        let full = StatusItem::ready(
            "1",
            attrs(&[("ai_grade", json!("B")), ("ai_summary", json!(null))]),
            t0() + Duration::seconds(2),
        );
        let store = merge(store, &BatchResult::new(1, vec![full])).store;
        let entity = store.get(&EntityId::from("1")).unwrap();
        assert_eq!(entity.enrichment_state, EnrichmentState::Ready);
        assert_eq!(entity.attribute("tasks"), Some(&json!(["call back"])));
        assert_eq!(entity.attribute("ai_grade"), Some(&json!("B")));
        assert!(entity.attribute("ai_summary").is_none());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let store = pending_store(&["1", "2"]);
        let batch = BatchResult::new(
            1,
            vec![
                StatusItem::ready("1", attrs(&[("ai_grade", json!("A"))]), t0()),
                StatusItem::pending("2", t0()),
            ],
        );

        let once = merge(store, &batch).store;
        let MergeOutcome { store: twice, report } = merge(once.clone(), &batch);

        assert!(!report.has_changes());
        for id in ["1", "2"] {
            assert_eq!(once.get(&EntityId::from(id)), twice.get(&EntityId::from(id)));
        }
    }
}
