//! Property-based integration tests for the merge engine and job tracker.
//!
//! These tests check that the store-level guarantees hold for arbitrary status
//! sequences, using the `proptest` crate for random test case generation.

use chrono::{DateTime, TimeZone, Utc};
use enrichsync_core::enrichment::{merge, SyncJobTracker};
use enrichsync_core::{
    Attributes, BatchResult, EnrichmentState, EntityId, EntityKind, EntityStore, ListQuery,
    ListResponse, ListedEntity, RemoteEnrichment, RemoteStatus, StatusItem,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;

const ENTITY_COUNT: usize = 6;

// =============================================================================
// Generators
// =============================================================================

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Generates a remote status.
fn arb_status() -> impl Strategy<Value = RemoteStatus> {
    prop_oneof![
        Just(RemoteStatus::Pending),
        Just(RemoteStatus::Ready),
        Just(RemoteStatus::Failed),
    ]
}

/// Generates an attribute value, nulls included.
fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

/// Generates enriched payloads mixing vocabulary fields, base fields and
/// fields outside the vocabulary.
fn arb_attributes() -> impl Strategy<Value = Attributes> {
    let keys = prop::sample::select(vec![
        "tasks",
        "conversations",
        "touch_summary",
        "last_touch_at",
        "name",
        "email",
        "owner_email",
    ]);
    proptest::collection::btree_map(keys.prop_map(String::from), arb_value(), 0..4)
}

/// Generates a status item for a known or unknown id.
fn arb_status_item() -> impl Strategy<Value = StatusItem> {
    (
        0..ENTITY_COUNT + 2,
        arb_status(),
        proptest::option::of(arb_attributes()),
        proptest::option::of("[a-z_]{0,12}"),
        0i64..60,
    )
        .prop_map(|(id, state, attributes, reason, secs)| StatusItem {
            id: EntityId::from(id as u64),
            state,
            enriched_attributes: attributes,
            error_reason: reason,
            observed_at: at(secs),
        })
}

/// Generates a sequence of status batches.
fn arb_batches() -> impl Strategy<Value = Vec<Vec<StatusItem>>> {
    proptest::collection::vec(proptest::collection::vec(arb_status_item(), 0..8), 1..8)
}

/// Generates the listing-time enrichment progress of one row.
fn arb_listed_progress() -> impl Strategy<Value = RemoteEnrichment> {
    prop_oneof![
        Just(RemoteEnrichment::NotStarted),
        Just(RemoteEnrichment::Running),
        Just(RemoteEnrichment::Complete {
            attributes: Attributes::new(),
            observed_at: None,
        }),
        Just(RemoteEnrichment::Failed {
            reason: "analysis_error".to_string(),
            observed_at: None,
        }),
    ]
}

fn listing(progress: &[RemoteEnrichment]) -> ListResponse {
    ListResponse {
        items: progress
            .iter()
            .enumerate()
            .map(|(index, enrichment)| {
                let base: Attributes = [
                    ("name".to_string(), json!(format!("Contact {}", index))),
                    ("email".to_string(), json!(format!("c{}@example.com", index))),
                ]
                .into_iter()
                .collect();
                ListedEntity::new(index as u64, EntityKind::Contact, base)
                    .with_enrichment(enrichment.clone())
            })
            .collect(),
        total_count: progress.len() as u64,
        has_more: false,
    }
}

fn store_for(generation: u64, progress: &[RemoteEnrichment]) -> EntityStore {
    EntityStore::from_listing(
        generation,
        ListQuery::new(1, 25),
        listing(progress),
        Some(EntityKind::Contact.default_vocabulary()),
    )
}

fn pending_store(generation: u64) -> EntityStore {
    store_for(generation, &vec![RemoteEnrichment::Running; ENTITY_COUNT])
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Once an entity is ready or failed, no status item moves it again, and
    /// nothing ever sends it back to unknown.
    #[test]
    fn prop_terminal_states_are_final(batches in arb_batches()) {
        let mut store = pending_store(1);

        for items in batches {
            let before: Vec<(EntityId, EnrichmentState)> = store
                .iter_window()
                .map(|entity| (entity.id.clone(), entity.enrichment_state))
                .collect();

            store = merge(store, &BatchResult::new(1, items)).store;

            for (id, previous) in before {
                let current = store.get(&id).unwrap().enrichment_state;
                prop_assert_ne!(current, EnrichmentState::Unknown);
                if previous.is_terminal() {
                    prop_assert_eq!(current, previous);
                }
            }
        }
    }

    /// Base attributes survive any merge sequence unchanged.
    #[test]
    fn prop_base_attributes_preserved(batches in arb_batches()) {
        let mut store = pending_store(1);
        let original: Vec<Attributes> = store
            .iter_window()
            .map(|entity| entity.base_attributes.clone())
            .collect();

        for items in batches {
            store = merge(store, &BatchResult::new(1, items)).store;
        }

        let current: Vec<Attributes> = store
            .iter_window()
            .map(|entity| entity.base_attributes.clone())
            .collect();
        prop_assert_eq!(current, original);

        for entity in store.iter_window() {
            if let Some(enriched) = &entity.enriched_attributes {
                for (key, value) in enriched {
                    prop_assert!(!entity.base_attributes.contains_key(key));
                    prop_assert!(store.accepts_field(key));
                    prop_assert!(!value.is_null());
                }
            }
        }
    }

    /// Failed entities always carry a reason and no enriched attributes.
    #[test]
    fn prop_failed_entities_have_reason(batches in arb_batches()) {
        let mut store = pending_store(1);
        for items in batches {
            store = merge(store, &BatchResult::new(1, items)).store;
        }

        for entity in store.iter_window() {
            if entity.enrichment_state == EnrichmentState::Failed {
                prop_assert!(entity.error_reason.as_deref().is_some_and(|r| !r.trim().is_empty()));
                prop_assert!(entity.enriched_attributes.is_none());
            }
        }
    }

    /// Without new poll results, a second classification triggers nothing and
    /// no id is ever triggered twice.
    #[test]
    fn prop_triggering_is_idempotent(
        progress in proptest::collection::vec(arb_listed_progress(), 0..ENTITY_COUNT)
    ) {
        let mut store = store_for(1, &progress);
        let mut tracker = SyncJobTracker::new();

        let first = tracker.compute_work(&mut store);
        let second = tracker.compute_work(&mut store);
        prop_assert!(second.to_trigger.is_empty());
        prop_assert_eq!(&second.pending_ids, &first.pending_ids);

        let unique: HashSet<&EntityId> = first.to_trigger.iter().collect();
        prop_assert_eq!(unique.len(), first.to_trigger.len());

        // A lagging re-fetch of the same page does not trigger again either.
        let mut reloaded = store_for(2, &progress);
        let third = tracker.compute_work(&mut reloaded);
        prop_assert!(third.to_trigger.is_empty());

        for id in &first.to_trigger {
            prop_assert!(first.pending_ids.contains(id));
        }
        for entity in store.iter_window() {
            prop_assert_ne!(entity.enrichment_state, EnrichmentState::Unknown);
        }
    }

    /// A batch tagged with another generation leaves the store untouched.
    #[test]
    fn prop_stale_generation_is_noop(items in proptest::collection::vec(arb_status_item(), 0..8)) {
        let store = pending_store(2);
        let snapshot: Vec<_> = store.iter_window().cloned().collect();

        let outcome = merge(store, &BatchResult::new(1, items));

        prop_assert!(outcome.report.stale_generation);
        prop_assert!(!outcome.report.has_changes());
        let after: Vec<_> = outcome.store.iter_window().cloned().collect();
        prop_assert_eq!(after, snapshot);
    }

    /// Merging the same batch twice changes nothing the second time.
    #[test]
    fn prop_merge_is_idempotent(items in proptest::collection::vec(arb_status_item(), 0..8)) {
        // One item per id; equal timestamps with conflicting payloads are
        // resolved by batch order, which a replay would redo.
        let mut seen = HashSet::new();
        let items: Vec<StatusItem> = items
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect();
        let batch = BatchResult::new(1, items);
        let once = merge(pending_store(1), &batch).store;
        let snapshot: Vec<_> = once.iter_window().cloned().collect();

        let twice = merge(once, &batch);
        prop_assert!(!twice.report.has_changes());
        let after: Vec<_> = twice.store.iter_window().cloned().collect();
        prop_assert_eq!(after, snapshot);
    }
}
