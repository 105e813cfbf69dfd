//! View projector - the read-only view the presentation layer queries.
//!
//! Projection is a pure function of the store, the page window and the
//! client-side filter/sort. It never mutates the store and cannot trigger
//! enrichment.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::entities::{
    Attributes, EnrichmentState, Entity, EntityId, EntityKind, EntityStore, PageWindow, PollState,
};

/// Client-side row filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFilter {
    /// Keep only rows in one of these states. Empty keeps all.
    #[serde(default)]
    pub states: Vec<EnrichmentState>,
    /// Keep only rows whose merged attribute equals the value.
    #[serde(default)]
    pub attribute_equals: Vec<(String, Value)>,
    /// Case-insensitive substring match over string attribute values.
    #[serde(default)]
    pub search: Option<String>,
}

impl ViewFilter {
    pub fn with_states(mut self, states: impl IntoIterator<Item = EnrichmentState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attribute_equals.push((key.into(), value));
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    fn matches(&self, entity: &Entity) -> bool {
        if !self.states.is_empty() && !self.states.contains(&entity.enrichment_state) {
            return false;
        }
        let all_equal = self
            .attribute_equals
            .iter()
            .all(|(key, expected)| entity.attribute(key) == Some(expected));
        if !all_equal {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                entity
                    .base_attributes
                    .values()
                    .chain(entity.enriched_attributes.iter().flat_map(|e| e.values()))
                    .any(|value| value_contains(value, &needle))
            }
        }
    }
}

fn value_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string().contains(needle),
        _ => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "field", rename_all = "snake_case")]
pub enum SortKey {
    /// Keep the listing order returned by the backend
    #[default]
    PageOrder,
    /// Sort by a merged attribute; rows without it go last
    Attribute(String),
    /// Group by enrichment state (unknown, pending, ready, failed)
    State,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn by_attribute(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            key: SortKey::Attribute(field.into()),
            direction,
        }
    }
}

/// Per-row enrichment indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncIndicator {
    #[default]
    None,
    /// Enrichment is being awaited
    Loading,
    /// Polling timed out; the server job may still complete
    StillSyncing,
    /// Enrichment failed; row shows base data only
    Failed,
}

/// One row of the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedRow {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Position in the backend listing order
    pub position: usize,
    pub attributes: Attributes,
    pub state: EnrichmentState,
    pub indicator: SyncIndicator,
    pub error_reason: Option<String>,
}

impl ProjectedRow {
    pub fn is_loading(&self) -> bool {
        self.state == EnrichmentState::Pending
    }
}

/// Projection of the current page plus paging metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub generation: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub has_more: bool,
    pub page_count: u64,
    pub rows: Vec<ProjectedRow>,
    pub loading_count: usize,
}

impl PageView {
    pub fn row(&self, id: &EntityId) -> Option<&ProjectedRow> {
        self.rows.iter().find(|row| &row.id == id)
    }
}

/// Stateless projection functions.
pub struct ViewProjector;

impl ViewProjector {
    /// Ordered rows of `window` after filtering and sorting.
    ///
    /// A window from another generation than the store projects to nothing.
    pub fn project(
        store: &EntityStore,
        window: &PageWindow,
        filter: &ViewFilter,
        sort: &SortSpec,
    ) -> Vec<ProjectedRow> {
        if window.generation != store.generation() {
            return Vec::new();
        }

        let timed_out = store.last_poll() == PollState::TimedOut;
        let mut rows: Vec<ProjectedRow> = window
            .ids
            .iter()
            .enumerate()
            .filter_map(|(position, id)| store.get(id).map(|entity| (position, entity)))
            .filter(|(_, entity)| filter.matches(entity))
            .map(|(position, entity)| to_row(position, entity, timed_out))
            .collect();

        sort_rows(&mut rows, sort);
        rows
    }

    /// Projection of the store's own window with paging metadata.
    pub fn page_view(store: &EntityStore, filter: &ViewFilter, sort: &SortSpec) -> PageView {
        let Some(window) = store.window() else {
            return PageView {
                generation: store.generation(),
                page: 1,
                page_size: 0,
                total_count: 0,
                has_more: false,
                page_count: 1,
                rows: Vec::new(),
                loading_count: 0,
            };
        };

        let rows = Self::project(store, window, filter, sort);
        PageView {
            generation: store.generation(),
            page: window.page(),
            page_size: window.page_size(),
            total_count: window.total_count,
            has_more: window.has_more,
            page_count: window.page_count(),
            loading_count: store.loading_count(),
            rows,
        }
    }

    /// True iff the entity is awaiting enrichment.
    pub fn is_loading(store: &EntityStore, id: &EntityId) -> bool {
        store.get(id).map(Entity::is_loading).unwrap_or(false)
    }
}

fn to_row(position: usize, entity: &Entity, timed_out: bool) -> ProjectedRow {
    let indicator = match entity.enrichment_state {
        EnrichmentState::Pending if timed_out => SyncIndicator::StillSyncing,
        EnrichmentState::Pending => SyncIndicator::Loading,
        EnrichmentState::Failed => SyncIndicator::Failed,
        EnrichmentState::Unknown | EnrichmentState::Ready => SyncIndicator::None,
    };
    ProjectedRow {
        id: entity.id.clone(),
        kind: entity.kind,
        position,
        attributes: entity.merged_attributes(),
        state: entity.enrichment_state,
        indicator,
        error_reason: entity.error_reason.clone(),
    }
}

fn sort_rows(rows: &mut [ProjectedRow], sort: &SortSpec) {
    let directed = |ordering: Ordering| match sort.direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    };

    match &sort.key {
        SortKey::PageOrder => rows.sort_by(|a, b| directed(a.position.cmp(&b.position))),
        SortKey::State => rows.sort_by(|a, b| {
            directed(state_rank(a.state).cmp(&state_rank(b.state)))
                .then(a.position.cmp(&b.position))
        }),
        SortKey::Attribute(field) => rows.sort_by(|a, b| {
            match (a.attributes.get(field), b.attributes.get(field)) {
                (Some(left), Some(right)) => directed(compare_values(left, right)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then(a.position.cmp(&b.position))
        }),
    }
}

fn state_rank(state: EnrichmentState) -> u8 {
    match state {
        EnrichmentState::Unknown => 0,
        EnrichmentState::Pending => 1,
        EnrichmentState::Ready => 2,
        EnrichmentState::Failed => 3,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ if type_rank(left) != type_rank(right) => type_rank(left).cmp(&type_rank(right)),
        _ => left.to_string().cmp(&right.to_string()),
    }
}
