//! Entity domain models and the payloads exchanged with the listing backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::entity_types::{Attributes, EntityId, EntityKind};
use crate::constants::UNSPECIFIED_FAILURE_REASON;
use crate::errors::ValidationError;

// =============================================================================
// Enrichment State
// =============================================================================

/// Lifecycle of the asynchronous enrichment of one entity.
///
/// Legal transitions are `Unknown -> Pending -> {Ready, Failed}`. The only way
/// back is an explicit refresh, which resets the entity to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    /// Enrichment was never requested
    #[default]
    Unknown,
    /// A server-side job is running and awaited by a poll
    Pending,
    /// Terminal success, enriched attributes populated
    Ready,
    /// Terminal error, reason recorded
    Failed,
}

impl EnrichmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrichmentState::Ready | EnrichmentState::Failed)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: EnrichmentState) -> bool {
        matches!(
            (self, next),
            (EnrichmentState::Unknown, EnrichmentState::Pending)
                | (EnrichmentState::Pending, EnrichmentState::Ready)
                | (EnrichmentState::Pending, EnrichmentState::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentState::Unknown => "unknown",
            EnrichmentState::Pending => "pending",
            EnrichmentState::Ready => "ready",
            EnrichmentState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EnrichmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Entity
// =============================================================================

/// One business record (contact or call) tracked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Populated at list-fetch time, never cleared by enrichment.
    pub base_attributes: Attributes,
    pub enriched_attributes: Option<Attributes>,
    pub enrichment_state: EnrichmentState,
    pub error_reason: Option<String>,
    /// Most recent status read applied to this entity.
    pub last_observed_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Create an entity that has never been enriched.
    pub fn new(id: impl Into<EntityId>, kind: EntityKind, base_attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            kind,
            base_attributes,
            enriched_attributes: None,
            enrichment_state: EnrichmentState::Unknown,
            error_reason: None,
            last_observed_at: None,
        }
    }

    /// Build the stored entity from a listing row.
    ///
    /// Rows the backend already reports as complete are created `Ready`; this is
    /// creation, not a state transition.
    pub fn from_listed(listed: ListedEntity) -> Self {
        let mut entity = Entity::new(listed.id, listed.kind, listed.base_attributes);
        match listed.enrichment {
            RemoteEnrichment::NotStarted => {}
            RemoteEnrichment::Running => {
                entity.enrichment_state = EnrichmentState::Pending;
            }
            RemoteEnrichment::Complete {
                attributes,
                observed_at,
            } => {
                entity.enrichment_state = EnrichmentState::Ready;
                entity.enriched_attributes = Some(attributes);
                entity.last_observed_at = observed_at;
            }
            RemoteEnrichment::Failed {
                reason,
                observed_at,
            } => {
                entity.record_failure(Some(&reason));
                entity.last_observed_at = observed_at;
            }
        }
        entity
    }

    /// Mark the entity failed and drop partial enrichment. A missing or blank
    /// reason is recorded as `unspecified_error`.
    pub(crate) fn record_failure(&mut self, reason: Option<&str>) {
        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(UNSPECIFIED_FAILURE_REASON);
        self.enrichment_state = EnrichmentState::Failed;
        self.enriched_attributes = None;
        self.error_reason = Some(reason.to_string());
    }

    pub fn is_loading(&self) -> bool {
        self.enrichment_state == EnrichmentState::Pending
    }

    /// Base and enriched attributes as one map. Base fields win on collision.
    pub fn merged_attributes(&self) -> Attributes {
        let mut merged = self.enriched_attributes.clone().unwrap_or_default();
        for (key, value) in &self.base_attributes {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Looks up a field in base attributes first, then enriched attributes.
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.base_attributes.get(key).or_else(|| {
            self.enriched_attributes
                .as_ref()
                .and_then(|enriched| enriched.get(key))
        })
    }
}

// =============================================================================
// Listing payloads
// =============================================================================

/// Enrichment progress as reported by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteEnrichment {
    #[default]
    NotStarted,
    Running,
    Complete {
        #[serde(default)]
        attributes: Attributes,
        #[serde(default)]
        observed_at: Option<DateTime<Utc>>,
    },
    Failed {
        reason: String,
        #[serde(default)]
        observed_at: Option<DateTime<Utc>>,
    },
}

/// One row of a listing response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub base_attributes: Attributes,
    #[serde(default)]
    pub enrichment: RemoteEnrichment,
}

impl ListedEntity {
    pub fn new(id: impl Into<EntityId>, kind: EntityKind, base_attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            kind,
            base_attributes,
            enrichment: RemoteEnrichment::NotStarted,
        }
    }

    pub fn with_enrichment(mut self, enrichment: RemoteEnrichment) -> Self {
        self.enrichment = enrichment;
        self
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub items: Vec<ListedEntity>,
    pub total_count: u64,
    pub has_more: bool,
}

/// Page, size and server-side filters of a listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub search: Option<String>,
}

impl ListQuery {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            filters: BTreeMap::new(),
            search: None,
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = if search.trim().is_empty() {
            None
        } else {
            Some(search)
        };
        self
    }

    /// Zero-based offset of the first row of this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn validate(&self, max_page_size: u32) -> Result<(), ValidationError> {
        if self.page == 0 {
            return Err(ValidationError::InvalidPage(self.page));
        }
        if self.page_size == 0 || self.page_size > max_page_size {
            return Err(ValidationError::InvalidPageSize {
                size: self.page_size,
                max: max_page_size,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Status payloads
// =============================================================================

/// Per-id state reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Pending,
    Ready,
    Failed,
}

impl RemoteStatus {
    /// Local state this report asks the entity to be in.
    pub fn enrichment_state(&self) -> EnrichmentState {
        match self {
            RemoteStatus::Pending => EnrichmentState::Pending,
            RemoteStatus::Ready => EnrichmentState::Ready,
            RemoteStatus::Failed => EnrichmentState::Failed,
        }
    }
}

/// One entry of a status batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusItem {
    pub id: EntityId,
    pub state: RemoteStatus,
    #[serde(default)]
    pub enriched_attributes: Option<Attributes>,
    #[serde(default)]
    pub error_reason: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl StatusItem {
    pub fn ready(
        id: impl Into<EntityId>,
        attributes: Attributes,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            state: RemoteStatus::Ready,
            enriched_attributes: Some(attributes),
            error_reason: None,
            observed_at,
        }
    }

    pub fn pending(id: impl Into<EntityId>, observed_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            state: RemoteStatus::Pending,
            enriched_attributes: None,
            error_reason: None,
            observed_at,
        }
    }

    pub fn failed(
        id: impl Into<EntityId>,
        reason: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            state: RemoteStatus::Failed,
            enriched_attributes: None,
            error_reason: Some(reason.into()),
            observed_at,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.enriched_attributes = Some(attributes);
        self
    }
}

/// Status items tagged with the store generation whose poll requested them.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub generation: u64,
    pub items: Vec<StatusItem>,
}

impl BatchResult {
    pub fn new(generation: u64, items: Vec<StatusItem>) -> Self {
        Self { generation, items }
    }
}
