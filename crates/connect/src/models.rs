//! Wire payloads of the enrichment API and their mapping to core types.
//!
//! The backend is loosely typed: ids arrive as strings or numbers, progress
//! values may be missing, and unknown fields are ignored. Everything lenient
//! happens here so the core only ever sees well-formed values.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use enrichsync_core::{
    Attributes, EntityId, EntityKind, ListResponse, ListedEntity, RemoteEnrichment, RemoteStatus,
    StatusItem,
};

/// Id as sent by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ApiId {
    Text(String),
    Number(u64),
}

impl From<ApiId> for EntityId {
    fn from(id: ApiId) -> Self {
        match id {
            ApiId::Text(text) => EntityId::new(text),
            ApiId::Number(number) => EntityId::from(number),
        }
    }
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiErrorResponse {
    pub fn into_message(self) -> Option<String> {
        self.message
            .or(self.error)
            .filter(|message| !message.trim().is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Listing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApiListResponse {
    #[serde(default)]
    pub items: Vec<ApiListedEntity>,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub has_more: bool,
}

/// Listing row: the id, an optional `enrichment` object and the base fields.
#[derive(Debug, Deserialize)]
pub struct ApiListedEntity {
    pub id: ApiId,
    #[serde(default)]
    pub enrichment: Option<ApiEnrichment>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

/// Enrichment progress embedded in a listing row.
#[derive(Debug, Default, Deserialize)]
pub struct ApiEnrichment {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl ApiEnrichment {
    fn into_remote(self, id: &EntityId) -> RemoteEnrichment {
        match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("not_started") => RemoteEnrichment::NotStarted,
            Some("running") | Some("pending") => RemoteEnrichment::Running,
            Some("complete") | Some("ready") => RemoteEnrichment::Complete {
                attributes: self.attributes.unwrap_or_default(),
                observed_at: self.observed_at,
            },
            Some("failed") => RemoteEnrichment::Failed {
                reason: self.reason.unwrap_or_default(),
                observed_at: self.observed_at,
            },
            Some(other) => {
                warn!(
                    "[EnrichmentApi] Unknown enrichment status '{}' for '{}', treating as not started",
                    other, id
                );
                RemoteEnrichment::NotStarted
            }
        }
    }
}

impl ApiListResponse {
    /// Map the wire listing to core rows of `kind`.
    ///
    /// A missing `total_count` falls back to the number of rows received.
    pub fn into_list_response(self, kind: EntityKind) -> ListResponse {
        let received = self.items.len() as u64;
        let items = self
            .items
            .into_iter()
            .map(|row| {
                let id = EntityId::from(row.id);
                let enrichment = row
                    .enrichment
                    .map(|enrichment| enrichment.into_remote(&id))
                    .unwrap_or_default();
                ListedEntity::new(id, kind, row.attributes).with_enrichment(enrichment)
            })
            .collect();

        ListResponse {
            items,
            total_count: self.total_count.unwrap_or(received),
            has_more: self.has_more,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Enrichment trigger and status
// ─────────────────────────────────────────────────────────────────────────────

/// Request body of both enrichment endpoints.
#[derive(Debug, Serialize)]
pub struct IdsRequest<'a> {
    pub ids: &'a [EntityId],
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiTriggerResponse {
    #[serde(default)]
    pub accepted: Vec<ApiId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiStatusResponse {
    #[serde(default)]
    pub items: Vec<ApiStatusItem>,
}

#[derive(Debug, Deserialize)]
pub struct ApiStatusItem {
    pub id: ApiId,
    pub state: String,
    #[serde(default)]
    pub enriched_attributes: Option<Attributes>,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl ApiStatusResponse {
    /// Map status rows to core items.
    ///
    /// Rows with an unrecognised state are skipped. Rows without a timestamp are
    /// stamped with `received_at`.
    pub fn into_status_items(self, received_at: DateTime<Utc>) -> Vec<StatusItem> {
        self.items
            .into_iter()
            .filter_map(|row| {
                let id = EntityId::from(row.id);
                let state = match row.state.trim() {
                    "pending" | "running" => RemoteStatus::Pending,
                    "ready" | "complete" => RemoteStatus::Ready,
                    "failed" => RemoteStatus::Failed,
                    other => {
                        warn!(
                            "[EnrichmentApi] Skipping status for '{}': unknown state '{}'",
                            id, other
                        );
                        return None;
                    }
                };
                Some(StatusItem {
                    id,
                    state,
                    enriched_attributes: row.enriched_attributes,
                    error_reason: row.error_reason,
                    observed_at: row.observed_at.unwrap_or(received_at),
                })
            })
            .collect()
    }
}
