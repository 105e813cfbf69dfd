use async_trait::async_trait;

use crate::entities::{EntityId, EntityKind, ListQuery, ListResponse, StatusItem};
use crate::errors::Result;

/// Trait for the backend endpoints the engine depends on.
///
/// One implementation serves one listing (contacts or calls). The enrichment
/// start endpoint must be idempotent server-side; the engine still never
/// triggers the same id twice per session.
#[async_trait]
pub trait EnrichmentApiClient: Send + Sync {
    /// Listing this client serves
    fn kind(&self) -> EntityKind;

    /// Fetch one page of entity stubs with their enrichment progress
    async fn list_entities(&self, query: &ListQuery) -> Result<ListResponse>;

    /// Start server-side enrichment jobs for a batch of ids
    async fn start_enrichment(&self, ids: &[EntityId]) -> Result<()>;

    /// Read the enrichment status of a batch of ids
    async fn fetch_status(&self, ids: &[EntityId]) -> Result<Vec<StatusItem>>;
}
