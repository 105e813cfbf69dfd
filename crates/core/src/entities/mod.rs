//! Entities module - tracked records, page windows and the entity store.

mod entity_model;
mod entity_store;
mod entity_types;
mod page_window;

pub use entity_model::{
    BatchResult, EnrichmentState, Entity, ListQuery, ListResponse, ListedEntity,
    RemoteEnrichment, RemoteStatus, StatusItem,
};
pub use entity_store::EntityStore;
pub use entity_types::{Attributes, EntityId, EntityKind};
pub use page_window::{PageWindow, PollBatch, PollState};
