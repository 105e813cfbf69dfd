//! Enrichsync Core - incremental entity enrichment for paginated listings.
//!
//! This crate holds the entity store, the merge rules, the sync job tracker,
//! the poll scheduler and the view projector. It is transport-agnostic: the
//! backend is reached through [`enrichment::EnrichmentApiClient`], implemented
//! by the `enrichsync-connect` crate.

pub mod constants;
pub mod enrichment;
pub mod entities;
pub mod errors;
pub mod events;

// Re-export the types most callers need
pub use enrichment::{EngineConfig, EnrichmentApiClient, EnrichmentSession, LoadOutcome};
pub use entities::*;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
