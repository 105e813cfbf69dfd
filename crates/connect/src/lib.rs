//! Enrichsync Connect - HTTP access to the listing and enrichment endpoints.
//!
//! This crate implements [`enrichsync_core::EnrichmentApiClient`] on top of
//! `reqwest` and keeps the wire payloads separate from the core types.

pub mod client;
pub mod models;

pub use client::{HttpEnrichmentClient, DEFAULT_TIMEOUT_SECS};
pub use models::{
    ApiEnrichment, ApiErrorResponse, ApiId, ApiListResponse, ApiListedEntity, ApiStatusItem,
    ApiStatusResponse, ApiTriggerResponse, IdsRequest,
};
