//! Enrichment engine: merge rules, job tracking, polling and view projection.

mod enrichment_config;
mod enrichment_traits;
pub mod merge;
pub mod projector;
pub mod scheduler;
pub mod session;
pub mod tracker;

pub use enrichment_config::EngineConfig;
pub use enrichment_traits::EnrichmentApiClient;
pub use merge::{merge, MergeOutcome, MergeReport};
pub use projector::{
    PageView, ProjectedRow, SortDirection, SortKey, SortSpec, SyncIndicator, ViewFilter,
    ViewProjector,
};
pub use scheduler::{PollOutcome, PollScheduler, SharedStore};
pub use session::{EnrichmentSession, LoadOutcome};
pub use tracker::{SyncJobTracker, WorkPlan};
