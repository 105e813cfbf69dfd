/// Default interval between two enrichment status queries (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default polling budget, expressed in poll intervals
pub const DEFAULT_MAX_POLL_INTERVALS: u32 = 10;

/// Default number of ids sent in one enrichment-trigger request
pub const DEFAULT_TRIGGER_BATCH_SIZE: usize = 50;

/// Default listing page size
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Largest page size the listing endpoints accept
pub const MAX_PAGE_SIZE: u32 = 100;

/// Enrichment fields computed for contacts
pub const CONTACT_ENRICHMENT_FIELDS: &[&str] =
    &["tasks", "conversations", "touch_summary", "last_touch_at"];

/// Enrichment fields computed for call records
pub const CALL_ENRICHMENT_FIELDS: &[&str] = &["ai_grade", "ai_summary", "conversation", "tasks"];

/// Reason recorded when the backend reports a failure without one
pub const UNSPECIFIED_FAILURE_REASON: &str = "unspecified_error";
