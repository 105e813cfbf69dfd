//! Engine configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_POLL_INTERVALS, DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TRIGGER_BATCH_SIZE, MAX_PAGE_SIZE,
};
use crate::entities::EntityKind;
use crate::errors::{Error, Result};

/// Configuration for one enrichment engine instance.
///
/// A single interval/timeout pair applies to every poll run of the session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between two status queries.
    pub poll_interval: Duration,
    /// Total polling budget per batch.
    pub max_poll_duration: Duration,
    /// Stop polling after this many failed status queries. `None` leaves the
    /// timeout as the only bound.
    pub max_failed_ticks: Option<u32>,
    /// Ids per enrichment-start request.
    pub trigger_batch_size: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Enriched fields to merge. `None` uses the entity kind's vocabulary.
    pub enrichment_fields: Option<BTreeSet<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let poll_interval = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);
        Self {
            poll_interval,
            max_poll_duration: poll_interval * DEFAULT_MAX_POLL_INTERVALS,
            max_failed_ticks: None,
            trigger_batch_size: DEFAULT_TRIGGER_BATCH_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            enrichment_fields: None,
        }
    }
}

impl EngineConfig {
    /// Set the interval and keep the budget at the default multiple of it.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.max_poll_duration = interval * DEFAULT_MAX_POLL_INTERVALS;
        self
    }

    pub fn with_max_poll_duration(mut self, budget: Duration) -> Self {
        self.max_poll_duration = budget;
        self
    }

    pub fn with_max_failed_ticks(mut self, max: u32) -> Self {
        self.max_failed_ticks = Some(max);
        self
    }

    pub fn with_enrichment_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enrichment_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Vocabulary the merge engine applies for entities of `kind`.
    pub fn vocabulary_for(&self, kind: EntityKind) -> BTreeSet<String> {
        self.enrichment_fields
            .clone()
            .unwrap_or_else(|| kind.default_vocabulary())
    }

    /// Upper bound on the number of poll ticks within the budget.
    pub fn max_ticks(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        let ticks = self.max_poll_duration.as_millis() / interval;
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfigValue(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.max_poll_duration < self.poll_interval {
            return Err(Error::InvalidConfigValue(format!(
                "max_poll_duration ({:?}) must be at least one poll_interval ({:?})",
                self.max_poll_duration, self.poll_interval
            )));
        }
        if self.trigger_batch_size == 0 {
            return Err(Error::InvalidConfigValue(
                "trigger_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_page_size == 0 {
            return Err(Error::InvalidConfigValue(
                "max_page_size must be greater than zero".to_string(),
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(Error::InvalidConfigValue(format!(
                "default_page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        if self.max_failed_ticks == Some(0) {
            return Err(Error::InvalidConfigValue(
                "max_failed_ticks must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}
