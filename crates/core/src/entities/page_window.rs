//! Page windows and poll batches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::entity_model::ListQuery;
use super::entity_types::EntityId;

/// One fetched page: the ordered ids it displays plus paging metadata.
///
/// A window is never mutated after creation; the next fetch supersedes it with a
/// new window carrying a higher generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageWindow {
    pub generation: u64,
    pub query: ListQuery,
    pub ids: Vec<EntityId>,
    pub total_count: u64,
    pub has_more: bool,
}

impl PageWindow {
    pub fn page(&self) -> u32 {
        self.query.page
    }

    pub fn page_size(&self) -> u32 {
        self.query.page_size
    }

    /// Number of pages for the current total, at least one.
    pub fn page_count(&self) -> u64 {
        let size = u64::from(self.query.page_size.max(1));
        self.total_count.div_ceil(size).max(1)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.ids.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Ids awaited by one poll run, owned by the generation that created them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBatch {
    pub generation: u64,
    pub ids: BTreeSet<EntityId>,
}

impl PollBatch {
    pub fn new(generation: u64, ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            generation,
            ids: ids.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Poll scheduler lifecycle.
///
/// `Idle -> Polling -> {Converged, TimedOut, Cancelled}`. `Cancelled` is
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    #[default]
    Idle,
    Polling,
    Converged,
    TimedOut,
    Cancelled,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Converged | PollState::TimedOut | PollState::Cancelled
        )
    }
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollState::Idle => write!(f, "idle"),
            PollState::Polling => write!(f, "polling"),
            PollState::Converged => write!(f, "converged"),
            PollState::TimedOut => write!(f, "timed_out"),
            PollState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(total: u64, page_size: u32) -> PageWindow {
        PageWindow {
            generation: 1,
            query: ListQuery::new(1, page_size),
            ids: vec![EntityId::from("a"), EntityId::from("b")],
            total_count: total,
            has_more: false,
        }
    }

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(window(0, 25).page_count(), 1);
        assert_eq!(window(25, 25).page_count(), 1);
        assert_eq!(window(26, 25).page_count(), 2);
    }

    #[test]
    fn test_contains_only_listed_ids() {
        let w = window(2, 25);
        assert!(w.contains(&EntityId::from("b")));
        assert!(!w.contains(&EntityId::from("c")));
    }

    #[test]
    fn test_poll_batch_dedups_ids() {
        let batch = PollBatch::new(3, vec![EntityId::from("x"), EntityId::from("x")]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.generation, 3);
    }

    #[test]
    fn test_poll_state_terminality() {
        assert!(!PollState::Idle.is_terminal());
        assert!(!PollState::Polling.is_terminal());
        assert!(PollState::Cancelled.is_terminal());
    }
}
