//! Poll scheduler - bounded, cancellable status polling for one page window.
//!
//! A scheduler is created per poll batch and consumed by [`PollScheduler::run`].
//! Each tick queries the status of every entity still pending in the store,
//! merges the result and stops on convergence, timeout or cancellation.
//!
//! Cancellation is cooperative: an in-flight status request is allowed to
//! finish, but its result is dropped if the token was cancelled or the store
//! generation moved on in the meantime.

use log::{debug, info, warn};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::enrichment_config::EngineConfig;
use super::enrichment_traits::EnrichmentApiClient;
use super::merge::{merge, MergeReport};
use crate::entities::{BatchResult, EntityId, EntityStore, PollBatch, PollState, StatusItem};
use crate::events::{EnrichmentEvent, EnrichmentEventSink};

/// Store shared between a session and its poll task.
pub type SharedStore = Arc<RwLock<EntityStore>>;

pub(crate) fn read_store(store: &SharedStore) -> RwLockReadGuard<'_, EntityStore> {
    store.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write_store(store: &SharedStore) -> RwLockWriteGuard<'_, EntityStore> {
    store.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How a poll run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub generation: u64,
    pub state: PollState,
    /// Status queries issued
    pub ticks: u32,
    /// Status queries that failed
    pub failed_ticks: u32,
    /// Ids still pending when the run ended
    pub remaining: Vec<EntityId>,
}

/// Polling state machine for one batch.
pub struct PollScheduler {
    batch: PollBatch,
    interval: Duration,
    max_duration: Duration,
    max_failed_ticks: Option<u32>,
    cancel: CancellationToken,
    state_tx: watch::Sender<PollState>,
    ticks: u32,
    failed_ticks: u32,
}

impl PollScheduler {
    /// A scheduler with pending ids reports `Polling` from creation, so the
    /// state is accurate before the task first runs.
    pub fn new(batch: PollBatch, config: &EngineConfig, cancel: CancellationToken) -> Self {
        let initial = if batch.is_empty() {
            PollState::Idle
        } else {
            PollState::Polling
        };
        let (state_tx, _state_rx) = watch::channel(initial);
        Self {
            batch,
            interval: config.poll_interval,
            max_duration: config.max_poll_duration,
            max_failed_ticks: config.max_failed_ticks,
            cancel,
            state_tx,
            ticks: 0,
            failed_ticks: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.batch.generation
    }

    pub fn state(&self) -> PollState {
        *self.state_tx.borrow()
    }

    /// Watch the scheduler state from outside the poll task.
    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state_tx.subscribe()
    }

    /// Run the polling loop to a terminal state.
    ///
    /// An empty batch never leaves `Idle`.
    pub async fn run(
        mut self,
        client: &dyn EnrichmentApiClient,
        store: &SharedStore,
        sink: &dyn EnrichmentEventSink,
    ) -> PollOutcome {
        let generation = self.batch.generation;

        if self.batch.is_empty() {
            debug!("[PollScheduler] Generation {}: nothing pending, staying idle", generation);
            return self.outcome(PollState::Idle, Vec::new());
        }
        if self.cancel.is_cancelled() || !self.is_current(store) {
            return self.finish(PollState::Cancelled, store, sink);
        }

        self.set_state(PollState::Polling);
        {
            let mut guard = write_store(store);
            if !self.cancel.is_cancelled() {
                guard.record_poll_state(generation, PollState::Polling);
            }
        }
        info!(
            "[PollScheduler] Generation {}: polling {} pending entities every {:?} (budget {:?})",
            generation,
            self.batch.len(),
            self.interval,
            self.max_duration
        );
        sink.emit(EnrichmentEvent::PollStarted {
            generation,
            pending_count: self.batch.len(),
        });

        let started = Instant::now();
        let deadline = started + self.max_duration;
        let mut ticker = tokio::time::interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.finish(PollState::Cancelled, store, sink);
                }
                _ = ticker.tick() => {}
            }

            if !self.is_current(store) {
                return self.finish(PollState::Cancelled, store, sink);
            }

            if self.try_converge(store) {
                return self.finish(PollState::Converged, store, sink);
            }
            let pending = read_store(store).pending_ids();

            self.ticks += 1;
            let tick = self.ticks;
            debug!(
                "[PollScheduler] Generation {} tick {}: querying {} ids",
                generation,
                tick,
                pending.len()
            );

            let response = tokio::time::timeout_at(deadline, client.fetch_status(&pending)).await;

            match response {
                Ok(Ok(items)) => {
                    if self.cancel.is_cancelled() {
                        debug!(
                            "[PollScheduler] Generation {} tick {}: cancelled in flight, dropping {} items",
                            generation,
                            tick,
                            items.len()
                        );
                        return self.finish(PollState::Cancelled, store, sink);
                    }
                    let Some(report) = self.apply(store, items) else {
                        return self.finish(PollState::Cancelled, store, sink);
                    };
                    log_report(generation, tick, &report);
                    if report.has_changes() {
                        sink.emit(EnrichmentEvent::entities_updated(generation, report.changed));
                    }
                }
                Ok(Err(err)) => {
                    self.record_failed_tick(tick, err.to_string(), sink);
                }
                Err(_) => {
                    self.record_failed_tick(tick, "status query exceeded poll budget".to_string(), sink);
                }
            }

            if read_store(store).generation() != generation {
                return self.finish(PollState::Cancelled, store, sink);
            }
            if self.try_converge(store) {
                return self.finish(PollState::Converged, store, sink);
            }
            if let Some(max) = self.max_failed_ticks {
                if self.failed_ticks >= max {
                    warn!(
                        "[PollScheduler] Generation {}: {} failed status queries, giving up",
                        generation, self.failed_ticks
                    );
                    return self.finish(PollState::TimedOut, store, sink);
                }
            }
            if Instant::now() >= deadline {
                return self.finish(PollState::TimedOut, store, sink);
            }
        }
    }

    fn is_current(&self, store: &SharedStore) -> bool {
        !self.cancel.is_cancelled() && read_store(store).generation() == self.batch.generation
    }

    /// Record convergence if nothing is pending anymore.
    ///
    /// Checked under the store lock so an entity refreshed concurrently is either
    /// seen as pending here or finds this run already converged.
    fn try_converge(&self, store: &SharedStore) -> bool {
        let mut guard = write_store(store);
        if self.cancel.is_cancelled() || guard.generation() != self.batch.generation {
            return false;
        }
        if !guard.pending_ids().is_empty() {
            return false;
        }
        guard.record_poll_state(self.batch.generation, PollState::Converged);
        true
    }

    /// Merge a status response if the store still belongs to this generation.
    fn apply(&self, store: &SharedStore, items: Vec<StatusItem>) -> Option<MergeReport> {
        let mut guard = write_store(store);
        if self.cancel.is_cancelled() {
            return None;
        }
        if guard.generation() != self.batch.generation {
            debug!(
                "[PollScheduler] Generation {} superseded by {}, dropping status result",
                self.batch.generation,
                guard.generation()
            );
            return None;
        }
        let current = std::mem::take(&mut *guard);
        let outcome = merge(current, &BatchResult::new(self.batch.generation, items));
        *guard = outcome.store;
        Some(outcome.report)
    }

    fn record_failed_tick(&mut self, tick: u32, message: String, sink: &dyn EnrichmentEventSink) {
        self.failed_ticks += 1;
        warn!(
            "[PollScheduler] Generation {} tick {} failed, retrying next interval: {}",
            self.batch.generation, tick, message
        );
        sink.emit(EnrichmentEvent::PollTickFailed {
            generation: self.batch.generation,
            tick,
            message,
        });
    }

    fn set_state(&self, state: PollState) {
        self.state_tx.send_replace(state);
    }

    fn finish(
        &self,
        state: PollState,
        store: &SharedStore,
        sink: &dyn EnrichmentEventSink,
    ) -> PollOutcome {
        let generation = self.batch.generation;
        let remaining = {
            let mut guard = write_store(store);
            if guard.generation() != generation {
                Vec::new()
            } else {
                // Converged is recorded by `try_converge`; a cancelled run leaves
                // the store to whoever replaced it.
                if state == PollState::TimedOut && !self.cancel.is_cancelled() {
                    guard.record_poll_state(generation, state);
                }
                guard.pending_ids()
            }
        };

        match state {
            PollState::Converged => info!(
                "[PollScheduler] Generation {} converged after {} ticks",
                generation, self.ticks
            ),
            PollState::TimedOut => warn!(
                "[PollScheduler] Generation {} timed out after {} ticks, {} entities still syncing",
                generation,
                self.ticks,
                remaining.len()
            ),
            _ => debug!(
                "[PollScheduler] Generation {} stopped as {} after {} ticks",
                generation, state, self.ticks
            ),
        }

        sink.emit(EnrichmentEvent::PollFinished {
            generation,
            state,
            ticks: self.ticks,
            remaining: remaining.clone(),
        });
        self.outcome(state, remaining)
    }

    fn outcome(&self, state: PollState, remaining: Vec<EntityId>) -> PollOutcome {
        self.set_state(state);
        PollOutcome {
            generation: self.batch.generation,
            state,
            ticks: self.ticks,
            failed_ticks: self.failed_ticks,
            remaining,
        }
    }
}

fn log_report(generation: u64, tick: u32, report: &MergeReport) {
    if report.skipped() > 0 || report.dropped_fields > 0 {
        debug!(
            "[PollScheduler] Generation {} tick {}: skipped {} unknown, {} stale, {} rejected; dropped {} fields",
            generation,
            tick,
            report.unknown_ids.len(),
            report.stale_items.len(),
            report.rejected.len(),
            report.dropped_fields
        );
    }
    if !report.became_failed.is_empty() {
        warn!(
            "[PollScheduler] Generation {} tick {}: enrichment failed for {:?}",
            generation, tick, report.became_failed
        );
    }
    debug!(
        "[PollScheduler] Generation {} tick {}: {} ready, {} failed, {} changed",
        generation,
        tick,
        report.became_ready.len(),
        report.became_failed.len(),
        report.changed.len()
    );
}
