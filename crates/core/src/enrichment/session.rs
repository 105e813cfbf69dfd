//! Enrichment session - one listing screen's engine instance.
//!
//! The session owns the entity store, the sync job tracker and at most one
//! running poll task. Every page fetch starts a new store generation; work
//! started for an older generation is cancelled and its results are dropped.

use futures::future::join_all;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::enrichment_config::EngineConfig;
use super::enrichment_traits::EnrichmentApiClient;
use super::projector::{PageView, SortSpec, ViewFilter, ViewProjector};
use super::scheduler::{read_store, write_store, PollOutcome, PollScheduler, SharedStore};
use super::tracker::{SyncJobTracker, WorkPlan};
use crate::entities::{
    Entity, EntityId, EntityKind, EntityStore, ListQuery, PollBatch, PollState,
};
use crate::errors::{Error, Result};
use crate::events::{EnrichmentEvent, EnrichmentEventSink};

/// Result of a page load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The store now holds this page.
    Loaded(PageView),
    /// A newer load started while this one was in flight; its response was
    /// discarded.
    Superseded { generation: u64 },
}

impl LoadOutcome {
    pub fn view(&self) -> Option<&PageView> {
        match self {
            LoadOutcome::Loaded(view) => Some(view),
            LoadOutcome::Superseded { .. } => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, LoadOutcome::Superseded { .. })
    }
}

struct ActivePoll {
    generation: u64,
    cancel: CancellationToken,
    state: watch::Receiver<PollState>,
    handle: Option<JoinHandle<PollOutcome>>,
}

/// Engine instance bound to one listing.
pub struct EnrichmentSession {
    id: Uuid,
    config: EngineConfig,
    client: Arc<dyn EnrichmentApiClient>,
    sink: Arc<dyn EnrichmentEventSink>,
    store: SharedStore,
    tracker: Mutex<SyncJobTracker>,
    /// Latest generation handed out to a page load.
    latest_generation: AtomicU64,
    active_poll: Mutex<Option<ActivePoll>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EnrichmentSession {
    pub fn new(
        client: Arc<dyn EnrichmentApiClient>,
        sink: Arc<dyn EnrichmentEventSink>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        info!(
            "[EnrichmentSession] Session {} opened for {} listing",
            id,
            client.kind()
        );
        Ok(Self {
            id,
            config,
            client,
            sink,
            store: Arc::new(RwLock::new(EntityStore::new())),
            tracker: Mutex::new(SyncJobTracker::new()),
            latest_generation: AtomicU64::new(0),
            active_poll: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.client.kind()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fetch a page, replace the store and start enrichment for it.
    ///
    /// The poll of the previous page keeps running until the new page replaces
    /// the store. A list failure is returned to the caller and leaves both the
    /// store and its poll as they were.
    pub async fn load_page(&self, query: ListQuery) -> Result<LoadOutcome> {
        self.ensure_open()?;
        query.validate(self.config.max_page_size)?;

        let generation = self.latest_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "[EnrichmentSession] Generation {}: fetching page {} (size {})",
            generation, query.page, query.page_size
        );

        let response = match self.client.list_entities(&query).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    "[EnrichmentSession] Generation {}: listing page {} failed: {}",
                    generation, query.page, err
                );
                return Err(err);
            }
        };

        let vocabulary = self.config.vocabulary_for(self.client.kind());
        let page = query.page;
        let (plan, requested) = {
            let mut active = lock(&self.active_poll);
            let mut store = write_store(&self.store);
            if self.is_closed() || self.latest_generation.load(Ordering::SeqCst) != generation {
                debug!(
                    "[EnrichmentSession] Generation {}: superseded, discarding {} listed items",
                    generation,
                    response.items.len()
                );
                return Ok(LoadOutcome::Superseded { generation });
            }
            if let Some(previous) = active.take() {
                debug!(
                    "[EnrichmentSession] Generation {}: cancelling poll of generation {}",
                    generation, previous.generation
                );
                previous.cancel.cancel();
            }
            *store = EntityStore::from_listing(generation, query, response, Some(vocabulary));
            let mut tracker = lock(&self.tracker);
            let plan = tracker.compute_work(&mut store);
            (plan, tracker.requested_count())
        };

        info!(
            "[EnrichmentSession] Generation {}: page {} loaded, {} pending, {} to trigger, {} converged ({} requested this session)",
            generation,
            page,
            plan.pending_ids.len(),
            plan.to_trigger.len(),
            plan.already_converged.len(),
            requested
        );
        self.sink.emit(EnrichmentEvent::PageLoaded {
            generation,
            page,
            entity_count: plan.pending_ids.len() + plan.already_converged.len(),
            pending_count: plan.pending_ids.len(),
        });

        self.dispatch(plan).await;
        Ok(LoadOutcome::Loaded(self.view(&ViewFilter::default(), &SortSpec::default())))
    }

    /// Load another page of the current listing.
    pub async fn go_to_page(&self, page: u32) -> Result<LoadOutcome> {
        let mut query = self.current_query();
        query.page = page;
        self.load_page(query).await
    }

    /// Change the page size and jump back to the first page.
    pub async fn set_page_size(&self, page_size: u32) -> Result<LoadOutcome> {
        let mut query = self.current_query();
        query.page = 1;
        query.page_size = page_size;
        self.load_page(query).await
    }

    /// Replace the server-side filters and search, starting from the first page.
    pub async fn set_filters(
        &self,
        filters: impl IntoIterator<Item = (String, String)>,
        search: Option<String>,
    ) -> Result<LoadOutcome> {
        let current = self.current_query();
        let mut query = ListQuery::new(1, current.page_size);
        query.filters = filters.into_iter().collect();
        if let Some(search) = search {
            query = query.with_search(search);
        }
        self.load_page(query).await
    }

    /// Re-fetch the current page as a new generation.
    pub async fn refresh_page(&self) -> Result<LoadOutcome> {
        let query = self.current_query();
        self.load_page(query).await
    }

    /// Reset one entity to `unknown` and run it through enrichment again.
    ///
    /// Polling for the current page restarts with a fresh budget so the
    /// entity is awaited even if the previous run already ended.
    pub async fn refresh(&self, id: &EntityId) -> Result<()> {
        self.ensure_open()?;
        let (previous, plan) = {
            let mut store = write_store(&self.store);
            let previous = store.reset(id)?;
            let mut tracker = lock(&self.tracker);
            tracker.forget(id);
            (previous, tracker.compute_work(&mut store))
        };
        info!(
            "[EnrichmentSession] Generation {}: refreshing '{}' (was {})",
            plan.generation, id, previous
        );
        self.dispatch(plan).await;
        Ok(())
    }

    /// Projection of the current page.
    pub fn view(&self, filter: &ViewFilter, sort: &SortSpec) -> PageView {
        ViewProjector::page_view(&read_store(&self.store), filter, sort)
    }

    pub fn is_loading(&self, id: &EntityId) -> bool {
        ViewProjector::is_loading(&read_store(&self.store), id)
    }

    pub fn entity(&self, id: &EntityId) -> Option<Entity> {
        read_store(&self.store).get(id).cloned()
    }

    /// Generation of the page currently held by the store.
    pub fn generation(&self) -> u64 {
        read_store(&self.store).generation()
    }

    /// State of the most recent poll task, `Idle` if none was started for the
    /// current page.
    pub fn poll_state(&self) -> PollState {
        let generation = self.generation();
        lock(&self.active_poll)
            .as_ref()
            .filter(|poll| poll.generation == generation)
            .map(|poll| *poll.state.borrow())
            .unwrap_or(PollState::Idle)
    }

    /// Wait for the current poll task to finish.
    ///
    /// Returns `None` if no poll is running or it was already awaited.
    pub async fn wait_for_poll(&self) -> Option<PollOutcome> {
        let handle = lock(&self.active_poll)
            .as_mut()
            .and_then(|poll| poll.handle.take())?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!("[EnrichmentSession] Session {}: poll task failed: {}", self.id, err);
                None
            }
        }
    }

    /// Stop background work. Later calls fail with [`Error::SessionClosed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_poll();
        info!("[EnrichmentSession] Session {} closed", self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn current_query(&self) -> ListQuery {
        read_store(&self.store)
            .window()
            .map(|window| window.query.clone())
            .unwrap_or_else(|| ListQuery::new(1, self.config.default_page_size))
    }

    async fn dispatch(&self, plan: WorkPlan) {
        if !plan.to_trigger.is_empty() {
            self.trigger(plan.generation, plan.trigger_batches(self.config.trigger_batch_size))
                .await;
        }
        self.start_polling(plan.generation);
    }

    /// Start enrichment batches concurrently. Failed batches go back to
    /// `unknown` and are reported; the session keeps running.
    async fn trigger(&self, generation: u64, batches: Vec<Vec<EntityId>>) {
        let client = &self.client;
        let results = join_all(batches.into_iter().map(|batch| async move {
            let result = client.start_enrichment(&batch).await;
            (batch, result)
        }))
        .await;

        for (batch, result) in results {
            match result {
                Ok(()) => {
                    debug!(
                        "[EnrichmentSession] Generation {}: enrichment started for {} ids",
                        generation,
                        batch.len()
                    );
                    self.sink.emit(EnrichmentEvent::EnrichmentTriggered {
                        generation,
                        entity_ids: batch,
                    });
                }
                Err(err) => {
                    warn!(
                        "[EnrichmentSession] Generation {}: starting enrichment for {} ids failed: {}",
                        generation,
                        batch.len(),
                        err
                    );
                    let reverted = {
                        let mut store = write_store(&self.store);
                        let mut tracker = lock(&self.tracker);
                        if store.generation() == generation {
                            tracker.trigger_failed(&mut store, &batch)
                        } else {
                            for id in &batch {
                                tracker.forget(id);
                            }
                            Vec::new()
                        }
                    };
                    debug!(
                        "[EnrichmentSession] Generation {}: reverted {} ids to unknown",
                        generation,
                        reverted.len()
                    );
                    self.sink
                        .emit(EnrichmentEvent::trigger_failed(generation, batch, err.to_string()));
                }
            }
        }
    }

    /// Replace the poll task for `generation` if anything is pending.
    fn start_polling(&self, generation: u64) -> bool {
        let mut active = lock(&self.active_poll);
        if self.is_closed() {
            return false;
        }

        let pending = {
            let mut store = write_store(&self.store);
            if store.generation() != generation {
                return false;
            }
            if let Some(previous) = active.take() {
                // Cancelled under the store lock so the old task cannot merge
                // once the new one owns the generation.
                previous.cancel.cancel();
            }
            let pending = store.pending_ids();
            if pending.is_empty() {
                return false;
            }
            store.record_poll_state(generation, PollState::Polling);
            pending
        };

        let cancel = CancellationToken::new();
        let scheduler = PollScheduler::new(
            PollBatch::new(generation, pending),
            &self.config,
            cancel.clone(),
        );
        let state = scheduler.subscribe();

        let client = Arc::clone(&self.client);
        let store = Arc::clone(&self.store);
        let sink = Arc::clone(&self.sink);
        let handle = tokio::spawn(async move {
            scheduler
                .run(client.as_ref(), &store, sink.as_ref())
                .await
        });

        *active = Some(ActivePoll {
            generation,
            cancel,
            state,
            handle: Some(handle),
        });
        true
    }

    fn cancel_poll(&self) {
        if let Some(poll) = lock(&self.active_poll).take() {
            debug!(
                "[EnrichmentSession] Cancelling poll of generation {}",
                poll.generation
            );
            poll.cancel.cancel();
        }
    }
}

impl Drop for EnrichmentSession {
    fn drop(&mut self) {
        let active = self
            .active_poll
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(poll) = active.take() {
            poll.cancel.cancel();
        }
    }
}
