//! Data Synchronization Layer
//!
//! Keeps the freshest known event batch for a query:
//! - Requests run as spawned tasks so the playback and frame timers never block
//! - Failed attempts are retried on the context clock, then reported as `Error`
//! - The last good batch survives any number of failures
//! - Responses superseded by a later-issued request are ignored on arrival

use crate::config::SyncConfig;
use crate::model::{Connection, ConnectionsQuery, EventFeed, FeedQuery};
use enjin_env::{EnjinContext, EnvError, FeedRequest, FeedTransport, TaskHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from a single feed request.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(#[from] EnvError),

    #[error("Feed service answered with status {status}")]
    Status { status: u16 },

    #[error("Could not decode response: {0}")]
    Decode(String),
}

// =============================================================================
// CLIENT
// =============================================================================

/// Typed client over a raw [`FeedTransport`].
pub struct FeedClient<T: FeedTransport> {
    transport: Arc<T>,
}

impl<T: FeedTransport> FeedClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// `GET /events/feed` for the given query.
    pub async fn fetch_feed(&self, query: &FeedQuery) -> Result<EventFeed, FeedError> {
        self.get_json(query.to_request()).await
    }

    /// Fetches `query` and every following page until `total` events are held,
    /// merged into one feed. Any failed page fails the whole fetch.
    pub async fn fetch_all_pages(&self, query: &FeedQuery) -> Result<EventFeed, FeedError> {
        let mut merged = self.fetch_feed(query).await?;
        let mut page_query = query.clone();
        page_query.page = page_query.page.max(1);

        while (merged.events.len() as u64) < merged.total {
            page_query.page += 1;
            let next = self.fetch_feed(&page_query).await?;
            debug!(
                page = page_query.page,
                events = next.events.len(),
                total = next.total,
                "Fetched feed page"
            );
            if next.events.is_empty() {
                break;
            }
            merged.events.extend(next.events);
            merged.total = next.total;
        }

        Ok(merged)
    }

    /// `GET /entities/{id}/connections?depth=`.
    pub async fn entity_connections(
        &self,
        entity_id: &str,
        depth: u32,
    ) -> Result<Vec<Connection>, FeedError> {
        let query = ConnectionsQuery {
            entity_id: entity_id.to_string(),
            depth,
        };
        self.get_json(query.to_request()).await
    }

    async fn get_json<D: DeserializeOwned>(&self, request: FeedRequest) -> Result<D, FeedError> {
        let response = self.transport.get(&request).await?;
        if !response.is_success() {
            return Err(FeedError::Status {
                status: response.status,
            });
        }
        serde_json::from_slice(&response.body).map_err(|e| FeedError::Decode(e.to_string()))
    }
}

// =============================================================================
// SYNC STATE
// =============================================================================

/// Freshness of the exposed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    /// Nothing requested yet
    Idle,
    /// A request is outstanding
    Loading,
    /// The latest issued request succeeded
    Fresh,
    /// Retries exhausted; the batch is stale
    Error,
}

/// Point-in-time view of the sync layer.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    /// Latest applied batch, or the empty feed before the first success
    pub feed: Arc<EventFeed>,
    pub status: SyncStatus,

    /// Incremented each time a new batch is applied
    pub generation: u64,

    /// Context time of the last applied batch
    pub last_success_at: Option<Duration>,
    pub last_error: Option<String>,
}

struct SyncShared {
    feed: Arc<EventFeed>,
    status: SyncStatus,
    generation: u64,
    last_success_at: Option<Duration>,
    last_error: Option<String>,

    /// Sequence number of the most recently issued request
    latest_issued: u64,

    /// Sequence number of the request whose batch is exposed
    applied: u64,
}

/// Poisoning only happens if a holder panicked; the data is still coherent.
fn lock(shared: &Mutex<SyncShared>) -> MutexGuard<'_, SyncShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct IssuedRequest {
    query: FeedQuery,
    at: Duration,
}

// =============================================================================
// FEED SYNC
// =============================================================================

/// Polling synchronizer for the event feed.
///
/// The owner drives the poll cadence (see `GlobeSession`) and reads
/// [`FeedSync::snapshot`] whenever it wants the current batch.
pub struct FeedSync<C: EnjinContext, T: FeedTransport> {
    ctx: Arc<C>,
    client: Arc<FeedClient<T>>,
    config: SyncConfig,
    shared: Arc<Mutex<SyncShared>>,
    next_seq: u64,
    last_issued: Option<IssuedRequest>,
    tasks: Vec<TaskHandle>,
}

impl<C: EnjinContext, T: FeedTransport> FeedSync<C, T> {
    pub fn new(ctx: Arc<C>, transport: Arc<T>, config: SyncConfig) -> Self {
        Self {
            ctx,
            client: Arc::new(FeedClient::new(transport)),
            config,
            shared: Arc::new(Mutex::new(SyncShared {
                feed: Arc::new(EventFeed::empty()),
                status: SyncStatus::Idle,
                generation: 0,
                last_success_at: None,
                last_error: None,
                latest_issued: 0,
                applied: 0,
            })),
            next_seq: 0,
            last_issued: None,
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<FeedClient<T>> {
        &self.client
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let shared = lock(&self.shared);
        FeedSnapshot {
            feed: Arc::clone(&shared.feed),
            status: shared.status,
            generation: shared.generation,
            last_success_at: shared.last_success_at,
            last_error: shared.last_error.clone(),
        }
    }

    pub fn status(&self) -> SyncStatus {
        lock(&self.shared).status
    }

    pub fn generation(&self) -> u64 {
        lock(&self.shared).generation
    }

    /// Requests spawned so far.
    pub fn issued(&self) -> u64 {
        self.next_seq
    }

    /// Requests whose task has not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Issues `query` unless an identical one went out within the dedupe window.
    ///
    /// Returns true if a new request was spawned.
    pub fn request(&mut self, query: &FeedQuery) -> bool {
        let now = self.ctx.now();
        if let Some(last) = &self.last_issued {
            if last.query == *query && now.saturating_sub(last.at) < self.config.dedupe_window {
                debug!(age_ms = (now - last.at).as_millis() as u64, "Reusing recent feed request");
                return false;
            }
        }
        self.issue(query.clone(), now);
        true
    }

    /// Manual refresh: always issues a request.
    pub fn refresh(&mut self, query: &FeedQuery) {
        let now = self.ctx.now();
        self.issue(query.clone(), now);
    }

    /// Cancels every in-flight request task.
    pub fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.cancel();
        }
    }

    fn issue(&mut self, query: FeedQuery, now: Duration) {
        self.next_seq += 1;
        let seq = self.next_seq;

        {
            let mut shared = lock(&self.shared);
            shared.latest_issued = seq;
            shared.status = SyncStatus::Loading;
        }
        self.last_issued = Some(IssuedRequest {
            query: query.clone(),
            at: now,
        });

        let task = run_request(
            Arc::clone(&self.ctx),
            Arc::clone(&self.client),
            self.config.clone(),
            Arc::clone(&self.shared),
            seq,
            query,
        );
        let handle = self.ctx.spawn(&format!("feed-request-{}", seq), task);

        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(handle);
    }
}

impl<C: EnjinContext, T: FeedTransport> Drop for FeedSync<C, T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// One request with its retry budget.
async fn run_request<C: EnjinContext, T: FeedTransport>(
    ctx: Arc<C>,
    client: Arc<FeedClient<T>>,
    config: SyncConfig,
    shared: Arc<Mutex<SyncShared>>,
    seq: u64,
    query: FeedQuery,
) {
    let mut retries = 0;
    loop {
        debug!(seq, attempt = retries + 1, "Fetching feed");

        match client.fetch_all_pages(&query).await {
            Ok(feed) => {
                apply_success(&shared, seq, feed, ctx.now());
                return;
            }
            Err(err) if retries < config.max_retries => {
                retries += 1;
                warn!(seq, retry = retries, error = %err, "Feed fetch failed, retrying");
                ctx.sleep(config.retry_interval).await;
            }
            Err(err) => {
                warn!(seq, attempts = retries + 1, error = %err, "Feed fetch retries exhausted");
                apply_failure(&shared, seq, err.to_string());
                return;
            }
        }
    }
}

fn apply_success(shared: &Mutex<SyncShared>, seq: u64, feed: EventFeed, now: Duration) {
    let mut shared = lock(shared);
    if seq <= shared.applied {
        debug!(seq, applied = shared.applied, "Ignoring superseded feed response");
        return;
    }

    info!(seq, events = feed.events.len(), total = feed.total, "Feed batch applied");
    shared.feed = Arc::new(feed);
    shared.applied = seq;
    shared.generation += 1;
    shared.last_success_at = Some(now);
    shared.last_error = None;
    if seq == shared.latest_issued {
        shared.status = SyncStatus::Fresh;
    }
}

fn apply_failure(shared: &Mutex<SyncShared>, seq: u64, error: String) {
    let mut shared = lock(shared);
    // A later request owns the status now
    if seq != shared.latest_issued {
        return;
    }
    shared.status = SyncStatus::Error;
    shared.last_error = Some(error);
}
