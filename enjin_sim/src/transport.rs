//! Simulated feed service with fault injection.

use crate::context::SimContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use enjin_core::model::{DEFAULT_PER_PAGE, FEED_PATH, MAX_PER_PAGE};
use enjin_core::{Connection, Event, EventFeed};
use enjin_env::{EnjinContext, EnvError, FeedRequest, FeedTransport, ResponseEnvelope};
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Fault injection knobs.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// The next N requests fail with a network error
    pub fail_next: u32,

    /// Probability of a 503 for any other request
    pub failure_rate: f64,

    /// Base response latency (virtual time)
    pub latency: Duration,

    /// Extra uniformly-distributed latency on top of `latency`
    pub jitter: Duration,

    /// Exact latencies for the next requests, consumed in order
    pub scripted_latencies: VecDeque<Duration>,
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RequestOutcome {
    Served { status: u16, events: usize },
    Failed(String),
}

/// One entry of the request log.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub issued_at_ms: u64,
    pub completed_at_ms: u64,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub outcome: RequestOutcome,
}

/// In-memory stand-in for the feed service.
pub struct SimTransport {
    ctx: SimContext,
    catalog: Mutex<Vec<Event>>,
    faults: Mutex<FaultPlan>,
    log: Mutex<Vec<RequestRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimTransport {
    pub fn new(ctx: SimContext) -> Self {
        Self {
            ctx,
            catalog: Mutex::new(Vec::new()),
            faults: Mutex::new(FaultPlan::default()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Adds events to the served catalog.
    pub fn publish(&self, events: impl IntoIterator<Item = Event>) {
        lock(&self.catalog).extend(events);
    }

    pub fn catalog_len(&self) -> usize {
        lock(&self.catalog).len()
    }

    pub fn fail_next(&self, count: u32) {
        lock(&self.faults).fail_next = count;
    }

    pub fn set_failure_rate(&self, rate: f64) {
        lock(&self.faults).failure_rate = rate.clamp(0.0, 1.0);
    }

    pub fn set_latency(&self, latency: Duration, jitter: Duration) {
        let mut faults = lock(&self.faults);
        faults.latency = latency;
        faults.jitter = jitter;
    }

    /// Queues exact latencies for upcoming requests.
    pub fn script_latencies(&self, latencies: impl IntoIterator<Item = Duration>) {
        lock(&self.faults).scripted_latencies.extend(latencies);
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        lock(&self.log).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.log).len()
    }

    /// Decides latency and failure for one request.
    fn plan(&self) -> (Duration, Option<FailureKind>) {
        let mut faults = lock(&self.faults);

        let latency = match faults.scripted_latencies.pop_front() {
            Some(latency) => latency,
            None if faults.jitter.is_zero() => faults.latency,
            None => {
                let jitter_ns = faults.jitter.as_nanos() as u64;
                let extra = self.ctx.with_rng(|rng| rng.gen_range(0..=jitter_ns));
                faults.latency + Duration::from_nanos(extra)
            }
        };

        let failure = if faults.fail_next > 0 {
            faults.fail_next -= 1;
            Some(FailureKind::Network)
        } else if faults.failure_rate > 0.0 {
            let rate = faults.failure_rate;
            self.ctx
                .with_rng(|rng| rng.gen_bool(rate))
                .then_some(FailureKind::Unavailable)
        } else {
            None
        };

        (latency, failure)
    }

    fn serve(&self, request: &FeedRequest) -> ResponseEnvelope {
        if request.path == FEED_PATH {
            return self.serve_feed(request);
        }
        let connections_of = request
            .path
            .strip_prefix("/entities/")
            .and_then(|rest| rest.strip_suffix("/connections"));
        match connections_of {
            Some(entity_id) => self.serve_connections(entity_id),
            None => json_response(404, &serde_json::json!({ "detail": "Not Found" })),
        }
    }

    fn serve_feed(&self, request: &FeedRequest) -> ResponseEnvelope {
        let page = match parse_param(request, "page", 1u32) {
            Some(page) if page >= 1 => page,
            _ => return json_response(422, &serde_json::json!({ "detail": "invalid page" })),
        };
        let per_page = match parse_param(request, "per_page", DEFAULT_PER_PAGE) {
            Some(n) if (1..=MAX_PER_PAGE).contains(&n) => n,
            _ => return json_response(422, &serde_json::json!({ "detail": "invalid per_page" })),
        };

        let category = request.param("category");
        let region = request.param("region").map(str::to_lowercase);
        let from = request.param("from").and_then(parse_instant);
        let to = request.param("to").and_then(parse_instant);

        let catalog = lock(&self.catalog);
        let mut matching: Vec<&Event> = catalog
            .iter()
            .filter(|e| category.map_or(true, |c| e.category.as_deref() == Some(c)))
            .filter(|e| {
                region.as_deref().map_or(true, |r| {
                    e.location_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(r))
                })
            })
            .filter(|e| from.map_or(true, |f| e.occurred_at.is_some_and(|at| at >= f)))
            .filter(|e| to.map_or(true, |t| e.occurred_at.is_some_and(|at| at <= t)))
            .collect();

        // Newest first, undated last
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

        let offset = ((page - 1) as usize).saturating_mul(per_page as usize);
        let events: Vec<Event> = matching
            .iter()
            .skip(offset)
            .take(per_page as usize)
            .map(|e| (*e).clone())
            .collect();

        let feed = EventFeed {
            events,
            total: matching.len() as u64,
            page,
            per_page,
        };
        json_response(200, &feed)
    }

    fn serve_connections(&self, entity_id: &str) -> ResponseEnvelope {
        let catalog = lock(&self.catalog);
        let connections: Vec<&Connection> = catalog
            .iter()
            .flat_map(|e| e.connections.iter())
            .filter(|c| c.from_id == entity_id || c.to_id == entity_id)
            .collect();
        json_response(200, &connections)
    }
}

#[derive(Debug, Clone, Copy)]
enum FailureKind {
    Network,
    Unavailable,
}

fn parse_param<T: std::str::FromStr>(request: &FeedRequest, key: &str, default: T) -> Option<T> {
    match request.param(key) {
        Some(raw) => raw.parse().ok(),
        None => Some(default),
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn json_response<S: Serialize>(status: u16, body: &S) -> ResponseEnvelope {
    match serde_json::to_vec(body) {
        Ok(body) => ResponseEnvelope { status, body },
        Err(_) => ResponseEnvelope {
            status: 500,
            body: Vec::new(),
        },
    }
}

#[async_trait]
impl FeedTransport for SimTransport {
    async fn get(&self, request: &FeedRequest) -> Result<ResponseEnvelope, EnvError> {
        let issued_at = self.ctx.now();
        let (latency, failure) = self.plan();

        if !latency.is_zero() {
            self.ctx.sleep(latency).await;
        }

        let result = match failure {
            Some(FailureKind::Network) => Err(EnvError::network("injected connection reset")),
            Some(FailureKind::Unavailable) => Ok(ResponseEnvelope {
                status: 503,
                body: Vec::new(),
            }),
            None => Ok(self.serve(request)),
        };

        let outcome = match &result {
            Ok(response) => RequestOutcome::Served {
                status: response.status,
                events: serde_json::from_slice::<EventFeed>(&response.body)
                    .map(|f| f.events.len())
                    .unwrap_or(0),
            },
            Err(e) => RequestOutcome::Failed(e.to_string()),
        };
        debug!(path = %request.path, latency_ms = latency.as_millis() as u64, ?outcome, "Sim request");

        lock(&self.log).push(RequestRecord {
            issued_at_ms: issued_at.as_millis() as u64,
            completed_at_ms: self.ctx.now().as_millis() as u64,
            path: request.path.clone(),
            query: request.query.clone(),
            outcome,
        });
        result
    }

    fn endpoint(&self) -> String {
        format!("sim://feed (seed {})", self.ctx.seed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use enjin_core::{Category, FeedQuery};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn transport() -> SimTransport {
        let transport = SimTransport::new(SimContext::new(1));
        transport.publish(vec![
            Event::new("a", "x")
                .at(54.0, 18.0)
                .with_category(Category::Military)
                .located("Gdansk, Poland")
                .occurred(day(2)),
            Event::new("b", "x")
                .at(25.0, 121.0)
                .with_category(Category::Cyber)
                .located("Taipei, Taiwan")
                .occurred(day(5))
                .connect(Connection::new("b", "org-1", "involves")),
            Event::new("c", "x").with_category(Category::Cyber).occurred(day(9)),
        ]);
        transport
    }

    fn decode(response: &ResponseEnvelope) -> EventFeed {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[tokio::test]
    async fn test_feed_filters_and_orders() {
        let transport = transport();
        let query = FeedQuery {
            category: Some(Category::Cyber),
            ..FeedQuery::default()
        };

        let response = transport.get(&query.to_request()).await.unwrap();
        let feed = decode(&response);
        let ids: Vec<_> = feed.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(feed.total, 2);
    }

    #[tokio::test]
    async fn test_region_and_time_window() {
        let transport = transport();
        let query = FeedQuery {
            region: Some("poland".to_string()),
            from: Some(day(1)),
            to: Some(day(3)),
            ..FeedQuery::default()
        };

        let feed = decode(&transport.get(&query.to_request()).await.unwrap());
        assert_eq!(feed.events.len(), 1);
        assert_eq!(feed.events[0].id, "a");
    }

    #[tokio::test]
    async fn test_pagination() {
        let transport = transport();
        let query = FeedQuery {
            page: 2,
            per_page: 2,
            ..FeedQuery::default()
        };

        let feed = decode(&transport.get(&query.to_request()).await.unwrap());
        assert_eq!(feed.total, 3);
        assert_eq!(feed.events.len(), 1);
        assert_eq!(feed.events[0].id, "a");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let transport = transport();
        transport.fail_next(2);
        let request = FeedQuery::default().to_request();

        assert!(transport.get(&request).await.is_err());
        assert!(transport.get(&request).await.is_err());
        assert!(transport.get(&request).await.is_ok());
        assert_eq!(transport.request_count(), 3);

        transport.set_failure_rate(1.0);
        assert_eq!(transport.get(&request).await.unwrap().status, 503);
    }

    #[tokio::test]
    async fn test_connections_endpoint() {
        let transport = transport();
        let request = FeedRequest::new("/entities/org-1/connections");

        let response = transport.get(&request).await.unwrap();
        let connections: Vec<Connection> = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(connections.len(), 1);

        let missing = transport.get(&FeedRequest::new("/nowhere")).await.unwrap();
        assert_eq!(missing.status, 404);
    }
}
