//! Scenario runner - drives a full globe session on virtual time.
//!
//! Every scenario runs the real [`GlobeSession`] against [`SimTransport`]
//! on a current-thread runtime. The clock only moves in frame-sized steps:
//! advance, let spawned fetches settle, pump. Invariants that must hold on
//! every frame are checked in [`Harness::step`]; the rest per scenario.

use crate::context::SimContext;
use crate::exporter::{SimExport, SimFrame};
use crate::oracle::EventOracle;
use crate::scenarios::ScenarioId;
use crate::transport::{RequestOutcome, SimTransport};

use chrono::{TimeZone, Utc};
use enjin_core::projection::Projection;
use enjin_core::{
    FeedFilters, GeoBounds, GlobeConfig, GlobeHost, GlobeSession, HeadlessRenderer, InteractionEvent,
    RenderPoint, RotationState, Speed, SyncStatus, TemporalWindow, Viewport,
};
use enjin_env::EnjinContext;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Frames between export samples (about 4 per virtual second).
const EXPORT_EVERY: u64 = 16;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Frames stepped
    pub total_ticks: u64,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    fn failed(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Requests that reached the transport
    pub requests: u64,

    /// Requests that failed at the transport or returned a 5xx
    pub failed_requests: u64,

    /// Feed batches applied
    pub batches_applied: u64,

    /// Animation frames rendered
    pub frames_rendered: u64,

    /// Largest point count seen in any snapshot
    pub peak_points: usize,

    /// Position callbacks delivered to the host
    pub position_changes: u64,

    /// Clicks that resolved to a point
    pub clicks: usize,
}

/// Host that records every callback.
#[derive(Debug, Default)]
pub struct SimHost {
    pub ready: u32,
    pub clicks: Vec<String>,
    pub position_changes: u64,
    pub ranges: Vec<TemporalWindow>,
}

impl GlobeHost for SimHost {
    fn on_point_click(&mut self, point: &RenderPoint) {
        self.clicks.push(point.id.clone());
    }

    fn on_globe_ready(&mut self) {
        self.ready += 1;
    }

    fn on_position_change(&mut self, _position: f64) {
        self.position_changes += 1;
    }

    fn on_range_change(&mut self, range: &TemporalWindow) {
        self.ranges.push(*range);
    }
}

type SimSession = GlobeSession<SimContext, SimTransport, HeadlessRenderer, SimHost>;

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Virtual time per step
    frame: Duration,

    /// Maximum duration in seconds
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            frame: Duration::from_millis(16),
            max_duration_secs: 120.0,
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario and writes sampled frames to `path`.
    pub fn run_with_export(&self, scenario: ScenarioId, path: &str) -> ScenarioResult {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let result = self.execute(scenario, Some(&mut export));
        export.finalize(result.passed, result.failure_reason.clone());

        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path),
            Err(e) => error!("Failed to write export: {:?}", e),
        }
        result
    }

    fn execute(&self, scenario: ScenarioId, export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("{}", scenario.description());

        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => return ScenarioResult::failed(scenario, self.seed, format!("Runtime failed: {}", e)),
        };

        let deadline = Duration::try_from_secs_f64(self.max_duration_secs).unwrap_or(Duration::from_secs(120));

        runtime.block_on(async {
            let mut harness = match Harness::new(self.seed, scenario, self.frame, deadline, export) {
                Ok(harness) => harness,
                Err(reason) => return ScenarioResult::failed(scenario, self.seed, reason),
            };

            let outcome = match scenario {
                ScenarioId::PlaybackSweep => playback_sweep(&mut harness).await,
                ScenarioId::RetryStorm => retry_storm(&mut harness).await,
                ScenarioId::OutOfOrder => out_of_order(&mut harness).await,
                ScenarioId::IdleResume => idle_resume(&mut harness).await,
                ScenarioId::LiveChurn => live_churn(&mut harness).await,
                ScenarioId::RegionFilter => region_filter(&mut harness).await,
            };

            harness.finish(scenario, self.seed, outcome)
        })
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// Catalog size served at startup.
fn catalog_size(scenario: ScenarioId) -> usize {
    match scenario {
        ScenarioId::RetryStorm | ScenarioId::LiveChurn => 40,
        _ => 80,
    }
}

fn config_for(scenario: ScenarioId) -> GlobeConfig {
    let mut config = GlobeConfig::default();
    match scenario {
        ScenarioId::PlaybackSweep | ScenarioId::IdleResume | ScenarioId::LiveChurn => {}
        // Keep the poll out of the way of request counting
        _ => config.sync.poll_interval = Duration::from_secs(600),
    }
    config
}

/// Thirty days of January 2024.
fn sim_window() -> Result<TemporalWindow, String> {
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .ok_or("invalid window start")?;
    let end = Utc
        .with_ymd_and_hms(2024, 1, 31, 0, 0, 0)
        .single()
        .ok_or("invalid window end")?;
    TemporalWindow::new(start, end).map_err(|e| e.to_string())
}

/// Lets spawned fetches run to their next await point.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn check(condition: bool, reason: impl Into<String>) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason.into())
    }
}

struct Harness<'e> {
    ctx: Arc<SimContext>,
    transport: Arc<SimTransport>,
    session: SimSession,
    oracle: EventOracle,
    frame: Duration,
    deadline: Duration,
    ticks: u64,
    peak_points: usize,
    notes: Vec<String>,
    export: Option<&'e mut SimExport>,
}

impl<'e> Harness<'e> {
    /// Seeds the catalog, then starts the session. Must run inside the runtime.
    fn new(
        seed: u64,
        scenario: ScenarioId,
        frame: Duration,
        deadline: Duration,
        export: Option<&'e mut SimExport>,
    ) -> Result<Self, String> {
        let window = sim_window()?;
        let ctx = Arc::new(SimContext::new(seed));
        let transport = Arc::new(SimTransport::new((*ctx).clone()));

        // Separate stream so fault injection doesn't shift the catalog
        let mut oracle = EventOracle::new(seed.wrapping_mul(0x9e3779b97f4a7c15), window);
        transport.publish(oracle.generate(catalog_size(scenario)));
        if scenario == ScenarioId::RetryStorm {
            transport.fail_next(3);
        }

        let session = GlobeSession::start(
            Arc::clone(&ctx),
            Arc::clone(&transport),
            HeadlessRenderer::new(),
            Some(Viewport::new(1280, 800)),
            window,
            SimHost::default(),
            config_for(scenario),
        )
        .map_err(|e| e.to_string())?;

        Ok(Self {
            ctx,
            transport,
            session,
            oracle,
            frame,
            deadline,
            ticks: 0,
            peak_points: 0,
            notes: Vec::new(),
            export,
        })
    }

    fn points(&self) -> usize {
        self.session.geometry().points.len()
    }

    fn now(&self) -> Duration {
        self.ctx.now()
    }

    fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(t = self.now().as_secs_f64(), "{}", message);
        self.notes.push(message);
    }

    /// One frame: advance, settle, pump, then the per-frame invariants.
    async fn step(&mut self) -> Result<(), String> {
        if self.now() >= self.deadline {
            return Err(format!("Timed out at {:.1}s", self.now().as_secs_f64()));
        }

        self.ctx.advance_time(self.frame);
        settle().await;
        self.session.pump();
        self.ticks += 1;

        let geometry = self.session.geometry();
        self.peak_points = self.peak_points.max(geometry.points.len());

        let position = self.session.playback().position;
        check(
            (0.0..=1.0).contains(&position),
            format!("Position {} escaped [0, 1]", position),
        )?;
        for arc in geometry.arcs.iter() {
            check(
                geometry.point(&arc.source_id).is_some() && geometry.point(&arc.target_id).is_some(),
                format!("Arc {} -> {} has a dangling end", arc.source_id, arc.target_id),
            )?;
        }

        if self.ticks % EXPORT_EVERY == 0 {
            self.sample();
        }
        Ok(())
    }

    async fn run_until(&mut self, what: &str, done: impl Fn(&Self) -> bool) -> Result<(), String> {
        while !done(self) {
            self.step().await.map_err(|e| format!("{} waiting for {}", e, what))?;
        }
        Ok(())
    }

    async fn run_for(&mut self, duration: Duration) -> Result<(), String> {
        let until = self.now() + duration;
        while self.now() < until {
            self.step().await?;
        }
        Ok(())
    }

    async fn first_batch(&mut self) -> Result<(), String> {
        self.run_until("first batch", |h| h.session.status() == SyncStatus::Fresh)
            .await?;
        self.note(format!("First batch: {} events", self.session.feed().feed.events.len()));
        Ok(())
    }

    fn sample(&mut self) {
        let Some(export) = self.export.as_deref_mut() else {
            self.notes.clear();
            return;
        };

        let render = self.session.render();
        let snapshot = self.session.feed();
        export.add_frame(SimFrame {
            time_sec: self.ctx.now().as_secs_f64(),
            playback: self.session.playback(),
            displayed_at: self.session.controller().displayed_instant().to_rfc3339(),
            camera: render.pose(),
            rotating: render.rotation() == RotationState::Rotating,
            points: render.geometry().points.len(),
            arcs: render.geometry().arcs.len(),
            status: snapshot.status,
            generation: snapshot.generation,
            events: std::mem::take(&mut self.notes),
        });
    }

    fn finish(mut self, scenario: ScenarioId, seed: u64, outcome: Result<(), String>) -> ScenarioResult {
        self.sample();
        self.session.teardown();

        let requests = self.transport.requests();
        let failed_requests = requests
            .iter()
            .filter(|r| match &r.outcome {
                RequestOutcome::Failed(_) => true,
                RequestOutcome::Served { status, .. } => *status >= 500,
            })
            .count() as u64;

        let metrics = ScenarioMetrics {
            requests: requests.len() as u64,
            failed_requests,
            batches_applied: self.session.sync().generation(),
            frames_rendered: self.session.render().frames(),
            peak_points: self.peak_points,
            position_changes: self.session.host().position_changes,
            clicks: self.session.host().clicks.len(),
        };
        debug!(?metrics, "Scenario metrics");

        let (passed, failure_reason) = match outcome {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };

        ScenarioResult {
            scenario,
            seed,
            passed,
            total_ticks: self.ticks,
            final_time_secs: self.now().as_secs_f64(),
            failure_reason,
            metrics,
        }
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

/// SIM-001: PlaybackSweep - play the whole window at 4x.
///
/// **Assertion**: position and point count never decrease, playback
/// auto-pauses at exactly 1, and every renderable event is on screen.
async fn playback_sweep(h: &mut Harness<'_>) -> Result<(), String> {
    h.first_batch().await?;

    h.session.cycle_speed();
    h.session.cycle_speed();
    check(
        h.session.playback().speed == Speed::Quadruple,
        "Two speed cycles from 1x should reach 4x",
    )?;

    h.session.toggle_play();
    h.note("Playback started at 4x");

    let mut last_position = h.session.playback().position;
    let mut last_points = h.points();
    while h.session.playback().is_playing {
        h.step().await?;

        let position = h.session.playback().position;
        let points = h.points();
        check(position >= last_position, format!("Position went back: {} -> {}", last_position, position))?;
        check(points >= last_points, format!("Points dropped during playback: {} -> {}", last_points, points))?;
        last_position = position;
        last_points = points;
    }
    h.note("Playback reached the end");

    check(
        (h.session.playback().position - 1.0).abs() < 1e-9,
        format!("Playback paused early at {}", h.session.playback().position),
    )?;
    check(h.session.host().position_changes >= 200, "Too few position callbacks for a 4x sweep")?;

    let expected = h.oracle.renderable_count();
    check(
        h.points() == expected,
        format!("Expected {} points at the end, saw {}", expected, h.points()),
    )
}

/// SIM-002: RetryStorm - three failures, then success; then a full exhaustion.
///
/// **Assertion**: no error surfaces while retries remain, retries are spaced
/// by the retry interval, and an exhausted refresh keeps the last good batch.
async fn retry_storm(h: &mut Harness<'_>) -> Result<(), String> {
    h.session.seek(1.0);

    while h.session.status() != SyncStatus::Fresh {
        h.step().await?;
        check(h.session.status() != SyncStatus::Error, "Error surfaced while retries remained")?;
    }

    let requests = h.transport.requests();
    check(requests.len() == 4, format!("Expected 4 attempts, saw {}", requests.len()))?;
    for pair in requests.windows(2) {
        let gap = pair[1].issued_at_ms.saturating_sub(pair[0].completed_at_ms);
        check(gap >= 5_000, format!("Retry issued {}ms after the previous failure", gap))?;
    }
    check(h.points() == h.oracle.renderable_count(), "Recovered batch not fully rendered")?;
    h.note("Recovered after 3 failures");

    let generation = h.session.sync().generation();
    let points = h.points();
    h.transport.fail_next(4);
    h.session.refresh();

    h.run_until("retry exhaustion", |h| h.session.status() == SyncStatus::Error)
        .await?;
    h.note("Retry budget exhausted");

    check(h.transport.request_count() == 8, "Refresh did not use exactly one retry budget")?;
    check(h.session.sync().generation() == generation, "A failed refresh replaced the batch")?;
    check(h.points() == points, "Stale batch was dropped on failure")?;
    check(h.session.feed().last_error.is_some(), "Error status without an error message")
}

/// SIM-003: OutOfOrder - a slow response for an older range lands last.
///
/// **Assertion**: only the newer range's batch is applied.
async fn out_of_order(h: &mut Harness<'_>) -> Result<(), String> {
    h.first_batch().await?;
    let generation = h.session.sync().generation();

    let window = h.session.window();
    let mid = window.instant_at(0.5);
    let early = TemporalWindow::new(window.start(), mid).map_err(|e| e.to_string())?;
    let late = TemporalWindow::new(mid, window.end()).map_err(|e| e.to_string())?;

    h.transport
        .script_latencies([Duration::from_secs(3), Duration::from_millis(200)]);
    h.session.set_range(early);
    h.step().await?;
    h.session.set_range(late);
    h.note("Issued slow early range, then fast late range");

    h.run_for(Duration::from_secs(5)).await?;

    check(h.transport.request_count() == 3, "Range changes should issue one request each")?;
    check(h.session.host().ranges.len() == 2, "Host missed a range change")?;
    check(
        h.session.sync().generation() == generation + 1,
        "Superseded response was applied",
    )?;

    let feed = h.session.feed().feed;
    check(
        feed.events
            .iter()
            .all(|e| e.occurred_at.is_some_and(|at| late.contains(at))),
        "Applied batch does not belong to the latest range",
    )
}

/// SIM-004: IdleResume - drags suspend rotation, idle resumes it.
///
/// **Assertion**: the camera holds still while suspended and rotation
/// resumes 3s after the last release, not the first.
async fn idle_resume(h: &mut Harness<'_>) -> Result<(), String> {
    h.first_batch().await?;
    h.session.seek(1.0);
    h.step().await?;

    check(h.session.host().ready == 1, "Globe ready should fire exactly once")?;
    check(h.session.render().rotation() == RotationState::Rotating, "Not rotating at start")?;

    // Click the first visible point, then empty space
    let pose = h.session.render().pose();
    let projection = Projection::new(&pose, h.session.render().viewport());
    let target = h
        .session
        .geometry()
        .points
        .iter()
        .find_map(|p| projection.project(p.latitude, p.longitude, p.altitude));
    if let Some((x, y)) = target {
        h.session.handle_input(InteractionEvent::Click { x, y });
        check(h.session.host().clicks.len() == 1, "Click on a visible point did not resolve")?;
    }
    let clicks = h.session.host().clicks.len();
    h.session.handle_input(InteractionEvent::Click { x: 0.0, y: 0.0 });
    check(h.session.host().clicks.len() == clicks, "Click on empty space resolved")?;

    let start_lng = h.session.render().pose().longitude;
    h.run_for(Duration::from_secs(1)).await?;
    check(h.session.render().pose().longitude != start_lng, "Camera did not rotate")?;

    h.session.handle_input(InteractionEvent::Start);
    h.session.handle_input(InteractionEvent::Orbit {
        delta_lat: 5.0,
        delta_lng: -10.0,
    });
    let held = h.session.render().pose();
    h.run_for(Duration::from_secs(2)).await?;
    check(h.session.render().pose() == held, "Camera moved during a drag")?;

    h.session.handle_input(InteractionEvent::End);
    h.run_for(Duration::from_secs(2)).await?;
    check(h.session.render().pose() == held, "Camera moved before the idle timeout")?;

    // Second gesture restarts the countdown
    h.session.handle_input(InteractionEvent::Start);
    h.session.handle_input(InteractionEvent::End);
    let released = h.now();
    h.note("Second drag released");

    h.run_until("rotation resume", |h| {
        h.session.render().rotation() == RotationState::Rotating
    })
    .await?;
    let waited = h.now() - released;
    h.note(format!("Rotation resumed after {:.3}s", waited.as_secs_f64()));

    check(
        waited >= Duration::from_secs(3),
        format!("Rotation resumed after only {:?}", waited),
    )?;
    check(
        waited <= Duration::from_secs(3) + h.frame * 2,
        format!("Rotation resumed late, after {:?}", waited),
    )
}

/// SIM-005: LiveChurn - new events appear through polling under 20% 503s.
///
/// **Assertion**: point count never drops and the new events are rendered.
async fn live_churn(h: &mut Harness<'_>) -> Result<(), String> {
    h.first_batch().await?;
    h.session.seek(1.0);
    h.transport.set_failure_rate(0.2);
    h.transport
        .set_latency(Duration::from_millis(80), Duration::from_millis(120));

    let mut last_points = h.points();
    let publish_at = h.now() + Duration::from_secs(10);
    let mut published = false;

    loop {
        h.step().await.map_err(|e| format!("{} waiting for new events", e))?;

        let points = h.points();
        check(points >= last_points, format!("Points dropped: {} -> {}", last_points, points))?;
        last_points = points;

        if !published && h.now() >= publish_at {
            let fresh = h.oracle.generate(20);
            h.transport.publish(fresh);
            published = true;
            h.note("Published 20 new events");
        }
        if published && points == h.oracle.renderable_count() {
            break;
        }
    }

    check(h.transport.catalog_len() == 60, "Catalog size mismatch")?;
    h.note(format!("{} points after churn", h.points()));
    Ok(())
}

/// SIM-006: RegionFilter - server-side region, client-side bounds.
///
/// **Assertion**: a region change requeries and narrows to matching events;
/// adding bounds narrows further without a new request.
async fn region_filter(h: &mut Harness<'_>) -> Result<(), String> {
    h.first_batch().await?;
    h.session.seek(1.0);
    h.step().await?;
    check(h.points() == h.oracle.renderable_count(), "Unfiltered batch not fully rendered")?;

    let requests = h.transport.request_count();
    let region = FeedFilters {
        region: Some("POLAND".to_string()),
        ..FeedFilters::default()
    };
    h.session.set_filters(region.clone());
    h.run_for(Duration::from_secs(1)).await?;

    check(h.transport.request_count() == requests + 1, "Region change did not requery")?;
    let in_region: Vec<_> = h
        .oracle
        .events()
        .iter()
        .filter(|e| {
            e.location_name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains("poland"))
        })
        .filter_map(|e| e.coordinates())
        .collect();
    check(
        h.points() == in_region.len(),
        format!("Region filter: expected {} points, saw {}", in_region.len(), h.points()),
    )?;

    let bounds = GeoBounds::new(54.0, 18.0, 60.0, 25.0);
    h.session.set_filters(FeedFilters {
        bounds: Some(bounds),
        ..region
    });
    h.run_for(Duration::from_secs(1)).await?;

    check(h.transport.request_count() == requests + 1, "Bounds change requeried")?;
    let in_bounds = in_region
        .iter()
        .filter(|(lat, lng)| bounds.contains(*lat, *lng))
        .count();
    check(
        h.points() == in_bounds,
        format!("Bounds filter: expected {} points, saw {}", in_bounds, h.points()),
    )
}
