//! Globe session: the four engines on one cooperative loop.
//!
//! ```text
//!  TemporalController ──range──▶ FeedSync ──batch──▶ GeometryMapper ──snapshot──▶ RenderLoop
//!         │ position/range                                                          │ clicks
//!         └────────────────────────────▶ GlobeHost ◀────────────────────────────────┘
//! ```
//!
//! Every periodic activity (playback ticks, animation frames, the feed poll)
//! is a `Periodic` polled from [`GlobeSession::pump`]. Fetches are the only
//! spawned work and never block a pump.

use crate::config::GlobeConfig;
use crate::feed::{FeedSnapshot, FeedSync, SyncStatus};
use crate::geometry::{GeoBounds, GeometryMapper, GlobeGeometry, MapFilter};
use crate::host::GlobeHost;
use crate::model::{Category, FeedQuery, MAX_PER_PAGE};
use crate::playback::{PlaybackError, PlaybackEvent, PlaybackState, TemporalController, TemporalWindow};
use crate::render::{GlobeRenderer, InteractionEvent, RenderError, RenderLoop, Viewport};
use crate::schedule::{MissedTicks, Periodic};
use enjin_env::{EnjinContext, FeedTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Fatal session errors.
#[derive(Debug, Error)]
pub enum GlobeError {
    #[error("Globe failed to start: {0}")]
    Render(#[from] RenderError),

    #[error("Invalid time window: {0}")]
    Playback(#[from] PlaybackError),
}

/// Host-selected filters. The time window comes from the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedFilters {
    pub category: Option<Category>,
    pub region: Option<String>,
    pub bounds: Option<GeoBounds>,
}

/// One globe view with its playback, sync and render state.
pub struct GlobeSession<C, T, R, H>
where
    C: EnjinContext,
    T: FeedTransport,
    R: GlobeRenderer,
    H: GlobeHost,
{
    ctx: Arc<C>,
    config: GlobeConfig,
    host: H,
    controller: TemporalController,
    sync: FeedSync<C, T>,
    mapper: GeometryMapper,
    render: RenderLoop<R>,
    filters: FeedFilters,
    playback_timer: Periodic,
    poll_timer: Periodic,
    torn_down: bool,
}

impl<C, T, R, H> GlobeSession<C, T, R, H>
where
    C: EnjinContext,
    T: FeedTransport,
    R: GlobeRenderer,
    H: GlobeHost,
{
    /// Brings up the render surface, then issues the first feed request.
    ///
    /// # Arguments
    /// * `viewport` - Container size; `None` is a startup failure
    /// * `window` - Initial playback range
    ///
    /// # Errors
    /// Render surface failures are returned before any request is issued.
    pub fn start(
        ctx: Arc<C>,
        transport: Arc<T>,
        renderer: R,
        viewport: Option<Viewport>,
        window: TemporalWindow,
        mut host: H,
        config: GlobeConfig,
    ) -> Result<Self, GlobeError> {
        let now = ctx.now();
        let render = RenderLoop::start(renderer, viewport, config.render.clone(), now, &mut host)?;

        let controller = TemporalController::new(window, &config.playback);
        let sync = FeedSync::new(Arc::clone(&ctx), transport, config.sync.clone());
        let playback_timer = Periodic::inert(config.playback.tick_interval, MissedTicks::CatchUp);
        let poll_timer = Periodic::start(now, config.sync.poll_interval, MissedTicks::Skip);

        let mut session = Self {
            ctx,
            config,
            host,
            controller,
            sync,
            mapper: GeometryMapper::new(),
            render,
            filters: FeedFilters::default(),
            playback_timer,
            poll_timer,
            torn_down: false,
        };

        info!(seed = session.ctx.seed(), "Globe session started");
        let query = session.query();
        session.sync.request(&query);
        Ok(session)
    }

    // =========================================================================
    // LOOP
    // =========================================================================

    /// Runs everything that is due at the current context time.
    pub fn pump(&mut self) {
        if self.torn_down {
            return;
        }
        let now = self.ctx.now();

        let ticks = self.playback_timer.poll(now);
        for _ in 0..ticks {
            if !self.controller.tick() {
                break;
            }
        }

        if self.poll_timer.poll(now) > 0 {
            let query = self.query();
            self.sync.request(&query);
        }

        self.render.frame(now);
        self.settle_playback();
    }

    /// Pumps once per frame interval until `shutdown` is set, then tears down.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) {
        let frame = self.config.render.frame_interval;
        while !shutdown.load(Ordering::SeqCst) && !self.torn_down {
            self.pump();
            self.ctx.sleep(frame).await;
        }
        self.teardown();
    }

    /// Cancels every timer and in-flight fetch. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.playback_timer.cancel();
        self.poll_timer.cancel();
        self.render.teardown();
        self.sync.teardown();
        self.torn_down = true;
        info!("Globe session torn down");
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    pub fn seek(&mut self, position: f64) {
        self.controller.seek(position);
        self.settle_playback();
    }

    pub fn toggle_play(&mut self) {
        self.controller.toggle_play();
        self.settle_playback();
    }

    pub fn cycle_speed(&mut self) {
        self.controller.cycle_speed();
        self.settle_playback();
    }

    /// Replaces the playback range. The position is kept.
    pub fn set_range(&mut self, window: TemporalWindow) {
        self.controller.set_range(window);
        self.settle_playback();
    }

    pub fn begin_drag(&mut self, offset_px: f64, track_width_px: f64) {
        self.controller.begin_drag(offset_px, track_width_px);
        self.settle_playback();
    }

    pub fn drag_to(&mut self, offset_px: f64) {
        self.controller.drag_to(offset_px);
        self.settle_playback();
    }

    pub fn end_drag(&mut self) {
        self.controller.end_drag();
    }

    /// Replaces the host filters. The feed is re-queried only when the server
    /// query changes; bounds are applied client-side.
    pub fn set_filters(&mut self, filters: FeedFilters) {
        if filters == self.filters || self.torn_down {
            return;
        }
        let previous = self.query();
        self.filters = filters;
        let query = self.query();
        if query != previous {
            self.sync.request(&query);
        }
        self.remap();
    }

    /// Manual refresh: re-issues the current query even inside the dedupe window.
    pub fn refresh(&mut self) {
        if self.torn_down {
            return;
        }
        let query = self.query();
        self.sync.refresh(&query);
    }

    pub fn handle_input(&mut self, event: InteractionEvent) {
        let now = self.ctx.now();
        self.render.handle(event, now, &mut self.host);
    }

    // =========================================================================
    // STATE
    // =========================================================================

    /// Feed query for the current range and filters.
    pub fn query(&self) -> FeedQuery {
        let window = self.controller.window();
        FeedQuery {
            category: self.filters.category,
            region: self.filters.region.clone(),
            from: Some(window.start()),
            to: Some(window.end()),
            page: 1,
            per_page: MAX_PER_PAGE,
        }
    }

    /// Mapper filter: host filters plus `[range start, displayed instant]`.
    pub fn map_filter(&self) -> MapFilter {
        MapFilter {
            category: self.filters.category,
            region: self.filters.region.clone(),
            window: Some(self.controller.elapsed_window()),
            bounds: self.filters.bounds,
        }
    }

    pub fn playback(&self) -> PlaybackState {
        self.controller.state()
    }

    pub fn window(&self) -> TemporalWindow {
        self.controller.window()
    }

    pub fn controller(&self) -> &TemporalController {
        &self.controller
    }

    pub fn feed(&self) -> FeedSnapshot {
        self.sync.snapshot()
    }

    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn sync(&self) -> &FeedSync<C, T> {
        &self.sync
    }

    pub fn geometry(&self) -> &Arc<GlobeGeometry> {
        self.render.geometry()
    }

    pub fn render(&self) -> &RenderLoop<R> {
        &self.render
    }

    pub fn filters(&self) -> &FeedFilters {
        &self.filters
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn context(&self) -> &Arc<C> {
        &self.ctx
    }

    pub fn now(&self) -> Duration {
        self.ctx.now()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Aligns the playback timer with the controller, forwards its events
    /// and refreshes the geometry.
    fn settle_playback(&mut self) {
        if self.torn_down {
            return;
        }

        let playing = self.controller.is_playing();
        if playing && !self.playback_timer.is_active() {
            self.playback_timer.restart(self.ctx.now());
        } else if !playing && self.playback_timer.is_active() {
            self.playback_timer.cancel();
        }

        for event in self.controller.drain_events() {
            match event {
                PlaybackEvent::PositionChanged(position) => self.host.on_position_change(position),
                PlaybackEvent::RangeChanged(window) => {
                    self.host.on_range_change(&window);
                    let query = self.query();
                    self.sync.request(&query);
                }
                PlaybackEvent::PlayingChanged(playing) => debug!(playing, "Playback state changed"),
                PlaybackEvent::SpeedChanged(speed) => debug!(speed = speed.label(), "Playback speed changed"),
            }
        }

        self.remap();
    }

    fn remap(&mut self) {
        let snapshot = self.sync.snapshot();
        let filter = self.map_filter();
        let geometry = self.mapper.map(&snapshot.feed, &filter);
        self.render.replace_geometry(geometry);
    }
}

impl<C, T, R, H> Drop for GlobeSession<C, T, R, H>
where
    C: EnjinContext,
    T: FeedTransport,
    R: GlobeRenderer,
    H: GlobeHost,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RenderPoint;
    use crate::headless::HeadlessRenderer;
    use crate::model::{Event, EventFeed};
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use enjin_env::{EnvError, FeedRequest, ManualContext, ResponseEnvelope};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct StaticFeed {
        feed: EventFeed,
        requests: Mutex<Vec<FeedRequest>>,
        calls: AtomicUsize,
    }

    impl StaticFeed {
        fn new(events: Vec<Event>) -> Arc<Self> {
            Arc::new(Self {
                feed: EventFeed::from_events(events),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedTransport for StaticFeed {
        async fn get(&self, request: &FeedRequest) -> Result<ResponseEnvelope, EnvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            let body = serde_json::to_vec(&self.feed).map_err(|e| EnvError::SerializationError(e.to_string()))?;
            Ok(ResponseEnvelope::ok(body))
        }

        fn endpoint(&self) -> String {
            "static".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        ready: u32,
        positions: Vec<f64>,
        ranges: Vec<TemporalWindow>,
        clicks: Vec<String>,
    }

    impl GlobeHost for RecordingHost {
        fn on_point_click(&mut self, point: &RenderPoint) {
            self.clicks.push(point.id.clone());
        }

        fn on_globe_ready(&mut self) {
            self.ready += 1;
        }

        fn on_position_change(&mut self, position: f64) {
            self.positions.push(position);
        }

        fn on_range_change(&mut self, range: &TemporalWindow) {
            self.ranges.push(*range);
        }
    }

    type TestSession = GlobeSession<ManualContext, StaticFeed, HeadlessRenderer, RecordingHost>;

    fn day(d: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn window() -> TemporalWindow {
        TemporalWindow::new(day(1), day(11)).unwrap()
    }

    fn events() -> Vec<Event> {
        vec![
            Event::new("early", "A").at(10.0, 20.0).occurred(day(2)),
            Event::new("middle", "B").at(30.0, 40.0).occurred(day(6)),
            Event::new("late", "C").at(-10.0, 60.0).occurred(day(10)),
        ]
    }

    fn start(ctx: &ManualContext, transport: &Arc<StaticFeed>) -> TestSession {
        GlobeSession::start(
            Arc::new(ctx.clone()),
            Arc::clone(transport),
            HeadlessRenderer::new(),
            Some(Viewport::new(800, 600)),
            window(),
            RecordingHost::default(),
            GlobeConfig::default(),
        )
        .unwrap()
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn step(ctx: &ManualContext, session: &mut TestSession, by: Duration) {
        ctx.advance(by);
        settle().await;
        session.pump();
    }

    #[tokio::test]
    async fn test_missing_viewport_fails_before_fetching() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());

        let result = GlobeSession::start(
            Arc::new(ctx.clone()),
            Arc::clone(&transport),
            HeadlessRenderer::new(),
            None,
            window(),
            RecordingHost::default(),
            GlobeConfig::default(),
        );
        settle().await;

        assert!(matches!(result, Err(GlobeError::Render(RenderError::MissingViewport))));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_request_carries_range() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let session = start(&ctx, &transport);
        settle().await;

        assert_eq!(session.host().ready, 1);
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].param("from"), Some("2024-01-01T00:00:00Z"));
        assert_eq!(requests[0].param("to"), Some("2024-01-11T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_ten_ticks_after_play() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);

        session.toggle_play();
        for _ in 0..10 {
            step(&ctx, &mut session, Duration::from_millis(50)).await;
        }

        assert_relative_eq!(session.playback().position, 0.010, epsilon = 1e-12);
        assert!(session.playback().is_playing);
        assert_eq!(session.host().positions.len(), 10);
    }

    #[tokio::test]
    async fn test_stalled_loop_catches_up_ticks() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);

        session.toggle_play();
        step(&ctx, &mut session, Duration::from_millis(500)).await;

        assert_relative_eq!(session.playback().position, 0.010, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn test_scrub_replays_event_population() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);
        step(&ctx, &mut session, Duration::from_millis(16)).await;

        assert_eq!(session.feed().feed.events.len(), 3);
        assert!(session.geometry().points.is_empty());

        session.seek(0.5);
        let ids: Vec<_> = session.geometry().points.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["early", "middle"]);

        session.seek(1.0);
        assert_eq!(session.geometry().points.len(), 3);
        assert_eq!(session.render().renderer().points().len(), 3);
    }

    #[tokio::test]
    async fn test_live_update_keeps_camera() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);
        session.seek(1.0);

        session.handle_input(InteractionEvent::Start);
        session.handle_input(InteractionEvent::Orbit { delta_lat: 10.0, delta_lng: -30.0 });
        let pose = session.render().pose();

        step(&ctx, &mut session, Duration::from_millis(16)).await;

        assert_eq!(session.geometry().points.len(), 3);
        assert_eq!(session.render().pose(), pose);
    }

    #[tokio::test]
    async fn test_poll_interval_reissues_query() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);
        settle().await;
        assert_eq!(transport.calls(), 1);

        step(&ctx, &mut session, Duration::from_secs(29)).await;
        assert_eq!(transport.calls(), 1);

        step(&ctx, &mut session, Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_range_change_notifies_host_and_requeries() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);
        settle().await;

        let new_range = TemporalWindow::new(day(3), day(9)).unwrap();
        session.set_range(new_range);
        settle().await;

        assert_eq!(session.host().ranges, vec![new_range]);
        assert_eq!(transport.calls(), 2);
        assert_eq!(session.query().from, Some(day(3)));
    }

    #[tokio::test]
    async fn test_bounds_filter_remaps_without_requery() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);
        settle().await;
        session.seek(1.0);

        // Past the dedupe window, so an unchanged query would otherwise refetch
        step(&ctx, &mut session, Duration::from_secs(6)).await;
        assert_eq!(transport.calls(), 1);

        session.set_filters(FeedFilters {
            bounds: Some(GeoBounds::new(0.0, 0.0, 35.0, 45.0)),
            ..FeedFilters::default()
        });
        settle().await;

        // Bounds are applied client-side, so the server query is unchanged
        assert_eq!(transport.calls(), 1);
        assert_eq!(session.geometry().points.len(), 2);

        session.set_filters(FeedFilters {
            region: Some("Baltic".to_string()),
            ..FeedFilters::default()
        });
        settle().await;

        assert_eq!(transport.calls(), 2);
        assert!(session.geometry().points.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_bypasses_dedupe() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);
        settle().await;

        session.refresh();
        settle().await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(session.status(), SyncStatus::Fresh);
    }

    #[tokio::test]
    async fn test_teardown_stops_all_timers() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);
        session.toggle_play();
        step(&ctx, &mut session, Duration::from_millis(50)).await;

        session.teardown();
        let position = session.playback().position;
        let pose = session.render().pose();

        step(&ctx, &mut session, Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(session.playback().position, position);
        assert_eq!(session.render().pose(), pose);
        assert_eq!(transport.calls(), 1);
        assert!(session.is_torn_down());
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let ctx = ManualContext::new(7);
        let transport = StaticFeed::new(events());
        let mut session = start(&ctx, &transport);

        let shutdown = Arc::new(AtomicBool::new(true));
        session.run(shutdown).await;

        assert!(session.is_torn_down());
    }
}
