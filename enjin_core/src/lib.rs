//! Enjin Core - Temporal Event Globe
//!
//! Client-side engines for replaying a polled event feed on a rotating globe:
//! 1. **Time**: a bounded, resumable virtual clock driven by a scrub position
//! 2. **Space**: pure mapping from events to points and relationship arcs
//! 3. **Sync**: polling with dedupe, retries and stale-but-available data
//! 4. **Render**: camera rotation, interaction suspension and click picking
//!
//! [`GlobeSession`] wires them together on a single cooperative loop.

pub mod config;
pub mod feed;
pub mod geometry;
pub mod headless;
pub mod host;
pub mod model;
pub mod playback;
pub mod projection;
pub mod render;
pub mod schedule;
pub mod session;

#[cfg(feature = "visualization")]
pub mod visualization;

// Re-export key types for convenience
pub use config::{GlobeConfig, PlaybackConfig, RenderConfig, SyncConfig};
pub use feed::{FeedClient, FeedError, FeedSnapshot, FeedSync, SyncStatus};
pub use geometry::{map_events, GeoBounds, GeometryMapper, GlobeGeometry, MapFilter, RenderArc, RenderPoint, Rgba};
pub use headless::HeadlessRenderer;
pub use host::{GlobeHost, NoopHost};
pub use model::{Category, Connection, Event, EventFeed, FeedQuery};
pub use playback::{PlaybackError, PlaybackEvent, PlaybackState, Speed, TemporalController, TemporalWindow};
pub use render::{CameraPose, GlobeRenderer, InteractionEvent, RenderError, RenderLoop, RotationState, Viewport};
pub use session::{FeedFilters, GlobeError, GlobeSession};

#[cfg(feature = "visualization")]
pub use visualization::RerunRenderer;
