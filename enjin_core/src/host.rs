//! Callbacks surfaced to the embedding application.

use crate::geometry::RenderPoint;
use crate::playback::TemporalWindow;

/// The host side of a globe session.
///
/// All methods default to no-ops so a host only implements what it uses.
/// What a click *means* (entity lookup, detail panels) is the host's
/// business; the session only reports which point was hit.
pub trait GlobeHost {
    /// A click resolved to a rendered point.
    fn on_point_click(&mut self, _point: &RenderPoint) {}

    /// The render surface came up. Fires once per session.
    fn on_globe_ready(&mut self) {}

    /// The scrub position moved.
    fn on_position_change(&mut self, _position: f64) {}

    /// The active time window was replaced.
    fn on_range_change(&mut self, _range: &TemporalWindow) {}
}

/// Host that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl GlobeHost for NoopHost {}
