//! The "TIME" Engine - Temporal Window Controller
//!
//! Turns a linear scrub position into a bounded, resumable virtual clock:
//! - A normalized position in [0, 1] mapped linearly onto a closed window
//! - Variable-speed autoplay advanced by a fixed-cadence timer
//! - Auto-pause at the end of the window, wrap-to-start on resume
//!
//! The controller owns no timer. The session polls a `Periodic` at the
//! configured cadence and calls [`TemporalController::tick`] once per firing,
//! so the advance rate is independent of the render frame rate.

use crate::config::PlaybackConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Positions this close to the end are treated as the end, so a sweep of
/// exact 0.001 steps finishes on tick 1000 despite float accumulation.
const END_SNAP: f64 = 1e-9;

/// Errors raised by the playback engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("window start {start} is after end {end}")]
    InvertedWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

// =============================================================================
// TEMPORAL WINDOW
// =============================================================================

/// A closed time interval (start <= end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TemporalWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, PlaybackError> {
        if start > end {
            return Err(PlaybackError::InvertedWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window of `span` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, span: ChronoDuration) -> Self {
        let span = span.max(ChronoDuration::zero());
        Self {
            start: end - span,
            end,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn span(&self) -> ChronoDuration {
        self.end - self.start
    }

    /// `start + (end - start) × position`, millisecond resolution.
    pub fn instant_at(&self, position: f64) -> DateTime<Utc> {
        let position = clamp_position(position).unwrap_or(0.0);
        let span_ms = self.span().num_milliseconds() as f64;
        self.start + ChronoDuration::milliseconds((span_ms * position).round() as i64)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

// =============================================================================
// PLAYBACK STATE
// =============================================================================

/// Autoplay speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Speed {
    Half,
    #[default]
    Normal,
    Double,
    Quadruple,
}

impl Speed {
    /// Ordered cycle used by `cycle_speed`.
    pub const CYCLE: [Speed; 4] = [Speed::Half, Speed::Normal, Speed::Double, Speed::Quadruple];

    pub fn multiplier(&self) -> f64 {
        match self {
            Speed::Half => 0.5,
            Speed::Normal => 1.0,
            Speed::Double => 2.0,
            Speed::Quadruple => 4.0,
        }
    }

    /// Next value in the cycle, wrapping 4x back to 0.5x.
    pub fn next(&self) -> Speed {
        match self {
            Speed::Half => Speed::Normal,
            Speed::Normal => Speed::Double,
            Speed::Double => Speed::Quadruple,
            Speed::Quadruple => Speed::Half,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Speed::Half => "0.5x",
            Speed::Normal => "1x",
            Speed::Double => "2x",
            Speed::Quadruple => "4x",
        }
    }
}

/// The (position, isPlaying, speed) triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Always within [0, 1]
    pub position: f64,
    pub is_playing: bool,
    pub speed: Speed,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            position: 0.0,
            is_playing: false,
            speed: Speed::Normal,
        }
    }
}

/// Changes surfaced to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    PositionChanged(f64),
    RangeChanged(TemporalWindow),
    PlayingChanged(bool),
    SpeedChanged(Speed),
}

/// Clamps to [0, 1]. NaN has no meaningful position and yields `None`.
fn clamp_position(x: f64) -> Option<f64> {
    if x.is_nan() {
        None
    } else {
        Some(x.clamp(0.0, 1.0))
    }
}

/// Converts a pointer offset inside the scrub track to a position.
///
/// A track with no width maps everything to the start.
pub fn position_from_offset(offset_px: f64, track_width_px: f64) -> f64 {
    if !(track_width_px > 0.0) {
        return 0.0;
    }
    clamp_position(offset_px / track_width_px).unwrap_or(0.0)
}

/// An in-progress scrub drag.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScrubDrag {
    track_width_px: f64,
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Owns `PlaybackState` and the active `TemporalWindow`.
///
/// # State machine
///
/// ```text
///            toggle_play (wraps to 0 if at end)
///   PAUSED ─────────────────────────────────────▶ PLAYING
///      ▲                                             │
///      └──── toggle_play / position reaches 1 ◀──────┘
/// ```
#[derive(Debug, Clone)]
pub struct TemporalController {
    state: PlaybackState,
    window: TemporalWindow,
    step_per_tick: f64,
    drag: Option<ScrubDrag>,
    events: Vec<PlaybackEvent>,
}

impl TemporalController {
    pub fn new(window: TemporalWindow, config: &PlaybackConfig) -> Self {
        Self {
            state: PlaybackState::default(),
            window,
            step_per_tick: config.step_per_tick,
            drag: None,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn window(&self) -> TemporalWindow {
        self.window
    }

    pub fn position(&self) -> f64 {
        self.state.position
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn speed(&self) -> Speed {
        self.state.speed
    }

    /// The instant the scrub position currently points at.
    pub fn displayed_instant(&self) -> DateTime<Utc> {
        self.window.instant_at(self.state.position)
    }

    /// Window from range start up to the displayed instant.
    pub fn elapsed_window(&self) -> TemporalWindow {
        TemporalWindow {
            start: self.window.start,
            end: self.displayed_instant(),
        }
    }

    /// Clamps `position` into [0, 1] and moves the cursor there.
    pub fn seek(&mut self, position: f64) {
        if let Some(position) = clamp_position(position) {
            self.set_position(position);
        }
    }

    /// Flips between PAUSED and PLAYING, rewinding first when resuming at the end.
    pub fn toggle_play(&mut self) {
        if self.state.is_playing {
            self.set_playing(false);
            return;
        }

        if self.state.position >= 1.0 {
            self.set_position(0.0);
        }
        self.set_playing(true);
    }

    /// Advances the speed multiplier; playback state is untouched.
    pub fn cycle_speed(&mut self) {
        self.state.speed = self.state.speed.next();
        self.events.push(PlaybackEvent::SpeedChanged(self.state.speed));
    }

    /// Replaces the window. The normalized position is kept and reinterpreted.
    pub fn set_range(&mut self, window: TemporalWindow) {
        if window == self.window {
            return;
        }
        self.window = window;
        self.events.push(PlaybackEvent::RangeChanged(window));
    }

    /// One playback timer firing. Returns true if the position moved.
    pub fn tick(&mut self) -> bool {
        if !self.state.is_playing {
            return false;
        }

        let before = self.state.position;
        let mut next = before + self.state.speed.multiplier() * self.step_per_tick;
        if next >= 1.0 - END_SNAP {
            next = 1.0;
        }
        self.set_position(next.min(1.0));
        self.state.position > before
    }

    // -------------------------------------------------------------------------
    // Scrub drag
    // -------------------------------------------------------------------------

    /// Pointer pressed on the scrub track.
    pub fn begin_drag(&mut self, offset_px: f64, track_width_px: f64) {
        self.drag = Some(ScrubDrag { track_width_px });
        self.seek(position_from_offset(offset_px, track_width_px));
    }

    /// Pointer moved while pressed. Ignored when no drag is active.
    pub fn drag_to(&mut self, offset_px: f64) {
        if let Some(drag) = self.drag {
            self.seek(position_from_offset(offset_px, drag.track_width_px));
        }
    }

    /// Pointer released.
    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Takes all changes recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }

    fn set_position(&mut self, position: f64) {
        if position != self.state.position {
            self.state.position = position;
            self.events.push(PlaybackEvent::PositionChanged(position));
        }
        if self.state.position >= 1.0 && self.state.is_playing {
            self.set_playing(false);
        }
    }

    fn set_playing(&mut self, playing: bool) {
        if self.state.is_playing != playing {
            self.state.is_playing = playing;
            self.events.push(PlaybackEvent::PlayingChanged(playing));
        }
    }
}
