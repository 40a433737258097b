//! Render/Interaction Loop
//!
//! Owns the camera pose and the rotation state. The 3D backend is an
//! injected [`GlobeRenderer`] so the loop itself has no drawing code and
//! can be driven headless.
//!
//! # Rotation state machine
//!
//! ```text
//!             InteractionStart
//!   ROTATING ──────────────────▶ SUSPENDED { resume_at: None }
//!      ▲                                │ InteractionEnd
//!      │                                ▼
//!      └──── idle timeout ◀──── SUSPENDED { resume_at: now + 3s }
//! ```
//!
//! A new InteractionStart during the countdown cancels it.

use crate::config::RenderConfig;
use crate::geometry::{GlobeGeometry, RenderArc, RenderPoint};
use crate::host::GlobeHost;
use crate::projection::normalize_longitude;
use crate::schedule::{Deadline, MissedTicks, Periodic};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Latitude limit for orbiting, in degrees.
pub const MAX_CAMERA_LATITUDE: f64 = 85.0;

/// Closest allowed camera altitude (globe radii).
pub const MIN_CAMERA_ALTITUDE: f64 = 0.1;

/// Farthest allowed camera altitude (globe radii).
pub const MAX_CAMERA_ALTITUDE: f64 = 10.0;

/// Startup failures of the render surface. All are fatal to the session.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No viewport to render into")]
    MissingViewport,

    #[error("Viewport has no area ({width}x{height})")]
    EmptyViewport { width: u32, height: u32 },

    #[error("Render surface creation failed: {0}")]
    Surface(String),
}

// =============================================================================
// CAMERA + VIEWPORT
// =============================================================================

/// Where the camera looks from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Sub-camera latitude in degrees
    pub latitude: f64,

    /// Sub-camera longitude in degrees, in [-180, 180)
    pub longitude: f64,

    /// Distance above the surface in globe radii
    pub altitude: f64,
}

impl CameraPose {
    /// Fixed starting viewpoint.
    pub const INITIAL: CameraPose = CameraPose {
        latitude: 20.0,
        longitude: 0.0,
        altitude: 2.5,
    };

    /// Moves the camera by a drag delta.
    pub fn orbit(&mut self, delta_lat: f64, delta_lng: f64) {
        if delta_lat.is_finite() {
            self.latitude = (self.latitude + delta_lat).clamp(-MAX_CAMERA_LATITUDE, MAX_CAMERA_LATITUDE);
        }
        if delta_lng.is_finite() {
            self.longitude = normalize_longitude(self.longitude + delta_lng);
        }
    }

    /// Multiplies the altitude. Factors below 1 zoom in.
    pub fn zoom(&mut self, factor: f64) {
        if factor.is_finite() && factor > 0.0 {
            self.altitude = (self.altitude * factor).clamp(MIN_CAMERA_ALTITUDE, MAX_CAMERA_ALTITUDE);
        }
    }
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Render surface size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Auto-rotation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    Rotating,

    /// Interaction in progress (`resume_at: None`) or idle countdown running
    Suspended { resume_at: Option<Duration> },
}

/// Discrete user input delivered to the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractionEvent {
    /// Drag or zoom gesture began
    Start,
    /// Gesture ended
    End,
    Orbit { delta_lat: f64, delta_lng: f64 },
    Zoom { factor: f64 },
    Click { x: f64, y: f64 },
    Resize(Viewport),
}

// =============================================================================
// RENDERER CAPABILITY
// =============================================================================

/// The narrow surface a 3D backend exposes to the loop.
///
/// Snapshots are shared, never copied: implementations keep the `Arc`s
/// and must not assume they can mutate them.
pub trait GlobeRenderer {
    /// Creates the drawing surface. Called once, before anything else.
    fn create_surface(&mut self, viewport: Viewport) -> Result<(), RenderError>;

    fn set_points(&mut self, points: Arc<[RenderPoint]>);

    fn set_arcs(&mut self, arcs: Arc<[RenderArc]>);

    fn set_camera_pose(&mut self, pose: &CameraPose);

    fn resize(&mut self, viewport: Viewport);

    /// Id of the point under a screen position, if any.
    fn resolve_click(&self, x: f64, y: f64) -> Option<String>;
}

// =============================================================================
// RENDER LOOP
// =============================================================================

/// Camera, rotation and primitive hand-off for one render surface.
pub struct RenderLoop<R: GlobeRenderer> {
    renderer: R,
    config: RenderConfig,
    pose: CameraPose,
    viewport: Viewport,
    rotation: RotationState,
    frame_timer: Periodic,
    resume: Deadline,
    geometry: Arc<GlobeGeometry>,
    frames: u64,
    torn_down: bool,
}

impl<R: GlobeRenderer> RenderLoop<R> {
    /// Creates the surface and starts the frame timer.
    ///
    /// # Arguments
    /// * `viewport` - Container size; `None` when there is no container
    /// * `now` - Context time, anchors the frame timer
    /// * `host` - Receives `on_globe_ready` once the surface exists
    pub fn start(
        mut renderer: R,
        viewport: Option<Viewport>,
        config: RenderConfig,
        now: Duration,
        host: &mut dyn GlobeHost,
    ) -> Result<Self, RenderError> {
        let viewport = viewport.ok_or(RenderError::MissingViewport)?;
        if viewport.is_empty() {
            return Err(RenderError::EmptyViewport {
                width: viewport.width,
                height: viewport.height,
            });
        }

        renderer.create_surface(viewport)?;

        let pose = config.initial_pose;
        let geometry = Arc::new(GlobeGeometry::empty());
        renderer.set_camera_pose(&pose);
        renderer.set_points(Arc::clone(&geometry.points));
        renderer.set_arcs(Arc::clone(&geometry.arcs));

        info!(
            width = viewport.width,
            height = viewport.height,
            "Render surface ready"
        );
        host.on_globe_ready();

        let frame_timer = Periodic::start(now, config.frame_interval, MissedTicks::Skip);
        Ok(Self {
            renderer,
            config,
            pose,
            viewport,
            rotation: RotationState::Rotating,
            frame_timer,
            resume: Deadline::default(),
            geometry,
            frames: 0,
            torn_down: false,
        })
    }

    /// Runs due animation frames. Returns how many frames were rendered.
    pub fn frame(&mut self, now: Duration) -> u32 {
        if self.torn_down {
            return 0;
        }

        if self.resume.fire_if_due(now) {
            debug!("Idle timeout elapsed, resuming rotation");
            self.rotation = RotationState::Rotating;
        }

        let fired = self.frame_timer.poll(now);
        if fired == 0 {
            return 0;
        }
        self.frames += fired as u64;

        if self.rotation == RotationState::Rotating {
            self.pose.longitude = normalize_longitude(self.pose.longitude + self.config.rotation_step_deg);
            self.renderer.set_camera_pose(&self.pose);
        }
        fired
    }

    /// Applies one user input.
    pub fn handle(&mut self, event: InteractionEvent, now: Duration, host: &mut dyn GlobeHost) {
        if self.torn_down {
            return;
        }

        match event {
            InteractionEvent::Start => {
                self.resume.disarm();
                self.rotation = RotationState::Suspended { resume_at: None };
            }
            InteractionEvent::End => {
                // Only a gesture in progress can be ended
                if self.rotation != (RotationState::Suspended { resume_at: None }) {
                    debug!("Ignoring interaction end without a matching start");
                    return;
                }
                let at = now + self.config.idle_before_resume;
                self.resume.arm(at);
                self.rotation = RotationState::Suspended { resume_at: Some(at) };
            }
            InteractionEvent::Orbit { delta_lat, delta_lng } => {
                self.pose.orbit(delta_lat, delta_lng);
                self.renderer.set_camera_pose(&self.pose);
            }
            InteractionEvent::Zoom { factor } => {
                self.pose.zoom(factor);
                self.renderer.set_camera_pose(&self.pose);
            }
            InteractionEvent::Click { x, y } => self.click(x, y, host),
            InteractionEvent::Resize(viewport) => self.resize(viewport),
        }
    }

    /// Hands a new snapshot to the renderer. Camera and rotation are untouched.
    pub fn replace_geometry(&mut self, geometry: Arc<GlobeGeometry>) {
        if self.torn_down || Arc::ptr_eq(&self.geometry, &geometry) {
            return;
        }
        self.renderer.set_points(Arc::clone(&geometry.points));
        self.renderer.set_arcs(Arc::clone(&geometry.arcs));
        self.geometry = geometry;
    }

    /// Stops the frame timer and the resume countdown. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.frame_timer.cancel();
        self.resume.disarm();
        self.torn_down = true;
        debug!(frames = self.frames, "Render loop torn down");
    }

    fn click(&mut self, x: f64, y: f64, host: &mut dyn GlobeHost) {
        let Some(id) = self.renderer.resolve_click(x, y) else {
            warn!(x, y, "Click did not resolve to a point");
            return;
        };

        match self.geometry.point(&id) {
            Some(point) => host.on_point_click(point),
            None => warn!(id = %id, "Clicked point is not in the current snapshot"),
        }
    }

    fn resize(&mut self, viewport: Viewport) {
        if viewport.is_empty() {
            warn!(width = viewport.width, height = viewport.height, "Ignoring empty resize");
            return;
        }
        if viewport != self.viewport {
            self.viewport = viewport;
            self.renderer.resize(viewport);
        }
    }

    pub fn pose(&self) -> CameraPose {
        self.pose
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn rotation(&self) -> RotationState {
        self.rotation
    }

    pub fn geometry(&self) -> &Arc<GlobeGeometry> {
        &self.geometry
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}
