//! Visualization module for the globe using Rerun.io
//!
//! Streams the render loop's state into a Rerun recording:
//! - Event points on a unit sphere, colored by category and lifted by altitude
//! - Relationship arcs as great-circle line strips
//! - The camera position and view direction
//!
//! Enable with the `visualization` feature flag.

use crate::geometry::{RenderArc, RenderPoint};
use crate::projection::{great_circle, surface_vector, Projection};
use crate::render::{CameraPose, GlobeRenderer, RenderError, Viewport};
use rerun::{RecordingStream, RecordingStreamBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Samples per arc polyline
const ARC_SEGMENTS: usize = 32;

/// Arcs float slightly above the points they connect
const ARC_LIFT: f64 = 1.02;

/// Scale from point radius units to scene units
const POINT_SCALE: f32 = 0.012;

/// Where the recording goes.
#[derive(Debug, Clone)]
enum RerunTarget {
    Spawn,
    File(PathBuf),
}

/// Rerun-backed [`GlobeRenderer`].
///
/// The recording stream is opened in `create_surface`, so a viewer that
/// cannot be spawned surfaces as a startup failure.
pub struct RerunRenderer {
    app_id: String,
    target: RerunTarget,
    rec: Option<RecordingStream>,
    viewport: Option<Viewport>,
    pose: CameraPose,
    points: Arc<[RenderPoint]>,
    pick_tolerance_px: f64,
    pose_sequence: i64,
}

impl RerunRenderer {
    /// Renderer that spawns a Rerun viewer.
    pub fn spawn(app_id: &str) -> Self {
        Self::with_target(app_id, RerunTarget::Spawn)
    }

    /// Renderer that saves an `.rrd` file (for sharing).
    pub fn to_file(app_id: &str, path: impl Into<PathBuf>) -> Self {
        Self::with_target(app_id, RerunTarget::File(path.into()))
    }

    fn with_target(app_id: &str, target: RerunTarget) -> Self {
        Self {
            app_id: app_id.to_string(),
            target,
            rec: None,
            viewport: None,
            pose: CameraPose::INITIAL,
            points: Arc::from(Vec::new()),
            pick_tolerance_px: 8.0,
            pose_sequence: 0,
        }
    }

    fn log_points(&self, rec: &RecordingStream) -> Result<(), rerun::RecordingStreamError> {
        let positions: Vec<[f32; 3]> = self
            .points
            .iter()
            .map(|p| to_scene(surface_vector(p.latitude, p.longitude) * (1.0 + p.altitude)))
            .collect();

        rec.log(
            "globe/points",
            &rerun::Points3D::new(positions)
                .with_colors(self.points.iter().map(|p| p.color.0))
                .with_radii(self.points.iter().map(|p| p.radius as f32 * POINT_SCALE))
                .with_labels(self.points.iter().map(|p| p.label.clone())),
        )
    }

    fn log_arcs(&self, rec: &RecordingStream, arcs: &[RenderArc]) -> Result<(), rerun::RecordingStreamError> {
        let strips: Vec<Vec<[f32; 3]>> = arcs
            .iter()
            .map(|arc| {
                great_circle((arc.start_lat, arc.start_lng), (arc.end_lat, arc.end_lng), ARC_SEGMENTS)
                    .into_iter()
                    .map(|v| to_scene(v * ARC_LIFT))
                    .collect()
            })
            .collect();

        rec.log(
            "globe/arcs",
            &rerun::LineStrips3D::new(strips)
                .with_colors(arcs.iter().map(|a| a.color.0))
                .with_radii(arcs.iter().map(|a| a.stroke as f32 * 0.002)),
        )
    }

    fn log_camera(&self, rec: &RecordingStream) -> Result<(), rerun::RecordingStreamError> {
        let eye = surface_vector(self.pose.latitude, self.pose.longitude) * (1.0 + self.pose.altitude);
        let toward_center = -eye * 0.25;

        rec.set_time_sequence("pose", self.pose_sequence);
        rec.log(
            "globe/camera",
            &rerun::Arrows3D::from_vectors([to_scene(toward_center)])
                .with_origins([to_scene(eye)])
                .with_colors([[255, 200, 0, 255]]),
        )
    }
}

fn to_scene(v: nalgebra::Vector3<f64>) -> [f32; 3] {
    [v.x as f32, v.y as f32, v.z as f32]
}

impl GlobeRenderer for RerunRenderer {
    fn create_surface(&mut self, viewport: Viewport) -> Result<(), RenderError> {
        let builder = RecordingStreamBuilder::new(self.app_id.as_str());
        let rec = match &self.target {
            RerunTarget::Spawn => builder.spawn(),
            RerunTarget::File(path) => builder.save(path),
        }
        .map_err(|e| RenderError::Surface(e.to_string()))?;

        rec.log_static("globe", &rerun::ViewCoordinates::RIGHT_HAND_Z_UP())
            .map_err(|e| RenderError::Surface(e.to_string()))?;
        rec.log(
            "logs/surface",
            &rerun::TextLog::new(format!("surface {}x{}", viewport.width, viewport.height)),
        )
        .map_err(|e| RenderError::Surface(e.to_string()))?;

        self.viewport = Some(viewport);
        self.rec = Some(rec);
        Ok(())
    }

    fn set_points(&mut self, points: Arc<[RenderPoint]>) {
        self.points = points;
        if let Some(rec) = &self.rec {
            if let Err(e) = self.log_points(rec) {
                warn!(error = %e, "Failed to log points");
            }
        }
    }

    fn set_arcs(&mut self, arcs: Arc<[RenderArc]>) {
        if let Some(rec) = &self.rec {
            if let Err(e) = self.log_arcs(rec, &arcs) {
                warn!(error = %e, "Failed to log arcs");
            }
        }
    }

    fn set_camera_pose(&mut self, pose: &CameraPose) {
        self.pose = *pose;
        self.pose_sequence += 1;
        if let Some(rec) = &self.rec {
            if let Err(e) = self.log_camera(rec) {
                warn!(error = %e, "Failed to log camera");
            }
        }
    }

    fn resize(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn resolve_click(&self, x: f64, y: f64) -> Option<String> {
        let viewport = self.viewport?;
        Projection::new(&self.pose, viewport)
            .pick(&self.points, x, y, self.pick_tolerance_px)
            .map(|p| p.id.clone())
    }
}
