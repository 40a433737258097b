//! Renderer with no output device.
//!
//! Keeps whatever the loop hands it and answers clicks with the same
//! orthographic projection a real backend would use. Used by tests and by
//! the simulator.

use crate::config::RenderConfig;
use crate::geometry::{RenderArc, RenderPoint};
use crate::projection::Projection;
use crate::render::{CameraPose, GlobeRenderer, RenderError, Viewport};
use std::sync::Arc;

pub struct HeadlessRenderer {
    viewport: Option<Viewport>,
    pose: CameraPose,
    points: Arc<[RenderPoint]>,
    arcs: Arc<[RenderArc]>,
    pick_tolerance_px: f64,
    surface_error: Option<String>,
    surfaces_created: u32,
    pose_updates: u64,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self {
            viewport: None,
            pose: CameraPose::INITIAL,
            points: Arc::from(Vec::new()),
            arcs: Arc::from(Vec::new()),
            pick_tolerance_px: RenderConfig::default().pick_tolerance_px,
            surface_error: None,
            surfaces_created: 0,
            pose_updates: 0,
        }
    }

    /// A renderer whose surface creation always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            surface_error: Some(reason.into()),
            ..Self::new()
        }
    }

    pub fn with_pick_tolerance(mut self, tolerance_px: f64) -> Self {
        self.pick_tolerance_px = tolerance_px;
        self
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn pose(&self) -> CameraPose {
        self.pose
    }

    pub fn points(&self) -> &Arc<[RenderPoint]> {
        &self.points
    }

    pub fn arcs(&self) -> &Arc<[RenderArc]> {
        &self.arcs
    }

    pub fn surfaces_created(&self) -> u32 {
        self.surfaces_created
    }

    pub fn pose_updates(&self) -> u64 {
        self.pose_updates
    }
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobeRenderer for HeadlessRenderer {
    fn create_surface(&mut self, viewport: Viewport) -> Result<(), RenderError> {
        if let Some(reason) = &self.surface_error {
            return Err(RenderError::Surface(reason.clone()));
        }
        self.viewport = Some(viewport);
        self.surfaces_created += 1;
        Ok(())
    }

    fn set_points(&mut self, points: Arc<[RenderPoint]>) {
        self.points = points;
    }

    fn set_arcs(&mut self, arcs: Arc<[RenderArc]>) {
        self.arcs = arcs;
    }

    fn set_camera_pose(&mut self, pose: &CameraPose) {
        self.pose = *pose;
        self.pose_updates += 1;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_surface_resolves_nothing() {
        let renderer = HeadlessRenderer::new();
        assert_eq!(renderer.resolve_click(10.0, 10.0), None);
    }

    #[test]
    fn test_failing_surface() {
        let mut renderer = HeadlessRenderer::failing("denied");
        let err = renderer.create_surface(Viewport::new(10, 10)).unwrap_err();
        assert_eq!(err.to_string(), "Render surface creation failed: denied");
        assert_eq!(renderer.surfaces_created(), 0);
    }
}
