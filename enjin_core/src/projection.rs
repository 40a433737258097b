//! Orthographic globe projection and click picking.
//!
//! The globe is a unit sphere. A camera pose looks at `(latitude, longitude)`
//! from `altitude` globe radii above the surface; points on the far
//! hemisphere are not visible.

use crate::geometry::RenderPoint;
use crate::render::{CameraPose, Viewport};
use nalgebra::{Unit, Vector3};

/// Unit vector for a geographic position (degrees). Z points to the north pole.
pub fn surface_vector(latitude: f64, longitude: f64) -> Vector3<f64> {
    let (lat, lng) = (latitude.to_radians(), longitude.to_radians());
    Vector3::new(lat.cos() * lng.cos(), lat.cos() * lng.sin(), lat.sin())
}

/// Wraps a longitude into [-180, 180).
pub fn normalize_longitude(longitude: f64) -> f64 {
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}

/// Samples the great circle between two positions (inclusive endpoints).
///
/// Antipodal endpoints have no unique great circle; those fall back to
/// a straight chord.
pub fn great_circle(
    start: (f64, f64),
    end: (f64, f64),
    segments: usize,
) -> Vec<Vector3<f64>> {
    let a = Unit::new_normalize(surface_vector(start.0, start.1));
    let b = Unit::new_normalize(surface_vector(end.0, end.1));
    let segments = segments.max(1);

    (0..=segments)
        .map(|i| {
            let t = i as f64 / segments as f64;
            match a.try_slerp(&b, t, 1e-9) {
                Some(v) => v.into_inner(),
                None => a.into_inner().lerp(&b.into_inner(), t),
            }
        })
        .collect()
}

/// Screen-space projection for one pose/viewport pair.
#[derive(Debug, Clone)]
pub struct Projection {
    forward: Vector3<f64>,
    east: Vector3<f64>,
    north: Vector3<f64>,
    center: (f64, f64),
    radius_px: f64,
}

impl Projection {
    pub fn new(pose: &CameraPose, viewport: Viewport) -> Self {
        let (lat, lng) = (pose.latitude.to_radians(), pose.longitude.to_radians());

        let forward = surface_vector(pose.latitude, pose.longitude);
        let east = Vector3::new(-lng.sin(), lng.cos(), 0.0);
        let north = Vector3::new(-lat.sin() * lng.cos(), -lat.sin() * lng.sin(), lat.cos());

        let (w, h) = (viewport.width as f64, viewport.height as f64);
        Self {
            forward,
            east,
            north,
            center: (w / 2.0, h / 2.0),
            radius_px: w.min(h) / (1.0 + pose.altitude.max(0.0)),
        }
    }

    /// On-screen globe radius in pixels.
    pub fn radius_px(&self) -> f64 {
        self.radius_px
    }

    /// Projects a position to pixels, or `None` if it is on the far side.
    ///
    /// # Arguments
    /// * `altitude` - Height above the surface in globe radii
    pub fn project(&self, latitude: f64, longitude: f64, altitude: f64) -> Option<(f64, f64)> {
        let v = surface_vector(latitude, longitude);
        if v.dot(&self.forward) <= 0.0 {
            return None;
        }

        let r = self.radius_px * (1.0 + altitude);
        Some((
            self.center.0 + r * v.dot(&self.east),
            self.center.1 - r * v.dot(&self.north),
        ))
    }

    /// Nearest visible point within `tolerance_px` of `(x, y)`.
    pub fn pick<'a>(
        &self,
        points: &'a [RenderPoint],
        x: f64,
        y: f64,
        tolerance_px: f64,
    ) -> Option<&'a RenderPoint> {
        let tolerance_sq = tolerance_px * tolerance_px;

        points
            .iter()
            .filter_map(|p| {
                let (px, py) = self.project(p.latitude, p.longitude, p.altitude)?;
                let dist_sq = (px - x).powi(2) + (py - y).powi(2);
                (dist_sq <= tolerance_sq).then_some((p, dist_sq))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
    }
}
