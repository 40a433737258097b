//! The "SPACE" Engine - Geometry Mapper
//!
//! Pure transform from a raw event batch to renderable primitives:
//! - Points with derived radius, color and altitude
//! - Relationship arcs between points that share connection references
//!
//! Every batch or filter change recomputes the whole snapshot from scratch.
//! The only state kept is a single-entry memo keyed on batch identity.

use crate::model::{Category, Event, EventFeed};
use crate::playback::TemporalWindow;
use geo::{coord, Intersects, Point, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Severity assumed for events that carry none.
pub const DEFAULT_SEVERITY: f64 = 3.0;

/// Smallest point radius (severity 0).
pub const MIN_RADIUS: f64 = 0.3;

/// Largest point radius (severity 10).
pub const MAX_RADIUS: f64 = 1.2;

/// Arc stroke when the connection has no weight.
pub const DEFAULT_STROKE: f64 = 1.0;

// =============================================================================
// COLORS
// =============================================================================

/// 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    /// `#rrggbb` form, alpha dropped.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

/// Color for events with no (or an unrecognized) category.
pub const DEFAULT_COLOR: Rgba = Rgba::rgb(0xe2, 0xe8, 0xf0);

/// Fixed category palette.
pub fn category_color(category: Option<Category>) -> Rgba {
    match category {
        Some(Category::Political) => Rgba::rgb(0xef, 0x44, 0x44),
        Some(Category::Military) => Rgba::rgb(0xf9, 0x73, 0x16),
        Some(Category::Economic) => Rgba::rgb(0x22, 0xc5, 0x5e),
        Some(Category::Cyber) => Rgba::rgb(0x06, 0xb6, 0xd4),
        Some(Category::Social) => Rgba::rgb(0xa8, 0x55, 0xf7),
        Some(Category::Environmental) => Rgba::rgb(0x84, 0xcc, 0x16),
        Some(Category::Criminal) => Rgba::rgb(0xec, 0x48, 0x99),
        Some(Category::Other) => Rgba::rgb(0x94, 0xa3, 0xb8),
        None => DEFAULT_COLOR,
    }
}

// =============================================================================
// PRIMITIVES
// =============================================================================

/// A geographic marker derived from one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPoint {
    /// Source event id
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,

    /// In [MIN_RADIUS, MAX_RADIUS]
    pub radius: f64,
    pub color: Rgba,

    /// Offset above the surface as a fraction of globe radius
    pub altitude: f64,
}

/// A geographic edge between two rendered points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderArc {
    pub source_id: String,
    pub target_id: String,
    pub start_lat: f64,
    pub start_lng: f64,
    pub end_lat: f64,
    pub end_lng: f64,
    pub color: Rgba,
    pub label: Option<String>,
    pub stroke: f64,
}

/// An immutable snapshot handed to the render loop.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobeGeometry {
    pub points: Arc<[RenderPoint]>,
    pub arcs: Arc<[RenderArc]>,
}

impl GlobeGeometry {
    pub fn empty() -> Self {
        Self {
            points: Arc::from(Vec::new()),
            arcs: Arc::from(Vec::new()),
        }
    }

    pub fn point(&self, id: &str) -> Option<&RenderPoint> {
        self.points.iter().find(|p| p.id == id)
    }
}

impl Default for GlobeGeometry {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// FILTERS
// =============================================================================

/// Lat/lng bounding box, boundary inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    rect: Rect<f64>,
}

impl GeoBounds {
    /// Builds a box from its south-west and north-east corners.
    pub fn new(sw_lat: f64, sw_lng: f64, ne_lat: f64, ne_lng: f64) -> Self {
        Self {
            rect: Rect::new(coord! { x: sw_lng, y: sw_lat }, coord! { x: ne_lng, y: ne_lat }),
        }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        self.rect.intersects(&Point::new(longitude, latitude))
    }
}

/// Client-side filters applied before mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapFilter {
    pub category: Option<Category>,

    /// Case-insensitive substring of `location_name`
    pub region: Option<String>,

    /// Closed window over `occurred_at`
    pub window: Option<TemporalWindow>,

    pub bounds: Option<GeoBounds>,
}

impl MapFilter {
    pub fn accepts(&self, event: &Event) -> bool {
        if let Some(category) = self.category {
            if event.category() != Some(category) {
                return false;
            }
        }

        if let Some(region) = self.region.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            let needle = region.to_lowercase();
            match event.location_name.as_deref() {
                Some(name) if name.to_lowercase().contains(&needle) => {}
                _ => return false,
            }
        }

        if let Some(window) = self.window {
            match event.occurred_at {
                Some(at) if window.contains(at) => {}
                _ => return false,
            }
        }

        if let Some(bounds) = self.bounds {
            match valid_coordinates(event) {
                Some((lat, lng)) if bounds.contains(lat, lng) => {}
                _ => return false,
            }
        }

        true
    }
}

// =============================================================================
// MAPPING
// =============================================================================

/// Coordinates usable for rendering: both present, finite and in range.
fn valid_coordinates(event: &Event) -> Option<(f64, f64)> {
    let (lat, lng) = event.coordinates()?;
    let in_range = lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng);
    in_range.then_some((lat, lng))
}

fn effective_severity(severity: Option<f64>) -> f64 {
    severity.filter(|s| s.is_finite()).unwrap_or(DEFAULT_SEVERITY)
}

/// `0.3 + (clamp(severity, 0, 10) / 10) × 0.9`
pub fn point_radius(severity: Option<f64>) -> f64 {
    let s = effective_severity(severity).clamp(0.0, 10.0);
    MIN_RADIUS + (s / 10.0) * (MAX_RADIUS - MIN_RADIUS)
}

/// `0.01 + severity / 100`, severity clamped so the offset stays positive.
pub fn point_altitude(severity: Option<f64>) -> f64 {
    0.01 + effective_severity(severity).clamp(0.0, 10.0) / 100.0
}

fn to_point(event: &Event, latitude: f64, longitude: f64) -> RenderPoint {
    RenderPoint {
        id: event.id.clone(),
        latitude,
        longitude,
        label: event.title.clone(),
        radius: point_radius(event.severity),
        color: category_color(event.category()),
        altitude: point_altitude(event.severity),
    }
}

/// Maps an event batch to points and arcs.
///
/// Events without usable coordinates are dropped. Arc targets that do not
/// resolve to a point in the same snapshot are dropped.
///
/// # Arguments
/// * `events` - Raw batch in feed order
/// * `filter` - Client-side filters
pub fn map_events(events: &[Event], filter: &MapFilter) -> GlobeGeometry {
    let mut points: Vec<RenderPoint> = Vec::new();
    let mut sources: Vec<&Event> = Vec::new();

    for event in events.iter().filter(|e| filter.accepts(e)) {
        if let Some((lat, lng)) = valid_coordinates(event) {
            points.push(to_point(event, lat, lng));
            sources.push(event);
        }
    }

    // First point wins when the feed repeats an id
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        index.entry(point.id.as_str()).or_insert(i);
    }

    let mut arcs = Vec::new();
    for (source_idx, event) in sources.iter().enumerate() {
        let source = &points[source_idx];

        for connection in &event.connections {
            let target_id = if connection.to_id == event.id {
                &connection.from_id
            } else {
                &connection.to_id
            };
            // Self-loops have no extent on the globe; no arc is emitted
            if target_id == &event.id {
                continue;
            }
            let Some(&target_idx) = index.get(target_id.as_str()) else {
                continue;
            };
            let target = &points[target_idx];

            let label = connection
                .label
                .clone()
                .filter(|l| !l.is_empty())
                .or_else(|| Some(connection.relationship.clone()))
                .filter(|l| !l.is_empty());

            arcs.push(RenderArc {
                source_id: source.id.clone(),
                target_id: target.id.clone(),
                start_lat: source.latitude,
                start_lng: source.longitude,
                end_lat: target.latitude,
                end_lng: target.longitude,
                color: source.color,
                label,
                stroke: connection.weight.filter(|w| w.is_finite()).unwrap_or(DEFAULT_STROKE),
            });
        }
    }

    GlobeGeometry {
        points: Arc::from(points),
        arcs: Arc::from(arcs),
    }
}

struct MemoEntry {
    batch: Arc<EventFeed>,
    filter: MapFilter,
    geometry: Arc<GlobeGeometry>,
}

/// Memoizing front for [`map_events`].
#[derive(Default)]
pub struct GeometryMapper {
    last: Option<MemoEntry>,
    recomputations: u64,
}

impl GeometryMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the snapshot for `(batch, filter)`, reusing the previous one
    /// when the batch is the same allocation and the filter is unchanged.
    pub fn map(&mut self, batch: &Arc<EventFeed>, filter: &MapFilter) -> Arc<GlobeGeometry> {
        if let Some(entry) = &self.last {
            if Arc::ptr_eq(&entry.batch, batch) && entry.filter == *filter {
                return Arc::clone(&entry.geometry);
            }
        }

        let geometry = Arc::new(map_events(&batch.events, filter));
        self.recomputations += 1;
        tracing::debug!(
            points = geometry.points.len(),
            arcs = geometry.arcs.len(),
            "Geometry recomputed"
        );

        self.last = Some(MemoEntry {
            batch: Arc::clone(batch),
            filter: filter.clone(),
            geometry: Arc::clone(&geometry),
        });
        geometry
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Connection;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn e1_e2() -> Vec<Event> {
        vec![
            Event::new("e1", "A")
                .at(10.0, 20.0)
                .connect(Connection::new("e1", "e2", "involves")),
            Event::new("e2", "B").at(30.0, 40.0),
        ]
    }

    #[test]
    fn test_single_arc_between_two_events() {
        let geometry = map_events(&e1_e2(), &MapFilter::default());

        assert_eq!(geometry.points.len(), 2);
        assert_eq!(geometry.arcs.len(), 1);

        let arc = &geometry.arcs[0];
        assert_eq!((arc.start_lat, arc.start_lng), (10.0, 20.0));
        assert_eq!((arc.end_lat, arc.end_lng), (30.0, 40.0));
        assert_eq!(arc.label.as_deref(), Some("involves"));
        assert_eq!(arc.stroke, DEFAULT_STROKE);
        assert_eq!(arc.color, geometry.points[0].color);
    }

    #[test]
    fn test_removing_target_drops_arc() {
        let mut events = e1_e2();
        events.pop();

        let geometry = map_events(&events, &MapFilter::default());
        assert_eq!(geometry.points.len(), 1);
        assert!(geometry.arcs.is_empty());
    }

    #[test]
    fn test_reverse_reference_resolves_from_id() {
        let events = vec![
            Event::new("e1", "A")
                .at(10.0, 20.0)
                .connect(Connection::new("e2", "e1", "located_in")),
            Event::new("e2", "B").at(30.0, 40.0),
        ];

        let geometry = map_events(&events, &MapFilter::default());
        assert_eq!(geometry.arcs.len(), 1);
        assert_eq!(geometry.arcs[0].source_id, "e1");
        assert_eq!(geometry.arcs[0].target_id, "e2");
    }

    #[test]
    fn test_self_loop_yields_no_arc() {
        let events = vec![Event::new("e1", "A")
            .at(10.0, 20.0)
            .connect(Connection::new("e1", "e1", "mentions"))];

        assert!(map_events(&events, &MapFilter::default()).arcs.is_empty());
    }

    #[test]
    fn test_explicit_label_and_weight() {
        let mut connection = Connection::new("e1", "e2", "involves");
        connection.label = Some("supplies".to_string());
        connection.weight = Some(2.5);
        let events = vec![
            Event::new("e1", "A").at(0.0, 0.0).connect(connection),
            Event::new("e2", "B").at(1.0, 1.0),
        ];

        let arc = &map_events(&events, &MapFilter::default()).arcs[0];
        assert_eq!(arc.label.as_deref(), Some("supplies"));
        assert_eq!(arc.stroke, 2.5);
    }

    #[test]
    fn test_empty_label_falls_back_to_relationship() {
        let mut connection = Connection::new("e1", "e2", "involves");
        connection.label = Some(String::new());
        let events = vec![
            Event::new("e1", "A").at(0.0, 0.0).connect(connection),
            Event::new("e2", "B").at(1.0, 1.0),
        ];

        let arc = &map_events(&events, &MapFilter::default()).arcs[0];
        assert_eq!(arc.label.as_deref(), Some("involves"));
    }

    #[test]
    fn test_default_severity_size() {
        assert_relative_eq!(point_radius(None), 0.57, epsilon = 1e-12);
        assert_relative_eq!(point_altitude(None), 0.04, epsilon = 1e-12);
        assert_relative_eq!(point_radius(Some(f64::NAN)), 0.57, epsilon = 1e-12);
        assert_relative_eq!(point_radius(Some(-4.0)), MIN_RADIUS);
        assert_relative_eq!(point_radius(Some(40.0)), MAX_RADIUS);
    }

    #[test]
    fn test_higher_severity_renders_higher() {
        assert!(point_altitude(Some(9.0)) > point_altitude(Some(1.0)));
        assert!(point_altitude(Some(-50.0)) > 0.0);
    }

    #[test]
    fn test_category_colors() {
        let mut unknown = Event::new("e1", "x").at(0.0, 0.0);
        unknown.category = Some("legal".to_string());
        let cyber = Event::new("e2", "y").at(0.0, 0.0).with_category(Category::Cyber);

        let geometry = map_events(&[unknown, cyber], &MapFilter::default());
        assert_eq!(geometry.points[0].color, DEFAULT_COLOR);
        assert_eq!(geometry.points[1].color.to_hex(), "#06b6d4");
    }

    #[test]
    fn test_out_of_range_coordinates_excluded() {
        let events = vec![
            Event::new("a", "x").at(91.0, 0.0),
            Event::new("b", "x").at(0.0, f64::INFINITY),
            Event::new("c", "x").at(-90.0, 180.0),
        ];

        let geometry = map_events(&events, &MapFilter::default());
        assert_eq!(geometry.points.len(), 1);
        assert_eq!(geometry.points[0].id, "c");
    }

    #[test]
    fn test_filters() {
        let t = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
        let events = vec![
            Event::new("a", "x")
                .at(54.0, 18.0)
                .with_category(Category::Military)
                .located("Gdansk, Poland")
                .occurred(t(2)),
            Event::new("b", "x")
                .at(-33.0, 151.0)
                .with_category(Category::Military)
                .located("Sydney")
                .occurred(t(8)),
            Event::new("c", "x").at(40.0, -74.0).with_category(Category::Cyber),
        ];

        let by_category = MapFilter {
            category: Some(Category::Military),
            ..MapFilter::default()
        };
        assert_eq!(map_events(&events, &by_category).points.len(), 2);

        let by_region = MapFilter {
            region: Some("POLAND".to_string()),
            ..MapFilter::default()
        };
        let ids: Vec<_> = map_events(&events, &by_region).points.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["a"]);

        let by_window = MapFilter {
            window: Some(TemporalWindow::new(t(1), t(5)).unwrap()),
            ..MapFilter::default()
        };
        assert_eq!(map_events(&events, &by_window).points[0].id, "a");
        assert_eq!(map_events(&events, &by_window).points.len(), 1);

        let by_bounds = MapFilter {
            bounds: Some(GeoBounds::new(30.0, -80.0, 60.0, 20.0)),
            ..MapFilter::default()
        };
        assert_eq!(map_events(&events, &by_bounds).points.len(), 2);
    }

    #[test]
    fn test_bounds_inclusive() {
        let bounds = GeoBounds::new(0.0, 0.0, 10.0, 10.0);
        assert!(bounds.contains(0.0, 0.0));
        assert!(bounds.contains(10.0, 10.0));
        assert!(!bounds.contains(10.1, 5.0));
    }

    #[test]
    fn test_mapper_memoizes_on_batch_identity() {
        let mut mapper = GeometryMapper::new();
        let batch = Arc::new(EventFeed::from_events(e1_e2()));
        let filter = MapFilter::default();

        let first = mapper.map(&batch, &filter);
        let second = mapper.map(&batch, &filter);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mapper.recomputations(), 1);

        // Equal content, new allocation: recomputed, structurally identical
        let reloaded = Arc::new(EventFeed::from_events(e1_e2()));
        let third = mapper.map(&reloaded, &filter);
        assert_eq!(mapper.recomputations(), 2);
        assert_eq!(*first, *third);
    }

    #[test]
    fn test_mapping_is_idempotent() {
        let events = e1_e2();
        let a = map_events(&events, &MapFilter::default());
        let b = map_events(&events, &MapFilter::default());
        assert_eq!(a, b);
        assert_eq!(b.arcs.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_missing_coordinate_excluded(
            lat in proptest::option::of(-90.0f64..90.0),
            lng in proptest::option::of(-180.0f64..180.0),
        ) {
            let mut event = Event::new("e", "x");
            event.latitude = lat;
            event.longitude = lng;

            let geometry = map_events(&[event], &MapFilter::default());
            prop_assert_eq!(geometry.points.len(), usize::from(lat.is_some() && lng.is_some()));
        }

        #[test]
        fn prop_radius_monotonic_and_bounded(a in -20.0f64..20.0, b in -20.0f64..20.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let r_lo = point_radius(Some(lo));
            let r_hi = point_radius(Some(hi));

            prop_assert!(r_lo <= r_hi);
            prop_assert!((MIN_RADIUS..=MAX_RADIUS).contains(&r_lo));
            prop_assert!((MIN_RADIUS..=MAX_RADIUS).contains(&r_hi));
        }
    }
}
