//! Wire model for the event feed.
//!
//! Events are produced by the ingestion pipeline and are immutable from the
//! globe's point of view: every poll replaces the whole batch.

use chrono::{DateTime, SecondsFormat, Utc};
use enjin_env::FeedRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Path of the polled feed endpoint.
pub const FEED_PATH: &str = "/events/feed";

/// Page size used when the caller does not pick one.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Upper bound accepted by the feed service.
pub const MAX_PER_PAGE: u32 = 100;

// =============================================================================
// CATEGORY
// =============================================================================

/// Controlled vocabulary for event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Political,
    Military,
    Economic,
    Cyber,
    Social,
    Environmental,
    Criminal,
    Other,
}

impl Category {
    /// All categories in display order.
    pub const ALL: [Category; 8] = [
        Category::Political,
        Category::Military,
        Category::Economic,
        Category::Cyber,
        Category::Social,
        Category::Environmental,
        Category::Criminal,
        Category::Other,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Political => "political",
            Category::Military => "military",
            Category::Economic => "economic",
            Category::Cyber => "cyber",
            Category::Social => "social",
            Category::Environmental => "environmental",
            Category::Criminal => "criminal",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown category: {}", s))
    }
}

// =============================================================================
// EVENT + CONNECTION
// =============================================================================

/// Directed edge between two event/entity identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from_id: String,
    pub to_id: String,

    /// Relationship kind (e.g. "involves", "located_in")
    #[serde(alias = "type")]
    pub relationship: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Connection {
    /// Creates an unweighted, unlabeled connection.
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, relationship: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            relationship: relationship.into(),
            weight: None,
            label: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// A geolocated intelligence event as served by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,

    #[serde(default)]
    pub summary: Option<String>,

    /// Raw category string; see [`Event::category`]
    #[serde(default)]
    pub category: Option<String>,

    /// Significance score, nominal range 0-10
    #[serde(default)]
    pub severity: Option<f64>,

    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,

    /// When the event actually happened (UTC)
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub location_name: Option<String>,

    #[serde(default)]
    pub source_url: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Event {
    /// Creates a bare event with only identity and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: None,
            category: None,
            severity: None,
            latitude: None,
            longitude: None,
            occurred_at: None,
            location_name: None,
            source_url: None,
            created_at: None,
            connections: Vec::new(),
        }
    }

    /// Sets both coordinates.
    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Sets the category.
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category.as_str().to_string());
        self
    }

    /// Sets the severity.
    pub fn with_severity(mut self, severity: f64) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Sets the occurrence time.
    pub fn occurred(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Sets the location name used by region filters.
    pub fn located(mut self, name: impl Into<String>) -> Self {
        self.location_name = Some(name.into());
        self
    }

    /// Appends a connection.
    pub fn connect(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Parsed category. Unknown strings yield `None`.
    pub fn category(&self) -> Option<Category> {
        self.category.as_deref().and_then(|c| c.parse().ok())
    }

    /// Both coordinates, if present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}

// =============================================================================
// FEED
// =============================================================================

/// Paginated list of events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFeed {
    pub events: Vec<Event>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl EventFeed {
    /// The well-formed "no data yet" feed.
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            total: 0,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    /// Wraps a list of events as a single page.
    pub fn from_events(events: Vec<Event>) -> Self {
        let total = events.len() as u64;
        Self {
            events,
            total,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::empty()
    }
}

/// Query parameters for `GET /events/feed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub category: Option<Category>,

    /// Location-name substring
    pub region: Option<String>,

    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,

    pub page: u32,
    pub per_page: u32,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            category: None,
            region: None,
            from: None,
            to: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl FeedQuery {
    /// Builds the transport request. Empty filters are omitted.
    pub fn to_request(&self) -> FeedRequest {
        let mut request = FeedRequest::new(FEED_PATH);

        if let Some(category) = self.category {
            request = request.with_param("category", category.as_str());
        }
        if let Some(region) = self.region.as_deref().filter(|r| !r.trim().is_empty()) {
            request = request.with_param("region", region.trim());
        }
        if let Some(from) = self.from {
            request = request.with_param("from", from.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        if let Some(to) = self.to {
            request = request.with_param("to", to.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        request
            .with_param("page", self.page.max(1).to_string())
            .with_param("per_page", self.per_page.clamp(1, MAX_PER_PAGE).to_string())
    }
}

/// Query for `GET /entities/{id}/connections?depth=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionsQuery {
    pub entity_id: String,
    pub depth: u32,
}

impl ConnectionsQuery {
    pub fn to_request(&self) -> FeedRequest {
        FeedRequest::new(format!("/entities/{}/connections", self.entity_id))
            .with_param("depth", self.depth.max(1).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_category_parsing() {
        assert_eq!("cyber".parse::<Category>(), Ok(Category::Cyber));
        assert_eq!("Military".parse::<Category>(), Ok(Category::Military));
        assert!("technology".parse::<Category>().is_err());
    }

    #[test]
    fn test_unknown_category_is_none() {
        let mut event = Event::new("e1", "x");
        event.category = Some("legal".to_string());
        assert_eq!(event.category(), None);
    }

    #[test]
    fn test_event_decodes_with_sparse_fields() {
        let json = r#"{
            "id": "e1",
            "title": "Port strike",
            "category": "economic",
            "latitude": 51.9,
            "occurred_at": "2024-03-01T12:00:00Z",
            "connections": [
                {"from_id": "e1", "to_id": "org-7", "type": "involves", "weight": 0.5}
            ]
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.category(), Some(Category::Economic));
        assert_eq!(event.coordinates(), None);
        assert_eq!(event.connections.len(), 1);
        assert_eq!(event.connections[0].relationship, "involves");
        assert_eq!(event.connections[0].weight, Some(0.5));
        assert!(event.connections[0].metadata.is_empty());
    }

    #[test]
    fn test_feed_query_request() {
        let query = FeedQuery {
            category: Some(Category::Cyber),
            region: Some("  Baltic ".to_string()),
            from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            page: 0,
            per_page: 500,
        };

        let req = query.to_request();
        assert_eq!(req.path, "/events/feed");
        assert_eq!(req.param("category"), Some("cyber"));
        assert_eq!(req.param("region"), Some("Baltic"));
        assert_eq!(req.param("from"), Some("2024-01-01T00:00:00Z"));
        assert_eq!(req.param("to"), Some("2024-02-01T00:00:00Z"));
        assert_eq!(req.param("page"), Some("1"));
        assert_eq!(req.param("per_page"), Some("100"));
    }

    #[test]
    fn test_blank_region_omitted() {
        let query = FeedQuery {
            region: Some("   ".to_string()),
            ..FeedQuery::default()
        };
        assert_eq!(query.to_request().param("region"), None);
    }

    #[test]
    fn test_empty_feed_is_well_formed() {
        let feed = EventFeed::empty();
        assert!(feed.is_empty());
        assert_eq!(feed.total, 0);
        assert_eq!(feed.page, 1);
    }

    #[test]
    fn test_connections_request() {
        let req = ConnectionsQuery { entity_id: "org-7".to_string(), depth: 2 }.to_request();
        assert_eq!(req.path, "/entities/org-7/connections");
        assert_eq!(req.param("depth"), Some("2"));
    }
}
