//! Common types for the environment abstraction.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Handle to a task started through `EnjinContext::spawn`.
///
/// Nothing is aborted implicitly: the owner decides when a task is
/// released, and must call [`TaskHandle::cancel`] on teardown so no
/// orphaned task keeps running against dismantled state.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    inner: JoinHandle<()>,
}

impl TaskHandle {
    /// Wraps a tokio join handle.
    pub fn new(name: impl Into<String>, inner: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// Returns the task name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aborts the task. Idempotent.
    pub fn cancel(&self) {
        self.inner.abort();
    }

    /// Returns true once the task has completed or been aborted.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// An HTTP-style GET request against the feed service.
///
/// This is a transport-layer value: the path and query pairs are built
/// by the core, the transport only knows how to deliver them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRequest {
    /// Path relative to the service root (e.g. `/events/feed`)
    pub path: String,

    /// Query parameters in insertion order
    pub query: Vec<(String, String)>,
}

impl FeedRequest {
    /// Creates a request for a path with no parameters.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Appends a query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Looks up the first value for a query key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response returned by a transport.
///
/// The body is opaque bytes that will be decoded by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// HTTP status code
    pub status: u16,

    /// The raw response body
    pub body: Vec<u8>,
}

impl ResponseEnvelope {
    /// Creates a 200 response around a body.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body size in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_params() {
        let req = FeedRequest::new("/events/feed")
            .with_param("category", "cyber")
            .with_param("page", "1");

        assert_eq!(req.param("category"), Some("cyber"));
        assert_eq!(req.param("page"), Some("1"));
        assert_eq!(req.param("region"), None);
    }

    #[test]
    fn test_envelope_success_range() {
        assert!(ResponseEnvelope::ok(Vec::new()).is_success());
        assert!(!ResponseEnvelope { status: 503, body: Vec::new() }.is_success());
        assert!(!ResponseEnvelope { status: 304, body: Vec::new() }.is_success());
    }
}
