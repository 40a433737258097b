//! Feed transport abstraction.

use crate::error::EnvError;
use crate::types::{FeedRequest, ResponseEnvelope};
use async_trait::async_trait;

/// Abstraction for read-only HTTP-style access to the feed service.
///
/// # Implementations
///
/// - **Production**: `HttpTransport` over `reqwest`
/// - **Simulation**: in-memory service with configurable latency/failures
///
/// # Request Flow
///
/// ```text
/// FeedSync                  Transport                  Service
///   |                           |                          |
///   |-- get(request) ---------->|                          |
///   |                           |-- GET path?query ------->|
///   |                           |<------- status + body ---|
///   |<-- ResponseEnvelope ------|                          |
/// ```
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    /// Performs a GET request.
    ///
    /// # Returns
    /// * `Ok(envelope)` - The service answered (any status code)
    /// * `Err(EnvError::NetworkError)` - The request never got an answer
    ///
    /// # Note
    /// Non-2xx statuses are returned as envelopes; interpreting them is
    /// the caller's job.
    async fn get(&self, request: &FeedRequest) -> Result<ResponseEnvelope, EnvError>;

    /// Human-readable endpoint description for logging.
    fn endpoint(&self) -> String;
}
