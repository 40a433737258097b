//! Production implementation of FeedTransport using reqwest.

use crate::error::EnvError;
use crate::transport::FeedTransport;
use crate::types::{FeedRequest, ResponseEnvelope};
use async_trait::async_trait;
use std::time::Duration;

/// HTTP transport against a live feed service.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for the service rooted at `base_url`.
    ///
    /// # Arguments
    /// * `base_url` - e.g. `http://localhost:8000`
    /// * `timeout` - per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnvError::ContextError(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url_for(&self, request: &FeedRequest) -> String {
        format!("{}{}", self.base_url, request.path)
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get(&self, request: &FeedRequest) -> Result<ResponseEnvelope, EnvError> {
        let url = self.url_for(request);

        let response = self
            .client
            .get(&url)
            .query(&request.query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnvError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    EnvError::network(format!("GET {url} failed: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| EnvError::network(format!("GET {url} body read failed: {e}")))?;

        tracing::debug!(%url, status, bytes = body.len(), "feed response");

        Ok(ResponseEnvelope {
            status,
            body: body.to_vec(),
        })
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}
