//! Sync transport
//!
//! [`SyncTransport`] is the seam between the sync driver and the network.
//! [`HttpTransport`] speaks the JSON protocol over HTTP with reqwest:
//!
//! - every request carries `Authorization: Bearer <credential>`
//! - transient failures (connect errors, timeouts, 5xx) are retried with
//!   exponential backoff per [`RetryConfig`]
//! - 401 and any redirect become [`SyncError::Unauthorized`] and are never
//!   retried
//!
//! Tests swap in an in-process transport that calls the gateway directly.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::error::{SyncError, SyncResult};
use crate::config::Config;
use crate::protocol::{
    ErrorBody, HealthResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    StatusRequest, StatusResponse, HEALTH_PATH, PULL_PATH, PUSH_PATH, STATUS_PATH,
};

/// Network operations the sync driver needs
pub trait SyncTransport: Send + Sync {
    /// Cheap reachability probe (unauthenticated)
    fn heartbeat(&self) -> impl Future<Output = SyncResult<HealthResponse>> + Send;

    fn status(
        &self,
        credential: &str,
        request: &StatusRequest,
    ) -> impl Future<Output = SyncResult<StatusResponse>> + Send;

    fn pull(
        &self,
        credential: &str,
        request: &PullRequest,
    ) -> impl Future<Output = SyncResult<PullResponse>> + Send;

    fn push(
        &self,
        credential: &str,
        request: &PushRequest,
    ) -> impl Future<Output = SyncResult<PushResponse>> + Send;
}

/// Retry behavior for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    /// A single attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before attempt number `attempt` (0-indexed, so attempt 0 has none)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let secs = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// JSON-over-HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
    heartbeat_timeout: Duration,
    retry: RetryConfig,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        heartbeat_timeout: Duration,
    ) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            heartbeat_timeout,
            retry: RetryConfig::default(),
        })
    }

    /// Build from the `sync_url` and timeouts in the config
    pub fn from_config(config: &Config) -> SyncResult<Self> {
        let url = config
            .sync_url
            .as_deref()
            .ok_or_else(|| SyncError::NotConfigured("sync_url is not set".to_string()))?;
        Self::new(url, config.request_timeout(), config.heartbeat_timeout())
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<Req, Res>(&self, path: &str, credential: &str, body: &Req) -> SyncResult<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            let result = match self
                .client
                .post(&url)
                .bearer_auth(credential)
                .json(body)
                .send()
                .await
            {
                Ok(response) => read_response(response).await,
                Err(e) => Err(SyncError::from(e)),
            };

            match result {
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "POST {} failed ({}), retrying in {:?} (attempt {}/{})",
                        path,
                        e,
                        delay,
                        attempt + 1,
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Classify the status code, then decode the body
async fn read_response<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Protocol(format!("Failed to decode response: {}", e)));
    }

    if status.is_redirection() {
        return Err(SyncError::Unauthorized(format!(
            "server redirected the request ({})",
            status
        )));
    }

    let message = match response.text().await {
        Ok(text) => serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text),
        Err(e) => e.to_string(),
    };

    if status == StatusCode::UNAUTHORIZED {
        Err(SyncError::Unauthorized(message))
    } else if status.is_server_error() {
        Err(SyncError::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(SyncError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

impl SyncTransport for HttpTransport {
    async fn heartbeat(&self) -> SyncResult<HealthResponse> {
        let url = format!("{}{}", self.base_url, HEALTH_PATH);
        let response = self
            .client
            .get(&url)
            .timeout(self.heartbeat_timeout)
            .send()
            .await?;
        let health = read_response::<HealthResponse>(response).await?;
        debug!("Heartbeat ok (server time {})", health.server_time);
        Ok(health)
    }

    async fn status(&self, credential: &str, request: &StatusRequest) -> SyncResult<StatusResponse> {
        self.post_json(STATUS_PATH, credential, request).await
    }

    async fn pull(&self, credential: &str, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post_json(PULL_PATH, credential, request).await
    }

    async fn push(&self, credential: &str, request: &PushRequest) -> SyncResult<PushResponse> {
        self.post_json(PUSH_PATH, credential, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let retry = RetryConfig::new(20);
        assert_eq!(retry.delay_for_attempt(15), Duration::from_secs(10));
    }

    #[test]
    fn test_no_retry() {
        let retry = RetryConfig::no_retry();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn test_base_url_is_normalized() {
        let transport = HttpTransport::new(
            "http://localhost:8080/",
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(transport.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = Config::default();
        assert!(matches!(
            HttpTransport::from_config(&config),
            Err(SyncError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        // Nothing listens on port 9 of localhost
        let transport = HttpTransport::new(
            "http://127.0.0.1:9",
            Duration::from_secs(2),
            Duration::from_secs(1),
        )
        .unwrap()
        .with_retry(RetryConfig::no_retry());

        let err = transport.heartbeat().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }
}
