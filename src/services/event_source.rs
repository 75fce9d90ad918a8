use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_BACKOFF_MS: u64 = 500;
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];
const MAX_BACKOFF_SECS: f64 = 60.0;

/// How hard the client tries to reach the upstream event service.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub backoff_factor: f64,
    pub attempt_timeout: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let secs = (self.base_backoff.as_secs_f64() * factor).min(MAX_BACKOFF_SECS);
        Duration::from_secs_f64(secs)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("request could not be sent: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout)
    }
}

/// Minimal GET capability the client needs. Swapped for a scripted fake in tests.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("event source unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },
    #[error("event source rejected the request with HTTP {status}")]
    Rejected { status: u16 },
    #[error("event source request failed: {0}")]
    Request(String),
    #[error("event source returned an invalid payload: {0}")]
    InvalidResponseShape(String),
    #[error("event history fetch cancelled")]
    Cancelled,
}

enum AttemptError {
    Retryable(String),
    Fatal(FetchError),
}

/// Fetches a user's full event history from the upstream events service.
#[derive(Clone)]
pub struct EventSourceClient {
    base_url: String,
    policy: RetryPolicy,
    transport: Arc<dyn EventTransport>,
}

impl EventSourceClient {
    pub fn new(base_url: impl Into<String>, policy: RetryPolicy, transport: Arc<dyn EventTransport>) -> Self {
        Self {
            base_url: base_url.into(),
            policy,
            transport,
        }
    }

    pub fn http(base_url: impl Into<String>, policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        let transport = Arc::new(HttpTransport::new(policy.attempt_timeout)?);
        Ok(Self::new(base_url, policy, transport))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn history_url(&self, user_id: &str) -> String {
        format!(
            "{}/events/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(user_id)
        )
    }

    /// Returns the raw event records, retrying transient failures per the policy.
    pub async fn fetch_history(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, FetchError> {
        let url = self.history_url(user_id);
        let max_attempts = self.policy.attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.attempt(&url) => result,
            };

            match result {
                Ok(records) => {
                    debug!(user_id, attempt, records = records.len(), "fetched event history");
                    return Ok(records);
                }
                Err(AttemptError::Fatal(err)) => {
                    warn!(user_id, attempt, error = %err, "event history fetch failed");
                    return Err(err);
                }
                Err(AttemptError::Retryable(reason)) => {
                    last_error = reason;
                }
            }

            if attempt < max_attempts {
                let backoff = self.policy.backoff_after(attempt);
                warn!(
                    user_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %last_error,
                    "event source request failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = sleep(backoff) => {}
                }
            }
        }

        warn!(user_id, attempts = max_attempts, error = %last_error, "event source retries exhausted");
        Err(FetchError::Unavailable {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, url: &str) -> Result<Vec<Value>, AttemptError> {
        let response = match timeout(self.policy.attempt_timeout, self.transport.get(url)).await {
            Err(_) => return Err(AttemptError::Retryable(TransportError::Timeout.to_string())),
            Ok(Err(err)) if err.is_retryable() => return Err(AttemptError::Retryable(err.to_string())),
            Ok(Err(err)) => return Err(AttemptError::Fatal(FetchError::Request(err.to_string()))),
            Ok(Ok(response)) => response,
        };

        if (200..300).contains(&response.status) {
            return decode_history(&response.body).map_err(AttemptError::Fatal);
        }

        if self.policy.is_retryable_status(response.status) {
            return Err(AttemptError::Retryable(format!("HTTP {}", response.status)));
        }

        Err(AttemptError::Fatal(FetchError::Rejected {
            status: response.status,
        }))
    }
}

fn decode_history(body: &[u8]) -> Result<Vec<Value>, FetchError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| FetchError::InvalidResponseShape(format!("body is not JSON: {e}")))?;

    match payload {
        Value::Array(records) => Ok(records),
        other => Err(FetchError::InvalidResponseShape(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(5));
        assert!(policy.is_retryable_status(503));
        assert!(!policy.is_retryable_status(501));
        assert!(!policy.is_retryable_status(404));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn test_decode_history_requires_array() {
        assert_eq!(decode_history(br#"[{"a":1}]"#).unwrap().len(), 1);
        assert!(matches!(
            decode_history(br#"{"events":[]}"#),
            Err(FetchError::InvalidResponseShape(msg)) if msg.contains("object")
        ));
        assert!(matches!(
            decode_history(b"<html>"),
            Err(FetchError::InvalidResponseShape(_))
        ));
    }

    #[test]
    fn test_history_url_encodes_user() {
        let client = EventSourceClient::http("http://events.local/", RetryPolicy::default()).unwrap();
        assert_eq!(
            client.history_url("ana maria"),
            "http://events.local/events/ana%20maria"
        );
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(!TransportError::Other("bad url".into()).is_retryable());
    }
}
