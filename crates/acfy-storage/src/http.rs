//! HTTP transport shared by the remote platform clients.
//!
//! One request is one attempt. Failures are classified as transient or fatal
//! and returned to the caller, which owns the retry policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

const ERROR_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transient failure calling {url}: {reason}")]
    Transient {
        url: String,
        status: Option<u16>,
        reason: String,
    },
    #[error("fatal failure calling {url}: {reason}")]
    Fatal {
        url: String,
        status: Option<u16>,
        reason: String,
    },
}

impl FetchError {
    pub fn transient(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            url: url.into(),
            status: None,
            reason: reason.into(),
        }
    }

    pub fn fatal(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fatal {
            url: url.into(),
            status: None,
            reason: reason.into(),
        }
    }

    /// Builds the error for a non-success HTTP status.
    pub fn from_status(status: StatusCode, url: impl Into<String>, body: &[u8]) -> Self {
        let url = url.into();
        let reason = format!("http status {}: {}", status.as_u16(), excerpt(body));
        match classify_status(status) {
            RetryDisposition::Retryable => Self::Transient {
                url,
                status: Some(status.as_u16()),
                reason,
            },
            RetryDisposition::NonRetryable => Self::Fatal {
                url,
                status: Some(status.as_u16()),
                reason,
            },
        }
    }

    pub fn from_reqwest(err: &reqwest::Error, url: impl Into<String>) -> Self {
        let url = url.into();
        let status = err.status().map(|s| s.as_u16());
        let reason = err.to_string();
        match classify_reqwest_error(err) {
            RetryDisposition::Retryable => Self::Transient {
                url,
                status,
                reason,
            },
            RetryDisposition::NonRetryable => Self::Fatal {
                url,
                status,
                reason,
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// 401/403: every later call with the same credentials fails the same way.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Fatal {
                status: Some(401 | 403),
                ..
            }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Fatal { status, .. } => *status,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Transient { url, .. } | Self::Fatal { url, .. } => url,
        }
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.chars().count() <= ERROR_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(ERROR_EXCERPT_CHARS).collect();
        format!("{cut}...")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// No retries at all; used by tests and one-shot CLI commands.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            token_bucket: None,
        }
    }
}

impl HttpClientConfig {
    pub fn with_token_bucket(mut self, capacity: u32, refill_every: Duration) -> Self {
        self.token_bucket = Some(TokenBucketConfig {
            capacity,
            refill_every,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

/// Request throttle: `capacity` tokens, one more every `refill_every`.
#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            refill_every: config.refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: config.capacity.max(1),
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut TokenBucketState) {
        if self.refill_every.is_zero() {
            state.tokens = self.capacity;
            return;
        }
        let elapsed = state.last_refill.elapsed();
        if elapsed >= self.refill_every {
            let refills = (elapsed.as_millis() / self.refill_every.as_millis().max(1)) as u32;
            state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
            state.last_refill = Instant::now();
        }
    }

    /// Takes a token if one is available right now.
    pub async fn try_take(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Waits until a token is available.
    pub async fn take(&self) {
        while !self.try_take().await {
            tokio::time::sleep(self.refill_every).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decodes the body; an undecodable body is fatal, retrying returns the same bytes.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|err| FetchError::Fatal {
            url: self.final_url.clone(),
            status: Some(self.status.as_u16()),
            reason: format!("undecodable response body: {err}"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c)));

        Ok(Self {
            client,
            token_bucket,
        })
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Sends one attempt. Non-2xx statuses come back as classified errors.
    pub async fn send(&self, request: RequestBuilder) -> Result<FetchedResponse, FetchError> {
        let request = request
            .build()
            .map_err(|err| FetchError::fatal("<unbuilt request>", err.to_string()))?;
        let method = request.method().clone();
        let url = request.url().to_string();

        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let span = info_span!("http_send", %method, url = %url);
        async {
            let response = self
                .client
                .execute(request)
                .await
                .map_err(|err| FetchError::from_reqwest(&err, &url))?;

            let status = response.status();
            let final_url = response.url().to_string();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|err| FetchError::from_reqwest(&err, &final_url))?
                .to_vec();

            debug!(status = status.as_u16(), bytes = body.len(), "response received");

            if !status.is_success() {
                return Err(FetchError::from_status(status, final_url, &body));
            }

            Ok(FetchedResponse {
                status,
                final_url,
                headers,
                body,
            })
        }
        .instrument(span)
        .await
    }
}
