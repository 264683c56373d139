//! HTTP access with exponential backoff retry logic.
//!
//! Every HTTP-based scraper goes through [`HttpClient`]. It never returns an
//! error: a request either yields a successful [`HttpResponse`] or `None`.
//!
//! # Architecture
//!
//! - [`Transport`]: one raw HTTP attempt (production impl: [`ReqwestTransport`])
//! - [`HttpClient`]: decorator adding identification headers, timeouts and retry
//!
//! # Retry Strategy
//!
//! - Transport errors and statuses in [`RetryPolicy::retry_statuses`] (5xx) are retried
//! - Client errors (404, 401, 403, ...) are terminal and returned as `None` at once
//! - Delay: `min(backoff * 2^(attempt-1), max_backoff) + random_jitter(0..=jitter)`

use crate::error::TransportError;
use async_trait::async_trait;
use rand::{Rng, rng};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Browser-like identification sent with every request unless overridden.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// A single HTTP request. Always carries an explicit timeout.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            ..Self::get(url)
        }
    }

    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![(
                "Content-Type".to_string(),
                "application/json;charset=UTF-8".to_string(),
            )],
            body: Some(body.to_string()),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Body and status of a completed request. The body is kept as raw bytes so
/// binary downloads (PDFs) survive intact.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// One raw HTTP attempt, without retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Delete => self.client.delete(&request.url),
        };
        builder = builder.timeout(request.timeout);
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();
        Ok(HttpResponse { url, status, body })
    }
}

/// Retry parameters. Built from `settings.network` in the config file.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `retries + 1`.
    pub retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    pub backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of the random jitter added to each delay, in milliseconds.
    pub jitter_ms: u64,
    pub timeout: Duration,
    /// Statuses treated as transient.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter_ms: 250,
            timeout: Duration::from_secs(30),
            retry_statuses: vec![500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.backoff.saturating_mul(1 << shift).min(self.max_backoff);
        if self.jitter_ms == 0 {
            delay
        } else {
            delay + Duration::from_millis(rng().random_range(0..=self.jitter_ms))
        }
    }
}

/// HTTP client that degrades every failure to `None`.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("policy", &self.policy)
            .finish()
    }
}

impl HttpClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// GET `url` with default headers.
    pub async fn get(&self, url: &str) -> Option<HttpResponse> {
        self.execute(Request::get(url)).await
    }

    pub async fn get_with_headers(&self, url: &str, headers: &[(&str, &str)]) -> Option<HttpResponse> {
        let request = headers
            .iter()
            .fold(Request::get(url), |req, (k, v)| req.header(k, *v));
        self.execute(request).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Option<HttpResponse> {
        let request = headers
            .iter()
            .fold(Request::post_json(url, body), |req, (k, v)| req.header(k, *v));
        self.execute(request).await
    }

    /// GET `url` and deserialize the body, logging (not raising) bad JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        let resp = self.get(url).await?;
        match resp.json::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(%url, error = %e, "Response body is not the expected JSON");
                None
            }
        }
    }

    /// Send `request`, retrying transient failures.
    ///
    /// # Returns
    ///
    /// `Some(response)` for a 2xx/3xx status, `None` for a terminal status or
    /// once all attempts are exhausted.
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    pub async fn execute(&self, mut request: Request) -> Option<HttpResponse> {
        if !request.has_header("User-Agent") {
            request.headers.push(("User-Agent".to_string(), USER_AGENT.to_string()));
        }
        request.timeout = request.timeout.min(self.policy.timeout);

        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let reason = match self.transport.send(&request).await {
                Ok(resp) if resp.status < 400 => {
                    debug!(status = resp.status, attempt, "Request succeeded");
                    return Some(resp);
                }
                Ok(resp) if self.policy.retry_statuses.contains(&resp.status) => {
                    format!("HTTP {}", resp.status)
                }
                Ok(resp) => {
                    if resp.status == 404 {
                        warn!(url = %request.url, status = resp.status, "Not found; not retrying");
                    } else {
                        error!(url = %request.url, status = resp.status, "Terminal HTTP status; not retrying");
                    }
                    return None;
                }
                Err(e) => e.to_string(),
            };

            attempt += 1;
            if attempt > self.policy.retries {
                error!(
                    url = %request.url,
                    attempts = attempt,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %reason,
                    "Request failed after exhausting retries"
                );
                return None;
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                url = %request.url,
                attempt,
                max = self.policy.retries,
                ?delay,
                error = %reason,
                "Request attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_retries_exact_count_on_503() {
        let fake = Arc::new(FakeTransport::new());
        fake.route("https://x.org/flaky", 503, "");
        let client = HttpClient::new(fake.clone(), instant_policy(3));

        let resp = client.get("https://x.org/flaky").await;
        assert!(resp.is_none());
        assert_eq!(fake.call_count(), 4);
    }

    #[tokio::test]
    async fn test_404_is_terminal() {
        let fake = Arc::new(FakeTransport::new());
        fake.route("https://x.org/missing", 404, "nope");
        let client = HttpClient::new(fake.clone(), instant_policy(5));

        assert!(client.get("https://x.org/missing").await.is_none());
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_403_is_terminal() {
        let fake = Arc::new(FakeTransport::new());
        fake.route("https://x.org/forbidden", 403, "");
        let client = HttpClient::new(fake.clone(), instant_policy(5));

        assert!(client.get("https://x.org/forbidden").await.is_none());
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let fake = Arc::new(FakeTransport::new());
        fake.fail("https://x.org/down");
        let client = HttpClient::new(fake.clone(), instant_policy(2));

        assert!(client.get("https://x.org/down").await.is_none());
        assert_eq!(fake.call_count(), 3);
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let fake = Arc::new(FakeTransport::new());
        fake.route("https://x.org/ok", 200, r#"{"a": 1}"#);
        let client = HttpClient::new(fake.clone(), instant_policy(2));

        let v: serde_json::Value = client.get_json("https://x.org/ok").await.unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            jitter_ms: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_post_json_reaches_transport() {
        let fake = Arc::new(FakeTransport::new());
        fake.route("https://x.org/toc", 200, "{}");
        let client = HttpClient::new(fake.clone(), instant_policy(0));

        let body = serde_json::json!({"pageNumber": 1});
        let resp = client
            .post_json("https://x.org/toc", &[("Referer", "https://x.org/")], &body)
            .await;
        assert_eq!(resp.map(|r| r.status), Some(200));
        assert_eq!(fake.call_count(), 1);
    }

    #[test]
    fn test_user_agent_detection() {
        let req = Request::get("https://x.org").header("user-agent", "custom");
        assert!(req.has_header("User-Agent"));
    }
}
