//! Outbound HTTP with a bounded retry/backoff policy.
//!
//! Every scraper talks to the network through a [`Fetcher`], which pairs a
//! [`Transport`] (the thing that actually sends requests) with a
//! [`RetryPolicy`]. Keeping the transport behind a trait lets tests drive the
//! scrapers and the retry loop with canned responses.
//!
//! # Retry Strategy
//!
//! - Up to 5 attempts in total
//! - Retried: HTTP 418 (Forbes/Vedomosti/Kommersant answer bots with it),
//!   connection failures and timeouts
//! - Linear backoff with jitter:
//!   ```text
//!   delay = base_delay * attempt + random_jitter(1s..=3s)
//!   ```
//! - Any other non-success status stops immediately with [`ScrapeError::Status`]
//! - Exhaustion yields `Ok(None)` ("no response"), never an error

use crate::error::{ScrapeError, TransportError};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::{Rng, rng};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// Per-request timeout, distinct from the retry backoff.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Status code the sources use to tell a client to back off.
pub const RATE_LIMITED: u16 = 418;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:138.0) Gecko/20100101 Firefox/138.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// A GET request: target URL plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    /// Append a query parameter.
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Value of the first query parameter named `key`.
    #[cfg(test)]
    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    #[cfg(test)]
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can perform a single GET.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        request: &HttpRequest,
        headers: &[(&'static str, String)],
    ) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::default())
            .build()?;
        Ok(Self { client })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_connect() || e.is_timeout() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        request: &HttpRequest,
        headers: &[(&'static str, String)],
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let resp = builder.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(classify)?;
        Ok(HttpResponse { status, body })
    }
}

/// Browser-like headers with a User-Agent drawn from a fixed pool.
pub fn browser_headers() -> Vec<(&'static str, String)> {
    let agent = USER_AGENTS
        .choose(&mut rng())
        .copied()
        .unwrap_or(USER_AGENTS[0]);
    vec![
        ("User-Agent", agent.to_string()),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8".to_string(),
        ),
        ("Accept-Language", "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7".to_string()),
        ("Connection", "keep-alive".to_string()),
        ("Upgrade-Insecure-Requests", "1".to_string()),
    ]
}

/// Bounded retry with linear backoff on rate-limit and connection failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of calls before giving up.
    pub max_attempts: usize,
    /// Multiplied by the attempt number.
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    /// Statuses treated as "back off and try again".
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            jitter_min: Duration::from_secs(1),
            jitter_max: Duration::from_secs(3),
            retry_statuses: vec![RATE_LIMITED],
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts.
    #[cfg(test)]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let min = self.jitter_min.as_millis() as u64;
        let max = self.jitter_max.as_millis() as u64;
        let jitter_ms = if max > min {
            rng().random_range(min..=max)
        } else {
            min
        };
        self.base_delay.saturating_mul(attempt as u32) + Duration::from_millis(jitter_ms)
    }

    /// Send `request`, retrying transient failures.
    ///
    /// # Arguments
    ///
    /// * `transport` - The transport that performs each attempt
    /// * `request` - The GET request to send
    ///
    /// # Returns
    ///
    /// `Ok(Some(_))` on a 2xx response, `Ok(None)` once retries are
    /// exhausted, and `Err(_)` for failures that must not be retried.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let policy = RetryPolicy::default();
    /// let request = HttpRequest::get("https://www.forbes.ru/api/pub/search").param("list[offset]", 0);
    /// if let Some(resp) = policy.execute(&transport, &request).await? {
    ///     println!("{}", resp.body);
    /// }
    /// ```
    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        request: &HttpRequest,
    ) -> Result<Option<HttpResponse>, ScrapeError> {
        for attempt in 1..=self.max_attempts {
            let headers = browser_headers();
            let reason = match transport.get(request, &headers).await {
                Ok(resp) if resp.is_success() => {
                    debug!(attempt, status = resp.status, "Request succeeded");
                    return Ok(Some(resp));
                }
                Ok(resp) if self.retry_statuses.contains(&resp.status) => {
                    format!("HTTP {}", resp.status)
                }
                Ok(resp) => {
                    return Err(ScrapeError::Status {
                        status: resp.status,
                        url: request.url.clone(),
                    });
                }
                Err(TransportError::Connection(message)) => message,
                Err(TransportError::Other(message)) => {
                    return Err(ScrapeError::Transport {
                        url: request.url.clone(),
                        message,
                    });
                }
            };

            if attempt == self.max_attempts {
                warn!(attempt, %reason, "Last attempt failed");
                break;
            }

            let delay = self.backoff(attempt);
            warn!(
                attempt,
                max = self.max_attempts,
                ?delay,
                %reason,
                "Request blocked or dropped; backing off"
            );
            sleep(delay).await;
        }

        warn!(
            url = %request.url,
            max = self.max_attempts,
            "Retries exhausted; treating as no response"
        );
        Ok(None)
    }
}

/// A transport paired with the retry policy every scraper shares.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn fetch(&self, request: &HttpRequest) -> Result<Option<HttpResponse>, ScrapeError> {
        self.policy.execute(self.transport.as_ref(), request).await
    }
}
