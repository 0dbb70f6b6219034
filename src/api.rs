//! LLM judge interaction with exponential backoff retry logic.
//!
//! The scorer talks to an OpenAI-compatible chat completions endpoint through
//! a small trait so the HTTP client can be swapped for a stub in tests.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait defining async LLM interaction
//! - [`ChatClient`]: `reqwest` client for `POST {api_base}/chat/completions`
//! - [`RetryAsk`]: decorator that adds retry logic to any `AskAsync` implementation
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::config::LlmConfig;
use crate::error::ScoringError;
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Trait for async LLM interaction.
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send `text` as a single user message and wait for the reply.
    async fn ask(&self, text: &str) -> Result<Self::Response, ScoringError>;
}

/// Token accounting reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Reply text plus usage, when the endpoint reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeReply {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..max_jitter)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
    max_jitter: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            max_jitter: StdDuration::from_millis(250),
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: StdDuration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=self.max_jitter.as_millis() as u64);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, ScoringError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_chat_response(body: &str) -> Result<JudgeReply, ScoringError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        ScoringError::Llm(format!(
            "unexpected completion payload ({e}): {}",
            truncate_for_log(body, 200)
        ))
    })?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ScoringError::Llm("completion has no message content".to_string()))?;
    Ok(JudgeReply {
        content: content.trim().to_string(),
        usage: parsed.usage,
    })
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl ChatClient {
    pub fn new(config: LlmConfig, timeout: StdDuration) -> Result<Self, ScoringError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScoringError::Llm(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }
}

impl AskAsync for ChatClient {
    type Response = JudgeReply;

    #[instrument(level = "info", skip_all, fields(model = %self.config.model))]
    async fn ask(&self, text: &str) -> Result<Self::Response, ScoringError> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: text,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(elapsed_ms = t0.elapsed().as_millis(), error = %e, "API call failed");
            ScoringError::Llm(e.to_string())
        })?;
        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| ScoringError::Llm(e.to_string()))?;

        if !status.is_success() {
            warn!(%status, body = %truncate_for_log(&payload, 200), "API returned error status");
            return Err(ScoringError::Llm(format!("HTTP {status}")));
        }

        let reply = parse_chat_response(&payload)?;
        debug!(
            elapsed_ms = t0.elapsed().as_millis(),
            chars = reply.content.len(),
            "API call succeeded"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyJudge {
        failures: usize,
        calls: AtomicUsize,
    }

    impl AskAsync for FlakyJudge {
        type Response = String;

        async fn ask(&self, text: &str) -> Result<String, ScoringError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ScoringError::Llm("503".to_string()))
            } else {
                Ok(format!("echo: {text}"))
            }
        }
    }

    fn retrying(failures: usize, max_retries: usize) -> RetryAsk<FlakyJudge> {
        RetryAsk::new(
            FlakyJudge {
                failures,
                calls: AtomicUsize::new(0),
            },
            max_retries,
            StdDuration::ZERO,
        )
        .with_max_jitter(StdDuration::ZERO)
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let api = retrying(3, 5);
        assert_eq!(api.ask("hi").await.unwrap(), "echo: hi");
        assert_eq!(api.inner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let api = retrying(100, 5);
        assert!(matches!(api.ask("hi").await, Err(ScoringError::Llm(_))));
        assert_eq!(api.inner.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let api = RetryAsk::new(
            FlakyJudge {
                failures: 0,
                calls: AtomicUsize::new(0),
            },
            5,
            StdDuration::from_secs(1),
        )
        .with_max_jitter(StdDuration::ZERO);
        assert_eq!(api.backoff(1), StdDuration::from_secs(1));
        assert_eq!(api.backoff(3), StdDuration::from_secs(4));
        assert_eq!(api.backoff(10), StdDuration::from_secs(30));
    }

    #[test]
    fn test_parse_chat_response_with_usage() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  {\"ok\":true}\n"}}],
                       "usage":{"prompt_tokens":12,"completion_tokens":5,"total_tokens":17}}"#;
        let reply = parse_chat_response(body).unwrap();
        assert_eq!(reply.content, "{\"ok\":true}");
        assert_eq!(
            reply.usage,
            Some(TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 5,
                total_tokens: 17
            })
        );
    }

    #[test]
    fn test_parse_chat_response_without_choices() {
        assert!(parse_chat_response(r#"{"choices":[]}"#).is_err());
        assert!(parse_chat_response("<html>bad gateway</html>").is_err());
    }

    #[test]
    fn test_request_body_omits_unset_max_tokens() {
        let body = ChatRequest {
            model: "judge",
            messages: vec![ChatMessage {
                role: "user",
                content: "hello",
            }],
            temperature: 0.0,
            max_tokens: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["content"], "hello");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_endpoint_joins_base() {
        let client = ChatClient::new(
            LlmConfig {
                api_base: "https://llm.example/v1/".into(),
                ..LlmConfig::default()
            },
            StdDuration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "https://llm.example/v1/chat/completions");
    }
}
