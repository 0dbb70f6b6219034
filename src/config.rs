//! YAML-backed configuration.
//!
//! Both files are optional; every field has a default so a partial file only
//! overrides what it names. The LLM API key may also come from `LLM_API_KEY`.

use crate::error::ConfigError;
use crate::http::{REQUEST_TIMEOUT, RetryPolicy};
use serde::{Deserialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

/// Scraper run settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScraperConfig {
    pub max_workers: usize,
    pub request_timeout_secs: u64,
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Partial files smaller than this are skipped when merging.
    pub min_file_bytes: u64,
    pub output_dir: PathBuf,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            request_timeout_secs: REQUEST_TIMEOUT.as_secs(),
            max_attempts: 5,
            base_delay_ms: 1000,
            jitter_min_ms: 1000,
            jitter_max_ms: 3000,
            min_file_bytes: 10,
            output_dir: PathBuf::from("data"),
        }
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            jitter_min: Duration::from_millis(self.jitter_min_ms),
            jitter_max: Duration::from_millis(self.jitter_max_ms.max(self.jitter_min_ms)),
            ..RetryPolicy::default()
        }
    }
}

/// OpenAI-compatible chat endpoint used by the scorer.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:5001/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

// Keeps the key out of logs.
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LlmConfig {
    /// Fill in the key from the environment when the file has none.
    pub fn with_env_key(mut self, env_key: Option<String>) -> Self {
        if self.api_key.is_none() {
            self.api_key = env_key.filter(|k| !k.trim().is_empty());
        }
        self
    }
}

fn parse_yaml<T: DeserializeOwned>(contents: &str, path: &Path) -> Result<T, ConfigError> {
    serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a YAML config, or defaults when no path is given.
#[instrument(level = "debug", skip_all, fields(path = ?path))]
pub async fn load<T>(path: Option<&Path>) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default + std::fmt::Debug,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    // An empty file is `null` in YAML.
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    let config = parse_yaml(&contents, path)?;
    debug!(?config, "Loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: ScraperConfig =
            parse_yaml("max_workers: 8\noutput_dir: /tmp/out\n", Path::new("s.yaml")).unwrap();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = parse_yaml::<ScraperConfig>("max_wrokers: 8\n", Path::new("s.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = ScraperConfig {
            max_attempts: 0,
            base_delay_ms: 10,
            jitter_min_ms: 50,
            jitter_max_ms: 20,
            ..ScraperConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.jitter_max, Duration::from_millis(50));
        assert_eq!(policy.retry_statuses, vec![418]);
    }

    #[test]
    fn test_llm_key_from_env_only_when_missing() {
        let config = LlmConfig::default().with_env_key(Some("env-key".into()));
        assert_eq!(config.api_key.as_deref(), Some("env-key"));

        let config = LlmConfig {
            api_key: Some("file-key".into()),
            ..LlmConfig::default()
        }
        .with_env_key(Some("env-key".into()));
        assert_eq!(config.api_key.as_deref(), Some("file-key"));
        assert!(!format!("{config:?}").contains("file-key"));
    }

    #[tokio::test]
    async fn test_load_defaults_and_files() {
        let config: ScraperConfig = load(None).await.unwrap();
        assert_eq!(config, ScraperConfig::default());

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("llm.yaml");
        std::fs::write(&path, "api_base: https://llm.example/v1\nmodel: judge\n").unwrap();
        let config: LlmConfig = load(Some(&path)).await.unwrap();
        assert_eq!(config.api_base, "https://llm.example/v1");
        assert_eq!(config.model, "judge");

        let missing: Result<LlmConfig, _> = load(Some(&tmp.path().join("nope.yaml"))).await;
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
