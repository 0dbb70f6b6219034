//! Typed errors for each stage of the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a single scraper run.
///
/// Transient failures (rate limiting, dropped connections) never surface here;
/// the retry policy absorbs them and reports "no response" instead.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The source answered with a non-success status that is not retryable.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The request could not be completed and the failure is not retryable.
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// The response body was not the JSON document the source promises.
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The response parsed but lacked a structural element the scraper needs.
    #[error("unexpected page structure at {url}: {reason}")]
    Structure { url: String, reason: String },
}

/// Errors raised while loading the request catalog. Fatal for the run.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Errors raised by the partial result writer.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The run directory could not be created. Fatal for the run.
    #[error("failed to create run directory {path}: {source}")]
    RunDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither the partial file nor its placeholder could be written.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the merger. Per-file problems are skipped, not returned.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("failed to write merged output {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode merged output: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors raised while scoring an article.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid criteria file: {0}")]
    Criteria(#[source] serde_json::Error),

    #[error("judge response is not valid evaluation JSON: {0}")]
    Response(#[source] serde_json::Error),

    #[error("LLM request failed: {0}")]
    Llm(String),
}

/// Failure to obtain any HTTP response at all.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection refused/reset or the request timed out. Retryable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Anything else (bad URL, body decoding, TLS setup). Not retryable.
    #[error("request failed: {0}")]
    Other(String),
}

/// Why a single (company, source) task produced no output.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("task panicked: {0}")]
    Panicked(String),
}
