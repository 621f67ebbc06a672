//! Error types for the resilience engine

use std::io;

use thiserror::Error;

use crate::retry::ErrorKind;

/// Result type alias for the resilience engine
pub type Result<T> = std::result::Result<T, Error>;

/// Resilience engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream service short-circuited (circuit open)
    ///
    /// This is a routing signal, not an upstream failure: callers receiving
    /// it should take the fallback path without recording a new failure.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Upstream analysis call failed; the raw message is kept for
    /// classification by the retry layer.
    #[error("Upstream analysis failed: {0}")]
    Upstream(String),

    /// Permanent caller/configuration defect (validation, authentication).
    ///
    /// Never retried and never routed to fallback — a degraded analysis
    /// cannot fix a malformed request or bad credentials.
    #[error("Fatal upstream error ({kind}): {message}")]
    Fatal {
        /// Classified error kind (always a non-retryable kind)
        kind: ErrorKind,
        /// Raw upstream message
        message: String,
    },

    /// Unknown record id (fallback result, failure detection)
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Deferred-task scheduling failed
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns `true` for errors that indicate a caller defect rather than
    /// an upstream outage.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::Config(_))
    }
}
