//! Error types for Deepquill
//!
//! Provides the failure taxonomy shared by the retrieval and orchestration
//! layers:
//! - Distinct error types for each degraded-mode trigger
//! - Machine-readable error codes
//! - Conversions from transport/serialization errors
//!
//! Most of these never escape the `research()` boundary: they select a
//! fallback path (vector-only retrieval, rerank passthrough, error-flagged
//! worker results) rather than aborting a session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Query validation (1xxx)
    InvalidQuery,

    // Degraded-state triggers (2xxx)
    IndexUnavailable,
    ModelUnavailable,
    ResourceExhaustion,

    // External call failures (3xxx)
    TransientCallFailure,
    UpstreamError,

    // Structured output (4xxx)
    MalformedOutput,

    // Internal (9xxx)
    ConfigurationError,
    SerializationError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidQuery => 1001,

            ErrorCode::IndexUnavailable => 2001,
            ErrorCode::ModelUnavailable => 2002,
            ErrorCode::ResourceExhaustion => 2003,

            ErrorCode::TransientCallFailure => 3001,
            ErrorCode::UpstreamError => 3002,

            ErrorCode::MalformedOutput => 4001,

            ErrorCode::ConfigurationError => 9001,
            ErrorCode::SerializationError => 9002,
            ErrorCode::InternalError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Query validation
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    // Degraded-state triggers
    #[error("Keyword index unavailable: {reason}")]
    IndexUnavailable { reason: String },

    #[error("Model unavailable: {service}")]
    ModelUnavailable { service: String },

    #[error("Resource exhaustion during {stage}")]
    ResourceExhaustion { stage: String },

    // External call failures
    #[error("External call failed after {attempts} attempts: {message}")]
    TransientCallFailure { attempts: u32, message: String },

    #[error("Upstream service error: {message}")]
    Upstream { message: String },

    // Structured output
    #[error("Malformed structured output: {message}")]
    MalformedOutput { message: String },

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidQuery { .. } => ErrorCode::InvalidQuery,
            AppError::IndexUnavailable { .. } => ErrorCode::IndexUnavailable,
            AppError::ModelUnavailable { .. } => ErrorCode::ModelUnavailable,
            AppError::ResourceExhaustion { .. } => ErrorCode::ResourceExhaustion,
            AppError::TransientCallFailure { .. } => ErrorCode::TransientCallFailure,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::MalformedOutput { .. } => ErrorCode::MalformedOutput,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether this error selects a degraded mode rather than a hard failure.
    ///
    /// Degraded-mode errors are absorbed at the stage boundary where they
    /// occur: the stage logs them and falls back (vector-only search, rerank
    /// passthrough, placeholder worker result).
    pub fn is_degraded_mode(&self) -> bool {
        matches!(
            self,
            AppError::InvalidQuery { .. }
                | AppError::IndexUnavailable { .. }
                | AppError::ModelUnavailable { .. }
                | AppError::ResourceExhaustion { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::InvalidQuery {
            reason: "empty".into(),
        };
        assert_eq!(err.code(), ErrorCode::InvalidQuery);
        assert_eq!(err.code().as_code(), 1001);
    }

    #[test]
    fn test_degraded_mode_classification() {
        let degraded = AppError::IndexUnavailable {
            reason: "never built".into(),
        };
        assert!(degraded.is_degraded_mode());

        let hard = AppError::Configuration {
            message: "missing api key".into(),
        };
        assert!(!hard.is_degraded_mode());
    }

    #[test]
    fn test_transient_failure_message() {
        let err = AppError::TransientCallFailure {
            attempts: 3,
            message: "connection reset".into(),
        };
        assert!(err.to_string().contains("3 attempts"));
    }
}
