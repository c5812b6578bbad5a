//! Error types for dataset refresh, delivery and configuration
//!
//! Errors are classified by recoverability:
//! - Retryable: network issues, timeouts, server-side HTTP errors
//! - NonRetryable: decoding failures, missing required columns
//!
//! Nothing here is fatal to the process. Fetch errors fall back to the
//! last good dataset, delivery errors are isolated per recipient.

use thiserror::Error;

/// Errors raised while refreshing the tabular dataset.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Dataset source answered HTTP {0}")]
    HttpStatus(u16),

    #[error("Fetch timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to decode dataset: {0}")]
    Decode(String),

    /// A required column is missing. Treated as a fetch failure.
    #[error("Required column '{0}' not found in dataset")]
    SchemaInvalid(String),
}

impl FetchError {
    /// Returns true if retrying later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::HttpStatus(code) => *code >= 500 || *code == 429,
            FetchError::Decode(_) | FetchError::SchemaInvalid(_) => false,
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "Check the network connection to the dataset host.",
            FetchError::HttpStatus(_) => "Verify the dataset URL is public and still exported.",
            FetchError::Timeout(_) => "The dataset host is slow. It will be retried on next access.",
            FetchError::Decode(_) => "Check the dataset export format (CSV or XLSX).",
            FetchError::SchemaInvalid(_) => "Restore the project name column in the sheet.",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(0)
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Errors raised while delivering a block to a single recipient.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Recipient rejected the message: {0}")]
    Rejected(String),

    #[error("Delivery timed out after {0} seconds")]
    Timeout(u64),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
