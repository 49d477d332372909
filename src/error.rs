// Request-level and configuration errors
// Per-cell fetch failures never reach these types; they become the error sentinel

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityError {
    #[error("Invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    // Inverted range, or a malformed bound on the range boundary
    #[error("Invalid range: {0}")]
    InvalidRange(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("HTTP client initialization error: {0}")]
    HttpClient(#[from] reqwest::Error),
}
