//! Error types for the advisory engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdvisorError>;

#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Rate limited by advisory endpoint")]
    RateLimited,

    #[error("No enabled advisory credentials")]
    NoCredentials,

    #[error("All {attempts} credentials failed, last error: {last_error}")]
    CredentialsExhausted { attempts: usize, last_error: String },

    #[error("Malformed advisory response: {0}")]
    MalformedResponse(String),

    #[error("Missing market data: {0}")]
    MissingData(String),
}
