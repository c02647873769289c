//! Error types for chatwire.
//!
//! None of these ever reach the host page: boundary code logs them and
//! degrades to "no captured data".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Observer setup failed: {0}")]
    ObserverSetup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
