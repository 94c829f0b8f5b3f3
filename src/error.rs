//! Error types for deglyph operations.

use thiserror::Error;

/// Errors that can occur while recovering a chapter.
///
/// These surface per-chapter failures only; the orchestrator catches them
/// and degrades to "no result" rather than aborting a whole run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid font: {0}")]
    InvalidFont(String),

    #[error("font unavailable: {0}")]
    FontUnavailable(String),

    #[error("chapter decrypt failed: {0}")]
    DecryptFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
