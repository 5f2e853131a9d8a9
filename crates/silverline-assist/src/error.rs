use thiserror::Error;

use crate::limits::MessageKind;

/// Message length validation failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LimitError {
    #[error("{kind} too long ({length} characters). Maximum allowed: {max} characters.")]
    TooLong {
        kind: MessageKind,
        length: usize,
        max: usize,
    },

    /// The parameter store could not produce limits.
    #[error("parameter store error: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum AssistError {
    #[error(transparent)]
    Limit(#[from] LimitError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API error ({status}): {message}")]
    ModelApi { status: u16, message: String },

    #[error("model response parse error: {0}")]
    Parse(String),

    #[error("model unavailable: {0}")]
    Unavailable(&'static str),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("knowledge seed error: {0}")]
    Seed(String),
}
