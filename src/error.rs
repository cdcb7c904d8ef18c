//! Error taxonomy shared by the feed client, mapper, processors and cycle driver.
//!
//! Per-record and per-page errors are matched on by the cycle driver (§7);
//! everything that doesn't fit the taxonomy collapses into `Other`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rate limited (429) after exhausting probe budget")]
    RateLimited,

    #[error("media URL expired or rejected by CDN ({status})")]
    UrlExpired { status: u16 },

    #[error("feed API error {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("record could not be mapped: {field}: {reason}")]
    MappingError { field: String, reason: String },

    #[error("persistence failure: {0}")]
    PersistenceError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True for errors that should abort the current page iteration
    /// (the cycle driver marks the run `partial` or `failed`).
    pub fn aborts_cycle(&self) -> bool {
        matches!(self, EngineError::ApiError { .. } | EngineError::RateLimited)
    }
}
