use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a rendering engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine failed to launch: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("navigation to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP error {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("engine disconnected")]
    Disconnected,
}

/// Failures surfaced by the resource pool.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("no session became available within {waited:?}")]
    Exhausted { waited: Duration },

    #[error("pool is shut down")]
    Closed,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failure of a single page fetch through a [`crate::renderer::PageRenderer`].
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Failed(#[from] EngineError),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::InvalidUrl { .. } => FailureKind::InvalidUrl,
            FetchError::Pool(PoolError::Exhausted { .. }) => FailureKind::PoolExhausted,
            FetchError::Pool(PoolError::Closed) => FailureKind::PoolClosed,
            FetchError::Pool(PoolError::Engine(_)) | FetchError::Failed(_) => {
                FailureKind::FetchFailed
            }
        }
    }
}

/// Coarse classification of a per-page failure, kept in crawl results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PoolExhausted,
    PoolClosed,
    FetchFailed,
    InvalidUrl,
}

/// Structural failures that abort a whole crawl run.
#[derive(Debug, Clone, Error)]
pub enum CrawlError {
    #[error("invalid start URL '{url}': {reason}")]
    InvalidStartUrl { url: String, reason: String },

    #[error("crawl aborted: {0}")]
    RunAborted(String),
}
