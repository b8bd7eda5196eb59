// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds callers may want to tell apart.
///
/// Library functions return `anyhow::Result`; these sit at the root of the
/// chain, so `err.downcast_ref::<ScrapeError>()` recovers the kind.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Malformed input that aborts the whole document.
    #[error("parse error: {0}")]
    Parse(String),

    /// A local copy was requested before it was fetched.
    #[error("no local copy exists at {}", .0.display())]
    ResourceNotFound(PathBuf),

    /// The remote transfer finished but left no local file behind.
    #[error("no file downloaded from {0}")]
    Download(String),

    #[error("invalid resource uri {0:?}")]
    InvalidUri(String),

    #[error("unknown resource {0:?}")]
    UnknownResource(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ScrapeError {
    pub fn parse(msg: impl Into<String>) -> Self {
        ScrapeError::Parse(msg.into())
    }
}
