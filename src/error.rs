//! Error types for texsite operations.

use thiserror::Error;

/// Errors that can occur while building the site.
///
/// Only corpus-level failures surface here: missing chapter files, an
/// unreadable registry snapshot, a dead renderer channel. Per-token and
/// per-reference problems are downgraded to logged warnings with visible
/// fallback output and never reach this type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("invalid corpus: {0}")]
    InvalidCorpus(String),

    #[error("unknown chapter: {0}")]
    UnknownChapter(String),

    #[error("math renderer error: {0}")]
    Renderer(String),
}

pub type Result<T> = std::result::Result<T, Error>;
