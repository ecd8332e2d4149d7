use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the index, the crawler and the ranking engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The query tokenized to nothing.
    #[error("query yields no searchable terms")]
    EmptyQuery,

    #[error("root directory not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// A file could be read but not turned into text.
    #[error("cannot extract text from {}: {reason}", .path.display())]
    Extract { path: PathBuf, reason: String },

    /// The index reached a state its invariants forbid.
    #[error("index invariant violated: {0}")]
    Invariant(String),

    #[error("crawl cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Error::Invariant(msg.into())
    }

    /// Errors caused by what the caller asked for rather than by the index.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::EmptyQuery | Error::RootNotFound(_))
    }
}
