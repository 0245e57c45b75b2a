//! Application-wide error types.

use std::path::{Path, PathBuf};

use stream_source::SourceError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stream source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error while {op} {}: {source}", .path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// The platform refused the connection; the session must restart from scratch.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Error::Source(e) if e.is_connection_refused())
    }

    /// The channel went offline before the stream could be opened.
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::Source(e) if e.is_offline())
    }
}
