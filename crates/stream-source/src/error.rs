use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The platform refused the connection or the plugin session expired.
    ///
    /// Callers are expected to drop all state tied to the current broadcast
    /// and start over.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("no streams found")]
    NoStreams,
    #[error("unsupported url: {0}")]
    Unsupported(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("other: {0}")]
    Other(String),
}

impl SourceError {
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, SourceError::ConnectionRefused(_))
    }

    /// Whether the error just means "not live right now".
    pub fn is_offline(&self) -> bool {
        matches!(self, SourceError::NoStreams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SourceError::ConnectionRefused("401".into()).is_connection_refused());
        assert!(!SourceError::NoStreams.is_connection_refused());
        assert!(SourceError::NoStreams.is_offline());
        assert!(!SourceError::Other("boom".into()).is_offline());
    }
}
