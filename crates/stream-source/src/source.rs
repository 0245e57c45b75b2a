use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::Child;
use tracing::debug;

use crate::error::SourceError;

/// Per-plugin options forwarded to the extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOptions {
    /// OAuth token sent as `Authorization: OAuth <token>`.
    pub oauth_token: Option<String>,
    /// Record rerun broadcasts instead of treating them as offline.
    pub record_reruns: bool,
    /// Do not follow the channel when it hosts another channel.
    pub disable_hosting: bool,
    /// Filter out embedded advertisement segments.
    pub disable_ads: bool,
}

/// A live channel that can be polled for status and metadata and opened for reading.
///
/// Implementations must be cheap to call repeatedly: the recorder polls
/// [`check_live`](StreamSource::check_live) and
/// [`fetch_title`](StreamSource::fetch_title) on fixed intervals for the
/// whole lifetime of the process.
#[async_trait]
pub trait StreamSource: Send + Sync + 'static {
    /// Channel URL, used for logging.
    fn url(&self) -> &str;

    /// Whether a "best" quality stream is currently available.
    async fn check_live(&self) -> Result<bool, SourceError>;

    /// Current broadcast title, `None` while the platform has not published one.
    async fn fetch_title(&self) -> Result<Option<String>, SourceError>;

    /// Open the best quality stream.
    ///
    /// Fails with [`SourceError::ConnectionRefused`] when the platform
    /// rejects the session.
    async fn open_best(&self) -> Result<SourceStream, SourceError>;
}

/// Raw byte stream of an opened broadcast.
///
/// Owns whatever backs the stream (a child process, a socket). Closing is
/// explicit and consumes the handle, so it can happen only once.
pub struct SourceStream {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    child: Option<Child>,
}

impl SourceStream {
    /// Wrap an arbitrary reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            child: None,
        }
    }

    /// Read from the stdout of a spawned process. The process is killed on close.
    pub(crate) fn from_child(mut child: Child) -> Result<Self, SourceError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Other("failed to capture child stdout".to_string()))?;
        Ok(Self {
            reader: Box::pin(stdout),
            child: Some(child),
        })
    }

    /// Release the stream and terminate its backing process, if any.
    pub async fn close(mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Err(e) = child.start_kill() {
            // Already exited on its own.
            debug!(error = %e, "stream process not killed");
        }
        match child.wait().await {
            Ok(status) => debug!(%status, "stream process exited"),
            Err(e) => debug!(error = %e, "failed to reap stream process"),
        }
    }
}

impl AsyncRead for SourceStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

impl std::fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStream")
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_reader_stream_reads_until_eof() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut stream = SourceStream::from_reader(rx);

        tx.write_all(b"abc").await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");

        stream.close().await;
    }
}
