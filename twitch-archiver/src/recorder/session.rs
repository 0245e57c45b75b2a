//! A single broadcast, from go-live to the final file name.
//!
//! # Protocol
//!
//! 1. Wait until the liveness monitor reports the channel live.
//! 2. Capture the start timestamp and open the best quality stream.
//! 3. Create the provisional file and start the title resolver.
//! 4. Copy the stream into the file chunk by chunk until the channel goes
//!    offline, the stream ends, or shutdown is requested. A title arriving
//!    meanwhile renames the file in place.
//! 5. Stop both background tasks and wait for them to finish, then give the
//!    file its final name (the real title or `title-error`).
//! 6. Close the stream.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use stream_source::{SourceStream, StreamSource};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::liveness::{LiveState, LivenessMonitor};
use super::path::{FilePathAllocator, TITLE_ERROR};
use super::title::TitleResolver;
use crate::config::Config;
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Why the copy loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The liveness monitor reported the channel offline.
    Offline,
    /// The source closed the stream.
    EndOfStream,
    /// Reading from the source failed.
    ReadError,
    /// The liveness monitor stopped on its own.
    MonitorStopped,
    /// The host asked the process to stop.
    Shutdown,
}

/// A finished recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBroadcast {
    pub path: PathBuf,
    /// Sanitized title, `None` if the sentinel was used.
    pub title: Option<String>,
    pub bytes_written: u64,
    pub end: StreamEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Recorded(RecordedBroadcast),
    /// Shutdown was requested before the channel went live.
    Cancelled,
}

pub struct RecordingSession {
    config: Arc<Config>,
    source: Arc<dyn StreamSource>,
    shutdown: CancellationToken,
    first_poll_delay: Duration,
}

impl RecordingSession {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn StreamSource>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            source,
            shutdown,
            first_poll_delay: Duration::ZERO,
        }
    }

    /// Hold the first liveness poll back by `delay`.
    pub fn with_first_poll_delay(mut self, delay: Duration) -> Self {
        self.first_poll_delay = delay;
        self
    }

    /// Run the whole protocol once.
    ///
    /// Every exit path stops the background tasks and waits for them, so
    /// nothing from this session outlives the call.
    pub async fn run(self) -> Result<SessionOutcome> {
        let monitor = LivenessMonitor::spawn_after(
            self.source.clone(),
            self.config.poll_interval,
            self.first_poll_delay,
        );
        let mut live_rx = monitor.subscribe();

        info!(url = %self.source.url(), "waiting for stream to go live");
        let went_live = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            live = live_rx.wait_for(|state| state.is_live()) => live.is_ok(),
        };
        if !went_live {
            monitor.stop().await?;
            if self.shutdown.is_cancelled() {
                return Ok(SessionOutcome::Cancelled);
            }
            return Err(Error::Other("liveness monitor stopped unexpectedly".to_string()));
        }
        info!(url = %self.source.url(), "stream is live");

        let start_timestamp = match format_timestamp(&self.config.time_format) {
            Ok(ts) => ts,
            Err(e) => {
                stop_monitor(monitor).await;
                return Err(e);
            }
        };

        let mut stream = match self.source.open_best().await {
            Ok(stream) => stream,
            Err(e) => {
                if e.is_connection_refused() {
                    warn!(error = %e, "twitch.tv refused the connection");
                }
                stop_monitor(monitor).await;
                return Err(e.into());
            }
        };

        let allocator =
            FilePathAllocator::new(&self.config.out_dir, &self.config.streamer, &start_timestamp);
        let mut recording = match Recording::create(allocator).await {
            Ok(recording) => recording,
            Err(e) => {
                stream.close().await;
                stop_monitor(monitor).await;
                return Err(e);
            }
        };
        info!("writing stream to {}", recording.path().display());

        let mut resolver =
            TitleResolver::spawn(self.source.clone(), self.config.title_poll_interval);

        let copied = self
            .copy(&mut stream, &mut recording, &mut resolver, &mut live_rx)
            .await;

        // Both tasks must be gone before the path is touched again.
        let monitor_result = monitor.stop().await;
        let late_title = resolver.stop().await;
        stream.close().await;

        let bytes_written = recording.bytes_written();
        let finished = recording.finish(late_title).await;

        let end = copied?;
        let (path, title) = finished?;
        monitor_result?;

        info!(
            path = %path.display(),
            bytes = bytes_written,
            ?end,
            "recording finished"
        );
        Ok(SessionOutcome::Recorded(RecordedBroadcast {
            path,
            title,
            bytes_written,
            end,
        }))
    }

    /// Copy the stream into the recording until the broadcast ends.
    async fn copy(
        &self,
        stream: &mut SourceStream,
        recording: &mut Recording,
        resolver: &mut TitleResolver,
        live_rx: &mut watch::Receiver<LiveState>,
    ) -> Result<StreamEnd> {
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];

        loop {
            // The monitors share this thread; give them a turn on every chunk.
            tokio::task::yield_now().await;

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, ending recording");
                    return Ok(StreamEnd::Shutdown);
                }
                changed = live_rx.changed() => {
                    if changed.is_err() {
                        warn!("liveness monitor stopped, ending recording");
                        return Ok(StreamEnd::MonitorStopped);
                    }
                    let state = *live_rx.borrow_and_update();
                    if !state.is_live() {
                        info!("stream ended");
                        return Ok(StreamEnd::Offline);
                    }
                }
                title = resolver.resolved(), if resolver.is_pending() => match title {
                    Some(title) => recording.apply_title(title).await,
                    None => warn!("title resolver finished without a title"),
                },
                read = stream.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("stream closed by source");
                        return Ok(StreamEnd::EndOfStream);
                    }
                    Ok(n) => recording.write(&buf[..n]).await?,
                    Err(e) => {
                        warn!(error = %e, "stream read failed, treating as stream end");
                        return Ok(StreamEnd::ReadError);
                    }
                },
            }
        }
    }
}

/// Stop a monitor on an error path, logging instead of returning its error.
async fn stop_monitor(monitor: LivenessMonitor) {
    if let Err(e) = monitor.stop().await {
        debug!(error = %e, "liveness monitor ended with error");
    }
}

fn format_timestamp(format: &str) -> Result<String> {
    let mut out = String::new();
    write!(out, "{}", Local::now().format(format))
        .map_err(|_| Error::Other(format!("invalid time format '{format}'")))?;
    Ok(out)
}

/// The file being written and the name it currently has.
///
/// Only one append handle is open at a time; renames close it first and
/// reopen the file under its new name.
struct Recording {
    allocator: FilePathAllocator,
    path: PathBuf,
    file: Option<File>,
    title: Option<String>,
    /// The file already carries its final, titled name.
    finalized: bool,
    bytes_written: u64,
}

impl Recording {
    async fn create(allocator: FilePathAllocator) -> Result<Self> {
        let (path, file) = allocator.create_provisional().await?;
        Ok(Self {
            allocator,
            path,
            file: Some(file),
            title: None,
            finalized: false,
            bytes_written: 0,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(Error::Other(format!(
                "recording file {} is not open",
                self.path.display()
            )));
        };
        file.write_all(data)
            .await
            .map_err(|e| io_error("writing to", &self.path, e))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Record the title and rename the file while the recording continues.
    ///
    /// A failed rename is logged; `finish` tries again with the same title.
    async fn apply_title(&mut self, title: String) {
        if self.title.is_some() {
            return;
        }
        self.title = Some(title.clone());

        if let Err(e) = self.rename(&title).await {
            error!(error = %e, "failed to rename {}", self.path.display());
        }
    }

    async fn rename(&mut self, title: &str) -> Result<()> {
        self.close_file().await?;
        let renamed = self.allocator.finalize(&self.path, title).await;
        if let Ok(path) = &renamed {
            self.path = path.clone();
            self.finalized = true;
        }
        self.reopen().await?;
        renamed.map(drop)
    }

    async fn close_file(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| io_error("flushing", &self.path, e))?;
        }
        Ok(())
    }

    async fn reopen(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error("reopening", &self.path, e))?;
        self.file = Some(file);
        Ok(())
    }

    /// Close the file and give it its final name.
    async fn finish(mut self, late_title: Option<String>) -> Result<(PathBuf, Option<String>)> {
        if let Err(e) = self.close_file().await {
            error!(error = %e, "failed to flush recording");
        }

        let title = self.title.take().or(late_title);
        if self.finalized {
            return Ok((self.path, title));
        }
        if title.is_none() {
            error!("unable to retrieve stream title");
        }
        let path = self
            .allocator
            .finalize(&self.path, title.as_deref().unwrap_or(TITLE_ERROR))
            .await?;
        Ok((path, title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_colliding_rename_is_not_repeated_on_finish() {
        let dir = TempDir::new().unwrap();
        let allocator = FilePathAllocator::new(dir.path().to_str().unwrap(), "foo", "20240101");
        let occupied = allocator.final_path("t");
        std::fs::write(&occupied, b"older recording").unwrap();

        let mut recording = Recording::create(allocator).await.unwrap();
        recording.write(b"before ").await.unwrap();
        recording.apply_title("t".to_string()).await;
        let renamed = recording.path().to_path_buf();
        assert_ne!(renamed, occupied);
        recording.write(b"after").await.unwrap();

        let (path, title) = recording.finish(None).await.unwrap();
        assert_eq!(path, renamed);
        assert_eq!(title.as_deref(), Some("t"));
        assert_eq!(std::fs::read(&path).unwrap(), b"before after");
        assert_eq!(std::fs::read(&occupied).unwrap(), b"older recording");
    }

    #[tokio::test]
    async fn test_finish_without_title_uses_sentinel() {
        let dir = TempDir::new().unwrap();
        let allocator = FilePathAllocator::new(dir.path().to_str().unwrap(), "foo", "20240101");

        let mut recording = Recording::create(allocator.clone()).await.unwrap();
        recording.write(b"bytes").await.unwrap();

        let (path, title) = recording.finish(None).await.unwrap();
        assert_eq!(title, None);
        assert_eq!(path, allocator.final_path(TITLE_ERROR));
        assert!(!allocator.provisional_path().exists());
    }
}
