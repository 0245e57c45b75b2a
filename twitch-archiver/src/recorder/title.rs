//! Title resolution.

use std::sync::Arc;
use std::time::Duration;

use stream_source::StreamSource;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::utils::filename::sanitize_filename;

/// One-shot background task that polls the source until the broadcast has a title.
///
/// The resolved title is already sanitized. The task never mutates anything
/// itself; the owning session picks the title up through
/// [`resolved`](TitleResolver::resolved) or [`stop`](TitleResolver::stop).
pub struct TitleResolver {
    cancel: CancellationToken,
    handle: Option<JoinHandle<Option<String>>>,
}

impl TitleResolver {
    pub fn spawn(source: Arc<dyn StreamSource>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(resolve_title(source, interval, cancel.clone()));

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Whether the task has not been joined yet.
    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Wait for the task to finish on its own.
    ///
    /// Resolves once; after that it stays pending forever, so it can sit in a
    /// `select!` loop guarded by [`is_pending`](TitleResolver::is_pending).
    pub async fn resolved(&mut self) -> Option<String> {
        let Some(handle) = self.handle.as_mut() else {
            return std::future::pending().await;
        };
        let result = handle.await;
        self.handle = None;
        join_result(result)
    }

    /// Cancel the task and wait until it has actually stopped.
    ///
    /// Returns the title if the task managed to resolve it before stopping
    /// and it was not collected through `resolved` already.
    pub async fn stop(mut self) -> Option<String> {
        self.cancel.cancel();
        let handle = self.handle.take()?;
        join_result(handle.await)
    }
}

fn join_result(result: Result<Option<String>, tokio::task::JoinError>) -> Option<String> {
    match result {
        Ok(title) => title,
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            error!(error = %e, "title resolver task failed");
            None
        }
    }
}

async fn resolve_title(
    source: Arc<dyn StreamSource>,
    interval: Duration,
    cancel: CancellationToken,
) -> Option<String> {
    info!("attempting to resolve stream title");

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.fetch_title() => result,
        };

        match result {
            Ok(Some(raw)) => {
                let title = sanitize_filename(&raw);
                if !title.is_empty() {
                    info!(%title, "resolved stream title");
                    return Some(title);
                }
                debug!(raw = %raw, "title is empty after sanitizing, retrying");
            }
            Ok(None) => debug!("stream title not available yet"),
            Err(e) => warn!(url = %source.url(), error = %e, "failed to fetch stream title"),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("title resolver cancelled");
    None
}
