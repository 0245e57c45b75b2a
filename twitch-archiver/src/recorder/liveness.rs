//! Liveness polling.

use std::sync::Arc;
use std::time::Duration;

use stream_source::StreamSource;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;

/// Last observed liveness of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    /// No successful poll yet.
    Unknown,
    Live,
    Offline,
}

impl LiveState {
    pub fn is_live(self) -> bool {
        self == LiveState::Live
    }
}

impl std::fmt::Display for LiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LiveState::Unknown => "unknown",
            LiveState::Live => "live",
            LiveState::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Background task polling the source for go-live/go-offline transitions.
///
/// The state is published on a watch channel. The task only ends when
/// stopped or when the source refuses the connection; in the latter case the
/// channel closes and [`stop`](LivenessMonitor::stop) returns the error.
pub struct LivenessMonitor {
    state: watch::Receiver<LiveState>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl LivenessMonitor {
    /// Start polling immediately, then once per `interval`.
    pub fn spawn(source: Arc<dyn StreamSource>, interval: Duration) -> Self {
        Self::spawn_after(source, interval, Duration::ZERO)
    }

    /// Like [`spawn`](LivenessMonitor::spawn), with the first poll `delay` from now.
    pub fn spawn_after(
        source: Arc<dyn StreamSource>,
        interval: Duration,
        delay: Duration,
    ) -> Self {
        let (tx, state) = watch::channel(LiveState::Unknown);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_liveness(
            source,
            interval,
            Instant::now() + delay,
            tx,
            cancel.clone(),
        ));

        Self {
            state,
            cancel,
            handle,
        }
    }

    /// A receiver for state updates.
    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state.clone()
    }

    /// Cancel the task and wait until it has actually stopped.
    ///
    /// Returns the error the task ended with, if it ended on its own.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.handle.await?
    }
}

async fn poll_liveness(
    source: Arc<dyn StreamSource>,
    interval: Duration,
    first_poll: Instant,
    tx: watch::Sender<LiveState>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval_at(first_poll, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.check_live() => result,
        };

        match result {
            Ok(live) => {
                let next = if live { LiveState::Live } else { LiveState::Offline };
                let changed = tx.send_if_modified(|state| {
                    if *state == next {
                        return false;
                    }
                    *state = next;
                    true
                });
                if changed {
                    info!(url = %source.url(), "stream is {next}");
                } else {
                    debug!(url = %source.url(), "stream still {next}");
                }
            }
            Err(e) if e.is_connection_refused() => {
                warn!(url = %source.url(), error = %e, "liveness check refused, stopping monitor");
                return Err(e.into());
            }
            Err(e) => {
                warn!(url = %source.url(), error = %e, "liveness check failed, keeping last state");
            }
        }
    }

    debug!("liveness monitor stopped");
    Ok(())
}
