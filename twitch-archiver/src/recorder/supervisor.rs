//! Restart-on-completion driver.

use std::sync::Arc;
use std::time::Duration;

use stream_source::StreamSource;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::session::{RecordingSession, SessionOutcome};
use crate::config::Config;

/// Runs one [`RecordingSession`] after another until the host shuts down.
///
/// Each session runs in its own task, so a panicking session is logged and
/// replaced instead of taking the process down.
pub struct Supervisor {
    config: Arc<Config>,
    source: Arc<dyn StreamSource>,
}

impl Supervisor {
    pub fn new(config: Config, source: Arc<dyn StreamSource>) -> Self {
        Self {
            config: Arc::new(config),
            source,
        }
    }

    /// Record broadcasts until `shutdown` is cancelled.
    ///
    /// A cancelled token still lets the current session finalize its file
    /// before this returns.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut session_count: u64 = 0;
        let mut first_poll_delay = Duration::ZERO;

        while !shutdown.is_cancelled() {
            session_count += 1;
            let session = RecordingSession::new(
                self.config.clone(),
                self.source.clone(),
                shutdown.child_token(),
            )
            .with_first_poll_delay(first_poll_delay);
            first_poll_delay = Duration::ZERO;

            let delay = match tokio::spawn(session.run()).await {
                Ok(Ok(SessionOutcome::Recorded(broadcast))) => {
                    info!(
                        session = session_count,
                        path = %broadcast.path.display(),
                        "broadcast recorded"
                    );
                    // The offline signal lags by up to one poll; don't reopen the tail.
                    self.config.restart_delay
                }
                Ok(Ok(SessionOutcome::Cancelled)) => break,
                Ok(Err(e)) if e.is_connection_refused() => {
                    warn!(session = session_count, error = %e, "connection refused, starting a fresh session");
                    // Restart right away, but keep the platform polled at most once per interval.
                    first_poll_delay = self.config.poll_interval;
                    Duration::ZERO
                }
                Ok(Err(e)) if e.is_offline() => {
                    info!(session = session_count, "stream went offline before it could be opened");
                    self.config.restart_delay
                }
                Ok(Err(e)) => {
                    error!(session = session_count, error = ?e, "recording session failed");
                    self.config.restart_delay
                }
                Err(e) => {
                    error!(session = session_count, error = %e, "recording session panicked");
                    self.config.restart_delay
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(sessions = session_count, "supervisor stopped");
    }
}
