//! Recording core.
//!
//! - [`LivenessMonitor`] polls the source for go-live/go-offline transitions.
//! - [`TitleResolver`] polls the source until the broadcast has a title.
//! - [`RecordingSession`] copies one broadcast to disk and names the file.
//! - [`Supervisor`] starts a new session whenever the previous one ends.
//!
//! Everything runs as cooperative tasks; the copy loop yields after every
//! chunk so the pollers are never starved, even on a single thread.

mod liveness;
mod path;
mod session;
mod supervisor;
mod title;

pub use liveness::{LiveState, LivenessMonitor};
pub use path::{FilePathAllocator, RECORDING_EXTENSION, TITLE_ERROR, normalize_directory};
pub use session::{RecordedBroadcast, RecordingSession, SessionOutcome, StreamEnd};
pub use supervisor::Supervisor;
pub use title::TitleResolver;
