//! twitch-archiver library crate.
//!
//! Records a live channel to disk, one file per broadcast, renaming each file
//! once the broadcast title is known.

pub mod config;
pub mod error;
pub mod logging;
pub mod recorder;
pub mod signal;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
