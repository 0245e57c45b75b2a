//! Live stream sources.
//!
//! The recorder only depends on the [`StreamSource`] trait. [`StreamlinkSource`]
//! implements it on top of the `streamlink` command line tool.

pub mod error;
pub mod source;
pub mod streamlink;

pub use error::SourceError;
pub use source::{SourceOptions, SourceStream, StreamSource};
pub use streamlink::StreamlinkSource;
