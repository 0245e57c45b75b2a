//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors so log lines say
//! which file failed and why.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub fn ensure_dir_all_sync(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error("creating directory", path, e))
}

/// Check that files can be created in `dir` by creating and removing a probe file.
pub fn probe_writable(dir: &Path) -> Result<()> {
    tempfile::Builder::new()
        .prefix(".twitch-archiver-probe")
        .tempfile_in(dir)
        .map(drop)
        .map_err(|e| io_error("probing write access to", dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_writable_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        probe_writable(dir.path()).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_probe_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = probe_writable(&missing).unwrap_err();
        assert!(err.to_string().contains("probing write access"));
    }
}
