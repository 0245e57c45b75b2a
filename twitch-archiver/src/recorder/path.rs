//! Output path allocation.
//!
//! A recording starts under a provisional name, `<streamer>_<timestamp>.ts`,
//! and is renamed to `<streamer>_<timestamp>_<title>.ts` once the title is
//! known. Neither step ever replaces an existing file: provisional files are
//! created with `create_new`, renames go through a hard link so an occupied
//! destination fails atomically, and on collision the wall-clock time (then a
//! counter) is appended to the name.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveTime};
use tokio::fs::{File, OpenOptions};
use tracing::{debug, info, warn};

use crate::Result;
use crate::utils::filename::sanitize_filename;
use crate::utils::fs::io_error;

/// Extension of every recording.
pub const RECORDING_EXTENSION: &str = "ts";

/// Title used when the real one never arrived.
pub const TITLE_ERROR: &str = "title-error";

/// Time appended to a colliding name.
const COLLISION_TIME_FORMAT: &str = "%H-%M-%S";

/// Normalize an output directory: forward slashes, exactly one trailing separator.
pub fn normalize_directory(dir: &str) -> String {
    let dir = dir.trim().replace('\\', "/");
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() {
        if dir.starts_with('/') {
            "/".to_string()
        } else {
            "./".to_string()
        }
    } else {
        format!("{trimmed}/")
    }
}

/// Derives and repairs the file paths of a single broadcast.
#[derive(Debug, Clone)]
pub struct FilePathAllocator {
    directory: String,
    /// Sanitized `<streamer>_<timestamp>`.
    base: String,
}

impl FilePathAllocator {
    pub fn new(out_dir: &str, streamer: &str, start_timestamp: &str) -> Self {
        let base = [streamer, start_timestamp]
            .iter()
            .map(|s| sanitize_filename(s))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_");

        Self {
            directory: normalize_directory(out_dir),
            base,
        }
    }

    /// Path of a recording whose title is not known yet.
    pub fn provisional_path(&self) -> PathBuf {
        self.candidate(None, 0, "")
    }

    /// Preferred path once the title is known. Empty titles fall back to [`TITLE_ERROR`].
    pub fn final_path(&self, title: &str) -> PathBuf {
        self.candidate(Some(&effective_title(title)), 0, "")
    }

    /// Name for the given collision attempt.
    ///
    /// Attempt 0 is the plain name, attempt 1 appends `stamp`, later attempts
    /// append `stamp` and a counter.
    fn candidate(&self, title: Option<&str>, attempt: u32, stamp: &str) -> PathBuf {
        let mut name = self.base.clone();
        if let Some(title) = title {
            push_segment(&mut name, title);
        }
        match attempt {
            0 => {}
            1 => push_segment(&mut name, stamp),
            n => push_segment(&mut name, &format!("{stamp}_{}", n - 1)),
        }
        PathBuf::from(format!("{}{name}.{RECORDING_EXTENSION}", self.directory))
    }

    /// Create the provisional file exclusively, moving to a free name on collision.
    pub async fn create_provisional(&self) -> Result<(PathBuf, File)> {
        let stamp = collision_stamp();
        let mut attempt = 0;
        loop {
            let path = self.candidate(None, attempt, &stamp);
            match OpenOptions::new()
                .append(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "path already exists, trying another name");
                    attempt += 1;
                }
                Err(e) => return Err(io_error("creating", &path, e)),
            }
        }
    }

    /// Rename `current` to the titled name and return the new path.
    ///
    /// The file is moved, never copied, and an existing destination is never
    /// replaced. Callers must have flushed their writes to `current`.
    pub async fn finalize(&self, current: &Path, title: &str) -> Result<PathBuf> {
        let title = effective_title(title);
        if self.is_final_for(current, &title) {
            return Ok(current.to_path_buf());
        }

        let stamp = collision_stamp();
        let mut attempt = 0;
        loop {
            let target = self.candidate(Some(&title), attempt, &stamp);
            match rename_no_replace(current, &target).await {
                Ok(()) => {
                    info!("renamed {} to {}", current.display(), target.display());
                    return Ok(target);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %target.display(), "path already exists, trying another name");
                    attempt += 1;
                }
                Err(e) => return Err(io_error("renaming", current, e)),
            }
        }
    }

    /// Whether `path` already is the titled name, or one of its collision variants.
    fn is_final_for(&self, path: &Path, title: &str) -> bool {
        let plain = self.candidate(Some(title), 0, "");
        if path == plain {
            return true;
        }
        if path.parent() != plain.parent() || path.extension() != plain.extension() {
            return false;
        }
        let (Some(stem), Some(plain_stem)) = (
            path.file_stem().and_then(|s| s.to_str()),
            plain.file_stem().and_then(|s| s.to_str()),
        ) else {
            return false;
        };
        stem.strip_prefix(plain_stem)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(is_collision_suffix)
    }
}

/// `HH-MM-SS` or `HH-MM-SS_<n>`.
fn is_collision_suffix(suffix: &str) -> bool {
    let (time, counter) = match suffix.split_once('_') {
        Some((time, counter)) => (time, Some(counter)),
        None => (suffix, None),
    };
    NaiveTime::parse_from_str(time, COLLISION_TIME_FORMAT).is_ok()
        && counter.is_none_or(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit()))
}

fn effective_title(title: &str) -> String {
    match sanitize_filename(title) {
        t if t.is_empty() => TITLE_ERROR.to_string(),
        t => t,
    }
}

fn push_segment(name: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    if !name.is_empty() {
        name.push('_');
    }
    name.push_str(segment);
}

fn collision_stamp() -> String {
    Local::now().format(COLLISION_TIME_FORMAT).to_string()
}

/// Move `from` to `to`, failing with `AlreadyExists` instead of replacing `to`.
async fn rename_no_replace(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::hard_link(from, to).await {
        Ok(()) => {
            if let Err(e) = tokio::fs::remove_file(from).await {
                unlink_rollback(to).await;
                return Err(e);
            }
            Ok(())
        }
        Err(e) if matches!(e.kind(), ErrorKind::AlreadyExists | ErrorKind::NotFound) => Err(e),
        Err(e) => {
            debug!(error = %e, "hard link unavailable, falling back to rename");
            if tokio::fs::try_exists(to).await? {
                return Err(ErrorKind::AlreadyExists.into());
            }
            tokio::fs::rename(from, to).await
        }
    }
}

/// Undo a hard link so the recording keeps a single name.
async fn unlink_rollback(link: &Path) {
    if let Err(e) = tokio::fs::remove_file(link).await {
        warn!(
            path = %link.display(),
            error = %e,
            "failed to remove link after an aborted rename, recording has two names"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn ts_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    fn allocator(dir: &TempDir) -> FilePathAllocator {
        FilePathAllocator::new(dir.path().to_str().unwrap(), "foo", "20240101")
    }

    #[test]
    fn test_normalize_directory() {
        assert_eq!(normalize_directory("/rec"), "/rec/");
        assert_eq!(normalize_directory("/rec//"), "/rec/");
        assert_eq!(normalize_directory(r"C:\rec\"), "C:/rec/");
        assert_eq!(normalize_directory("/"), "/");
        assert_eq!(normalize_directory(""), "./");
    }

    #[test]
    fn test_path_shapes() {
        let allocator = FilePathAllocator::new("/rec/", "foo", "20240101");
        assert_eq!(allocator.provisional_path(), PathBuf::from("/rec/foo_20240101.ts"));
        assert_eq!(
            allocator.final_path("Cool: Stream!"),
            PathBuf::from("/rec/foo_20240101_Cool Stream.ts")
        );
        assert_eq!(
            allocator.final_path(" ?! "),
            PathBuf::from("/rec/foo_20240101_title-error.ts")
        );
    }

    #[test]
    fn test_segments_are_sanitized() {
        let allocator = FilePathAllocator::new("/rec", "fo|o", "2024-01-01 12:30");
        assert_eq!(
            allocator.provisional_path(),
            PathBuf::from("/rec/foo_2024-01-01 1230.ts")
        );
    }

    #[test]
    fn test_collision_candidates() {
        let allocator = FilePathAllocator::new("/rec/", "foo", "20240101");
        assert_eq!(
            allocator.candidate(Some("t"), 1, "12-00-00"),
            PathBuf::from("/rec/foo_20240101_t_12-00-00.ts")
        );
        assert_eq!(
            allocator.candidate(Some("t"), 3, "12-00-00"),
            PathBuf::from("/rec/foo_20240101_t_12-00-00_2.ts")
        );
    }

    #[tokio::test]
    async fn test_create_provisional_never_reuses_a_path() {
        let dir = TempDir::new().unwrap();
        let allocator = allocator(&dir);

        let (first, _f1) = allocator.create_provisional().await.unwrap();
        let (second, _f2) = allocator.create_provisional().await.unwrap();
        let (third, _f3) = allocator.create_provisional().await.unwrap();

        assert_eq!(first, allocator.provisional_path());
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert!(first.exists() && second.exists() && third.exists());
    }

    #[tokio::test]
    async fn test_finalize_moves_the_file() {
        let dir = TempDir::new().unwrap();
        let allocator = allocator(&dir);

        let (provisional, mut file) = allocator.create_provisional().await.unwrap();
        file.write_all(b"before rename").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let final_path = allocator.finalize(&provisional, "Cool: Stream!").await.unwrap();

        assert_eq!(final_path, allocator.final_path("Cool: Stream!"));
        assert!(!provisional.exists());
        assert_eq!(std::fs::read(&final_path).unwrap(), b"before rename");
    }

    #[tokio::test]
    async fn test_finalize_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let allocator = allocator(&dir);

        let occupied = allocator.final_path("Cool Stream");
        std::fs::write(&occupied, b"older recording").unwrap();
        let stamped = allocator.candidate(Some("Cool Stream"), 1, &collision_stamp());
        std::fs::write(&stamped, b"another older recording").unwrap();

        let (provisional, file) = allocator.create_provisional().await.unwrap();
        drop(file);
        std::fs::write(&provisional, b"new").unwrap();

        let final_path = allocator.finalize(&provisional, "Cool Stream").await.unwrap();

        assert_ne!(final_path, occupied);
        assert_ne!(final_path, stamped);
        assert_eq!(std::fs::read(&occupied).unwrap(), b"older recording");
        assert_eq!(std::fs::read(&stamped).unwrap(), b"another older recording");
        assert_eq!(std::fs::read(&final_path).unwrap(), b"new");
        assert!(!provisional.exists());
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let allocator = allocator(&dir);

        let (provisional, file) = allocator.create_provisional().await.unwrap();
        drop(file);

        let first = allocator.finalize(&provisional, "title").await.unwrap();
        let second = allocator.finalize(&first, "title").await.unwrap();
        assert_eq!(first, second);
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_finalize_keeps_collision_name() {
        let dir = TempDir::new().unwrap();
        let allocator = allocator(&dir);
        std::fs::write(allocator.final_path("t"), b"older recording").unwrap();

        let (provisional, file) = allocator.create_provisional().await.unwrap();
        drop(file);
        let first = allocator.finalize(&provisional, "t").await.unwrap();
        assert_ne!(first, allocator.final_path("t"));

        // A later stamp must not move an already final file again.
        let stamped_later = allocator.candidate(Some("t"), 1, "23-59-59");
        assert_ne!(first, stamped_later);
        let second = allocator.finalize(&first, "t").await.unwrap();
        assert_eq!(first, second);
        assert!(second.exists());
        assert_eq!(ts_count(&dir), 2);
    }

    #[test]
    fn test_collision_variants_are_final() {
        let allocator = FilePathAllocator::new("/rec/", "foo", "20240101");
        assert!(allocator.is_final_for(&allocator.final_path("t"), "t"));
        assert!(allocator.is_final_for(&allocator.candidate(Some("t"), 1, "12-00-00"), "t"));
        assert!(allocator.is_final_for(&allocator.candidate(Some("t"), 4, "12-00-00"), "t"));
        assert!(!allocator.is_final_for(&allocator.provisional_path(), "t"));
        assert!(!allocator.is_final_for(&allocator.final_path("t_x"), "t"));
        assert!(!allocator.is_final_for(&allocator.final_path("other"), "t"));
        assert!(!allocator.is_final_for(Path::new("/elsewhere/foo_20240101_t.ts"), "t"));
    }

    #[tokio::test]
    async fn test_unlink_rollback_tolerates_missing_link() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link.ts");
        std::fs::write(&link, b"x").unwrap();

        unlink_rollback(&link).await;
        assert!(!link.exists());
        // Already gone: logged, not propagated.
        unlink_rollback(&link).await;
    }

    #[tokio::test]
    async fn test_finalize_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let allocator = allocator(&dir);

        let missing = allocator.provisional_path();
        let err = allocator.finalize(&missing, "title").await.unwrap_err();
        assert!(err.to_string().contains("renaming"));
    }
}
