//! Size-based rotation for the daemon's log files.
//!
//! `taskbridge.log` and `taskbridge-err.log` rotate past 10 MiB, keeping at
//! most 5 numbered copies: `taskbridge.log` → `.1` → … → `.5`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated backup files to keep.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if its size exceeds `max_bytes`.
///
/// Returns `true` if rotation occurred; a missing file is not an error and
/// returns `false`.
pub fn rotate_if_oversized(log_path: &Path, max_bytes: u64, keep: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    // Drop the oldest copy, shift the rest up by one, then move the live
    // file to `.1` and recreate it so the daemon always has a writable path.
    let oldest = numbered_path(log_path, keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..keep).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)?;

    Ok(true)
}

/// Rotate both daemon log files under `home`.
///
/// Errors for one file are logged and do not block the other; rotation must
/// never crash the daemon.
pub fn rotate_daemon_logs(home: &Path) {
    for log_path in [
        crate::paths::stdout_log_path(home),
        crate::paths::stderr_log_path(home),
    ] {
        match rotate_if_oversized(&log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(crate::paths::DAEMON_STDOUT_LOG);
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn filled_log(dir: &TempDir, name: &str, size: usize) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, vec![b'x'; size]).unwrap();
        path
    }

    #[test]
    fn small_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = filled_log(&dir, "taskbridge.log", 512);
        assert!(!rotate_if_oversized(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_file_rotates_to_dot_one() {
        let dir = TempDir::new().unwrap();
        let log = filled_log(&dir, "taskbridge.log", MAX_LOG_BYTES as usize + 1);
        assert!(rotate_if_oversized(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0, "fresh live log");
        assert!(numbered_path(&log, 1).exists());
    }

    #[test]
    fn backups_are_capped_at_keep_count() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("taskbridge.log");
        for n in 1..=MAX_ROTATED_FILES {
            fs::write(numbered_path(&log, n), format!("old-{n}")).unwrap();
        }
        filled_log(&dir, "taskbridge.log", MAX_LOG_BYTES as usize + 1);

        assert!(rotate_if_oversized(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
        assert!(numbered_path(&log, MAX_ROTATED_FILES).exists());
        assert!(!numbered_path(&log, MAX_ROTATED_FILES + 1).exists());
    }

    #[test]
    fn missing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("absent.log");
        assert!(!rotate_if_oversized(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
    }
}
