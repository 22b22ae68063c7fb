//! Best-effort cross-process lock for the cache file.
//!
//! Cooperating client processes serialize their read-reconcile-replace
//! sequences through an exclusive lock on a sibling `<cache>.lock` file. The
//! lock is advisory in both senses: non-cooperating readers (backup tools)
//! are protected by the atomic rename in the codec instead, and a lock that
//! cannot be acquired within the timeout is broken rather than honoured:
//! losing an uncoordinated race is strictly better than skipping a sync
//! because an earlier process died holding the lock.

use fs2::FileExt;
use log::warn;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How long to sleep between lock attempts while waiting.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Holds the cache lock for the lifetime of the guard.
///
/// Acquisition never fails: on timeout, or on any error from the underlying
/// primitive, the guard is returned unlocked and the stale lock file is
/// removed so the next process does not inherit the stuck state.
#[derive(Debug)]
pub struct AdvisoryFileLock {
    file: Option<File>,
    lock_path: PathBuf,
}

impl AdvisoryFileLock {
    /// Acquire the lock guarding `cache_path`, waiting up to `timeout`.
    pub fn acquire(cache_path: &Path, timeout: Duration) -> Self {
        let lock_path = lock_path_for(cache_path);

        let file = match open_lock_file(&lock_path) {
            Ok(file) => file,
            Err(error) => {
                warn!(
                    "could not open lock file {}: {error}; continuing without lock",
                    lock_path.display()
                );
                return Self { file: None, lock_path };
            }
        };

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Self {
                        file: Some(file),
                        lock_path,
                    };
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(error) => {
                    warn!(
                        "locking {} failed: {error}; continuing without lock",
                        lock_path.display()
                    );
                    break;
                }
            }
        }

        // There shouldn't be congestion for this lock; failing to get it
        // usually means a holder was killed before it could release. Break
        // the stale lock so the next process starts clean.
        warn!(
            "could not lock {} within {:?}; breaking stale lock and continuing",
            lock_path.display(),
            timeout
        );
        let _ = fs::remove_file(&lock_path);
        Self { file: None, lock_path }
    }

    /// Whether the underlying lock is actually held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for AdvisoryFileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(error) = fs2::FileExt::unlock(&file) {
                warn!("failed to release {}: {error}", self.lock_path.display());
            }
        }
    }
}

/// Lock-file path derived from the canonicalised cache path, so processes
/// that spell the cache path differently still contend on one lock.
fn lock_path_for(cache_path: &Path) -> PathBuf {
    let resolved = canonicalish(cache_path);
    let mut file_name = resolved.file_name().unwrap_or_default().to_os_string();
    file_name.push(".lock");
    resolved.with_file_name(file_name)
}

/// Canonicalise as far as the filesystem allows. The cache file itself may
/// not exist yet (first run), in which case the parent is resolved instead.
fn canonicalish(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(file_name)) => match parent.canonicalize() {
            Ok(resolved_parent) => resolved_parent.join(file_name),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("objects.cache");

        let guard = AdvisoryFileLock::acquire(&cache, Duration::from_secs(1));
        assert!(guard.is_held());
        drop(guard);

        // Released: a second acquisition succeeds immediately.
        let guard = AdvisoryFileLock::acquire(&cache, Duration::from_secs(1));
        assert!(guard.is_held());
    }

    #[test]
    fn test_same_cache_different_spelling_share_a_lock() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("objects.cache");
        let spelled_differently = dir.path().join("sub").join("..").join("objects.cache");
        fs::create_dir(dir.path().join("sub")).unwrap();

        assert_eq!(lock_path_for(&cache), lock_path_for(&spelled_differently));
    }

    #[test]
    fn test_contention_breaks_stale_lock_and_proceeds() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("objects.cache");

        let holder = AdvisoryFileLock::acquire(&cache, Duration::from_secs(1));
        assert!(holder.is_held());

        // Same process re-locking through a second handle blocks, times out,
        // and proceeds anyway.
        let second = AdvisoryFileLock::acquire(&cache, Duration::from_millis(300));
        assert!(!second.is_held());
    }
}
