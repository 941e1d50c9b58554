//! Per-register pass lock.
//!
//! At most one reconciliation pass may run at a time for a given cash
//! register. The lock is keyed by the register's credential identity and
//! backed by an exclusive advisory `flock(2)`, so concurrent invocations
//! for the same register serialize while different registers run unimpeded.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

const UNSAFE_CHARS: &str = "&;|*?'\"`[]()$<>{}^#\\/%!";

/// Builds a deterministic, filesystem-safe lock key for one credential set.
///
/// A component containing characters unsafe for a path segment is replaced
/// by the SHA-256 hex digest of the component, keeping the key stable per
/// credential set without embedding untrusted path characters.
pub fn lock_key(username: &str, url: &str, retail_point_id: &str) -> String {
    format!(
        "{}_{}_{}",
        sanitize(username),
        sanitize(url),
        sanitize(retail_point_id)
    )
}

fn sanitize(component: &str) -> String {
    if component.chars().any(|c| UNSAFE_CHARS.contains(c)) {
        hex::encode(Sha256::digest(component.as_bytes()))
    } else {
        component.to_string()
    }
}

/// Exclusive lock held for the duration of one reconciliation pass.
///
/// Acquisition blocks until a concurrent holder releases. The lock is
/// released on `Drop`, so every exit path including panics releases it.
pub struct PassLock {
    file: File,
    path: PathBuf,
}

impl PassLock {
    pub fn acquire(dir: &Path, key: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{key}.lock"));
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        flock_exclusive(&file)?;
        tracing::debug!(path = %path.display(), "pass lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        // SAFETY: the fd is owned by `self.file` and stays open for the call.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        tracing::debug!(path = %self.path.display(), "pass lock released");
    }
}

fn flock_exclusive(file: &File) -> io::Result<()> {
    // SAFETY: valid owned fd; LOCK_EX blocks until the lock is granted.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
