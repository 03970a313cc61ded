//! Temporary file allocation.
//!
//! Every decode session takes a process-unique session number; each file it
//! admits gets the next value of the session's own counter. Paths look like
//! `<dir>/multipart.<pid>-<session>-<counter>.tmp`.

use crate::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

/// Session numbers wrap at 2^53 - 1.
pub const MAX_SESSION_NUMBER: u64 = (1 << 53) - 1;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

fn successor(n: u64) -> u64 {
    (n + 1) % MAX_SESSION_NUMBER
}

fn next_session_number() -> u64 {
    // The closure never returns None, so both arms carry the previous value.
    match NEXT_SESSION.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(successor(n))) {
        Ok(n) | Err(n) => n,
    }
}

/// Allocates temp files under one directory.
#[derive(Clone, Debug)]
pub struct TempFileStore {
    dir: PathBuf,
}

impl TempFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the OS temp directory.
    pub fn system() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start a new decode session.
    pub fn session(&self) -> TempSession {
        TempSession {
            dir: self.dir.clone(),
            pid: std::process::id(),
            number: next_session_number(),
            counter: 0,
        }
    }

    /// Verify the directory exists and is writable.
    pub async fn health_check(&self) -> StorageResult<()> {
        let meta = fs::metadata(&self.dir).await?;
        if !meta.is_dir() {
            return Err(StorageError::Config(format!(
                "temp dir {} is not a directory",
                self.dir.display()
            )));
        }
        if meta.permissions().readonly() {
            return Err(StorageError::Config(format!(
                "temp dir {} is read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }
}

impl Default for TempFileStore {
    fn default() -> Self {
        Self::system()
    }
}

/// Per-session path allocator.
#[derive(Debug)]
pub struct TempSession {
    dir: PathBuf,
    pid: u32,
    number: u64,
    counter: u64,
}

impl TempSession {
    /// The process-unique session number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Reserve the next path of this session.
    pub fn next_path(&mut self) -> TempFileGuard {
        let name = format!("multipart.{}-{}-{}.tmp", self.pid, self.number, self.counter);
        self.counter += 1;
        TempFileGuard::new(self.dir.join(name))
    }

    /// Reserve the next path and create the file there.
    ///
    /// The guard is returned even when creation fails so the path is still
    /// released through the usual route.
    pub fn create_file(&mut self) -> (TempFileGuard, std::io::Result<std::fs::File>) {
        let guard = self.next_path();
        let file = std::fs::File::create(guard.path());
        (guard, file)
    }
}

/// Owns one temp path and unlinks it exactly once.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlink the file now. Deletion errors are swallowed.
    pub async fn remove(mut self) {
        self.armed = false;
        if let Err(e) = fs::remove_file(&self.path).await {
            debug!(path = %self.path.display(), error = %e, "temp file already gone");
        }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
