//! Scratch file lifecycle
//!
//! Every intermediate artifact lives in the work directory under a unique
//! name and is registered until released. Two RAII guards bound lifetimes:
//! [`TempScope`] for one pipeline attempt and [`TempFileGuard`] for a whole
//! batch run, so no exit path (error, cancellation, panic) leaks files.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;

struct Inner {
    work_dir: PathBuf,
    live: Mutex<HashSet<PathBuf>>,
}

/// Allocates and tracks uniquely named scratch files
#[derive(Clone)]
pub struct TempFileManager {
    inner: Arc<Inner>,
}

impl TempFileManager {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                work_dir: work_dir.into(),
                live: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.inner.work_dir
    }

    /// Reserve a fresh path `<tag>-<uuid>.<extension>` in the work directory
    ///
    /// The file itself is not created; the caller (usually an external
    /// program) writes it.
    pub fn allocate(&self, tag: &str, extension: &str) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.inner.work_dir)?;

        let tag: String = tag
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .take(16)
            .collect();
        let name = if tag.is_empty() {
            format!("{}.{}", Uuid::new_v4().simple(), extension)
        } else {
            format!("{}-{}.{}", tag, Uuid::new_v4().simple(), extension)
        };
        let path = self.inner.work_dir.join(name);

        self.live().insert(path.clone());
        Ok(path)
    }

    /// Delete one scratch file and forget it
    ///
    /// A missing file is not an error; other deletion failures are logged.
    pub fn release(&self, path: &Path) {
        self.live().remove(path);
        remove_quietly(path);
    }

    /// Delete every file still registered, returning how many were tracked
    pub fn release_all(&self) -> usize {
        let paths: Vec<PathBuf> = self.live().drain().collect();
        for path in &paths {
            remove_quietly(path);
        }
        if !paths.is_empty() {
            debug!(count = paths.len(), "Released leftover temp files");
        }
        paths.len()
    }

    pub fn live_count(&self) -> usize {
        self.live().len()
    }

    pub fn is_live(&self, path: &Path) -> bool {
        self.live().contains(path)
    }

    /// Attempt-scoped allocator; its files are released when it drops
    pub fn scope(&self) -> TempScope {
        TempScope {
            manager: self.clone(),
            owned: Vec::new(),
        }
    }

    /// Run-scoped guard; releases everything still registered when it drops
    pub fn guard(&self) -> TempFileGuard {
        TempFileGuard {
            manager: self.clone(),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        // A panicking holder cannot leave the set half-updated
        self.inner.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete temp file"),
    }
}

/// Scratch files owned by a single pipeline attempt
pub struct TempScope {
    manager: TempFileManager,
    owned: Vec<PathBuf>,
}

impl TempScope {
    pub fn allocate(&mut self, tag: &str, extension: &str) -> io::Result<PathBuf> {
        let path = self.manager.allocate(tag, extension)?;
        self.owned.push(path.clone());
        Ok(path)
    }

    /// Release a file early, before the scope ends
    pub fn release(&mut self, path: &Path) {
        self.owned.retain(|p| p != path);
        self.manager.release(path);
    }
}

impl Drop for TempScope {
    fn drop(&mut self) {
        for path in self.owned.drain(..) {
            self.manager.release(&path);
        }
    }
}

/// Batch-run guard sweeping all remaining scratch files on drop
pub struct TempFileGuard {
    manager: TempFileManager,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        self.manager.release_all();
    }
}
