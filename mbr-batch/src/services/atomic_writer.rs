//! Atomic placement of finished artifacts
//!
//! The artifact is copied into a hidden `.partial` sibling of the target and
//! only then made visible under the target name, so readers observe either
//! nothing or the complete file.
//!
//! `commit` never clobbers: the staging file is hard-linked to the target,
//! which fails if another unit got there first. `replace` renames over the
//! target. Where hard links or same-device renames are unavailable both fall
//! back to a plain copy, which is not atomic.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::Disks;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CommitError;

/// Free-space oracle for the commit preflight
pub trait SpaceProbe: Send + Sync {
    /// Bytes available on the filesystem holding `path`; `None` if unknown
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Queries mounted disks through sysinfo
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoSpaceProbe;

impl SpaceProbe for SysinfoSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        let path = path.canonicalize().ok()?;
        let disks = Disks::new_with_refreshed_list();

        // Longest mount point containing the path
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
    /// False when the cross-device fallback was used
    pub atomic: bool,
}

#[derive(Clone)]
pub struct AtomicWriter {
    space: Arc<dyn SpaceProbe>,
}

impl Default for AtomicWriter {
    fn default() -> Self {
        Self::new(Arc::new(SysinfoSpaceProbe))
    }
}

impl AtomicWriter {
    pub fn new(space: Arc<dyn SpaceProbe>) -> Self {
        Self { space }
    }

    /// Place `source` at `target` unless something already exists there
    ///
    /// Fails with `CommitError::TargetExists` when `target` is taken, even
    /// if it appeared after the caller last checked. Parent directories are
    /// created as needed. `source` is left in place; its owner releases it.
    pub async fn commit(&self, source: &Path, target: &Path) -> Result<CommitOutcome, CommitError> {
        self.place(source, target, Placement::NoClobber).await
    }

    /// Place `source` at `target`, replacing any existing file
    pub async fn replace(&self, source: &Path, target: &Path) -> Result<CommitOutcome, CommitError> {
        self.place(source, target, Placement::Replace).await
    }

    async fn place(
        &self,
        source: &Path,
        target: &Path,
        placement: Placement,
    ) -> Result<CommitOutcome, CommitError> {
        let started = Instant::now();

        let bytes = tokio::fs::metadata(source)
            .await
            .map_err(|e| CommitError::io(source, e))?
            .len();

        let target_dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        self.check_space(&target_dir, bytes).await?;

        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| CommitError::io(&target_dir, e))?;

        let staging = staging_path(&target_dir, target);
        if let Err(e) = write_staging(source, &staging).await {
            remove_if_present(&staging).await;
            return Err(CommitError::io(&staging, e));
        }

        let placed = match placement {
            Placement::NoClobber => link_into_place(&staging, target).await,
            Placement::Replace => rename_into_place(&staging, target).await,
        };
        remove_if_present(&staging).await;
        let atomic = placed?;

        let elapsed = started.elapsed();
        debug!(
            target = %target.display(),
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            atomic,
            replace = matches!(placement, Placement::Replace),
            "Committed artifact"
        );

        Ok(CommitOutcome {
            path: target.to_path_buf(),
            bytes,
            elapsed,
            atomic,
        })
    }

    async fn check_space(&self, target_dir: &Path, required: u64) -> Result<(), CommitError> {
        let probe_dir = nearest_existing_ancestor(target_dir);
        let space = Arc::clone(&self.space);
        let probe_for_task = probe_dir.clone();

        let available = tokio::task::spawn_blocking(move || space.available_bytes(&probe_for_task))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Space probe task failed");
                None
            });

        match available {
            Some(available) if available < required => Err(CommitError::InsufficientSpace {
                path: probe_dir,
                required,
                available,
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Placement {
    NoClobber,
    Replace,
}

/// Hard-link `staging` to `target`; returns whether the placement was atomic
async fn link_into_place(staging: &Path, target: &Path) -> Result<bool, CommitError> {
    match tokio::fs::hard_link(staging, target).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(CommitError::TargetExists {
            path: target.to_path_buf(),
        }),
        Err(e) if links_unsupported(&e) => {
            warn!(
                target = %target.display(),
                error = %e,
                "Hard link unavailable, falling back to exclusive copy"
            );
            copy_exclusive(staging, target).await?;
            Ok(false)
        }
        Err(e) => Err(CommitError::io(target, e)),
    }
}

/// Rename `staging` over `target`; returns whether the placement was atomic
async fn rename_into_place(staging: &Path, target: &Path) -> Result<bool, CommitError> {
    match tokio::fs::rename(staging, target).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            warn!(
                target = %target.display(),
                "Rename crossed devices, falling back to copy"
            );
            tokio::fs::copy(staging, target)
                .await
                .map_err(|e| CommitError::io(target, e))?;
            Ok(false)
        }
        Err(e) => Err(CommitError::io(target, e)),
    }
}

// FAT-style filesystems report EPERM for link(2)
fn links_unsupported(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Unsupported | io::ErrorKind::CrossesDevices | io::ErrorKind::PermissionDenied
    )
}

/// Copy `staging` to a target that must not exist yet
async fn copy_exclusive(staging: &Path, target: &Path) -> Result<(), CommitError> {
    let mut output = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(CommitError::TargetExists {
                path: target.to_path_buf(),
            })
        }
        Err(e) => return Err(CommitError::io(target, e)),
    };

    let copied = async {
        let mut input = tokio::fs::File::open(staging).await?;
        tokio::io::copy(&mut input, &mut output).await?;
        output.sync_all().await
    }
    .await;

    if let Err(e) = copied {
        remove_if_present(target).await;
        return Err(CommitError::io(target, e));
    }
    Ok(())
}

fn staging_path(target_dir: &Path, target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    target_dir.join(format!(".{}.{}.partial", name, Uuid::new_v4().simple()))
}

async fn write_staging(source: &Path, staging: &Path) -> io::Result<()> {
    tokio::fs::copy(source, staging).await?;
    let file = tokio::fs::OpenOptions::new().write(true).open(staging).await?;
    file.sync_all().await
}

fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging file"),
    }
}
