//! Atomic publication of a staged build.
//!
//! A build never writes into the output directory. Everything lands in a
//! staging directory created beside it, and only a complete build is swapped
//! into place:
//!
//! ```text
//! site/                            (previous output, untouched during the build)
//! .site-staging-Xa81c/             (this build)
//! ├── .stagepress/                 private work dir: plan.json, rendered/*.json
//! ├── index.html
//! └── posts/…
//!
//! publish:  site/  ──rename──► site.bak-1718000000000/
//!           .site-staging-Xa81c/ ──rename──► site/
//!           site.bak-1718000000000/  removed
//! ```
//!
//! Both renames stay within one parent directory, so each is atomic on the
//! same filesystem. If the second rename fails the backup is renamed back and
//! the original error is returned; the previous output is never lost.
//!
//! Filesystem calls go through [`FsOps`] so the rollback path can be
//! exercised with injected faults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Name of the private work directory inside the staging area.
pub const WORK_DIR_NAME: &str = ".stagepress";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Output path has no directory name: {0}")]
    InvalidTarget(PathBuf),
    #[error("Failed to create staging directory for {path}: {source}")]
    Staging { path: PathBuf, source: io::Error },
    #[error("Failed to remove work directory {path}: {source}")]
    Cleanup { path: PathBuf, source: io::Error },
    #[error("Failed to move {path} aside to {backup}: {source}")]
    Backup {
        path: PathBuf,
        backup: PathBuf,
        source: io::Error,
    },
    #[error("Failed to move {staging} into place at {path}: {source}")]
    Swap {
        staging: PathBuf,
        path: PathBuf,
        source: io::Error,
    },
}

/// The filesystem operations the publish step performs.
pub trait FsOps {
    fn exists(&self, path: &Path) -> bool;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`FsOps`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl FsOps for StdFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }
}

/// Work directory inside a staging directory.
pub fn work_dir(staging_dir: &Path) -> PathBuf {
    staging_dir.join(WORK_DIR_NAME)
}

fn dir_name(path: &Path) -> Result<String, PublishError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PublishError::InvalidTarget(path.to_path_buf()))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// An ephemeral build directory beside the final output directory.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
}

impl StagingArea {
    /// Create a uniquely named staging directory next to `final_dir`,
    /// with its work directory.
    pub fn create(final_dir: &Path) -> Result<Self, PublishError> {
        let name = dir_name(final_dir)?;
        let parent = parent_dir(final_dir);
        let staging_err = |source| PublishError::Staging {
            path: final_dir.to_path_buf(),
            source,
        };

        fs::create_dir_all(parent).map_err(staging_err)?;
        let path = tempfile::Builder::new()
            .prefix(&format!(".{name}-staging-"))
            .tempdir_in(parent)
            .map_err(staging_err)?
            .keep();

        // Temp dirs are created owner-only; the published tree should not be.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).map_err(staging_err)?;
        }

        fs::create_dir_all(work_dir(&path)).map_err(staging_err)?;
        tracing::debug!(path = %path.display(), "Created staging directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn work_dir(&self) -> PathBuf {
        work_dir(&self.path)
    }

    /// Whether any render snapshot has been written yet.
    pub fn has_snapshots(&self) -> bool {
        fs::read_dir(self.work_dir().join(crate::render::RENDERED_DIR))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Delete the staging directory.
    pub fn discard(self) -> io::Result<()> {
        tracing::debug!(path = %self.path.display(), "Discarding staging directory");
        fs::remove_dir_all(&self.path)
    }

    /// Keep the staging directory on disk and return its path.
    pub fn retain(self) -> PathBuf {
        self.path
    }
}

/// Unique backup path `<final>.bak-<unix-millis>[-n]` beside `final_dir`.
pub fn backup_path(ops: &dyn FsOps, final_dir: &Path) -> Result<PathBuf, PublishError> {
    let name = dir_name(final_dir)?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let base = format!("{name}.bak-{millis}");
    let mut candidate = final_dir.with_file_name(&base);
    let mut n = 1;
    while ops.exists(&candidate) {
        candidate = final_dir.with_file_name(format!("{base}-{n}"));
        n += 1;
    }
    Ok(candidate)
}

/// Swap `staging_dir` into place at `final_dir`.
pub fn publish_staged(staging_dir: &Path, final_dir: &Path) -> Result<(), PublishError> {
    publish_staged_with(&StdFs, staging_dir, final_dir)
}

/// [`publish_staged`] over an arbitrary [`FsOps`].
pub fn publish_staged_with(
    ops: &dyn FsOps,
    staging_dir: &Path,
    final_dir: &Path,
) -> Result<(), PublishError> {
    let work = work_dir(staging_dir);
    if ops.exists(&work) {
        ops.remove_dir_all(&work)
            .map_err(|source| PublishError::Cleanup { path: work, source })?;
    }

    let backup = if ops.exists(final_dir) {
        let backup = backup_path(ops, final_dir)?;
        ops.rename(final_dir, &backup)
            .map_err(|source| PublishError::Backup {
                path: final_dir.to_path_buf(),
                backup: backup.clone(),
                source,
            })?;
        Some(backup)
    } else {
        None
    };

    if let Err(source) = ops.rename(staging_dir, final_dir) {
        if let Some(backup) = &backup
            && let Err(restore) = ops.rename(backup, final_dir)
        {
            tracing::error!(
                backup = %backup.display(),
                path = %final_dir.display(),
                error = %restore,
                "Failed to restore previous output; it remains at the backup path"
            );
        }
        return Err(PublishError::Swap {
            staging: staging_dir.to_path_buf(),
            path: final_dir.to_path_buf(),
            source,
        });
    }

    if let Some(backup) = backup
        && let Err(e) = ops.remove_dir_all(&backup)
    {
        tracing::warn!(backup = %backup.display(), error = %e, "Failed to remove previous output backup");
    }

    tracing::info!(path = %final_dir.display(), "Published output");
    Ok(())
}
