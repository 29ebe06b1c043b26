//! Reassembly of rendered snapshots in plan order.
//!
//! Workers finish in any order; the plan index is the only thing that ties a
//! snapshot file back to its entry. Every entry must have exactly one valid
//! snapshot, otherwise the build is aborted.

use crate::plan::RenderPlan;
use crate::render::{RenderedSnapshot, snapshot_path};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Missing render snapshot for {relative_path}: {source}")]
    Missing {
        relative_path: String,
        source: std::io::Error,
    },
    #[error("Corrupt render snapshot for {relative_path}: {reason}")]
    Corrupt {
        relative_path: String,
        reason: String,
    },
}

impl SnapshotError {
    pub fn relative_path(&self) -> &str {
        match self {
            Self::Missing { relative_path, .. } | Self::Corrupt { relative_path, .. } => {
                relative_path
            }
        }
    }
}

/// Load every snapshot for `plan` from `work_dir`, ordered by index.
pub fn load_snapshots(
    plan: &RenderPlan,
    work_dir: &Path,
) -> Result<Vec<RenderedSnapshot>, SnapshotError> {
    let mut entries: Vec<_> = plan.entries.iter().collect();
    entries.sort_by_key(|e| e.index);

    let mut snapshots = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = snapshot_path(work_dir, entry.index);
        let bytes = fs::read(&path).map_err(|source| SnapshotError::Missing {
            relative_path: entry.relative_path.clone(),
            source,
        })?;
        let snapshot: RenderedSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Corrupt {
                relative_path: entry.relative_path.clone(),
                reason: e.to_string(),
            })?;
        if snapshot.index != entry.index {
            return Err(SnapshotError::Corrupt {
                relative_path: entry.relative_path.clone(),
                reason: format!(
                    "stored index {} does not match plan index {}",
                    snapshot.index, entry.index
                ),
            });
        }
        snapshots.push(snapshot);
    }
    tracing::debug!(count = snapshots.len(), "Loaded render snapshots");
    Ok(snapshots)
}
