//! Render plan construction.
//!
//! The plan decides which documents get rendered and which numeric id each
//! one carries. Ids are stable across builds: the only inputs are the
//! sorted relative paths and the ids documents already declare.
//!
//! ## Assignment
//!
//! ```text
//! sort units by POSIX relative path
//! pass 1  drafts with a valid id      → claim id (no entry)
//! pass 2  non-drafts with a valid id  → take id if unclaimed, else mark duplicate
//! pass 3  everything still unassigned → max_claimed + 1, in sorted order
//! ```
//!
//! Drafts claim their id so that publishing a draft later never collides with
//! an id handed out in the meantime. Duplicates are not errors; the renderer
//! writes the reassigned id back into the source file.
//!
//! ## Persistence
//!
//! The plan is written to `<work>/plan.json` so execution units can load it
//! without sharing the coordinator's memory.

use crate::frontmatter::{self, UnitMeta};
use crate::scan::{ContentUnit, to_posix};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version of the serialized plan format.
pub const PLAN_VERSION: u32 = 1;

/// File name of the serialized plan inside the work directory.
pub const PLAN_FILENAME: &str = "plan.json";

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No identifier left to assign to {0}")]
    IdSpaceExhausted(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported plan version {0} (expected {PLAN_VERSION})")]
    Version(u32),
}

/// Scheduling record for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Position in the plan; the snapshot correlation key.
    pub index: usize,
    pub relative_path: String,
    pub directory: String,
    pub assigned_id: u64,
    /// Valid id declared by the document, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<u64>,
    /// The declared id was valid but already claimed.
    #[serde(default)]
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPlan {
    pub version: u32,
    pub content_root: PathBuf,
    pub entries: Vec<PlanEntry>,
}

impl RenderPlan {
    /// Entries whose declared id was reassigned.
    pub fn duplicates(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.is_duplicate)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A unit paired with what the plan needs to know about it.
struct Candidate<'a> {
    unit: &'a ContentUnit,
    sort_key: String,
    meta: UnitMeta,
    assigned: Option<u64>,
    duplicate: bool,
}

/// Tracks claimed ids and the running maximum.
#[derive(Default)]
struct IdClaims {
    claimed: HashSet<u64>,
    max: Option<u64>,
}

impl IdClaims {
    /// Claim `id`; returns `false` if it was already taken.
    fn claim(&mut self, id: u64) -> bool {
        if !self.claimed.insert(id) {
            return false;
        }
        self.max = Some(self.max.map_or(id, |m| m.max(id)));
        true
    }

    /// Next never-used id above every claim.
    fn next_fresh(&mut self) -> Option<u64> {
        let next = match self.max {
            Some(m) => m.checked_add(1)?,
            None => 0,
        };
        self.claimed.insert(next);
        self.max = Some(next);
        Some(next)
    }
}

/// Build the render plan for `units`.
///
/// Each unit's frontmatter is read to find its declared id and draft flag.
/// Unparseable frontmatter counts as "no id, not a draft".
pub fn build_render_plan(
    units: &[ContentUnit],
    content_root: &Path,
) -> Result<RenderPlan, PlanError> {
    let mut metas = Vec::with_capacity(units.len());
    for unit in units {
        let source = fs::read_to_string(&unit.path).map_err(|source| PlanError::Read {
            path: unit.path.clone(),
            source,
        })?;
        let meta = frontmatter::read_meta(&source).unwrap_or_else(|e| {
            tracing::warn!(path = %unit.relative_path, error = %e, "Ignoring unreadable frontmatter");
            UnitMeta::default()
        });
        metas.push(meta);
    }
    plan_from_meta(units.iter().zip(metas), content_root)
}

/// Assign ids from already-extracted metadata.
pub fn plan_from_meta<'a>(
    units: impl IntoIterator<Item = (&'a ContentUnit, UnitMeta)>,
    content_root: &Path,
) -> Result<RenderPlan, PlanError> {
    let mut candidates: Vec<Candidate<'a>> = units
        .into_iter()
        .map(|(unit, meta)| Candidate {
            unit,
            sort_key: to_posix(Path::new(&unit.relative_path)),
            meta,
            assigned: None,
            duplicate: false,
        })
        .collect();
    candidates.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));

    let mut claims = IdClaims::default();

    // Drafts reserve their ids.
    for c in candidates.iter().filter(|c| c.meta.draft) {
        if let Some(id) = c.meta.declared_id {
            claims.claim(id);
        }
    }

    for c in candidates.iter_mut().filter(|c| !c.meta.draft) {
        if let Some(id) = c.meta.declared_id {
            if claims.claim(id) {
                c.assigned = Some(id);
            } else {
                c.duplicate = true;
            }
        }
    }

    for c in candidates.iter_mut().filter(|c| !c.meta.draft) {
        if c.assigned.is_none() {
            let id = claims
                .next_fresh()
                .ok_or_else(|| PlanError::IdSpaceExhausted(c.unit.relative_path.clone()))?;
            c.assigned = Some(id);
        }
    }

    let mut entries = Vec::with_capacity(candidates.len());
    for c in candidates.into_iter().filter(|c| !c.meta.draft) {
        let assigned_id = c
            .assigned
            .ok_or_else(|| PlanError::IdSpaceExhausted(c.unit.relative_path.clone()))?;
        entries.push(PlanEntry {
            index: entries.len(),
            relative_path: c.sort_key,
            directory: c.unit.directory.clone(),
            assigned_id,
            original_id: c.meta.declared_id,
            is_duplicate: c.duplicate,
        });
    }

    Ok(RenderPlan {
        version: PLAN_VERSION,
        content_root: content_root.to_path_buf(),
        entries,
    })
}

/// Serialize the plan to `<work_dir>/plan.json`.
pub fn write_plan(plan: &RenderPlan, work_dir: &Path) -> Result<PathBuf, PlanError> {
    fs::create_dir_all(work_dir)?;
    let path = work_dir.join(PLAN_FILENAME);
    fs::write(&path, serde_json::to_string_pretty(plan)?)?;
    Ok(path)
}

/// Load a plan written by [`write_plan`].
pub fn load_plan(work_dir: &Path) -> Result<RenderPlan, PlanError> {
    let content = fs::read_to_string(work_dir.join(PLAN_FILENAME))?;
    let plan: RenderPlan = serde_json::from_str(&content)?;
    if plan.version != PLAN_VERSION {
        return Err(PlanError::Version(plan.version));
    }
    Ok(plan)
}
