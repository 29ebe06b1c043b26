//! Rendering of a single plan entry.
//!
//! ```text
//! source.md ──► process_with_frontmatter_transform ──► body_html (page-scoped)
//!                 │ id forced, H1 promoted
//!                 ▼
//!            composed source ──► process (links rooted at entry dir) ──► aggregate_html
//!                 │
//!                 └─► written back to source.md when it changed
//! ```
//!
//! The result is a [`RenderedSnapshot`], serialized to
//! `<work>/rendered/{index}.json` by [`write_snapshot`]. Snapshots are the
//! only channel between render workers and the aggregator.

use crate::config::{DiagramConfig, HighlightConfig, RenderConfig};
use crate::fetch::Fetcher;
use crate::frontmatter::{self, Frontmatter, ID_KEY, TITLE_KEY};
use crate::links::LinkRewrite;
use crate::naming;
use crate::plan::PlanEntry;
use crate::processor::{ContentProcessor, ProcessError, ProcessOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory below the work dir holding one JSON file per entry.
pub const RENDERED_DIR: &str = "rendered";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to process {relative_path}: {source}")]
    Process {
        relative_path: String,
        source: ProcessError,
    },
    #[error("Failed to update {path}: {source}")]
    WriteBack {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything a processor needs, resolved for one build.
///
/// Cloned into every execution unit.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Absolute cache directory.
    pub cache_dir: PathBuf,
    pub user_agent: String,
    pub highlight: HighlightConfig,
    pub diagrams: DiagramConfig,
    pub link_target: Option<String>,
    pub fetcher: Fetcher,
}

impl RenderOptions {
    /// Resolve config against the content root. Uses the default fetcher.
    pub fn from_config(config: &RenderConfig, content_root: &Path) -> Self {
        let cache_dir = if config.cache_dir.is_absolute() {
            config.cache_dir.clone()
        } else {
            content_root.join(&config.cache_dir)
        };
        Self {
            cache_dir,
            user_agent: config.user_agent.clone(),
            highlight: config.highlight.clone(),
            diagrams: config.diagrams.clone(),
            link_target: config.link_target.clone(),
            fetcher: Fetcher::Default,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    #[cfg(test)]
    pub(crate) fn for_tests(dir: &Path) -> Self {
        Self::from_config(&RenderConfig::default(), dir)
    }
}

/// Rendered output of one plan entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedSnapshot {
    pub index: usize,
    pub relative_path: String,
    pub directory: String,
    /// HTML for the entry's own page.
    pub body_html: String,
    /// HTML safe to embed at the output root.
    pub aggregate_html: String,
    pub frontmatter: Frontmatter,
    pub id_prefix: String,
}

impl RenderedSnapshot {
    pub fn id(&self) -> Option<u64> {
        self.frontmatter.get(ID_KEY).and_then(frontmatter::parse_id)
    }

    pub fn title(&self) -> Option<&str> {
        self.frontmatter
            .get(TITLE_KEY)
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    /// Output page path relative to the site root, POSIX separators.
    pub fn page_path(&self) -> String {
        crate::scan::to_posix(&naming::output_path(&self.relative_path))
    }
}

/// Render one entry with `processor`.
///
/// Rewrites the source file when the processor normalised it (id forced,
/// heading promoted). Returns the snapshot with the warnings the processor
/// raised on the page render.
pub fn render_entry(
    entry: &PlanEntry,
    content_root: &Path,
    processor: &dyn ContentProcessor,
    options: &RenderOptions,
) -> Result<(RenderedSnapshot, Vec<String>), RenderError> {
    let path = content_root.join(&entry.relative_path);
    let raw = fs::read_to_string(&path).map_err(|source| RenderError::Read {
        path: path.clone(),
        source,
    })?;
    let id_prefix = naming::id_prefix(&entry.relative_path);
    let process_err = |source| RenderError::Process {
        relative_path: entry.relative_path.clone(),
        source,
    };

    let page_opts = ProcessOptions {
        link_rewrite: None,
        promote_heading: true,
        force_id: Some(entry.assigned_id),
        highlight: options.highlight.clone(),
    };
    let transformed = processor
        .process_with_frontmatter_transform(&raw, &id_prefix, &page_opts)
        .map_err(process_err)?;

    let aggregate_opts = ProcessOptions {
        link_rewrite: Some(LinkRewrite::new(entry.directory.as_str())),
        promote_heading: false,
        force_id: None,
        highlight: options.highlight.clone(),
    };
    let aggregate = processor
        .process(&transformed.composed_source, &id_prefix, &aggregate_opts)
        .map_err(process_err)?;

    if transformed.changed {
        replace_source(&path, &transformed.composed_source).map_err(|source| {
            RenderError::WriteBack {
                path: path.clone(),
                source,
            }
        })?;
        tracing::debug!(path = %entry.relative_path, id = entry.assigned_id, "Updated source frontmatter");
    }

    let snapshot = RenderedSnapshot {
        index: entry.index,
        relative_path: entry.relative_path.clone(),
        directory: entry.directory.clone(),
        body_html: transformed.html,
        aggregate_html: aggregate.html,
        frontmatter: transformed.frontmatter,
        id_prefix: transformed.id_prefix,
    };
    Ok((snapshot, transformed.warnings))
}

/// Swap `contents` in for the file at `path` through a hidden sibling temp
/// file, so an interrupted write never truncates the document. The file's
/// permissions carry over.
fn replace_source(path: &Path, contents: &str) -> std::io::Result<()> {
    let permissions = fs::metadata(path)?.permissions();
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Path of the snapshot for plan index `index`.
pub fn snapshot_path(work_dir: &Path, index: usize) -> PathBuf {
    work_dir.join(RENDERED_DIR).join(format!("{index}.json"))
}

/// Serialize `snapshot` to `<work_dir>/rendered/{index}.json`.
///
/// `work_dir` must exist. It is never recreated, so a worker that outlives
/// a discarded staging area fails instead of resurrecting it.
pub fn write_snapshot(work_dir: &Path, snapshot: &RenderedSnapshot) -> Result<PathBuf, RenderError> {
    let path = snapshot_path(work_dir, snapshot.index);
    let json = serde_json::to_vec(snapshot)?;
    let write = || -> std::io::Result<()> {
        match fs::create_dir(work_dir.join(RENDERED_DIR)) {
            Err(e) if e.kind() != std::io::ErrorKind::AlreadyExists => return Err(e),
            _ => {}
        }
        fs::write(&path, &json)
    };
    write().map_err(|source| RenderError::Snapshot {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
