//! End-to-end build.
//!
//! ```text
//! scan ─► plan ─► stage ──────────────────────────────────────► publish
//!           │      ├─ write plan.json
//!           │      ├─ dispatch render workers ─► rendered/*.json
//!           │      ├─ load snapshots (plan order)
//!           │      ├─ copy assets
//!           └──────┼─ commit metadata (prefetched in background)
//!                  └─ compose pages
//! ```
//!
//! ## Failure policy
//!
//! The previous output is never touched before the final swap. When a build
//! fails, the staging directory is deleted if no snapshot was written yet;
//! otherwise it is retained and its path logged for inspection.

use crate::compose::{ComposeError, HtmlComposer, SiteComposer};
use crate::config::{self, BuildConfig, ConfigError};
use crate::dispatch::{CancelToken, DispatchError, DispatchReport, run_render_workers};
use crate::fetch::Fetcher;
use crate::plan::{PlanError, RenderPlan, build_render_plan, write_plan};
use crate::processor::{MarkdownProcessorFactory, ProcessorFactory};
use crate::publish::{PublishError, StagingArea, publish_staged};
use crate::render::RenderOptions;
use crate::scan::{self, ScanError};
use crate::snapshot::{SnapshotError, load_snapshots};
use crate::vcs::{GitMetadata, MetadataPrefetch, MetadataSource};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("Failed to copy asset {path}: {source}")]
    Asset {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Output directory {output} overlaps content directory {source_dir}")]
    Overlap { source_dir: PathBuf, output: PathBuf },
}

/// Inputs of one build. Collaborators default to the built-in implementations.
pub struct BuildOptions {
    pub content_root: PathBuf,
    pub output_dir: PathBuf,
    pub config: BuildConfig,
    pub fetcher: Fetcher,
    pub factory: Arc<dyn ProcessorFactory>,
    pub composer: Box<dyn SiteComposer>,
    /// `None` disables commit metadata.
    pub metadata: Option<Arc<dyn MetadataSource>>,
}

impl BuildOptions {
    pub fn new(content_root: &Path, output_dir: &Path, config: BuildConfig) -> Self {
        let site_title = content_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stagepress".to_string());
        Self {
            content_root: content_root.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            config,
            fetcher: Fetcher::Default,
            factory: Arc::new(MarkdownProcessorFactory),
            composer: Box::new(HtmlComposer::new(site_title)),
            metadata: Some(Arc::new(GitMetadata::new(content_root))),
        }
    }

    /// Like [`BuildOptions::new`], with config loaded from the content root.
    pub fn load(content_root: &Path, output_dir: &Path) -> Result<Self, BuildError> {
        let config = config::load_config(content_root)?;
        Ok(Self::new(content_root, output_dir, config))
    }
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub plan: RenderPlan,
    pub dispatch: DispatchReport,
    pub pages: Vec<String>,
    pub assets: usize,
    pub output_dir: PathBuf,
    pub elapsed: Duration,
}

/// Scan the content root and build its render plan.
pub fn plan_content(content_root: &Path) -> Result<RenderPlan, BuildError> {
    let units = scan::scan(content_root)?;
    Ok(build_render_plan(&units, content_root)?)
}

/// Run the full pipeline and publish the result.
pub fn run_build(options: &BuildOptions, cancel: &CancelToken) -> Result<BuildSummary, BuildError> {
    let started = Instant::now();
    check_overlap(&options.content_root, &options.output_dir)?;

    let units = scan::scan(&options.content_root)?;
    let plan = build_render_plan(&units, &options.content_root)?;
    for dup in plan.duplicates() {
        tracing::warn!(
            path = %dup.relative_path,
            original_id = dup.original_id,
            assigned_id = dup.assigned_id,
            "Duplicate id reassigned"
        );
    }
    tracing::info!(documents = units.len(), entries = plan.len(), "Planned render");

    let prefetch = match &options.metadata {
        Some(source) => MetadataPrefetch::spawn(Arc::clone(source), units),
        None => MetadataPrefetch::disabled(),
    };

    let staging = StagingArea::create(&options.output_dir)?;
    match stage(options, &plan, &staging, prefetch, cancel) {
        Ok((dispatch, pages, assets)) => {
            if let Err(e) = publish_staged(staging.path(), &options.output_dir) {
                let kept = staging.retain();
                tracing::warn!(staging = %kept.display(), "Build staged but not published; staging directory kept");
                return Err(e.into());
            }
            Ok(BuildSummary {
                plan,
                dispatch,
                pages,
                assets,
                output_dir: options.output_dir.clone(),
                elapsed: started.elapsed(),
            })
        }
        Err(e) => {
            // Every worker has stopped by now, so the snapshot set is final.
            if staging.has_snapshots() {
                let kept = staging.retain();
                tracing::warn!(staging = %kept.display(), "Build failed; staging directory kept for inspection");
            } else if let Err(cleanup) = staging.discard() {
                tracing::warn!(error = %cleanup, "Failed to remove staging directory");
            }
            Err(e)
        }
    }
}

fn stage(
    options: &BuildOptions,
    plan: &RenderPlan,
    staging: &StagingArea,
    prefetch: MetadataPrefetch,
    cancel: &CancelToken,
) -> Result<(DispatchReport, Vec<String>, usize), BuildError> {
    let work_dir = staging.work_dir();
    write_plan(plan, &work_dir)?;

    let render_options = RenderOptions::from_config(&options.config.render, &options.content_root)
        .with_fetcher(options.fetcher.clone());
    let dispatch = run_render_workers(
        plan,
        staging.path(),
        &render_options,
        Arc::clone(&options.factory),
        config::effective_workers(&options.config.processing),
        cancel,
    )?;

    let snapshots = load_snapshots(plan, &work_dir)?;
    let assets = copy_assets(&options.content_root, staging.path())?;
    let metadata = prefetch.wait();
    let summary = options
        .composer
        .compose(&snapshots, metadata.as_ref(), staging.path())?;
    Ok((dispatch, summary.pages, assets))
}

/// Copy every non-markdown file under `content_root` into `site_dir`.
fn copy_assets(content_root: &Path, site_dir: &Path) -> Result<usize, BuildError> {
    let assets = scan::collect_assets(content_root)?;
    for (source, rel) in &assets {
        let target = site_dir.join(rel);
        let copy = || -> std::io::Result<()> {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source, &target)?;
            Ok(())
        };
        copy().map_err(|e| BuildError::Asset {
            path: source.clone(),
            source: e,
        })?;
    }
    tracing::debug!(count = assets.len(), "Copied assets");
    Ok(assets.len())
}

/// The output must be neither inside the content root nor contain it.
fn check_overlap(content_root: &Path, output_dir: &Path) -> Result<(), BuildError> {
    let source = std::path::absolute(content_root).unwrap_or_else(|_| content_root.to_path_buf());
    let output = std::path::absolute(output_dir).unwrap_or_else(|_| output_dir.to_path_buf());
    if output.starts_with(&source) || source.starts_with(&output) {
        return Err(BuildError::Overlap {
            source_dir: content_root.to_path_buf(),
            output: output_dir.to_path_buf(),
        });
    }
    Ok(())
}
