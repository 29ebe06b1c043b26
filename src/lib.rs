//! # Stagepress
//!
//! A render-and-publish pipeline for trees of markdown documents. Each
//! document gets a stable numeric id, is rendered to HTML in parallel, and
//! the finished site replaces the previous output in a single directory swap.
//!
//! # Architecture: Plan, Render, Aggregate, Publish
//!
//! ```text
//! 1. Plan       content/  →  plan.json            (which documents, which ids)
//! 2. Render     plan      →  rendered/{i}.json    (one snapshot per entry, any order)
//! 3. Aggregate  snapshots →  pages, index, feed   (restored to plan order)
//! 4. Publish    staging   →  dist/                (backup, swap, restore on failure)
//! ```
//!
//! Render workers never share memory with the coordinator: they receive an
//! owned payload and hand results back only through snapshot files in the
//! staging work directory. That keeps the aggregation step identical whether
//! rendering ran on a worker pool or sequentially.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Walks the content root, yields markdown units and assets |
//! | [`frontmatter`] | YAML/TOML frontmatter split, parse, compose; id and draft rules |
//! | [`highlight`] | Fenced code highlighting with bundled `syntect` themes |
//! | [`plan`] | Stable id assignment and the serialized render plan |
//! | [`processor`] | Markdown to HTML with heading ids, link rewriting, diagrams |
//! | [`render`] | Renders one plan entry into a [`render::RenderedSnapshot`] |
//! | [`dispatch`] | Worker pool, progress channel, cancellation, sequential fallback |
//! | [`snapshot`] | Loads snapshots back in plan order |
//! | [`compose`] | Writes pages, timeline index and feed with Maud |
//! | [`publish`] | Staging directories and the backup/swap/restore transaction |
//! | [`pipeline`] | Ties the stages together; cleanup policy on failure |
//! | [`vcs`] | Last-commit metadata, collected in the background |
//! | [`config`] | `config.toml` loading, merging over stock defaults, validation |
//! | [`cache`] | Content-addressed cache for remote diagram renders |
//! | [`fetch`] | Pluggable HTTP fetch strategy |
//! | [`links`] | Relative link detection and rewriting |
//! | [`naming`] | Slugs, id prefixes, output paths |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Ids Live in the Source
//!
//! Assigned ids are written back into each document's frontmatter, so the
//! source tree is the only record of them. No database, no side file. Drafts
//! keep their ids reserved even though they are not rendered.
//!
//! ## The Output Is Never Half-Written
//!
//! Everything is built in a sibling staging directory. The previous output is
//! only touched by the final rename pair, and a failed swap moves the backup
//! back into place.

pub mod cache;
pub mod compose;
pub mod config;
pub mod dispatch;
pub mod fetch;
pub mod frontmatter;
pub mod highlight;
pub mod links;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod processor;
pub mod publish;
pub mod render;
pub mod scan;
pub mod snapshot;
pub mod vcs;

#[cfg(test)]
pub(crate) mod test_helpers;
