//! Site composition from rendered snapshots.
//!
//! The pipeline hands the ordered snapshots (and commit metadata, when
//! available) to a [`SiteComposer`], which writes the site into the staging
//! directory. [`HtmlComposer`] is the default.
//!
//! ## Output Structure
//!
//! ```text
//! <site>/
//! ├── index.html              # Timeline of every entry, in plan order
//! ├── feed.json               # Machine-readable listing
//! ├── about.html              # One page per document, same relative path
//! └── posts/
//!     └── hello.html
//! ```
//!
//! Pages embed `body_html`; the index embeds `aggregate_html`, whose relative
//! links were already rewritten to resolve from the site root.

use crate::render::RenderedSnapshot;
use crate::vcs::{CommitMetadata, MetadataMap};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name of the timeline page.
pub const INDEX_FILENAME: &str = "index.html";
/// File name of the JSON feed.
pub const FEED_FILENAME: &str = "feed.json";

const CSS: &str = include_str!("../static/style.css");

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a composer wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeSummary {
    /// Page paths relative to the site root, in plan order.
    pub pages: Vec<String>,
}

pub trait SiteComposer: Send + Sync {
    fn compose(
        &self,
        snapshots: &[RenderedSnapshot],
        metadata: Option<&MetadataMap>,
        site_dir: &Path,
    ) -> Result<ComposeSummary, ComposeError>;
}

/// Default composer: plain HTML pages rendered with maud.
#[derive(Debug, Clone)]
pub struct HtmlComposer {
    site_title: String,
}

impl HtmlComposer {
    pub fn new(site_title: impl Into<String>) -> Self {
        Self {
            site_title: site_title.into(),
        }
    }
}

impl Default for HtmlComposer {
    fn default() -> Self {
        Self::new("stagepress")
    }
}

#[derive(Debug, Serialize)]
struct Feed<'a> {
    title: &'a str,
    items: Vec<FeedItem<'a>>,
}

#[derive(Debug, Serialize)]
struct FeedItem<'a> {
    id: Option<u64>,
    title: Option<&'a str>,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<&'a CommitMetadata>,
}

impl SiteComposer for HtmlComposer {
    fn compose(
        &self,
        snapshots: &[RenderedSnapshot],
        metadata: Option<&MetadataMap>,
        site_dir: &Path,
    ) -> Result<ComposeSummary, ComposeError> {
        fs::create_dir_all(site_dir)?;
        let commit_for = |s: &RenderedSnapshot| metadata.and_then(|m| m.get(&s.relative_path));

        let mut pages = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let page_path = snapshot.page_path();
            if page_path == INDEX_FILENAME || page_path == FEED_FILENAME {
                // Its content still appears in the timeline.
                tracing::warn!(page = %page_path, "Page name is reserved for the site index; skipping page");
                continue;
            }
            let target = site_dir.join(&page_path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let page = render_page(&self.site_title, snapshot, commit_for(snapshot));
            fs::write(&target, page.into_string())?;
            tracing::debug!(page = %page_path, "Wrote page");
            pages.push(page_path);
        }

        let index = render_index(&self.site_title, snapshots);
        fs::write(site_dir.join(INDEX_FILENAME), index.into_string())?;

        let feed = Feed {
            title: &self.site_title,
            items: snapshots
                .iter()
                .map(|s| FeedItem {
                    id: s.id(),
                    title: s.title(),
                    path: s.page_path(),
                    commit: commit_for(s),
                })
                .collect(),
        };
        fs::write(
            site_dir.join(FEED_FILENAME),
            serde_json::to_string_pretty(&feed)?,
        )?;

        tracing::info!(pages = pages.len(), "Composed site");
        Ok(ComposeSummary { pages })
    }
}

/// `../` repeated once per directory level of `page_path`.
fn root_prefix(page_path: &str) -> String {
    "../".repeat(page_path.matches('/').count())
}

fn display_title(snapshot: &RenderedSnapshot) -> &str {
    snapshot.title().unwrap_or(&snapshot.relative_path)
}

// ============================================================================
// HTML Components
// ============================================================================

fn base_document(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                (content)
            }
        }
    }
}

fn site_header(site_title: &str, home_href: &str) -> Markup {
    html! {
        header.site-header {
            a href=(home_href) { (site_title) }
        }
    }
}

fn commit_line(commit: &CommitMetadata) -> Markup {
    let short: String = commit.hash.chars().take(7).collect();
    html! {
        p.commit {
            "Last changed " time datetime=(commit.date) { (commit.date) }
            " by " (commit.author) " (" code { (short) } ")"
        }
    }
}

fn render_page(
    site_title: &str,
    snapshot: &RenderedSnapshot,
    commit: Option<&CommitMetadata>,
) -> Markup {
    let page_path = snapshot.page_path();
    let home = format!("{}{INDEX_FILENAME}", root_prefix(&page_path));
    let title = display_title(snapshot);
    let content = html! {
        (site_header(site_title, &home))
        main {
            article id=(snapshot.id_prefix) {
                h1 { (title) }
                (PreEscaped(&snapshot.body_html))
            }
            @if let Some(commit) = commit {
                (commit_line(commit))
            }
        }
    };
    base_document(&format!("{title} · {site_title}"), content)
}

fn render_index(site_title: &str, snapshots: &[RenderedSnapshot]) -> Markup {
    let content = html! {
        (site_header(site_title, INDEX_FILENAME))
        main.timeline {
            @for snapshot in snapshots {
                section.timeline-entry id=(snapshot.id_prefix) {
                    h2 {
                        a href=(snapshot.page_path()) { (display_title(snapshot)) }
                    }
                    (PreEscaped(&snapshot.aggregate_html))
                }
            }
        }
        footer.site-footer {
            (snapshots.len()) " entries · " a href=(FEED_FILENAME) { "feed" }
        }
    };
    base_document(site_title, content)
}
