//! Last-commit metadata for content files.
//!
//! Collecting it means one `git log` per document, which is slow on large
//! trees. [`MetadataPrefetch`] runs the collection on a background thread
//! while rendering happens and is only awaited when pages are composed.
//!
//! Metadata is optional everywhere: no git binary, a content root outside a
//! repository, or untracked files simply produce no entry.

use crate::scan::ContentUnit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Commit metadata keyed by the document's relative path.
pub type MetadataMap = HashMap<String, CommitMetadata>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    pub hash: String,
    pub author: String,
    /// Author date, strict ISO 8601.
    pub date: String,
}

pub trait MetadataSource: Send + Sync {
    /// Metadata for `units`, or `None` when the source is unavailable.
    fn collect(&self, units: &[ContentUnit]) -> Option<MetadataMap>;
}

/// [`MetadataSource`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitMetadata {
    root: PathBuf,
}

impl GitMetadata {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
    }
}

impl MetadataSource for GitMetadata {
    fn collect(&self, units: &[ContentUnit]) -> Option<MetadataMap> {
        if self.git(&["rev-parse", "--is-inside-work-tree"]).as_deref() != Some("true") {
            tracing::debug!(root = %self.root.display(), "Not a git work tree; skipping commit metadata");
            return None;
        }
        let mut map = MetadataMap::with_capacity(units.len());
        for unit in units {
            let log = self.git(&[
                "log",
                "-1",
                "--format=%H%x1f%an%x1f%aI",
                "--",
                &unit.relative_path,
            ]);
            if let Some(meta) = log.as_deref().and_then(parse_log_line) {
                map.insert(unit.relative_path.clone(), meta);
            }
        }
        Some(map)
    }
}

/// Parse one `%H%x1f%an%x1f%aI` line.
pub fn parse_log_line(line: &str) -> Option<CommitMetadata> {
    let mut parts = line.trim().split('\x1f');
    let hash = parts.next().filter(|h| !h.is_empty())?;
    let author = parts.next()?;
    let date = parts.next()?;
    Some(CommitMetadata {
        hash: hash.to_string(),
        author: author.to_string(),
        date: date.to_string(),
    })
}

/// Background collection started before rendering.
pub struct MetadataPrefetch {
    handle: Option<JoinHandle<Option<MetadataMap>>>,
}

impl MetadataPrefetch {
    pub fn spawn(source: Arc<dyn MetadataSource>, units: Vec<ContentUnit>) -> Self {
        let handle = std::thread::Builder::new()
            .name("stagepress-metadata".into())
            .spawn(move || source.collect(&units));
        match handle {
            Ok(handle) => Self {
                handle: Some(handle),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start metadata prefetch");
                Self::disabled()
            }
        }
    }

    /// A prefetch that yields nothing.
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    /// Block until collection finishes.
    pub fn wait(self) -> Option<MetadataMap> {
        let handle = self.handle?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Metadata prefetch panicked; continuing without commit metadata");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{content_tree, units_for};

    struct Fixed(MetadataMap);

    impl MetadataSource for Fixed {
        fn collect(&self, _units: &[ContentUnit]) -> Option<MetadataMap> {
            Some(self.0.clone())
        }
    }

    struct Exploding;

    impl MetadataSource for Exploding {
        fn collect(&self, _units: &[ContentUnit]) -> Option<MetadataMap> {
            panic!("git crashed")
        }
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn parse_log_line_splits_fields() {
        let meta = parse_log_line("abc123\x1fAda Lovelace\x1f2024-05-01T10:00:00+02:00\n").unwrap();
        assert_eq!(meta.hash, "abc123");
        assert_eq!(meta.author, "Ada Lovelace");
        assert_eq!(meta.date, "2024-05-01T10:00:00+02:00");
    }

    #[test]
    fn parse_log_line_rejects_empty_and_partial() {
        assert_eq!(parse_log_line(""), None);
        assert_eq!(parse_log_line("abc\x1fonly-author"), None);
    }

    #[test]
    fn prefetch_returns_source_result() {
        let mut map = MetadataMap::new();
        map.insert(
            "a.md".into(),
            CommitMetadata {
                hash: "h".into(),
                author: "a".into(),
                date: "d".into(),
            },
        );
        let prefetch = MetadataPrefetch::spawn(Arc::new(Fixed(map.clone())), Vec::new());
        assert_eq!(prefetch.wait(), Some(map));
    }

    #[test]
    fn prefetch_survives_panicking_source() {
        let prefetch = MetadataPrefetch::spawn(Arc::new(Exploding), Vec::new());
        assert_eq!(prefetch.wait(), None);
        assert_eq!(MetadataPrefetch::disabled().wait(), None);
    }

    #[test]
    fn git_outside_repository_is_none() {
        let tmp = content_tree(&[("a.md", "a")]);
        let git = GitMetadata::new(tmp.path());
        if git.git(&["rev-parse", "--is-inside-work-tree"]).as_deref() == Some("true") {
            // Temp dir happens to live inside a work tree.
            return;
        }
        assert_eq!(git.collect(&units_for(tmp.path())), None);
    }

    #[test]
    fn git_reports_last_commit_for_tracked_files() {
        if !git_available() {
            return;
        }
        let tmp = content_tree(&[("posts/a.md", "a"), ("untracked.md", "u")]);
        let git = GitMetadata::new(tmp.path());
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .arg("-C")
                .arg(tmp.path())
                .args(["-c", "user.name=Test Author", "-c", "user.email=t@example.com", "-c", "commit.gpgsign=false"])
                .args(args)
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["add", "posts/a.md"]);
        run(&["commit", "-q", "-m", "add a"]);

        let map = git.collect(&units_for(tmp.path())).unwrap();
        let meta = &map["posts/a.md"];
        assert_eq!(meta.author, "Test Author");
        assert_eq!(meta.hash.len(), 40);
        assert!(!map.contains_key("untracked.md"));
    }
}
