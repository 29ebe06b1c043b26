//! Content discovery.
//!
//! Walks the content root and returns one [`ContentUnit`] per markdown
//! document. Everything else under the root (images, downloads, fonts) is
//! left for the asset copy step in [`pipeline`](crate::pipeline).
//!
//! ## Skipped entries
//!
//! - Hidden files and directories (leading `.`), which also covers the
//!   render cache and editor swap files
//! - `config.toml` at the content root
//!
//! Units are returned sorted by their POSIX relative path so callers never
//! depend on directory iteration order.

use crate::config::CONFIG_FILENAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to walk content directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Content root does not exist: {0}")]
    MissingRoot(PathBuf),
}

/// One discovered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// POSIX-style path relative to the content root, e.g. `posts/hello.md`.
    pub relative_path: String,
    /// POSIX-style relative path of the containing directory, `""` at the root.
    pub directory: String,
}

impl ContentUnit {
    /// Build a unit from a file path below `root`.
    ///
    /// Returns `None` when `path` is not inside `root`.
    pub fn from_path(root: &Path, path: &Path) -> Option<Self> {
        let rel = path.strip_prefix(root).ok()?;
        let relative_path = to_posix(rel);
        let directory = rel.parent().map(to_posix).unwrap_or_default();
        Some(Self {
            path: path.to_path_buf(),
            relative_path,
            directory,
        })
    }
}

/// Join path components with `/` regardless of platform.
pub fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a file is a markdown document.
pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Discover every markdown document below `root`.
pub fn scan(root: &Path) -> Result<Vec<ContentUnit>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::MissingRoot(root.to_path_buf()));
    }

    let mut units = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_markdown(entry.path()) {
            continue;
        }
        if let Some(unit) = ContentUnit::from_path(root, entry.path()) {
            units.push(unit);
        }
    }

    units.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(units)
}

/// Every non-markdown file below `root` that should be copied verbatim.
///
/// Returns `(source, relative)` pairs, skipping the same hidden entries as
/// [`scan`] plus the root `config.toml`.
pub fn collect_assets(root: &Path) -> Result<Vec<(PathBuf, PathBuf)>, ScanError> {
    let mut assets = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || is_markdown(entry.path()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if rel == Path::new(CONFIG_FILENAME) {
            continue;
        }
        assets.push((entry.path().to_path_buf(), rel.to_path_buf()));
    }

    assets.sort();
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_doc;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_finds_nested_markdown_sorted() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "posts/b.md", "b");
        write_doc(tmp.path(), "posts/a.md", "a");
        write_doc(tmp.path(), "index.md", "root");

        let units = scan(tmp.path()).unwrap();
        let paths: Vec<&str> = units.iter().map(|u| u.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["index.md", "posts/a.md", "posts/b.md"]);
        assert_eq!(units[0].directory, "");
        assert_eq!(units[1].directory, "posts");
    }

    #[test]
    fn scan_skips_hidden_and_non_markdown() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a.md", "a");
        write_doc(tmp.path(), ".drafts/hidden.md", "h");
        write_doc(tmp.path(), "img/photo.png", "png");
        write_doc(tmp.path(), "UPPER.MD", "upper");

        let units = scan(tmp.path()).unwrap();
        let paths: Vec<&str> = units.iter().map(|u| u.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["UPPER.MD", "a.md"]);
    }

    #[test]
    fn scan_missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert!(matches!(scan(&missing), Err(ScanError::MissingRoot(_))));
    }

    #[test]
    fn collect_assets_skips_markdown_and_config() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path(), "a.md", "a");
        write_doc(tmp.path(), "config.toml", "");
        write_doc(tmp.path(), "posts/img/x.png", "png");
        fs::create_dir_all(tmp.path().join(".stagepress-cache")).unwrap();
        write_doc(tmp.path(), ".stagepress-cache/blob", "cached");

        let assets = collect_assets(tmp.path()).unwrap();
        let rels: Vec<PathBuf> = assets.into_iter().map(|(_, rel)| rel).collect();
        assert_eq!(rels, vec![PathBuf::from("posts/img/x.png")]);
    }

    #[test]
    fn unit_from_path_outside_root() {
        let root = Path::new("/content");
        assert!(ContentUnit::from_path(root, Path::new("/elsewhere/a.md")).is_none());
    }
}
