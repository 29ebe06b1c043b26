//! Shared test utilities.
//!
//! Content trees are built in a temp directory from `(relative path, text)`
//! pairs so every test starts from an isolated, mutable copy.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = content_tree(&[
//!     ("index.md", "# Home\n"),
//!     ("posts/hello.md", "---\nid: 3\n---\nHi"),
//! ]);
//! let units = units_for(tmp.path());
//! assert_eq!(units.len(), 2);
//! ```

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::scan::{self, ContentUnit};

/// Write `content` to `root/rel`, creating parent directories.
pub fn write_doc(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// Build a content tree in a fresh temp directory.
pub fn content_tree(docs: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for (rel, content) in docs {
        write_doc(tmp.path(), rel, content);
    }
    tmp
}

/// Scan `root`, panicking on failure.
pub fn units_for(root: &Path) -> Vec<ContentUnit> {
    scan::scan(root).unwrap()
}

/// A unit below a fake `/content` root, for tests that never touch disk.
pub fn unit(rel: &str) -> ContentUnit {
    let root = Path::new("/content");
    ContentUnit::from_path(root, &root.join(rel)).unwrap()
}
