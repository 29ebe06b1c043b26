//! Names derived from content paths.
//!
//! Every generated name (anchor ids, element id prefixes, output file paths)
//! comes from here so the renderer and the composer agree on them.
//!
//! - `posts/Hello World.md` → id prefix `posts-hello-world-1a2b3c4d`
//! - `posts/Hello World.md` → output path `posts/Hello World.html`
//! - `## Getting Started` → anchor `getting-started`

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Lowercase ASCII slug: alphanumerics kept, every other run becomes one `-`.
///
/// Non-ASCII letters are kept as-is (lowercased) so titles in other scripts
/// still produce readable anchors.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Stable element-id namespace for one document.
///
/// The slug keeps it readable; the hash suffix keeps two paths that slugify
/// identically (`a b.md`, `a-b.md`) apart.
pub fn id_prefix(relative_path: &str) -> String {
    let stem = relative_path
        .strip_suffix(".md")
        .or_else(|| relative_path.strip_suffix(".MD"))
        .unwrap_or(relative_path);
    let digest = Sha256::digest(relative_path.as_bytes());
    let hash = format!("{digest:x}");
    let slug = slugify(stem);
    if slug.is_empty() {
        format!("c{}", &hash[..8])
    } else {
        format!("{slug}-{}", &hash[..8])
    }
}

/// Output page path for a document: same relative path, `.html` extension.
pub fn output_path(relative_path: &str) -> PathBuf {
    Path::new(relative_path).with_extension("html")
}

/// Hands out unique anchors within one document.
#[derive(Debug, Default)]
pub struct Slugger {
    seen: HashMap<String, usize>,
}

impl Slugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slug for `text`, suffixed `-1`, `-2`, … on repeats.
    pub fn anchor(&mut self, text: &str) -> String {
        let mut base = slugify(text);
        if base.is_empty() {
            base = "section".to_string();
        }
        let count = self.seen.entry(base.clone()).or_insert(0);
        let anchor = if *count == 0 {
            base.clone()
        } else {
            format!("{base}-{count}")
        };
        *count += 1;
        anchor
    }
}
