//! Relative reference handling.
//!
//! A document at `posts/2024/trip.md` may link to `map.png` or `../index.md`.
//! Those resolve against the document's own directory when the page is
//! served at `posts/2024/trip.html`, but not when the same HTML is embedded
//! in a page at the output root (feeds, the index timeline). [`LinkRewrite`]
//! turns such references into root-relative ones.
//!
//! Links to other documents are also mapped to the pages they publish as
//! ([`page_link`]): `../index.md#intro` becomes `../index.html#intro`.
//!
//! Left untouched: anything with a scheme (`https:`, `mailto:`, `data:`),
//! protocol-relative `//host`, rooted `/path`, and pure `#fragment` or
//! `?query` references.

use crate::naming::output_path;
use crate::scan::is_markdown;
use std::path::Path;

/// Whether `url` starts with a URI scheme such as `https:`.
pub fn has_scheme(url: &str) -> bool {
    let Some(colon) = url.find(':') else {
        return false;
    };
    let scheme = &url[..colon];
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// References that point outside the site.
pub fn is_external(url: &str) -> bool {
    has_scheme(url) || url.starts_with("//")
}

/// References that depend on the embedding page's location.
pub fn is_relative(url: &str) -> bool {
    !url.is_empty()
        && !is_external(url)
        && !url.starts_with('/')
        && !url.starts_with('#')
        && !url.starts_with('?')
}

/// Page form of a relative link to a markdown document, or `None` for
/// any other reference.
pub fn page_link(url: &str) -> Option<String> {
    if !is_relative(url) {
        return None;
    }
    let split_at = url.find(['?', '#']).unwrap_or(url.len());
    let (path, suffix) = url.split_at(split_at);
    if !is_markdown(Path::new(path)) {
        return None;
    }
    let page = output_path(path);
    Some(format!("{}{suffix}", page.to_string_lossy()))
}

/// Rewrites relative references against a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRewrite {
    /// POSIX directory of the document, `""` at the content root.
    pub base_dir: String,
}

impl LinkRewrite {
    pub fn new(base_dir: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root-relative form of `url`, or `None` when it needs no rewriting.
    pub fn rewrite(&self, url: &str) -> Option<String> {
        if !is_relative(url) {
            return None;
        }
        let split_at = url.find(['?', '#']).unwrap_or(url.len());
        let (path, suffix) = url.split_at(split_at);

        let mut segments: Vec<&str> = self
            .base_dir
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                // Climbing above the root clamps at the root.
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }

        let mut out = segments.join("/");
        if path.ends_with('/') && !out.is_empty() {
            out.push('/');
        }
        out.push_str(suffix);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(is_external("https://example.com"));
        assert!(is_external("mailto:me@example.com"));
        assert!(is_external("//cdn.example.com/x.js"));
        assert!(!is_external("img/a.png"));
        assert!(!is_external("1a:b"));
        assert!(is_relative("img/a.png"));
        assert!(is_relative("../a.md"));
        assert!(!is_relative("/rooted"));
        assert!(!is_relative("#frag"));
        assert!(!is_relative("?q=1"));
        assert!(!is_relative(""));
    }

    #[test]
    fn page_link_maps_markdown_targets() {
        assert_eq!(page_link("other.md").as_deref(), Some("other.html"));
        assert_eq!(page_link("../a/B.MD#intro").as_deref(), Some("../a/B.html#intro"));
        assert_eq!(page_link("guide.md?v=2").as_deref(), Some("guide.html?v=2"));
    }

    #[test]
    fn page_link_ignores_other_references() {
        assert_eq!(page_link("img/a.png"), None);
        assert_eq!(page_link("https://e.org/readme.md"), None);
        assert_eq!(page_link("/abs/readme.md"), None);
        assert_eq!(page_link("#readme.md"), None);
        assert_eq!(page_link("docs/"), None);
    }

    #[test]
    fn rewrite_prefixes_directory() {
        let r = LinkRewrite::new("posts/2024");
        assert_eq!(r.rewrite("map.png").as_deref(), Some("posts/2024/map.png"));
        assert_eq!(r.rewrite("./map.png").as_deref(), Some("posts/2024/map.png"));
    }

    #[test]
    fn rewrite_normalises_parent_segments() {
        let r = LinkRewrite::new("posts/2024");
        assert_eq!(r.rewrite("../index.html").as_deref(), Some("posts/index.html"));
        assert_eq!(r.rewrite("../../../up.html").as_deref(), Some("up.html"));
    }

    #[test]
    fn rewrite_keeps_query_and_fragment() {
        let r = LinkRewrite::new("docs");
        assert_eq!(
            r.rewrite("guide.html?v=2#setup").as_deref(),
            Some("docs/guide.html?v=2#setup")
        );
    }

    #[test]
    fn rewrite_keeps_trailing_slash() {
        let r = LinkRewrite::new("docs");
        assert_eq!(r.rewrite("sub/").as_deref(), Some("docs/sub/"));
    }

    #[test]
    fn rewrite_at_root_only_normalises() {
        let r = LinkRewrite::new("");
        assert_eq!(r.rewrite("./a/../b.png").as_deref(), Some("b.png"));
    }

    #[test]
    fn rewrite_skips_non_relative() {
        let r = LinkRewrite::new("docs");
        assert_eq!(r.rewrite("https://x.org/a"), None);
        assert_eq!(r.rewrite("/abs"), None);
        assert_eq!(r.rewrite("#top"), None);
    }
}
