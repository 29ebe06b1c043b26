//! Markdown to HTML.
//!
//! The renderer talks to a [`ContentProcessor`]; the dispatcher builds one per
//! execution unit through a [`ProcessorFactory`] so no processor state is
//! ever shared between threads.
//!
//! [`MarkdownProcessor`] is the default, built on `pulldown-cmark`. On top of
//! plain CommonMark (plus tables, footnotes, strikethrough, task lists) it:
//!
//! - namespaces heading and footnote anchors with the document's id prefix
//!   (`## Setup` → `id="posts-guide-1a2b3c4d-setup"`, `[^1]` →
//!   `id="posts-guide-1a2b3c4d-fn-1"`)
//! - promotes the first `# heading` into `title` when the frontmatter has none
//! - points links at other documents to their `.html` pages, and rewrites
//!   relative link and image targets when a [`LinkRewrite`] is given
//! - adds `target`/`rel` to external links when a link target is configured
//! - highlights fenced code with the configured theme, and routes diagram fences to the
//!   configured diagram renderer (client markup or remote SVG)

use crate::cache::{CacheKey, ContentCache};
use crate::config::{DiagramConfig, DiagramMode, HighlightConfig};
use crate::fetch::{Fetch, FetchError};
use crate::frontmatter::{self, Frontmatter, FrontmatterError, ID_KEY, TITLE_KEY};
use crate::highlight::{HighlightError, has_syntax, highlight_code};
use crate::links::{LinkRewrite, is_external, page_link};
use crate::naming::{Slugger, slugify};
use crate::render::RenderOptions;
use pulldown_cmark::{CodeBlockKind, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Frontmatter(#[from] FrontmatterError),
    #[error("diagram rendering failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("cannot open cache directory: {0}")]
    Cache(std::io::Error),
    #[error(transparent)]
    Highlight(#[from] HighlightError),
}

/// Per-call processing options.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Rewrite relative references for embedding at the output root.
    pub link_rewrite: Option<LinkRewrite>,
    /// Promote the first `# heading` to `title` when none is declared.
    pub promote_heading: bool,
    /// Identifier to force into the frontmatter.
    pub force_id: Option<u64>,
    pub highlight: HighlightConfig,
}

/// Result of [`ContentProcessor::process_with_frontmatter_transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub html: String,
    pub frontmatter: Frontmatter,
    /// Full document text after normalisation.
    pub composed_source: String,
    /// Whether `composed_source` differs from the input.
    pub changed: bool,
    pub id_prefix: String,
    /// Problems worth surfacing that did not stop rendering.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub html: String,
    pub warnings: Vec<String>,
}

pub trait ContentProcessor {
    /// Normalise frontmatter and render the page-scoped HTML.
    fn process_with_frontmatter_transform(
        &self,
        raw: &str,
        id_prefix: &str,
        opts: &ProcessOptions,
    ) -> Result<TransformOutput, ProcessError>;

    /// Render HTML without touching frontmatter.
    fn process(
        &self,
        raw: &str,
        id_prefix: &str,
        opts: &ProcessOptions,
    ) -> Result<ProcessOutput, ProcessError>;

    /// One-line summary logged when a worker finishes.
    fn summary(&self) -> Option<String> {
        None
    }
}

/// Builds a fresh processor for one execution unit.
pub trait ProcessorFactory: Send + Sync {
    fn create(&self, options: &RenderOptions) -> Result<Box<dyn ContentProcessor>, ProcessError>;
}

/// Factory for [`MarkdownProcessor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownProcessorFactory;

impl ProcessorFactory for MarkdownProcessorFactory {
    fn create(&self, options: &RenderOptions) -> Result<Box<dyn ContentProcessor>, ProcessError> {
        Ok(Box::new(MarkdownProcessor::new(options)?))
    }
}

/// Default `pulldown-cmark` processor.
#[derive(Debug)]
pub struct MarkdownProcessor {
    diagrams: DiagramConfig,
    link_target: Option<String>,
    user_agent: String,
    fetch: Arc<dyn Fetch>,
    cache: Option<ContentCache>,
}

impl MarkdownProcessor {
    pub fn new(options: &RenderOptions) -> Result<Self, ProcessError> {
        // Only remote diagrams touch the cache; don't create the directory otherwise.
        let cache = if options.diagrams.renderer == DiagramMode::Remote {
            Some(ContentCache::open(&options.cache_dir).map_err(ProcessError::Cache)?)
        } else {
            None
        };
        Ok(Self {
            diagrams: options.diagrams.clone(),
            link_target: options.link_target.clone(),
            user_agent: options.user_agent.clone(),
            fetch: options.fetcher.instantiate(),
            cache,
        })
    }

    /// HTML for `body` plus any warnings raised along the way.
    fn render_html(
        &self,
        body: &str,
        id_prefix: &str,
        opts: &ProcessOptions,
    ) -> Result<(String, Vec<String>), ProcessError> {
        let mut warnings = Vec::new();
        let events: Vec<Event<'_>> = Parser::new_ext(body, markdown_options()).collect();
        let mut out_events: Vec<Event<'_>> = Vec::with_capacity(events.len());
        let mut slugger = Slugger::new();
        let mut raw_links: Vec<bool> = Vec::new();
        let mut footnotes = Footnotes::default();
        let mut i = 0;

        while i < events.len() {
            match &events[i] {
                Event::Start(Tag::Heading {
                    level,
                    id,
                    classes,
                    attrs,
                }) => {
                    let anchor = match id {
                        Some(explicit) => explicit.to_string(),
                        None => slugger.anchor(&collect_text(&events[i + 1..])),
                    };
                    out_events.push(Event::Start(Tag::Heading {
                        level: *level,
                        id: Some(CowStr::from(format!("{id_prefix}-{anchor}"))),
                        classes: classes.clone(),
                        attrs: attrs.clone(),
                    }));
                }
                Event::Start(Tag::Link {
                    link_type,
                    dest_url,
                    title,
                    id,
                }) => {
                    let dest = rewrite_link(dest_url, opts.link_rewrite.as_ref());
                    match self.link_target.as_deref() {
                        Some(target) if is_external(&dest) => {
                            let mut tag = format!("<a href=\"{}\"", escape_html(&dest));
                            if !title.is_empty() {
                                tag.push_str(&format!(" title=\"{}\"", escape_html(title)));
                            }
                            tag.push_str(&format!(
                                " target=\"{}\" rel=\"noopener\">",
                                escape_html(target)
                            ));
                            out_events.push(Event::InlineHtml(CowStr::from(tag)));
                            raw_links.push(true);
                        }
                        _ => {
                            out_events.push(Event::Start(Tag::Link {
                                link_type: *link_type,
                                dest_url: dest,
                                title: title.clone(),
                                id: id.clone(),
                            }));
                            raw_links.push(false);
                        }
                    }
                }
                Event::FootnoteReference(label) => {
                    let number = footnotes.number(label);
                    out_events.push(Event::InlineHtml(CowStr::from(format!(
                        "<sup class=\"footnote-reference\"><a href=\"#{}\">{number}</a></sup>",
                        footnotes.anchor(id_prefix, label)
                    ))));
                }
                Event::Start(Tag::FootnoteDefinition(label)) => {
                    let number = footnotes.number(label);
                    out_events.push(Event::Html(CowStr::from(format!(
                        "<div class=\"footnote-definition\" id=\"{}\">\
                         <sup class=\"footnote-definition-label\">{number}</sup>",
                        footnotes.anchor(id_prefix, label)
                    ))));
                }
                Event::End(TagEnd::FootnoteDefinition) => {
                    out_events.push(Event::Html(CowStr::Borrowed("</div>\n")));
                }
                Event::End(TagEnd::Link) => {
                    if raw_links.pop().unwrap_or(false) {
                        out_events.push(Event::InlineHtml(CowStr::Borrowed("</a>")));
                    } else {
                        out_events.push(Event::End(TagEnd::Link));
                    }
                }
                Event::Start(Tag::Image {
                    link_type,
                    dest_url,
                    title,
                    id,
                }) => {
                    out_events.push(Event::Start(Tag::Image {
                        link_type: *link_type,
                        dest_url: rewrite_url(dest_url, opts.link_rewrite.as_ref()),
                        title: title.clone(),
                        id: id.clone(),
                    }));
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    let end = find_code_block_end(&events, i);
                    let code = collect_text(&events[i + 1..end]);
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().unwrap_or("").to_string()
                        }
                        CodeBlockKind::Indented => String::new(),
                    };
                    match self.render_code_block(&lang, &code, &opts.highlight, &mut warnings)? {
                        Some(html) => out_events.push(Event::Html(CowStr::from(html))),
                        None => out_events.extend(events[i..=end].iter().cloned()),
                    }
                    i = end + 1;
                    continue;
                }
                other => out_events.push(other.clone()),
            }
            i += 1;
        }

        let mut html = String::with_capacity(body.len() * 3 / 2);
        pulldown_cmark::html::push_html(&mut html, out_events.into_iter());
        Ok((html, warnings))
    }

    /// Custom markup for a code block, or `None` to keep the default rendering.
    fn render_code_block(
        &self,
        lang: &str,
        code: &str,
        highlight: &HighlightConfig,
        warnings: &mut Vec<String>,
    ) -> Result<Option<String>, ProcessError> {
        let diagram = diagram_kind(lang);
        if let Some(kind) = diagram {
            match self.diagrams.renderer {
                DiagramMode::None => {}
                DiagramMode::Client => {
                    return Ok(Some(format!(
                        "<pre class=\"{kind}\">{}</pre>\n",
                        escape_html(code)
                    )));
                }
                DiagramMode::Remote => {
                    let svg = self.render_remote_diagram(kind, code)?;
                    return Ok(Some(format!(
                        "<figure class=\"diagram diagram-{kind}\">{svg}</figure>\n"
                    )));
                }
            }
        }

        if !highlight.enabled {
            return Ok(None);
        }
        if !lang.is_empty() && diagram.is_none() && !has_syntax(lang) {
            warnings.push(format!("no syntax for `{lang}` code, rendered as plain text"));
        }
        Ok(Some(highlight_code(
            lang,
            code,
            &highlight.theme,
            highlight.line_numbers,
        )?))
    }

    fn render_remote_diagram(&self, kind: &str, source: &str) -> Result<String, ProcessError> {
        let endpoint = self.diagrams.endpoint.trim_end_matches('/');
        let url = format!("{endpoint}/{kind}/svg");
        let fetch = || self.fetch.post_text(&url, source, &self.user_agent);
        let svg = match &self.cache {
            Some(cache) => {
                let key = CacheKey::new("diagram", &[kind, source, endpoint]);
                cache.get_or_insert_with(&key, fetch)?
            }
            None => fetch()?,
        };
        Ok(svg)
    }
}

impl ContentProcessor for MarkdownProcessor {
    fn process_with_frontmatter_transform(
        &self,
        raw: &str,
        id_prefix: &str,
        opts: &ProcessOptions,
    ) -> Result<TransformOutput, ProcessError> {
        let doc = frontmatter::parse(raw)?;
        let mut fields = doc.fields;
        let mut body = doc.body;
        let mut updates: Vec<(&str, Value)> = Vec::new();

        if let Some(id) = opts.force_id
            && fields.get(ID_KEY).and_then(frontmatter::parse_id) != Some(id)
        {
            updates.push((ID_KEY, Value::from(id)));
        }

        if opts.promote_heading
            && !has_title(&fields)
            && let Some((title, range)) = find_title_heading(&body)
        {
            updates.push((TITLE_KEY, Value::String(title)));
            let rest = body[range.end..].trim_start_matches(['\r', '\n']);
            body = format!("{}{}", &body[..range.start], rest);
        }

        let changed = !updates.is_empty();
        let composed_source = if changed {
            frontmatter::compose(doc.format, &doc.raw, &updates, &body)?
        } else {
            raw.to_string()
        };
        for (key, value) in updates {
            fields.insert(key.to_string(), value);
        }
        let (html, warnings) = self.render_html(&body, id_prefix, opts)?;

        Ok(TransformOutput {
            html,
            frontmatter: fields,
            composed_source,
            changed,
            id_prefix: id_prefix.to_string(),
            warnings,
        })
    }

    fn process(
        &self,
        raw: &str,
        id_prefix: &str,
        opts: &ProcessOptions,
    ) -> Result<ProcessOutput, ProcessError> {
        let doc = frontmatter::parse(raw)?;
        let (html, warnings) = self.render_html(&doc.body, id_prefix, opts)?;
        Ok(ProcessOutput { html, warnings })
    }

    fn summary(&self) -> Option<String> {
        self.cache
            .as_ref()
            .map(|cache| format!("Diagram cache: {}", cache.stats()))
    }
}

fn markdown_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES
}

fn has_title(fields: &Frontmatter) -> bool {
    match fields.get(TITLE_KEY) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Text and title range of the first level-1 heading in `body`.
fn find_title_heading(body: &str) -> Option<(String, Range<usize>)> {
    let mut parser = Parser::new_ext(body, markdown_options()).into_offset_iter();
    let range = loop {
        match parser.next()? {
            (
                Event::Start(Tag::Heading {
                    level: HeadingLevel::H1,
                    ..
                }),
                range,
            ) => break range,
            _ => continue,
        }
    };
    let mut title = String::new();
    for (event, _) in parser {
        match event {
            Event::Text(t) | Event::Code(t) => title.push_str(&t),
            Event::SoftBreak | Event::HardBreak => title.push(' '),
            Event::End(TagEnd::Heading(_)) => break,
            _ => {}
        }
    }
    let title = title.trim().to_string();
    if title.is_empty() {
        return None;
    }
    Some((title, range))
}

/// Footnote numbering in order of first mention, reference or definition.
#[derive(Debug, Default)]
struct Footnotes {
    numbers: HashMap<String, usize>,
}

impl Footnotes {
    fn number(&mut self, label: &str) -> usize {
        let next = self.numbers.len() + 1;
        *self.numbers.entry(label.to_string()).or_insert(next)
    }

    /// `{id_prefix}-fn-{label}`, with the label slugged into a valid id.
    fn anchor(&mut self, id_prefix: &str, label: &str) -> String {
        let slug = slugify(label);
        if slug.is_empty() {
            format!("{id_prefix}-fn-{}", self.number(label))
        } else {
            format!("{id_prefix}-fn-{slug}")
        }
    }
}

/// Concatenated text up to the end of the enclosing element.
fn collect_text(events: &[Event<'_>]) -> String {
    let mut text = String::new();
    for event in events {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(t),
            Event::End(TagEnd::Heading(_)) | Event::End(TagEnd::CodeBlock) => break,
            _ => {}
        }
    }
    text
}

fn find_code_block_end(events: &[Event<'_>], start: usize) -> usize {
    events[start..]
        .iter()
        .position(|e| matches!(e, Event::End(TagEnd::CodeBlock)))
        .map(|offset| start + offset)
        .unwrap_or(events.len() - 1)
}

/// Link target with markdown documents mapped to their pages.
fn rewrite_link<'a>(url: &CowStr<'a>, rewrite: Option<&LinkRewrite>) -> CowStr<'a> {
    match page_link(url) {
        Some(page) => rewrite_url(&CowStr::from(page), rewrite),
        None => rewrite_url(url, rewrite),
    }
}

fn rewrite_url<'a>(url: &CowStr<'a>, rewrite: Option<&LinkRewrite>) -> CowStr<'a> {
    match rewrite.and_then(|r| r.rewrite(url)) {
        Some(rewritten) => CowStr::from(rewritten),
        None => url.clone(),
    }
}

/// Kroki endpoint for a fence language, if it is a diagram.
fn diagram_kind(lang: &str) -> Option<&'static str> {
    match lang.to_ascii_lowercase().as_str() {
        "mermaid" => Some("mermaid"),
        "plantuml" | "puml" => Some("plantuml"),
        "graphviz" | "dot" => Some("graphviz"),
        "d2" => Some("d2"),
        _ => None,
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
