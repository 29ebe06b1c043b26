//! Frontmatter splitting, parsing and re-composition.
//!
//! Two fences are recognised at the very start of a document:
//!
//! ```text
//! ---            +++
//! id: 4          id = 4
//! draft: true    draft = true
//! ---            +++
//! ```
//!
//! YAML goes through `serde_yaml`, TOML through `toml`; both land in a
//! `serde_json` map so the rest of the pipeline sees one representation.
//! Writing back never re-serializes that map: [`compose`] edits the lines of
//! the keys it changes and leaves the rest of the block byte for byte.

use serde_json::{Map, Value};
use std::ops::Range;
use thiserror::Error;

/// Parsed frontmatter fields.
pub type Frontmatter = Map<String, Value>;

/// Key holding the declared numeric identifier.
pub const ID_KEY: &str = "id";
/// Key holding the draft flag.
pub const DRAFT_KEY: &str = "draft";
/// Key holding the document title.
pub const TITLE_KEY: &str = "title";

#[derive(Error, Debug)]
pub enum FrontmatterError {
    #[error("invalid YAML frontmatter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid TOML frontmatter: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("cannot write TOML frontmatter: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("frontmatter must be a mapping")]
    NotAMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontmatterFormat {
    Yaml,
    Toml,
}

impl FrontmatterFormat {
    fn fence(self) -> &'static str {
        match self {
            Self::Yaml => "---",
            Self::Toml => "+++",
        }
    }
}

/// A document split into its metadata and markdown body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Format of the original fence, `None` when the document had none.
    pub format: Option<FrontmatterFormat>,
    pub fields: Frontmatter,
    /// Frontmatter text between the fences, as written.
    pub raw: String,
    pub body: String,
}

/// The two fields the plan builder needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitMeta {
    pub declared_id: Option<u64>,
    pub draft: bool,
}

/// Split `source` into `(Some((format, raw_frontmatter)), body)`.
///
/// An opening fence without a matching closing fence is not frontmatter.
pub fn split(source: &str) -> (Option<(FrontmatterFormat, &str)>, &str) {
    for format in [FrontmatterFormat::Yaml, FrontmatterFormat::Toml] {
        let fence = format.fence();
        let Some(rest) = strip_fence_line(source, fence) else {
            continue;
        };
        let mut offset = 0;
        for line in rest.split_inclusive('\n') {
            if line.trim_end_matches(['\r', '\n']) == fence {
                let raw = &rest[..offset];
                let body = &rest[offset + line.len()..];
                return (Some((format, raw)), body);
            }
            offset += line.len();
        }
    }
    (None, source)
}

fn strip_fence_line<'a>(source: &'a str, fence: &str) -> Option<&'a str> {
    let rest = source.strip_prefix(fence)?;
    rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))
}

/// Parse a whole document.
pub fn parse(source: &str) -> Result<Document, FrontmatterError> {
    let (head, body) = split(source);
    let (format, fields, raw) = match head {
        Some((format, raw)) => (Some(format), parse_fields(format, raw)?, raw.to_string()),
        None => (None, Frontmatter::new(), String::new()),
    };
    Ok(Document {
        format,
        fields,
        raw,
        body: body.to_string(),
    })
}

fn parse_fields(format: FrontmatterFormat, raw: &str) -> Result<Frontmatter, FrontmatterError> {
    let value: Value = match format {
        FrontmatterFormat::Yaml => {
            if raw.trim().is_empty() {
                Value::Null
            } else {
                serde_yaml::from_str(raw)?
            }
        }
        FrontmatterFormat::Toml => toml_to_json(toml::Value::Table(toml::from_str(raw)?)),
    };
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Frontmatter::new()),
        _ => Err(FrontmatterError::NotAMapping),
    }
}

/// TOML datetimes become their RFC 3339 text.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Rewrite a document with `updates` applied to its top-level keys.
///
/// Only the lines of the updated keys change. Every other line of the
/// original frontmatter, comments and key order included, is kept as
/// written. New keys are appended (TOML: before the first table header).
/// Documents without a fence get a fresh YAML block.
pub fn compose(
    format: Option<FrontmatterFormat>,
    raw: &str,
    updates: &[(&str, Value)],
    body: &str,
) -> Result<String, FrontmatterError> {
    let format = format.unwrap_or(FrontmatterFormat::Yaml);
    let eol = if raw.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = raw.lines().map(str::to_string).collect();

    for (key, value) in updates {
        let rendered = format!("{key}{}", render_value(format, value)?);
        match find_key(format, &lines, key) {
            Some(span) => {
                let at = span.start;
                lines.drain(span);
                lines.insert(at, rendered);
            }
            None => {
                let at = insertion_point(format, &lines);
                lines.insert(at, rendered);
            }
        }
    }

    let fence = format.fence();
    let mut out = String::with_capacity(raw.len() + body.len() + 32);
    out.push_str(fence);
    out.push_str(eol);
    for line in &lines {
        out.push_str(line);
        out.push_str(eol);
    }
    out.push_str(fence);
    out.push_str(eol);
    out.push_str(body);
    Ok(out)
}

/// The separator and value text that follows a key.
fn render_value(format: FrontmatterFormat, value: &Value) -> Result<String, FrontmatterError> {
    Ok(match format {
        FrontmatterFormat::Yaml => format!(": {}", serde_yaml::to_string(value)?.trim_end()),
        FrontmatterFormat::Toml => format!(" = {}", toml::Value::try_from(value)?),
    })
}

/// Line range taken by top-level `key`, continuation lines included.
fn find_key(format: FrontmatterFormat, lines: &[String], key: &str) -> Option<Range<usize>> {
    match format {
        FrontmatterFormat::Yaml => {
            let start = lines.iter().position(|l| yaml_key(l) == Some(key))?;
            let len = lines[start + 1..]
                .iter()
                .take_while(|l| is_yaml_continuation(l))
                .count();
            Some(start..start + 1 + len)
        }
        FrontmatterFormat::Toml => {
            for (i, line) in lines.iter().enumerate() {
                match toml_line(line) {
                    TomlLine::Header => return None,
                    TomlLine::Key(k) if k == key => return Some(i..i + 1),
                    _ => {}
                }
            }
            None
        }
    }
}

fn insertion_point(format: FrontmatterFormat, lines: &[String]) -> usize {
    match format {
        FrontmatterFormat::Yaml => lines.len(),
        FrontmatterFormat::Toml => {
            let header = lines
                .iter()
                .position(|l| matches!(toml_line(l), TomlLine::Header))
                .unwrap_or(lines.len());
            // Blank lines and comments leading into the table stay with it.
            let mut at = header;
            while at > 0 && matches!(toml_line(&lines[at - 1]), TomlLine::Other) {
                at -= 1;
            }
            at
        }
    }
}

fn unquote(key: &str) -> &str {
    let key = key.trim();
    key.strip_prefix('"')
        .and_then(|k| k.strip_suffix('"'))
        .or_else(|| key.strip_prefix('\'').and_then(|k| k.strip_suffix('\'')))
        .unwrap_or(key)
}

/// Key of a top-level YAML mapping line.
fn yaml_key(line: &str) -> Option<&str> {
    if line.starts_with([' ', '\t', '#', '-']) {
        return None;
    }
    let colon = line
        .char_indices()
        .find(|&(i, c)| c == ':' && matches!(line[i + 1..].chars().next(), None | Some(' ' | '\t')))
        .map(|(i, _)| i)?;
    Some(unquote(&line[..colon]))
}

/// Lines belonging to the value of the preceding key.
fn is_yaml_continuation(line: &str) -> bool {
    line.starts_with([' ', '\t']) || line == "-" || line.starts_with("- ")
}

enum TomlLine<'a> {
    Key(&'a str),
    Header,
    Other,
}

fn toml_line(line: &str) -> TomlLine<'_> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('[') {
        TomlLine::Header
    } else if trimmed.starts_with('#') {
        TomlLine::Other
    } else {
        match trimmed.split_once('=') {
            Some((key, _)) => TomlLine::Key(unquote(key)),
            None => TomlLine::Other,
        }
    }
}

/// A syntactically valid identifier: a non-negative integer, as a number or
/// a string of ASCII digits.
pub fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

/// `true`, or the string `"true"` in any case.
pub fn is_draft(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

impl UnitMeta {
    pub fn from_fields(fields: &Frontmatter) -> Self {
        Self {
            declared_id: fields.get(ID_KEY).and_then(parse_id),
            draft: fields.get(DRAFT_KEY).is_some_and(is_draft),
        }
    }
}

/// Read just the metadata the plan builder needs.
pub fn read_meta(source: &str) -> Result<UnitMeta, FrontmatterError> {
    let (head, _) = split(source);
    match head {
        Some((format, raw)) => Ok(UnitMeta::from_fields(&parse_fields(format, raw)?)),
        None => Ok(UnitMeta::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_yaml() {
        let (head, body) = split("---\nid: 3\n---\n# Hi\n");
        assert_eq!(head, Some((FrontmatterFormat::Yaml, "id: 3\n")));
        assert_eq!(body, "# Hi\n");
    }

    #[test]
    fn split_toml_crlf() {
        let (head, body) = split("+++\r\nid = 3\r\n+++\r\nbody");
        assert_eq!(head, Some((FrontmatterFormat::Toml, "id = 3\r\n")));
        assert_eq!(body, "body");
    }

    #[test]
    fn split_without_closing_fence_is_body() {
        let source = "---\nid: 3\nno close";
        let (head, body) = split(source);
        assert!(head.is_none());
        assert_eq!(body, source);
    }

    #[test]
    fn split_horizontal_rule_later_is_not_frontmatter() {
        let source = "intro\n---\nmore";
        assert!(split(source).0.is_none());
    }

    #[test]
    fn parse_empty_frontmatter() {
        let doc = parse("---\n---\nbody").unwrap();
        assert_eq!(doc.format, Some(FrontmatterFormat::Yaml));
        assert!(doc.fields.is_empty());
        assert_eq!(doc.body, "body");
    }

    #[test]
    fn parse_rejects_scalar_frontmatter() {
        assert!(matches!(
            parse("---\njust text\n---\n"),
            Err(FrontmatterError::NotAMapping)
        ));
    }

    #[test]
    fn parse_toml_fields() {
        let doc = parse("+++\ntitle = \"Hello\"\ndraft = true\n+++\nx").unwrap();
        assert_eq!(doc.fields["title"], json!("Hello"));
        assert_eq!(doc.fields["draft"], json!(true));
    }

    #[test]
    fn parse_id_accepts_numbers_and_digit_strings() {
        assert_eq!(parse_id(&json!(7)), Some(7));
        assert_eq!(parse_id(&json!("12")), Some(12));
        assert_eq!(parse_id(&json!(0)), Some(0));
    }

    #[test]
    fn parse_id_rejects_everything_else() {
        assert_eq!(parse_id(&json!(-1)), None);
        assert_eq!(parse_id(&json!(1.5)), None);
        assert_eq!(parse_id(&json!("12a")), None);
        assert_eq!(parse_id(&json!("")), None);
        assert_eq!(parse_id(&json!(true)), None);
        assert_eq!(parse_id(&json!(null)), None);
    }

    #[test]
    fn read_meta_draft_variants() {
        assert!(read_meta("---\ndraft: true\n---\n").unwrap().draft);
        assert!(read_meta("---\ndraft: \"TRUE\"\n---\n").unwrap().draft);
        assert!(!read_meta("---\ndraft: false\n---\n").unwrap().draft);
        assert!(!read_meta("no frontmatter").unwrap().draft);
    }

    #[test]
    fn compose_without_fence_adds_yaml_block() {
        let text = compose(None, "", &[("id", json!(4)), ("title", json!("Post"))], "Body\n")
            .unwrap();
        assert_eq!(text, "---\nid: 4\ntitle: Post\n---\nBody\n");

        let doc = parse(&text).unwrap();
        assert_eq!(doc.fields["id"], json!(4));
        assert_eq!(doc.body, "Body\n");
    }

    #[test]
    fn compose_replaces_id_in_place() {
        let doc = parse("---\ntitle: A # keep me\nid: 9\nzeta: 1\nauthor: B\n---\nx").unwrap();
        let text = compose(doc.format, &doc.raw, &[("id", json!(2))], &doc.body).unwrap();
        assert_eq!(text, "---\ntitle: A # keep me\nid: 2\nzeta: 1\nauthor: B\n---\nx");
    }

    #[test]
    fn compose_keeps_yaml_key_order_and_comments() {
        let source = "---\n# header\ntitle: T # keep me\nzeta: 1\nauthor: A\n---\nBody\n";
        let doc = parse(source).unwrap();
        let text = compose(doc.format, &doc.raw, &[("id", json!(5))], &doc.body).unwrap();
        assert_eq!(
            text,
            "---\n# header\ntitle: T # keep me\nzeta: 1\nauthor: A\nid: 5\n---\nBody\n"
        );
    }

    #[test]
    fn compose_replaces_multiline_yaml_value() {
        let doc = parse("---\ntitle:\n  - a\n  - b\nkeep: yes\n---\n").unwrap();
        let text = compose(doc.format, &doc.raw, &[("title", json!("T"))], &doc.body).unwrap();
        assert_eq!(text, "---\ntitle: T\nkeep: yes\n---\n");
    }

    #[test]
    fn compose_keeps_toml_fence_and_dates() {
        let source = "+++\ntitle = \"T\"\ndate = 2024-01-02\n+++\nBody\n";
        let doc = parse(source).unwrap();
        assert_eq!(doc.fields["date"], json!("2024-01-02"));

        let text = compose(doc.format, &doc.raw, &[("id", json!(3))], &doc.body).unwrap();
        assert_eq!(text, "+++\ntitle = \"T\"\ndate = 2024-01-02\nid = 3\n+++\nBody\n");
        let reparsed = parse(&text).unwrap();
        assert_eq!(reparsed.fields["date"], json!("2024-01-02"));
        assert_eq!(reparsed.fields["id"], json!(3));
    }

    #[test]
    fn compose_inserts_toml_keys_before_tables() {
        let source = "+++\ntitle = \"T\"\n\n[extra]\nid = 7\n+++\n";
        let doc = parse(source).unwrap();
        let text = compose(doc.format, &doc.raw, &[("id", json!(1))], &doc.body).unwrap();
        assert_eq!(text, "+++\ntitle = \"T\"\nid = 1\n\n[extra]\nid = 7\n+++\n");
        assert_eq!(parse(&text).unwrap().fields["extra"]["id"], json!(7));
    }

    #[test]
    fn compose_keeps_crlf_line_endings() {
        let doc = parse("---\r\nid: 1\r\n---\r\nx").unwrap();
        let text = compose(doc.format, &doc.raw, &[("id", json!(2))], &doc.body).unwrap();
        assert_eq!(text, "---\r\nid: 2\r\n---\r\nx");
    }
}
