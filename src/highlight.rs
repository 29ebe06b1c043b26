//! Syntax highlighting for fenced code, with `syntect`.
//!
//! The bundled syntaxes and themes are loaded once per process and shared by
//! every worker. Output carries inline styles from the configured theme, so a
//! page needs no extra stylesheet to show colours.

use crate::processor::escape_html;
use std::sync::LazyLock;
use syntect::easy::HighlightLines;
use syntect::highlighting::ThemeSet;
use syntect::html::{IncludeBackground, styled_line_to_highlighted_html};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;
use thiserror::Error;

static SYNTAXES: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEMES: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

#[derive(Error, Debug)]
pub enum HighlightError {
    #[error("unknown highlight theme {0:?}")]
    UnknownTheme(String),
    #[error("cannot highlight {language} code: {source}")]
    Syntax {
        language: String,
        source: syntect::Error,
    },
}

/// Whether `name` is one of the bundled themes.
pub fn has_theme(name: &str) -> bool {
    THEMES.themes.contains_key(name)
}

/// Whether a fence language resolves to a bundled syntax.
pub fn has_syntax(token: &str) -> bool {
    find_syntax(&SYNTAXES, token).is_some()
}

/// Names of the bundled themes, sorted.
pub fn theme_names() -> Vec<&'static str> {
    let themes: &'static ThemeSet = &THEMES;
    themes.themes.keys().map(String::as_str).collect()
}

/// Highlight `code` as `<pre><code>` markup.
///
/// Unknown languages fall back to plain text; an unknown theme is an error.
pub fn highlight_code(
    lang: &str,
    code: &str,
    theme_name: &str,
    line_numbers: bool,
) -> Result<String, HighlightError> {
    let theme = THEMES
        .themes
        .get(theme_name)
        .ok_or_else(|| HighlightError::UnknownTheme(theme_name.to_string()))?;
    let syntax = find_syntax(&SYNTAXES, lang).unwrap_or_else(|| SYNTAXES.find_syntax_plain_text());
    let failed = |source| HighlightError::Syntax {
        language: syntax.name.clone(),
        source,
    };

    let mut highlighter = HighlightLines::new(syntax, theme);
    let mut body = String::with_capacity(code.len() * 4);
    for (n, line) in LinesWithEndings::from(code).enumerate() {
        let regions = highlighter.highlight_line(line, &SYNTAXES).map_err(failed)?;
        if line_numbers {
            body.push_str(&format!("<span class=\"line-number\">{}</span>", n + 1));
        }
        let html = styled_line_to_highlighted_html(&regions, IncludeBackground::No).map_err(failed)?;
        body.push_str(&html);
    }

    let mut pre = String::from("<pre class=\"highlight");
    if line_numbers {
        pre.push_str(" line-numbers");
    }
    pre.push('"');
    if let Some(bg) = theme.settings.background {
        pre.push_str(&format!(
            " style=\"background-color:#{:02x}{:02x}{:02x};\"",
            bg.r, bg.g, bg.b
        ));
    }
    pre.push('>');
    let code_open = if lang.is_empty() {
        "<code>".to_string()
    } else {
        format!(
            "<code class=\"language-{}\">",
            escape_html(&lang.to_ascii_lowercase())
        )
    };
    Ok(format!("{pre}{code_open}{body}</code></pre>\n"))
}

fn find_syntax<'a>(syntaxes: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    if token.is_empty() {
        return None;
    }
    let lowercase = token.to_ascii_lowercase();
    syntaxes
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntaxes.find_syntax_by_name(token))
        .or_else(|| syntaxes.find_syntax_by_extension(&lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    const THEME: &str = "base16-ocean.dark";

    #[test]
    fn known_language_gets_styled_spans() {
        let html = highlight_code("rust", "fn main() {}\n", THEME, false).unwrap();
        assert!(html.starts_with("<pre class=\"highlight\" style=\"background-color:#"), "{html}");
        assert!(html.contains("<code class=\"language-rust\">"), "{html}");
        assert!(html.contains("<span style=\"color:#"), "{html}");
        assert!(html.ends_with("</code></pre>\n"));
    }

    #[test]
    fn code_is_escaped() {
        let html = highlight_code("rust", "let a = 1 < 2;\n", THEME, false).unwrap();
        assert!(html.contains("&lt;"), "{html}");
        assert!(!html.contains("1 < 2"));
    }

    #[test]
    fn line_numbers_mark_each_line() {
        let html = highlight_code("rust", "let a = 1;\nlet b = 2;\n", THEME, true).unwrap();
        assert!(html.starts_with("<pre class=\"highlight line-numbers\""), "{html}");
        assert!(html.contains("<span class=\"line-number\">1</span>"));
        assert!(html.contains("<span class=\"line-number\">2</span>"));
        assert!(!html.contains("<span class=\"line-number\">3</span>"));
    }

    #[test]
    fn unknown_language_falls_back_to_plain_text() {
        let html = highlight_code("no-such-lang", "a < b\n", THEME, false).unwrap();
        assert!(html.contains("<code class=\"language-no-such-lang\">"));
        assert!(html.contains("a &lt; b"), "{html}");
    }

    #[test]
    fn syntax_lookup_by_token_name_or_extension() {
        assert!(has_syntax("rust"));
        assert!(has_syntax("Python"));
        assert!(has_syntax("rs"));
        assert!(!has_syntax("no-such-lang"));
        assert!(!has_syntax(""));
    }

    #[test]
    fn unknown_theme_is_an_error() {
        assert!(matches!(
            highlight_code("rust", "x\n", "no-such-theme", false),
            Err(HighlightError::UnknownTheme(name)) if name == "no-such-theme"
        ));
    }

    #[test]
    fn default_theme_is_bundled() {
        assert!(has_theme(THEME));
        assert!(theme_names().contains(&THEME));
    }
}
