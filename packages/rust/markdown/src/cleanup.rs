//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Passes that touch line starts or inline syntax skip fenced code blocks.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.replace("\r\n", "\n");

    result = strip_leftover_html(&result);
    result = trim_trailing_whitespace(&result);
    result = normalize_list_markers(&result);
    result = fix_code_block_languages(&result);
    result = resolve_links(&result, base_url);
    result = bare_empty_links(&result);
    result = collapse_blank_lines(&result);

    result.trim().to_string()
}

/// Apply `f` to every line outside fenced code blocks.
fn map_prose_lines(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            out.push(line.to_string());
        } else if in_code_block {
            out.push(line.to_string());
        } else {
            out.push(f(line));
        }
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Layout tags
// ---------------------------------------------------------------------------

/// Remove stray layout tags that survived the conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static LAYOUT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|main|nav|figure|figcaption|details|summary|center|font)(?:\s[^>]*)?/?>",
        )
        .expect("valid regex")
    });

    map_prose_lines(md, |line| LAYOUT_TAG_RE.replace_all(line, "").to_string())
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

fn trim_trailing_whitespace(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// Runs of blank lines become exactly one blank line.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// List markers
// ---------------------------------------------------------------------------

/// Bullets become `- `, numbering becomes `1. `, each with a single space.
fn normalize_list_markers(md: &str) -> String {
    static BULLET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\s*)[-*+]\s+").expect("valid regex"));
    static NUMBERED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\s*)(\d+)[.)]\s+").expect("valid regex"));
    static RULE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*([*+-])(\s*[*+-]){2,}\s*$").expect("valid regex"));

    map_prose_lines(md, |line| {
        if RULE_RE.is_match(line) {
            return line.to_string();
        }
        let line = BULLET_RE.replace(line, "${1}- ");
        NUMBERED_RE.replace(&line, "${1}${2}. ").to_string()
    })
}

// ---------------------------------------------------------------------------
// Code fences
// ---------------------------------------------------------------------------

/// Strip class-like prefixes from fence languages (`language-js` -> `js`).
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(\s*)```(?:language-|lang-|highlight-(?:source-)?)([\w+#-]+)")
            .expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "${1}```${2}").to_string()
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(!?)\[([^\]]*)\]\(([^)\s]+)(\s+"[^"]*")?\)"#).expect("valid regex")
});

/// `[](https://x)` carries no text; show the URL itself instead.
fn bare_empty_links(md: &str) -> String {
    map_prose_lines(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &Captures| {
                if caps[1].is_empty() && caps[2].trim().is_empty() {
                    caps[3].to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .to_string()
    })
}

/// Resolve relative URLs in links and images against a base URL.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    map_prose_lines(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &Captures| {
                let href = &caps[3];
                if href.starts_with("http://")
                    || href.starts_with("https://")
                    || href.starts_with('#')
                    || href.starts_with("mailto:")
                    || href.starts_with("data:")
                {
                    return caps[0].to_string();
                }

                match base.join(href) {
                    Ok(resolved) => format!(
                        "{}[{}]({}{})",
                        &caps[1],
                        &caps[2],
                        resolved,
                        caps.get(4).map_or("", |m| m.as_str())
                    ),
                    Err(_) => caps[0].to_string(),
                }
            })
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
