//! HTML content extraction, HTML-to-Markdown conversion, and text analysis.
//!
//! [`ContentExtractor`] picks the main content out of a page, [`convert`]
//! turns it into Markdown with `htmd` plus a set of cleanup passes, and
//! [`analyze`] computes reading metrics over the result.

mod analyze;
mod cleanup;
mod extract;

use std::sync::LazyLock;

use htmd::Element;
use htmd::options::{BulletListMarker, CodeBlockStyle, HeadingStyle, Options};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use webmark_shared::{ContentSettings, Result, WebmarkError};

pub use analyze::{
    Analysis, WORDS_PER_MINUTE, analyze, detect_language, plain_text, reading_time, summarize,
    word_count,
};
pub use extract::{
    ContentExtractor, ContentSource, Extracted, ExtractOptions, MIN_CANDIDATE_TEXT,
    score_candidate,
};

/// Appended to Markdown cut at the maximum length.
pub const TRUNCATION_MARKER: &str = "\n\n... (content truncated)";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for the HTML-to-Markdown conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Base for resolving relative links.
    pub base_url: Option<Url>,
    /// Shorter output fails with [`WebmarkError::ContentLength`].
    pub min_length: usize,
    /// Longer output is truncated and marked.
    pub max_length: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from(&ContentSettings::default())
    }
}

impl From<&ContentSettings> for ConvertOptions {
    fn from(s: &ContentSettings) -> Self {
        Self {
            base_url: None,
            min_length: s.min_length,
            max_length: s.max_length,
        }
    }
}

impl ConvertOptions {
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert HTML to clean Markdown.
///
/// 1. Pre-renders `<table>` elements as Markdown tables
/// 2. Converts HTML → Markdown via `htmd` with extended rules
/// 3. Runs the cleanup pipeline
/// 4. Enforces the length bounds
#[instrument(skip_all, fields(url = opts.base_url.as_ref().map(Url::as_str).unwrap_or("")))]
pub fn convert(html: &str, opts: &ConvertOptions) -> Result<String> {
    let (html, tables) = extract_tables(html);

    let raw_markdown = converter()
        .convert(&html)
        .map_err(|e| WebmarkError::parse(format!("htmd conversion failed: {e}")))?;
    debug!(raw_len = raw_markdown.len(), tables = tables.len(), "htmd conversion complete");

    let raw_markdown = restore_tables(&raw_markdown, &tables);
    let cleaned = cleanup::run_pipeline(&raw_markdown, opts.base_url.as_ref());

    let length = cleaned.chars().count();
    if length < opts.min_length {
        return Err(WebmarkError::ContentLength {
            length,
            minimum: opts.min_length,
        });
    }

    if length > opts.max_length {
        debug!(length, max = opts.max_length, "truncating markdown");
        let mut truncated: String = cleaned.chars().take(opts.max_length).collect();
        truncated.truncate(truncated.trim_end().len());
        truncated.push_str(TRUNCATION_MARKER);
        return Ok(truncated);
    }

    Ok(cleaned)
}

fn converter() -> htmd::HtmlToMarkdown {
    htmd::HtmlToMarkdown::builder()
        .options(Options {
            heading_style: HeadingStyle::Atx,
            code_block_style: CodeBlockStyle::Fenced,
            bullet_list_marker: BulletListMarker::Dash,
            ..Default::default()
        })
        .skip_tags(vec!["script", "style", "noscript", "iframe", "svg", "template"])
        .add_handler(vec!["del", "s", "strike"], |el: Element| {
            Some(wrap_inline(el.content, "~~", "~~"))
        })
        .add_handler(vec!["u", "ins"], |el: Element| {
            Some(wrap_inline(el.content, "<u>", "</u>"))
        })
        .add_handler(vec!["mark"], |el: Element| {
            Some(wrap_inline(el.content, "==", "=="))
        })
        .add_handler(vec!["kbd"], |el: Element| {
            Some(wrap_inline(el.content, "`", "`"))
        })
        .add_handler(vec!["abbr"], |el: Element| {
            let title = el
                .attrs
                .iter()
                .find(|a| &*a.name.local == "title")
                .map(|a| a.value.to_string())
                .filter(|t| !t.trim().is_empty());
            Some(match title {
                Some(title) => format!("{} ({})", el.content.trim(), title.trim()),
                None => el.content.to_string(),
            })
        })
        .add_handler(vec!["dl"], |el: Element| {
            Some(format!("\n\n{}\n\n", el.content.trim()))
        })
        .add_handler(vec!["dt"], |el: Element| {
            Some(format!("\n\n**{}**\n", el.content.trim()))
        })
        .add_handler(vec!["dd"], |el: Element| {
            Some(format!(": {}\n", el.content.trim()))
        })
        .build()
}

fn wrap_inline(content: &str, open: &str, close: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{open}{trimmed}{close}")
}

/// First H1 of a Markdown document.
pub fn title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE
        .captures(md)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

static TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

fn placeholder(i: usize) -> String {
    format!("WEBMARKTABLE{i}X")
}

/// Swap each outermost `<table>` for a placeholder paragraph and return the
/// Markdown rendering of each table.
///
/// `htmd` 0.1 has no table support, so tables are rendered here and spliced
/// back in after conversion.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let doc = Html::parse_fragment(html);
    if doc.select(&TABLE).next().is_none() {
        return (html.to_string(), Vec::new());
    }

    // Serialize once so table markup matches byte-for-byte below.
    let mut result = doc.root_element().inner_html();
    let mut tables = Vec::new();

    for table in doc.select(&TABLE) {
        let outer = table.html();
        if !result.contains(&outer) {
            // Nested inside a table that was already replaced.
            continue;
        }
        let marker = format!("<p>{}</p>", placeholder(tables.len()));
        result = result.replacen(&outer, &marker, 1);
        tables.push(html_table_to_markdown(&table));
    }

    (result, tables)
}

fn restore_tables(md: &str, tables: &[String]) -> String {
    let mut out = md.to_string();
    for (i, table) in tables.iter().enumerate() {
        out = out.replacen(&placeholder(i), table, 1);
    }
    out
}

/// Convert a single HTML table element to a markdown table string.
fn html_table_to_markdown(table: &ElementRef) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for tr in table.select(&ROW) {
        let mut cells = Vec::new();
        let mut all_th = true;
        for cell in tr.select(&CELL) {
            all_th &= cell.value().name() == "th";
            cells.push(cell_text(&cell));
        }
        if cells.is_empty() {
            continue;
        }
        if rows.is_empty() && all_th {
            has_header = true;
        }
        rows.push(cells);
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    // Without a header row, an empty one keeps the table valid Markdown.
    let header = if has_header {
        rows.remove(0)
    } else {
        vec![String::new(); col_count]
    };

    let mut md = String::new();
    push_row(&mut md, &header);
    push_row(&mut md, &vec!["---".to_string(); col_count]);
    for row in &rows {
        push_row(&mut md, row);
    }
    md.pop();
    md
}

fn push_row(md: &mut String, cells: &[String]) {
    md.push_str("| ");
    md.push_str(&cells.join(" | "));
    md.push_str(" |\n");
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
