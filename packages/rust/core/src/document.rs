//! Render pipeline outcomes as standalone Markdown documents.

use std::fmt::Write as _;

use webmark_shared::FetchResult;

use crate::pipeline::FetchOutcome;

/// Header fields for [`render`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions<'a> {
    /// Name of the configured website the page was fetched for.
    pub website: Option<&'a str>,
    /// Emit reading time, word count, language and summary lines.
    pub include_metrics: bool,
}

/// Render any outcome. API descriptions already carry their own header.
pub fn render(outcome: &FetchOutcome, opts: RenderOptions<'_>) -> String {
    match outcome {
        FetchOutcome::Page(page) => render_page(page, opts),
        FetchOutcome::OpenApi { document, .. } => match opts.website {
            Some(name) => format!("**Website:** {name}\n\n{}", document.formatted),
            None => document.formatted.clone(),
        },
    }
}

/// `# title`, source lines, optional metrics, `---`, then the body.
pub fn render_page(page: &FetchResult, opts: RenderOptions<'_>) -> String {
    let mut doc = String::with_capacity(page.markdown.len() + 256);

    let _ = writeln!(doc, "# {}\n", page.title);
    let _ = writeln!(doc, "**Source:** {}", page.url);
    if let Some(name) = opts.website {
        let _ = writeln!(doc, "**Website:** {name}");
    }

    if opts.include_metrics {
        doc.push('\n');
        let _ = writeln!(
            doc,
            "**Reading time:** {} min | **Words:** {} | **Language:** {}",
            page.reading_time_minutes, page.word_count, page.language
        );
        if !page.summary.is_empty() {
            let _ = writeln!(doc, "**Summary:** {}", page.summary);
        }
    }

    doc.push_str("\n---\n\n");
    doc.push_str(&page.markdown);
    doc.push('\n');
    doc
}
