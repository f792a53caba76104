//! Main-content extraction from noisy HTML pages.
//!
//! The extractor strips obvious noise (scripts, comments, ads, navigation,
//! footers, sidebars), then picks the subtree most likely to be the article:
//! a well-known content container if one carries enough text, otherwise the
//! best-scoring `div`/`article`/`section`, otherwise the whole body.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use webmark_shared::{ContentSettings, Link};

/// Minimum text length for a priority container to be accepted as-is.
pub const MIN_CANDIDATE_TEXT: usize = 100;

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static ALWAYS_REMOVE: LazyLock<Selector> =
    LazyLock::new(|| selector("script, style, noscript, template"));

static NAVIGATION: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        "nav, header, [role=navigation], [role=banner], .nav, .navbar, .navigation, .menu, \
         .breadcrumb, .breadcrumbs, #nav, #navigation, #menu, .skip-link",
    )
});

static FOOTER: LazyLock<Selector> =
    LazyLock::new(|| selector("footer, [role=contentinfo], .footer, .site-footer, #footer"));

static SIDEBAR: LazyLock<Selector> = LazyLock::new(|| {
    selector("aside, [role=complementary], .sidebar, .side-bar, .widget-area, #sidebar")
});

static ANY_ELEMENT: LazyLock<Selector> = LazyLock::new(|| selector("*"));

static CONTAINERS: LazyLock<Selector> =
    LazyLock::new(|| selector("div, section, span, p, ul, ol, li, figure, center, font"));

static PRIORITY_CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "main",
        "article",
        "[role=main]",
        ".post-content",
        ".entry-content",
        ".article-content",
        ".article-body",
        ".post-body",
        ".markdown-body",
        ".main-content",
        "#main-content",
        ".content",
        "#content",
    ]
    .iter()
    .map(|css| selector(css))
    .collect()
});

static SCORED_CANDIDATES: LazyLock<Selector> = LazyLock::new(|| selector("div, article, section"));

static TITLE_CLASSES: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        "[itemprop=headline], .entry-title, .post-title, .article-title, .page-title, .title",
    )
});

static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static P: LazyLock<Selector> = LazyLock::new(|| selector("p"));
static A: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static A_HREF: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static IMG: LazyLock<Selector> = LazyLock::new(|| selector("img"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));
static HTML: LazyLock<Selector> = LazyLock::new(|| selector("html"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static META: LazyLock<Selector> = LazyLock::new(|| selector("meta[content]"));
static CANONICAL: LazyLock<Selector> = LazyLock::new(|| selector("link[rel=canonical][href]"));

const MEDIA_TAGS: &[&str] = &[
    "img", "picture", "video", "audio", "iframe", "svg", "canvas", "object", "embed", "table",
    "pre", "code", "hr", "br", "input",
];

/// Class/id fragments that mark advertising.
const AD_HINTS: &[&str] = &[
    "advert",
    "adsbygoogle",
    "adsense",
    "ad-container",
    "ad-slot",
    "ad-banner",
    "ad-wrapper",
    "banner-ad",
    "sponsor",
    "promo",
    "popup",
    "doubleclick",
];

const STANDARD_META: &[&str] = &[
    "description",
    "keywords",
    "author",
    "generator",
    "robots",
    "theme-color",
    "application-name",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which noise classes to strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub remove_ads: bool,
    pub remove_navigation: bool,
    pub remove_footer: bool,
    pub remove_sidebar: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            remove_ads: true,
            remove_navigation: true,
            remove_footer: true,
            remove_sidebar: true,
        }
    }
}

impl From<&ContentSettings> for ExtractOptions {
    fn from(s: &ContentSettings) -> Self {
        Self {
            remove_ads: s.remove_ads,
            remove_navigation: s.remove_navigation,
            remove_footer: s.remove_footer,
            remove_sidebar: s.remove_sidebar,
        }
    }
}

/// What the extractor found in a page.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub title: Option<String>,
    /// Outer HTML of the chosen content subtree.
    pub content_html: String,
    pub images: Vec<String>,
    pub links: Vec<Link>,
    pub metadata: BTreeMap<String, String>,
}

/// How the main content was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    Priority,
    Scored,
    Body,
}

/// Heuristic content extractor.
#[derive(Debug, Clone, Default)]
pub struct ContentExtractor {
    options: ExtractOptions,
}

impl ContentExtractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    /// Extract the main content of `html`, resolving URLs against `base_url`.
    #[instrument(skip_all, fields(url = %base_url))]
    pub fn extract(&self, html: &str, base_url: &Url) -> Extracted {
        let mut doc = Html::parse_document(html);
        let metadata = extract_metadata(&doc, base_url);

        self.strip_noise(&mut doc);
        drop_empty_containers(&mut doc);

        let title = extract_title(&doc);
        let (content, source) = find_main_content(&doc);
        debug!(?source, "located main content");

        let (content_html, images, links) = match content {
            Some(el) => (el.html(), extract_images(el, base_url), extract_links(el, base_url)),
            None => (String::new(), Vec::new(), Vec::new()),
        };

        Extracted {
            title,
            content_html,
            images,
            links,
            metadata,
        }
    }

    fn strip_noise(&self, doc: &mut Html) {
        let mut doomed: Vec<_> = doc.select(&ALWAYS_REMOVE).map(|el| el.id()).collect();
        doomed.extend(
            doc.tree
                .nodes()
                .filter(|n| n.value().is_comment())
                .map(|n| n.id()),
        );

        if self.options.remove_navigation {
            doomed.extend(
                doc.select(&NAVIGATION)
                    .filter(|el| !is_structural(el) && !inside_content(el))
                    .map(|el| el.id()),
            );
        }
        if self.options.remove_footer {
            doomed.extend(
                doc.select(&FOOTER)
                    .filter(|el| !is_structural(el))
                    .map(|el| el.id()),
            );
        }
        if self.options.remove_sidebar {
            doomed.extend(
                doc.select(&SIDEBAR)
                    .filter(|el| !is_structural(el))
                    .map(|el| el.id()),
            );
        }
        if self.options.remove_ads {
            doomed.extend(
                doc.select(&ANY_ELEMENT)
                    .filter(|el| !is_structural(el) && looks_like_ad(el))
                    .map(|el| el.id()),
            );
        }

        debug!(removed = doomed.len(), "stripping noise");
        for id in doomed {
            if let Some(mut node) = doc.tree.get_mut(id) {
                node.detach();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Noise classification
// ---------------------------------------------------------------------------

/// Elements that are never removed by class/id heuristics.
fn is_structural(el: &ElementRef) -> bool {
    matches!(el.value().name(), "html" | "head" | "body" | "main" | "article")
}

/// `<header>` inside the article usually holds its title.
fn inside_content(el: &ElementRef) -> bool {
    el.value().name() == "header"
        && el.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "article" | "main"))
        })
}

fn class_and_id(el: &ElementRef) -> String {
    let mut s = String::new();
    if let Some(class) = el.value().attr("class") {
        s.push_str(class);
    }
    if let Some(id) = el.value().id() {
        s.push(' ');
        s.push_str(id);
    }
    s.to_ascii_lowercase()
}

fn looks_like_ad(el: &ElementRef) -> bool {
    let names = class_and_id(el);
    if names.is_empty() {
        return false;
    }
    if AD_HINTS.iter().any(|hint| names.contains(hint)) {
        return true;
    }
    names.split_whitespace().any(|token| {
        token == "ad"
            || token == "ads"
            || token.starts_with("ad-")
            || token.starts_with("ads-")
            || token.ends_with("-ad")
            || token.ends_with("-ads")
    })
}

/// Elements that count against a scoring candidate.
fn is_bad_descendant(el: &ElementRef) -> bool {
    matches!(
        el.value().name(),
        "script" | "style" | "nav" | "aside" | "footer"
    )
}

fn drop_empty_containers(doc: &mut Html) {
    let empty: Vec<_> = doc
        .select(&CONTAINERS)
        .filter(|el| text_len(el) == 0 && !has_media(el) && !inside_pre(el))
        .map(|el| el.id())
        .collect();
    for id in empty {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn inside_pre(el: &ElementRef) -> bool {
    el.ancestors().any(|a| {
        a.value()
            .as_element()
            .is_some_and(|e| matches!(e.name(), "pre" | "code"))
    })
}

fn has_media(el: &ElementRef) -> bool {
    el.descendants().any(|n| {
        n.value()
            .as_element()
            .is_some_and(|e| MEDIA_TAGS.contains(&e.name()))
    })
}

// ---------------------------------------------------------------------------
// Title
// ---------------------------------------------------------------------------

fn extract_title(doc: &Html) -> Option<String> {
    let from_h1 = doc.select(&H1).map(|el| collapsed_text(&el)).find(|t| !t.is_empty());
    if from_h1.is_some() {
        return from_h1;
    }

    let from_class = doc
        .select(&TITLE_CLASSES)
        .map(|el| collapsed_text(&el))
        .find(|t| !t.is_empty());
    if from_class.is_some() {
        return from_class;
    }

    let from_og = doc
        .select(&META)
        .find(|el| el.value().attr("property") == Some("og:title"))
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|t| !t.is_empty());
    if from_og.is_some() {
        return from_og;
    }

    doc.select(&TITLE)
        .map(|el| collapsed_text(&el))
        .find(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Main content
// ---------------------------------------------------------------------------

fn find_main_content(doc: &Html) -> (Option<ElementRef<'_>>, ContentSource) {
    for sel in PRIORITY_CONTENT.iter() {
        if let Some(el) = doc.select(sel).find(|el| text_len(el) >= MIN_CANDIDATE_TEXT) {
            return (Some(el), ContentSource::Priority);
        }
    }

    let mut best: Option<(f64, ElementRef)> = None;
    for el in doc.select(&SCORED_CANDIDATES) {
        let score = score_candidate(&el);
        if score > 0.0 && best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, el));
        }
    }
    if let Some((score, el)) = best {
        debug!(score, "picked highest-scoring candidate");
        return (Some(el), ContentSource::Scored);
    }

    (doc.select(&BODY).next(), ContentSource::Body)
}

/// `0.3*text + 10*paragraphs - 0.2*link_density*text - 50*bad_descendants`,
/// where bad descendants are `script`, `style`, `nav`, `aside` and `footer`
/// elements.
pub fn score_candidate(el: &ElementRef) -> f64 {
    let text = text_len(el) as f64;
    if text == 0.0 {
        return 0.0;
    }
    let paragraphs = el.select(&P).count() as f64;
    let anchor_text: usize = el.select(&A).map(|a| text_len(&a)).sum();
    let link_density = anchor_text as f64 / text;
    let bad = el
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(is_bad_descendant)
        .count() as f64;

    0.3 * text + 10.0 * paragraphs - 0.2 * link_density * text - 50.0 * bad
}

// ---------------------------------------------------------------------------
// Images, links, metadata
// ---------------------------------------------------------------------------

fn extract_images(root: ElementRef, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    root.select(&IMG)
        .filter_map(|img| {
            let src = img
                .value()
                .attr("src")
                .filter(|s| !s.trim().is_empty() && !s.starts_with("data:"))
                .or_else(|| img.value().attr("data-src"))?;
            absolute(base_url, src)
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

fn extract_links(root: ElementRef, base_url: &Url) -> Vec<Link> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for el in root.select(&A_HREF) {
        let Some(href) = el.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }
        let Some(url) = absolute(base_url, href) else {
            continue;
        };
        let text = collapsed_text(&el);
        if seen.insert((text.clone(), url.clone())) {
            links.push(Link { text, url });
        }
    }

    links
}

fn extract_metadata(doc: &Html, base_url: &Url) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();

    for el in doc.select(&META) {
        let Some(content) = el.value().attr("content").map(str::trim) else {
            continue;
        };
        if content.is_empty() {
            continue;
        }
        let key = el
            .value()
            .attr("property")
            .or_else(|| el.value().attr("name"))
            .map(str::to_ascii_lowercase);
        let Some(key) = key else {
            continue;
        };

        let wanted = key.starts_with("og:")
            || key.starts_with("twitter:")
            || key.starts_with("article:")
            || STANDARD_META.contains(&key.as_str());
        if wanted {
            meta.entry(key).or_insert_with(|| content.to_string());
        }
    }

    if let Some(href) = doc
        .select(&CANONICAL)
        .next()
        .and_then(|el| el.value().attr("href"))
    {
        if let Some(url) = absolute(base_url, href) {
            meta.insert("canonical".into(), url);
        }
    }

    if let Some(lang) = doc
        .select(&HTML)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(str::trim)
        .filter(|l| !l.is_empty())
    {
        meta.insert("lang".into(), lang.to_string());
    }

    meta
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn absolute(base_url: &Url, href: &str) -> Option<String> {
    let mut url = base_url.join(href.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    if url.fragment() == Some("") {
        url.set_fragment(None);
    }
    Some(url.to_string())
}

fn collapsed_text(el: &ElementRef) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Visible text length in characters, whitespace collapsed.
fn text_len(el: &ElementRef) -> usize {
    let mut len = 0;
    let mut first = true;
    for word in el.text().flat_map(str::split_whitespace) {
        if !first {
            len += 1;
        }
        len += word.chars().count();
        first = false;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/blog/post").unwrap()
    }

    fn long_paragraph(word: &str) -> String {
        std::iter::repeat_n(word, 60).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn strips_nav_and_footer_around_article() {
        let html = format!(
            r#"<html><head><title>Doc</title></head><body>
            <nav><a href="/">Home</a><a href="/about">About</a></nav>
            <article><h1>Real Title</h1><p>{}</p></article>
            <footer><p>Copyright 2024 Example Corp</p></footer>
            </body></html>"#,
            long_paragraph("content")
        );

        let out = ContentExtractor::default().extract(&html, &base());
        assert_eq!(out.title.as_deref(), Some("Real Title"));
        assert!(out.content_html.contains("content content"));
        assert!(!out.content_html.contains("Copyright"));
        assert!(!out.content_html.contains("About"));
    }

    #[test]
    fn keeps_noise_when_disabled() {
        let html = format!(
            r#"<html><body><div id="wrap">
            <nav>Site navigation links</nav>
            <p>{}</p></div></body></html>"#,
            long_paragraph("text")
        );
        let options = ExtractOptions {
            remove_navigation: false,
            ..ExtractOptions::default()
        };
        let out = ContentExtractor::new(options).extract(&html, &base());
        assert!(out.content_html.contains("Site navigation links"));
    }

    #[test]
    fn removes_ads_but_not_headers() {
        let html = format!(
            r#"<html><body><main>
            <div class="page-header"><h1>Heading</h1></div>
            <div class="ad-banner">Buy now</div>
            <ins class="adsbygoogle">ad slot</ins>
            <div class="sponsored-post">Sponsored</div>
            <p>{}</p></main></body></html>"#,
            long_paragraph("body")
        );
        let out = ContentExtractor::default().extract(&html, &base());
        assert!(out.content_html.contains("Heading"));
        assert!(!out.content_html.contains("Buy now"));
        assert!(!out.content_html.contains("ad slot"));
        assert!(!out.content_html.contains("Sponsored"));
    }

    #[test]
    fn short_priority_container_falls_through_to_scoring() {
        let html = format!(
            r#"<html><body>
            <main><p>tiny</p></main>
            <div class="story"><p>{}</p><p>{}</p></div>
            </body></html>"#,
            long_paragraph("alpha"),
            long_paragraph("beta")
        );
        let doc = Html::parse_document(&html);
        let (el, source) = find_main_content(&doc);
        assert_eq!(source, ContentSource::Scored);
        assert!(el.unwrap().html().contains("alpha"));
    }

    #[test]
    fn link_heavy_blocks_score_lower() {
        let text = long_paragraph("word");
        let prose = Html::parse_fragment(&format!("<div><p>{text}</p></div>"));
        let links = Html::parse_fragment(&format!("<div><a href='/x'>{text}</a></div>"));
        let div = selector("div");
        let prose_score = score_candidate(&prose.select(&div).next().unwrap());
        let link_score = score_candidate(&links.select(&div).next().unwrap());
        assert!(prose_score > link_score);
    }

    #[test]
    fn only_structural_noise_is_penalized() {
        let share = Html::parse_fragment(&format!(
            r#"<div><p>{}</p><div class="share-tools">Share</div></div>"#,
            long_paragraph("alpha")
        ));
        let plain = Html::parse_fragment(&format!("<div><p>{}</p></div>", long_paragraph("alpha")));
        let with_nav = Html::parse_fragment(&format!(
            "<div><p>{}</p><nav>Home</nav></div>",
            long_paragraph("alpha")
        ));
        let div = selector("div");
        let score = |doc: &Html| score_candidate(&doc.select(&div).next().unwrap());

        let share_text = long_paragraph("alpha").len() as f64 + " Share".len() as f64;
        let expected = 0.3 * share_text + 10.0;
        assert!((score(&share) - expected).abs() < 1e-6);
        assert!(score(&share) > score(&plain));
        assert!(score(&with_nav) < score(&plain) - 40.0);
    }

    #[test]
    fn title_fallback_order() {
        let og = r#"<html><head><title>Tab Title</title>
            <meta property="og:title" content="OG Title"></head><body></body></html>"#;
        let doc = Html::parse_document(og);
        assert_eq!(extract_title(&doc).as_deref(), Some("OG Title"));

        let plain = "<html><head><title> Tab Title </title></head><body></body></html>";
        let doc = Html::parse_document(plain);
        assert_eq!(extract_title(&doc).as_deref(), Some("Tab Title"));

        let classed = r#"<html><body><span class="post-title">Classy</span></body></html>"#;
        let doc = Html::parse_document(classed);
        assert_eq!(extract_title(&doc).as_deref(), Some("Classy"));
    }

    #[test]
    fn images_and_links_are_absolute() {
        let html = format!(
            r##"<html><body><article><p>{}</p>
            <img src="/img/a.png"><img data-src="lazy.jpg"><img src="/img/a.png">
            <a href="/next">Next page</a>
            <a href="#top">Top</a>
            <a href="javascript:void(0)">JS</a>
            <a href="mailto:me@example.com">Mail</a>
            </article></body></html>"##,
            long_paragraph("x")
        );
        let out = ContentExtractor::default().extract(&html, &base());
        assert_eq!(
            out.images,
            vec![
                "https://example.com/img/a.png".to_string(),
                "https://example.com/blog/lazy.jpg".to_string(),
            ]
        );
        assert_eq!(
            out.links,
            vec![Link {
                text: "Next page".into(),
                url: "https://example.com/next".into()
            }]
        );
    }

    #[test]
    fn metadata_from_meta_tags() {
        let html = r#"<html lang="en"><head>
            <meta property="og:title" content="OG">
            <meta name="twitter:card" content="summary">
            <meta name="description" content="A page">
            <meta name="viewport" content="width=device-width">
            <link rel="canonical" href="/canonical">
            </head><body><p>hi</p></body></html>"#;
        let out = ContentExtractor::default().extract(html, &base());
        assert_eq!(out.metadata.get("og:title").map(String::as_str), Some("OG"));
        assert_eq!(out.metadata.get("twitter:card").map(String::as_str), Some("summary"));
        assert_eq!(out.metadata.get("description").map(String::as_str), Some("A page"));
        assert_eq!(
            out.metadata.get("canonical").map(String::as_str),
            Some("https://example.com/canonical")
        );
        assert_eq!(out.metadata.get("lang").map(String::as_str), Some("en"));
        assert!(!out.metadata.contains_key("viewport"));
    }

    #[test]
    fn empty_containers_dropped_media_kept() {
        let html = format!(
            r#"<html><body><article><p>{}</p>
            <div class="spacer">   </div>
            <div class="figure"><img src="/f.png"></div>
            </article></body></html>"#,
            long_paragraph("y")
        );
        let out = ContentExtractor::default().extract(&html, &base());
        assert!(!out.content_html.contains("spacer"));
        assert!(out.content_html.contains("f.png"));
    }
}
