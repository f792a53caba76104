//! Reading metrics for converted Markdown: word count, reading time,
//! language and an extractive summary.

use std::sync::LazyLock;

use regex::Regex;

/// Average reading speed, words per minute.
pub const WORDS_PER_MINUTE: usize = 225;

/// Share of CJK characters above which a text is classified as Chinese.
const CJK_RATIO: f64 = 0.3;

/// Sentence fragments this short (in characters) never make it into a summary.
const MIN_SENTENCE_CHARS: usize = 10;

/// Metrics computed from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub word_count: usize,
    pub reading_time_minutes: usize,
    pub language: String,
    pub summary: String,
}

/// Compute all metrics for `markdown`.
pub fn analyze(markdown: &str, summary_length: usize) -> Analysis {
    let text = plain_text(markdown);
    let word_count = word_count(&text);
    Analysis {
        word_count,
        reading_time_minutes: reading_time(word_count),
        language: detect_language(&text).to_string(),
        summary: summarize(&text, summary_length),
    }
}

pub fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' | '\u{f900}'..='\u{faff}')
}

/// Strip Markdown syntax that is not prose.
pub fn plain_text(markdown: &str) -> String {
    static FENCED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?(```|\z)").expect("valid regex"));
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
    static INLINE_CODE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"`([^`]*)`").expect("valid regex"));
    // One pattern per delimiter, longest first.
    static EMPHASIS_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        [
            r"\*\*\*(\S(?:.*?\S)?)\*\*\*",
            r"\b___(\S(?:.*?\S)?)___\b",
            r"\*\*(\S(?:.*?\S)?)\*\*",
            r"\b__(\S(?:.*?\S)?)__\b",
            r"\*(\S(?:.*?\S)?)\*",
            r"\b_(\S(?:.*?\S)?)_\b",
            r"~~(\S(?:.*?\S)?)~~",
            r"==(\S(?:.*?\S)?)==",
        ]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
        .collect()
    });
    static LINE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^[ \t]*(?:#{1,6}[ \t]+|>[ \t]?|[-*+][ \t]+|\d+\.[ \t]+|:[ \t]+)")
            .expect("valid regex")
    });
    static RULE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^[ \t]*(?:-{3,}|\*{3,}|\|?[ \t:|-]+\|[ \t:|-]*)$").expect("valid regex")
    });
    static HTML_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid regex"));

    let text = FENCED_RE.replace_all(markdown, " ");
    let text = IMAGE_RE.replace_all(&text, " ");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = INLINE_CODE_RE.replace_all(&text, "$1");
    let mut text = text.into_owned();
    for re in EMPHASIS_RES.iter() {
        text = re.replace_all(&text, "$1").into_owned();
    }
    let text = RULE_RE.replace_all(&text, "");
    let text = LINE_PREFIX_RE.replace_all(&text, "");
    let text = HTML_TAG_RE.replace_all(&text, "");
    text.replace('|', " ")
}

/// CJK ideographs count one word each; everything else is split on whitespace.
pub fn word_count(text: &str) -> usize {
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    let rest: String = text
        .chars()
        .map(|c| if is_cjk(c) { ' ' } else { c })
        .collect();
    cjk + rest.split_whitespace().count()
}

/// Whole minutes, rounded up. Zero words take zero minutes.
pub fn reading_time(word_count: usize) -> usize {
    word_count.div_ceil(WORDS_PER_MINUTE)
}

/// `zh` when CJK characters make up more than 30% of non-whitespace text.
pub fn detect_language(text: &str) -> &'static str {
    let mut total = 0usize;
    let mut cjk = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if is_cjk(c) {
            cjk += 1;
        }
    }
    if total > 0 && cjk as f64 / total as f64 > CJK_RATIO {
        "zh"
    } else {
        "en"
    }
}

/// Leading sentences that fit in `max_chars`.
///
/// Falls back to a truncated first sentence when no sentence qualifies.
pub fn summarize(text: &str, max_chars: usize) -> String {
    let sentences = split_sentences(text);

    let mut summary = String::new();
    let mut len = 0usize;
    for sentence in sentences
        .iter()
        .filter(|s| s.chars().count() > MIN_SENTENCE_CHARS)
    {
        let add = sentence.chars().count() + usize::from(!summary.is_empty());
        if len + add > max_chars {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(sentence);
        len += add;
    }
    if !summary.is_empty() {
        return summary;
    }

    match sentences.first() {
        Some(first) => truncate_chars(first, max_chars),
        None => String::new(),
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(if c.is_whitespace() { ' ' } else { c });
        if matches!(c, '.' | '!' | '?' | '。' | '！' | '？') {
            push_sentence(&mut sentences, &current);
            current.clear();
        }
    }
    push_sentence(&mut sentences, &current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        sentences.push(collapsed);
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_cjk_and_latin_words() {
        assert_eq!(word_count("hello world"), 2);
        assert_eq!(word_count("你好世界"), 4);
        assert_eq!(word_count("Rust 语言 rocks"), 4);
        assert_eq!(word_count("   "), 0);
    }

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(reading_time(0), 0);
        assert_eq!(reading_time(1), 1);
        assert_eq!(reading_time(225), 1);
        assert_eq!(reading_time(226), 2);
    }

    #[test]
    fn language_threshold() {
        assert_eq!(detect_language("This is English text"), "en");
        assert_eq!(detect_language("这是中文文本 with English"), "zh");
        assert_eq!(detect_language(""), "en");
    }

    #[test]
    fn plain_text_drops_markdown_syntax() {
        let md = "# Title\n\nSome **bold** and [a link](https://x.io) here.\n\n![img](a.png)\n\n```rust\nlet code = 1;\n```\n\n- item `inline`";
        let text = plain_text(md);
        assert!(text.contains("Title"));
        assert!(text.contains("Some bold and a link here."));
        assert!(text.contains("item inline"));
        assert!(!text.contains("https://x.io"));
        assert!(!text.contains("a.png"));
        assert!(!text.contains("let code"));
        assert!(!text.contains('#'));
    }

    #[test]
    fn plain_text_drops_every_emphasis_delimiter() {
        let md = "***all*** **strong** *em* __under__ _it_ ~~gone~~ ==marked== keep snake_case_name";
        assert_eq!(
            plain_text(md),
            "all strong em under it gone marked keep snake_case_name"
        );
    }

    #[test]
    fn summary_skips_fragments_and_respects_cap() {
        let text = "Hi. This is the first real sentence. And here is a second one! Third sentence is long enough too?";
        let summary = summarize(text, 70);
        assert_eq!(
            summary,
            "This is the first real sentence. And here is a second one!"
        );
    }

    #[test]
    fn summary_falls_back_to_truncated_first_sentence() {
        let text = "An extremely long opening sentence that will never fit in the tiny cap.";
        let summary = summarize(text, 20);
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= 20);
    }

    #[test]
    fn summary_handles_cjk_terminators() {
        let text = "这是第一个比较长的中文句子内容。这是第二个同样很长的中文句子！";
        let summary = summarize(text, 200);
        assert!(summary.starts_with("这是第一个"));
        assert!(summary.contains('！'));
    }

    #[test]
    fn analyze_invariants() {
        let a = analyze("Some words here for reading.", 200);
        assert_eq!(a.word_count, 5);
        assert_eq!(a.reading_time_minutes, 1);
        assert_eq!(a.language, "en");
        assert_eq!(a.summary, "Some words here for reading.");
    }
}
