//! Decide whether fetched content is an API description document.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Why a document was recognised as an API description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionReason {
    /// Declared content type is JSON or YAML.
    ContentType,
    /// URL path ends in `.json`, `.yaml` or `.yml`.
    UrlExtension,
    /// The body declares an `openapi` version key.
    VersionDeclaration,
    /// `swagger` appears together with a top-level `paths`, `definitions` or
    /// `info` key.
    KeywordEvidence,
}

static OPENAPI_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(?:^|[{,\s])["']?openapi["']?\s*:"#).expect("valid regex")
});

static STRUCTURE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(?:^|[{,\s])["']?(?:paths|definitions|info)["']?\s*:"#)
        .expect("valid regex")
});

/// Checks run in order; the first that matches is returned.
pub fn detect(content: &str, content_type: Option<&str>, url: &str) -> Option<DetectionReason> {
    if content_type.is_some_and(is_structured_mime) {
        return Some(DetectionReason::ContentType);
    }
    if has_structured_extension(url) {
        return Some(DetectionReason::UrlExtension);
    }
    if OPENAPI_KEY_RE.is_match(content) {
        return Some(DetectionReason::VersionDeclaration);
    }
    if content.to_ascii_lowercase().contains("swagger") && STRUCTURE_KEY_RE.is_match(content) {
        return Some(DetectionReason::KeywordEvidence);
    }
    None
}

fn is_structured_mime(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.ends_with("json") || mime.ends_with("yaml") || mime.ends_with("yml")
}

fn has_structured_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    };
    [".json", ".yaml", ".yml"].iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://example.com/docs";

    #[test]
    fn content_type_wins_first() {
        assert_eq!(
            detect("{}", Some("application/json; charset=utf-8"), PAGE),
            Some(DetectionReason::ContentType)
        );
        assert_eq!(
            detect("a: 1", Some("application/x-yaml"), PAGE),
            Some(DetectionReason::ContentType)
        );
        assert_eq!(detect("<html></html>", Some("text/html"), PAGE), None);
    }

    #[test]
    fn url_extension_ignores_query() {
        assert_eq!(
            detect("", None, "https://api.example.com/v1/openapi.yaml?ref=main"),
            Some(DetectionReason::UrlExtension)
        );
        assert_eq!(
            detect("", None, "https://example.com/spec.JSON"),
            Some(DetectionReason::UrlExtension)
        );
        assert_eq!(detect("", None, "https://example.com/json/page"), None);
    }

    #[test]
    fn openapi_declaration_in_json_and_yaml() {
        let json = r#"{"openapi":"3.0.0","info":{"title":"T","version":"1.0"},"paths":{"/a":{"get":{}}}}"#;
        assert_eq!(
            detect(json, None, PAGE),
            Some(DetectionReason::VersionDeclaration)
        );
        assert_eq!(
            detect("openapi: 3.1.0\ninfo:\n  title: T\n", None, PAGE),
            Some(DetectionReason::VersionDeclaration)
        );
    }

    #[test]
    fn swagger_detected_by_keyword_evidence() {
        let yaml = "swagger: \"2.0\"\ninfo:\n  title: Pets\n  version: \"1\"\npaths:\n  /pets:\n    get: {}\ndefinitions:\n  Pet:\n    type: object\n";
        assert_eq!(
            detect(yaml, None, PAGE),
            Some(DetectionReason::KeywordEvidence)
        );
    }

    #[test]
    fn prose_mentioning_openapi_is_not_detected() {
        assert_eq!(
            detect("<p>We love openapi and swagger tooling.</p>", None, PAGE),
            None
        );
    }
}
