//! Parse API description documents.
//!
//! Tries JSON, then YAML, then a line scan that recovers only the version
//! declaration and `info.title` / `info.version` from documents neither
//! parser accepts.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use webmark_shared::{Result, WebmarkError};

/// Which parser produced the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceFormat {
    Json,
    Yaml,
    LineScan,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::LineScan => "line-scan",
        })
    }
}

/// Parse `content` into a JSON object tree.
pub fn parse(content: &str) -> Result<(Value, SourceFormat)> {
    match serde_json::from_str::<Value>(content) {
        Ok(value @ Value::Object(_)) => return Ok((value, SourceFormat::Json)),
        Ok(_) => debug!("JSON parsed to a non-object, trying YAML"),
        Err(e) => debug!(error = %e, "not JSON, trying YAML"),
    }

    match serde_yaml::from_str::<Value>(content) {
        Ok(value @ Value::Object(_)) => return Ok((value, SourceFormat::Yaml)),
        Ok(_) => debug!("YAML parsed to a non-mapping, falling back to line scan"),
        Err(e) => debug!(error = %e, "not YAML, falling back to line scan"),
    }

    line_scan(content)
        .map(|value| (value, SourceFormat::LineScan))
        .ok_or_else(|| {
            WebmarkError::parse("document is not JSON or YAML and has no API declaration")
        })
}

static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\s*)["']?([A-Za-z_][\w-]*)["']?\s*:\s*(.*?)\s*,?\s*$"#).expect("valid regex")
});

/// Recover the few fields needed for a summary from malformed text.
fn line_scan(content: &str) -> Option<Value> {
    let mut openapi = None;
    let mut swagger = None;
    let mut title = None;
    let mut version = None;
    let mut info_indent: Option<usize> = None;

    for line in content.lines() {
        let Some(caps) = KEY_VALUE_RE.captures(line) else {
            continue;
        };
        let indent = caps[1].len();
        let key = &caps[2];
        let value = scalar(&caps[3]);

        if info_indent.is_some_and(|i| indent <= i) && key != "info" {
            info_indent = None;
        }

        match key {
            "openapi" if openapi.is_none() => openapi = value,
            "swagger" if swagger.is_none() => swagger = value,
            "info" => info_indent = Some(indent),
            "title" if info_indent.is_some() && title.is_none() => title = value,
            "version" if info_indent.is_some() && version.is_none() => version = value,
            _ => {}
        }
    }

    if openapi.is_none() && swagger.is_none() && title.is_none() {
        return None;
    }

    let mut doc = Map::new();
    if let Some(v) = openapi {
        doc.insert("openapi".into(), Value::String(v));
    }
    if let Some(v) = swagger {
        doc.insert("swagger".into(), Value::String(v));
    }
    let mut info = Map::new();
    if let Some(v) = title {
        info.insert("title".into(), Value::String(v));
    }
    if let Some(v) = version {
        info.insert("version".into(), Value::String(v));
    }
    doc.insert("info".into(), Value::Object(info));
    Some(Value::Object(doc))
}

/// Strip quotes; opening braces and empty values carry nothing.
fn scalar(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches(',').trim();
    if trimmed.is_empty() || trimmed.starts_with('{') || trimmed.starts_with('[') {
        return None;
    }
    let unquoted = trimmed.trim_matches(|c| c == '"' || c == '\'').trim();
    (!unquoted.is_empty()).then(|| unquoted.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_first() {
        let (value, format) = parse(r#"{"openapi":"3.0.0","info":{"title":"T"}}"#).unwrap();
        assert_eq!(format, SourceFormat::Json);
        assert_eq!(value["info"]["title"], "T");
    }

    #[test]
    fn yaml_second() {
        let (value, format) =
            parse("swagger: '2.0'\ninfo:\n  title: Pets\n  version: '1'\n").unwrap();
        assert_eq!(format, SourceFormat::Yaml);
        assert_eq!(value["swagger"], "2.0");
        assert_eq!(value["info"]["version"], "1");
    }

    #[test]
    fn yaml_scalar_is_not_a_document() {
        assert!(parse("just some words").is_err());
    }

    #[test]
    fn line_scan_recovers_broken_yaml() {
        let broken = "openapi: 3.0.3\ninfo:\n  title: \"Broken API\"\n  version: 2.1\npaths:\n  /x: [unclosed\n";
        let (value, format) = parse(broken).unwrap();
        assert_eq!(format, SourceFormat::LineScan);
        assert_eq!(value["openapi"], "3.0.3");
        assert_eq!(value["info"]["title"], "Broken API");
        assert_eq!(value["info"]["version"], "2.1");
    }

    #[test]
    fn line_scan_ignores_titles_outside_info() {
        let broken = "swagger: \"2.0\"\ndefinitions:\n  Pet:\n    title: Pet\n  bad: [\n";
        let (value, format) = parse(broken).unwrap();
        assert_eq!(format, SourceFormat::LineScan);
        assert!(value["info"].get("title").is_none());
    }
}
