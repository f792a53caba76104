//! OpenAPI / Swagger document processing.
//!
//! Detects API descriptions among fetched content, parses them with a
//! JSON → YAML → line-scan fallback chain, validates, inlines internal `$ref`s
//! and renders a Markdown summary.

mod detect;
mod format;
mod parser;
mod refs;
mod validate;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use webmark_shared::Result;

pub use detect::{DetectionReason, detect};
pub use format::{Endpoint, SpecVersion, endpoints, render, summary};
pub use parser::{SourceFormat, parse};
pub use refs::dereference;
pub use validate::{Validation, validate};

/// A processed API description.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenApiDocument {
    /// Parsed document, dereferenced when that pass succeeded.
    pub spec: Value,
    /// Markdown summary block.
    pub formatted: String,
    /// One-line description.
    pub summary: String,
    pub is_valid: bool,
    /// Validation problems; `None` when there are none.
    pub errors: Option<Vec<String>>,
    pub source_format: SourceFormat,
    pub dereferenced: bool,
}

/// Parse, validate, dereference and render `content`.
///
/// Fails only when no parser produces a document. Validation problems and
/// unresolvable references degrade the result instead.
#[instrument(skip_all, fields(source = source.unwrap_or("")))]
pub fn process(content: &str, source: Option<&str>) -> Result<OpenApiDocument> {
    let (parsed, source_format) = parse(content)?;
    debug!(%source_format, "API description parsed");

    let validation = validate(&parsed);
    if !validation.is_valid {
        warn!(errors = validation.errors.len(), "API description failed validation");
    }

    let (spec, dereferenced) = match dereference(&parsed) {
        Ok(resolved) => (resolved, true),
        Err(e) => {
            debug!(error = %e, "keeping document with unresolved references");
            (parsed, false)
        }
    };

    let formatted = render(&spec, source, &validation.errors);
    let summary = summary(&spec);
    info!(%summary, valid = validation.is_valid, "API description processed");

    Ok(OpenApiDocument {
        spec,
        formatted,
        summary,
        is_valid: validation.is_valid,
        errors: (!validation.errors.is_empty()).then_some(validation.errors),
        source_format,
        dereferenced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_openapi_json() {
        let content = r#"{"openapi":"3.0.0","info":{"title":"T","version":"1.0"},"paths":{"/a":{"get":{}}}}"#;
        assert!(detect(content, None, "https://example.com/spec").is_some());

        let doc = process(content, None).unwrap();
        assert!(doc.formatted.contains("Total of **1** endpoints"));
        assert_eq!(
            doc.summary,
            "T (1.0) - OpenAPI 3.0.0 specification with 1 endpoints"
        );
        assert!(doc.is_valid);
        assert!(doc.errors.is_none());
        assert_eq!(doc.source_format, SourceFormat::Json);
        assert!(doc.dereferenced);
    }

    #[test]
    fn swagger_yaml_end_to_end() {
        let content = "swagger: \"2.0\"\ninfo:\n  title: Pets\n  version: \"1.0.0\"\nhost: pets.io\npaths:\n  /pets:\n    get:\n      summary: List pets\n      responses:\n        '200':\n          schema:\n            $ref: '#/definitions/Pet'\ndefinitions:\n  Pet:\n    type: object\n";
        assert_eq!(
            detect(content, None, "https://pets.io/api"),
            Some(DetectionReason::KeywordEvidence)
        );

        let doc = process(content, Some("https://pets.io/api")).unwrap();
        assert_eq!(doc.source_format, SourceFormat::Yaml);
        assert!(doc.dereferenced);
        assert_eq!(
            doc.spec["paths"]["/pets"]["get"]["responses"]["200"]["schema"]["type"],
            "object"
        );
        assert_eq!(
            doc.summary,
            "Pets (1.0.0) - Swagger 2.0 specification with 1 endpoints"
        );
    }

    #[test]
    fn invalid_document_still_formatted() {
        let doc = process(r#"{"openapi":"3.0.0","paths":{}}"#, None).unwrap();
        assert!(!doc.is_valid);
        let errors = doc.errors.unwrap();
        assert!(errors.contains(&"missing info.title".to_string()));
        assert!(doc.formatted.contains("Validation notes"));
        assert!(doc.formatted.contains("# Untitled API"));
    }

    #[test]
    fn external_ref_keeps_original() {
        let content = r#"{"openapi":"3.0.0","info":{"title":"T","version":"1"},"paths":{"/a":{"$ref":"paths.yaml#/a"}}}"#;
        let doc = process(content, None).unwrap();
        assert!(!doc.dereferenced);
        assert_eq!(doc.spec["paths"]["/a"]["$ref"], "paths.yaml#/a");
    }

    #[test]
    fn runaway_ref_expansion_keeps_original() {
        let schemas: Vec<String> = (0..30)
            .map(|i| {
                let next = format!("#/components/schemas/S{}", i + 1);
                format!(
                    r#""S{i}":{{"properties":{{"a":{{"$ref":"{next}"}},"b":{{"$ref":"{next}"}}}}}}"#
                )
            })
            .collect();
        let content = format!(
            r#"{{"openapi":"3.0.0","info":{{"title":"T","version":"1"}},"paths":{{}},"components":{{"schemas":{{{},"S30":{{"type":"string"}}}}}}}}"#,
            schemas.join(",")
        );

        let doc = process(&content, None).unwrap();
        assert!(!doc.dereferenced);
        assert_eq!(
            doc.spec["components"]["schemas"]["S0"]["properties"]["a"]["$ref"],
            "#/components/schemas/S1"
        );
    }

    #[test]
    fn unparseable_is_parse_error() {
        let err = process("<html><body>nope</body></html>", None).unwrap_err();
        assert!(matches!(err, webmark_shared::WebmarkError::Parse { .. }));
    }
}
