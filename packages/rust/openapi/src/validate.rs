//! Validation of parsed API descriptions.
//!
//! OpenAPI 3.x documents are first deserialized into the typed
//! [`openapiv3::OpenAPI`] model. When that fails, or for Swagger 2.x, a set
//! of structural checks decides validity instead. Problems are reported, never
//! raised.

use serde_json::Value;
use tracing::debug;

/// Outcome of validating one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// True when the typed OpenAPI model accepted the document.
    pub strict: bool,
}

pub fn validate(spec: &Value) -> Validation {
    if is_openapi_3(spec) {
        match serde_json::from_value::<openapiv3::OpenAPI>(spec.clone()) {
            Ok(_) => {
                return Validation {
                    is_valid: true,
                    errors: Vec::new(),
                    strict: true,
                };
            }
            Err(e) => debug!(error = %e, "typed OpenAPI model rejected document"),
        }
    }

    let errors = structural_errors(spec);
    Validation {
        is_valid: errors.is_empty(),
        errors,
        strict: false,
    }
}

fn is_openapi_3(spec: &Value) -> bool {
    spec.get("openapi")
        .and_then(Value::as_str)
        .is_some_and(|v| v.starts_with("3."))
}

fn structural_errors(spec: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    let declared = ["openapi", "swagger"]
        .iter()
        .any(|key| spec.get(key).is_some_and(|v| v.is_string() || v.is_number()));
    if !declared {
        errors.push("missing version declaration (openapi or swagger)".to_string());
    }

    let info = spec.get("info");
    if !info.and_then(|i| i.get("title")).is_some_and(non_empty_string) {
        errors.push("missing info.title".to_string());
    }
    if !info.and_then(|i| i.get("version")).is_some_and(non_empty_scalar) {
        errors.push("missing info.version".to_string());
    }

    errors
}

fn non_empty_string(v: &Value) -> bool {
    v.as_str().is_some_and(|s| !s.trim().is_empty())
}

fn non_empty_scalar(v: &Value) -> bool {
    non_empty_string(v) || v.is_number()
}
