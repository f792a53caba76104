//! Markdown rendering and one-line summaries of API descriptions.

use std::fmt::Write as _;

use serde_json::{Map, Value};

/// Operation keys of a path item, in display order.
const METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

const UNTITLED: &str = "Untitled API";
const UNKNOWN_VERSION: &str = "unknown";

/// Declared specification family and version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecVersion {
    OpenApi(String),
    Swagger(String),
    Unknown,
}

impl SpecVersion {
    pub fn of(spec: &Value) -> Self {
        if let Some(v) = spec.get("openapi").and_then(scalar_string) {
            return Self::OpenApi(v);
        }
        if let Some(v) = spec.get("swagger").and_then(scalar_string) {
            return Self::Swagger(v);
        }
        Self::Unknown
    }
}

impl std::fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenApi(v) => write!(f, "OpenAPI {v}"),
            Self::Swagger(v) => write!(f, "Swagger {v}"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// One operation under a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub method: String,
    pub summary: Option<String>,
    pub operation_id: Option<String>,
    pub description: Option<String>,
}

/// Every operation in `spec`, ordered by path then method.
pub fn endpoints(spec: &Value) -> Vec<Endpoint> {
    let Some(paths) = spec.get("paths").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        for method in METHODS {
            let Some(op) = item.get(*method) else {
                continue;
            };
            out.push(Endpoint {
                path: path.clone(),
                method: method.to_ascii_uppercase(),
                summary: text(op, "summary"),
                operation_id: text(op, "operationId"),
                description: text(op, "description"),
            });
        }
    }
    out
}

/// `"{title} ({version}) - {OpenAPI X | Swagger X} specification with {N} endpoints"`.
pub fn summary(spec: &Value) -> String {
    let (title, version) = title_and_version(spec);
    format!(
        "{title} ({version}) - {} specification with {} endpoints",
        SpecVersion::of(spec),
        endpoints(spec).len()
    )
}

/// Render the Markdown summary block.
pub fn render(spec: &Value, source: Option<&str>, errors: &[String]) -> String {
    let mut md = String::new();

    match source {
        Some(url) => {
            let _ = writeln!(md, "> API description converted by webmark from <{url}>");
        }
        None => md.push_str("> API description converted by webmark\n"),
    }
    md.push('\n');

    if !errors.is_empty() {
        md.push_str("> **Validation notes:**\n");
        for error in errors {
            let _ = writeln!(md, "> - {error}");
        }
        md.push('\n');
    }

    let (title, _) = title_and_version(spec);
    let _ = writeln!(md, "# {title}\n");

    render_basic_info(&mut md, spec);
    render_servers(&mut md, spec);
    render_endpoints(&mut md, spec);
    render_components(&mut md, spec);

    md.trim_end().to_string()
}

fn render_basic_info(md: &mut String, spec: &Value) {
    let (title, version) = title_and_version(spec);
    md.push_str("## Basic Information\n\n");
    let _ = writeln!(md, "- **Title:** {title}");
    let _ = writeln!(md, "- **Version:** {version}");
    let _ = writeln!(md, "- **Specification:** {}", SpecVersion::of(spec));

    let info = spec.get("info");
    if let Some(description) = info.and_then(|i| text(i, "description")) {
        let _ = writeln!(md, "- **Description:** {}", single_line(&description));
    }
    if let Some(terms) = info.and_then(|i| text(i, "termsOfService")) {
        let _ = writeln!(md, "- **Terms of Service:** {terms}");
    }
    if let Some(contact) = info.and_then(|i| i.get("contact")) {
        let parts: Vec<String> = ["name", "email", "url"]
            .iter()
            .filter_map(|k| text(contact, k))
            .collect();
        if !parts.is_empty() {
            let _ = writeln!(md, "- **Contact:** {}", parts.join(", "));
        }
    }
    if let Some(license) = info.and_then(|i| i.get("license")).and_then(|l| text(l, "name")) {
        let _ = writeln!(md, "- **License:** {license}");
    }
    md.push('\n');
}

fn render_servers(md: &mut String, spec: &Value) {
    let mut lines = Vec::new();

    if let Some(servers) = spec.get("servers").and_then(Value::as_array) {
        for server in servers {
            let Some(url) = text(server, "url") else {
                continue;
            };
            match text(server, "description") {
                Some(d) => lines.push(format!("- `{url}` - {}", single_line(&d))),
                None => lines.push(format!("- `{url}`")),
            }
        }
    } else if let Some(host) = text(spec, "host") {
        let base_path = text(spec, "basePath").unwrap_or_default();
        let schemes: Vec<&str> = spec
            .get("schemes")
            .and_then(Value::as_array)
            .map(|s| s.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if schemes.is_empty() {
            lines.push(format!("- `{host}{base_path}`"));
        }
        for scheme in schemes {
            lines.push(format!("- `{scheme}://{host}{base_path}`"));
        }
    }

    if lines.is_empty() {
        return;
    }
    md.push_str("## Servers\n\n");
    for line in lines {
        md.push_str(&line);
        md.push('\n');
    }
    md.push('\n');
}

fn render_endpoints(md: &mut String, spec: &Value) {
    let endpoints = endpoints(spec);
    md.push_str("## Endpoints\n\n");
    let _ = writeln!(md, "Total of **{}** endpoints\n", endpoints.len());

    let mut current_path: Option<&str> = None;
    for ep in &endpoints {
        if current_path != Some(ep.path.as_str()) {
            if current_path.is_some() {
                md.push('\n');
            }
            let _ = writeln!(md, "### `{}`\n", ep.path);
            current_path = Some(&ep.path);
        }
        match &ep.summary {
            Some(s) => {
                let _ = writeln!(md, "- **{}** {}", ep.method, single_line(s));
            }
            None => {
                let _ = writeln!(md, "- **{}**", ep.method);
            }
        }
        if let Some(id) = &ep.operation_id {
            let _ = writeln!(md, "  - Operation ID: `{id}`");
        }
        if let Some(d) = &ep.description {
            let _ = writeln!(md, "  - {}", single_line(d));
        }
    }
    if !endpoints.is_empty() {
        md.push('\n');
    }
}

fn render_components(md: &mut String, spec: &Value) {
    let (heading, counts) = match spec.get("components").and_then(Value::as_object) {
        Some(c) => (
            "Components",
            [
                ("Schemas", count(c.get("schemas"))),
                ("Parameters", count(c.get("parameters"))),
                ("Responses", count(c.get("responses"))),
                ("Security Schemes", count(c.get("securitySchemes"))),
            ],
        ),
        None => (
            "Definitions",
            [
                ("Schemas", count(spec.get("definitions"))),
                ("Parameters", count(spec.get("parameters"))),
                ("Responses", count(spec.get("responses"))),
                ("Security Schemes", count(spec.get("securityDefinitions"))),
            ],
        ),
    };

    if counts.iter().all(|(_, n)| *n == 0) {
        return;
    }
    let _ = writeln!(md, "## {heading}\n");
    for (label, n) in counts {
        let _ = writeln!(md, "- **{label}:** {n}");
    }
}

fn title_and_version(spec: &Value) -> (String, String) {
    let info = spec.get("info");
    let title = info
        .and_then(|i| text(i, "title"))
        .unwrap_or_else(|| UNTITLED.to_string());
    let version = info
        .and_then(|i| i.get("version"))
        .and_then(scalar_string)
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
    (title, version)
}

fn count(v: Option<&Value>) -> usize {
    v.and_then(Value::as_object).map_or(0, Map::len)
}

fn text(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
