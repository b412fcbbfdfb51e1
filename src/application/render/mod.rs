//! Converter adapters: pure functions from (template resource, input data)
//! to rendered bytes.
//!
//! Three variants exist, selected once at dispatch time: markup to PDF,
//! office-document fill-in, and JSON passthrough. Converters know nothing
//! about jobs; they either return complete bytes or fail typed. State
//! changes (recording job outcomes) happen in the caller.

mod docx;
mod json;
mod pdf;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::types::{TemplateKind, TemplateSource};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template resource `{name}` not found")]
    TemplateNotFound { name: String },
    #[error("conversion failed: {message}")]
    Conversion { message: String },
}

impl RenderError {
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }

    pub fn is_template_missing(&self) -> bool {
        matches!(self, Self::TemplateNotFound { .. })
    }
}

/// A fully rendered document. Bytes are complete; partial output is never
/// returned.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub content_type: &'static str,
}

/// Render `input_data` through the converter variant resolved in `source`.
pub fn render(
    source: &TemplateSource,
    input_data: &serde_json::Value,
    templates_dir: &Path,
) -> Result<RenderedDocument, RenderError> {
    match source.kind {
        TemplateKind::Pdf => pdf::render_markup(source, input_data, templates_dir),
        TemplateKind::Docx => docx::render_office(source, input_data, templates_dir),
        TemplateKind::Json => json::render_passthrough(source, input_data),
    }
}

fn template_path(templates_dir: &Path, filename: &str) -> PathBuf {
    templates_dir.join(filename)
}

fn read_template(path: &Path, name: &str) -> Result<Vec<u8>, RenderError> {
    std::fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => RenderError::TemplateNotFound {
            name: name.to_string(),
        },
        _ => RenderError::conversion(format!("failed to read template `{name}`: {err}")),
    })
}

/// Substitute `{{ key }}` placeholders with XML-escaped values from the
/// input mapping. Unknown keys render empty; an unterminated opener is
/// passed through verbatim.
fn fill_placeholders(template: &str, data: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let key = after[..end].trim();
        if let Some(value) = data.get(key) {
            let text = value_to_text(value);
            out.push_str(&quick_xml::escape::escape(text.as_str()));
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Bool(flag) => flag.to_string(),
        serde_json::Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fills_known_placeholders_and_blanks_unknown_ones() {
        let data = json!({"name": "Ada", "amount": 42});
        let filled = fill_placeholders("<p>{{ name }} owes {{ amount }} for {{ item }}</p>", &data);
        assert_eq!(filled, "<p>Ada owes 42 for </p>");
    }

    #[test]
    fn escapes_markup_in_values() {
        let data = json!({"name": "<b>Ada & co</b>"});
        let filled = fill_placeholders("<p>{{name}}</p>", &data);
        assert_eq!(filled, "<p>&lt;b&gt;Ada &amp; co&lt;/b&gt;</p>");
    }

    #[test]
    fn leaves_unterminated_opener_untouched() {
        let data = json!({});
        assert_eq!(fill_placeholders("before {{ tail", &data), "before {{ tail");
    }

    #[test]
    fn renders_nested_values_as_json() {
        let data = json!({"items": [1, 2]});
        assert_eq!(fill_placeholders("{{ items }}", &data), "[1,2]");
    }
}
