//! Passthrough converter: echoes the input mapping as a pretty-printed JSON
//! document together with summary statistics over its top-level entries.

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::domain::types::TemplateSource;

use super::{RenderError, RenderedDocument};

#[derive(Debug, Serialize)]
struct PassthroughDocument {
    template: String,
    generated_at: String,
    input_data: Value,
    summary: DataSummary,
}

#[derive(Debug, PartialEq, Serialize)]
pub(crate) struct DataSummary {
    pub fields_count: usize,
    pub keys: Vec<String>,
    pub has_numbers: bool,
    pub has_strings: bool,
}

pub(super) fn render_passthrough(
    source: &TemplateSource,
    input_data: &Value,
) -> Result<RenderedDocument, RenderError> {
    let generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| RenderError::conversion(format!("timestamp formatting failed: {err}")))?;

    let document = PassthroughDocument {
        template: source.template_id.clone(),
        generated_at,
        input_data: input_data.clone(),
        summary: summarize(input_data),
    };

    let bytes = serde_json::to_vec_pretty(&document)
        .map_err(|err| RenderError::conversion(format!("json serialization failed: {err}")))?;

    Ok(RenderedDocument {
        bytes,
        extension: "json",
        content_type: "application/json",
    })
}

/// Field count, key list, and type flags over the top-level entries.
/// Booleans count as neither numeric nor string.
pub(crate) fn summarize(input_data: &Value) -> DataSummary {
    match input_data.as_object() {
        Some(map) => DataSummary {
            fields_count: map.len(),
            keys: map.keys().cloned().collect(),
            has_numbers: map.values().any(Value::is_number),
            has_strings: map.values().any(Value::is_string),
        },
        None => DataSummary {
            fields_count: 0,
            keys: Vec::new(),
            has_numbers: false,
            has_strings: false,
        },
    }
}
