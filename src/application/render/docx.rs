//! Office-document converter: fills placeholders inside a DOCX template's
//! main document part and rewrites the archive around it.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::domain::types::TemplateSource;

use super::{RenderError, RenderedDocument, fill_placeholders, read_template, template_path};

const DOCUMENT_PART: &str = "word/document.xml";
const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub(super) fn render_office(
    source: &TemplateSource,
    input_data: &serde_json::Value,
    templates_dir: &Path,
) -> Result<RenderedDocument, RenderError> {
    let path = template_path(templates_dir, &source.filename);
    let raw = read_template(&path, &source.filename)?;
    let bytes = fill_archive(raw, input_data)?;

    Ok(RenderedDocument {
        bytes,
        extension: "docx",
        content_type: DOCX_CONTENT_TYPE,
    })
}

/// Copy every archive entry, substituting placeholders in the document part.
/// The output is written whole; a failure at any entry aborts the render.
fn fill_archive(raw: Vec<u8>, input_data: &serde_json::Value) -> Result<Vec<u8>, RenderError> {
    let mut archive = ZipArchive::new(Cursor::new(raw))
        .map_err(|err| RenderError::conversion(format!("template is not a docx archive: {err}")))?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let mut saw_document_part = false;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| RenderError::conversion(format!("unreadable archive entry: {err}")))?;
        let name = entry.name().to_string();

        if entry.is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|err| RenderError::conversion(format!("archive write failed: {err}")))?;
            continue;
        }

        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|err| RenderError::conversion(format!("unreadable archive entry: {err}")))?;

        if name == DOCUMENT_PART {
            saw_document_part = true;
            let xml = String::from_utf8(contents).map_err(|_| {
                RenderError::conversion("document part is not valid UTF-8".to_string())
            })?;
            contents = fill_placeholders(&xml, input_data).into_bytes();
        }

        writer
            .start_file(name, options)
            .map_err(|err| RenderError::conversion(format!("archive write failed: {err}")))?;
        writer
            .write_all(&contents)
            .map_err(|err| RenderError::conversion(format!("archive write failed: {err}")))?;
    }

    if !saw_document_part {
        return Err(RenderError::conversion(format!(
            "archive has no {DOCUMENT_PART}"
        )));
    }

    let cursor = writer
        .finish()
        .map_err(|err| RenderError::conversion(format!("archive finalize failed: {err}")))?;

    Ok(cursor.into_inner())
}
