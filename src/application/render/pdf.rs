//! Markup-to-PDF converter: fills an XML/HTML template, extracts its text
//! content, and lays it out as a paginated single-font PDF.

use std::path::Path;

use lopdf::{Document, Object, Stream, dictionary};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::domain::types::TemplateSource;

use super::{RenderError, RenderedDocument, fill_placeholders, read_template, template_path};

const LINES_PER_PAGE: usize = 50;

pub(super) fn render_markup(
    source: &TemplateSource,
    input_data: &serde_json::Value,
    templates_dir: &Path,
) -> Result<RenderedDocument, RenderError> {
    let path = template_path(templates_dir, &source.filename);
    let raw = read_template(&path, &source.filename)?;
    let markup = String::from_utf8(raw).map_err(|_| {
        RenderError::conversion(format!("template `{}` is not valid UTF-8", source.filename))
    })?;

    let filled = fill_placeholders(&markup, input_data);
    let lines = markup_to_lines(&filled)?;
    let bytes = build_document(&lines)?;

    Ok(RenderedDocument {
        bytes,
        extension: "pdf",
        content_type: "application/pdf",
    })
}

/// Flatten filled markup into text lines. Block elements end the current
/// line; inline elements contribute their text in place. Malformed markup
/// is a conversion failure, never partial output.
fn markup_to_lines(markup: &str) -> Result<Vec<String>, RenderError> {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().trim_text(true);

    let mut lines = Vec::new();
    let mut current = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(text)) => {
                let decoded = text
                    .unescape()
                    .map_err(|err| RenderError::conversion(format!("bad markup entity: {err}")))?;
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&decoded);
            }
            Ok(Event::End(ref element)) => {
                if is_block_element(element.local_name().as_ref()) {
                    lines.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Empty(ref element)) => {
                if element.local_name().as_ref() == b"br" {
                    lines.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(RenderError::conversion(format!("malformed markup: {err}")));
            }
            _ => {}
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }

    Ok(lines)
}

fn is_block_element(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" | b"li" | b"tr" | b"div" | b"title"
    )
}

/// Assemble the PDF object graph: one Helvetica text stream per page,
/// US-Letter media box, fixed leading.
fn build_document(lines: &[String]) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.new_object_id();
    let resources_id = doc.new_object_id();

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        }),
    );

    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        }),
    );

    let page_count = lines.len().div_ceil(LINES_PER_PAGE).max(1);
    let mut page_ids = Vec::new();

    for page_index in 0..page_count {
        let start = page_index * LINES_PER_PAGE;
        let end = ((page_index + 1) * LINES_PER_PAGE).min(lines.len());
        let page_lines = if start < lines.len() {
            &lines[start..end]
        } else {
            &[]
        };

        let content_id = doc.new_object_id();
        let page_id = doc.new_object_id();

        let content = page_content(page_lines);
        doc.objects.insert(
            content_id,
            Object::Stream(Stream::new(dictionary! {}, content.into_bytes())),
        );

        doc.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            }),
        );

        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|err| RenderError::conversion(format!("pdf serialization failed: {err}")))?;

    Ok(buffer)
}

fn page_content(lines: &[String]) -> String {
    let mut content = String::new();
    content.push_str("BT\n");
    content.push_str("/F1 11 Tf\n");
    content.push_str("50 742 Td\n");
    content.push_str("14 TL\n");

    for line in lines {
        let escaped = escape_text(line);
        content.push_str(&format!("({escaped}) Tj T*\n"));
    }

    content.push_str("ET\n");
    content
}

fn escape_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            c if c.is_ascii() && !c.is_control() => c.to_string(),
            _ => " ".to_string(),
        })
        .collect()
}
