//! Single-page PDF export of corrected invoice text.

pub mod encoding;
pub mod layout;

use facture_core::{ExportOptions, ExportRenderer, RenderError};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use crate::encoding::to_win_ansi;
use crate::layout::{fit, BodyArea, BodyLayout};

// A4 portrait, in points.
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
const TITLE_SIZE: f32 = 20.0;
/// Vertical space taken by the title, its rule and the gap below.
const TITLE_BLOCK: f32 = 48.0;

/// Renders text under a fixed heading, in a monospaced font, on one A4 page.
pub struct PdfRenderer {
    title: String,
}

impl PdfRenderer {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into() }
    }

    pub fn from_options(options: &ExportOptions) -> Self {
        Self::new(options.title.clone())
    }

    fn body_area() -> BodyArea {
        BodyArea {
            width: PAGE_WIDTH - 2.0 * MARGIN,
            height: PAGE_HEIGHT - 2.0 * MARGIN - TITLE_BLOCK,
        }
    }

    fn page_operations(&self, body: &BodyLayout) -> Vec<Operation> {
        let title_y = PAGE_HEIGHT - MARGIN - TITLE_SIZE;
        let rule_y = title_y - 12.0;
        let body_top = PAGE_HEIGHT - MARGIN - TITLE_BLOCK - body.font_size;

        let mut ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F2".into(), TITLE_SIZE.into()]),
            Operation::new("Td", vec![MARGIN.into(), title_y.into()]),
            Operation::new("Tj", vec![Object::string_literal(to_win_ansi(&self.title))]),
            Operation::new("ET", vec![]),
            Operation::new("w", vec![0.75f32.into()]),
            Operation::new("m", vec![MARGIN.into(), rule_y.into()]),
            Operation::new("l", vec![(PAGE_WIDTH - MARGIN).into(), rule_y.into()]),
            Operation::new("S", vec![]),
        ];

        if !body.lines.is_empty() {
            ops.push(Operation::new("BT", vec![]));
            ops.push(Operation::new("Tf", vec!["F1".into(), body.font_size.into()]));
            ops.push(Operation::new("TL", vec![body.leading.into()]));
            ops.push(Operation::new("Td", vec![MARGIN.into(), body_top.into()]));
            for (i, line) in body.lines.iter().enumerate() {
                if i > 0 {
                    ops.push(Operation::new("T*", vec![]));
                }
                ops.push(Operation::new("Tj", vec![Object::string_literal(to_win_ansi(line))]));
            }
            ops.push(Operation::new("ET", vec![]));
        }
        ops
    }
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self::from_options(&ExportOptions::default())
    }
}

impl ExportRenderer for PdfRenderer {
    fn render(&self, source_text: &str) -> Result<Vec<u8>, RenderError> {
        let body = fit(source_text, Self::body_area()).map_err(|lines| RenderError::Overflow { lines })?;

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let body_font = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let title_font = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => body_font,
                "F2" => title_font,
            },
        });

        let content = Content { operations: self.page_operations(&body) };
        let encoded = content.encode().map_err(|e| RenderError::Encode(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).map_err(|e| RenderError::Encode(e.to_string()))?;
        tracing::debug!(lines = body.lines.len(), font_size = body.font_size, bytes = buf.len(), "PDF rendered");
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shown_strings(pdf: &[u8]) -> Vec<Vec<u8>> {
        let doc = Document::load_mem(pdf).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().unwrap();
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        content
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| match op.operands.first() {
                Some(Object::String(bytes, _)) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn renders_title_then_text() {
        let pdf = PdfRenderer::default().render("Total: 42,00").unwrap();
        assert!(pdf.starts_with(b"%PDF-1.5"));
        assert_eq!(shown_strings(&pdf), vec![b"FACTURE".to_vec(), b"Total: 42,00".to_vec()]);
    }

    #[test]
    fn custom_title_and_accents() {
        let pdf = PdfRenderer::new("INVOICE").render("Réglé 42€").unwrap();
        let strings = shown_strings(&pdf);
        assert_eq!(strings[0], b"INVOICE");
        assert_eq!(strings[1], to_win_ansi("Réglé 42€"));
    }

    #[test]
    fn empty_text_renders_heading_only() {
        let pdf = PdfRenderer::default().render("").unwrap();
        assert_eq!(shown_strings(&pdf), vec![b"FACTURE".to_vec()]);
    }

    #[test]
    fn multi_line_text_keeps_lines() {
        let pdf = PdfRenderer::default().render("Client: Dupont\nTotal: 42,00").unwrap();
        assert_eq!(shown_strings(&pdf).len(), 3);
    }

    #[test]
    fn parentheses_survive_escaping() {
        let pdf = PdfRenderer::default().render("TVA (20)").unwrap();
        assert_eq!(shown_strings(&pdf)[1], b"TVA (20)");
    }

    #[test]
    fn text_longer_than_a_page_overflows() {
        let text = vec!["ligne"; 400].join("\n");
        let err = PdfRenderer::default().render(&text).unwrap_err();
        assert!(matches!(err, RenderError::Overflow { lines: 400 }));
    }
}
