//! Fixtures shared by codec, export and daemon tests

use super::encode;
use crate::models::{
    BoundingBox, DocumentMetadata, GridLayout, OcrPayload, OcrWord, PageOcrResult, PdfMetadata,
};

/// Not a renderable PDF, just enough bytes to carry through the codec
pub(crate) const SAMPLE_PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\ntrailer << /Root 1 0 R >>\n%%EOF\n";

pub(crate) fn sample_metadata(page_count: u32) -> DocumentMetadata {
    DocumentMetadata {
        filename: "invoice.pdf".to_string(),
        source_path: "/tmp/inbox/invoice.pdf".to_string(),
        creation_time: "2026-01-05T10:00:00+00:00".to_string(),
        page_count,
        pdf_metadata: PdfMetadata::new(),
        original_length: 0,
        original_digest: String::new(),
        thumbnail_layout: GridLayout::compute(page_count as usize, 200, 280, 4),
    }
}

pub(crate) fn sample_container(page_count: u32) -> Vec<u8> {
    encode(SAMPLE_PDF, b"\x89PNG thumbnail", &sample_metadata(page_count))
        .expect("sample container encodes")
}

pub(crate) fn sample_payload(page_count: usize) -> OcrPayload {
    let pages = (0..page_count)
        .map(|i| PageOcrResult {
            page_index: i,
            words: vec![
                OcrWord {
                    text: "Invoice".to_string(),
                    bbox: BoundingBox { x: 10, y: 10, w: 80, h: 20 },
                    confidence: 0.95,
                },
                OcrWord {
                    text: format!("page{}", i + 1),
                    bbox: BoundingBox { x: 100, y: 10, w: 60, h: 20 },
                    confidence: 0.875,
                },
            ],
            full_text: format!("Invoice page{}", i + 1),
        })
        .collect();
    OcrPayload::new(vec!["pol".to_string(), "eng".to_string()], pages)
}
