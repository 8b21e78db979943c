//! In-process renderer and OCR fakes plus PDF fixtures for tests

use crate::container::encode;
use crate::error::{OcrError, RenderError};
use crate::models::{BoundingBox, DocumentMetadata, GridLayout, OcrWord, PageOcrResult};
use crate::ocr::OcrEngine;
use crate::render::{inspect_pdf, PageImage, Renderer};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Document, Object};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A structurally valid PDF with `pages` empty A4 pages and an Info
/// dictionary
pub(crate) fn sample_pdf(pages: u32, title: Option<&str>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
            })
            .into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(i64::from(pages)),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut info = dictionary! {
        "Author" => Object::string_literal("Test Author"),
        "Producer" => Object::string_literal("veridock tests"),
    };
    if let Some(title) = title {
        info.set("Title", Object::string_literal(title));
    }
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("in-memory PDF saves");
    bytes
}

/// Write a pending container holding `sample_pdf(pages)` as `dir/name`
pub(crate) fn write_container(dir: &Path, name: &str, pages: u32) -> PathBuf {
    let pdf = sample_pdf(pages, Some("Fixture"));
    let info = inspect_pdf(&pdf).expect("fixture PDF inspects");
    let metadata = DocumentMetadata {
        filename: name.replace(".svg", ".pdf"),
        source_path: dir.join(name).display().to_string(),
        creation_time: "2026-03-01T08:30:00+00:00".to_string(),
        page_count: info.page_count,
        pdf_metadata: info.metadata,
        original_length: 0,
        original_digest: String::new(),
        thumbnail_layout: GridLayout::compute(pages as usize, 200, 280, 4),
    };
    let container = encode(&pdf, &page_png(8, 8, [255, 255, 255]), &metadata)
        .expect("fixture container encodes");
    let path = dir.join(name);
    std::fs::write(&path, container).expect("fixture container writes");
    path
}

/// Solid-color PNG
pub(crate) fn page_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .expect("PNG encodes");
    png
}

/// Renders one gray page per PDF page; can fail a set number of times
pub(crate) struct FakeRenderer {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::failing(0)
    }

    /// Fail the first `times` render calls with a corrupt-document error
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn render_pages(&self, pdf: &[u8], dpi: u32) -> Result<Vec<PageImage>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RenderError::CorruptDocument("simulated render failure".to_string()));
        }

        let info = inspect_pdf(pdf)?;
        // A4 at the requested resolution, kept small for tests
        let width = (dpi / 10).max(8);
        let height = width * 297 / 210;
        Ok((0..info.page_count as usize)
            .map(|i| PageImage {
                page_index: i,
                png: page_png(width, height, [96, 96, 96]),
                width,
                height,
            })
            .collect())
    }
}

/// Emits three words per page: "Invoice", "no" and "page<N>"
pub(crate) struct FakeOcrEngine {
    available: bool,
    blank_pages: HashSet<usize>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeOcrEngine {
    pub fn new() -> Self {
        Self {
            available: true,
            blank_pages: HashSet::new(),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn with_blank_page(mut self, page_index: usize) -> Self {
        self.blank_pages.insert(page_index);
        self
    }

    /// Fail the first `times` recognize calls with a processing error
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FakeOcrEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn recognize(
        &self,
        page: &PageImage,
        _languages: &[String],
    ) -> Result<PageOcrResult, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(OcrError::EngineUnavailable("fake engine is off".to_string()));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(OcrError::ProcessingError("simulated OCR failure".to_string()));
        }
        if self.blank_pages.contains(&page.page_index) {
            return Err(OcrError::NoTextFound);
        }

        let texts = ["Invoice".to_string(), "no".to_string(), format!("page{}", page.page_index + 1)];
        let words = texts
            .iter()
            .enumerate()
            .map(|(i, text)| OcrWord {
                text: text.clone(),
                bbox: BoundingBox {
                    x: 10 + 60 * i as u32,
                    y: 10,
                    w: 50,
                    h: 14,
                },
                confidence: 0.9,
            })
            .collect();

        Ok(PageOcrResult {
            page_index: page.page_index,
            words,
            full_text: texts.join(" "),
        })
    }
}
