//! PDF inspection and rasterization
//!
//! Structure (page count, Info dictionary) comes from lopdf. Pixels come from
//! a [`Renderer`] backend; the production one shells out to `pdftoppm`.
//! Thumbnail grid composition is pure and lives here so every backend tiles
//! pages identically.

mod pdftoppm;

pub use pdftoppm::*;

use crate::error::RenderError;
use crate::models::{GridLayout, MetadataValue, PdfMetadata};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::{Dictionary, Document, Object};
use std::io::Cursor;

/// Structural facts about a PDF
#[derive(Debug, Clone, PartialEq)]
pub struct PdfInfo {
    pub page_count: u32,
    pub metadata: PdfMetadata,
}

/// One rasterized page
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based page index
    pub page_index: usize,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Composed thumbnail grid
#[derive(Debug, Clone)]
pub struct ThumbnailGrid {
    pub png: Vec<u8>,
    pub layout: GridLayout,
}

/// Thumbnail rendering parameters
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailOptions {
    pub dpi: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub max_columns: u32,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            dpi: 150,
            tile_width: 200,
            tile_height: 280,
            max_columns: 4,
        }
    }
}

/// Rasterization backend
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Whether the backend can run at all
    async fn is_available(&self) -> bool;

    /// Rasterize every page at `dpi`, ordered by page index
    async fn render_pages(&self, pdf: &[u8], dpi: u32) -> Result<Vec<PageImage>, RenderError>;

    fn inspect(&self, pdf: &[u8]) -> Result<PdfInfo, RenderError> {
        inspect_pdf(pdf)
    }

    async fn render_full_pages(&self, pdf: &[u8], dpi: u32) -> Result<Vec<PageImage>, RenderError> {
        let mut pages = self.render_pages(pdf, dpi).await?;
        pages.sort_by_key(|p| p.page_index);
        Ok(pages)
    }

    async fn render_thumbnails(
        &self,
        pdf: &[u8],
        options: &ThumbnailOptions,
    ) -> Result<ThumbnailGrid, RenderError> {
        let mut pages = self.render_pages(pdf, options.dpi).await?;
        pages.sort_by_key(|p| p.page_index);
        compose_grid(&pages, options)
    }
}

/// Scale each page to fit its tile and paste it at the tile origin on a
/// white canvas, row-major.
pub fn compose_grid(
    pages: &[PageImage],
    options: &ThumbnailOptions,
) -> Result<ThumbnailGrid, RenderError> {
    if pages.is_empty() {
        return Err(RenderError::CorruptDocument(
            "document rendered no pages".to_string(),
        ));
    }

    let layout = GridLayout::compute(
        pages.len(),
        options.tile_width,
        options.tile_height,
        options.max_columns,
    );
    let mut canvas = RgbImage::from_pixel(layout.width(), layout.height(), Rgb([255, 255, 255]));

    for (page, tile) in pages.iter().zip(&layout.tiles) {
        let image = image::load_from_memory(&page.png)?;
        let thumb = image
            .resize(tile.width, tile.height, FilterType::Lanczos3)
            .to_rgb8();
        image::imageops::overlay(&mut canvas, &thumb, i64::from(tile.x), i64::from(tile.y));
    }

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(canvas).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(ThumbnailGrid { png, layout })
}

/// Page count and Info dictionary via lopdf
pub fn inspect_pdf(pdf: &[u8]) -> Result<PdfInfo, RenderError> {
    let head = &pdf[..pdf.len().min(1024)];
    if !head.windows(5).any(|w| w == b"%PDF-") {
        return Err(RenderError::CorruptDocument(
            "missing %PDF- header".to_string(),
        ));
    }

    let doc = Document::load_mem(pdf).map_err(|e| {
        let message = e.to_string();
        if message.to_lowercase().contains("crypt") {
            RenderError::UnsupportedFeature(message)
        } else {
            RenderError::CorruptDocument(message)
        }
    })?;
    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(RenderError::UnsupportedFeature(
            "encrypted document".to_string(),
        ));
    }

    let page_count = doc.get_pages().len() as u32;
    if page_count == 0 {
        return Err(RenderError::CorruptDocument(
            "document has no pages".to_string(),
        ));
    }

    Ok(PdfInfo {
        page_count,
        metadata: info_dictionary(&doc),
    })
}

fn info_dictionary(doc: &Document) -> PdfMetadata {
    let mut metadata = PdfMetadata::new();
    let info: Option<&Dictionary> = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(info) = info else {
        return metadata;
    };

    for (key, value) in info.iter() {
        let value = match value {
            Object::Reference(id) => doc.get_object(*id).ok().and_then(scalar_value),
            other => scalar_value(other),
        };
        if let Some(value) = value {
            metadata.insert(info_key(key), value);
        }
    }
    metadata
}

fn info_key(key: &[u8]) -> String {
    match key {
        b"Title" => "title".to_string(),
        b"Author" => "author".to_string(),
        b"Subject" => "subject".to_string(),
        b"Keywords" => "keywords".to_string(),
        b"Creator" => "creator".to_string(),
        b"Producer" => "producer".to_string(),
        b"CreationDate" => "creation_date".to_string(),
        b"ModDate" => "modification_date".to_string(),
        other => String::from_utf8_lossy(other).to_lowercase(),
    }
}

fn scalar_value(object: &Object) -> Option<MetadataValue> {
    match object {
        Object::String(bytes, _) => Some(MetadataValue::Text(decode_pdf_string(bytes))),
        Object::Name(name) => Some(MetadataValue::Text(
            String::from_utf8_lossy(name).into_owned(),
        )),
        Object::Integer(i) => Some(MetadataValue::Integer(*i)),
        Object::Real(r) => Some(MetadataValue::Float(f64::from(*r))),
        Object::Boolean(b) => Some(MetadataValue::Text(b.to_string())),
        _ => None,
    }
}

/// Text strings are UTF-16BE with a BOM or single-byte otherwise
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page_png, sample_pdf};
    use lopdf::dictionary;

    #[test]
    fn test_inspect_reads_pages_and_info() {
        let pdf = sample_pdf(3, Some("Quarterly report"));
        let info = inspect_pdf(&pdf).unwrap();
        assert_eq!(info.page_count, 3);
        assert_eq!(
            info.metadata.get("title"),
            Some(&MetadataValue::Text("Quarterly report".to_string()))
        );
        assert_eq!(
            info.metadata.get("author"),
            Some(&MetadataValue::Text("Test Author".to_string()))
        );
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        assert!(matches!(
            inspect_pdf(b"this is not a pdf"),
            Err(RenderError::CorruptDocument(_))
        ));
        assert!(matches!(
            inspect_pdf(b"%PDF-1.4\ngarbage"),
            Err(RenderError::CorruptDocument(_))
        ));
    }

    #[test]
    fn test_inspect_rejects_encrypted() {
        let mut doc = Document::load_mem(&sample_pdf(1, None)).unwrap();
        let encrypt_id = doc.add_object(lopdf::dictionary! {
            "Filter" => "Standard",
            "V" => 1,
            "R" => 2,
            "P" => -4,
        });
        doc.trailer.set("Encrypt", encrypt_id);
        let mut pdf = Vec::new();
        doc.save_to(&mut pdf).unwrap();

        assert!(matches!(
            inspect_pdf(&pdf),
            Err(RenderError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_encrypt_name_in_content_is_not_encryption() {
        let mut pdf = sample_pdf(2, Some("/Encrypt"));
        pdf.extend_from_slice(b"\n% /Encrypt\n");

        let info = inspect_pdf(&pdf).unwrap();
        assert_eq!(info.page_count, 2);
        assert_eq!(
            info.metadata.get("title"),
            Some(&MetadataValue::Text("/Encrypt".to_string()))
        );
    }

    #[test]
    fn test_decode_pdf_string_utf16() {
        let bytes = [0xFE, 0xFF, 0x00, 0x5A, 0x00, 0xF3, 0x01, 0x42, 0x00, 0x77];
        assert_eq!(decode_pdf_string(&bytes), "Zółw");
        assert_eq!(decode_pdf_string(b"plain"), "plain");
    }

    #[test]
    fn test_compose_grid_three_tiles() {
        let pages: Vec<PageImage> = (0..3)
            .map(|i| PageImage {
                page_index: i,
                png: page_png(400, 560, [0, 0, 0]),
                width: 400,
                height: 560,
            })
            .collect();

        let grid = compose_grid(&pages, &ThumbnailOptions::default()).unwrap();
        assert_eq!(grid.layout.tiles.len(), 3);

        let image = image::load_from_memory(&grid.png).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (600, 280));
        // black page content inside the tile, white nowhere else
        assert_eq!(image.get_pixel(10, 10), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(410, 270), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_compose_grid_is_deterministic() {
        let pages = vec![PageImage {
            page_index: 0,
            png: page_png(300, 300, [20, 40, 60]),
            width: 300,
            height: 300,
        }];
        let a = compose_grid(&pages, &ThumbnailOptions::default()).unwrap();
        let b = compose_grid(&pages, &ThumbnailOptions::default()).unwrap();
        assert_eq!(a.png, b.png);

        // square page fits the 200px tile width, leaving white below it
        let image = image::load_from_memory(&a.png).unwrap().to_rgb8();
        assert_eq!(image.get_pixel(100, 250), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_compose_grid_requires_pages() {
        assert!(compose_grid(&[], &ThumbnailOptions::default()).is_err());
    }
}
