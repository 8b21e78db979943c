//! Document record, OCR result and thumbnail layout types.
//!
//! These are the values carried inside a container. Everything here derives
//! `Serialize`/`Deserialize` because the container stores them as JSON and
//! the export tool projects them back out.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// OCR processing state persisted in the container header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl OcrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrStatus::Pending => "pending",
            OcrStatus::InProgress => "in_progress",
            OcrStatus::Completed => "completed",
            OcrStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OcrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OcrStatus::Pending),
            "in_progress" => Ok(OcrStatus::InProgress),
            "completed" => Ok(OcrStatus::Completed),
            "failed" => Ok(OcrStatus::Failed),
            _ => Err(Error::Other(format!("Unknown OCR status: {}", s))),
        }
    }
}

/// A scalar value from the PDF Info dictionary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Integer(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Text(v) => f.write_str(v),
        }
    }
}

/// PDF Info dictionary entries, keyed by lowercase name (`title`, `author`, ...)
pub type PdfMetadata = BTreeMap<String, MetadataValue>;

/// Word bounding box in page-pixel space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// A recognized word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bbox: BoundingBox,
    /// Recognition confidence, 0.0 - 1.0
    pub confidence: f32,
}

impl OcrWord {
    /// Confidence is a finite value in 0.0 - 1.0
    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// OCR output for a single page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOcrResult {
    /// 0-based page index
    pub page_index: usize,
    pub words: Vec<OcrWord>,
    pub full_text: String,
}

impl PageOcrResult {
    /// Result for a page on which the engine found nothing
    pub fn empty(page_index: usize) -> Self {
        Self {
            page_index,
            words: Vec::new(),
            full_text: String::new(),
        }
    }

    pub fn average_confidence(&self) -> Option<f32> {
        if self.words.is_empty() {
            return None;
        }
        let total: f32 = self.words.iter().map(|w| w.confidence).sum();
        Some(total / self.words.len() as f32)
    }
}

/// Document-level OCR payload stored in the container's OCR section.
///
/// Carries no timestamps: the same pages and languages always serialize to
/// the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPayload {
    #[serde(default)]
    pub languages: Vec<String>,
    pub pages: Vec<PageOcrResult>,
}

impl OcrPayload {
    pub fn new(languages: Vec<String>, mut pages: Vec<PageOcrResult>) -> Self {
        pages.sort_by_key(|p| p.page_index);
        Self { languages, pages }
    }

    pub fn word_count(&self) -> usize {
        self.pages.iter().map(|p| p.words.len()).sum()
    }
}

/// Position of one page inside the thumbnail grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRect {
    pub page_index: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Geometry of the composed thumbnail grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles: Vec<TileRect>,
}

impl GridLayout {
    /// Row-major layout with at most `max_columns` tiles per row
    pub fn compute(page_count: usize, tile_width: u32, tile_height: u32, max_columns: u32) -> Self {
        let columns = (page_count as u32).clamp(1, max_columns.max(1));
        let rows = (page_count as u32).div_ceil(columns).max(1);

        let tiles = (0..page_count)
            .map(|i| {
                let col = i as u32 % columns;
                let row = i as u32 / columns;
                TileRect {
                    page_index: i,
                    x: col * tile_width,
                    y: row * tile_height,
                    width: tile_width,
                    height: tile_height,
                }
            })
            .collect();

        Self {
            columns,
            rows,
            tile_width,
            tile_height,
            tiles,
        }
    }

    pub fn width(&self) -> u32 {
        self.columns * self.tile_width
    }

    pub fn height(&self) -> u32 {
        self.rows * self.tile_height
    }
}

/// Immutable per-document metadata written once at conversion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub filename: String,
    pub source_path: String,
    /// RFC 3339 timestamp of conversion
    pub creation_time: String,
    pub page_count: u32,
    #[serde(default)]
    pub pdf_metadata: PdfMetadata,
    /// Decoded byte length of the embedded original
    pub original_length: u64,
    /// blake3 hex digest of the embedded original
    pub original_digest: String,
    pub thumbnail_layout: GridLayout,
}

/// Full view of a document as recorded in its container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub metadata: DocumentMetadata,
    pub ocr_status: OcrStatus,
    pub ocr_attempts: u32,
    /// Present only when `ocr_status` is `completed`
    pub ocr_data: Option<OcrPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_status_roundtrip() {
        for status in [
            OcrStatus::Pending,
            OcrStatus::InProgress,
            OcrStatus::Completed,
            OcrStatus::Failed,
        ] {
            let parsed: OcrStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("done".parse::<OcrStatus>().is_err());
    }

    #[test]
    fn test_grid_layout_three_pages() {
        let layout = GridLayout::compute(3, 200, 280, 4);
        assert_eq!(layout.columns, 3);
        assert_eq!(layout.rows, 1);
        assert_eq!(layout.tiles.len(), 3);
        assert_eq!(layout.tiles[2].x, 400);
        assert_eq!(layout.width(), 600);
        assert_eq!(layout.height(), 280);
    }

    #[test]
    fn test_grid_layout_wraps_after_max_columns() {
        let layout = GridLayout::compute(9, 200, 280, 4);
        assert_eq!(layout.columns, 4);
        assert_eq!(layout.rows, 3);
        let last = layout.tiles.last().unwrap();
        assert_eq!((last.x, last.y), (0, 560));
    }

    #[test]
    fn test_metadata_value_untagged() {
        let json = r#"{"pages": 3, "title": "Report", "version": 1.7}"#;
        let meta: PdfMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta["pages"], MetadataValue::Integer(3));
        assert_eq!(meta["title"], MetadataValue::Text("Report".to_string()));
        assert_eq!(meta["version"], MetadataValue::Float(1.7));
    }

    #[test]
    fn test_payload_sorts_pages() {
        let payload = OcrPayload::new(
            vec!["eng".to_string()],
            vec![PageOcrResult::empty(2), PageOcrResult::empty(0), PageOcrResult::empty(1)],
        );
        let order: Vec<usize> = payload.pages.iter().map(|p| p.page_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
