//! SVG container codec
//!
//! A container is an ordinary SVG document that any viewer can open. The
//! veridock payload lives inside `<metadata>` as `veridock:section` elements;
//! the thumbnail grid is a regular `<image>` element carrying the same
//! framing attributes, so it is both the visible page preview and a section.
//!
//! This module handles:
//! - Building new containers ([`encode`])
//! - OCR and status patches that copy every other byte ([`patch_ocr`], [`set_ocr_status`])
//! - Partial decoding from memory or from disk ([`decode`], [`decode_file`])
//! - Structural validation ([`validate`])

mod decode;
mod encode;
mod framing;
mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use decode::*;
pub use encode::*;
pub use validate::*;

use crate::models::OcrStatus;
use serde::{Deserialize, Serialize};

/// XML namespace of all veridock elements and attributes
pub const NAMESPACE: &str = "https://veridock.org/ns/container/1";

/// Current container format version
pub const FORMAT_VERSION: u32 = 1;

/// Section discriminant carried in `veridock:kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Metadata,
    Original,
    Thumbnails,
    Ocr,
}

impl SectionKind {
    pub const ALL: [SectionKind; 4] = [
        SectionKind::Metadata,
        SectionKind::Original,
        SectionKind::Thumbnails,
        SectionKind::Ocr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Metadata => "metadata",
            SectionKind::Original => "original",
            SectionKind::Thumbnails => "thumbnails",
            SectionKind::Ocr => "ocr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Media type every section of this kind must declare
    pub fn media_type(&self) -> &'static str {
        match self {
            SectionKind::Metadata | SectionKind::Ocr => "application/json",
            SectionKind::Original => "application/pdf",
            SectionKind::Thumbnails => "image/png",
        }
    }

    /// Sections every container must carry
    pub fn is_required(&self) -> bool {
        !matches!(self, SectionKind::Ocr)
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Framing attributes of one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    pub kind: SectionKind,
    pub media_type: String,
    /// Decoded byte length
    pub length: u64,
    /// Base64 byte length of the body line
    pub encoded_length: u64,
    /// blake3 hex digest of the decoded bytes
    pub digest: String,
}

/// Mutable state held on the container header line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub format_version: u32,
    pub ocr_status: OcrStatus,
    pub ocr_attempts: u32,
}

impl ContainerHeader {
    fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            ocr_status: OcrStatus::Pending,
            ocr_attempts: 0,
        }
    }

    fn to_line(self) -> String {
        format!(
            "{}veridock:format-version=\"{}\" veridock:ocr-status=\"{}\" veridock:ocr-attempts=\"{}\">\n",
            framing::CONTAINER_OPEN,
            self.format_version,
            self.ocr_status,
            self.ocr_attempts
        )
    }
}

/// blake3 hex digest used for section integrity and change detection
pub fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
