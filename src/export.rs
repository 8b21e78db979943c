//! Export container contents to JSON or text, and import OCR from JSON
//!
//! Exports are readable whatever the OCR state: a pending container simply
//! exports an empty `ocr` array. Import only ever merges the `ocr` array;
//! everything else in an export document describes the container and is
//! ignored on the way back in.

use crate::container::{decode, decode_file, patch_ocr, DecodedContainer, SectionKind};
use crate::error::{DecodeError, Error, Result};
use crate::models::{GridLayout, OcrPayload, OcrStatus, PageOcrResult, PdfMetadata};
use crate::ocr::OcrSummary;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportScope {
    All,
    Ocr,
    Thumbnails,
    Metadata,
}

impl ExportScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportScope::All => "all",
            ExportScope::Ocr => "ocr",
            ExportScope::Thumbnails => "thumbnails",
            ExportScope::Metadata => "metadata",
        }
    }

    fn wants_ocr(&self) -> bool {
        matches!(self, ExportScope::All | ExportScope::Ocr)
    }

    fn wants_thumbnails(&self) -> bool {
        matches!(self, ExportScope::All | ExportScope::Thumbnails)
    }
}

impl std::fmt::Display for ExportScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(ExportScope::All),
            "ocr" => Ok(ExportScope::Ocr),
            "thumbnails" => Ok(ExportScope::Thumbnails),
            "metadata" => Ok(ExportScope::Metadata),
            other => Err(Error::Other(format!(
                "unknown export scope '{}' (expected all, ocr, thumbnails or metadata)",
                other
            ))),
        }
    }
}

/// Document facts every export carries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedDocument {
    pub filename: String,
    pub creation_time: String,
    pub pages: u32,
    pub pdf_metadata: PdfMetadata,
    pub ocr_status: OcrStatus,
    pub ocr_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedThumbnails {
    pub layout: GridLayout,
    pub media_type: &'static str,
    /// Grid PNG, standard base64
    pub png: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Export {
    pub exported_at: DateTime<Utc>,
    pub scope: ExportScope,
    pub document: ExportedDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<Vec<PageOcrResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnails: Option<ExportedThumbnails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<OcrSummary>,
}

fn build<F>(scope: ExportScope, decode_fn: F) -> std::result::Result<Export, DecodeError>
where
    F: Fn(&[SectionKind]) -> std::result::Result<DecodedContainer, DecodeError>,
{
    let header_only = decode_fn(&[])?;
    let mut kinds = vec![SectionKind::Metadata];
    if scope.wants_ocr() && header_only.has_section(SectionKind::Ocr) {
        kinds.push(SectionKind::Ocr);
    }
    if scope.wants_thumbnails() {
        kinds.push(SectionKind::Thumbnails);
    }
    let decoded = decode_fn(&kinds)?;

    let metadata = decoded
        .metadata
        .ok_or(DecodeError::SectionMissing(SectionKind::Metadata))?;
    let document = ExportedDocument {
        filename: metadata.filename,
        creation_time: metadata.creation_time,
        pages: metadata.page_count,
        pdf_metadata: metadata.pdf_metadata,
        ocr_status: decoded.header.ocr_status,
        ocr_attempts: decoded.header.ocr_attempts,
    };

    let (languages, ocr, summary) = match (scope.wants_ocr(), decoded.ocr) {
        (false, _) => (None, None, None),
        (true, Some(payload)) => {
            let summary = OcrSummary::from_payload(&payload);
            (Some(payload.languages), Some(payload.pages), Some(summary))
        }
        (true, None) => (None, Some(Vec::new()), None),
    };

    let thumbnails = decoded.thumbnails.map(|png| ExportedThumbnails {
        layout: metadata.thumbnail_layout,
        media_type: SectionKind::Thumbnails.media_type(),
        png: STANDARD.encode(png),
    });

    Ok(Export {
        exported_at: Utc::now(),
        scope,
        document,
        languages,
        ocr,
        thumbnails,
        summary,
    })
}

/// Export from an in-memory container
pub fn export(container: &[u8], scope: ExportScope) -> std::result::Result<Export, DecodeError> {
    build(scope, |kinds| decode(container, kinds))
}

/// Export straight from disk; the original is never read
pub fn export_file(path: &Path, scope: ExportScope) -> std::result::Result<Export, DecodeError> {
    build(scope, |kinds| decode_file(path, kinds))
}

/// Plain-text rendering: a short header, then OCR text page by page
pub fn render_text(export: &Export) -> String {
    let doc = &export.document;
    let mut out = String::new();
    let _ = writeln!(out, "veridock export: {}", doc.filename);
    let _ = writeln!(out, "Converted:  {}", doc.creation_time);
    let _ = writeln!(out, "Pages:      {}", doc.pages);
    let _ = writeln!(out, "OCR status: {}", doc.ocr_status);
    if let Some(languages) = &export.languages {
        let _ = writeln!(out, "Languages:  {}", languages.join(", "));
    }
    for (key, value) in &doc.pdf_metadata {
        let _ = writeln!(out, "{:<11} {}", format!("{}:", key), value);
    }
    out.push_str(&"=".repeat(50));
    out.push_str("\n\n");

    match export.ocr.as_deref() {
        Some([]) => {
            let _ = writeln!(out, "(no OCR text, status {})", doc.ocr_status);
        }
        Some(pages) => {
            for page in pages {
                let _ = writeln!(out, "PAGE {}", page.page_index + 1);
                out.push_str(&"-".repeat(20));
                out.push('\n');
                out.push_str(&page.full_text);
                out.push_str("\n\n");
            }
        }
        None => {}
    }
    out
}

/// Keys an export writes that import does not take back
const EXPORT_ONLY_KEYS: &[&str] = &[
    "document",
    "thumbnails",
    "summary",
    "exported_at",
    "scope",
];

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub container: Vec<u8>,
    pub pages: usize,
    pub words: usize,
    pub ignored_keys: Vec<String>,
}

/// Merge the `ocr` array of an export document into a container, with the
/// same checks as a daemon OCR patch
pub fn import(container: &[u8], json: &[u8]) -> Result<ImportOutcome> {
    let value: serde_json::Value = serde_json::from_slice(json)?;
    let mut object = match value {
        serde_json::Value::Object(map) => map,
        _ => return Err(Error::Import("expected a JSON object".to_string())),
    };

    let pages: Vec<PageOcrResult> = match object.remove("ocr") {
        Some(ocr) => serde_json::from_value(ocr)
            .map_err(|e| Error::Import(format!("invalid `ocr` array: {}", e)))?,
        None => return Err(Error::Import("no `ocr` array to import".to_string())),
    };
    if pages.is_empty() {
        return Err(Error::Import(
            "`ocr` array is empty; nothing to import".to_string(),
        ));
    }

    let languages: Vec<String> = match object.remove("languages") {
        Some(langs) => serde_json::from_value(langs)
            .map_err(|e| Error::Import(format!("invalid `languages`: {}", e)))?,
        None => Vec::new(),
    };

    let mut ignored_keys: Vec<String> = object.keys().cloned().collect();
    ignored_keys.sort();
    for key in &ignored_keys {
        if EXPORT_ONLY_KEYS.contains(&key.as_str()) {
            warn!("Ignoring export-only key `{}`", key);
        } else {
            warn!("Ignoring unknown key `{}`", key);
        }
    }

    let payload = OcrPayload::new(languages, pages);
    let patched = patch_ocr(container, &payload)?;
    Ok(ImportOutcome {
        container: patched,
        pages: payload.pages.len(),
        words: payload.word_count(),
        ignored_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{sample_container, sample_payload};
    use crate::container::validate;
    use crate::error::PatchError;

    #[test]
    fn test_scope_parsing() {
        assert_eq!("OCR".parse::<ExportScope>().unwrap(), ExportScope::Ocr);
        assert_eq!("metadata".parse::<ExportScope>().unwrap(), ExportScope::Metadata);
        assert!("pages".parse::<ExportScope>().is_err());
    }

    #[test]
    fn test_export_ocr_of_pending_is_empty_array() {
        let container = sample_container(2);
        let export = export(&container, ExportScope::Ocr).unwrap();

        assert_eq!(export.document.ocr_status, OcrStatus::Pending);
        assert_eq!(export.document.pages, 2);
        assert_eq!(export.ocr, Some(Vec::new()));
        assert!(export.thumbnails.is_none());

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["ocr"], serde_json::json!([]));
        assert_eq!(json["document"]["filename"], "invoice.pdf");
        assert!(json.get("thumbnails").is_none());
    }

    #[test]
    fn test_export_all_of_completed() {
        let container = patch_ocr(&sample_container(2), &sample_payload(2)).unwrap();
        let export = export(&container, ExportScope::All).unwrap();

        assert_eq!(export.ocr.as_ref().map(Vec::len), Some(2));
        let summary = export.summary.as_ref().unwrap();
        assert_eq!(summary.total_pages, 2);
        let thumbs = export.thumbnails.as_ref().unwrap();
        assert_eq!(thumbs.layout.tiles.len(), 2);
        assert_eq!(STANDARD.decode(&thumbs.png).unwrap(), b"\x89PNG thumbnail");

        let text = render_text(&export);
        assert!(text.contains("PAGE 1"));
        assert!(text.contains("PAGE 2"));
        assert!(text.contains("OCR status: completed"));
    }

    #[test]
    fn test_metadata_scope_has_document_only() {
        let container = patch_ocr(&sample_container(1), &sample_payload(1)).unwrap();
        let json = serde_json::to_value(export(&container, ExportScope::Metadata).unwrap()).unwrap();
        assert!(json.get("ocr").is_none());
        assert!(json.get("summary").is_none());
        assert_eq!(json["document"]["ocr_status"], "completed");
    }

    #[test]
    fn test_import_roundtrips_export() {
        let completed = patch_ocr(&sample_container(2), &sample_payload(2)).unwrap();
        let exported = serde_json::to_vec(&export(&completed, ExportScope::All).unwrap()).unwrap();

        let outcome = import(&sample_container(2), &exported).unwrap();
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.container, completed);
        assert!(outcome.ignored_keys.contains(&"document".to_string()));
        assert!(validate(&outcome.container).ok);
    }

    #[test]
    fn test_import_rejects_bad_input() {
        let container = sample_container(1);
        assert!(matches!(import(&container, b"[]"), Err(Error::Import(_))));
        assert!(matches!(
            import(&container, br#"{"document": {}}"#),
            Err(Error::Import(_))
        ));
        assert!(matches!(
            import(&container, br#"{"ocr": []}"#),
            Err(Error::Import(_))
        ));

        let out_of_range = serde_json::json!({
            "ocr": [{"page_index": 4, "words": [], "full_text": ""}]
        });
        let err = import(&container, out_of_range.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Patch(PatchError::PageOutOfRange { .. })));
    }

    #[test]
    fn test_import_rejects_partial_or_bad_confidence() {
        let container = sample_container(3);
        let page = |index: usize, confidence: f64| {
            serde_json::json!({
                "page_index": index,
                "words": [{"text": "Total", "bbox": {"x": 1, "y": 2, "w": 30, "h": 10}, "confidence": confidence}],
                "full_text": "Total"
            })
        };

        let partial = serde_json::json!({ "ocr": [page(0, 0.9)] });
        let err = import(&container, partial.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Patch(PatchError::MissingPages(ref missing)) if missing == "1, 2"));

        let scaled = serde_json::json!({ "ocr": [page(0, 42.0), page(1, 0.9), page(2, 0.9)] });
        let err = import(&container, scaled.to_string().as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            Error::Patch(PatchError::InvalidConfidence { page_index: 0, .. })
        ));
    }
}
