//! Container validation
//!
//! Collects every problem it can find instead of stopping at the first one.
//! Problems make a container invalid; warnings are worth a look but do not.

use super::decode::decode_body;
use super::framing::Layout;
use super::{SectionKind, FORMAT_VERSION, NAMESPACE};
use crate::models::{DocumentMetadata, OcrPayload, OcrStatus};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Embedded originals smaller than this are reported as suspicious
const SMALL_ORIGINAL_BYTES: usize = 100;

/// Outcome of [`validate`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub problems: Vec<String>,
    pub warnings: Vec<String>,
    pub ocr_status: Option<OcrStatus>,
    pub page_count: Option<u32>,
    pub sections: Vec<SectionKind>,
}

impl ValidationReport {
    fn problem(&mut self, message: impl Into<String>) {
        self.problems.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Check framing, lengths, digests, metadata schema and OCR consistency
pub fn validate(container: &[u8]) -> ValidationReport {
    let mut report = ValidationReport::default();
    check(container, &mut report);
    report.ok = report.problems.is_empty();
    report
}

fn check(container: &[u8], report: &mut ValidationReport) {
    let head_len = container.len().min(2048);
    let head = String::from_utf8_lossy(&container[..head_len]);
    if !head.contains(&format!("xmlns:veridock=\"{}\"", NAMESPACE)) {
        report.problem("missing veridock namespace declaration");
    }

    let layout = match Layout::scan(container) {
        Ok(layout) => layout,
        Err(e) => {
            report.problem(e.to_string());
            return;
        }
    };

    report.ocr_status = Some(layout.header.ocr_status);
    if layout.header.format_version != FORMAT_VERSION {
        report.problem(format!(
            "unsupported format version {}",
            layout.header.format_version
        ));
    }

    let mut counts: HashMap<SectionKind, usize> = HashMap::new();
    let mut bodies: HashMap<SectionKind, Vec<u8>> = HashMap::new();

    for section in &layout.sections {
        let d = &section.descriptor;
        report.sections.push(d.kind);
        *counts.entry(d.kind).or_default() += 1;

        if d.media_type != d.kind.media_type() {
            report.problem(format!(
                "{} section has media type {}, expected {}",
                d.kind,
                d.media_type,
                d.kind.media_type()
            ));
        }

        let encoded = &container[section.body.clone()];
        if encoded.len() as u64 != d.encoded_length {
            report.problem(format!(
                "{} section declares {} encoded bytes but holds {}",
                d.kind,
                d.encoded_length,
                encoded.len()
            ));
        }

        match decode_body(encoded, d) {
            Ok(bytes) => {
                bodies.insert(d.kind, bytes);
            }
            Err(e) => report.problem(e.to_string()),
        }
    }

    for kind in SectionKind::ALL {
        match counts.get(&kind).copied().unwrap_or(0) {
            0 if kind.is_required() => report.problem(format!("required {} section missing", kind)),
            0 | 1 => {}
            n => report.problem(format!("{} section appears {} times", kind, n)),
        }
    }

    let metadata = bodies.get(&SectionKind::Metadata).and_then(|bytes| {
        match serde_json::from_slice::<DocumentMetadata>(bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                report.problem(format!("metadata does not match the schema: {}", e));
                None
            }
        }
    });

    if let Some(meta) = &metadata {
        report.page_count = Some(meta.page_count);
        check_metadata(meta, &layout, report);
    }

    if let Some(original) = bodies.get(&SectionKind::Original) {
        if original.len() < SMALL_ORIGINAL_BYTES {
            report.warning(format!(
                "embedded PDF is suspiciously small ({} bytes)",
                original.len()
            ));
        }
        if !original.starts_with(b"%PDF-") {
            report.warning("embedded original does not start with a PDF header");
        }
    }

    let has_ocr = counts.contains_key(&SectionKind::Ocr);
    match (layout.header.ocr_status, has_ocr) {
        (OcrStatus::Completed, false) => {
            report.problem("status is completed but there is no OCR section")
        }
        (status, true) if status != OcrStatus::Completed => {
            report.problem(format!("status is {} but an OCR section is present", status))
        }
        _ => {}
    }

    if let Some(bytes) = bodies.get(&SectionKind::Ocr) {
        match serde_json::from_slice::<OcrPayload>(bytes) {
            Ok(payload) => {
                check_ocr_confidence(&payload, report);
                if let Some(meta) = &metadata {
                    check_ocr_coverage(&payload, meta.page_count, report);
                }
            }
            Err(e) => report.problem(format!("OCR payload does not match the schema: {}", e)),
        }
    }
}

fn check_metadata(meta: &DocumentMetadata, layout: &Layout, report: &mut ValidationReport) {
    if meta.page_count == 0 {
        report.problem("metadata page_count must be at least 1");
    }
    if meta.thumbnail_layout.tiles.len() != meta.page_count as usize {
        report.problem(format!(
            "thumbnail layout has {} tiles for {} pages",
            meta.thumbnail_layout.tiles.len(),
            meta.page_count
        ));
    }
    if chrono::DateTime::parse_from_rfc3339(&meta.creation_time).is_err() {
        report.problem(format!(
            "creation_time is not an RFC 3339 timestamp: {}",
            meta.creation_time
        ));
    }

    if let Some(original) = layout.section(SectionKind::Original) {
        if original.descriptor.length != meta.original_length {
            report.problem(format!(
                "metadata records an original of {} bytes, section declares {}",
                meta.original_length, original.descriptor.length
            ));
        }
        if original.descriptor.digest != meta.original_digest {
            report.problem("metadata original digest does not match the original section");
        }
    }
}

fn check_ocr_coverage(payload: &OcrPayload, page_count: u32, report: &mut ValidationReport) {
    let mut seen = BTreeSet::new();
    for page in &payload.pages {
        if page.page_index >= page_count as usize {
            report.problem(format!(
                "OCR page {} is beyond page_count {}",
                page.page_index, page_count
            ));
        } else if !seen.insert(page.page_index) {
            report.problem(format!("OCR page {} appears more than once", page.page_index));
        }
    }

    let missing: Vec<String> = (0..page_count as usize)
        .filter(|i| !seen.contains(i))
        .map(|i| i.to_string())
        .collect();
    if !missing.is_empty() {
        report.problem(format!("OCR data missing for page(s) {}", missing.join(", ")));
    }
}

fn check_ocr_confidence(payload: &OcrPayload, report: &mut ValidationReport) {
    for page in &payload.pages {
        let bad = page
            .words
            .iter()
            .filter(|w| !w.has_valid_confidence())
            .count();
        if bad > 0 {
            report.problem(format!(
                "OCR page {} has {} word(s) with confidence outside 0.0 - 1.0",
                page.page_index, bad
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{sample_container, sample_payload};
    use crate::container::encode::section_element;
    use crate::container::framing::splice;
    use crate::container::{patch_ocr, set_ocr_status};

    #[test]
    fn test_valid_pending_container() {
        let report = validate(&sample_container(2));
        assert!(report.ok, "problems: {:?}", report.problems);
        assert_eq!(report.page_count, Some(2));
        assert_eq!(report.ocr_status, Some(OcrStatus::Pending));
        // sample PDF is tiny
        assert!(report.warnings.iter().any(|w| w.contains("suspiciously small")));
    }

    #[test]
    fn test_valid_completed_container() {
        let container = patch_ocr(&sample_container(3), &sample_payload(3)).unwrap();
        let report = validate(&container);
        assert!(report.ok, "problems: {:?}", report.problems);
        assert!(report.sections.contains(&SectionKind::Ocr));
    }

    #[test]
    fn test_truncated_original_is_reported() {
        let container = sample_container(1);
        let text = String::from_utf8(container).unwrap();

        // drop the last eight base64 characters of the original body
        let open = text.find("veridock:kind=\"original\"").unwrap();
        let body_start = open + text[open..].find('\n').unwrap() + 1;
        let body_end = body_start + text[body_start..].find('\n').unwrap();
        let mut truncated = text[..body_end - 8].to_string();
        truncated.push_str(&text[body_end..]);

        let report = validate(truncated.as_bytes());
        assert!(!report.ok);
        assert!(report
            .problems
            .iter()
            .any(|p| p.contains("original section declares")));
    }

    #[test]
    fn test_not_a_container() {
        let report = validate(b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>\n");
        assert!(!report.ok);
        assert!(report.problems.iter().any(|p| p.contains("namespace")));
        assert!(report.problems.iter().any(|p| p.contains("container header")));
    }

    #[test]
    fn test_status_and_ocr_section_disagree() {
        let container = sample_container(1);
        let text = String::from_utf8(container).unwrap();
        let forged = text.replace(
            "veridock:ocr-status=\"pending\"",
            "veridock:ocr-status=\"completed\"",
        );
        let report = validate(forged.as_bytes());
        assert!(!report.ok);
        assert!(report
            .problems
            .iter()
            .any(|p| p.contains("no OCR section")));
    }

    #[test]
    fn test_failed_status_is_valid() {
        let container = set_ocr_status(&sample_container(1), OcrStatus::Failed).unwrap();
        assert!(validate(&container).ok);
    }

    /// Swap in an OCR section that `patch_ocr` would refuse to write
    fn with_raw_ocr(container: &[u8], payload: &OcrPayload) -> Vec<u8> {
        let layout = Layout::scan(container).unwrap();
        let span = layout.section(SectionKind::Ocr).unwrap().span.clone();
        let section = section_element(SectionKind::Ocr, &serde_json::to_vec(payload).unwrap());
        splice(container, vec![(span, section)])
    }

    #[test]
    fn test_partial_ocr_coverage_is_reported() {
        let completed = patch_ocr(&sample_container(3), &sample_payload(3)).unwrap();
        let mut payload = sample_payload(3);
        payload.pages.remove(1);
        let report = validate(&with_raw_ocr(&completed, &payload));
        assert!(!report.ok);
        assert!(report.problems.iter().any(|p| p.contains("page(s) 1")));
    }

    #[test]
    fn test_confidence_out_of_range_is_reported() {
        let completed = patch_ocr(&sample_container(2), &sample_payload(2)).unwrap();
        let mut payload = sample_payload(2);
        payload.pages[1].words[0].confidence = 42.0;
        let report = validate(&with_raw_ocr(&completed, &payload));
        assert!(!report.ok);
        assert!(report
            .problems
            .iter()
            .any(|p| p.contains("OCR page 1 has 1 word(s) with confidence")));
    }
}
