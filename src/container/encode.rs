//! Container construction and byte-preserving patches

use super::decode::{decode_body, parse_json};
use super::framing::{self, splice, xml_escape, Layout};
use super::{digest, ContainerHeader, SectionKind, NAMESPACE};
use crate::error::{EncodeError, PatchError};
use crate::models::{DocumentMetadata, OcrPayload, OcrStatus};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashSet;

/// Height of the visible header band above the thumbnail grid
const HEADER_HEIGHT: u32 = 80;

/// Minimum canvas width so the header text always fits
const MIN_WIDTH: u32 = 400;

fn descriptor_attrs(kind: SectionKind, decoded: &[u8], encoded: &str) -> String {
    format!(
        "veridock:kind=\"{}\" veridock:media-type=\"{}\" veridock:length=\"{}\" veridock:encoded-length=\"{}\" veridock:blake3=\"{}\"",
        kind,
        kind.media_type(),
        decoded.len(),
        encoded.len(),
        digest(decoded)
    )
}

pub(crate) fn section_element(kind: SectionKind, decoded: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(decoded);
    format!(
        "{}{}>\n{}\n{}\n",
        framing::SECTION_OPEN,
        descriptor_attrs(kind, decoded, &encoded),
        encoded,
        framing::SECTION_CLOSE
    )
    .into_bytes()
}

fn status_label(status: OcrStatus) -> String {
    format!(
        "<text {} x=\"16\" y=\"68\" font-family=\"sans-serif\" font-size=\"12\" fill=\"#555555\">OCR: {}</text>\n",
        framing::STATUS_LABEL_ID,
        status
    )
}

fn conversion_date(creation_time: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(creation_time)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| creation_time.to_string())
}

/// Build a new container with OCR pending.
///
/// The original digest and length in the stored metadata are always taken
/// from `original`, whatever the caller put there.
pub fn encode(
    original: &[u8],
    thumbnail_png: &[u8],
    metadata: &DocumentMetadata,
) -> Result<Vec<u8>, EncodeError> {
    if original.is_empty() {
        return Err(EncodeError::EmptyOriginal);
    }
    if metadata.page_count == 0 {
        return Err(EncodeError::MissingPageCount);
    }
    if thumbnail_png.is_empty() {
        return Err(EncodeError::EmptyThumbnail);
    }

    let mut metadata = metadata.clone();
    metadata.original_length = original.len() as u64;
    metadata.original_digest = digest(original);
    let metadata_json = serde_json::to_vec(&metadata)?;

    let layout = &metadata.thumbnail_layout;
    let grid_width = layout.width().max(1);
    let grid_height = layout.height().max(1);
    let width = grid_width.max(MIN_WIDTH);
    let height = HEADER_HEIGHT + grid_height;
    let title = xml_escape(&metadata.filename);
    let pages = if metadata.page_count == 1 { "page" } else { "pages" };

    let mut out = Vec::with_capacity(original.len() * 4 / 3 + thumbnail_png.len() * 4 / 3 + 4096);
    out.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.extend_from_slice(
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:veridock=\"{}\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {} {}\">\n",
            NAMESPACE, width, height, width, height
        )
        .as_bytes(),
    );
    out.extend_from_slice(format!("<title>{}</title>\n", title).as_bytes());
    out.extend_from_slice(b"<metadata>\n");
    out.extend_from_slice(ContainerHeader::new().to_line().as_bytes());
    out.extend_from_slice(&section_element(SectionKind::Metadata, &metadata_json));
    out.extend_from_slice(&section_element(SectionKind::Original, original));
    out.extend_from_slice(format!("{}\n</metadata>\n", framing::CONTAINER_CLOSE).as_bytes());

    out.extend_from_slice(
        format!(
            "<rect x=\"0\" y=\"0\" width=\"{}\" height=\"{}\" fill=\"#ffffff\"/>\n",
            width, height
        )
        .as_bytes(),
    );
    out.extend_from_slice(
        format!(
            "<text id=\"veridock-title\" x=\"16\" y=\"28\" font-family=\"sans-serif\" font-size=\"16\" font-weight=\"bold\">{}</text>\n",
            title
        )
        .as_bytes(),
    );
    out.extend_from_slice(
        format!(
            "<text id=\"veridock-info\" x=\"16\" y=\"50\" font-family=\"sans-serif\" font-size=\"12\" fill=\"#555555\">{} {}, converted {}</text>\n",
            metadata.page_count,
            pages,
            xml_escape(&conversion_date(&metadata.creation_time))
        )
        .as_bytes(),
    );
    out.extend_from_slice(status_label(OcrStatus::Pending).as_bytes());

    let encoded_png = STANDARD.encode(thumbnail_png);
    out.extend_from_slice(
        format!(
            "{}{} x=\"0\" y=\"{}\" width=\"{}\" height=\"{}\" href=\"data:image/png;base64,\n",
            framing::IMAGE_OPEN,
            descriptor_attrs(SectionKind::Thumbnails, thumbnail_png, &encoded_png),
            HEADER_HEIGHT,
            grid_width,
            grid_height
        )
        .as_bytes(),
    );
    out.extend_from_slice(encoded_png.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(framing::IMAGE_CLOSE.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(format!("{}\n", framing::SVG_CLOSE).as_bytes());

    Ok(out)
}

fn scan_for_patch(container: &[u8]) -> Result<Layout, PatchError> {
    let layout = Layout::scan(container)?;
    layout.verify_lengths()?;
    Ok(layout)
}

fn stored_metadata(container: &[u8], layout: &Layout) -> Result<DocumentMetadata, PatchError> {
    let section = layout
        .section(SectionKind::Metadata)
        .ok_or_else(|| PatchError::Malformed("metadata section missing".to_string()))?;
    let bytes = decode_body(&container[section.body.clone()], &section.descriptor)?;
    Ok(parse_json(SectionKind::Metadata, &bytes)?)
}

fn check_indices(payload: &OcrPayload, page_count: u32) -> Result<(), PatchError> {
    let mut seen = HashSet::new();
    for page in &payload.pages {
        if page.page_index >= page_count as usize {
            return Err(PatchError::PageOutOfRange {
                page_index: page.page_index,
                page_count,
            });
        }
        if !seen.insert(page.page_index) {
            return Err(PatchError::DuplicatePage(page.page_index));
        }
    }
    Ok(())
}

/// Every page present exactly once, every confidence within 0.0 - 1.0.
/// Indices must already have passed [`check_indices`].
fn check_contents(payload: &OcrPayload, page_count: u32) -> Result<(), PatchError> {
    let covered: HashSet<usize> = payload.pages.iter().map(|p| p.page_index).collect();
    let missing: Vec<String> = (0..page_count as usize)
        .filter(|i| !covered.contains(i))
        .map(|i| i.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PatchError::MissingPages(missing.join(", ")));
    }

    for page in &payload.pages {
        for word in &page.words {
            if !word.has_valid_confidence() {
                return Err(PatchError::InvalidConfidence {
                    page_index: page.page_index,
                    word: word.text.clone(),
                    confidence: word.confidence,
                });
            }
        }
    }
    Ok(())
}

/// Insert or replace the OCR section and mark the container completed.
///
/// All other sections, the metadata and the surrounding markup are copied
/// unchanged. Applying the same payload twice yields identical bytes.
pub fn patch_ocr(container: &[u8], payload: &OcrPayload) -> Result<Vec<u8>, PatchError> {
    let layout = scan_for_patch(container)?;
    let metadata = stored_metadata(container, &layout)?;
    check_indices(payload, metadata.page_count)?;

    let existing = layout.section(SectionKind::Ocr);
    if layout.header.ocr_status == OcrStatus::Completed {
        if let Some(section) = existing {
            let bytes = decode_body(&container[section.body.clone()], &section.descriptor)?;
            let stored: OcrPayload = parse_json(SectionKind::Ocr, &bytes)?;
            if stored.pages.len() != payload.pages.len() {
                return Err(PatchError::PageCountMismatch {
                    existing: stored.pages.len(),
                    payload: payload.pages.len(),
                });
            }
        }
    }
    check_contents(payload, metadata.page_count)?;

    let normalized = OcrPayload::new(payload.languages.clone(), payload.pages.clone());
    let section = section_element(SectionKind::Ocr, &serde_json::to_vec(&normalized)?);

    let header = ContainerHeader {
        ocr_status: OcrStatus::Completed,
        ..layout.header
    };
    let mut edits = vec![(layout.header_line.clone(), header.to_line().into_bytes())];
    match existing {
        Some(old) => edits.push((old.span.clone(), section)),
        None => edits.push((layout.container_close..layout.container_close, section)),
    }
    if let Some(label) = &layout.status_label {
        edits.push((label.clone(), status_label(OcrStatus::Completed).into_bytes()));
    }

    Ok(splice(container, edits))
}

/// Status-only patch for OCR bookkeeping.
///
/// `failed` bumps the attempt counter. Moving away from `completed` drops the
/// OCR section so status and payload never disagree.
pub fn set_ocr_status(container: &[u8], status: OcrStatus) -> Result<Vec<u8>, PatchError> {
    let layout = scan_for_patch(container)?;
    let existing = layout.section(SectionKind::Ocr);

    if status == OcrStatus::Completed && existing.is_none() {
        return Err(PatchError::Malformed(
            "cannot mark completed without an OCR section".to_string(),
        ));
    }

    let mut header = ContainerHeader {
        ocr_status: status,
        ..layout.header
    };
    if status == OcrStatus::Failed {
        header.ocr_attempts = header.ocr_attempts.saturating_add(1);
    }

    let mut edits = vec![(layout.header_line.clone(), header.to_line().into_bytes())];
    if status != OcrStatus::Completed {
        if let Some(old) = existing {
            edits.push((old.span.clone(), Vec::new()));
        }
    }
    if let Some(label) = &layout.status_label {
        edits.push((label.clone(), status_label(status).into_bytes()));
    }

    Ok(splice(container, edits))
}
