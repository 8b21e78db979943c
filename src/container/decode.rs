//! Partial decoding from memory and from disk

use super::framing::{read_frames, Frame};
use super::{digest, ContainerHeader, SectionDescriptor, SectionKind};
use crate::error::DecodeError;
use crate::models::{DocumentMetadata, DocumentRecord, OcrPayload};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

/// The requested subset of a container.
///
/// `sections` always lists every descriptor found; payload fields are only
/// populated for the kinds that were asked for.
#[derive(Debug, Clone)]
pub struct DecodedContainer {
    pub header: ContainerHeader,
    pub sections: Vec<SectionDescriptor>,
    pub metadata: Option<DocumentMetadata>,
    pub original: Option<Vec<u8>>,
    pub thumbnails: Option<Vec<u8>>,
    pub ocr: Option<OcrPayload>,
}

/// Identity of the immutable parts of a container.
///
/// Taken before a long OCR job and compared again under the lock, so a
/// container replaced or hand-edited in the meantime is never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub original_digest: String,
    pub metadata_digest: String,
}

impl DecodedContainer {
    pub fn descriptor(&self, kind: SectionKind) -> Option<&SectionDescriptor> {
        self.sections.iter().find(|d| d.kind == kind)
    }

    pub fn has_section(&self, kind: SectionKind) -> bool {
        self.descriptor(kind).is_some()
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        Some(Fingerprint {
            original_digest: self.descriptor(SectionKind::Original)?.digest.clone(),
            metadata_digest: self.descriptor(SectionKind::Metadata)?.digest.clone(),
        })
    }

    /// Assemble the full document record; requires the metadata section
    pub fn into_record(self) -> Result<DocumentRecord, DecodeError> {
        let metadata = self
            .metadata
            .ok_or(DecodeError::SectionMissing(SectionKind::Metadata))?;
        Ok(DocumentRecord {
            metadata,
            ocr_status: self.header.ocr_status,
            ocr_attempts: self.header.ocr_attempts,
            ocr_data: self.ocr,
        })
    }
}

/// Decode the requested sections of an in-memory container.
///
/// Unrequested bodies are skipped without being base64-decoded or copied.
pub fn decode(container: &[u8], sections: &[SectionKind]) -> Result<DecodedContainer, DecodeError> {
    let mut cursor = Cursor::new(container);
    let (header, frames) = read_frames(&mut cursor, sections)?;
    assemble(header, frames, sections)
}

/// Decode the requested sections straight from a file, seeking over the
/// bodies that were not asked for.
pub fn decode_file(path: &Path, sections: &[SectionKind]) -> Result<DecodedContainer, DecodeError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let (header, frames) = read_frames(&mut reader, sections)?;
    assemble(header, frames, sections)
}

/// Header and section descriptors only
pub fn read_header(path: &Path) -> Result<DecodedContainer, DecodeError> {
    decode_file(path, &[])
}

fn assemble(
    header: ContainerHeader,
    frames: Vec<Frame>,
    wanted: &[SectionKind],
) -> Result<DecodedContainer, DecodeError> {
    let mut out = DecodedContainer {
        header,
        sections: Vec::with_capacity(frames.len()),
        metadata: None,
        original: None,
        thumbnails: None,
        ocr: None,
    };

    for frame in frames {
        let kind = frame.descriptor.kind;
        if out.has_section(kind) {
            return Err(DecodeError::Malformed(format!("duplicate {} section", kind)));
        }

        if let Some(encoded) = frame.body {
            let bytes = decode_body(&encoded, &frame.descriptor)?;
            match kind {
                SectionKind::Metadata => out.metadata = Some(parse_json(kind, &bytes)?),
                SectionKind::Original => out.original = Some(bytes),
                SectionKind::Thumbnails => out.thumbnails = Some(bytes),
                SectionKind::Ocr => out.ocr = Some(parse_json(kind, &bytes)?),
            }
        }
        out.sections.push(frame.descriptor);
    }

    if let Some(missing) = wanted.iter().find(|k| !out.has_section(**k)) {
        return Err(DecodeError::SectionMissing(*missing));
    }

    Ok(out)
}

/// Base64-decode a body and check it against its descriptor
pub(crate) fn decode_body(
    encoded: &[u8],
    descriptor: &SectionDescriptor,
) -> Result<Vec<u8>, DecodeError> {
    let bytes = STANDARD.decode(encoded).map_err(|e| {
        DecodeError::Malformed(format!("{} section is not valid base64: {}", descriptor.kind, e))
    })?;

    if bytes.len() as u64 != descriptor.length {
        return Err(DecodeError::Malformed(format!(
            "{} section declares {} bytes but decodes to {}",
            descriptor.kind,
            descriptor.length,
            bytes.len()
        )));
    }

    if digest(&bytes) != descriptor.digest {
        return Err(DecodeError::Malformed(format!(
            "{} section digest mismatch",
            descriptor.kind
        )));
    }

    Ok(bytes)
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    kind: SectionKind,
    bytes: &[u8],
) -> Result<T, DecodeError> {
    serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::Malformed(format!("{} section is not valid JSON: {}", kind, e)))
}
