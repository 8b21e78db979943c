//! Line framing shared by the encoder, both decoders and the validator.
//!
//! Every markup line of a container is short. Section bodies are base64 on a
//! line of their own, directly between an opening descriptor line and a
//! closing marker line, so a reader can walk the file line by line and jump
//! over bodies it does not need using the declared encoded length.

use super::{ContainerHeader, SectionDescriptor, SectionKind};
use crate::error::DecodeError;
use crate::models::OcrStatus;
use regex::Regex;
use std::collections::HashMap;
use std::io::{BufRead, Read, Seek, SeekFrom};
use std::ops::Range;
use std::sync::OnceLock;

pub(crate) const CONTAINER_OPEN: &str = "<veridock:container ";
pub(crate) const CONTAINER_CLOSE: &str = "</veridock:container>";
pub(crate) const SECTION_OPEN: &str = "<veridock:section ";
pub(crate) const SECTION_CLOSE: &str = "</veridock:section>";
pub(crate) const IMAGE_OPEN: &str = "<image ";
pub(crate) const IMAGE_CLOSE: &str = "\"/>";
pub(crate) const STATUS_LABEL_ID: &str = "id=\"veridock-ocr-status\"";
pub(crate) const SVG_CLOSE: &str = "</svg>";

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][-A-Za-z0-9_.:]*)="([^"]*)""#).expect("attribute pattern is valid")
    })
}

/// Collect `name="value"` pairs from a markup line
pub(crate) fn parse_attrs(line: &str) -> HashMap<String, String> {
    attr_regex()
        .captures_iter(line)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

fn required<'a>(
    attrs: &'a HashMap<String, String>,
    name: &str,
    context: &str,
) -> Result<&'a str, DecodeError> {
    attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| DecodeError::Malformed(format!("{} lacks attribute {}", context, name)))
}

fn required_number<T: std::str::FromStr>(
    attrs: &HashMap<String, String>,
    name: &str,
    context: &str,
) -> Result<T, DecodeError> {
    let raw = required(attrs, name, context)?;
    raw.parse().map_err(|_| {
        DecodeError::Malformed(format!("{} attribute {} is not a number: {}", context, name, raw))
    })
}

pub(crate) fn parse_header(line: &str) -> Result<ContainerHeader, DecodeError> {
    let attrs = parse_attrs(line);
    let status_raw = required(&attrs, "veridock:ocr-status", "container header")?;
    let ocr_status: OcrStatus = status_raw
        .parse()
        .map_err(|_| DecodeError::Malformed(format!("unknown OCR status '{}'", status_raw)))?;

    Ok(ContainerHeader {
        format_version: required_number(&attrs, "veridock:format-version", "container header")?,
        ocr_status,
        ocr_attempts: required_number(&attrs, "veridock:ocr-attempts", "container header")?,
    })
}

pub(crate) fn parse_descriptor(line: &str) -> Result<SectionDescriptor, DecodeError> {
    let attrs = parse_attrs(line);
    let kind_raw = required(&attrs, "veridock:kind", "section")?;
    let kind = SectionKind::parse(kind_raw)
        .ok_or_else(|| DecodeError::Malformed(format!("unknown section kind '{}'", kind_raw)))?;
    let context = format!("{} section", kind);

    Ok(SectionDescriptor {
        kind,
        media_type: required(&attrs, "veridock:media-type", &context)?.to_string(),
        length: required_number(&attrs, "veridock:length", &context)?,
        encoded_length: required_number(&attrs, "veridock:encoded-length", &context)?,
        digest: required(&attrs, "veridock:blake3", &context)?.to_string(),
    })
}

/// How a markup line participates in the framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineRole {
    Header,
    SectionOpen,
    ImageOpen,
    ContainerClose,
    StatusLabel,
    SvgClose,
    Other,
}

pub(crate) fn classify(line: &str) -> LineRole {
    if line.starts_with(CONTAINER_OPEN) {
        LineRole::Header
    } else if line.starts_with(SECTION_OPEN) {
        LineRole::SectionOpen
    } else if line.starts_with(IMAGE_OPEN) && line.contains("veridock:kind=") {
        LineRole::ImageOpen
    } else if line == CONTAINER_CLOSE {
        LineRole::ContainerClose
    } else if line.contains(STATUS_LABEL_ID) {
        LineRole::StatusLabel
    } else if line == SVG_CLOSE {
        LineRole::SvgClose
    } else {
        LineRole::Other
    }
}

fn closing_marker(role: LineRole) -> &'static str {
    if role == LineRole::ImageOpen {
        IMAGE_CLOSE
    } else {
        SECTION_CLOSE
    }
}

fn line_text(bytes: &[u8]) -> Result<&str, DecodeError> {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    std::str::from_utf8(bytes)
        .map_err(|_| DecodeError::Malformed("markup line is not valid UTF-8".to_string()))
}

/// Byte ranges of every line, each range including its trailing newline
fn split_lines(bytes: &[u8]) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let end = bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| start + i + 1)
            .unwrap_or(bytes.len());
        lines.push(start..end);
        start = end;
    }
    lines
}

fn content_range(bytes: &[u8], line: &Range<usize>) -> Range<usize> {
    let mut end = line.end;
    if end > line.start && bytes[end - 1] == b'\n' {
        end -= 1;
    }
    if end > line.start && bytes[end - 1] == b'\r' {
        end -= 1;
    }
    line.start..end
}

/// One framed section located in an in-memory container
#[derive(Debug, Clone)]
pub(crate) struct SectionSpan {
    pub descriptor: SectionDescriptor,
    /// From the start of the opening line to the end of the closing line
    pub span: Range<usize>,
    /// The body line without its newline
    pub body: Range<usize>,
}

/// Structural map of an in-memory container.
///
/// Built without decoding or checking any body, so the validator can report
/// length and digest problems itself. Callers that modify the container
/// call [`Layout::verify_lengths`] first.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub header: ContainerHeader,
    pub header_line: Range<usize>,
    /// Start of the `</veridock:container>` line, where new sections go
    pub container_close: usize,
    pub status_label: Option<Range<usize>>,
    pub sections: Vec<SectionSpan>,
}

impl Layout {
    pub fn scan(bytes: &[u8]) -> Result<Self, DecodeError> {
        let lines = split_lines(bytes);
        let mut header: Option<(ContainerHeader, Range<usize>)> = None;
        let mut container_close = None;
        let mut status_label = None;
        let mut sections = Vec::new();
        let mut saw_svg_close = false;

        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];
            let text = line_text(&bytes[line.clone()])?;
            let role = classify(text);
            match role {
                LineRole::Header => {
                    if header.is_some() {
                        return Err(DecodeError::Malformed(
                            "more than one container header".to_string(),
                        ));
                    }
                    header = Some((parse_header(text)?, line.clone()));
                }
                LineRole::SectionOpen | LineRole::ImageOpen => {
                    if header.is_none() {
                        return Err(DecodeError::Malformed(
                            "section found before the container header".to_string(),
                        ));
                    }
                    let descriptor = parse_descriptor(text)?;
                    let (body_line, close_line) = match (lines.get(i + 1), lines.get(i + 2)) {
                        (Some(b), Some(c)) => (b.clone(), c.clone()),
                        _ => {
                            return Err(DecodeError::Malformed(format!(
                                "{} section is truncated",
                                descriptor.kind
                            )))
                        }
                    };
                    let close_text = line_text(&bytes[close_line.clone()])?;
                    if close_text != closing_marker(role) {
                        return Err(DecodeError::Malformed(format!(
                            "{} section is not closed by {}",
                            descriptor.kind,
                            closing_marker(role)
                        )));
                    }
                    sections.push(SectionSpan {
                        descriptor,
                        span: line.start..close_line.end,
                        body: content_range(bytes, &body_line),
                    });
                    i += 3;
                    continue;
                }
                LineRole::ContainerClose => container_close = Some(line.start),
                LineRole::StatusLabel => status_label = Some(line.clone()),
                LineRole::SvgClose => saw_svg_close = true,
                LineRole::Other => {}
            }
            i += 1;
        }

        let (header, header_line) = header
            .ok_or_else(|| DecodeError::Malformed("no veridock container header".to_string()))?;
        let container_close = container_close
            .ok_or_else(|| DecodeError::Malformed(format!("missing {}", CONTAINER_CLOSE)))?;
        if !saw_svg_close {
            return Err(DecodeError::Malformed(format!("missing {}", SVG_CLOSE)));
        }

        Ok(Self {
            header,
            header_line,
            container_close,
            status_label,
            sections,
        })
    }

    pub fn section(&self, kind: SectionKind) -> Option<&SectionSpan> {
        self.sections.iter().find(|s| s.descriptor.kind == kind)
    }

    /// Fail on the first body whose length differs from its descriptor
    pub fn verify_lengths(&self) -> Result<(), DecodeError> {
        for section in &self.sections {
            let actual = section.body.len() as u64;
            if actual != section.descriptor.encoded_length {
                return Err(DecodeError::Malformed(format!(
                    "{} section declares {} encoded bytes but holds {}",
                    section.descriptor.kind, section.descriptor.encoded_length, actual
                )));
            }
        }
        Ok(())
    }
}

/// A section read by the streaming decoder; `body` holds the raw base64 when
/// the section was requested
#[derive(Debug)]
pub(crate) struct Frame {
    pub descriptor: SectionDescriptor,
    pub body: Option<Vec<u8>>,
}

/// Walk a container from any seekable reader, loading only the bodies of
/// `wanted` sections and seeking over the rest.
pub(crate) fn read_frames<R: BufRead + Seek>(
    reader: &mut R,
    wanted: &[SectionKind],
) -> Result<(ContainerHeader, Vec<Frame>), DecodeError> {
    let mut header = None;
    let mut frames = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = line_text(&line)?;
        let role = classify(text);
        match role {
            LineRole::Header => {
                if header.is_some() {
                    return Err(DecodeError::Malformed(
                        "more than one container header".to_string(),
                    ));
                }
                header = Some(parse_header(text)?);
            }
            LineRole::SectionOpen | LineRole::ImageOpen => {
                if header.is_none() {
                    return Err(DecodeError::Malformed(
                        "section found before the container header".to_string(),
                    ));
                }
                let descriptor = parse_descriptor(text)?;
                let truncated =
                    || DecodeError::Malformed(format!("{} section body is truncated", descriptor.kind));

                let body = if wanted.contains(&descriptor.kind) {
                    let mut body = Vec::new();
                    reader
                        .by_ref()
                        .take(descriptor.encoded_length)
                        .read_to_end(&mut body)?;
                    if body.len() as u64 != descriptor.encoded_length {
                        return Err(truncated());
                    }
                    Some(body)
                } else {
                    let skip = i64::try_from(descriptor.encoded_length).map_err(|_| truncated())?;
                    reader.seek(SeekFrom::Current(skip))?;
                    None
                };

                let mut terminator = Vec::new();
                reader.read_until(b'\n', &mut terminator)?;
                if !line_text(&terminator)?.is_empty() {
                    return Err(DecodeError::Malformed(format!(
                        "{} section body does not match its declared length",
                        descriptor.kind
                    )));
                }

                let mut close = Vec::new();
                reader.read_until(b'\n', &mut close)?;
                if line_text(&close)? != closing_marker(role) {
                    return Err(DecodeError::Malformed(format!(
                        "{} section is not closed by {}",
                        descriptor.kind,
                        closing_marker(role)
                    )));
                }

                frames.push(Frame { descriptor, body });
            }
            LineRole::SvgClose => {
                let header = header.ok_or_else(|| {
                    DecodeError::Malformed("no veridock container header".to_string())
                })?;
                return Ok((header, frames));
            }
            _ => {}
        }
    }

    match header {
        Some(_) => Err(DecodeError::Malformed(format!("missing {}", SVG_CLOSE))),
        None => Err(DecodeError::Malformed("no veridock container header".to_string())),
    }
}

/// Replace byte ranges of `bytes`; an empty range inserts. Edits must not
/// overlap.
pub(crate) fn splice(bytes: &[u8], mut edits: Vec<(Range<usize>, Vec<u8>)>) -> Vec<u8> {
    edits.sort_by_key(|(range, _)| (range.start, range.end));
    let extra: usize = edits.iter().map(|(_, b)| b.len()).sum();
    let mut out = Vec::with_capacity(bytes.len() + extra);
    let mut cursor = 0;
    for (range, replacement) in edits {
        out.extend_from_slice(&bytes[cursor..range.start]);
        out.extend_from_slice(&replacement);
        cursor = range.end;
    }
    out.extend_from_slice(&bytes[cursor..]);
    out
}

/// Escape text for element content and attribute values
pub(crate) fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attrs_namespaced() {
        let attrs = parse_attrs(
            r#"<veridock:section veridock:kind="ocr" veridock:length="12" veridock:blake3="ab">"#,
        );
        assert_eq!(attrs["veridock:kind"], "ocr");
        assert_eq!(attrs["veridock:length"], "12");
        assert_eq!(attrs.len(), 3);
    }

    #[test]
    fn test_header_requires_status() {
        let err = parse_header(r#"<veridock:container veridock:format-version="1">"#).unwrap_err();
        assert!(err.to_string().contains("ocr-status"));
    }

    #[test]
    fn test_classify_image_needs_kind() {
        assert_eq!(classify(r#"<image x="0" href="a.png"/>"#), LineRole::Other);
        assert_eq!(
            classify(r#"<image veridock:kind="thumbnails" href="data:image/png;base64,"#),
            LineRole::ImageOpen
        );
    }

    #[test]
    fn test_splice_insert_and_replace() {
        let out = splice(b"abcdef", vec![(4..4, b"XY".to_vec()), (0..1, b"Z".to_vec())]);
        assert_eq!(out, b"ZbcdXYef");
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }
}
