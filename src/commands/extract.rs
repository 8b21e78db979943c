//! Extract and validate commands

use crate::container::{decode_file, validate, SectionKind, ValidationReport};
use crate::error::{DecodeError, Error, Result};
use crate::fsutil::write_atomic;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub container: PathBuf,
    pub output: PathBuf,
    pub bytes: usize,
    pub digest: String,
}

/// `scan.svg` -> `scan_extracted.pdf`
pub fn default_extract_path(svg: &Path) -> PathBuf {
    let stem = svg
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    svg.with_file_name(format!("{}_extracted.pdf", stem))
}

/// Write the embedded original back out, byte for byte. The digest is
/// checked while decoding.
pub fn cmd_extract(svg: &Path, output: Option<PathBuf>, force: bool) -> Result<ExtractReport> {
    let output = output.unwrap_or_else(|| default_extract_path(svg));
    if output.exists() && !force {
        return Err(Error::InvalidPath(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }

    let decoded = decode_file(svg, &[SectionKind::Original])?;
    let digest = decoded
        .descriptor(SectionKind::Original)
        .map(|d| d.digest.clone())
        .unwrap_or_default();
    let original = decoded
        .original
        .ok_or(DecodeError::SectionMissing(SectionKind::Original))?;

    write_atomic(&output, &original)?;
    info!(output = %output.display(), bytes = original.len(), "Extracted original");

    Ok(ExtractReport {
        container: svg.to_path_buf(),
        output,
        bytes: original.len(),
        digest,
    })
}

pub fn print_extract(report: &ExtractReport) {
    println!("✓ Extracted {}", report.output.display());
    println!("  Size:   {} bytes", report.bytes);
    println!("  BLAKE3: {}", report.digest);
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    pub path: PathBuf,
    #[serde(flatten)]
    pub report: ValidationReport,
}

/// Structural check of one container; never fails on bad content, only on
/// an unreadable file
pub fn cmd_validate(svg: &Path) -> Result<ValidateResult> {
    let bytes = std::fs::read(svg)?;
    Ok(ValidateResult {
        path: svg.to_path_buf(),
        report: validate(&bytes),
    })
}

pub fn print_validation(result: &ValidateResult) {
    let report = &result.report;
    if report.ok {
        println!("✓ {} is a valid container", result.path.display());
    } else {
        println!("✗ {} is not a valid container", result.path.display());
    }
    if let Some(status) = report.ocr_status {
        println!("  OCR status: {}", status);
    }
    if let Some(pages) = report.page_count {
        println!("  Pages:      {}", pages);
    }
    for problem in &report.problems {
        println!("  problem: {}", problem);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
}
