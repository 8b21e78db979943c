//! Export and import commands

use crate::error::{Error, Result};
use crate::export::{export_file, import, render_text, ExportScope};
use crate::fsutil::{write_atomic, ContainerLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Text,
}

impl ExportFormat {
    fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" => Ok(ExportFormat::Text),
            other => Err(Error::Other(format!(
                "unknown export format '{}' (expected json or text)",
                other
            ))),
        }
    }
}

/// `scan.svg` + ocr + json -> `scan_export_ocr.json`
pub fn default_export_path(svg: &Path, scope: ExportScope, format: ExportFormat) -> PathBuf {
    let stem = svg
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    svg.with_file_name(format!("{}_export_{}.{}", stem, scope, format.extension()))
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub container: PathBuf,
    pub scope: ExportScope,
    pub format: ExportFormat,
    /// None when written to stdout
    pub output: Option<PathBuf>,
    pub bytes: usize,
}

/// Export a container. An output of `-` writes to stdout.
pub fn cmd_export(
    svg: &Path,
    scope: ExportScope,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> Result<ExportReport> {
    let export = export_file(svg, scope)?;
    let rendered = match format {
        ExportFormat::Json => {
            let mut json = serde_json::to_string_pretty(&export)?;
            json.push('\n');
            json
        }
        ExportFormat::Text => render_text(&export),
    };

    let output = match output {
        Some(path) if path.as_os_str() == "-" => None,
        Some(path) => Some(path),
        None => Some(default_export_path(svg, scope, format)),
    };

    match &output {
        Some(path) => {
            write_atomic(path, rendered.as_bytes())?;
            info!(output = %path.display(), "Exported {} data", scope);
        }
        None => print!("{}", rendered),
    }

    Ok(ExportReport {
        container: svg.to_path_buf(),
        scope,
        format,
        output,
        bytes: rendered.len(),
    })
}

pub fn print_export(report: &ExportReport) {
    if let Some(path) = &report.output {
        println!("✓ Exported {} ({}) to {}", report.scope, report.format.extension(), path.display());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub container: PathBuf,
    pub source: PathBuf,
    pub pages: usize,
    pub words: usize,
    pub ignored_keys: Vec<String>,
}

/// Merge OCR from an export document into a container, under its lock
pub fn cmd_import(svg: &Path, json_path: &Path) -> Result<ImportReport> {
    let json = std::fs::read(json_path)?;
    let _lock = ContainerLock::acquire(svg)?;
    let container = std::fs::read(svg)?;

    let outcome = import(&container, &json)?;
    write_atomic(svg, &outcome.container)?;
    info!(path = %svg.display(), pages = outcome.pages, "Imported OCR data");

    Ok(ImportReport {
        container: svg.to_path_buf(),
        source: json_path.to_path_buf(),
        pages: outcome.pages,
        words: outcome.words,
        ignored_keys: outcome.ignored_keys,
    })
}

pub fn print_import(report: &ImportReport) {
    println!(
        "✓ Imported OCR for {} page(s), {} word(s) into {}",
        report.pages,
        report.words,
        report.container.display()
    );
    if !report.ignored_keys.is_empty() {
        println!("  Ignored keys: {}", report.ignored_keys.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{decode_file, SectionKind};
    use crate::models::OcrStatus;
    use crate::testing::write_container;
    use tempfile::TempDir;

    #[test]
    fn test_export_pending_writes_default_file() {
        let tmp = TempDir::new().unwrap();
        let svg = write_container(tmp.path(), "scan.svg", 1);

        let report = cmd_export(&svg, ExportScope::Ocr, ExportFormat::Json, None).unwrap();
        let output = report.output.unwrap();
        assert_eq!(output, tmp.path().join("scan_export_ocr.json"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(json["ocr"], serde_json::json!([]));
        assert_eq!(json["document"]["ocr_status"], "pending");
    }

    #[test]
    fn test_text_export_and_format_parsing() {
        let tmp = TempDir::new().unwrap();
        let svg = write_container(tmp.path(), "scan.svg", 1);

        let report = cmd_export(&svg, ExportScope::All, "text".parse().unwrap(), None).unwrap();
        let output = report.output.unwrap();
        assert_eq!(output, tmp.path().join("scan_export_all.txt"));
        assert!(std::fs::read_to_string(&output).unwrap().contains("OCR status: pending"));

        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_import_command_completes_container() {
        let tmp = TempDir::new().unwrap();
        let svg = write_container(tmp.path(), "scan.svg", 1);
        let json_path = tmp.path().join("ocr.json");
        let doc = serde_json::json!({
            "document": {"filename": "ignored.pdf"},
            "languages": ["eng"],
            "ocr": [{
                "page_index": 0,
                "words": [{"text": "Total", "bbox": {"x": 1, "y": 2, "w": 30, "h": 10}, "confidence": 0.8}],
                "full_text": "Total"
            }]
        });
        std::fs::write(&json_path, doc.to_string()).unwrap();

        let report = cmd_import(&svg, &json_path).unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.words, 1);
        assert_eq!(report.ignored_keys, vec!["document".to_string()]);

        let decoded = decode_file(&svg, &[SectionKind::Ocr]).unwrap();
        assert_eq!(decoded.header.ocr_status, OcrStatus::Completed);
        assert_eq!(decoded.ocr.unwrap().pages[0].full_text, "Total");
    }
}
