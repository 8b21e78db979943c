//! Tesseract CLI engine
//!
//! Runs `tesseract <page.png> stdout -l <langs> --oem <n> --psm <n> tsv` and
//! parses the TSV word rows.

use super::{validate_language, OcrEngine};
use crate::error::OcrError;
use crate::models::{BoundingBox, OcrWord, PageOcrResult};
use crate::render::PageImage;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// TSV `level` of word rows
const WORD_LEVEL: &str = "5";

/// Tesseract invocation settings
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    oem: u8,
    psm: u8,
    /// Minimum word confidence on tesseract's 0-100 scale
    min_confidence: f32,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<String>, oem: u8, psm: u8, min_confidence: f32) -> Self {
        Self {
            binary: binary.into(),
            oem,
            psm,
            min_confidence,
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract", 3, 6, 30.0)
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn is_available(&self) -> bool {
        let result = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        matches!(result, Ok(status) if status.success())
    }

    async fn recognize(
        &self,
        page: &PageImage,
        languages: &[String],
    ) -> Result<PageOcrResult, OcrError> {
        for lang in languages {
            validate_language(lang)?;
        }
        let langs = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };

        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("page.png");
        tokio::fs::write(&input, &page.png).await?;

        debug!(page = page.page_index, langs = %langs, "Running tesseract");
        let output = Command::new(&self.binary)
            .arg(&input)
            .arg("stdout")
            .arg("-l")
            .arg(&langs)
            .arg("--oem")
            .arg(self.oem.to_string())
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrError::EngineUnavailable(format!("{} not found on PATH", self.binary))
                } else {
                    OcrError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            // missing traineddata fails every page of every document
            if stderr.contains("Failed loading language") || stderr.contains("Could not initialize") {
                return Err(OcrError::EngineUnavailable(stderr));
            }
            return Err(OcrError::ProcessingError(format!(
                "tesseract failed: {}",
                stderr
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let result = parse_tsv(page.page_index, &tsv, self.min_confidence);
        if result.words.is_empty() {
            return Err(OcrError::NoTextFound);
        }
        Ok(result)
    }
}

/// Build a page result from tesseract TSV output.
///
/// Keeps word rows whose confidence reaches `min_confidence` (0-100) and
/// whose text is not blank. Words on one line are joined by a space, lines
/// by a newline, paragraphs and blocks by a blank line.
pub fn parse_tsv(page_index: usize, tsv: &str, min_confidence: f32) -> PageOcrResult {
    let mut words = Vec::new();
    let mut full_text = String::new();
    let mut previous: Option<(&str, &str, &str)> = None;

    for row in tsv.lines() {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != WORD_LEVEL {
            continue;
        }

        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let Ok(conf) = cols[10].trim().parse::<f32>() else {
            continue;
        };
        if conf < min_confidence {
            continue;
        }
        let parse = |s: &str| s.trim().parse::<u32>().ok();
        let (Some(x), Some(y), Some(w), Some(h)) =
            (parse(cols[6]), parse(cols[7]), parse(cols[8]), parse(cols[9]))
        else {
            continue;
        };

        let position = (cols[2], cols[3], cols[4]);
        match previous {
            None => {}
            Some((block, par, _)) if block != position.0 || par != position.1 => {
                full_text.push_str("\n\n")
            }
            Some((_, _, line)) if line != position.2 => full_text.push('\n'),
            Some(_) => full_text.push(' '),
        }
        full_text.push_str(text);
        previous = Some(position);

        words.push(OcrWord {
            text: text.to_string(),
            bbox: BoundingBox { x, y, w, h },
            confidence: (conf / 100.0).clamp(0.0, 1.0),
        });
    }

    PageOcrResult {
        page_index,
        words,
        full_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn row(block: u32, par: u32, line: u32, word: u32, conf: &str, text: &str) -> String {
        format!(
            "5\t1\t{}\t{}\t{}\t{}\t{}\t{}\t40\t12\t{}\t{}",
            block,
            par,
            line,
            word,
            word * 50,
            line * 20,
            conf,
            text
        )
    }

    #[test]
    fn test_parse_tsv_reading_order() {
        let tsv = [
            HEADER.to_string(),
            "1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t".to_string(),
            row(1, 1, 1, 1, "96.1", "Faktura"),
            row(1, 1, 1, 2, "91", "VAT"),
            row(1, 1, 2, 1, "88.5", "nr"),
            row(1, 1, 2, 2, "12", "smudge"),
            row(1, 1, 2, 3, "90", "17/2024"),
            row(2, 1, 1, 1, "95", "Razem"),
            row(2, 1, 1, 2, "93", "   "),
        ]
        .join("\n");

        let page = parse_tsv(4, &tsv, 30.0);
        assert_eq!(page.page_index, 4);
        assert_eq!(page.full_text, "Faktura VAT\nnr 17/2024\n\nRazem");
        assert_eq!(page.words.len(), 5);
        assert_eq!(page.words[0].bbox, BoundingBox { x: 50, y: 20, w: 40, h: 12 });
        assert!((page.words[0].confidence - 0.961).abs() < 1e-6);
    }

    #[test]
    fn test_parse_tsv_empty() {
        let page = parse_tsv(0, HEADER, 30.0);
        assert!(page.words.is_empty());
        assert!(page.full_text.is_empty());
    }

    #[test]
    fn test_parse_tsv_is_deterministic() {
        let tsv = [HEADER.to_string(), row(1, 1, 1, 1, "80", "same")].join("\n");
        assert_eq!(parse_tsv(0, &tsv, 30.0), parse_tsv(0, &tsv, 30.0));
    }
}
