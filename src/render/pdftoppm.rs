//! `pdftoppm` (poppler) rasterizer backend

use super::{PageImage, Renderer};
use crate::error::RenderError;
use async_trait::async_trait;
use image::ImageReader;
use std::io::Cursor;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Renders pages by running `pdftoppm -r <dpi> -png` in a scratch directory
#[derive(Debug, Clone)]
pub struct PdftoppmRenderer {
    binary: String,
}

impl PdftoppmRenderer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

#[async_trait]
impl Renderer for PdftoppmRenderer {
    fn name(&self) -> &str {
        "pdftoppm"
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary).arg("-v").output().await.is_ok()
    }

    async fn render_pages(&self, pdf: &[u8], dpi: u32) -> Result<Vec<PageImage>, RenderError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("input.pdf");
        let prefix = scratch.path().join("page");
        tokio::fs::write(&input, pdf).await?;

        debug!(dpi, binary = %self.binary, "Rasterizing PDF");
        let output = Command::new(&self.binary)
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-png")
            .arg(&input)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::ToolUnavailable(format!("{} not found on PATH", self.binary))
                } else {
                    RenderError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(output.status.code(), stderr));
        }

        let pages = collect_pages(scratch.path()).await?;
        if pages.is_empty() {
            return Err(RenderError::CorruptDocument(
                "rasterizer produced no pages".to_string(),
            ));
        }
        Ok(pages)
    }
}

/// Exit status 3 is poppler's permission error (encrypted input); 1 is a
/// file that could not be opened or parsed.
fn classify_failure(code: Option<i32>, stderr: String) -> RenderError {
    let lower = stderr.to_lowercase();
    if code == Some(3) || lower.contains("password") || lower.contains("encrypt") {
        RenderError::UnsupportedFeature(format!("encrypted document: {}", stderr))
    } else {
        RenderError::CorruptDocument(format!(
            "pdftoppm exited with {}: {}",
            code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
            stderr
        ))
    }
}

/// Page number from `page-7.png` / `page-007.png`
fn page_number(file_name: &str) -> Option<usize> {
    let stem = file_name.strip_prefix("page-")?.strip_suffix(".png")?;
    stem.parse().ok()
}

async fn collect_pages(dir: &Path) -> Result<Vec<PageImage>, RenderError> {
    let mut numbered = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(number) = page_number(&name) {
            numbered.push((number, entry.path()));
        }
    }
    numbered.sort_by_key(|(number, _)| *number);

    let mut pages = Vec::with_capacity(numbered.len());
    for (index, (_, path)) in numbered.into_iter().enumerate() {
        let png = tokio::fs::read(&path).await?;
        let (width, height) = ImageReader::new(Cursor::new(&png))
            .with_guessed_format()?
            .into_dimensions()?;
        pages.push(PageImage {
            page_index: index,
            png,
            width,
            height,
        });
    }
    Ok(pages)
}
