//! Single-shot convert and OCR commands

use crate::config::Config;
use crate::daemon::{
    convert_pdf, ocr_container, Conversion, ConversionOutcome, ConvertOptions, OcrJob, OcrOptions,
    OcrOutcome, ShutdownSignal,
};
use crate::error::{Error, OcrError, Result};
use crate::ocr::OcrEngine;
use crate::render::Renderer;
use std::path::Path;
use tracing::info;

fn require_file(path: &Path, extension: &str) -> Result<()> {
    if !path.is_file() {
        return Err(Error::InvalidPath(format!("{} is not a file", path.display())));
    }
    let matches = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false);
    if !matches {
        return Err(Error::InvalidPath(format!(
            "{} is not a .{} file",
            path.display(),
            extension
        )));
    }
    Ok(())
}

/// Convert one PDF now, with the daemon's retry policy
pub async fn cmd_convert(
    config: &Config,
    renderer: &dyn Renderer,
    pdf: &Path,
    keep_source: bool,
) -> Result<Conversion> {
    require_file(pdf, "pdf")?;
    info!(path = %pdf.display(), "Converting");

    let mut options = ConvertOptions::from_config(config);
    options.keep_source |= keep_source;

    let conversion = convert_pdf(renderer, pdf, &options, None, &ShutdownSignal::never()).await?;
    if let ConversionOutcome::Failed { error, .. } = &conversion.outcome {
        return Err(Error::ConversionFailed {
            path: pdf.to_path_buf(),
            reason: error.clone(),
        });
    }
    Ok(conversion)
}

pub fn print_conversion(conversion: &Conversion) {
    match &conversion.outcome {
        ConversionOutcome::Converted { container, pages } => {
            println!("✓ Converted {}", conversion.source.display());
            println!("  Container: {}", container.display());
            println!("  Pages:     {}", pages);
            println!("  OCR:       pending");
        }
        ConversionOutcome::AlreadyConverted { container } => {
            println!(
                "✓ {} is already stored in {}",
                conversion.source.display(),
                container.display()
            );
        }
        ConversionOutcome::Failed { marker, error } => {
            println!("✗ Conversion failed: {}", error);
            println!("  Marker: {}", marker.display());
        }
        ConversionOutcome::Cancelled => println!("Conversion cancelled"),
    }
}

/// Run OCR on one container now, whatever its recorded attempts
pub async fn cmd_ocr(
    config: &Config,
    renderer: &dyn Renderer,
    engine: &dyn OcrEngine,
    svg: &Path,
    force: bool,
) -> Result<OcrJob> {
    require_file(svg, "svg")?;
    if !engine.is_available().await {
        return Err(OcrError::EngineUnavailable(format!(
            "'{}' cannot be started; check ocr.tesseract_path",
            engine.name()
        ))
        .into());
    }

    let mut options = OcrOptions::from_config(config);
    options.force = force;

    let job = ocr_container(renderer, engine, svg, &options).await?;
    if let OcrOutcome::Failed { error, .. } = &job.outcome {
        return Err(Error::OcrFailed {
            path: svg.to_path_buf(),
            reason: error.clone(),
        });
    }
    Ok(job)
}

pub fn print_ocr_job(job: &OcrJob) {
    match &job.outcome {
        OcrOutcome::Completed { pages, words } => {
            println!("✓ OCR completed for {}", job.container.display());
            println!("  Pages: {}", pages);
            println!("  Words: {}", words);
        }
        OcrOutcome::AlreadyCompleted => {
            println!(
                "OCR already completed for {} (use --force to run it again)",
                job.container.display()
            );
        }
        OcrOutcome::Failed { attempts, error } => {
            println!("✗ OCR failed (attempt {}): {}", attempts, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_pdf, write_container, FakeOcrEngine, FakeRenderer};
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> Config {
        let mut config = Config::load_from(Some(tmp.path().join("home"))).unwrap();
        config.scan.retry_delay_ms = 1;
        config.ocr.languages = vec!["eng".to_string()];
        config
    }

    #[tokio::test]
    async fn test_convert_command() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("letter.PDF");
        std::fs::write(&pdf, sample_pdf(1, None)).unwrap();

        let conversion = cmd_convert(&config(&tmp), &FakeRenderer::new(), &pdf, true)
            .await
            .unwrap();
        assert!(matches!(conversion.outcome, ConversionOutcome::Converted { pages: 1, .. }));
        assert!(pdf.exists());
        assert!(tmp.path().join("letter.svg").exists());
    }

    #[tokio::test]
    async fn test_convert_failure_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("bad.pdf");
        std::fs::write(&pdf, sample_pdf(1, None)).unwrap();

        let err = cmd_convert(&config(&tmp), &FakeRenderer::failing(9), &pdf, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConversionFailed { .. }));
        assert_ne!(err.exit_code(), 0);
        assert!(pdf.exists());

        let missing = cmd_convert(&config(&tmp), &FakeRenderer::new(), &tmp.path().join("x.pdf"), false)
            .await;
        assert!(matches!(missing, Err(Error::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_ocr_command() {
        let tmp = TempDir::new().unwrap();
        let svg = write_container(tmp.path(), "doc.svg", 2);
        let cfg = config(&tmp);

        let job = cmd_ocr(&cfg, &FakeRenderer::new(), &FakeOcrEngine::new(), &svg, false)
            .await
            .unwrap();
        assert_eq!(job.outcome, OcrOutcome::Completed { pages: 2, words: 6 });

        let err = cmd_ocr(&cfg, &FakeRenderer::new(), &FakeOcrEngine::unavailable(), &svg, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ocr(OcrError::EngineUnavailable(_))));
    }
}
