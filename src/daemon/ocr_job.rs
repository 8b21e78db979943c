//! OCR of one container

use super::{FileState, FileTracker};
use crate::config::Config;
use crate::container::{decode, patch_ocr, set_ocr_status, Fingerprint, SectionKind};
use crate::error::{DecodeError, Error, OcrError, PatchError, RenderError, Result};
use crate::fsutil::{write_atomic, ContainerLock};
use crate::models::{OcrPayload, OcrStatus};
use crate::ocr::{recognize_document, OcrEngine};
use crate::render::Renderer;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OcrOptions {
    pub languages: Vec<String>,
    pub dpi: u32,
    /// Re-run OCR on a container that is already completed
    pub force: bool,
}

impl OcrOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            languages: config.ocr.languages.clone(),
            dpi: config.ocr.dpi,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OcrOutcome {
    Completed { pages: usize, words: usize },
    Failed { attempts: u32, error: String },
    AlreadyCompleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrJob {
    pub container: PathBuf,
    pub outcome: OcrOutcome,
    pub states: Vec<FileState>,
}

fn fingerprint_of(container: &[u8]) -> Result<Fingerprint> {
    let decoded = decode(container, &[])?;
    decoded
        .fingerprint()
        .ok_or_else(|| DecodeError::SectionMissing(SectionKind::Metadata).into())
}

/// Re-read the container and make sure its immutable parts are the ones
/// the job started from
async fn reread_unchanged(path: &Path, expected: &Fingerprint) -> Result<Vec<u8>> {
    let current = tokio::fs::read(path).await?;
    let found = fingerprint_of(&current)
        .map_err(|e| PatchError::Conflict(format!("container no longer decodes: {}", e)))?;
    if &found != expected {
        return Err(PatchError::Conflict(format!(
            "original {} / metadata {} changed to {} / {}",
            expected.original_digest, expected.metadata_digest, found.original_digest, found.metadata_digest
        ))
        .into());
    }
    Ok(current)
}

async fn recognize(
    renderer: &dyn Renderer,
    engine: &dyn OcrEngine,
    original: &[u8],
    page_count: u32,
    options: &OcrOptions,
) -> Result<OcrPayload> {
    let pages = renderer.render_full_pages(original, options.dpi).await?;
    if pages.len() != page_count as usize {
        return Err(RenderError::CorruptDocument(format!(
            "rendered {} page(s) but the container records {}",
            pages.len(),
            page_count
        ))
        .into());
    }
    debug!(pages = pages.len(), engine = engine.name(), "Recognizing");
    Ok(recognize_document(engine, &pages, &options.languages).await?)
}

/// Run OCR over one container and record the result in it.
///
/// The whole job holds the container lock. The container is marked
/// `in_progress` first; on success the OCR section is patched in, on engine
/// errors the container is marked `failed`. An unavailable engine puts the
/// container back exactly as it was and is returned as an error so the
/// caller can stop. Before every write after the OCR run the container is
/// re-read and its fingerprint compared; a mismatch is a
/// [`PatchError::Conflict`] and nothing is written.
pub async fn ocr_container(
    renderer: &dyn Renderer,
    engine: &dyn OcrEngine,
    path: &Path,
    options: &OcrOptions,
) -> Result<OcrJob> {
    let _lock = ContainerLock::acquire(path)?;

    let before = tokio::fs::read(path).await?;
    let decoded = decode(&before, &[SectionKind::Original, SectionKind::Metadata])?;
    let fingerprint = decoded
        .fingerprint()
        .ok_or(DecodeError::SectionMissing(SectionKind::Metadata))?;
    let page_count = decoded
        .metadata
        .as_ref()
        .map(|m| m.page_count)
        .ok_or(DecodeError::SectionMissing(SectionKind::Metadata))?;
    let status = decoded.header.ocr_status;
    let original = decoded
        .original
        .ok_or(DecodeError::SectionMissing(SectionKind::Original))?;

    let mut tracker = FileTracker::new(path, FileState::for_ocr_job(status));
    let job = |outcome: OcrOutcome, tracker: &FileTracker| OcrJob {
        container: path.to_path_buf(),
        outcome,
        states: tracker.history().to_vec(),
    };

    if status == OcrStatus::Completed && !options.force {
        debug!(path = %path.display(), "OCR already completed");
        return Ok(job(OcrOutcome::AlreadyCompleted, &tracker));
    }
    if status == OcrStatus::InProgress {
        warn!(path = %path.display(), "Resuming abandoned OCR job");
    }

    tracker.advance(FileState::OcrInProgress)?;
    // a completed container keeps its text until the new run succeeds
    let rerun = status == OcrStatus::Completed;
    if !rerun {
        write_atomic(path, &set_ocr_status(&before, OcrStatus::InProgress)?)?;
    }
    info!(path = %path.display(), "OCR started");

    match recognize(renderer, engine, &original, page_count, options).await {
        Ok(payload) => {
            let current = reread_unchanged(path, &fingerprint).await?;
            write_atomic(path, &patch_ocr(&current, &payload)?)?;
            tracker.advance(FileState::OcrCompleted)?;
            info!(
                path = %path.display(),
                pages = payload.pages.len(),
                words = payload.word_count(),
                "OCR completed"
            );
            Ok(job(
                OcrOutcome::Completed {
                    pages: payload.pages.len(),
                    words: payload.word_count(),
                },
                &tracker,
            ))
        }
        Err(Error::Ocr(OcrError::EngineUnavailable(reason))) => {
            if !rerun {
                match reread_unchanged(path, &fingerprint).await {
                    Ok(_) => write_atomic(path, &before)?,
                    Err(e) => warn!(path = %path.display(), "Not restoring status: {}", e),
                }
            }
            tracker.advance(FileState::Converted)?;
            warn!(path = %path.display(), "OCR engine unavailable: {}", reason);
            Err(OcrError::EngineUnavailable(reason).into())
        }
        Err(e) if rerun => {
            warn!(path = %path.display(), "OCR re-run failed, keeping previous text: {}", e);
            Err(e)
        }
        Err(e) => {
            let current = reread_unchanged(path, &fingerprint).await?;
            let failed = set_ocr_status(&current, OcrStatus::Failed)?;
            let attempts = decode(&failed, &[])?.header.ocr_attempts;
            write_atomic(path, &failed)?;
            tracker.advance(FileState::OcrFailed)?;
            error!(path = %path.display(), attempts, "OCR failed: {}", e);
            Ok(job(
                OcrOutcome::Failed {
                    attempts,
                    error: e.to_string(),
                },
                &tracker,
            ))
        }
    }
}
