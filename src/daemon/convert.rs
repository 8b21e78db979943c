//! Conversion of one PDF into a container

use super::{FileState, FileTracker, ShutdownSignal, TickEvent};
use crate::config::Config;
use crate::container::{digest, encode, read_header, SectionKind};
use crate::error::{RenderError, Result};
use crate::fsutil::{write_atomic, ContainerLock};
use crate::models::DocumentMetadata;
use crate::registry::{list_files, Registry};
use crate::render::{PdfInfo, Renderer, ThumbnailGrid, ThumbnailOptions};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Appended to a PDF's file name for the marker left by a failed conversion
pub const FAILURE_MARKER_SUFFIX: &str = ".veridock-error";

/// `report.pdf` -> `report.pdf.veridock-error`
pub fn failure_marker(pdf: &Path) -> PathBuf {
    let mut name = pdf.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(FAILURE_MARKER_SUFFIX);
    pdf.with_file_name(name)
}

pub fn is_settled(modified: SystemTime, now: SystemTime, settle: Duration) -> bool {
    settle.is_zero()
        || now
            .duration_since(modified)
            .map(|age| age >= settle)
            .unwrap_or(false)
}

/// PDFs a scan tick should pick up, in watch list order: not marked failed
/// and untouched for at least `settle`
pub fn discover_pdfs(dirs: &[PathBuf], settle: Duration) -> Vec<PathBuf> {
    let now = SystemTime::now();
    let mut found = Vec::new();

    for dir in dirs {
        if !dir.is_dir() {
            debug!("Watch directory {} does not exist", dir.display());
            continue;
        }
        for pdf in list_files(dir, "pdf") {
            if failure_marker(&pdf).exists() {
                debug!(path = %pdf.display(), "Skipping, marked as failed");
                continue;
            }
            let modified = match std::fs::metadata(&pdf).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %pdf.display(), "Cannot stat: {}", e);
                    continue;
                }
            };
            if !is_settled(modified, now, settle) {
                debug!(path = %pdf.display(), "Still settling");
                continue;
            }
            found.push(pdf);
        }
    }
    found
}

/// Container name carrying a digest prefix, used when `<stem>.svg` is taken
fn suffixed_container_path(pdf: &Path, original_digest: &str) -> PathBuf {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = &original_digest[..original_digest.len().min(8)];
    pdf.with_file_name(format!("{}-{}.svg", stem, prefix))
}

/// Where the container for `pdf` goes: `<stem>.svg` next to it, or
/// `<stem>-<digest prefix>.svg` when that name already holds another document
pub fn container_path_for(pdf: &Path, original_digest: &str) -> PathBuf {
    let plain = pdf.with_extension("svg");
    if !plain.exists() {
        return plain;
    }
    suffixed_container_path(pdf, original_digest)
}

/// Digest of the original stored in the container at `path`, if it is one
fn stored_digest(path: &Path) -> Option<String> {
    let decoded = read_header(path).ok()?;
    decoded
        .descriptor(SectionKind::Original)
        .map(|d| d.digest.clone())
}

/// Existing container already holding this exact original
fn find_existing(pdf: &Path, original_digest: &str, known: Option<&Registry>) -> Option<PathBuf> {
    if let Some(entry) = known.and_then(|r| r.find_by_digest(original_digest)) {
        if entry.path.exists() {
            return Some(entry.path.clone());
        }
    }

    [
        pdf.with_extension("svg"),
        suffixed_container_path(pdf, original_digest),
    ]
    .into_iter()
    .find(|candidate| stored_digest(candidate).as_deref() == Some(original_digest))
}

/// Knobs for one conversion
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub keep_source: bool,
    pub thumbnails: ThumbnailOptions,
}

impl ConvertOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.scan.max_attempts,
            retry_delay: config.scan.retry_delay(),
            keep_source: config.scan.keep_source,
            thumbnails: config.render.thumbnail_options(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Converted { container: PathBuf, pages: u32 },
    AlreadyConverted { container: PathBuf },
    Failed { marker: PathBuf, error: String },
    /// Shutdown arrived between render attempts
    Cancelled,
}

/// Result of converting one PDF, with what happened along the way
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    pub source: PathBuf,
    pub outcome: ConversionOutcome,
    pub states: Vec<FileState>,
    pub events: Vec<TickEvent>,
}

async fn render(
    renderer: &dyn Renderer,
    pdf: &[u8],
    options: &ThumbnailOptions,
) -> std::result::Result<(PdfInfo, ThumbnailGrid), RenderError> {
    let info = renderer.inspect(pdf)?;
    let grid = renderer.render_thumbnails(pdf, options).await?;
    if grid.layout.tiles.len() != info.page_count as usize {
        return Err(RenderError::CorruptDocument(format!(
            "rendered {} page(s) but the document declares {}",
            grid.layout.tiles.len(),
            info.page_count
        )));
    }
    Ok((info, grid))
}

/// Convert one PDF into a container next to it.
///
/// Render failures are retried up to `max_attempts`; after that the source
/// stays where it is and a failure marker is written beside it. The source
/// is removed only once the container has been durably written.
pub async fn convert_pdf(
    renderer: &dyn Renderer,
    pdf: &Path,
    options: &ConvertOptions,
    known: Option<&Registry>,
    shutdown: &ShutdownSignal,
) -> Result<Conversion> {
    let mut tracker = FileTracker::new(pdf, FileState::Discovered);
    let mut events = Vec::new();

    let original = tokio::fs::read(pdf).await?;
    let original_digest = digest(&original);

    if let Some(existing) = find_existing(pdf, &original_digest, known) {
        return already_converted(pdf, existing, tracker, events, options.keep_source);
    }

    let mut attempt = 0;
    let (info, grid) = loop {
        attempt += 1;
        tracker.advance(FileState::Rendering)?;
        debug!(path = %pdf.display(), attempt, "Rendering");

        match render(renderer, &original, &options.thumbnails).await {
            Ok(rendered) => break rendered,
            Err(e) if attempt < options.max_attempts => {
                warn!(
                    path = %pdf.display(),
                    attempt,
                    "Render failed, retrying in {:?}: {}",
                    options.retry_delay,
                    e
                );
                events.push(TickEvent::RenderRetry {
                    source: pdf.to_path_buf(),
                    attempt,
                    error: e.to_string(),
                });
                tracker.advance(FileState::Discovered)?;

                let mut stop = shutdown.clone();
                tokio::select! {
                    _ = tokio::time::sleep(options.retry_delay) => {}
                    _ = stop.triggered() => {
                        info!(path = %pdf.display(), "Shutdown requested, leaving for next run");
                        return Ok(Conversion {
                            source: pdf.to_path_buf(),
                            outcome: ConversionOutcome::Cancelled,
                            states: tracker.history().to_vec(),
                            events,
                        });
                    }
                }
            }
            Err(e) => return mark_failed(pdf, tracker, events, e.to_string()),
        }
    };

    let metadata = DocumentMetadata {
        filename: pdf
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        source_path: pdf.display().to_string(),
        creation_time: Utc::now().to_rfc3339(),
        page_count: info.page_count,
        pdf_metadata: info.metadata,
        original_length: original.len() as u64,
        original_digest: original_digest.clone(),
        thumbnail_layout: grid.layout,
    };
    let container = match encode(&original, &grid.png, &metadata) {
        Ok(c) => c,
        Err(e) => return mark_failed(pdf, tracker, events, e.to_string()),
    };

    let target = container_path_for(pdf, &original_digest);
    {
        let _lock = ContainerLock::acquire(&target)?;
        // an existing container is never replaced by a fresh one
        if target.exists() {
            if stored_digest(&target).as_deref() == Some(original_digest.as_str()) {
                return already_converted(pdf, target, tracker, events, options.keep_source);
            }
            let reason = format!(
                "{} already exists and holds a different document",
                target.display()
            );
            return mark_failed(pdf, tracker, events, reason);
        }
        write_atomic(&target, &container)?;
    }
    tracker.advance(FileState::Converted)?;
    info!(
        path = %pdf.display(),
        container = %target.display(),
        pages = info.page_count,
        "Converted"
    );
    events.push(TickEvent::Converted {
        source: pdf.to_path_buf(),
        container: target.clone(),
        pages: info.page_count,
    });

    let marker = failure_marker(pdf);
    if marker.exists() {
        if let Err(e) = std::fs::remove_file(&marker) {
            warn!(marker = %marker.display(), "Cannot remove old failure marker: {}", e);
        }
    }
    if !options.keep_source {
        remove_source(pdf, &mut events);
    }

    Ok(Conversion {
        source: pdf.to_path_buf(),
        outcome: ConversionOutcome::Converted {
            container: target,
            pages: info.page_count,
        },
        states: tracker.history().to_vec(),
        events,
    })
}

fn already_converted(
    pdf: &Path,
    existing: PathBuf,
    mut tracker: FileTracker,
    mut events: Vec<TickEvent>,
    keep_source: bool,
) -> Result<Conversion> {
    info!(
        path = %pdf.display(),
        container = %existing.display(),
        "Already converted"
    );
    tracker.advance(FileState::Converted)?;
    events.push(TickEvent::AlreadyConverted {
        source: pdf.to_path_buf(),
        container: existing.clone(),
    });
    if !keep_source {
        remove_source(pdf, &mut events);
    }
    Ok(Conversion {
        source: pdf.to_path_buf(),
        outcome: ConversionOutcome::AlreadyConverted { container: existing },
        states: tracker.history().to_vec(),
        events,
    })
}

fn remove_source(pdf: &Path, events: &mut Vec<TickEvent>) {
    match std::fs::remove_file(pdf) {
        Ok(()) => {
            debug!(path = %pdf.display(), "Removed source");
            events.push(TickEvent::SourceRemoved {
                source: pdf.to_path_buf(),
            });
        }
        Err(e) => warn!(path = %pdf.display(), "Cannot remove source: {}", e),
    }
}

fn mark_failed(
    pdf: &Path,
    mut tracker: FileTracker,
    mut events: Vec<TickEvent>,
    error_text: String,
) -> Result<Conversion> {
    tracker.advance(FileState::ConversionFailed)?;
    let marker = failure_marker(pdf);
    write_atomic(&marker, format!("{}\n", error_text).as_bytes())?;
    error!(
        path = %pdf.display(),
        marker = %marker.display(),
        "Conversion failed: {}",
        error_text
    );
    events.push(TickEvent::ConversionFailed {
        source: pdf.to_path_buf(),
        marker: marker.clone(),
        error: error_text.clone(),
    });

    Ok(Conversion {
        source: pdf.to_path_buf(),
        outcome: ConversionOutcome::Failed {
            marker,
            error: error_text,
        },
        states: tracker.history().to_vec(),
        events,
    })
}
