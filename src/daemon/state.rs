//! Per-file processing states and their legal transitions

use crate::error::SchedulerError;
use crate::models::OcrStatus;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Discovered,
    Rendering,
    /// Container written, OCR pending
    Converted,
    ConversionFailed,
    OcrInProgress,
    OcrCompleted,
    OcrFailed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Discovered => "discovered",
            FileState::Rendering => "rendering",
            FileState::Converted => "converted",
            FileState::ConversionFailed => "conversion_failed",
            FileState::OcrInProgress => "ocr_in_progress",
            FileState::OcrCompleted => "ocr_completed",
            FileState::OcrFailed => "ocr_failed",
        }
    }

    pub fn can_transition(self, to: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, to),
            (Discovered, Rendering)
                // a container with the same content already exists
                | (Discovered, Converted)
                | (Rendering, Converted)
                | (Rendering, Discovered)
                | (Rendering, ConversionFailed)
                | (Converted, OcrInProgress)
                | (OcrInProgress, OcrCompleted)
                | (OcrInProgress, OcrFailed)
                // engine went away mid-job; the container keeps its old status
                | (OcrInProgress, Converted)
                | (OcrFailed, OcrInProgress)
                | (OcrCompleted, OcrInProgress)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::ConversionFailed | FileState::OcrCompleted)
    }

    /// Where an OCR job starts for a container with this persisted status.
    /// An abandoned `in_progress` resumes as if it were still pending.
    pub fn for_ocr_job(status: OcrStatus) -> FileState {
        match status {
            OcrStatus::Pending | OcrStatus::InProgress => FileState::Converted,
            OcrStatus::Completed => FileState::OcrCompleted,
            OcrStatus::Failed => FileState::OcrFailed,
        }
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one file through a single pass, with the path it took
#[derive(Debug, Clone)]
pub struct FileTracker {
    path: PathBuf,
    state: FileState,
    history: Vec<FileState>,
}

impl FileTracker {
    pub fn new(path: &Path, initial: FileState) -> Self {
        Self {
            path: path.to_path_buf(),
            state: initial,
            history: vec![initial],
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn history(&self) -> &[FileState] {
        &self.history
    }

    /// Apply a transition, refusing illegal ones
    pub fn advance(&mut self, to: FileState) -> Result<(), SchedulerError> {
        if !self.state.can_transition(to) {
            tracing::error!(
                path = %self.path.display(),
                "Illegal state transition {} -> {}",
                self.state,
                to
            );
            return Err(SchedulerError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}
