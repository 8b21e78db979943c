//! Custom error types for veridock

use crate::container::SectionKind;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for veridock operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("{0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Invalid container {path}: {problems} problem(s)")]
    InvalidContainer { path: PathBuf, problems: usize },

    #[error("Conversion of {path} failed: {reason}")]
    ConversionFailed { path: PathBuf, reason: String },

    #[error("OCR of {path} failed: {reason}")]
    OcrFailed { path: PathBuf, reason: String },

    #[error("Import error: {0}")]
    Import(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code for the CLI. Lifecycle failures get distinct codes so
    /// service managers and scripts can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Scheduler(SchedulerError::AlreadyRunning { .. }) => 3,
            Error::Scheduler(SchedulerError::NotRunning) => 4,
            Error::Scheduler(SchedulerError::ShutdownTimeout { .. }) => 5,
            Error::InvalidContainer { .. } | Error::Decode(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias for veridock
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while building a new container
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("original document is empty")]
    EmptyOriginal,

    #[error("metadata lacks a page count")]
    MissingPageCount,

    #[error("thumbnail grid image is empty")]
    EmptyThumbnail,

    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Failures while reading a container
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed container: {0}")]
    Malformed(String),

    #[error("section missing: {0}")]
    SectionMissing(SectionKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while patching OCR data or status into a container
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("container is malformed: {0}")]
    Malformed(String),

    #[error("OCR page index {page_index} is out of range (page_count={page_count})")]
    PageOutOfRange { page_index: usize, page_count: u32 },

    #[error("OCR payload lists page {0} more than once")]
    DuplicatePage(usize),

    #[error("OCR payload has no entry for page(s) {0}")]
    MissingPages(String),

    #[error("OCR word '{word}' on page {page_index} has confidence {confidence}, expected 0.0 - 1.0")]
    InvalidConfidence {
        page_index: usize,
        word: String,
        confidence: f32,
    },

    #[error("container already has OCR for {existing} page(s), payload has {payload}")]
    PageCountMismatch { existing: usize, payload: usize },

    #[error("container changed since the OCR job started: {0}")]
    Conflict(String),

    #[error("container {path} is locked by process {holder}")]
    Locked { path: PathBuf, holder: String },

    #[error("OCR payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<DecodeError> for PatchError {
    fn from(err: DecodeError) -> Self {
        PatchError::Malformed(err.to_string())
    }
}

/// Rasterization and PDF inspection failures
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("corrupt document: {0}")]
    CorruptDocument(String),

    #[error("unsupported PDF feature: {0}")]
    UnsupportedFeature(String),

    #[error("rasterizer unavailable: {0}")]
    ToolUnavailable(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// OCR engine failures
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("no text found")]
    NoTextFound,

    #[error("OCR processing failed: {0}")]
    ProcessingError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon lifecycle failures
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("daemon already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("daemon is not running")]
    NotRunning,

    #[error("daemon (pid {pid}) did not stop within {secs}s")]
    ShutdownTimeout { pid: u32, secs: u64 },

    #[error("no watch directories configured")]
    NoWatchDirectories,

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
