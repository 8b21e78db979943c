//! Watch scheduler
//!
//! Two independently timed passes share nothing but the container files:
//! the scan pass turns settled PDFs into containers with OCR pending, the
//! OCR pass works through the pending backlog. [`lifecycle`] owns the
//! process state file behind `daemon`, `stop`, `status` and `restart`.

mod convert;
mod lifecycle;
mod ocr_job;
mod scheduler;
mod state;

pub use convert::*;
pub use lifecycle::*;
pub use ocr_job::*;
pub use scheduler::*;
pub use state::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Something that happened to one file during a tick, in order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TickEvent {
    Converted {
        source: PathBuf,
        container: PathBuf,
        pages: u32,
    },
    AlreadyConverted {
        source: PathBuf,
        container: PathBuf,
    },
    SourceRemoved {
        source: PathBuf,
    },
    RenderRetry {
        source: PathBuf,
        attempt: u32,
        error: String,
    },
    ConversionFailed {
        source: PathBuf,
        marker: PathBuf,
        error: String,
    },
    OcrCompleted {
        container: PathBuf,
        pages: usize,
        words: usize,
    },
    OcrFailed {
        container: PathBuf,
        attempts: u32,
        error: String,
    },
    Skipped {
        path: PathBuf,
        reason: String,
    },
}

/// Outcome of one scan-and-convert tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub discovered: usize,
    pub converted: usize,
    pub already_converted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub events: Vec<TickEvent>,
}

/// Outcome of one OCR tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct OcrReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub backlog: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Set when the tick stopped early because the engine is unusable
    pub aborted: Option<String>,
    pub events: Vec<TickEvent>,
}

/// Sending half of the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half, checked at tick and document boundaries
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    /// Held by signals that can never fire
    _sender: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    pub fn new() -> (ShutdownTrigger, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), ShutdownSignal { rx, _sender: None })
    }

    /// A signal that never fires, for single-shot commands
    pub fn never() -> ShutdownSignal {
        let (tx, rx) = watch::channel(false);
        ShutdownSignal {
            rx,
            _sender: Some(Arc::new(tx)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // trigger dropped without firing
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (trigger, mut signal) = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        let waiter = signal.clone();
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), signal.triggered())
            .await
            .unwrap();
        assert!(waiter.is_triggered());
    }

    #[tokio::test]
    async fn test_never_signal_pends() {
        let mut signal = ShutdownSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.triggered()).await;
        assert!(waited.is_err());
        assert!(!signal.is_triggered());
    }
}
