//! Scan and OCR ticks and the loops that time them

use super::{
    convert_pdf, discover_pdfs, ocr_container, Conversion, ConversionOutcome, ConvertOptions,
    OcrJob, OcrOptions, OcrOutcome, OcrReport, RunGuard, ScanReport, ShutdownSignal, TickEvent,
};
use crate::config::Config;
use crate::error::{Error, OcrError, Result};
use crate::ocr::{OcrEngine, TesseractEngine};
use crate::registry::Registry;
use crate::render::{PdftoppmRenderer, Renderer};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Progress notifications from a scan tick
#[derive(Debug, Clone, Copy)]
pub enum ScanProgress<'a> {
    Discovered(usize),
    Finished(&'a Path),
}

/// Runs scan and OCR ticks against the configured watch directories
pub struct Scheduler {
    config: Arc<Config>,
    renderer: Arc<dyn Renderer>,
    engine: Arc<dyn OcrEngine>,
}

impl Scheduler {
    pub fn new(config: Config, renderer: Arc<dyn Renderer>, engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            config: Arc::new(config),
            renderer,
            engine,
        }
    }

    /// Scheduler backed by pdftoppm and tesseract as configured
    pub fn from_config(config: Config) -> Self {
        let renderer = PdftoppmRenderer::new(config.render.pdftoppm_path.clone());
        let engine = TesseractEngine::new(
            config.ocr.tesseract_path.clone(),
            config.ocr.oem,
            config.ocr.psm,
            config.ocr.min_confidence,
        );
        Self::new(config, Arc::new(renderer), Arc::new(engine))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn engine(&self) -> &dyn OcrEngine {
        self.engine.as_ref()
    }

    fn watch_dirs(&self) -> Result<Vec<PathBuf>> {
        let dirs = self.config.watch_dirs()?;
        if dirs.is_empty() {
            warn!("No watch directories configured");
        }
        Ok(dirs)
    }

    fn snapshot(&self, dirs: &[PathBuf]) {
        if !self.config.daemon.registry_snapshot {
            return;
        }
        let path = &self.config.paths.registry_file;
        if let Err(e) = Registry::scan(dirs).save(path) {
            warn!("Cannot write registry snapshot {}: {}", path.display(), e);
        }
    }

    /// Convert every settled, unmarked PDF in the watch directories.
    ///
    /// Documents are independent: one failing does not stop the others.
    pub async fn scan_tick(&self, shutdown: &ShutdownSignal) -> Result<ScanReport> {
        self.scan_tick_with(shutdown, &|_| {}).await
    }

    /// [`Self::scan_tick`], reporting each finished file to `on_progress`
    pub async fn scan_tick_with(
        &self,
        shutdown: &ShutdownSignal,
        on_progress: &(dyn Fn(ScanProgress<'_>) + Send + Sync),
    ) -> Result<ScanReport> {
        let mut report = ScanReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        let dirs = self.watch_dirs()?;
        let registry = Registry::scan(&dirs);
        let candidates = discover_pdfs(&dirs, self.config.scan.settle());
        report.discovered = candidates.len();
        on_progress(ScanProgress::Discovered(candidates.len()));
        debug!(candidates = candidates.len(), "Scan tick");

        let options = ConvertOptions::from_config(&self.config);
        let results: Vec<(PathBuf, Option<Result<Conversion>>)> = stream::iter(candidates)
            .map(|pdf| {
                let registry = &registry;
                let options = &options;
                async move {
                    if shutdown.is_triggered() {
                        return (pdf, None);
                    }
                    let result =
                        convert_pdf(self.renderer(), &pdf, options, Some(registry), shutdown).await;
                    on_progress(ScanProgress::Finished(&pdf));
                    (pdf, Some(result))
                }
            })
            .buffer_unordered(self.config.scan.concurrency)
            .collect()
            .await;

        for (pdf, result) in results {
            match result {
                None => {
                    report.skipped += 1;
                    report.events.push(TickEvent::Skipped {
                        path: pdf,
                        reason: "shutdown requested".to_string(),
                    });
                }
                Some(Ok(conversion)) => {
                    match conversion.outcome {
                        ConversionOutcome::Converted { .. } => report.converted += 1,
                        ConversionOutcome::AlreadyConverted { .. } => report.already_converted += 1,
                        ConversionOutcome::Failed { .. } => report.failed += 1,
                        ConversionOutcome::Cancelled => report.skipped += 1,
                    }
                    report.events.extend(conversion.events);
                }
                Some(Err(e)) => {
                    warn!(path = %pdf.display(), "Conversion skipped: {}", e);
                    report.skipped += 1;
                    report.events.push(TickEvent::Skipped {
                        path: pdf,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.snapshot(&dirs);
        report.finished_at = Some(Utc::now());
        if report.discovered > 0 {
            info!(
                converted = report.converted,
                failed = report.failed,
                skipped = report.skipped,
                "Scan tick finished"
            );
        }
        Ok(report)
    }

    /// Work through the OCR backlog: pending, failed below the retry bound,
    /// and abandoned in-progress containers.
    pub async fn ocr_tick(&self, shutdown: &ShutdownSignal) -> Result<OcrReport> {
        let mut report = OcrReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        let dirs = self.watch_dirs()?;
        let registry = Registry::scan(&dirs);
        let backlog: Vec<PathBuf> = registry
            .ocr_backlog(self.config.ocr.max_attempts)
            .into_iter()
            .map(|e| e.path.clone())
            .collect();
        report.backlog = backlog.len();

        if backlog.is_empty() {
            debug!("OCR backlog empty");
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        if !self.engine.is_available().await {
            let reason = format!("OCR engine '{}' is unavailable", self.engine.name());
            warn!(backlog = backlog.len(), "{}, skipping tick", reason);
            report.aborted = Some(reason);
            report.skipped = backlog.len();
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        let options = OcrOptions::from_config(&self.config);
        let engine_gone = AtomicBool::new(false);
        let results: Vec<(PathBuf, Option<Result<OcrJob>>)> = stream::iter(backlog)
            .map(|path| {
                let options = &options;
                let engine_gone = &engine_gone;
                async move {
                    if shutdown.is_triggered() || engine_gone.load(Ordering::SeqCst) {
                        return (path, None);
                    }
                    let result = ocr_container(self.renderer(), self.engine(), &path, options).await;
                    if let Err(Error::Ocr(OcrError::EngineUnavailable(_))) = &result {
                        engine_gone.store(true, Ordering::SeqCst);
                    }
                    (path, Some(result))
                }
            })
            .buffer_unordered(self.config.ocr.concurrency)
            .collect()
            .await;

        for (path, result) in results {
            match result {
                None => {
                    report.skipped += 1;
                    report.events.push(TickEvent::Skipped {
                        path,
                        reason: "tick stopped early".to_string(),
                    });
                }
                Some(Ok(job)) => match job.outcome {
                    OcrOutcome::Completed { pages, words } => {
                        report.completed += 1;
                        report.events.push(TickEvent::OcrCompleted {
                            container: path,
                            pages,
                            words,
                        });
                    }
                    OcrOutcome::Failed { attempts, error } => {
                        report.failed += 1;
                        report.events.push(TickEvent::OcrFailed {
                            container: path,
                            attempts,
                            error,
                        });
                    }
                    OcrOutcome::AlreadyCompleted => report.skipped += 1,
                },
                Some(Err(Error::Ocr(OcrError::EngineUnavailable(reason)))) => {
                    report.skipped += 1;
                    report.aborted = Some(reason.clone());
                    report.events.push(TickEvent::Skipped { path, reason });
                }
                Some(Err(e)) => {
                    warn!(path = %path.display(), "OCR skipped: {}", e);
                    report.skipped += 1;
                    report.events.push(TickEvent::Skipped {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.snapshot(&dirs);
        report.finished_at = Some(Utc::now());
        info!(
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            "OCR tick finished"
        );
        Ok(report)
    }

    /// Run both loops until shutdown. Each loop finishes its current tick
    /// before stopping; the two kinds of tick may overlap.
    pub async fn run(self: Arc<Self>, guard: Arc<RunGuard>, shutdown: ShutdownSignal) -> Result<()> {
        info!(
            scan_interval = self.config.scan.interval_secs,
            ocr_interval = self.config.ocr.interval_secs,
            "Scheduler started"
        );

        let scan = tokio::spawn(scan_loop(self.clone(), guard.clone(), shutdown.clone()));
        let ocr = tokio::spawn(ocr_loop(self, guard, shutdown));
        let (scan, ocr) = tokio::join!(scan, ocr);
        scan.map_err(|e| Error::Other(format!("scan loop panicked: {}", e)))?;
        ocr.map_err(|e| Error::Other(format!("OCR loop panicked: {}", e)))?;

        info!("Scheduler stopped");
        Ok(())
    }
}

async fn scan_loop(scheduler: Arc<Scheduler>, guard: Arc<RunGuard>, shutdown: ShutdownSignal) {
    let mut interval = tokio::time::interval(scheduler.config.scan.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stop = shutdown.clone();

    loop {
        tokio::select! {
            _ = stop.triggered() => break,
            _ = interval.tick() => {}
        }
        match scheduler.scan_tick(&shutdown).await {
            Ok(report) => guard.record_scan(&report),
            Err(e) => error!("Scan tick failed: {}", e),
        }
    }
    debug!("Scan loop exited");
}

async fn ocr_loop(scheduler: Arc<Scheduler>, guard: Arc<RunGuard>, shutdown: ShutdownSignal) {
    let mut interval = tokio::time::interval(scheduler.config.ocr.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stop = shutdown.clone();

    loop {
        tokio::select! {
            _ = stop.triggered() => break,
            _ = interval.tick() => {}
        }
        match scheduler.ocr_tick(&shutdown).await {
            Ok(report) => guard.record_ocr(&report),
            Err(e) => error!("OCR tick failed: {}", e),
        }
    }
    debug!("OCR loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{decode_file, SectionKind};
    use crate::daemon::{failure_marker, DaemonLifecycle};
    use crate::models::OcrStatus;
    use crate::testing::{sample_pdf, write_container, FakeOcrEngine, FakeRenderer};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(base: &Path, inbox: &Path) -> Config {
        let mut config = Config::load_from(Some(base.to_path_buf())).unwrap();
        config.scan.settle_secs = 0;
        config.scan.retry_delay_ms = 1;
        config.ocr.languages = vec!["eng".to_string()];
        let inbox = inbox.to_string_lossy().into_owned();
        config.save_watch_list(&[inbox.as_str()]).unwrap();
        config
    }

    fn setup() -> (TempDir, PathBuf, Config) {
        let tmp = TempDir::new().unwrap();
        let inbox = tmp.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        let config = test_config(&tmp.path().join("home"), &inbox);
        (tmp, inbox, config)
    }

    #[tokio::test]
    async fn test_three_page_document_end_to_end() {
        let (_tmp, inbox, config) = setup();
        let pdf = inbox.join("contract.pdf");
        std::fs::write(&pdf, sample_pdf(3, Some("Contract"))).unwrap();

        let engine = Arc::new(FakeOcrEngine::new());
        let scheduler = Scheduler::new(config, Arc::new(FakeRenderer::new()), engine.clone());
        let shutdown = ShutdownSignal::never();

        let scan = scheduler.scan_tick(&shutdown).await.unwrap();
        assert_eq!(scan.converted, 1);
        assert!(!pdf.exists());

        let container = inbox.join("contract.svg");
        let decoded = decode_file(&container, &[SectionKind::Metadata]).unwrap();
        assert_eq!(decoded.header.ocr_status, OcrStatus::Pending);
        assert_eq!(decoded.metadata.unwrap().thumbnail_layout.tiles.len(), 3);

        let ocr = scheduler.ocr_tick(&shutdown).await.unwrap();
        assert_eq!(ocr.backlog, 1);
        assert_eq!(ocr.completed, 1);
        assert_eq!(engine.calls(), 3);

        let decoded = decode_file(&container, &[SectionKind::Ocr]).unwrap();
        assert_eq!(decoded.header.ocr_status, OcrStatus::Completed);
        assert_eq!(decoded.ocr.unwrap().pages.len(), 3);

        // nothing left to do
        let again = scheduler.ocr_tick(&shutdown).await.unwrap();
        assert_eq!(again.backlog, 0);
        assert!(scheduler.config().paths.registry_file.exists());
    }

    #[tokio::test]
    async fn test_failed_conversion_is_not_retried_by_later_ticks() {
        let (_tmp, inbox, config) = setup();
        let pdf = inbox.join("bad.pdf");
        std::fs::write(&pdf, sample_pdf(1, None)).unwrap();

        let renderer = Arc::new(FakeRenderer::failing(10));
        let scheduler = Scheduler::new(config, renderer.clone(), Arc::new(FakeOcrEngine::new()));
        let shutdown = ShutdownSignal::never();

        let first = scheduler.scan_tick(&shutdown).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(renderer.calls(), 3);
        assert!(pdf.exists());
        assert!(failure_marker(&pdf).exists());

        let second = scheduler.scan_tick(&shutdown).await.unwrap();
        assert_eq!(second.discovered, 0);
        assert_eq!(renderer.calls(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_engine_aborts_tick_without_marking() {
        let (_tmp, inbox, config) = setup();
        let a = write_container(&inbox, "a.svg", 1);
        let b = write_container(&inbox, "b.svg", 1);

        let engine = Arc::new(FakeOcrEngine::unavailable());
        let scheduler = Scheduler::new(config, Arc::new(FakeRenderer::new()), engine.clone());
        let report = scheduler.ocr_tick(&ShutdownSignal::never()).await.unwrap();

        assert!(report.aborted.is_some());
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(engine.calls(), 0);
        for path in [a, b] {
            let header = decode_file(&path, &[]).unwrap().header;
            assert_eq!(header.ocr_status, OcrStatus::Pending);
            assert_eq!(header.ocr_attempts, 0);
        }
    }

    #[tokio::test]
    async fn test_ocr_failures_stop_at_retry_bound() {
        let (_tmp, inbox, mut config) = setup();
        config.ocr.max_attempts = 2;
        let path = write_container(&inbox, "doc.svg", 1);

        let engine = Arc::new(FakeOcrEngine::failing(5));
        let scheduler = Scheduler::new(config, Arc::new(FakeRenderer::new()), engine.clone());
        let shutdown = ShutdownSignal::never();

        for _ in 0..3 {
            scheduler.ocr_tick(&shutdown).await.unwrap();
        }
        let header = decode_file(&path, &[]).unwrap().header;
        assert_eq!(header.ocr_status, OcrStatus::Failed);
        assert_eq!(header.ocr_attempts, 2);
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (tmp, inbox, config) = setup();
        let pdf = inbox.join("memo.pdf");
        std::fs::write(&pdf, sample_pdf(1, None)).unwrap();

        let lifecycle = DaemonLifecycle::with_paths(
            tmp.path().join("home").join("daemon.json"),
            tmp.path().join("home").join("daemon.log"),
            Duration::from_secs(5),
        );
        let guard = Arc::new(lifecycle.acquire_exclusive_run(vec![inbox.clone()]).unwrap());
        let scheduler = Arc::new(Scheduler::new(
            config,
            Arc::new(FakeRenderer::new()),
            Arc::new(FakeOcrEngine::new()),
        ));
        let (trigger, shutdown) = ShutdownSignal::new();

        let handle = tokio::spawn(scheduler.run(guard.clone(), shutdown));
        // the first scan tick fires immediately
        for _ in 0..100 {
            if inbox.join("memo.svg").exists() && guard.state().scan_ticks > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(inbox.join("memo.svg").exists());
        assert!(guard.state().scan_ticks >= 1);
        assert!(guard.state().last_scan_tick.is_some());
    }
}
