//! Worker pool, per-source state machine, and the schedule loop.
//!
//! The [`Engine`] owns everything a pass needs: the resolved catalog, the
//! fetcher, the uploader, the hash ledger, and a rayon pool bounding how
//! many sources are in flight. One pass maps every catalog entry through
//! [`Engine::run_pass`]'s per-source state machine:
//!
//! ```text
//! fetch → hash check → transform → archive → upload → ledger commit
//! ```
//!
//! Failures are terminal for the source and for the pass only — the worker
//! returns a failed [`SourceOutcome`] and the remaining sources proceed
//! untouched. The ledger advances strictly after a successful upload, so a
//! failure at any stage means the next pass re-attempts the same revision.
//!
//! [`Engine::serve`] repeats passes on the configured interval and runs the
//! retention maintenance once a day; a [`StopToken`] (wired to Ctrl-C by
//! the binary) ends the loop and lets in-flight sources finish their
//! current stage boundaries.

use crate::archive::Archiver;
use crate::catalog::{self, SourceDescriptor};
use crate::cleanup;
use crate::config::{ConfigError, SyncConfig};
use crate::fetch::FetchSource;
use crate::ledger::{content_hash, HashLedger, LedgerError};
use crate::report::{FailureLog, RunSummary, SourceOutcome, Stage};
use crate::transform;
use crate::upload::{UploadTransport, Uploader};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the failure log within the work directory.
const FAILURE_LOG_FILENAME: &str = "failures.log";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("could not build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Cooperative shutdown signal, checked between pipeline stages and during
/// the schedule sleep. Clones share the same flag.
#[derive(Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Engine<F: FetchSource, U: UploadTransport> {
    config: SyncConfig,
    catalog: Vec<SourceDescriptor>,
    fetcher: F,
    uploader: Uploader<U>,
    ledger: Mutex<HashLedger>,
    archiver: Archiver,
    failures: FailureLog,
    stop: StopToken,
    pool: rayon::ThreadPool,
}

impl<F: FetchSource, U: UploadTransport> Engine<F, U> {
    pub fn new(
        config: SyncConfig,
        fetcher: F,
        transport: U,
        stop: StopToken,
    ) -> Result<Self, EngineError> {
        let catalog = catalog::resolve(&config)?;
        let work_dir = Path::new(&config.work_dir);
        let ledger = HashLedger::load(work_dir)?;
        let archiver = Archiver::new(&config.archive_dir);
        let failures = FailureLog::new(work_dir.join(FAILURE_LOG_FILENAME));
        let uploader = Uploader::new(transport, &config.upload);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.schedule.workers)
            .build()?;

        Ok(Self {
            config,
            catalog,
            fetcher,
            uploader,
            ledger: Mutex::new(ledger),
            archiver,
            failures,
            stop,
            pool,
        })
    }

    /// Run one pass over the whole catalog. Every source reaches a terminal
    /// state before this returns; the summary is also written to the
    /// failure log and the tracing output.
    pub fn run_pass(&self) -> RunSummary {
        info!(sources = self.catalog.len(), "starting pass");
        let outcomes: Vec<SourceOutcome> = self.pool.install(|| {
            self.catalog
                .par_iter()
                .map(|descriptor| self.process_source(descriptor))
                .collect()
        });

        let summary = RunSummary::new(outcomes);
        for (id, stage, error) in summary.failures() {
            warn!(id, stage = %stage, error, "source failed");
        }
        if let Err(err) = self.failures.record_summary(&summary) {
            warn!(error = %err, "could not write failure log");
        }
        info!(%summary, "pass complete");
        summary
    }

    /// Prune stale archive entries and sweep stale working/output files.
    pub fn maintenance(&self) {
        let retention = &self.config.retention;
        match self
            .archiver
            .prune(retention.archive_days, retention.keep_latest)
        {
            Ok(removed) if removed > 0 => info!(removed, "pruned archive entries"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "archive pruning failed"),
        }

        let downloads = self.downloads_dir();
        let output = PathBuf::from(&self.config.output_dir);
        let swept = cleanup::sweep(&[&downloads, &output], retention.output_days);
        if swept > 0 {
            info!(swept, "swept stale working/output files");
        }
    }

    /// Run passes on the configured interval until the stop token fires.
    /// Maintenance runs once a day (and on startup when configured).
    pub fn serve(&self) {
        if self.config.retention.sweep_on_start {
            self.maintenance();
        }
        let interval = Duration::from_secs(self.config.schedule.interval_minutes * 60);
        let maintenance_every = Duration::from_secs(24 * 60 * 60);
        let mut last_maintenance = Instant::now();

        while !self.stop.is_stopped() {
            self.run_pass();
            if last_maintenance.elapsed() >= maintenance_every {
                self.maintenance();
                last_maintenance = Instant::now();
            }
            self.sleep_interruptibly(interval);
        }
        info!("stop requested, shutting down");
    }

    /// The full pipeline for one source. Terminal at the first failed
    /// stage; the stop token is honored at stage boundaries.
    fn process_source(&self, descriptor: &SourceDescriptor) -> SourceOutcome {
        let id = descriptor.id.as_str();
        if self.stop.is_stopped() {
            return SourceOutcome::skipped(id);
        }

        let fetched = match self.fetcher.fetch(descriptor) {
            Ok(fetched) => fetched,
            Err(err) => return SourceOutcome::failed(id, Stage::Fetch, err),
        };
        self.save_working_copy(id, &fetched.bytes);

        let hash = content_hash(&fetched.bytes);
        if !self.ledger().should_process(id, &hash, self.reprocess_window()) {
            debug!(id, "content unchanged, skipping");
            return SourceOutcome::skipped(id);
        }
        if self.stop.is_stopped() {
            return SourceOutcome::skipped(id);
        }

        let artifact = match transform::transform(&fetched.bytes, &descriptor.params) {
            Ok(artifact) => artifact,
            Err(err) => return SourceOutcome::failed(id, Stage::Transform, err),
        };

        if let Err(err) = self.archiver.store(&artifact, id, fetched.fetched_at) {
            return SourceOutcome::failed(id, Stage::Archive, err);
        }
        self.mirror_output(&descriptor.output_name, &artifact.bytes);

        let uploaded = match self
            .uploader
            .upload(&artifact, id, &descriptor.output_name)
        {
            Ok(outcome) => outcome,
            Err(err) => return SourceOutcome::failed(id, Stage::Upload, err),
        };

        {
            let mut ledger = self.ledger();
            ledger.commit(id, hash, fetched.fetched_at, uploaded.retries);
            if let Err(err) = ledger.persist() {
                // in-memory state is ahead of disk; a restart would redo
                // this revision, which is safe because uploads are idempotent
                warn!(id, error = %err, "could not persist ledger");
                let _ = self.failures.append(id, Stage::Commit, &err.to_string());
            }
        }

        info!(id, remote = %uploaded.remote_path, retries = uploaded.retries, "source synchronized");
        SourceOutcome::succeeded(id)
    }

    /// Keep the raw fetched bytes next to the ledger for inspection.
    /// Best-effort: the pipeline never fails over a working copy.
    fn save_working_copy(&self, id: &str, bytes: &[u8]) {
        let dir = self.downloads_dir();
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(&dir)?;
            let tmp = dir.join(format!("{id}.original.tmp"));
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, dir.join(format!("{id}.original")))
        };
        if let Err(err) = write() {
            warn!(id, error = %err, "could not save working copy");
        }
    }

    /// Mirror the latest artifact into the output directory. Best-effort.
    fn mirror_output(&self, name: &str, bytes: &[u8]) {
        let dir = PathBuf::from(&self.config.output_dir);
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(name), bytes)
        };
        if let Err(err) = write() {
            warn!(name, error = %err, "could not mirror output file");
        }
    }

    fn downloads_dir(&self) -> PathBuf {
        Path::new(&self.config.work_dir).join("downloads")
    }

    fn reprocess_window(&self) -> Option<chrono::Duration> {
        match self.config.fetch.force_reprocess_hours {
            0 => None,
            hours => Some(chrono::Duration::hours(hours as i64)),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, HashLedger> {
        // a poisoned lock means a worker panicked mid-commit; the map
        // itself is still a consistent BTreeMap, so keep going
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sleep_interruptibly(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline && !self.stop.is_stopped() {
            std::thread::sleep(Duration::from_millis(250));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, FetchResult};
    use crate::transform::{OutputFormat, TransformParams};
    use crate::upload::tests::MockTransport;
    use chrono::Utc;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::collections::{HashMap, HashSet};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn png_fixture(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    /// Canned fetcher keyed by source id. Shares state across clones so
    /// tests keep a handle after moving one into the engine.
    #[derive(Default, Clone)]
    struct CannedFetcher {
        bodies: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        failing: Arc<Mutex<HashSet<String>>>,
        fetches: Arc<AtomicUsize>,
    }

    impl CannedFetcher {
        fn set(&self, id: &str, bytes: Vec<u8>) {
            self.bodies.lock().unwrap().insert(id.to_string(), bytes);
        }

        fn fail(&self, id: &str) {
            self.failing.lock().unwrap().insert(id.to_string());
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl FetchSource for CannedFetcher {
        fn fetch(&self, descriptor: &SourceDescriptor) -> Result<FetchResult, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().unwrap().contains(&descriptor.id) {
                return Err(FetchError::Status {
                    url: descriptor.url.clone(),
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                });
            }
            let bytes = self
                .bodies
                .lock()
                .unwrap()
                .get(&descriptor.id)
                .cloned()
                .unwrap_or_default();
            Ok(FetchResult {
                bytes,
                content_type: Some("image/png".to_string()),
                fetched_at: Utc::now(),
            })
        }
    }

    fn test_config(tmp: &TempDir, stems: &[&str]) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.work_dir = tmp.path().join("work").to_string_lossy().to_string();
        config.archive_dir = tmp.path().join("archive").to_string_lossy().to_string();
        config.output_dir = tmp.path().join("processed").to_string_lossy().to_string();
        config.fetch.max_retries = 0;
        config.fetch.base_delay_ms = 1;
        config.upload.remote_dir = "/site/images".to_string();
        config.upload.max_retries = 0;
        config.upload.base_delay_ms = 1;
        config.upload.max_delay_ms = 2;
        config.schedule.workers = 3;
        config.transform = TransformParams {
            target: [32, 32],
            working_max_dimension: 1,
            format: OutputFormat::Png,
            ..TransformParams::default()
        };
        config.sources = stems
            .iter()
            .map(|stem| crate::config::SourceConfig {
                url: format!("https://example.com/{stem}.png"),
                ..crate::config::SourceConfig::default()
            })
            .collect();
        config
    }

    fn engine(
        config: SyncConfig,
        fetcher: CannedFetcher,
        transport: MockTransport,
    ) -> Engine<CannedFetcher, MockTransport> {
        Engine::new(config, fetcher, transport, StopToken::new()).unwrap()
    }

    // ==================== pass semantics ====================

    #[test]
    fn first_pass_uploads_second_pass_skips() {
        let tmp = TempDir::new().unwrap();
        let fetcher = CannedFetcher::default();
        fetcher.set("a", png_fixture(64, 48, [10, 20, 30]));
        fetcher.set("b", png_fixture(40, 40, [200, 10, 10]));
        let mock = MockTransport::new();
        let engine = engine(test_config(&tmp, &["a", "b"]), fetcher, mock.clone());

        let first = engine.run_pass();
        assert_eq!(first.succeeded(), 2);
        assert!(!first.has_failures());
        let mut names = mock.stored_names();
        names.sort();
        assert_eq!(names, vec!["a.png", "b.png"]);

        let second = engine.run_pass();
        assert_eq!(second.skipped(), 2);
        assert_eq!(second.succeeded(), 0);
        // no further uploads happened
        assert_eq!(mock.store_attempts(), 2);
    }

    #[test]
    fn changed_content_is_reprocessed() {
        let tmp = TempDir::new().unwrap();
        let fetcher = CannedFetcher::default();
        fetcher.set("a", png_fixture(64, 48, [10, 20, 30]));
        let mock = MockTransport::new();
        let engine = engine(test_config(&tmp, &["a"]), fetcher.clone(), mock.clone());

        assert_eq!(engine.run_pass().succeeded(), 1);

        fetcher.set("a", png_fixture(64, 48, [99, 99, 99]));
        assert_eq!(engine.run_pass().succeeded(), 1);
        assert_eq!(mock.store_attempts(), 2);

        // unchanged again
        assert_eq!(engine.run_pass().skipped(), 1);
    }

    #[test]
    fn failed_upload_leaves_ledger_unadvanced() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &["a"]);
        let fetcher = CannedFetcher::default();
        fetcher.set("a", png_fixture(64, 48, [10, 20, 30]));

        let failing = engine(config.clone(), fetcher.clone(), MockTransport::failing_always());
        let summary = failing.run_pass();
        assert_eq!(summary.failed(), 1);

        // the artifact was archived before the upload attempt
        let archiver = Archiver::new(&config.archive_dir);
        assert_eq!(archiver.entries_for("a").unwrap().len(), 1);
        // and the failure landed in the log
        let log = Path::new(&config.work_dir).join(FAILURE_LOG_FILENAME);
        assert!(std::fs::read_to_string(log).unwrap().contains("\tupload\t"));

        // a fresh engine over the same work dir re-attempts the revision
        let mock = MockTransport::new();
        let retried = engine(config, fetcher, mock.clone());
        assert_eq!(retried.run_pass().succeeded(), 1);
        assert_eq!(mock.stored_names(), vec!["a.png"]);
    }

    #[test]
    fn fetch_failure_is_isolated_to_its_source() {
        let tmp = TempDir::new().unwrap();
        let fetcher = CannedFetcher::default();
        fetcher.set("a", png_fixture(32, 32, [1, 2, 3]));
        fetcher.set("c", png_fixture(32, 32, [4, 5, 6]));
        fetcher.fail("b");
        let mock = MockTransport::new();
        let engine = engine(test_config(&tmp, &["a", "b", "c"]), fetcher, mock.clone());

        let summary = engine.run_pass();
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        let mut names = mock.stored_names();
        names.sort();
        assert_eq!(names, vec!["a.png", "c.png"]);
    }

    #[test]
    fn stop_token_short_circuits_pass() {
        let tmp = TempDir::new().unwrap();
        let fetcher = CannedFetcher::default();
        fetcher.set("a", png_fixture(32, 32, [1, 2, 3]));
        let mock = MockTransport::new();
        let stop = StopToken::new();
        let engine = Engine::new(
            test_config(&tmp, &["a"]),
            fetcher.clone(),
            mock.clone(),
            stop.clone(),
        )
        .unwrap();

        stop.stop();
        let summary = engine.run_pass();
        assert_eq!(summary.skipped(), 1);
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(mock.store_attempts(), 0);
    }

    // ==================== filesystem side effects ====================

    #[test]
    fn working_copy_and_output_mirror_written() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &["a"]);
        let fetcher = CannedFetcher::default();
        let original = png_fixture(64, 48, [10, 20, 30]);
        fetcher.set("a", original.clone());
        let engine = engine(config.clone(), fetcher, MockTransport::new());

        engine.run_pass();

        let copy = Path::new(&config.work_dir).join("downloads/a.original");
        assert_eq!(std::fs::read(copy).unwrap(), original);
        assert!(Path::new(&config.output_dir).join("a.png").exists());
        // no tmp leftovers
        assert!(!Path::new(&config.work_dir)
            .join("downloads/a.original.tmp")
            .exists());
    }

    #[test]
    fn maintenance_prunes_archive_and_sweeps_tmp_files() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, &["a"]);

        // seed a stale archive entry plus a fresh one
        let archiver = Archiver::new(&config.archive_dir);
        let artifact = crate::transform::Artifact {
            bytes: vec![1, 2, 3],
            width: 4,
            height: 4,
            format: OutputFormat::Png,
            quality: 60,
        };
        archiver
            .store(&artifact, "a", Utc::now() - chrono::Duration::days(30))
            .unwrap();
        archiver.store(&artifact, "a", Utc::now()).unwrap();

        // and an interrupted download
        let downloads = Path::new(&config.work_dir).join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(downloads.join("a.original.tmp"), "x").unwrap();

        let engine = engine(config.clone(), CannedFetcher::default(), MockTransport::new());
        engine.maintenance();

        assert_eq!(archiver.entries_for("a").unwrap().len(), 1);
        assert!(!downloads.join("a.original.tmp").exists());
    }

    #[test]
    fn duplicate_source_ids_rejected_at_construction() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp, &["a"]);
        config.sources.push(crate::config::SourceConfig {
            url: "https://other.example.com/a.png".to_string(),
            ..crate::config::SourceConfig::default()
        });

        let result = Engine::new(
            config,
            CannedFetcher::default(),
            MockTransport::new(),
            StopToken::new(),
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
