//! Periodic Reader - Pull-Model Export on a Fixed-Rate Timer
//!
//! Some signals (metrics in particular) are not pushed record by record; they
//! are read on demand from a [`CollectionRegistration`] that produces a
//! point-in-time snapshot. [`PeriodicReader`] collects such a snapshot every
//! `export_interval` and hands it to the same [`Exporter`] contract the batch
//! processor uses.
//!
//! At most one export is in flight per reader. A tick that fires while the
//! previous export is still running is skipped rather than queued, and an
//! explicit [`force_flush`](PeriodicReader::force_flush) in that state fails
//! with [`ExportError::Busy`].
//!
//! Collection errors, collection panics and export failures fail that cycle's
//! [`AsyncResult`] and are logged through a throttled logger; the timer keeps
//! running.
//!
//! Timer-driven and shutdown collections run on the runtime's blocking pool,
//! so a slow [`collect`](CollectionRegistration::collect) never stalls an
//! async worker thread.

use crate::async_result::AsyncResult;
use crate::config::ReaderConfig;
use crate::error::{ConfigError, ExportError};
use crate::exporter::Exporter;
use crate::metrics::{MetricsSink, PipelineMetrics};
use crate::throttle::ThrottledLogger;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Source of point-in-time snapshots for pull-model signals.
///
/// `collect` may block. The timer and the final shutdown flush call it through
/// `spawn_blocking`; [`PeriodicReader::force_flush`] calls it on the caller's
/// thread.
pub trait CollectionRegistration<R>: Send + Sync {
    /// Collects the current snapshot.
    fn collect(&self) -> Result<Vec<R>, ExportError>;
}

impl<R, F> CollectionRegistration<R> for F
where
    F: Fn() -> Result<Vec<R>, ExportError> + Send + Sync,
{
    fn collect(&self) -> Result<Vec<R>, ExportError> {
        self()
    }
}

struct ReaderShared<R> {
    registration: Arc<dyn CollectionRegistration<R>>,
    exporter: Arc<dyn Exporter<R>>,
    config: ReaderConfig,
    metrics: Arc<dyn MetricsSink>,
    log: Arc<ThrottledLogger>,
    in_flight: Arc<AtomicBool>,
    last_export: Mutex<Option<AsyncResult>>,
    handle: Handle,
}

impl<R: Send + 'static> ReaderShared<R> {
    /// Collects and starts one export unless one is already in flight.
    fn run_cycle(&self) -> AsyncResult {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous export still in flight; skipping collection");
            return AsyncResult::failed(ExportError::Busy);
        }

        let snapshot = match panic::catch_unwind(AssertUnwindSafe(|| self.registration.collect())) {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return self.abandon(e),
            Err(_) => return self.abandon(ExportError::Collection("collection panicked".into())),
        };

        if snapshot.is_empty() {
            debug!("no data collected; skipping export");
            self.in_flight.store(false, Ordering::Release);
            return AsyncResult::succeeded();
        }

        let count = snapshot.len();
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.exporter.export(snapshot))) {
            Ok(result) => result,
            Err(_) => return self.abandon(ExportError::Transport("exporter panicked".into())),
        };

        *self
            .last_export
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());

        let in_flight = Arc::clone(&self.in_flight);
        let metrics = Arc::clone(&self.metrics);
        let log = Arc::clone(&self.log);
        result.when_complete(move |outcome| {
            match outcome {
                Ok(()) => metrics.record_exported(count as u64),
                Err(e) => {
                    metrics.record_failed(count as u64);
                    log.warn(format_args!("periodic export of {} records failed: {}", count, e));
                }
            }
            in_flight.store(false, Ordering::Release);
        });

        let watched = result.clone();
        let timeout = self.config.export_timeout;
        self.handle.spawn(async move {
            if time::timeout(timeout, watched.completion()).await.is_err() {
                watched.fail(ExportError::Timeout);
            }
        });

        result
    }

    fn abandon(&self, error: ExportError) -> AsyncResult {
        self.in_flight.store(false, Ordering::Release);
        self.log.warn(format_args!("periodic collection failed: {}", error));
        AsyncResult::failed(error)
    }

    fn last_export(&self) -> Option<AsyncResult> {
        self.last_export
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Runs one cycle on the blocking pool.
async fn run_cycle_blocking<R: Send + 'static>(shared: &Arc<ReaderShared<R>>) -> AsyncResult {
    let cycle = Arc::clone(shared);
    match shared.handle.spawn_blocking(move || cycle.run_cycle()).await {
        Ok(result) => result,
        Err(e) => AsyncResult::failed(ExportError::Collection(format!("collection task failed: {}", e))),
    }
}

async fn run_timer<R: Send + 'static>(shared: Arc<ReaderShared<R>>, mut stop_rx: oneshot::Receiver<()>) {
    let period = shared.config.export_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                // Outcome is observed by the completion callback
                let _ = run_cycle_blocking(&shared).await;
            }
        }
    }
    debug!("periodic reader timer stopped");
}

/// Builder for [`PeriodicReader`].
pub struct PeriodicReaderBuilder<R> {
    registration: Arc<dyn CollectionRegistration<R>>,
    exporter: Arc<dyn Exporter<R>>,
    config: ReaderConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
    handle: Option<Handle>,
}

impl<R: Send + 'static> PeriodicReaderBuilder<R> {
    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<PeriodicReader<R>, ConfigError> {
        self.config.validate()?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        let shared = Arc::new(ReaderShared {
            registration: self.registration,
            exporter: self.exporter,
            config: self.config,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(PipelineMetrics::new())),
            log: Arc::new(ThrottledLogger::new()),
            in_flight: Arc::new(AtomicBool::new(false)),
            last_export: Mutex::new(None),
            handle: handle.clone(),
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let timer = handle.spawn(run_timer(Arc::clone(&shared), stop_rx));

        Ok(PeriodicReader {
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            timer: Mutex::new(Some(timer)),
            is_shutdown: AtomicBool::new(false),
        })
    }
}

/// Collects from a [`CollectionRegistration`] and exports on a fixed-rate timer.
pub struct PeriodicReader<R> {
    shared: Arc<ReaderShared<R>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    is_shutdown: AtomicBool,
}

impl<R: Send + 'static> PeriodicReader<R> {
    /// Creates a reader on the current tokio runtime with default metrics.
    pub fn new<C, E>(config: ReaderConfig, registration: C, exporter: E) -> Result<Self, ConfigError>
    where
        C: CollectionRegistration<R> + 'static,
        E: Exporter<R> + 'static,
    {
        Self::builder(registration, exporter).with_config(config).build()
    }

    pub fn builder<C, E>(registration: C, exporter: E) -> PeriodicReaderBuilder<R>
    where
        C: CollectionRegistration<R> + 'static,
        E: Exporter<R> + 'static,
    {
        PeriodicReaderBuilder {
            registration: Arc::new(registration),
            exporter: Arc::new(exporter),
            config: ReaderConfig::default(),
            metrics: None,
            handle: None,
        }
    }

    /// Runs one collect-and-export cycle now, independent of the timer.
    pub fn force_flush(&self) -> AsyncResult {
        if self.is_shutdown.load(Ordering::Acquire) {
            return AsyncResult::succeeded();
        }
        self.shared.run_cycle()
    }

    /// Stops the timer, performs a final flush once any in-flight export has
    /// finished, then shuts the exporter down. Idempotent.
    ///
    /// The final flush starts only after the timer task has exited, so a tick
    /// racing with shutdown cannot make it fail with [`ExportError::Busy`].
    pub fn shutdown(&self) -> AsyncResult {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return AsyncResult::succeeded();
        }

        if let Some(stop_tx) = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = stop_tx.send(());
        }

        let timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();

        let result = AsyncResult::pending();
        let resolver = result.clone();
        let shared = Arc::clone(&self.shared);
        self.shared.handle.spawn(async move {
            if let Some(timer) = timer {
                let _ = timer.await;
            }
            if let Some(previous) = shared.last_export() {
                let _ = previous.completion().await;
            }
            let flushed = run_cycle_blocking(&shared).await.completion().await;
            let _ = shared.exporter.shutdown().completion().await;
            resolver.resolve(flushed);
        });
        result
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingExporter {
        batches: Mutex<Vec<Vec<u64>>>,
        hang: bool,
        delay: Option<Duration>,
        pending: Mutex<Vec<AsyncResult>>,
        shutdowns: AtomicUsize,
    }

    impl RecordingExporter {
        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::default()
            }
        }

        fn delayed(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn export_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        fn release_pending(&self) {
            for result in self.pending.lock().unwrap().drain(..) {
                result.succeed();
            }
        }
    }

    impl Exporter<u64> for RecordingExporter {
        fn export(&self, batch: Vec<u64>) -> AsyncResult {
            self.batches.lock().unwrap().push(batch);
            if self.hang {
                let result = AsyncResult::pending();
                self.pending.lock().unwrap().push(result.clone());
                result
            } else if let Some(delay) = self.delay {
                let result = AsyncResult::pending();
                let resolver = result.clone();
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    resolver.succeed();
                });
                result
            } else {
                AsyncResult::succeeded()
            }
        }

        fn shutdown(&self) -> AsyncResult {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            AsyncResult::succeeded()
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Returns an incrementing single-value snapshot and counts calls.
    fn counter_registration(
        calls: &Arc<AtomicUsize>,
    ) -> impl Fn() -> Result<Vec<u64>, ExportError> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || Ok(vec![calls.fetch_add(1, Ordering::SeqCst) as u64])
    }

    fn config(interval_ms: u64) -> ReaderConfig {
        ReaderConfig::default().with_export_interval(Duration::from_millis(interval_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_exports_on_every_tick() {
        let exporter = Arc::new(RecordingExporter::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let _reader =
            PeriodicReader::<u64>::new(config(100), counter_registration(&calls), Arc::clone(&exporter)).unwrap();

        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(*exporter.batches.lock().unwrap(), vec![vec![0], vec![1], vec![2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_ticks_while_export_in_flight() {
        let exporter = Arc::new(RecordingExporter::hanging());
        let calls = Arc::new(AtomicUsize::new(0));
        let reader_config = config(100).with_export_timeout(Duration::from_secs(60));
        let reader = PeriodicReader::<u64>::new(reader_config, counter_registration(&calls), Arc::clone(&exporter))
            .unwrap();

        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(exporter.export_count(), 1, "ticks 2 and 3 skipped");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no collection while busy");
        assert_eq!(reader.force_flush().failure(), Some(ExportError::Busy));

        exporter.release_pending();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(exporter.export_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collection_errors_do_not_stop_timer() {
        let exporter = Arc::new(RecordingExporter::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let registration = move || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            match n {
                0 => Err(ExportError::Collection("registry unavailable".into())),
                1 => panic!("instrument callback panicked"),
                _ => Ok(vec![n as u64]),
            }
        };
        let _reader = PeriodicReader::<u64>::new(config(100), registration, Arc::clone(&exporter)).unwrap();

        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*exporter.batches.lock().unwrap(), vec![vec![2]]);
    }

    #[tokio::test]
    async fn test_force_flush_reports_collection_failure() {
        let exporter = Arc::new(RecordingExporter::default());
        let registration = || -> Result<Vec<u64>, ExportError> {
            Err(ExportError::Collection("boom".into()))
        };
        let reader = PeriodicReader::<u64>::new(config(60_000), registration, Arc::clone(&exporter)).unwrap();

        let outcome = reader.force_flush().completion().await;
        assert_eq!(outcome, Err(ExportError::Collection("boom".into())));
        assert_eq!(exporter.export_count(), 0);

        // In-flight flag was released
        let outcome = reader.force_flush().completion().await;
        assert!(matches!(outcome, Err(ExportError::Collection(_))));
    }

    #[tokio::test]
    async fn test_force_flush_independent_of_timer() {
        let exporter = Arc::new(RecordingExporter::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(PipelineMetrics::new());
        let reader = PeriodicReader::<u64>::builder(counter_registration(&calls), Arc::clone(&exporter))
            .with_config(config(60_000))
            .with_metrics(metrics.clone())
            .build()
            .unwrap();

        assert!(reader.force_flush().completion().await.is_ok());
        assert_eq!(*exporter.batches.lock().unwrap(), vec![vec![0]]);
        assert_eq!(metrics.exported(), 1);
    }

    #[tokio::test]
    async fn test_empty_snapshot_skips_export() {
        let exporter = Arc::new(RecordingExporter::default());
        let registration = || -> Result<Vec<u64>, ExportError> { Ok(Vec::new()) };
        let reader = PeriodicReader::<u64>::new(config(60_000), registration, Arc::clone(&exporter)).unwrap();

        assert!(reader.force_flush().is_success());
        assert_eq!(exporter.export_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_timeout_releases_reader() {
        let exporter = Arc::new(RecordingExporter::hanging());
        let calls = Arc::new(AtomicUsize::new(0));
        let reader_config = config(60_000).with_export_timeout(Duration::from_millis(50));
        let reader = PeriodicReader::<u64>::new(reader_config, counter_registration(&calls), Arc::clone(&exporter))
            .unwrap();

        let outcome = reader.force_flush().completion().await;
        assert_eq!(outcome, Err(ExportError::Timeout));

        // Next cycle is allowed again
        let next = reader.force_flush();
        assert!(!next.is_done());
        assert_eq!(exporter.export_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timer_and_is_idempotent() {
        let exporter = Arc::new(RecordingExporter::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let reader =
            PeriodicReader::<u64>::new(config(100), counter_registration(&calls), Arc::clone(&exporter)).unwrap();

        reader.shutdown().completion().await.unwrap();
        assert_eq!(*exporter.batches.lock().unwrap(), vec![vec![0]], "final flush");
        assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);

        assert!(reader.shutdown().is_success());
        assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(exporter.export_count(), 1, "timer stopped");
        assert!(reader.force_flush().is_success());
        assert_eq!(exporter.export_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_at_tick_boundary_still_flushes() {
        for offset_ms in [99, 100, 101] {
            let exporter = Arc::new(RecordingExporter::delayed(Duration::from_millis(30)));
            let calls = Arc::new(AtomicUsize::new(0));
            let reader =
                PeriodicReader::<u64>::new(config(100), counter_registration(&calls), Arc::clone(&exporter)).unwrap();

            time::sleep(Duration::from_millis(offset_ms)).await;
            let outcome = reader.shutdown().completion().await;

            assert_eq!(outcome, Ok(()), "shutdown at {}ms", offset_ms);
            let batches = exporter.batches.lock().unwrap().clone();
            assert!(!batches.is_empty() && batches.len() <= 2, "shutdown at {}ms: {:?}", offset_ms, batches);
            assert_eq!(batches.last(), Some(&vec![calls.load(Ordering::SeqCst) as u64 - 1]));
            assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_slow_collection_does_not_stall_runtime() {
        let exporter = Arc::new(RecordingExporter::default());
        let first = Arc::new(AtomicBool::new(true));
        let registration = move || -> Result<Vec<u64>, ExportError> {
            if first.swap(false, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(400));
            }
            Ok(vec![1])
        };
        let reader = PeriodicReader::<u64>::new(config(20), registration, Arc::clone(&exporter)).unwrap();

        // First tick is now blocked inside collect
        time::sleep(Duration::from_millis(60)).await;
        let started = std::time::Instant::now();
        time::sleep(Duration::from_millis(10)).await;
        assert!(
            started.elapsed() < Duration::from_millis(200),
            "runtime thread stalled for {:?}",
            started.elapsed()
        );

        reader.shutdown().completion().await.unwrap();
        assert!(exporter.export_count() >= 1);
    }
}
