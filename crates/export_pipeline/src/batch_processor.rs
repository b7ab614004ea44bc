//! Batch Processor - Bounded Queue with a Single Export Worker
//!
//! Producer threads hand finished records to [`BatchProcessor::add`]; one
//! worker task per processor drains them in batches to an [`Exporter`].
//!
//! # Admission
//!
//! `add` takes the queue mutex for a single `push_back` and never waits on the
//! exporter. A full queue drops the record and bumps the dropped counter of
//! the [`MetricsSink`]; the producer is never told. Once the queue reaches half
//! its capacity (the watermark) `add` asks the worker for an immediate cycle.
//!
//! # Scheduling
//!
//! The worker wakes on three triggers:
//!
//! ```text
//!   schedule_delay tick ─┐
//!   watermark request ───┼──► export cycle ──► backlog >= batch size? ──► request again
//!   backlog request ─────┘
//!   force_flush / shutdown ──► drain everything queued at request time
//! ```
//!
//! Watermark and backlog requests set a single flag and a [`Notify`] permit,
//! so any number of overlapping requests collapse into one pending cycle.
//! Cycles never overlap because the worker awaits each one before selecting
//! the next trigger.
//!
//! # Export cycle
//!
//! A cycle takes up to `max_export_batch_size` records from the front of the
//! queue (releasing the lock before exporting), calls [`Exporter::export`], and
//! waits at most `export_timeout` for the returned [`AsyncResult`]. If the
//! deadline passes first the result is failed with [`ExportError::Timeout`];
//! a late completion from the exporter is then ignored. Records of a failed
//! batch are counted and logged, never re-queued.

use crate::async_result::{AsyncResult, Outcome};
use crate::config::BatchConfig;
use crate::error::{ConfigError, ExportError};
use crate::exporter::Exporter;
use crate::metrics::{MetricsSink, PipelineMetrics};
use crate::queue::BoundedQueue;
use crate::throttle::ThrottledLogger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Requests handled by the worker in arrival order.
enum Control {
    Flush(AsyncResult),
    Shutdown(AsyncResult),
}

/// State shared by producers and the worker.
struct Shared<R> {
    queue: BoundedQueue<R>,
    config: BatchConfig,
    exporter: Arc<dyn Exporter<R>>,
    metrics: Arc<dyn MetricsSink>,
    log: Arc<ThrottledLogger>,
    export_requested: AtomicBool,
    wake: Notify,
    is_shutdown: AtomicBool,
}

impl<R: Send + 'static> Shared<R> {
    /// Requests one out-of-schedule cycle; repeated requests collapse.
    fn request_export(&self) {
        if !self.export_requested.swap(true, Ordering::AcqRel) {
            self.wake.notify_one();
        }
    }

    /// Exports one batch from the front of the queue.
    ///
    /// Returns `None` when the queue is empty, otherwise the batch size and
    /// its already-resolved result.
    async fn export_cycle(&self) -> Option<(usize, AsyncResult)> {
        self.export_requested.store(false, Ordering::Release);

        let batch = self.queue.take_batch(self.config.max_export_batch_size);
        if batch.is_empty() {
            return None;
        }
        let count = batch.len();

        let result = self.exporter.export(batch);
        self.observe(&result, count);

        if time::timeout(self.config.export_timeout, result.completion())
            .await
            .is_err()
        {
            result.fail(ExportError::Timeout);
        }

        if self.queue.len() >= self.config.max_export_batch_size {
            self.request_export();
        }

        Some((count, result))
    }

    /// Records metrics and throttled diagnostics once `result` resolves.
    fn observe(&self, result: &AsyncResult, count: usize) {
        let metrics = Arc::clone(&self.metrics);
        let log = Arc::clone(&self.log);
        let exporter = self.exporter.name().to_string();
        result.when_complete(move |outcome| match outcome {
            Ok(()) => metrics.record_exported(count as u64),
            Err(e) => {
                metrics.record_failed(count as u64);
                log.warn(format_args!(
                    "exporter {} failed to export {} records: {}",
                    exporter, count, e
                ));
            }
        });
    }

    /// Exports everything queued at the time of the call, batch by batch.
    async fn drain(&self) -> AsyncResult {
        let target = self.queue.len();
        let mut drained = 0;
        let mut results = Vec::new();

        while drained < target {
            match self.export_cycle().await {
                Some((count, result)) => {
                    drained += count;
                    results.push(result);
                }
                None => break,
            }
        }

        debug!(records = drained, batches = results.len(), "drained queue");
        AsyncResult::all_of(results)
    }

    /// Final drain followed by exporter shutdown.
    ///
    /// The queue is closed first: an `add` racing with shutdown either lands
    /// before the close and is drained here, or is rejected and counted as
    /// dropped.
    async fn finish(&self) -> Outcome {
        self.queue.close();
        let flushed = self.drain().await.completion().await;
        let _ = self.exporter.shutdown().completion().await;
        flushed
    }
}

async fn run_worker<R: Send + 'static>(
    shared: Arc<Shared<R>>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
) {
    let delay = shared.config.schedule_delay;
    let mut ticker = time::interval_at(Instant::now() + delay, delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.export_cycle().await;
            }

            () = shared.wake.notified() => {
                shared.export_cycle().await;
            }

            command = control_rx.recv() => match command {
                Some(Control::Flush(result)) => {
                    let flushed = shared.drain().await;
                    flushed.when_complete(move |outcome| {
                        result.resolve(outcome.clone());
                    });
                }
                Some(Control::Shutdown(result)) => {
                    result.resolve(shared.finish().await);
                    break;
                }
                None => {
                    // Processor dropped without shutdown
                    shared.is_shutdown.store(true, Ordering::Release);
                    let _ = shared.finish().await;
                    break;
                }
            }
        }
    }

    // Requests that raced with shutdown find nothing left to flush.
    control_rx.close();
    while let Ok(command) = control_rx.try_recv() {
        match command {
            Control::Flush(result) | Control::Shutdown(result) => {
                result.succeed();
            }
        }
    }
    debug!(exporter = shared.exporter.name(), "batch worker stopped");
}

/// Builder for [`BatchProcessor`].
pub struct BatchProcessorBuilder<R> {
    exporter: Arc<dyn Exporter<R>>,
    config: BatchConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
    handle: Option<Handle>,
}

impl<R: Send + 'static> BatchProcessorBuilder<R> {
    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Sink for dropped/exported/failed counters. Defaults to a fresh
    /// [`PipelineMetrics`].
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runtime the worker is spawned on. Defaults to the current runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<BatchProcessor<R>, ConfigError> {
        self.config.validate()?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(self.config.max_queue_size),
            config: self.config,
            exporter: self.exporter,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(PipelineMetrics::new())),
            log: Arc::new(ThrottledLogger::new()),
            export_requested: AtomicBool::new(false),
            wake: Notify::new(),
            is_shutdown: AtomicBool::new(false),
        });

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        handle.spawn(run_worker(Arc::clone(&shared), control_rx));

        Ok(BatchProcessor { shared, control_tx })
    }
}

/// Producer-facing batching processor.
///
/// `add` may be called from any thread, including threads outside the tokio
/// runtime. Dropping the processor without calling [`shutdown`] still drains
/// the queue and shuts the exporter down in the background.
///
/// [`shutdown`]: BatchProcessor::shutdown
pub struct BatchProcessor<R> {
    shared: Arc<Shared<R>>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl<R: Send + 'static> BatchProcessor<R> {
    /// Creates a processor on the current tokio runtime with default metrics.
    pub fn new<E>(config: BatchConfig, exporter: E) -> Result<Self, ConfigError>
    where
        E: Exporter<R> + 'static,
    {
        Self::builder(exporter).with_config(config).build()
    }

    pub fn builder<E>(exporter: E) -> BatchProcessorBuilder<R>
    where
        E: Exporter<R> + 'static,
    {
        BatchProcessorBuilder {
            exporter: Arc::new(exporter),
            config: BatchConfig::default(),
            metrics: None,
            handle: None,
        }
    }

    /// Admits `record` or drops it if the queue is full or the processor has
    /// shut down. Never blocks on export.
    pub fn add(&self, record: R) {
        let shared = &self.shared;
        if shared.is_shutdown.load(Ordering::Acquire) {
            shared.metrics.record_dropped(1);
            return;
        }

        match shared.queue.push(record) {
            Ok(len) => {
                if len >= shared.config.watermark() {
                    shared.request_export();
                }
            }
            Err(_dropped) => shared.metrics.record_dropped(1),
        }
    }

    /// Exports everything currently queued, regardless of the timer.
    ///
    /// The result fails if any batch failed. After shutdown this returns an
    /// already-succeeded result.
    pub fn force_flush(&self) -> AsyncResult {
        if self.shared.is_shutdown.load(Ordering::Acquire) {
            return AsyncResult::succeeded();
        }
        let result = AsyncResult::pending();
        if self.control_tx.send(Control::Flush(result.clone())).is_err() {
            return AsyncResult::succeeded();
        }
        result
    }

    /// Stops scheduling, drains the queue, then shuts the exporter down.
    ///
    /// Only the first call does any work; later calls return an
    /// already-succeeded result.
    pub fn shutdown(&self) -> AsyncResult {
        if self.shared.is_shutdown.swap(true, Ordering::AcqRel) {
            return AsyncResult::succeeded();
        }
        let result = AsyncResult::pending();
        if self.control_tx.send(Control::Shutdown(result.clone())).is_err() {
            warn!("batch worker already stopped; shutting exporter down directly");
            return self.shared.exporter.shutdown();
        }
        result
    }

    /// Number of records waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every batch with the (tokio) time it was exported.
    #[derive(Default)]
    struct RecordingExporter {
        batches: Mutex<Vec<(Instant, Vec<u64>)>>,
        fail: bool,
        shutdowns: AtomicUsize,
    }

    impl RecordingExporter {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn batches(&self) -> Vec<Vec<u64>> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .map(|(_, b)| b.clone())
                .collect()
        }

        fn export_times(&self) -> Vec<Instant> {
            self.batches.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }

        fn exported(&self) -> Vec<u64> {
            self.batches().into_iter().flatten().collect()
        }
    }

    impl Exporter<u64> for RecordingExporter {
        fn export(&self, batch: Vec<u64>) -> AsyncResult {
            self.batches.lock().unwrap().push((Instant::now(), batch));
            if self.fail {
                AsyncResult::failed(ExportError::Transport("connection refused".into()))
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

    /// Never resolves the results it hands out.
    #[derive(Default)]
    struct HangingExporter {
        pending: Mutex<Vec<AsyncResult>>,
    }

    impl Exporter<u64> for HangingExporter {
        fn export(&self, _batch: Vec<u64>) -> AsyncResult {
            let result = AsyncResult::pending();
            self.pending.lock().unwrap().push(result.clone());
            result
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    /// Resolves each export after `delay`, tracking how many overlap.
    struct SlowExporter {
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        records: Arc<Mutex<Vec<u64>>>,
    }

    impl SlowExporter {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                records: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Exporter<u64> for SlowExporter {
        fn export(&self, batch: Vec<u64>) -> AsyncResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.records.lock().unwrap().extend(batch);

            let result = AsyncResult::pending();
            let resolver = result.clone();
            let in_flight = Arc::clone(&self.in_flight);
            let delay = self.delay;
            tokio::spawn(async move {
                time::sleep(delay).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                resolver.succeed();
            });
            result
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn build_processor(
        config: BatchConfig,
        exporter: &Arc<RecordingExporter>,
    ) -> (BatchProcessor<u64>, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let processor = BatchProcessor::<u64>::builder(Arc::clone(exporter))
            .with_config(config)
            .with_metrics(metrics.clone())
            .build()
            .unwrap();
        (processor, metrics)
    }

    #[tokio::test]
    async fn test_overflow_drops_newest() {
        let exporter = Arc::new(RecordingExporter::default());
        let config = BatchConfig::default()
            .with_max_queue_size(4)
            .with_max_export_batch_size(4)
            .with_schedule_delay(Duration::from_secs(60));
        let (processor, metrics) = build_processor(config, &exporter);

        // No await between adds: the worker cannot run on this
        // current-thread runtime, so it is effectively stalled.
        for i in 0..6 {
            processor.add(i);
        }
        assert_eq!(processor.queue_len(), 4);
        assert_eq!(metrics.dropped(), 2);

        processor.force_flush().completion().await.unwrap();
        assert_eq!(exporter.exported(), vec![0, 1, 2, 3]);
        assert_eq!(processor.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_drain_exports_after_schedule_delay() {
        let exporter = Arc::new(RecordingExporter::default());
        let config = BatchConfig::default().with_schedule_delay(Duration::from_millis(100));
        let (processor, metrics) = build_processor(config, &exporter);
        let start = Instant::now();

        processor.add(42);
        time::sleep(Duration::from_millis(50)).await;
        assert!(exporter.batches().is_empty(), "nothing before the first tick");

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(exporter.batches(), vec![vec![42]]);
        let exported_at = exporter.export_times()[0] - start;
        assert!(exported_at >= Duration::from_millis(100));
        assert!(exported_at < Duration::from_millis(150));
        assert_eq!(processor.queue_len(), 0);
        assert_eq!(metrics.exported(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watermark_triggers_early_export() {
        let exporter = Arc::new(RecordingExporter::default());
        let config = BatchConfig::default()
            .with_max_queue_size(10)
            .with_max_export_batch_size(10)
            .with_schedule_delay(Duration::from_secs(30));
        let (processor, _metrics) = build_processor(config, &exporter);
        let start = Instant::now();

        for i in 0..4 {
            processor.add(i);
        }
        time::sleep(Duration::from_millis(1)).await;
        assert!(exporter.batches().is_empty(), "below watermark");

        processor.add(4);
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(exporter.batches(), vec![vec![0, 1, 2, 3, 4]]);
        assert!(exporter.export_times()[0] - start < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_drains_back_to_back() {
        let exporter = Arc::new(RecordingExporter::default());
        let config = BatchConfig::default()
            .with_max_queue_size(100)
            .with_max_export_batch_size(10)
            .with_schedule_delay(Duration::from_secs(30));
        let (processor, metrics) = build_processor(config, &exporter);

        for i in 0..100 {
            processor.add(i);
        }
        time::sleep(Duration::from_millis(1)).await;

        let batches = exporter.batches();
        assert_eq!(batches.len(), 10);
        assert!(batches.iter().all(|b| b.len() == 10));
        assert_eq!(exporter.exported(), (0..100).collect::<Vec<_>>());
        assert_eq!(metrics.exported(), 100);
        assert_eq!(metrics.batches_exported(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_timeout_fails_cycle() {
        let exporter = Arc::new(HangingExporter::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let config = BatchConfig::default().with_export_timeout(Duration::from_millis(50));
        let processor = BatchProcessor::<u64>::builder(Arc::clone(&exporter))
            .with_config(config)
            .with_metrics(metrics.clone())
            .build()
            .unwrap();

        processor.add(1);
        processor.add(2);
        let outcome = processor.force_flush().completion().await;
        assert_eq!(outcome, Err(ExportError::Timeout));
        assert_eq!(metrics.failed(), 2);

        // The late completion is ignored
        let late = exporter.pending.lock().unwrap()[0].clone();
        assert!(!late.succeed());
    }

    #[tokio::test]
    async fn test_failed_batch_is_not_requeued() {
        let exporter = Arc::new(RecordingExporter::failing());
        let (processor, metrics) = build_processor(BatchConfig::default(), &exporter);

        for i in 0..3 {
            processor.add(i);
        }
        let outcome = processor.force_flush().completion().await;
        assert!(matches!(outcome, Err(ExportError::Transport(_))));
        assert_eq!(processor.queue_len(), 0);
        assert_eq!(metrics.failed(), 3);
        assert_eq!(metrics.exported(), 0);
    }

    #[tokio::test]
    async fn test_force_flush_on_empty_queue_succeeds() {
        let exporter = Arc::new(RecordingExporter::default());
        let (processor, _metrics) = build_processor(BatchConfig::default(), &exporter);

        assert!(processor.force_flush().completion().await.is_ok());
        assert!(exporter.batches().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let exporter = Arc::new(RecordingExporter::default());
        let (processor, metrics) = build_processor(BatchConfig::default(), &exporter);

        processor.add(7);
        processor.shutdown().completion().await.unwrap();
        assert_eq!(exporter.exported(), vec![7]);
        assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);

        let second = processor.shutdown();
        assert!(second.is_success(), "second shutdown resolves immediately");
        assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);

        // Calls after shutdown are no-ops
        processor.add(8);
        assert_eq!(metrics.dropped(), 1);
        assert!(processor.force_flush().is_success());
        assert_eq!(exporter.exported(), vec![7]);
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = BatchProcessor::<u64>::new(BatchConfig::default(), crate::NullExporter);
        assert!(matches!(result, Err(ConfigError::NoRuntime)));
    }

    #[test]
    fn test_build_with_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        let exporter = Arc::new(RecordingExporter::default());
        let processor = BatchProcessor::<u64>::builder(Arc::clone(&exporter))
            .with_runtime(runtime.handle().clone())
            .build()
            .unwrap();

        // Called from a plain thread, outside any runtime context
        processor.add(1);
        processor.add(2);
        assert!(processor.shutdown().join(Duration::from_secs(5)));
        assert_eq!(exporter.exported(), vec![1, 2]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let config = BatchConfig::default()
            .with_max_queue_size(8)
            .with_max_export_batch_size(16);
        let result = BatchProcessor::<u64>::builder(crate::NullExporter)
            .with_config(config)
            .with_runtime(runtime.handle().clone())
            .build();
        assert!(matches!(result, Err(ConfigError::BatchExceedsQueue { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_triggers_never_run_concurrent_exports() {
        let exporter = Arc::new(SlowExporter::new(Duration::from_millis(50)));
        let config = BatchConfig::default()
            .with_max_queue_size(20)
            .with_max_export_batch_size(4)
            .with_schedule_delay(Duration::from_millis(10));
        let processor = BatchProcessor::<u64>::new(config, Arc::clone(&exporter)).unwrap();

        // Watermark (10 of 20) starts the first slow export
        for i in 0..10 {
            processor.add(i);
        }
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(exporter.in_flight.load(Ordering::SeqCst), 1);

        // Watermark again, a flush, and timer ticks at 10..40ms all land
        // while that export is outstanding
        for i in 10..15 {
            processor.add(i);
        }
        let flushed = processor.force_flush();
        time::sleep(Duration::from_millis(45)).await;

        flushed.completion().await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        processor.shutdown().completion().await.unwrap();

        assert_eq!(exporter.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(*exporter.records.lock().unwrap(), (0..15).collect::<Vec<u64>>());
    }
}
