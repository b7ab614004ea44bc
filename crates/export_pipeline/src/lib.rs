//! Telemetry Export Pipeline
//!
//! Moves telemetry records from instrumented application threads to an
//! external backend without ever blocking the producer. Records are admitted
//! into a bounded queue by [`BatchProcessor`] and exported in size-bounded
//! batches by a single background worker; pull-model signals are read and
//! exported on a timer by [`PeriodicReader`].
//!
//! Every asynchronous operation (export, flush, shutdown) reports through an
//! [`AsyncResult`], a one-shot completion handle usable from both threads and
//! async tasks.
//!
//! # Async Exporters
//!
//! [`AsyncExporter`] uses native async fn in traits (no `#[async_trait]`
//! macro). Wrap one in [`Spawned`] to get an object-safe [`Exporter`].

pub mod async_result;
pub mod batch_processor;
pub mod config;
pub mod error;
pub mod exporter;
mod invariants;
pub mod metrics;
pub mod periodic_reader;
pub mod queue;
pub mod retry;
pub mod throttle;

// Re-export main types
pub use async_result::{AsyncResult, Outcome};
pub use batch_processor::{BatchProcessor, BatchProcessorBuilder};
pub use config::{BatchConfig, ReaderConfig};
pub use error::{ConfigError, ExportError};
pub use exporter::{AsyncExporter, Exporter, NullExporter, Spawned, StdoutExporter};
pub use metrics::{MetricsSink, MetricsSnapshot, NoopMetrics, PipelineMetrics};
pub use periodic_reader::{CollectionRegistration, PeriodicReader, PeriodicReaderBuilder};
pub use queue::BoundedQueue;
pub use retry::{RetryPolicy, RetryPredicate};
pub use throttle::{ThrottledLogger, TokenBucket};
