//! # Telemetry Export Pipeline Demo
//!
//! Runs producer threads feeding a [`BatchProcessor`] that exports over HTTP,
//! plus a [`PeriodicReader`] that samples the pipeline's own counters.
//!
//! ## Features Demonstrated
//!
//! - `HttpExporter` configured from `OTEL_EXPORTER_OTLP_*` (gzip, headers,
//!   retry with jittered backoff)
//! - `BatchConfig` from `OTEL_BSP_*`, producers on plain OS threads
//! - `PeriodicReader` exporting counter snapshots to stdout
//! - Graceful shutdown: final drain of both pipelines
//!
//! ## Running
//!
//! ```bash
//! # Against a collector on localhost:4318
//! RUST_LOG=debug cargo run -p export_http --bin demo -- --quick
//!
//! # Without a collector: batches go to stdout
//! cargo run -p export_http --bin demo -- --stdout
//! ```

use anyhow::Context;
use export_http::{HttpExporter, HttpExporterConfig, JsonSerializer};
use export_pipeline::{
    BatchConfig, BatchProcessor, ExportError, Exporter, MetricsSnapshot, PeriodicReader, PipelineMetrics,
    ReaderConfig, StdoutExporter,
};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Serialize)]
struct LogRecord {
    producer: usize,
    sequence: u64,
    severity: &'static str,
    body: String,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).compact())
        .init();
}

fn record_exporter(to_stdout: bool) -> anyhow::Result<Arc<dyn Exporter<LogRecord>>> {
    if to_stdout {
        return Ok(Arc::new(StdoutExporter::new(false)));
    }
    let config = HttpExporterConfig::from_env().context("invalid OTEL_EXPORTER_OTLP_* settings")?;
    info!(endpoint = %config.endpoint, compression = %config.compression, "exporting over HTTP");
    Ok(Arc::new(HttpExporter::new(config, JsonSerializer::new())?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.iter().any(|a| a == "--quick");
    let to_stdout = args.iter().any(|a| a == "--stdout");

    let (num_producers, records_per_producer) = if quick { (2, 500) } else { (4, 5_000) };

    let metrics = Arc::new(PipelineMetrics::new());
    let processor = Arc::new(
        BatchProcessor::builder(record_exporter(to_stdout)?)
            .with_config(BatchConfig::from_env().context("invalid OTEL_BSP_* settings")?)
            .with_metrics(metrics.clone())
            .build()?,
    );

    let sampled = Arc::clone(&metrics);
    let reader = PeriodicReader::new(
        ReaderConfig::default().with_export_interval(Duration::from_millis(500)),
        move || -> Result<Vec<MetricsSnapshot>, ExportError> { Ok(vec![sampled.snapshot()]) },
        StdoutExporter::new(true),
    )?;

    info!(num_producers, records_per_producer, "starting producers");
    let start = Instant::now();

    let handles: Vec<_> = (0..num_producers)
        .map(|producer| {
            let processor = Arc::clone(&processor);
            thread::spawn(move || {
                for sequence in 0..records_per_producer {
                    processor.add(LogRecord {
                        producer,
                        sequence,
                        severity: if sequence % 10 == 0 { "WARN" } else { "INFO" },
                        body: format!("request {sequence} handled by worker {producer}"),
                    });
                    if sequence % 100 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            anyhow::bail!("producer thread panicked");
        }
    }

    let flushed = processor.shutdown().completion().await;
    let _ = reader.shutdown().completion().await;

    let MetricsSnapshot {
        dropped,
        exported,
        failed,
        batches_exported,
        batches_failed,
    } = metrics.snapshot();

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        exported, dropped, failed, batches_exported, batches_failed, "pipeline shut down"
    );
    if let Err(e) = flushed {
        tracing::warn!(error = %e, "final flush reported a failure");
    }
    Ok(())
}
