//! HTTP Transport for the Telemetry Export Pipeline
//!
//! Provides [`HttpExporter`], an [`Exporter`](export_pipeline::Exporter) that
//! serializes batches, optionally gzips them, and POSTs them to a collector
//! with exponential-backoff retry. The network sits behind the
//! [`HttpSender`] trait; [`ReqwestSender`] is the production implementation.

pub mod compression;
pub mod config;
pub mod error;
pub mod exporter;
pub mod response;
pub mod sender;
pub mod serializer;

// Re-export main types
pub use compression::Compression;
pub use config::{HttpExporterConfig, Signal, TlsConfig};
pub use error::HttpError;
pub use exporter::HttpExporter;
pub use sender::{HttpRequest, HttpResponse, HttpSender, ReqwestSender};
pub use serializer::{BatchSerializer, JsonSerializer};
