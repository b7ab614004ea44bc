use export_pipeline::ConfigError;
use thiserror::Error;

/// Errors raised while constructing an HTTP exporter.
///
/// Failures during export are reported as
/// [`ExportError`](export_pipeline::ExportError) on the returned result.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The reqwest client could not be built (bad TLS material, etc.)
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
