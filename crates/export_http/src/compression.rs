//! Compression - Optional Gzip of Request Bodies
//!
//! Selected by `OTEL_EXPORTER_OTLP_COMPRESSION` (`gzip` or `none`). A
//! compressed body is sent with `Content-Encoding: gzip`.

use export_pipeline::{ConfigError, ExportError};
use flate2::write::GzEncoder;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

/// Payload compression applied before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    /// Value for the `Content-Encoding` header, if any.
    pub fn encoding(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gzip"),
        }
    }

    pub fn compress(self, payload: Vec<u8>) -> Result<Vec<u8>, ExportError> {
        match self {
            Self::None => Ok(payload),
            Self::Gzip => gzip(&payload).map_err(|e| ExportError::Compression(e.to_string())),
        }
    }
}

impl FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(ConfigError::InvalidEnv {
                key: "compression".to_string(),
                value: other.to_string(),
                reason: "expected `gzip` or `none`".to_string(),
            }),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding().unwrap_or("none"))
    }
}

fn gzip(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), flate2::Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}
