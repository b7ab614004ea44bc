//! Configuration for [`HttpExporter`](crate::HttpExporter).
//!
//! Seeded from defaults or from the `OTEL_EXPORTER_OTLP_*` environment
//! variables. `OTEL_EXPORTER_OTLP_HEADERS` holds `key=value` pairs separated
//! by commas; values are taken literally (no percent-decoding).
//!
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is a base URL: the signal's path
//! (`/v1/traces`, `/v1/metrics`, `/v1/logs`) is appended to it. The
//! per-signal variables (`OTEL_EXPORTER_OTLP_TRACES_ENDPOINT`, ...) are full
//! URLs, used as given, and take precedence over the base.

use crate::compression::Compression;
use export_pipeline::config::{env_millis, env_value};
use export_pipeline::{ConfigError, RetryPolicy};
use std::time::Duration;

pub const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const ENV_OTLP_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
pub const ENV_OTLP_COMPRESSION: &str = "OTEL_EXPORTER_OTLP_COMPRESSION";
pub const ENV_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";

pub const DEFAULT_BASE_ENDPOINT: &str = "http://localhost:4318";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4318/v1/traces";

/// Telemetry signal an exporter carries; selects the URL path and the
/// signal-specific endpoint variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    pub fn path(self) -> &'static str {
        match self {
            Signal::Traces => "/v1/traces",
            Signal::Metrics => "/v1/metrics",
            Signal::Logs => "/v1/logs",
        }
    }

    /// Variable holding a full URL for this signal only.
    pub fn endpoint_env(self) -> &'static str {
        match self {
            Signal::Traces => "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
            Signal::Metrics => "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT",
            Signal::Logs => "OTEL_EXPORTER_OTLP_LOGS_ENDPOINT",
        }
    }

    /// `base` with this signal's path appended.
    pub fn endpoint_for(self, base: &str) -> String {
        format!("{}{}", base.trim().trim_end_matches('/'), self.path())
    }
}

/// PEM-encoded TLS material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Additional trusted root certificate(s).
    pub ca_pem: Option<Vec<u8>>,
    /// Client certificate chain and private key for mutual TLS.
    pub identity_pem: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct HttpExporterConfig {
    /// Full URL requests are POSTed to.
    ///
    /// Default: `http://localhost:4318/v1/traces`
    pub endpoint: String,

    /// Static headers added to every request.
    pub headers: Vec<(String, String)>,

    /// Default: none
    pub compression: Compression,

    /// Per-request timeout, applied to each attempt separately.
    ///
    /// Default: 10s
    pub timeout: Duration,

    pub tls: TlsConfig,

    /// Default: 5 attempts, 1s initial backoff, 5s max, multiplier 1.5
    pub retry: RetryPolicy,
}

impl Default for HttpExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            headers: Vec::new(),
            compression: Compression::None,
            timeout: Duration::from_secs(10),
            tls: TlsConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpExporterConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Zero { field: "timeout" });
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidEnv {
                key: "endpoint".to_string(),
                value: self.endpoint.clone(),
                reason: "endpoint must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Defaults for `signal`: the local collector with the signal's path.
    pub fn for_signal(signal: Signal) -> Self {
        Self::default().with_endpoint(signal.endpoint_for(DEFAULT_BASE_ENDPOINT))
    }

    /// Trace exporter defaults overridden by `OTEL_EXPORTER_OTLP_*` variables
    /// from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::signal_from_env(Signal::Traces)
    }

    pub fn signal_from_env(signal: Signal) -> Result<Self, ConfigError> {
        Self::signal_from_env_with(signal, |key| std::env::var(key).ok())
    }

    /// Trace exporter defaults overridden by values returned by `lookup`.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::signal_from_env_with(Signal::Traces, lookup)
    }

    /// Defaults for `signal` overridden by `OTEL_EXPORTER_OTLP_*` values
    /// returned by `lookup`.
    pub fn signal_from_env_with<F>(signal: Signal, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::for_signal(signal);
        if let Some(endpoint) = non_empty(signal.endpoint_env()) {
            config.endpoint = endpoint.trim().to_string();
        } else if let Some(base) = non_empty(ENV_OTLP_ENDPOINT) {
            config.endpoint = signal.endpoint_for(&base);
        }
        if let Some(raw) = lookup(ENV_OTLP_HEADERS) {
            config.headers = parse_headers(&raw)?;
        }
        if let Some(compression) = env_value::<Compression, F>(&lookup, ENV_OTLP_COMPRESSION)? {
            config.compression = compression;
        }
        if let Some(timeout) = env_millis(&lookup, ENV_OTLP_TIMEOUT)? {
            config.timeout = timeout;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parses `k=v,k2=v2`. Empty entries are skipped.
fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidEnv {
                key: ENV_OTLP_HEADERS.to_string(),
                value: raw.to_string(),
                reason: format!("malformed header entry `{entry}`"),
            }),
        })
        .collect()
}
