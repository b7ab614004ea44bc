//! HTTP Sender - Request Transport Seam
//!
//! [`HttpSender`] is the only place the exporter touches the network. The
//! production implementation is [`ReqwestSender`]; tests inject scripted
//! senders through the same trait.

use crate::config::HttpExporterConfig;
use crate::error::HttpError;
use export_pipeline::ExportError;
use std::future::Future;

const USER_AGENT: &str = concat!("export_http/", env!("CARGO_PKG_VERSION"));

/// A fully prepared POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request and returns the response.
///
/// Connection-level failures are [`ExportError::Transport`]; any HTTP status,
/// success or not, is an `Ok` response.
pub trait HttpSender: Send + Sync + 'static {
    fn send(&self, request: &HttpRequest) -> impl Future<Output = Result<HttpResponse, ExportError>> + Send;

    /// Releases pooled connections.
    fn shutdown(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// [`HttpSender`] backed by a pooled `reqwest` client with rustls.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    /// Builds a client with the configured request timeout and TLS material.
    pub fn new(config: &HttpExporterConfig) -> Result<Self, HttpError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT);

        if let Some(ca_pem) = &config.tls.ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(ca_pem)?);
        }
        if let Some(identity_pem) = &config.tls.identity_pem {
            builder = builder.identity(reqwest::Identity::from_pem(identity_pem)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl HttpSender for ReqwestSender {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ExportError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}
