//! HTTP Exporter
//!
//! [`HttpExporter`] implements the pipeline's [`Exporter`] contract over HTTP:
//!
//! 1. serialize the batch with the injected [`BatchSerializer`]
//! 2. optionally gzip the payload
//! 3. POST it through the injected [`HttpSender`], retrying retryable
//!    failures per the configured [`RetryPolicy`]
//!
//! Serialization and compression happen on the calling thread, so their
//! failures come back as an already-failed result without any request being
//! made. The send-and-retry loop runs as a task on a tokio runtime.
//!
//! [`RetryPolicy`]: export_pipeline::RetryPolicy

use crate::config::HttpExporterConfig;
use crate::error::HttpError;
use crate::response::error_message;
use crate::sender::{HttpRequest, HttpSender, ReqwestSender};
use crate::serializer::BatchSerializer;
use export_pipeline::{AsyncResult, ConfigError, ExportError, Exporter, Outcome};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

struct Inner<S, H> {
    serializer: S,
    sender: H,
    config: HttpExporterConfig,
    shutdown_tx: watch::Sender<bool>,
    handle: Handle,
}

impl<S, H: HttpSender> Inner<S, H> {
    fn build_request<R>(&self, batch: &[R]) -> Result<HttpRequest, ExportError>
    where
        S: BatchSerializer<R>,
    {
        let payload = self.serializer.serialize(batch)?;
        let body = self.config.compression.compress(payload)?;

        let mut headers = self.config.headers.clone();
        headers.push((
            "Content-Type".to_string(),
            self.serializer.content_type().to_string(),
        ));
        if let Some(encoding) = self.config.compression.encoding() {
            headers.push(("Content-Encoding".to_string(), encoding.to_string()));
        }

        Ok(HttpRequest {
            url: self.config.endpoint.clone(),
            headers,
            body,
        })
    }

    async fn send_with_retry(&self, request: &HttpRequest) -> Outcome {
        self.config
            .retry
            .execute(|attempt| async move {
                let response = self.sender.send(request).await?;
                if response.is_success() {
                    return Ok(());
                }
                let message = error_message(response.status, &response.body);
                debug!(attempt, status = response.status, %message, "export request rejected");
                Err(ExportError::Server {
                    status: response.status,
                    message,
                })
            })
            .await
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// Resolves once the exporter has been shut down.
async fn cancelled(mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let down = *shutdown_rx.borrow_and_update();
        if down || shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Exports batches of `R` over HTTP with retry and optional gzip.
pub struct HttpExporter<R, S, H = ReqwestSender> {
    inner: Arc<Inner<S, H>>,
    _records: PhantomData<fn(Vec<R>)>,
}

impl<R, S> HttpExporter<R, S, ReqwestSender>
where
    S: BatchSerializer<R>,
{
    /// Creates an exporter with a [`ReqwestSender`] on the current runtime.
    pub fn new(config: HttpExporterConfig, serializer: S) -> Result<Self, HttpError> {
        let sender = ReqwestSender::new(&config)?;
        Ok(Self::with_sender(config, serializer, sender)?)
    }
}

impl<R, S, H> HttpExporter<R, S, H>
where
    S: BatchSerializer<R>,
    H: HttpSender,
{
    /// Creates an exporter sending through `sender` on the current runtime.
    pub fn with_sender(config: HttpExporterConfig, serializer: S, sender: H) -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Self::with_handle(config, serializer, sender, handle)
    }

    pub fn with_handle(
        config: HttpExporterConfig,
        serializer: S,
        sender: H,
        handle: Handle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                serializer,
                sender,
                config,
                shutdown_tx,
                handle,
            }),
            _records: PhantomData,
        })
    }

    pub fn config(&self) -> &HttpExporterConfig {
        &self.inner.config
    }

    pub fn sender(&self) -> &H {
        &self.inner.sender
    }
}

impl<R, S, H> Exporter<R> for HttpExporter<R, S, H>
where
    S: BatchSerializer<R>,
    H: HttpSender,
{
    fn export(&self, batch: Vec<R>) -> AsyncResult {
        if self.inner.is_shutdown() {
            return AsyncResult::failed(ExportError::Shutdown);
        }

        let request = match self.inner.build_request(&batch) {
            Ok(request) => request,
            Err(e) => {
                warn!(records = batch.len(), error = %e, "failed to encode batch");
                return AsyncResult::failed(e);
            }
        };
        drop(batch);

        let result = AsyncResult::pending();
        let resolver = result.clone();
        let inner = Arc::clone(&self.inner);
        let shutdown_rx = inner.shutdown_tx.subscribe();

        self.inner.handle.spawn(async move {
            let outcome = tokio::select! {
                outcome = inner.send_with_retry(&request) => outcome,
                () = cancelled(shutdown_rx) => Err(ExportError::Shutdown),
            };
            resolver.resolve(outcome);
        });

        result
    }

    fn shutdown(&self) -> AsyncResult {
        if self.inner.shutdown_tx.send_replace(true) {
            return AsyncResult::succeeded();
        }
        debug!(endpoint = %self.inner.config.endpoint, "http exporter shutting down");

        let result = AsyncResult::pending();
        let resolver = result.clone();
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            inner.sender.shutdown().await;
            resolver.succeed();
        });
        result
    }

    fn name(&self) -> &str {
        "http"
    }
}
