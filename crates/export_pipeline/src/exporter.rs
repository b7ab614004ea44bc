use crate::async_result::AsyncResult;
use crate::error::{ConfigError, ExportError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Destination for batches of records.
///
/// `export` must not block: it starts the delivery and returns an
/// [`AsyncResult`] the caller observes. The pipeline never calls `export`
/// concurrently from the same processor, but an exporter shared between
/// pipelines must tolerate it.
///
/// This trait is object safe; processors hold it as `Arc<dyn Exporter<R>>`.
/// For exporters written as plain `async fn`, implement [`AsyncExporter`] and
/// wrap it in [`Spawned`].
pub trait Exporter<R>: Send + Sync {
    /// Starts exporting `batch`.
    fn export(&self, batch: Vec<R>) -> AsyncResult;

    /// Releases transport resources. Always eventually succeeds.
    fn shutdown(&self) -> AsyncResult {
        AsyncResult::succeeded()
    }

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

impl<R, E> Exporter<R> for Arc<E>
where
    E: Exporter<R> + ?Sized,
{
    fn export(&self, batch: Vec<R>) -> AsyncResult {
        (**self).export(batch)
    }

    fn shutdown(&self) -> AsyncResult {
        (**self).shutdown()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Exporter written with native async fn in traits.
///
/// Not object safe (`impl Future` return types); adapt with [`Spawned`].
pub trait AsyncExporter<R>: Send + Sync + 'static {
    /// Exports a batch of records.
    fn export(&self, batch: Vec<R>) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Releases resources held by the exporter.
    fn shutdown(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Runs an [`AsyncExporter`] on a tokio runtime, resolving an
/// [`AsyncResult`] per call.
pub struct Spawned<E> {
    inner: Arc<E>,
    handle: Handle,
}

impl<E> Spawned<E> {
    /// Wraps `inner`, spawning onto the current tokio runtime.
    pub fn new(inner: E) -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Ok(Self::with_handle(inner, handle))
    }

    /// Wraps `inner`, spawning onto `handle`.
    pub fn with_handle(inner: E, handle: Handle) -> Self {
        Self {
            inner: Arc::new(inner),
            handle,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<R, E> Exporter<R> for Spawned<E>
where
    R: Send + 'static,
    E: AsyncExporter<R>,
{
    fn export(&self, batch: Vec<R>) -> AsyncResult {
        let result = AsyncResult::pending();
        let resolver = result.clone();
        let inner = Arc::clone(&self.inner);
        self.handle.spawn(async move {
            resolver.resolve(inner.export(batch).await);
        });
        result
    }

    fn shutdown(&self) -> AsyncResult {
        let result = AsyncResult::pending();
        let resolver = result.clone();
        let inner = Arc::clone(&self.inner);
        self.handle.spawn(async move {
            AsyncExporter::<R>::shutdown(inner.as_ref()).await;
            resolver.succeed();
        });
        result
    }

    fn name(&self) -> &str {
        AsyncExporter::<R>::name(self.inner.as_ref())
    }
}

/// Stdout exporter for testing and debugging
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    /// Creates a new stdout exporter
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl<R: fmt::Debug> Exporter<R> for StdoutExporter {
    fn export(&self, batch: Vec<R>) -> AsyncResult {
        if self.verbose {
            println!("=== Exporting {} records ===", batch.len());
            for record in &batch {
                println!("{:?}", record);
            }
            println!("=== Export complete ===\n");
        }
        AsyncResult::succeeded()
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Null exporter that discards all records (for benchmarking)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl<R> Exporter<R> for NullExporter {
    fn export(&self, _batch: Vec<R>) -> AsyncResult {
        AsyncResult::succeeded()
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CollectingExporter {
        records: Mutex<Vec<u64>>,
        fail: bool,
    }

    impl AsyncExporter<u64> for CollectingExporter {
        async fn export(&self, batch: Vec<u64>) -> Result<(), ExportError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.fail {
                return Err(ExportError::Transport("simulated failure".into()));
            }
            self.records.lock().unwrap().extend(batch);
            Ok(())
        }

        fn name(&self) -> &str {
            "collecting"
        }
    }

    #[tokio::test]
    async fn test_spawned_resolves_result() {
        let exporter = Spawned::new(CollectingExporter {
            records: Mutex::new(Vec::new()),
            fail: false,
        })
        .unwrap();

        let result = Exporter::export(&exporter, vec![1u64, 2, 3]);
        assert!(!result.is_done());
        assert_eq!(result.completion().await, Ok(()));
        assert_eq!(*exporter.inner().records.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(Exporter::<u64>::name(&exporter), "collecting");

        assert!(Exporter::<u64>::shutdown(&exporter).completion().await.is_ok());
    }

    #[tokio::test]
    async fn test_spawned_propagates_failure() {
        let exporter = Spawned::new(CollectingExporter {
            records: Mutex::new(Vec::new()),
            fail: true,
        })
        .unwrap();

        let outcome = Exporter::export(&exporter, vec![1u64]).completion().await;
        assert!(matches!(outcome, Err(ExportError::Transport(_))));
    }

    #[test]
    fn test_spawned_requires_runtime() {
        let exporter = Spawned::new(NullExporter);
        assert!(matches!(exporter, Err(ConfigError::NoRuntime)));
    }

    #[test]
    fn test_stdout_and_null_exporters() {
        let stdout = StdoutExporter::new(false);
        assert!(stdout.export(vec!["a", "b"]).is_success());

        let null = NullExporter::new();
        assert!(Exporter::<u8>::export(&null, vec![0; 1000]).is_success());
    }
}
