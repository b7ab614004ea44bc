//! Serializer - Batch to Request Body Encoding

use export_pipeline::ExportError;
use serde::Serialize;
use std::marker::PhantomData;

/// Encodes a batch of records into a request body.
///
/// Any `Fn(&[R]) -> Result<Vec<u8>, ExportError>` closure is a serializer
/// producing `application/x-protobuf` bodies.
pub trait BatchSerializer<R>: Send + Sync + 'static {
    fn serialize(&self, batch: &[R]) -> Result<Vec<u8>, ExportError>;

    /// Value for the `Content-Type` header.
    fn content_type(&self) -> &str {
        "application/x-protobuf"
    }
}

impl<R, F> BatchSerializer<R> for F
where
    F: Fn(&[R]) -> Result<Vec<u8>, ExportError> + Send + Sync + 'static,
{
    fn serialize(&self, batch: &[R]) -> Result<Vec<u8>, ExportError> {
        self(batch)
    }
}

/// Serializes the batch as a JSON array.
pub struct JsonSerializer<R> {
    _records: PhantomData<fn(&R)>,
}

impl<R> JsonSerializer<R> {
    pub fn new() -> Self {
        Self {
            _records: PhantomData,
        }
    }
}

impl<R> Default for JsonSerializer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Serialize + 'static> BatchSerializer<R> for JsonSerializer<R> {
    fn serialize(&self, batch: &[R]) -> Result<Vec<u8>, ExportError> {
        serde_json::to_vec(batch).map_err(|e| ExportError::Serialization(e.to_string()))
    }

    fn content_type(&self) -> &str {
        "application/json"
    }
}
