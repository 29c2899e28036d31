//! JSON-lines forwarder.

use crate::models::SignalRecord;
use crate::storage::traits::Forwarder;
use crate::{Error, Result};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Writes each forwarded record as one JSON line.
pub struct JsonLinesForwarder<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesForwarder<W> {
    /// Wraps a writer.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl JsonLinesForwarder<std::io::Stdout> {
    /// Forwarder writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Forwarder for JsonLinesForwarder<W> {
    fn forward(&self, record: &SignalRecord) -> Result<()> {
        let line = serde_json::to_string(record).map_err(|e| Error::OperationFailed {
            operation: "serialize_signal".to_string(),
            cause: e.to_string(),
        })?;

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| Error::OperationFailed {
                operation: "forward_signal".to_string(),
                cause: e.to_string(),
            })
    }
}
