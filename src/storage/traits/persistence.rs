//! Downstream traits for forwarded signals.

use crate::Result;
use crate::models::{MessageEnvelope, SignalRecord};

/// Persists forwarded signals together with their source envelope.
pub trait SignalSink: Send + Sync {
    /// Stores a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn persist(&self, record: &SignalRecord, envelope: &MessageEnvelope) -> Result<()>;
}

/// Delivers forwarded signals downstream.
///
/// The pipeline does not retry failed deliveries.
pub trait Forwarder: Send + Sync {
    /// Delivers a record.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails.
    fn forward(&self, record: &SignalRecord) -> Result<()>;
}
