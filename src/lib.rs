//! # Signalgate
//!
//! Deduplication and adaptive analysis escalation for inbound text events.
//!
//! Signalgate sits between a stream of raw messages and a stream of
//! structured trading signals. Every message passes through three duplicate
//! gates at different granularities (exact content, semantic similarity,
//! post-analysis fuzzy signal text) and a confidence-gated two-tier analysis
//! stage with per-provider retry and fallback.
//!
//! ## Pipeline
//!
//! ```text
//! raw event → Normalizer → Exact gate → Semantic gate → Fast analysis (+ memory)
//!           → Confidence gate → [Deep analysis] → Signal gate → Semantic re-check → emit
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use signalgate::{MessageEnvelope, SignalPipeline, Decision};
//!
//! let pipeline = SignalPipeline::builder(config).build()?;
//! match pipeline.process(MessageEnvelope::new("BTC ETF approved", "newswire")).await {
//!     Decision::Forward(record) => println!("{}", record.summary),
//!     Decision::Skip(reason) => println!("skipped: {reason}"),
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod embedding;
pub mod llm;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::PipelineConfig;
pub use embedding::Embedder;
pub use llm::{AnalysisProvider, AnalysisRouter};
pub use models::{
    AnalysisResult, AnalysisTier, ConfidenceAudit, Decision, MemoryEntry, MessageEnvelope,
    SignalRecord, SkipReason, TradeAction,
};
pub use services::{MemoryContextCoordinator, SignalPipeline};
pub use storage::{Forwarder, MemoryBackend, SignalSink, VectorStore};

/// Error type for signalgate operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Retried |
/// |---------|-------------|---------|
/// | `InvalidInput` | Empty message, invalid configuration value | no |
/// | `OperationFailed` | Local I/O, `SQLite`, task join failures | no |
/// | `TransientProvider` | Provider timeout, connect failure, HTTP 429/5xx | yes |
/// | `PermanentProvider` | Missing credentials, HTTP 4xx other than 429 | no |
/// | `Timeout` | A remote call exceeded its stage timeout | yes |
/// | `DedupBackendUnavailable` | Embedding or vector store failure during a dedup check | no |
/// | `MalformedAnalysis` | Provider response violates the analysis schema | no |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A local operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A provider failed in a way that may succeed on retry.
    #[error("transient failure from provider '{provider}': {cause}")]
    TransientProvider {
        /// Provider identifier.
        provider: String,
        /// The underlying cause.
        cause: String,
    },

    /// A provider rejected the request; retrying will not help.
    #[error("permanent failure from provider '{provider}': {cause}")]
    PermanentProvider {
        /// Provider identifier.
        provider: String,
        /// The underlying cause.
        cause: String,
    },

    /// A remote call did not complete within its timeout.
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// A deduplication backend (embedder or vector store) could not be reached.
    #[error("dedup backend '{backend}' unavailable: {cause}")]
    DedupBackendUnavailable {
        /// Backend identifier.
        backend: String,
        /// The underlying cause.
        cause: String,
    },

    /// A provider response did not satisfy the analysis schema.
    #[error("malformed analysis from provider '{provider}': {cause}")]
    MalformedAnalysis {
        /// Provider identifier.
        provider: String,
        /// What was wrong with the response.
        cause: String,
    },
}

impl Error {
    /// Returns true if the failure may succeed on a later attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider { .. } | Self::Timeout { .. })
    }

    /// Short label used for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::OperationFailed { .. } => "operation_failed",
            Self::TransientProvider { .. } => "transient",
            Self::PermanentProvider { .. } => "permanent",
            Self::Timeout { .. } => "timeout",
            Self::DedupBackendUnavailable { .. } => "backend_unavailable",
            Self::MalformedAnalysis { .. } => "malformed",
        }
    }
}

/// Result type alias for signalgate operations.
pub type Result<T> = std::result::Result<T, Error>;
