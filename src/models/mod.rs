//! Data models for signalgate.
//!
//! Core data structures that flow through one pipeline pass.

mod analysis;
mod decision;
mod envelope;
mod memory;
mod signal;

pub use analysis::{
    AnalysisResult, AnalysisState, AnalysisTier, ConfidenceAudit, DEEP_ANALYSIS_FAILED,
    NO_ASSET, ProviderAnalysis, TradeAction, UNANALYZED,
};
pub use decision::{Decision, DedupStage, SkipReason};
pub use envelope::{EnvelopeId, MessageEnvelope};
pub use memory::{MemoryEntry, MemoryHit, MemoryId};
pub use signal::SignalRecord;
