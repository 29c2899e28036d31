//! Pipeline services.
//!
//! Each stage is an owned service; [`SignalPipeline`] wires them together.

pub mod deduplication;
pub mod ingest;
pub mod memory_context;
pub mod pipeline;
pub mod remote;

pub use ingest::{IngestNormalizer, NormalizedMessage};
pub use memory_context::{MemoryContextCoordinator, rank_hits};
pub use pipeline::{RunSummary, SignalPipeline, SignalPipelineBuilder};
