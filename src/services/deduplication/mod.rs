//! Duplicate gates.
//!
//! Three independent checks at different granularities:
//! 1. **Exact**: SHA256 of canonical text in a sliding-window LRU cache
//! 2. **Semantic**: embedding neighbour within a distance threshold and horizon,
//!    run before analysis and again before emission
//! 3. **Signal**: fuzzy text plus metadata match against recently emitted signals
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         SignalPipeline                           │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌─────────────────────┐ │
//! │  │ Exact        │  │ Semantic         │  │ RecentSignalWindow  │ │
//! │  │ Fingerprint  │  │ Fingerprint      │  │                     │ │
//! │  │ Cache        │  │ Service          │  │ SignalMatcher       │ │
//! │  │              │  │                  │  │ (ratio + metadata   │ │
//! │  │ SHA256, LRU  │  │ Embedder +       │  │  + char floor       │ │
//! │  │ horizon      │  │ VectorStore      │  │  + recency)         │ │
//! │  └──────────────┘  └──────────────────┘  └─────────────────────┘ │
//! │         in-process      remote, fail-open      in-process        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every gate is an owned, injectable object exposing only check-and-insert
//! style operations.

mod exact_match;
mod hasher;
mod health;
mod semantic;
mod signal_matcher;

pub use crate::embedding::cosine_similarity;
pub use exact_match::{ExactCheck, ExactFingerprintCache};
pub use hasher::ContentHasher;
pub use health::{DedupBackend, DedupHealth, DedupHealthSnapshot};
pub use semantic::{SemanticCheck, SemanticFingerprintService};
pub use signal_matcher::{
    RecentSignalWindow, SignalFingerprint, SignalMatch, SignalMatcher, normalize_signal_text,
    sequence_ratio, shared_char_count,
};
