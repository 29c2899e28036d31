//! Memory backend trait.

use crate::Result;
use crate::models::MemoryEntry;

/// How a memory backend finds entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryBackendKind {
    /// Embedding similarity; requires a query embedding.
    Vector,
    /// Term matching over summaries.
    Keyword,
}

impl MemoryBackendKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Keyword => "keyword",
        }
    }
}

/// A memory search request.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Query text.
    pub text: String,
    /// Query embedding, when one was computed.
    pub embedding: Option<Vec<f32>>,
    /// Restrict results to one asset code.
    pub asset: Option<String>,
    /// Maximum number of results.
    pub limit: usize,
}

impl MemoryQuery {
    /// Creates a query.
    #[must_use]
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            embedding: None,
            asset: None,
            limit,
        }
    }

    /// Sets the query embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Sets the asset filter.
    #[must_use]
    pub fn with_asset(mut self, asset: Option<String>) -> Self {
        self.asset = asset;
        self
    }
}

/// Source of historical context for analysis.
///
/// Results carry a backend score (higher = more relevant) and are ordered
/// best first.
pub trait MemoryBackend: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    /// How this backend searches.
    fn kind(&self) -> MemoryBackendKind;

    /// Searches for entries related to the query.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or the query is unusable
    /// for this backend (for example a vector search without an embedding).
    fn search(&self, query: &MemoryQuery) -> Result<Vec<(MemoryEntry, f32)>>;
}
