//! Historical context entries used to ground analysis.

use super::TradeAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a memory entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a new memory ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A past event kept as context for later analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Entry identifier.
    pub id: MemoryId,
    /// Short summary of the past event.
    pub summary: String,
    /// Asset code the event concerned.
    pub asset: String,
    /// Event category.
    pub event_type: String,
    /// Action that was suggested at the time.
    pub action: TradeAction,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Optional embedding of the summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl MemoryEntry {
    /// Creates an entry with no embedding and no metadata.
    #[must_use]
    pub fn new(
        id: impl Into<MemoryId>,
        summary: impl Into<String>,
        asset: impl Into<String>,
        event_type: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            asset: asset.into(),
            event_type: event_type.into(),
            action: TradeAction::Observe,
            recorded_at,
            embedding: None,
            metadata: HashMap::new(),
        }
    }

    /// Sets the suggested action.
    #[must_use]
    pub const fn with_action(mut self, action: TradeAction) -> Self {
        self.action = action;
        self
    }

    /// Sets the embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Returns true if the entry concerns the given asset (case-insensitive).
    #[must_use]
    pub fn concerns(&self, asset: &str) -> bool {
        self.asset.eq_ignore_ascii_case(asset)
    }
}

/// A retrieved memory entry tagged with the backend kind that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryHit {
    /// Found by vector similarity; score is cosine similarity.
    Vector {
        /// The entry.
        entry: MemoryEntry,
        /// Similarity score.
        score: f32,
    },
    /// Found by keyword search; score is normalized relevance.
    Keyword {
        /// The entry.
        entry: MemoryEntry,
        /// Relevance score.
        score: f32,
    },
}

impl MemoryHit {
    /// The entry regardless of origin.
    #[must_use]
    pub const fn entry(&self) -> &MemoryEntry {
        match self {
            Self::Vector { entry, .. } | Self::Keyword { entry, .. } => entry,
        }
    }

    /// The backend score.
    #[must_use]
    pub const fn score(&self) -> f32 {
        match self {
            Self::Vector { score, .. } | Self::Keyword { score, .. } => *score,
        }
    }

    /// Consumes the hit and returns the entry.
    #[must_use]
    pub fn into_entry(self) -> MemoryEntry {
        match self {
            Self::Vector { entry, .. } | Self::Keyword { entry, .. } => entry,
        }
    }

    /// Returns true if the hit came from the vector backend.
    #[must_use]
    pub const fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }
}
