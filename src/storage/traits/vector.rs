//! Vector store trait.

use crate::Result;
use chrono::{DateTime, Duration, Utc};

/// Admission rule for vector query results.
///
/// A stored fingerprint is a match only when both hold:
///
/// | Check | Rule |
/// |-------|------|
/// | distance | `1 - cosine <= max_distance` |
/// | recency | `abs(timestamp - reference) <= horizon` |
///
/// The recency check keeps a recurring event type on a later day from being
/// read as a repeat of an old one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorFilter {
    /// Largest cosine distance that still counts as a match.
    pub max_distance: f32,
    /// Trailing window around the reference time.
    pub horizon: Duration,
    /// Arrival time of the message being checked.
    pub reference: DateTime<Utc>,
}

impl VectorFilter {
    /// Creates a filter.
    #[must_use]
    pub const fn new(max_distance: f32, horizon: Duration, reference: DateTime<Utc>) -> Self {
        Self {
            max_distance,
            horizon,
            reference,
        }
    }

    /// Returns true if a candidate at `distance` stored at `timestamp` passes.
    #[must_use]
    pub fn admits(&self, distance: f32, timestamp: DateTime<Utc>) -> bool {
        distance <= self.max_distance && (timestamp - self.reference).abs() <= self.horizon
    }
}

/// One admitted neighbour.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// Identifier the vector was stored under.
    pub id: String,
    /// Cosine distance to the query.
    pub distance: f32,
    /// When the vector was stored.
    pub timestamp: DateTime<Utc>,
}

/// Similarity store used by the semantic gate.
///
/// Methods take `&self` so a store can be shared as `Arc<dyn VectorStore>`;
/// implementations use interior mutability.
pub trait VectorStore: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Inserts or replaces a vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn upsert(&self, id: &str, embedding: &[f32], timestamp: DateTime<Utc>) -> Result<()>;

    /// Returns stored vectors admitted by `filter`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn query(
        &self,
        embedding: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<VectorMatch>>;

    /// Number of stored vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn count(&self) -> Result<usize>;
}
