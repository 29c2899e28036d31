//! In-process vector store.
//!
//! Brute-force cosine search over a `HashMap`. Adequate for the few thousand
//! fingerprints a dedup horizon holds; external stores plug in through
//! [`VectorStore`].
//!
//! With a retention policy, every upsert lazily drops vectors older than the
//! horizon behind the newest timestamp seen, then evicts oldest-first down to
//! the size ceiling.

use crate::embedding::cosine_similarity;
use crate::storage::traits::{VectorFilter, VectorMatch, VectorStore};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

struct StoredVector {
    embedding: Vec<f32>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Retention {
    horizon: Duration,
    capacity: usize,
}

#[derive(Default)]
struct Vectors {
    entries: HashMap<String, StoredVector>,
    newest: Option<DateTime<Utc>>,
}

/// Vector store held in memory.
pub struct InMemoryVectorStore {
    dimensions: usize,
    retention: Option<Retention>,
    vectors: RwLock<Vectors>,
}

impl InMemoryVectorStore {
    /// Creates an empty, unbounded store for vectors of `dimensions` length.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            retention: None,
            vectors: RwLock::new(Vectors::default()),
        }
    }

    /// Creates a store that forgets vectors beyond `horizon` and keeps at
    /// most `capacity` of them.
    #[must_use]
    pub fn with_retention(dimensions: usize, horizon: Duration, capacity: usize) -> Self {
        Self {
            retention: Some(Retention {
                horizon,
                capacity: capacity.max(1),
            }),
            ..Self::new(dimensions)
        }
    }

    /// Configured dimensionality.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Drops vectors stored before `cutoff`; returns how many were removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut vectors = self.vectors.write().unwrap_or_else(PoisonError::into_inner);
        let before = vectors.entries.len();
        vectors.entries.retain(|_, v| v.timestamp >= cutoff);
        before - vectors.entries.len()
    }

    fn enforce_retention(vectors: &mut Vectors, retention: Retention) {
        let expired_before = vectors
            .newest
            .and_then(|newest| newest.checked_sub_signed(retention.horizon));
        if let Some(cutoff) = expired_before {
            vectors.entries.retain(|_, v| v.timestamp >= cutoff);
        }

        let excess = vectors.entries.len().saturating_sub(retention.capacity);
        if excess > 0 {
            let mut by_age: Vec<(DateTime<Utc>, String)> = vectors
                .entries
                .iter()
                .map(|(id, v)| (v.timestamp, id.clone()))
                .collect();
            by_age.sort_unstable();
            for (_, id) in by_age.into_iter().take(excess) {
                vectors.entries.remove(&id);
            }
        }
    }

    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(Error::InvalidInput(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(())
    }
}

impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn upsert(&self, id: &str, embedding: &[f32], timestamp: DateTime<Utc>) -> Result<()> {
        self.validate_embedding(embedding)?;
        let mut vectors = self.vectors.write().unwrap_or_else(PoisonError::into_inner);
        vectors.entries.insert(
            id.to_string(),
            StoredVector {
                embedding: embedding.to_vec(),
                timestamp,
            },
        );
        vectors.newest = Some(vectors.newest.map_or(timestamp, |newest| newest.max(timestamp)));
        if let Some(retention) = self.retention {
            Self::enforce_retention(&mut vectors, retention);
        }
        Ok(())
    }

    fn query(
        &self,
        embedding: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<VectorMatch>> {
        self.validate_embedding(embedding)?;

        let vectors = self.vectors.read().unwrap_or_else(PoisonError::into_inner);
        let mut matches: Vec<VectorMatch> = vectors
            .entries
            .iter()
            .filter_map(|(id, stored)| {
                let distance = 1.0 - cosine_similarity(embedding, &stored.embedding);
                filter
                    .admits(distance, stored.timestamp)
                    .then(|| VectorMatch {
                        id: id.clone(),
                        distance,
                        timestamp: stored.timestamp,
                    })
            })
            .collect();
        drop(vectors);

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(limit);
        Ok(matches)
    }

    fn count(&self) -> Result<usize> {
        Ok(self
            .vectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn unit(angle: f32) -> Vec<f32> {
        vec![angle.cos(), angle.sin(), 0.0]
    }

    #[test]
    fn test_query_respects_distance_and_horizon() {
        let store = InMemoryVectorStore::new(3);
        let now = Utc::now();
        store.upsert("near", &unit(0.1), now - Duration::minutes(10)).unwrap();
        store.upsert("far", &unit(1.2), now).unwrap();
        store.upsert("old", &unit(0.0), now - Duration::days(2)).unwrap();

        let filter = VectorFilter::new(0.15, Duration::hours(1), now);
        let matches = store.query(&unit(0.0), &filter, 5).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "near");
        assert!(matches[0].distance < 0.01);
    }

    #[test]
    fn test_results_nearest_first_and_limited() {
        let store = InMemoryVectorStore::new(3);
        let now = Utc::now();
        store.upsert("b", &unit(0.2), now).unwrap();
        store.upsert("a", &unit(0.05), now).unwrap();
        store.upsert("c", &unit(0.3), now).unwrap();

        let filter = VectorFilter::new(0.5, Duration::hours(1), now);
        let matches = store.query(&unit(0.0), &filter, 2).unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new(3);
        assert!(store.upsert("x", &[1.0, 0.0], Utc::now()).is_err());
    }

    #[test]
    fn test_upsert_replaces_and_prune() {
        let store = InMemoryVectorStore::new(3);
        let now = Utc::now();
        store.upsert("x", &unit(0.0), now - Duration::hours(5)).unwrap();
        store.upsert("x", &unit(0.0), now).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        store.upsert("y", &unit(0.0), now - Duration::hours(5)).unwrap();
        assert_eq!(store.prune_before(now - Duration::hours(1)), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_retention_drops_vectors_beyond_horizon() {
        let store = InMemoryVectorStore::with_retention(3, Duration::hours(1), 1_000);
        let start = Utc::now();
        for day in 0..50 {
            store
                .upsert(&format!("fp-{day}"), &unit(0.0), start + Duration::days(day))
                .unwrap();
        }
        assert_eq!(store.count().unwrap(), 1);

        // A late arrival inside the horizon is kept alongside the newest.
        store
            .upsert("late", &unit(0.0), start + Duration::days(49) - Duration::minutes(30))
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_retention_capacity_evicts_oldest() {
        let store = InMemoryVectorStore::with_retention(3, Duration::days(1), 3);
        let now = Utc::now();
        for i in 0..5 {
            store
                .upsert(&format!("fp-{i}"), &unit(0.0), now + Duration::seconds(i))
                .unwrap();
        }
        assert_eq!(store.count().unwrap(), 3);

        let filter = VectorFilter::new(0.1, Duration::days(1), now);
        let mut ids: Vec<_> = store
            .query(&unit(0.0), &filter, 10)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["fp-2", "fp-3", "fp-4"]);
    }

    #[test]
    fn test_retention_survives_extreme_timestamps() {
        let store = InMemoryVectorStore::with_retention(3, Duration::MAX, 10);
        store.upsert("min", &unit(0.0), DateTime::<Utc>::MIN_UTC).unwrap();
        store.upsert("max", &unit(0.0), DateTime::<Utc>::MAX_UTC).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }
}
