//! Health signals for fail-open dedup backends.

use crate::Error;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Remote dependency of the semantic gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupBackend {
    /// Embedding provider.
    Embedder,
    /// Vector similarity store.
    VectorStore,
}

impl DedupBackend {
    /// Returns the backend as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Embedder => "embedder",
            Self::VectorStore => "vector_store",
        }
    }
}

impl fmt::Display for DedupBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of [`DedupHealth`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DedupHealthSnapshot {
    /// Checks that failed open because embedding failed.
    pub embedder_failures: u64,
    /// Checks that failed open because the vector store failed.
    pub vector_store_failures: u64,
    /// Most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl DedupHealthSnapshot {
    /// Total fail-open events.
    #[must_use]
    pub const fn total_failures(&self) -> u64 {
        self.embedder_failures + self.vector_store_failures
    }

    /// Returns true if any check has failed open.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.total_failures() > 0
    }
}

/// Counts checks that let a message through because a backend failed.
///
/// A fail-open check is never silent: each one bumps a counter here, the
/// `dedup_backend_unavailable_total` metric and a `warn!` event.
#[derive(Debug, Default)]
pub struct DedupHealth {
    embedder_failures: AtomicU64,
    vector_store_failures: AtomicU64,
    last_failure: Mutex<Option<(DateTime<Utc>, String)>>,
}

impl DedupHealth {
    /// Creates an empty health record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one fail-open event.
    pub fn record_unavailable(&self, backend: DedupBackend, error: &Error) {
        let counter = match backend {
            DedupBackend::Embedder => &self.embedder_failures,
            DedupBackend::VectorStore => &self.vector_store_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((Utc::now(), error.to_string()));

        metrics::counter!("dedup_backend_unavailable_total", "backend" => backend.as_str())
            .increment(1);
        tracing::warn!(
            backend = backend.as_str(),
            error = %error,
            "Dedup backend unavailable, treating message as unique"
        );
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> DedupHealthSnapshot {
        let last = self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        DedupHealthSnapshot {
            embedder_failures: self.embedder_failures.load(Ordering::Relaxed),
            vector_store_failures: self.vector_store_failures.load(Ordering::Relaxed),
            last_failure_at: last.as_ref().map(|(at, _)| *at),
            last_error: last.map(|(_, msg)| msg),
        }
    }
}
