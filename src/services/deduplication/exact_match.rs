//! Exact fingerprint cache.
//!
//! Sliding-window duplicate detection over SHA256 hashes of canonical text.

use super::hasher::ContentHasher;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::instrument;

/// Outcome of an exact check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExactCheck {
    /// Seen within the horizon; carries the first-seen time.
    Duplicate {
        /// When the fingerprint was inserted.
        first_seen: DateTime<Utc>,
    },
    /// Not seen within the horizon; now recorded.
    Unique,
}

impl ExactCheck {
    /// Returns true for `Duplicate`.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Bounded, time-ordered cache of canonical text hashes.
///
/// # How it works
///
/// 1. Maps the SHA256 of canonical text to its insertion time
/// 2. On every check, entries older than the horizon are popped from the
///    oldest end of the cache
/// 3. A hit only counts when the stored time is within the horizon of the
///    incoming message; stale hits are overwritten
/// 4. The capacity is a hard ceiling; bursts evict oldest-first
///
/// Reads use `peek` so lookups never reorder entries. A duplicate does not
/// refresh the stored time, so a message repeated every few minutes still
/// passes once per horizon.
///
/// # Thread Safety
///
/// Check and insert happen under one `Mutex` acquisition, so concurrent
/// callers racing on the same text observe exactly one `Unique`. A poisoned
/// lock is recovered rather than propagated since the cache holds no
/// invariants a panicking holder could break halfway.
pub struct ExactFingerprintCache {
    cache: Mutex<LruCache<String, DateTime<Utc>>>,
    horizon: Duration,
}

impl ExactFingerprintCache {
    /// Creates a cache with the given size ceiling and horizon.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize, horizon: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            horizon,
        }
    }

    /// The configured horizon.
    #[must_use]
    pub const fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Atomically checks canonical text and records it when unique.
    #[instrument(skip(self, canonical), fields(operation = "exact_check", len = canonical.len()))]
    pub fn check_and_insert(&self, canonical: &str, at: DateTime<Utc>) -> ExactCheck {
        self.check_and_insert_hash(ContentHasher::hash_canonical(canonical), at)
    }

    /// Same as [`check_and_insert`](Self::check_and_insert) for a precomputed hash.
    pub fn check_and_insert_hash(&self, hash: String, at: DateTime<Utc>) -> ExactCheck {
        let mut cache = self.lock();
        self.purge_expired(&mut cache, at);

        let result = match cache.peek(&hash) {
            Some(first_seen) if (at - *first_seen).abs() <= self.horizon => ExactCheck::Duplicate {
                first_seen: *first_seen,
            },
            _ => {
                cache.put(hash, at);
                ExactCheck::Unique
            },
        };
        drop(cache);

        let label = if result.is_duplicate() {
            "duplicate"
        } else {
            "unique"
        };
        metrics::counter!("dedup_checks_total", "stage" => "exact", "result" => label).increment(1);
        tracing::debug!(result = label, "Exact fingerprint check");
        result
    }

    /// Number of entries currently held, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, cache: &mut LruCache<String, DateTime<Utc>>, at: DateTime<Utc>) {
        // Nothing can be older than a cutoff before the earliest representable time.
        let Some(cutoff) = at.checked_sub_signed(self.horizon) else {
            return;
        };
        while let Some((_, inserted)) = cache.peek_lru() {
            if *inserted >= cutoff {
                break;
            }
            cache.pop_lru();
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, DateTime<Utc>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_duplicate_within_horizon() {
        let cache = ExactFingerprintCache::new(100, Duration::hours(3));
        assert_eq!(
            cache.check_and_insert("btc etf approved", t0()),
            ExactCheck::Unique
        );
        assert_eq!(
            cache.check_and_insert("btc etf approved", t0() + Duration::seconds(10)),
            ExactCheck::Duplicate { first_seen: t0() }
        );
    }

    #[test]
    fn test_unique_outside_horizon() {
        let cache = ExactFingerprintCache::new(100, Duration::hours(3));
        assert!(!cache.check_and_insert("btc etf approved", t0()).is_duplicate());
        let later = t0() + Duration::hours(3) + Duration::seconds(1);
        assert!(!cache.check_and_insert("btc etf approved", later).is_duplicate());
        // The replaced entry now anchors the window.
        assert!(
            cache
                .check_and_insert("btc etf approved", later + Duration::minutes(1))
                .is_duplicate()
        );
    }

    #[test]
    fn test_horizon_boundary_is_inclusive() {
        let cache = ExactFingerprintCache::new(100, Duration::seconds(60));
        cache.check_and_insert("x", t0());
        assert!(
            cache
                .check_and_insert("x", t0() + Duration::seconds(60))
                .is_duplicate()
        );
    }

    #[test]
    fn test_duplicate_does_not_refresh_first_seen() {
        let cache = ExactFingerprintCache::new(100, Duration::seconds(60));
        cache.check_and_insert("x", t0());
        assert!(
            cache
                .check_and_insert("x", t0() + Duration::seconds(50))
                .is_duplicate()
        );
        assert!(
            !cache
                .check_and_insert("x", t0() + Duration::seconds(100))
                .is_duplicate()
        );
    }

    #[test]
    fn test_expired_entries_purged_lazily() {
        let cache = ExactFingerprintCache::new(100, Duration::seconds(60));
        cache.check_and_insert("a", t0());
        cache.check_and_insert("b", t0() + Duration::seconds(1));
        assert_eq!(cache.len(), 2);
        cache.check_and_insert("c", t0() + Duration::seconds(120));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ExactFingerprintCache::new(2, Duration::hours(1));
        cache.check_and_insert("a", t0());
        cache.check_and_insert("b", t0());
        cache.check_and_insert("c", t0());
        assert_eq!(cache.len(), 2);
        // "a" was evicted, so it reads as unique again.
        assert!(!cache.check_and_insert("a", t0()).is_duplicate());
    }

    #[test]
    fn test_concurrent_same_key_one_unique() {
        let cache = Arc::new(ExactFingerprintCache::new(100, Duration::hours(1)));
        let at = t0();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.check_and_insert("same text", at))
            })
            .collect();

        let uniques = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| !r.is_duplicate())
            .count();
        assert_eq!(uniques, 1);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let cache = ExactFingerprintCache::new(100, Duration::hours(3));
        assert!(!cache.check_and_insert("btc etf approved", DateTime::<Utc>::MIN_UTC).is_duplicate());
        assert!(cache.check_and_insert("btc etf approved", DateTime::<Utc>::MIN_UTC).is_duplicate());

        let wide = ExactFingerprintCache::new(100, Duration::MAX);
        wide.check_and_insert("x", DateTime::<Utc>::MIN_UTC);
        assert!(wide.check_and_insert("x", DateTime::<Utc>::MAX_UTC).is_duplicate());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_duplicate_iff_within_horizon(gap in 0i64..20_000, horizon in 1i64..15_000) {
                let cache = ExactFingerprintCache::new(10, Duration::seconds(horizon));
                cache.check_and_insert("same", t0());
                let second = cache.check_and_insert("same", t0() + Duration::seconds(gap));
                prop_assert_eq!(second.is_duplicate(), gap <= horizon);
            }
        }
    }
}
