//! Content hashing utility for deduplication.
//!
//! This module provides SHA256-based content hashing for exact match detection.
//! Content is canonicalized before hashing so that case and whitespace
//! differences do not defeat the exact gate.

use sha2::{Digest, Sha256};

/// Content hasher for deduplication.
///
/// # Canonicalization
///
/// Before hashing, content is:
/// - Trimmed of leading/trailing whitespace
/// - Case-folded
/// - Collapsed to single spaces between words
///
/// # Example
///
/// ```rust
/// use signalgate::services::deduplication::ContentHasher;
///
/// let hash = ContentHasher::hash("BTC ETF approved");
/// assert_eq!(hash.len(), 64);
///
/// let hash2 = ContentHasher::hash("  btc   ETF approved ");
/// assert_eq!(hash, hash2);
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the SHA256 hash of canonical content.
    ///
    /// Returns the lowercase hex-encoded digest (64 characters).
    #[must_use]
    pub fn hash(content: &str) -> String {
        Self::hash_canonical(&Self::canonicalize(content))
    }

    /// Hashes text that is already canonical.
    #[must_use]
    pub fn hash_canonical(canonical: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Canonicalizes content for consistent hashing.
    ///
    /// ```rust
    /// use signalgate::services::deduplication::ContentHasher;
    ///
    /// assert_eq!(ContentHasher::canonicalize("  Hello   WORLD  "), "hello world");
    /// ```
    #[must_use]
    pub fn canonicalize(content: &str) -> String {
        content
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
