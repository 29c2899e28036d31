//! In-process memory store.

use crate::embedding::cosine_similarity;
use crate::models::MemoryEntry;
use crate::storage::traits::{MemoryBackend, MemoryBackendKind, MemoryQuery};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// Memory entries held in a `Vec`, searched by vector similarity or keywords.
pub struct InMemoryMemoryStore {
    name: String,
    kind: MemoryBackendKind,
    entries: RwLock<Vec<MemoryEntry>>,
}

impl InMemoryMemoryStore {
    /// Creates a store that searches entry embeddings.
    #[must_use]
    pub fn vector() -> Self {
        Self::with_kind("memory-vector", MemoryBackendKind::Vector)
    }

    /// Creates a store that searches entry summaries by term overlap.
    #[must_use]
    pub fn keyword() -> Self {
        Self::with_kind("memory-keyword", MemoryBackendKind::Keyword)
    }

    fn with_kind(name: &str, kind: MemoryBackendKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Adds an entry.
    pub fn insert(&self, entry: MemoryEntry) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn terms(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 1)
            .map(str::to_lowercase)
            .collect()
    }

    fn keyword_score(query_terms: &HashSet<String>, entry: &MemoryEntry) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let mut entry_terms = Self::terms(&entry.summary);
        entry_terms.insert(entry.asset.to_lowercase());
        entry_terms.insert(entry.event_type.to_lowercase());
        let hits = query_terms.intersection(&entry_terms).count();
        hits as f32 / query_terms.len() as f32
    }
}

impl MemoryBackend for InMemoryMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MemoryBackendKind {
        self.kind
    }

    fn search(&self, query: &MemoryQuery) -> Result<Vec<(MemoryEntry, f32)>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let candidates = entries
            .iter()
            .filter(|e| query.asset.as_deref().is_none_or(|a| e.concerns(a)));

        let mut scored: Vec<(MemoryEntry, f32)> = match self.kind {
            MemoryBackendKind::Vector => {
                let embedding = query.embedding.as_deref().ok_or_else(|| {
                    Error::InvalidInput("vector memory search needs an embedding".to_string())
                })?;
                candidates
                    .filter_map(|e| {
                        let stored = e.embedding.as_deref()?;
                        Some((e.clone(), cosine_similarity(embedding, stored)))
                    })
                    .filter(|(_, score)| *score > 0.0)
                    .collect()
            },
            MemoryBackendKind::Keyword => {
                let query_terms = Self::terms(&query.text);
                candidates
                    .map(|e| (e.clone(), Self::keyword_score(&query_terms, e)))
                    .filter(|(_, score)| *score > 0.0)
                    .collect()
            },
        };
        drop(entries);

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.0.recorded_at.cmp(&a.0.recorded_at))
        });
        scored.truncate(query.limit);
        Ok(scored)
    }
}
