//! Memory context coordinator.
//!
//! Retrieves historically related entries to ground analysis. Retrieval is
//! best effort: a failed or slow backend narrows the context, and when every
//! backend fails the caller gets an empty list, which means "no history".

use crate::config::{MemoryConfig, MemoryMode, MergePolicy};
use crate::models::{MemoryEntry, MemoryHit};
use crate::services::remote::run_blocking;
use crate::storage::{MemoryBackend, MemoryBackendKind, MemoryQuery};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Merges vector and keyword hits into one ranked, de-duplicated list.
///
/// Within each list hits are ordered by descending score. Keyword hits for an
/// entry the vector backend also returned are dropped, so the vector hit
/// keeps its rank. With an asset filter, entries for other assets are
/// removed. At most `limit` entries are returned.
///
/// | Policy | Order |
/// |--------|-------|
/// | `VectorFirst` | every vector hit, then keyword hits fill the remainder |
/// | `Interleave` | vector, keyword, vector, ... until both run out |
#[must_use]
pub fn rank_hits(
    vector: Vec<MemoryHit>,
    keyword: Vec<MemoryHit>,
    merge: MergePolicy,
    asset_filter: Option<&str>,
    limit: usize,
) -> Vec<MemoryEntry> {
    let prepare = |mut hits: Vec<MemoryHit>| {
        hits.retain(|h| asset_filter.is_none_or(|asset| h.entry().concerns(asset)));
        hits.sort_by(|a, b| b.score().total_cmp(&a.score()));
        hits
    };
    let vector = prepare(vector);
    let vector_ids: HashSet<_> = vector.iter().map(|h| h.entry().id.clone()).collect();
    let keyword: Vec<MemoryHit> = prepare(keyword)
        .into_iter()
        .filter(|h| !vector_ids.contains(&h.entry().id))
        .collect();

    let merged: Vec<MemoryHit> = match merge {
        MergePolicy::VectorFirst => vector.into_iter().chain(keyword).collect(),
        MergePolicy::Interleave => {
            let mut merged = Vec::with_capacity(vector.len() + keyword.len());
            let mut vector = vector.into_iter();
            let mut keyword = keyword.into_iter();
            loop {
                let v = vector.next();
                let k = keyword.next();
                if v.is_none() && k.is_none() {
                    break;
                }
                merged.extend(v);
                merged.extend(k);
            }
            merged
        },
    };

    let mut seen = HashSet::new();
    merged
        .into_iter()
        .filter(|h| seen.insert(h.entry().id.clone()))
        .take(limit)
        .map(MemoryHit::into_entry)
        .collect()
}

/// Picks, queries and merges memory backends.
///
/// # Backend policy
///
/// | Mode | Behavior |
/// |------|----------|
/// | `Vector` | vector search; keyword search fills in when vector fails or returns fewer than `min_vector_hits` |
/// | `Keyword` | keyword search only |
/// | `Hybrid` | both concurrently, merged by [`rank_hits`] |
pub struct MemoryContextCoordinator {
    vector: Option<Arc<dyn MemoryBackend>>,
    keyword: Option<Arc<dyn MemoryBackend>>,
    config: MemoryConfig,
}

impl MemoryContextCoordinator {
    /// Creates a coordinator with no backends.
    #[must_use]
    pub const fn new(config: MemoryConfig) -> Self {
        Self {
            vector: None,
            keyword: None,
            config,
        }
    }

    /// Attaches a backend in the slot its kind selects.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        match backend.kind() {
            MemoryBackendKind::Vector => self.vector = Some(backend),
            MemoryBackendKind::Keyword => self.keyword = Some(backend),
        }
        self
    }

    /// Context size for fast analysis.
    #[must_use]
    pub const fn fast_limit(&self) -> usize {
        self.config.fast_limit
    }

    /// Context size for deep analysis.
    #[must_use]
    pub const fn deep_limit(&self) -> usize {
        self.config.deep_limit
    }

    /// Returns true if any backend is attached.
    #[must_use]
    pub const fn has_backends(&self) -> bool {
        self.vector.is_some() || self.keyword.is_some()
    }

    /// Retrieves up to `limit` related entries, most relevant first.
    #[instrument(skip_all, fields(limit = limit, mode = ?self.config.mode, asset = asset_filter))]
    pub async fn retrieve(
        &self,
        query_text: &str,
        query_embedding: Option<&[f32]>,
        asset_filter: Option<&str>,
        limit: usize,
    ) -> Vec<MemoryEntry> {
        if limit == 0 || !self.has_backends() {
            return Vec::new();
        }

        let query = MemoryQuery::new(query_text, limit)
            .with_embedding(query_embedding.map(<[f32]>::to_vec))
            .with_asset(asset_filter.map(str::to_string));

        let (vector_hits, keyword_hits) = match self.config.mode {
            MemoryMode::Vector => {
                let vector_hits = self.search(self.vector.as_ref(), &query).await;
                let floor = self.config.min_vector_hits.min(limit);
                let keyword_hits = match &vector_hits {
                    Some(hits) if hits.len() >= floor => Vec::new(),
                    _ => {
                        tracing::debug!("Vector memory below floor, falling back to keyword");
                        self.search(self.keyword.as_ref(), &query)
                            .await
                            .unwrap_or_default()
                    },
                };
                (vector_hits.unwrap_or_default(), keyword_hits)
            },
            MemoryMode::Keyword => (
                Vec::new(),
                self.search(self.keyword.as_ref(), &query)
                    .await
                    .unwrap_or_default(),
            ),
            MemoryMode::Hybrid => {
                let (vector_hits, keyword_hits) = tokio::join!(
                    self.search(self.vector.as_ref(), &query),
                    self.search(self.keyword.as_ref(), &query)
                );
                (
                    vector_hits.unwrap_or_default(),
                    keyword_hits.unwrap_or_default(),
                )
            },
        };

        let source = match (vector_hits.is_empty(), keyword_hits.is_empty()) {
            (true, true) => "empty",
            (false, true) => "vector",
            (true, false) => "keyword",
            (false, false) => "hybrid",
        };
        metrics::counter!("memory_retrieval_total", "source" => source).increment(1);

        let entries = rank_hits(
            vector_hits,
            keyword_hits,
            self.config.merge,
            asset_filter,
            limit,
        );
        tracing::debug!(source, count = entries.len(), "Memory context retrieved");
        entries
    }

    /// Queries one backend; `None` if absent or failed.
    async fn search(
        &self,
        backend: Option<&Arc<dyn MemoryBackend>>,
        query: &MemoryQuery,
    ) -> Option<Vec<MemoryHit>> {
        let backend = Arc::clone(backend?);
        let kind = backend.kind();
        let name = backend.name().to_string();
        let query = query.clone();
        let timeout = Duration::from_millis(self.config.timeout_ms);

        match run_blocking("memory_search", timeout, move || backend.search(&query)).await {
            Ok(results) => Some(
                results
                    .into_iter()
                    .map(|(entry, score)| match kind {
                        MemoryBackendKind::Vector => MemoryHit::Vector { entry, score },
                        MemoryBackendKind::Keyword => MemoryHit::Keyword { entry, score },
                    })
                    .collect(),
            ),
            Err(err) => {
                tracing::warn!(backend = %name, kind = kind.as_str(), error = %err, "Memory backend failed");
                None
            },
        }
    }
}
