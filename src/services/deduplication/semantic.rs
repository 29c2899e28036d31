//! Semantic fingerprint service.
//!
//! Embeds message text and asks the vector store for a recent neighbour.
//! Both calls are remote and fallible; every failure fails open.

use super::health::{DedupBackend, DedupHealth};
use crate::config::SemanticConfig;
use crate::embedding::Embedder;
use crate::models::DedupStage;
use crate::services::remote::{RetryPolicy, run_blocking, with_retry};
use crate::storage::{VectorFilter, VectorMatch, VectorStore};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Outcome of a semantic check.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticCheck {
    /// A stored fingerprint is close enough and recent enough.
    Duplicate(VectorMatch),
    /// No neighbour; carries the embedding for reuse downstream.
    Unique {
        /// Embedding of the checked text.
        embedding: Vec<f32>,
    },
    /// A backend failed; the message is treated as unique.
    Unavailable(DedupBackend),
    /// Semantic checks are switched off.
    Disabled,
}

impl SemanticCheck {
    /// Returns true for `Duplicate`.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    /// The embedding computed during a `Unique` check.
    #[must_use]
    pub fn into_embedding(self) -> Option<Vec<f32>> {
        match self {
            Self::Unique { embedding } => Some(embedding),
            _ => None,
        }
    }

    /// Result label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Duplicate(_) => "duplicate",
            Self::Unique { .. } => "unique",
            Self::Unavailable(_) => "unavailable",
            Self::Disabled => "disabled",
        }
    }
}

const fn stage_label(stage: DedupStage) -> &'static str {
    match stage {
        DedupStage::PreAnalysis => "semantic_pre_analysis",
        DedupStage::PrePersistence => "semantic_pre_persistence",
    }
}

/// Embedding + vector-store duplicate check.
///
/// # Two passes
///
/// | Pass | Method | Writes |
/// |------|--------|--------|
/// | before analysis | [`check`](Self::check) | nothing |
/// | before emission | [`check_and_record`](Self::check_and_record) | the new fingerprint |
///
/// The second pass holds an internal lock across query and upsert, so two
/// workers that both passed the first check cannot both record.
pub struct SemanticFingerprintService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    config: SemanticConfig,
    health: Arc<DedupHealth>,
    record_lock: Mutex<()>,
}

impl SemanticFingerprintService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: SemanticConfig,
        health: Arc<DedupHealth>,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            health,
            record_lock: Mutex::const_new(()),
        }
    }

    /// Returns true unless disabled in configuration.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Shared health record.
    #[must_use]
    pub const fn health(&self) -> &Arc<DedupHealth> {
        &self.health
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            base_backoff_ms: self.config.backoff_ms,
            max_backoff_ms: self.config.backoff_ms.saturating_mul(8),
            timeout_ms: self.config.timeout_ms,
        }
    }

    /// Embeds text with timeout and retry.
    ///
    /// # Errors
    ///
    /// Returns the last embedder error or [`crate::Error::Timeout`].
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let policy = self.retry_policy();
        let text: Arc<str> = Arc::from(text);
        with_retry(policy, "embed", |_| {
            let embedder = Arc::clone(&self.embedder);
            let text = Arc::clone(&text);
            run_blocking("embed", policy.timeout(), move || embedder.embed(&text))
        })
        .await
    }

    /// Nearest stored fingerprint within the distance threshold and the
    /// horizon around `at`.
    ///
    /// # Errors
    ///
    /// Returns the last store error or [`crate::Error::Timeout`].
    pub async fn find_similar(
        &self,
        embedding: &[f32],
        at: DateTime<Utc>,
    ) -> Result<Option<VectorMatch>> {
        let policy = self.retry_policy();
        let filter = VectorFilter::new(self.config.max_distance, self.config.horizon(), at);
        let limit = self.config.search_limit.max(1);
        let embedding: Arc<[f32]> = Arc::from(embedding);
        let matches = with_retry(policy, "vector_query", |_| {
            let store = Arc::clone(&self.store);
            let embedding = Arc::clone(&embedding);
            run_blocking("vector_query", policy.timeout(), move || {
                store.query(&embedding, &filter, limit)
            })
        })
        .await?;
        Ok(matches.into_iter().next())
    }

    async fn upsert(&self, id: &str, embedding: &[f32], at: DateTime<Utc>) -> Result<()> {
        let policy = self.retry_policy();
        let id: Arc<str> = Arc::from(id);
        let embedding: Arc<[f32]> = Arc::from(embedding);
        with_retry(policy, "vector_upsert", |_| {
            let store = Arc::clone(&self.store);
            let id = Arc::clone(&id);
            let embedding = Arc::clone(&embedding);
            run_blocking("vector_upsert", policy.timeout(), move || {
                store.upsert(&id, &embedding, at)
            })
        })
        .await
    }

    /// Embeds (unless an embedding is supplied) and queries.
    ///
    /// Failures are recorded in health and reported as the failing backend.
    async fn lookup(
        &self,
        text: &str,
        embedding: Option<Vec<f32>>,
        at: DateTime<Utc>,
    ) -> std::result::Result<(Option<VectorMatch>, Vec<f32>), DedupBackend> {
        let embedding = match embedding {
            Some(embedding) => embedding,
            None => match self.embed(text).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    self.health.record_unavailable(DedupBackend::Embedder, &err);
                    return Err(DedupBackend::Embedder);
                },
            },
        };

        match self.find_similar(&embedding, at).await {
            Ok(found) => Ok((found, embedding)),
            Err(err) => {
                self.health
                    .record_unavailable(DedupBackend::VectorStore, &err);
                Err(DedupBackend::VectorStore)
            },
        }
    }

    fn finish(stage: DedupStage, check: SemanticCheck) -> SemanticCheck {
        metrics::counter!(
            "dedup_checks_total",
            "stage" => stage_label(stage),
            "result" => check.label()
        )
        .increment(1);
        if let SemanticCheck::Duplicate(found) = &check {
            tracing::debug!(
                stage = stage.as_str(),
                matched_id = %found.id,
                distance = found.distance,
                "Semantic duplicate"
            );
        }
        check
    }

    /// First pass: read-only check before analysis.
    #[instrument(skip_all, fields(stage = "pre_analysis"))]
    pub async fn check(&self, text: &str, at: DateTime<Utc>) -> SemanticCheck {
        if !self.config.enabled {
            return SemanticCheck::Disabled;
        }
        let check = match self.lookup(text, None, at).await {
            Ok((Some(found), _)) => SemanticCheck::Duplicate(found),
            Ok((None, embedding)) => SemanticCheck::Unique { embedding },
            Err(backend) => SemanticCheck::Unavailable(backend),
        };
        Self::finish(DedupStage::PreAnalysis, check)
    }

    /// Second pass: check and, when unique, record under `id`.
    ///
    /// Reuses `embedding` from the first pass when available.
    #[instrument(skip_all, fields(stage = "pre_persistence", id))]
    pub async fn check_and_record(
        &self,
        id: &str,
        text: &str,
        embedding: Option<Vec<f32>>,
        at: DateTime<Utc>,
    ) -> SemanticCheck {
        if !self.config.enabled {
            return SemanticCheck::Disabled;
        }

        let guard = self.record_lock.lock().await;
        let check = match self.lookup(text, embedding, at).await {
            Ok((Some(found), _)) => SemanticCheck::Duplicate(found),
            Ok((None, embedding)) => {
                if let Err(err) = self.upsert(id, &embedding, at).await {
                    self.health
                        .record_unavailable(DedupBackend::VectorStore, &err);
                }
                SemanticCheck::Unique { embedding }
            },
            Err(backend) => SemanticCheck::Unavailable(backend),
        };
        drop(guard);

        Self::finish(DedupStage::PrePersistence, check)
    }
}
