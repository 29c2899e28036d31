//! Pipeline orchestrator.
//!
//! Sequences the gates and the analysis tiers for one envelope and returns a
//! terminal [`Decision`]. Stage failures never escape a single envelope: dedup
//! backends fail open, analysis degrades, delivery failures are logged.
//!
//! ```text
//! normalize → exact gate → semantic gate → memory → fast tier
//!   → forward gate → [memory → deep tier] → confidence gate
//!   → signal gate → semantic check-and-record → forward + persist
//! ```

use crate::config::PipelineConfig;
use crate::embedding::{Embedder, HashEmbedder};
use crate::llm::{
    AnalysisProvider, AnalysisRequest, AnalysisRouter, LlmHttpConfig, RouterSettings,
    build_providers,
};
use crate::models::{
    AnalysisResult, AnalysisState, Decision, DedupStage, MessageEnvelope, NO_ASSET, SignalRecord,
    SkipReason,
};
use crate::services::deduplication::{
    DedupHealth, DedupHealthSnapshot, ExactCheck, ExactFingerprintCache, RecentSignalWindow,
    SemanticCheck, SemanticFingerprintService, SignalFingerprint,
};
use crate::services::ingest::IngestNormalizer;
use crate::services::memory_context::MemoryContextCoordinator;
use crate::services::remote::run_blocking;
use crate::storage::{Forwarder, InMemoryVectorStore, MemoryBackend, SignalSink, VectorStore};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::instrument;

/// Counts from a [`SignalPipeline::run`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Envelopes forwarded.
    pub forwarded: usize,
    /// Envelopes skipped.
    pub skipped: usize,
    /// Worker tasks that panicked or were cancelled.
    pub failed: usize,
    /// Skips by reason label.
    pub by_reason: BTreeMap<String, usize>,
}

impl RunSummary {
    fn record(&mut self, outcome: std::result::Result<Decision, JoinError>) {
        match outcome {
            Ok(Decision::Forward(_)) => self.forwarded += 1,
            Ok(Decision::Skip(reason)) => {
                self.skipped += 1;
                *self.by_reason.entry(reason.label().to_string()).or_default() += 1;
            },
            Err(err) => {
                tracing::error!(error = %err, "Pipeline worker failed");
                self.failed += 1;
            },
        }
    }

    /// Total envelopes accounted for.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.forwarded + self.skipped + self.failed
    }
}

/// Collaborators for [`SignalPipeline`].
///
/// Anything not supplied falls back to configuration: the hash embedder, an
/// in-memory vector store, and providers built from the configured lists.
pub struct SignalPipelineBuilder {
    config: PipelineConfig,
    embedder: Option<Arc<dyn Embedder>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    memory_backends: Vec<Arc<dyn MemoryBackend>>,
    fast: Option<Vec<Arc<dyn AnalysisProvider>>>,
    deep: Option<Vec<Arc<dyn AnalysisProvider>>>,
    forwarder: Option<Arc<dyn Forwarder>>,
    sink: Option<Arc<dyn SignalSink>>,
}

impl SignalPipelineBuilder {
    /// Sets the embedder.
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Sets the vector store used by the semantic gate.
    #[must_use]
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Adds a memory backend.
    #[must_use]
    pub fn memory_backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.memory_backends.push(backend);
        self
    }

    /// Sets the ordered fast-tier provider list.
    #[must_use]
    pub fn fast_providers(mut self, providers: Vec<Arc<dyn AnalysisProvider>>) -> Self {
        self.fast = Some(providers);
        self
    }

    /// Sets the ordered deep-tier provider list.
    #[must_use]
    pub fn deep_providers(mut self, providers: Vec<Arc<dyn AnalysisProvider>>) -> Self {
        self.deep = Some(providers);
        self
    }

    /// Sets the downstream forwarder.
    #[must_use]
    pub fn forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Sets the persistence sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates the configuration and assembles the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the configuration is invalid.
    pub fn build(self) -> Result<SignalPipeline> {
        let config = self.config;
        config.validate()?;

        let http = LlmHttpConfig::with_timeout_ms(config.analysis.call_timeout_ms);
        let fast = self
            .fast
            .unwrap_or_else(|| build_providers(&config.analysis.fast_providers, http));
        let deep = self
            .deep
            .unwrap_or_else(|| build_providers(&config.analysis.deep_providers, http));
        if fast.is_empty() {
            tracing::warn!("No fast-tier providers configured; every message will be unanalyzed");
        }

        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbedder::new(config.embedding.dimensions)));
        let vector_store = self
            .vector_store
            .unwrap_or_else(|| {
                Arc::new(InMemoryVectorStore::with_retention(
                    embedder.dimensions(),
                    config.semantic.horizon(),
                    config.semantic.capacity,
                ))
            });

        let health = Arc::new(DedupHealth::new());
        let memory = self
            .memory_backends
            .into_iter()
            .fold(MemoryContextCoordinator::new(config.memory.clone()), |m, b| {
                m.with_backend(b)
            });

        Ok(SignalPipeline {
            normalizer: IngestNormalizer::new(config.ingest.max_analysis_chars),
            exact: ExactFingerprintCache::new(config.dedup.exact_capacity, config.dedup.horizon()),
            semantic: SemanticFingerprintService::new(
                embedder,
                vector_store,
                config.semantic.clone(),
                Arc::clone(&health),
            ),
            signals: RecentSignalWindow::from_config(&config.signal),
            memory,
            router: AnalysisRouter::new(fast, deep, RouterSettings::from_config(&config.analysis)),
            forwarder: self.forwarder,
            sink: self.sink,
            health,
            config,
        })
    }
}

/// The deduplication and analysis-escalation pipeline.
///
/// All dedup windows are owned here and shared by every worker through
/// `&self`; each exposes only atomic check-and-insert operations.
pub struct SignalPipeline {
    config: PipelineConfig,
    normalizer: IngestNormalizer,
    exact: ExactFingerprintCache,
    semantic: SemanticFingerprintService,
    signals: RecentSignalWindow,
    memory: MemoryContextCoordinator,
    router: AnalysisRouter,
    forwarder: Option<Arc<dyn Forwarder>>,
    sink: Option<Arc<dyn SignalSink>>,
    health: Arc<DedupHealth>,
}

impl SignalPipeline {
    /// Starts a builder.
    #[must_use]
    pub fn builder(config: PipelineConfig) -> SignalPipelineBuilder {
        SignalPipelineBuilder {
            config,
            embedder: None,
            vector_store: None,
            memory_backends: Vec::new(),
            fast: None,
            deep: None,
            forwarder: None,
            sink: None,
        }
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The analysis router.
    #[must_use]
    pub const fn router(&self) -> &AnalysisRouter {
        &self.router
    }

    /// Fail-open counters of the semantic gate.
    #[must_use]
    pub fn health(&self) -> DedupHealthSnapshot {
        self.health.snapshot()
    }

    /// Runs one envelope through the pipeline.
    #[instrument(skip_all, fields(envelope_id = %envelope.id, source = %envelope.source))]
    pub async fn process(&self, envelope: MessageEnvelope) -> Decision {
        let decision = self.evaluate(&envelope).await;

        let reason = decision.skip_reason().map_or("emitted", SkipReason::label);
        metrics::counter!(
            "pipeline_decisions_total",
            "decision" => decision.label(),
            "reason" => reason
        )
        .increment(1);

        match &decision {
            Decision::Forward(record) => tracing::info!(
                signal_id = %record.id,
                tier = record.tier.as_str(),
                confidence = record.confidence,
                analyzed = record.analyzed,
                "Forwarded"
            ),
            Decision::Skip(reason) => tracing::info!(reason = %reason, "Skipped"),
        }
        decision
    }

    async fn evaluate(&self, envelope: &MessageEnvelope) -> Decision {
        let Some(message) = self.normalizer.normalize(envelope) else {
            return Decision::Skip(SkipReason::EmptyMessage);
        };
        let at = envelope.received_at;

        if let ExactCheck::Duplicate { first_seen } =
            self.exact.check_and_insert_hash(message.fingerprint.clone(), at)
        {
            tracing::debug!(%first_seen, "Exact duplicate");
            return Decision::Skip(SkipReason::ExactDuplicate);
        }

        let embedding = match self.semantic.check(&message.cleaned, at).await {
            SemanticCheck::Duplicate(found) => {
                return Decision::Skip(SkipReason::SemanticDuplicate {
                    stage: DedupStage::PreAnalysis,
                    matched_id: found.id,
                    distance: found.distance,
                });
            },
            other => other.into_embedding(),
        };

        let mut trail = vec![AnalysisState::Pending];
        let context = self
            .memory
            .retrieve(
                &message.analysis_text,
                embedding.as_deref(),
                None,
                self.memory.fast_limit(),
            )
            .await;
        let request = AnalysisRequest::new(message.analysis_text.clone())
            .with_media(envelope.media.clone())
            .with_context(context);

        let fast = self.router.analyze_fast(&request).await;
        trail.push(AnalysisState::FastAnalyzed);

        if !fast.analyzed && !self.config.analysis.forward_unanalyzed {
            return Decision::Skip(SkipReason::AnalysisUnavailable);
        }

        let analysis = if self.router.has_deep_tier() && self.router.should_escalate(&fast) {
            trail.push(AnalysisState::DeepAnalyzing);
            let deep = self
                .escalate(&fast, request, &message.analysis_text, embedding.as_deref())
                .await;
            trail.push(AnalysisState::DeepAnalyzed);
            deep
        } else {
            fast
        };

        if analysis.analyzed && analysis.confidence < self.config.analysis.min_forward_confidence {
            return Decision::Skip(SkipReason::LowConfidence {
                confidence: analysis.confidence,
            });
        }

        trail.push(AnalysisState::Forwarded);
        let record = SignalRecord::build(
            envelope,
            &message.cleaned,
            &message.canonical,
            analysis,
            trail,
        );

        if let Some(found) = self
            .signals
            .check_and_record(SignalFingerprint::from_record(&record))
        {
            return Decision::Skip(SkipReason::DuplicateSignal {
                matched_id: found.matched_id,
                similarity: found.similarity,
            });
        }

        if let SemanticCheck::Duplicate(found) = self
            .semantic
            .check_and_record(&record.id, &message.cleaned, embedding, at)
            .await
        {
            self.signals.remove(&record.id);
            return Decision::Skip(SkipReason::SemanticDuplicate {
                stage: DedupStage::PrePersistence,
                matched_id: found.id,
                distance: found.distance,
            });
        }

        self.emit(&record, envelope).await;
        Decision::Forward(Box::new(record))
    }

    /// Deep tier with a wider, asset-scoped memory context.
    async fn escalate(
        &self,
        fast: &AnalysisResult,
        request: AnalysisRequest,
        query_text: &str,
        embedding: Option<&[f32]>,
    ) -> AnalysisResult {
        let asset = (fast.asset != NO_ASSET).then_some(fast.asset.as_str());
        let context = self
            .memory
            .retrieve(query_text, embedding, asset, self.memory.deep_limit())
            .await;
        let request = request.with_context(context);
        self.router.analyze_deep(fast, &request).await
    }

    /// Forwards and persists; failures are logged and not retried.
    async fn emit(&self, record: &SignalRecord, envelope: &MessageEnvelope) {
        let timeout = Duration::from_millis(self.config.analysis.call_timeout_ms);

        if let Some(forwarder) = &self.forwarder {
            let forwarder = Arc::clone(forwarder);
            let payload = record.clone();
            if let Err(err) =
                run_blocking("forward", timeout, move || forwarder.forward(&payload)).await
            {
                tracing::warn!(signal_id = %record.id, error = %err, "Forwarding failed");
            }
        }

        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            let payload = record.clone();
            let source = envelope.clone();
            if let Err(err) =
                run_blocking("persist", timeout, move || sink.persist(&payload, &source)).await
            {
                tracing::warn!(signal_id = %record.id, error = %err, "Persisting failed");
            }
        }
    }

    /// Consumes envelopes until the channel closes.
    ///
    /// At most `analysis.fast_concurrency` envelopes are in flight; each runs
    /// the whole pipeline on its own task. Returns once every task finished.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<MessageEnvelope>) -> RunSummary {
        let permits = Arc::new(Semaphore::new(self.config.analysis.fast_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();

        while let Some(envelope) = receiver.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let pipeline = Arc::clone(&self);
            tasks.spawn(async move {
                let decision = pipeline.process(envelope).await;
                drop(permit);
                decision
            });
            while let Some(done) = tasks.try_join_next() {
                summary.record(done);
            }
        }

        while let Some(done) = tasks.join_next().await {
            summary.record(done);
        }
        tracing::info!(
            forwarded = summary.forwarded,
            skipped = summary.skipped,
            failed = summary.failed,
            "Pipeline run finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::models::{ProviderAnalysis, TradeAction, UNANALYZED};
    use std::sync::Mutex;

    struct Fixed {
        name: &'static str,
        confidence: f32,
    }

    impl AnalysisProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(Error::PermanentProvider {
                provider: self.name.to_string(),
                cause: "not used".to_string(),
            })
        }

        fn analyze(&self, request: &AnalysisRequest) -> Result<ProviderAnalysis> {
            Ok(ProviderAnalysis {
                summary: request.text.clone(),
                event_type: "listing".to_string(),
                asset: "SOL".to_string(),
                action: TradeAction::Observe,
                confidence: self.confidence,
                risk_flags: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<SignalRecord>>);

    impl Forwarder for Collect {
        fn forward(&self, record: &SignalRecord) -> Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn pipeline(config: PipelineConfig, confidence: f32) -> (SignalPipeline, Arc<Collect>) {
        let collect = Arc::new(Collect::default());
        let pipeline = SignalPipeline::builder(config)
            .fast_providers(vec![Arc::new(Fixed {
                name: "fast",
                confidence,
            })])
            .deep_providers(Vec::new())
            .forwarder(collect.clone())
            .build()
            .unwrap();
        (pipeline, collect)
    }

    #[tokio::test]
    async fn test_empty_message_skipped() {
        let (pipeline, _) = pipeline(PipelineConfig::default(), 0.5);
        let decision = pipeline
            .process(MessageEnvelope::new(" \u{200b} \n", "wire"))
            .await;
        assert_eq!(decision, Decision::Skip(SkipReason::EmptyMessage));
    }

    #[tokio::test]
    async fn test_forward_records_trail_and_delivers() {
        let (pipeline, collect) = pipeline(PipelineConfig::default(), 0.5);
        let decision = pipeline
            .process(MessageEnvelope::new("Coinbase lists SOL", "wire"))
            .await;
        let record = decision.record().unwrap();
        assert_eq!(
            record.trail,
            vec![
                AnalysisState::Pending,
                AnalysisState::FastAnalyzed,
                AnalysisState::Forwarded
            ]
        );
        assert_eq!(collect.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_dropped() {
        let mut config = PipelineConfig::default();
        config.analysis.min_forward_confidence = 0.6;
        let (pipeline, collect) = pipeline(config, 0.3);
        let decision = pipeline
            .process(MessageEnvelope::new("Coinbase lists SOL", "wire"))
            .await;
        assert!(matches!(
            decision,
            Decision::Skip(SkipReason::LowConfidence { .. })
        ));
        assert!(collect.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_providers_forwards_unanalyzed() {
        let pipeline = SignalPipeline::builder(PipelineConfig::default())
            .fast_providers(Vec::new())
            .deep_providers(Vec::new())
            .build()
            .unwrap();
        let decision = pipeline
            .process(MessageEnvelope::new("Coinbase lists SOL", "wire"))
            .await;
        let record = decision.record().unwrap();
        assert!(!record.analyzed);
        assert!(record.has_annotation(UNANALYZED));
    }

    #[tokio::test]
    async fn test_unanalyzed_dropped_when_configured() {
        let mut config = PipelineConfig::default();
        config.analysis.forward_unanalyzed = false;
        let pipeline = SignalPipeline::builder(config)
            .fast_providers(Vec::new())
            .deep_providers(Vec::new())
            .build()
            .unwrap();
        let decision = pipeline
            .process(MessageEnvelope::new("Coinbase lists SOL", "wire"))
            .await;
        assert_eq!(decision, Decision::Skip(SkipReason::AnalysisUnavailable));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.analysis.escalation_threshold = 1.5;
        assert!(SignalPipeline::builder(config).build().is_err());
    }

    #[tokio::test]
    async fn test_run_summarizes() {
        let (pipeline, collect) = pipeline(PipelineConfig::default(), 0.5);
        let pipeline = Arc::new(pipeline);
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(Arc::clone(&pipeline).run(rx));

        for text in ["Coinbase lists SOL", "Coinbase lists SOL", "", "Kraken hacked"] {
            tx.send(MessageEnvelope::new(text, "wire")).await.unwrap();
        }
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.forwarded, 2);
        assert_eq!(summary.by_reason.get("exact_duplicate"), Some(&1));
        assert_eq!(summary.by_reason.get("empty_message"), Some(&1));
        assert_eq!(collect.0.lock().unwrap().len(), 2);
    }
}
