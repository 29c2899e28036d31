//! Property-based tests for normalization, ranking and confidence handling.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Cleaning and canonicalization are idempotent
//! - Analysis text never exceeds its cap
//! - Confidence always lands in [0, 1]
//! - Ranked memory context is bounded, unique, and vector-first

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{Duration, Utc};
use proptest::prelude::*;
use signalgate::config::MergePolicy;
use signalgate::models::{
    AnalysisResult, AnalysisTier, MemoryEntry, MemoryHit, MessageEnvelope, ProviderAnalysis,
    TradeAction,
};
use signalgate::services::deduplication::{
    ContentHasher, normalize_signal_text, sequence_ratio,
};
use signalgate::services::ingest::clean_text;
use signalgate::services::{IngestNormalizer, rank_hits};
use std::collections::HashSet;

fn analysis(confidence: f32) -> ProviderAnalysis {
    ProviderAnalysis {
        summary: "summary".to_string(),
        event_type: "listing".to_string(),
        asset: "SOL".to_string(),
        action: TradeAction::Observe,
        confidence,
        risk_flags: Vec::new(),
    }
}

fn entry(id: usize) -> MemoryEntry {
    MemoryEntry::new(
        format!("m-{id}"),
        format!("entry {id}"),
        if id % 2 == 0 { "BTC" } else { "ETH" },
        "listing",
        Utc::now() - Duration::hours(i64::try_from(id).unwrap()),
    )
}

fn hits_strategy() -> impl Strategy<Value = Vec<(usize, f32)>> {
    prop::collection::vec((0usize..20, 0.0f32..1.0), 0..12)
}

proptest! {
    /// Property: cleaning twice changes nothing.
    #[test]
    fn prop_clean_text_idempotent(s in "\\PC{0,120}") {
        let once = clean_text(&s);
        prop_assert_eq!(clean_text(&once), once);
    }

    /// Property: cleaned text has no leading/trailing or doubled whitespace.
    #[test]
    fn prop_clean_text_whitespace_collapsed(s in "[a-z \\t\\n\\u{200b}]{0,80}") {
        let cleaned = clean_text(&s);
        prop_assert_eq!(cleaned.trim(), cleaned.as_str());
        prop_assert!(!cleaned.contains("  "));
        prop_assert!(!cleaned.contains('\u{200b}'), "cleaned text contains a zero-width space");
    }

    /// Property: canonical form is idempotent and case-insensitive.
    #[test]
    fn prop_canonical_case_insensitive(s in "[a-zA-Z ]{1,60}") {
        let canonical = ContentHasher::canonicalize(&s);
        prop_assert_eq!(ContentHasher::canonicalize(&canonical), canonical.clone());
        prop_assert_eq!(ContentHasher::canonicalize(&s.to_uppercase()), canonical);
    }

    /// Property: analysis text is capped in characters, not bytes.
    #[test]
    fn prop_analysis_text_capped(s in "\\PC{1,300}", cap in 1usize..100) {
        let normalizer = IngestNormalizer::new(cap);
        if let Some(message) = normalizer.normalize(&MessageEnvelope::new(s, "prop")) {
            prop_assert!(message.analysis_text.chars().count() <= cap);
            prop_assert_eq!(message.truncated, message.cleaned.chars().count() > cap);
            prop_assert!(message.cleaned.starts_with(&message.analysis_text));
        }
    }

    /// Property: any provider confidence is clamped into [0, 1].
    #[test]
    fn prop_confidence_clamped(c in prop::num::f32::ANY) {
        let result = AnalysisResult::from_provider(AnalysisTier::Fast, "p", analysis(c));
        prop_assert!((0.0..=1.0).contains(&result.confidence));
    }

    /// Property: reconciliation carries deep confidence and audits the fast one.
    #[test]
    fn prop_reconcile_preserves_original(fast_c in 0.0f32..=1.0, deep_c in 0.0f32..=1.0) {
        let fast = AnalysisResult::from_provider(AnalysisTier::Fast, "fast", analysis(fast_c));
        let deep = AnalysisResult::from_provider(AnalysisTier::Deep, "deep", analysis(deep_c));
        let reconciled = AnalysisResult::reconcile(&fast, deep);
        let audit = reconciled.audit.expect("audit present");
        prop_assert!((reconciled.confidence - deep_c).abs() < f32::EPSILON);
        prop_assert!((audit.original - fast_c).abs() < f32::EPSILON);
        prop_assert!((audit.delta() - (deep_c - fast_c)).abs() < 1e-6);
    }

    /// Property: signal normalization is idempotent.
    #[test]
    fn prop_signal_normalization_idempotent(s in "[a-zA-Z0-9 .,:/!?()$-]{0,120}") {
        let once = normalize_signal_text(&s);
        prop_assert_eq!(normalize_signal_text(&once), once);
    }

    /// Property: a non-empty text is fully similar to itself.
    #[test]
    fn prop_ratio_identity(s in "[a-z]{1,8}( [a-z]{1,8}){0,6}") {
        prop_assert!((sequence_ratio(&s, &s) - 1.0).abs() < f32::EPSILON);
    }

    /// Property: ranked context is bounded and free of duplicate entries.
    #[test]
    fn prop_rank_bounded_and_unique(
        vector in hits_strategy(),
        keyword in hits_strategy(),
        limit in 0usize..10,
        interleave in any::<bool>(),
    ) {
        let merge = if interleave { MergePolicy::Interleave } else { MergePolicy::VectorFirst };
        let to_hits = |raw: &[(usize, f32)], is_vector: bool| -> Vec<MemoryHit> {
            raw.iter()
                .map(|(id, score)| if is_vector {
                    MemoryHit::Vector { entry: entry(*id), score: *score }
                } else {
                    MemoryHit::Keyword { entry: entry(*id), score: *score }
                })
                .collect()
        };
        let ranked = rank_hits(to_hits(&vector, true), to_hits(&keyword, false), merge, None, limit);

        prop_assert!(ranked.len() <= limit);
        let ids: HashSet<_> = ranked.iter().map(|e| e.id.clone()).collect();
        prop_assert_eq!(ids.len(), ranked.len());
    }

    /// Property: vector-first ranks every vector hit above keyword-only hits.
    #[test]
    fn prop_vector_first_ordering(vector in hits_strategy(), keyword in hits_strategy()) {
        let vector_ids: HashSet<String> = vector.iter().map(|(id, _)| format!("m-{id}")).collect();
        let ranked = rank_hits(
            vector.iter().map(|(id, s)| MemoryHit::Vector { entry: entry(*id), score: *s }).collect(),
            keyword.iter().map(|(id, s)| MemoryHit::Keyword { entry: entry(*id), score: *s }).collect(),
            MergePolicy::VectorFirst,
            None,
            usize::MAX,
        );

        let first_keyword = ranked
            .iter()
            .position(|e| !vector_ids.contains(e.id.as_str()))
            .unwrap_or(ranked.len());
        prop_assert!(ranked[first_keyword..].iter().all(|e| !vector_ids.contains(e.id.as_str())));
        prop_assert_eq!(first_keyword, vector_ids.len());
    }

    /// Property: an asset filter only lets matching entries through.
    #[test]
    fn prop_asset_filter(vector in hits_strategy(), keyword in hits_strategy()) {
        let ranked = rank_hits(
            vector.iter().map(|(id, s)| MemoryHit::Vector { entry: entry(*id), score: *s }).collect(),
            keyword.iter().map(|(id, s)| MemoryHit::Keyword { entry: entry(*id), score: *s }).collect(),
            MergePolicy::VectorFirst,
            Some("btc"),
            usize::MAX,
        );
        prop_assert!(ranked.iter().all(|e| e.asset == "BTC"));
    }
}
