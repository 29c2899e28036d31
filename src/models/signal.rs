//! Emitted signal records.

use super::{
    AnalysisResult, AnalysisState, AnalysisTier, ConfidenceAudit, MessageEnvelope, TradeAction,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Post-analysis structured output, persisted downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Record identifier.
    pub id: String,
    /// Envelope the record was derived from.
    pub envelope_id: String,
    /// Source identifier.
    pub source: String,
    /// Cleaned message text; signal similarity compares this.
    pub text: String,
    /// Canonical text used by the exact gate.
    pub canonical: String,
    /// Analysis summary.
    pub summary: String,
    /// Event category.
    pub event_type: String,
    /// Asset code.
    pub asset: String,
    /// Suggested action.
    pub action: TradeAction,
    /// Final confidence.
    pub confidence: f32,
    /// Risk flags.
    pub risk_flags: Vec<String>,
    /// Tier that produced the final analysis.
    pub tier: AnalysisTier,
    /// Provider that produced the final analysis.
    pub provider: String,
    /// False when the record passed through unanalyzed.
    pub analyzed: bool,
    /// Confidence audit when deep analysis changed the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<ConfidenceAudit>,
    /// Annotations collected along the way.
    #[serde(default)]
    pub annotations: Vec<String>,
    /// States the envelope passed through.
    #[serde(default)]
    pub trail: Vec<AnalysisState>,
    /// Envelope arrival time; recency windows use it.
    pub observed_at: DateTime<Utc>,
    /// When the record was built.
    pub emitted_at: DateTime<Utc>,
}

impl SignalRecord {
    /// Builds a record from an envelope and its final analysis.
    #[must_use]
    pub fn build(
        envelope: &MessageEnvelope,
        cleaned: &str,
        canonical: &str,
        analysis: AnalysisResult,
        trail: Vec<AnalysisState>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            envelope_id: envelope.id.to_string(),
            source: envelope.source.clone(),
            text: cleaned.to_string(),
            canonical: canonical.to_string(),
            summary: analysis.summary,
            event_type: analysis.event_type,
            asset: analysis.asset,
            action: analysis.action,
            confidence: analysis.confidence,
            risk_flags: analysis.risk_flags,
            tier: analysis.tier,
            provider: analysis.provider,
            analyzed: analysis.analyzed,
            audit: analysis.audit,
            annotations: analysis.annotations,
            trail,
            observed_at: envelope.received_at,
            emitted_at: Utc::now(),
        }
    }

    /// Returns true if the record carries the given annotation.
    #[must_use]
    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }
}
