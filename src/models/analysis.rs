//! Analysis results and the confidence audit trail.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset code used when a message names no tradable asset.
pub const NO_ASSET: &str = "NONE";

/// Annotation attached when deep analysis was attempted and every provider failed.
pub const DEEP_ANALYSIS_FAILED: &str = "deep-analysis-failed";

/// Annotation attached when the fast tier could not analyze the message.
pub const UNANALYZED: &str = "unanalyzed";

/// Analysis tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisTier {
    /// Always-run, low-latency pass.
    Fast,
    /// Conditionally escalated, higher-cost pass.
    Deep,
}

impl AnalysisTier {
    /// Returns the tier as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Deep => "deep",
        }
    }
}

impl fmt::Display for AnalysisTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggested trading action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    /// Open or add to a long position.
    Buy,
    /// Reduce or short.
    Sell,
    /// No position change; informational.
    #[default]
    Observe,
}

impl TradeAction {
    /// Parses an action string (case-insensitive).
    ///
    /// Returns `None` for anything outside `{buy, sell, observe}`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            "observe" => Some(Self::Observe),
            _ => None,
        }
    }

    /// Returns the action as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Observe => "observe",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing states of one envelope through the analysis stage.
///
/// `Pending → FastAnalyzed → {Forwarded | DeepAnalyzing → DeepAnalyzed → Forwarded | Dropped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    /// Waiting for the fast tier.
    Pending,
    /// Fast tier finished (or degraded to unanalyzed).
    FastAnalyzed,
    /// Escalated and waiting on a deep-tier provider.
    DeepAnalyzing,
    /// Deep tier finished (successfully or not).
    DeepAnalyzed,
    /// Eligible for emission.
    Forwarded,
    /// Rejected by the forward gate.
    Dropped,
}

/// Validated analysis fields returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAnalysis {
    /// One-sentence summary of the event.
    pub summary: String,
    /// Event category (listing, hack, regulation, ...).
    pub event_type: String,
    /// Upper-case asset code or [`NO_ASSET`].
    pub asset: String,
    /// Suggested action.
    pub action: TradeAction,
    /// Provider confidence in `[0, 1]`.
    pub confidence: f32,
    /// Risk flags raised by the provider.
    #[serde(default)]
    pub risk_flags: Vec<String>,
}

/// Audit record kept whenever deep analysis replaced a fast-tier confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAudit {
    /// Fast-tier confidence.
    pub original: f32,
    /// Deep-tier confidence now carried by the record.
    pub adjusted: f32,
    /// Why the value changed.
    pub reason: String,
}

impl ConfidenceAudit {
    /// Signed change from original to adjusted.
    #[must_use]
    pub fn delta(&self) -> f32 {
        self.adjusted - self.original
    }
}

impl fmt::Display for ConfidenceAudit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} → {:.2}", self.original, self.adjusted)
    }
}

/// Immutable outcome of one analysis tier.
///
/// Deep analysis never mutates a fast-tier result: it produces a new value
/// whose [`audit`](Self::audit) records the fast-tier confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Tier that produced the result.
    pub tier: AnalysisTier,
    /// Provider identifier, `"none"` when unanalyzed.
    pub provider: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Summary.
    pub summary: String,
    /// Event category.
    pub event_type: String,
    /// Asset code or [`NO_ASSET`].
    pub asset: String,
    /// Suggested action.
    pub action: TradeAction,
    /// Risk flags.
    pub risk_flags: Vec<String>,
    /// False when no provider could analyze the message.
    pub analyzed: bool,
    /// Present when deep analysis replaced the fast-tier confidence.
    pub audit: Option<ConfidenceAudit>,
    /// Free-form annotations such as [`DEEP_ANALYSIS_FAILED`].
    pub annotations: Vec<String>,
}

impl AnalysisResult {
    /// Builds a result from validated provider output.
    #[must_use]
    pub fn from_provider(tier: AnalysisTier, provider: &str, analysis: ProviderAnalysis) -> Self {
        Self {
            tier,
            provider: provider.to_string(),
            confidence: clamp_confidence(analysis.confidence),
            summary: analysis.summary,
            event_type: analysis.event_type,
            asset: analysis.asset,
            action: analysis.action,
            risk_flags: analysis.risk_flags,
            analyzed: true,
            audit: None,
            annotations: Vec::new(),
        }
    }

    /// Placeholder for a message the fast tier could not analyze.
    ///
    /// The summary falls back to the (already cleaned) message text so
    /// downstream consumers still have something to show.
    #[must_use]
    pub fn unanalyzed(text: &str, reason: &str) -> Self {
        Self {
            tier: AnalysisTier::Fast,
            provider: "none".to_string(),
            confidence: 0.0,
            summary: text.to_string(),
            event_type: "unknown".to_string(),
            asset: NO_ASSET.to_string(),
            action: TradeAction::Observe,
            risk_flags: Vec::new(),
            analyzed: false,
            audit: None,
            annotations: vec![UNANALYZED.to_string(), reason.to_string()],
        }
    }

    /// Reconciles a deep-tier result against the fast-tier result it replaces.
    ///
    /// The deep confidence wins; the fast confidence and the delta go to the audit.
    #[must_use]
    pub fn reconcile(fast: &Self, mut deep: Self) -> Self {
        let audit = ConfidenceAudit {
            original: fast.confidence,
            adjusted: deep.confidence,
            reason: format!("deep analysis by {}", deep.provider),
        };
        deep.annotations.push(format!("confidence {audit}"));
        deep.audit = Some(audit);
        deep
    }

    /// Returns a copy of the fast-tier result marked as a failed escalation.
    #[must_use]
    pub fn with_deep_failure(&self) -> Self {
        let mut result = self.clone();
        result.annotations.push(DEEP_ANALYSIS_FAILED.to_string());
        result
    }

    /// Returns true if the result carries the given annotation.
    #[must_use]
    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }
}

/// Clamps a confidence into `[0, 1]`; NaN maps to 0.
#[must_use]
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
