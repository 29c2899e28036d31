//! Terminal pipeline decisions.

use super::SignalRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which semantic pass rejected a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStage {
    /// Check on the normalized text before any analysis spend.
    PreAnalysis,
    /// Check-and-record immediately before emission.
    PrePersistence,
}

impl DedupStage {
    /// Returns the stage as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreAnalysis => "pre_analysis",
            Self::PrePersistence => "pre_persistence",
        }
    }
}

/// Why a message was not forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Nothing left after normalization.
    EmptyMessage,
    /// Canonical text already seen within the exact horizon.
    ExactDuplicate,
    /// Embedding within `max_distance` of a recent fingerprint.
    SemanticDuplicate {
        /// Which semantic pass matched.
        stage: DedupStage,
        /// Identifier of the matched fingerprint.
        matched_id: String,
        /// Cosine distance to the match.
        distance: f32,
    },
    /// Signal text and metadata matched a recently emitted signal.
    DuplicateSignal {
        /// Identifier of the matched signal.
        matched_id: String,
        /// Text similarity ratio.
        similarity: f32,
    },
    /// Fast analysis failed and unanalyzed messages are not forwarded.
    AnalysisUnavailable,
    /// Confidence below the minimum forward confidence.
    LowConfidence {
        /// The final confidence.
        confidence: f32,
    },
}

impl SkipReason {
    /// Short label used for metrics and log fields.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::ExactDuplicate => "exact_duplicate",
            Self::SemanticDuplicate {
                stage: DedupStage::PreAnalysis,
                ..
            } => "semantic_duplicate_pre_analysis",
            Self::SemanticDuplicate {
                stage: DedupStage::PrePersistence,
                ..
            } => "semantic_duplicate_pre_persistence",
            Self::DuplicateSignal { .. } => "duplicate_signal",
            Self::AnalysisUnavailable => "analysis_unavailable",
            Self::LowConfidence { .. } => "low_confidence",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::ExactDuplicate => write!(f, "exact duplicate"),
            Self::SemanticDuplicate {
                stage,
                matched_id,
                distance,
            } => write!(
                f,
                "semantic duplicate of {matched_id} at {} (distance {distance:.3})",
                stage.as_str()
            ),
            Self::DuplicateSignal {
                matched_id,
                similarity,
            } => write!(f, "duplicate signal of {matched_id} (ratio {similarity:.2})"),
            Self::AnalysisUnavailable => write!(f, "analysis unavailable"),
            Self::LowConfidence { confidence } => {
                write!(f, "confidence {confidence:.2} below forward minimum")
            },
        }
    }
}

/// Terminal decision for one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "detail", rename_all = "snake_case")]
pub enum Decision {
    /// The record was emitted downstream.
    Forward(Box<SignalRecord>),
    /// The message was dropped.
    Skip(SkipReason),
}

impl Decision {
    /// Returns true if the decision is `Forward`.
    #[must_use]
    pub const fn is_forward(&self) -> bool {
        matches!(self, Self::Forward(_))
    }

    /// Returns the emitted record, if any.
    #[must_use]
    pub fn record(&self) -> Option<&SignalRecord> {
        match self {
            Self::Forward(record) => Some(record),
            Self::Skip(_) => None,
        }
    }

    /// Returns the skip reason, if any.
    #[must_use]
    pub const fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Forward(_) => None,
            Self::Skip(reason) => Some(reason),
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Forward(_) => "forward",
            Self::Skip(_) => "skip",
        }
    }
}
