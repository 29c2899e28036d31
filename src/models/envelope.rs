//! Inbound message envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(String);

impl EnvelopeId {
    /// Creates an envelope ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::generate()
    }
}

/// One raw inbound event.
///
/// Owned by the orchestrator for a single pipeline pass and discarded
/// afterwards. Missing fields in JSON input get defaults: a fresh ID and the
/// current time as arrival timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Envelope identifier.
    #[serde(default)]
    pub id: EnvelopeId,
    /// Raw message text as delivered by the source.
    pub text: String,
    /// Source identifier (channel, feed, account).
    pub source: String,
    /// Arrival timestamp; all dedup horizons are measured against it.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    /// Optional media reference (URL or path) attached to the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

impl MessageEnvelope {
    /// Creates an envelope that arrived now.
    #[must_use]
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: EnvelopeId::generate(),
            text: text.into(),
            source: source.into(),
            received_at: Utc::now(),
            media: None,
        }
    }

    /// Sets the arrival timestamp.
    #[must_use]
    pub const fn with_received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    /// Attaches a media reference.
    #[must_use]
    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(EnvelopeId::generate(), EnvelopeId::generate());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let envelope: MessageEnvelope =
            serde_json::from_str(r#"{"text": "BTC ETF approved", "source": "wire"}"#).unwrap();
        assert_eq!(envelope.text, "BTC ETF approved");
        assert_eq!(envelope.source, "wire");
        assert!(envelope.media.is_none());
        assert!(!envelope.id.as_str().is_empty());
    }

    #[test]
    fn test_builder() {
        let at = DateTime::parse_from_rfc3339("2024-01-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let envelope = MessageEnvelope::new("text", "src")
            .with_received_at(at)
            .with_media("https://cdn.example/chart.png");
        assert_eq!(envelope.received_at, at);
        assert_eq!(
            envelope.media.as_deref(),
            Some("https://cdn.example/chart.png")
        );
    }
}
