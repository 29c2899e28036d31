//! Ingest normalization.
//!
//! Turns a raw [`MessageEnvelope`] into the forms the rest of the pipeline
//! needs: cleaned display text, canonical text for the exact gate, and a
//! length-capped analysis text.

use crate::models::MessageEnvelope;
use crate::services::deduplication::ContentHasher;

/// An envelope after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Text with invisible characters removed and whitespace collapsed.
    pub cleaned: String,
    /// Trimmed, case-folded, whitespace-folded text.
    pub canonical: String,
    /// SHA256 of the canonical text.
    pub fingerprint: String,
    /// Cleaned text capped for analysis prompts.
    pub analysis_text: String,
    /// True when `analysis_text` was cut.
    pub truncated: bool,
}

/// Canonicalizes raw events.
#[derive(Debug, Clone, Copy)]
pub struct IngestNormalizer {
    max_analysis_chars: usize,
}

impl IngestNormalizer {
    /// Creates a normalizer with the given analysis text cap.
    #[must_use]
    pub const fn new(max_analysis_chars: usize) -> Self {
        Self { max_analysis_chars }
    }

    /// Normalizes an envelope.
    ///
    /// Returns `None` when nothing but whitespace or invisible characters
    /// remains.
    #[must_use]
    pub fn normalize(&self, envelope: &MessageEnvelope) -> Option<NormalizedMessage> {
        let cleaned = clean_text(&envelope.text);
        if cleaned.is_empty() {
            return None;
        }

        let canonical = ContentHasher::canonicalize(&cleaned);
        let fingerprint = ContentHasher::hash_canonical(&canonical);
        let (analysis_text, truncated) = truncate_chars(&cleaned, self.max_analysis_chars);

        Some(NormalizedMessage {
            analysis_text: analysis_text.to_string(),
            truncated,
            cleaned,
            canonical,
            fingerprint,
        })
    }
}

impl Default for IngestNormalizer {
    fn default() -> Self {
        Self::new(4000)
    }
}

/// Removes zero-width and control characters and collapses whitespace runs.
#[must_use]
pub fn clean_text(raw: &str) -> String {
    let visible: String = raw
        .chars()
        .filter(|c| !is_invisible(*c))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    visible.split_whitespace().collect::<Vec<_>>().join(" ")
}

const fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
    )
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
