//! Analysis provider abstraction and the two-tier router.
//!
//! Every provider sits behind one capability, [`AnalysisProvider`]. The
//! clients only know how to send a system and user prompt and return text;
//! prompt construction and response validation are shared so a provider
//! swap cannot change what counts as a valid analysis.

mod anthropic;
mod factory;
mod ollama;
mod openai;
mod prompt;
mod rate_limit;
mod router;

pub use anthropic::AnthropicClient;
pub use factory::{build_provider, build_providers};
pub(crate) use factory::{env_lookup, resolve_api_key};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use prompt::{ANALYSIS_SYSTEM_PROMPT, build_user_prompt, escape_xml};
pub use rate_limit::DeepTierGate;
pub use router::{AnalysisRouter, RouterSettings};

use crate::models::{MemoryEntry, NO_ASSET, ProviderAnalysis, TradeAction};
use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Everything a provider needs to analyze one message.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    /// Message text, already cleaned and capped.
    pub text: String,
    /// Optional media reference.
    pub media: Option<String>,
    /// Related history, most relevant first.
    pub context: Vec<MemoryEntry>,
}

impl AnalysisRequest {
    /// Creates a request without media or context.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
            context: Vec::new(),
        }
    }

    /// Attaches memory context.
    #[must_use]
    pub fn with_context(mut self, context: Vec<MemoryEntry>) -> Self {
        self.context = context;
        self
    }

    /// Attaches a media reference.
    #[must_use]
    pub fn with_media(mut self, media: Option<String>) -> Self {
        self.media = media;
        self
    }
}

/// Trait for analysis providers.
pub trait AnalysisProvider: Send + Sync {
    /// Identifier used in logs, metrics and records.
    fn name(&self) -> &str;

    /// Sends a system and user prompt and returns the raw completion text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransientProvider`] for timeouts, connect failures,
    /// HTTP 429 and 5xx; [`Error::PermanentProvider`] for missing credentials
    /// and other 4xx responses.
    fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Analyzes a message.
    ///
    /// # Errors
    ///
    /// Propagates [`complete`](Self::complete) failures and returns
    /// [`Error::MalformedAnalysis`] when the response violates the schema.
    fn analyze(&self, request: &AnalysisRequest) -> Result<ProviderAnalysis> {
        let user = build_user_prompt(request);
        let response = self.complete(ANALYSIS_SYSTEM_PROMPT, &user)?;
        parse_analysis(self.name(), &response)
    }
}

/// HTTP client configuration for providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Configuration with the given request timeout.
    #[must_use]
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Self::default()
        }
    }
}

/// Builds a blocking HTTP client with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Classifies a transport error.
///
/// Everything that never got an HTTP status is treated as transient.
pub(crate) fn transport_error(provider: &str, err: &reqwest::Error) -> Error {
    let error_kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_request() {
        "request"
    } else {
        "unknown"
    };
    tracing::warn!(
        provider,
        error = %err,
        error_kind,
        "Provider request failed"
    );
    Error::TransientProvider {
        provider: provider.to_string(),
        cause: format!("{error_kind} error: {err}"),
    }
}

/// Classifies a non-success HTTP status.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    tracing::warn!(provider, status = %status, "Provider returned error status");
    let cause = format!("API returned status: {status} - {}", truncate_body(body));
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Error::TransientProvider {
            provider: provider.to_string(),
            cause,
        }
    } else {
        Error::PermanentProvider {
            provider: provider.to_string(),
            cause,
        }
    }
}

/// Error for an unusable response body.
pub(crate) fn malformed(provider: &str, cause: impl Into<String>) -> Error {
    Error::MalformedAnalysis {
        provider: provider.to_string(),
        cause: cause.into(),
    }
}

fn truncate_body(body: &str) -> &str {
    const MAX_BODY: usize = 512;
    match body.char_indices().nth(MAX_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Raw analysis as it comes off the wire, before validation.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    summary: Option<String>,
    event_type: Option<String>,
    asset: Option<String>,
    action: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    risk_flags: Vec<String>,
}

/// Parses and validates a provider response.
///
/// # Errors
///
/// Returns [`Error::MalformedAnalysis`] when the JSON is unparseable, a
/// required field is missing, the action is unknown, or the confidence is
/// outside `[0, 1]`.
pub fn parse_analysis(provider: &str, response: &str) -> Result<ProviderAnalysis> {
    let json_str = extract_json_from_response(response);
    let raw: RawAnalysis = serde_json::from_str(json_str)
        .map_err(|e| malformed(provider, format!("invalid JSON: {e}")))?;

    let summary = require(provider, "summary", raw.summary)?;
    let event_type = require(provider, "event_type", raw.event_type)?
        .trim()
        .to_lowercase();
    let action_str = require(provider, "action", raw.action)?;
    let action = TradeAction::parse(&action_str)
        .ok_or_else(|| malformed(provider, format!("unknown action '{action_str}'")))?;
    let confidence = raw
        .confidence
        .ok_or_else(|| malformed(provider, "missing field 'confidence'"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(malformed(
            provider,
            format!("confidence {confidence} outside [0, 1]"),
        ));
    }

    let asset = raw
        .asset
        .map(|a| a.trim().to_uppercase())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| NO_ASSET.to_string());

    #[allow(clippy::cast_possible_truncation)]
    let confidence = confidence as f32;

    Ok(ProviderAnalysis {
        summary,
        event_type,
        asset,
        action,
        confidence,
        risk_flags: raw.risk_flags,
    })
}

fn require(provider: &str, field: &str, value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| malformed(provider, format!("missing field '{field}'")))
}

/// Extracts JSON from a response, handling markdown code blocks.
fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // ```json ... ```
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // ``` ... ``` without a language marker
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find('{')
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    trimmed
}
