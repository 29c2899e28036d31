//! Anthropic Messages API client.

use super::{AnalysisProvider, LlmHttpConfig, build_http_client, malformed, status_error, transport_error};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Anthropic client.
pub struct AnthropicClient {
    /// Provider identifier.
    name: String,
    /// API key.
    api_key: Option<SecretString>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl AnthropicClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "claude-3-5-haiku-latest";

    /// Default API key variable.
    pub const DEFAULT_KEY_ENV: &'static str = "ANTHROPIC_API_KEY";

    /// Creates a client reading the key from `ANTHROPIC_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "anthropic".to_string(),
            api_key: std::env::var(Self::DEFAULT_KEY_ENV).ok().map(SecretString::from),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Sets the provider identifier.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Drops any key picked up from the environment.
    #[must_use]
    pub fn without_api_key(mut self) -> Self {
        self.api_key = None;
        self
    }

    /// Returns true if the client holds an API key.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    fn api_key(&self) -> Result<&SecretString> {
        self.api_key.as_ref().ok_or_else(|| Error::PermanentProvider {
            provider: self.name.clone(),
            cause: "API key not configured".to_string(),
        })
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisProvider for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, system: &str, user: &str) -> Result<String> {
        let api_key = self.api_key()?;
        tracing::debug!(provider = %self.name, model = %self.model, "Sending analysis request");

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 1024,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| transport_error(&self.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(&self.name, status, &body));
        }

        let response: MessagesResponse = response
            .json()
            .map_err(|e| malformed(&self.name, format!("undecodable response: {e}")))?;

        response
            .content
            .into_iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text)
            .ok_or_else(|| malformed(&self.name, "no text content in response"))
    }
}

/// Request to the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

/// A message in the conversation.
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

/// A content block in the response.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}
