//! `OpenAI`-compatible chat completions client.
//!
//! Also serves LM Studio and other servers exposing `/chat/completions`.

use super::{AnalysisProvider, LlmHttpConfig, build_http_client, malformed, status_error, transport_error};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// `OpenAI`-compatible client.
pub struct OpenAiClient {
    /// Provider identifier.
    name: String,
    /// API key; optional for local servers.
    api_key: Option<SecretString>,
    /// Whether requests without a key are allowed.
    require_key: bool,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Default API key variable.
    pub const DEFAULT_KEY_ENV: &'static str = "OPENAI_API_KEY";

    /// Default LM Studio endpoint.
    pub const LMSTUDIO_ENDPOINT: &'static str = "http://localhost:1234/v1";

    /// Creates a client reading the key from `OPENAI_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "openai".to_string(),
            api_key: std::env::var(Self::DEFAULT_KEY_ENV).ok().map(SecretString::from),
            require_key: true,
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Creates a client for a local LM Studio server; no key required.
    #[must_use]
    pub fn lmstudio() -> Self {
        Self {
            name: "lmstudio".to_string(),
            api_key: None,
            require_key: false,
            endpoint: Self::LMSTUDIO_ENDPOINT.to_string(),
            model: "local-model".to_string(),
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

    /// Reasoning model families take `max_completion_tokens` and no temperature.
    fn is_reasoning_model(&self) -> bool {
        self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("o3")
    }

    fn validate(&self) -> Result<()> {
        if self.require_key && self.api_key.is_none() {
            return Err(Error::PermanentProvider {
                provider: self.name.clone(),
                cause: "API key not configured".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisProvider for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.validate()?;
        tracing::debug!(provider = %self.name, model = %self.model, "Sending analysis request");

        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            },
        ];
        let request = if self.is_reasoning_model() {
            ChatCompletionRequest {
                model: self.model.clone(),
                messages,
                max_tokens: None,
                max_completion_tokens: Some(1024),
                temperature: None,
            }
        } else {
            ChatCompletionRequest {
                model: self.model.clone(),
                messages,
                max_tokens: Some(1024),
                max_completion_tokens: None,
                temperature: Some(0.0),
            }
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = builder
            .json(&request)
            .send()
            .map_err(|e| transport_error(&self.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(&self.name, status, &body));
        }

        let response: ChatCompletionResponse = response
            .json()
            .map_err(|e| malformed(&self.name, format!("undecodable response: {e}")))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| malformed(&self.name, "no choices in response"))
    }
}

/// Request to the Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// A message in the chat.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

/// A choice in the response.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
