//! Ollama (local) chat client.

use super::{AnalysisProvider, LlmHttpConfig, build_http_client, malformed, status_error, transport_error};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Ollama client.
pub struct OllamaClient {
    /// Provider identifier.
    name: String,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    /// Creates a client honoring `OLLAMA_HOST` and `OLLAMA_MODEL`.
    #[must_use]
    pub fn new() -> Self {
        let endpoint =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string());
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        Self {
            name: "ollama".to_string(),
            endpoint,
            model,
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Sets the provider identifier.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
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
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisProvider for OllamaClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, system: &str, user: &str) -> Result<String> {
        tracing::debug!(provider = %self.name, model = %self.model, "Sending analysis request");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&request)
            .send()
            .map_err(|e| transport_error(&self.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(&self.name, status, &body));
        }

        let response: ChatResponse = response
            .json()
            .map_err(|e| malformed(&self.name, format!("undecodable response: {e}")))?;

        Ok(response.message.content)
    }
}

/// Request to the chat API.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: &'a str,
}

/// A chat message.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response from the chat API.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}
