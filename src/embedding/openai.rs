//! `OpenAI`-compatible `/embeddings` client.

use super::Embedder;
use crate::llm::{LlmHttpConfig, build_http_client};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// HTTP embedder.
pub struct OpenAiEmbedder {
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    dimensions: usize,
    client: reqwest::blocking::Client,
}

impl OpenAiEmbedder {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "text-embedding-3-small";

    /// Default API key variable.
    pub const DEFAULT_KEY_ENV: &'static str = "OPENAI_API_KEY";

    /// Creates an embedder reading the key from `OPENAI_API_KEY`.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            api_key: std::env::var(Self::DEFAULT_KEY_ENV).ok().map(SecretString::from),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            dimensions,
            client: build_http_client(LlmHttpConfig::default()),
        }
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

    /// Returns true if the embedder holds an API key.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Sets the endpoint.
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

    fn unavailable(cause: impl Into<String>) -> Error {
        Error::DedupBackendUnavailable {
            backend: "openai-embeddings".to_string(),
            cause: cause.into(),
        }
    }
}

impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimensions,
        };

        let mut builder = self.client.post(format!("{}/embeddings", self.endpoint));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = builder
            .json(&request)
            .send()
            .map_err(|e| Self::unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Self::unavailable(format!("status {status}: {body}")));
        }

        let response: EmbeddingResponse = response
            .json()
            .map_err(|e| Self::unavailable(format!("undecodable response: {e}")))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Self::unavailable("empty embedding response"))?;

        if embedding.len() != self.dimensions {
            return Err(Self::unavailable(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
