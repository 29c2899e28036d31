//! Embedding generation.
//!
//! Provides a deterministic local hash embedder and an `OpenAI`-compatible
//! HTTP embedder behind one trait.

mod hash;
mod openai;

pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;

use crate::Result;
use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::llm::{LlmHttpConfig, env_lookup, resolve_api_key};
use std::sync::Arc;

/// Default embedding dimensions.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Trait for embedding generators.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine similarity of two vectors in `[-1, 1]`.
///
/// Mismatched lengths and zero vectors score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Builds the configured embedder.
#[must_use]
pub fn build_embedder(config: &EmbeddingConfig, http: LlmHttpConfig) -> Arc<dyn Embedder> {
    match config.provider {
        EmbeddingProviderKind::Hash => Arc::new(HashEmbedder::new(config.dimensions)),
        EmbeddingProviderKind::OpenAi => {
            let mut embedder = OpenAiEmbedder::new(config.dimensions)
                .without_api_key()
                .with_http_config(http);
            let api_key = resolve_api_key(
                config.api_key_env.as_deref(),
                config.base_url.as_deref(),
                OpenAiEmbedder::DEFAULT_KEY_ENV,
                env_lookup,
            );
            if let Some(key) = api_key {
                embedder = embedder.with_api_key(key);
            }
            if let Some(model) = &config.model {
                embedder = embedder.with_model(model);
            }
            if let Some(url) = &config.base_url {
                embedder = embedder.with_endpoint(url);
            }
            Arc::new(embedder)
        },
    }
}
