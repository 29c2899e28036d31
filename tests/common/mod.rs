//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use signalgate::config::PipelineConfig;
use signalgate::{Embedder, Error, Forwarder, SignalRecord};
use signalgate::llm::AnalysisProvider;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Configuration with near-zero backoff and no deep-tier spacing.
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.analysis.backoff_base_ms = 1;
    config.analysis.backoff_max_ms = 2;
    config.analysis.deep_min_interval_ms = 0;
    config.analysis.call_timeout_ms = 2_000;
    config.semantic.backoff_ms = 1;
    config
}

/// What a scripted provider does on each call.
#[derive(Clone)]
pub enum Reply {
    /// Returns an analysis JSON with this confidence.
    Analysis {
        confidence: f32,
        event_type: &'static str,
        asset: &'static str,
        action: &'static str,
    },
    /// Fails with a retryable error.
    Transient,
    /// Fails with a non-retryable error.
    Permanent,
    /// Returns text that is not an analysis.
    Garbage,
}

impl Reply {
    pub const fn listing(confidence: f32) -> Self {
        Self::Analysis {
            confidence,
            event_type: "listing",
            asset: "SOL",
            action: "observe",
        }
    }
}

/// Provider answering every call the same way and recording the prompts.
pub struct ScriptedProvider {
    name: String,
    reply: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl AnalysisProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, _system: &str, user: &str) -> signalgate::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user.to_string());
        match &self.reply {
            Reply::Analysis {
                confidence,
                event_type,
                asset,
                action,
            } => Ok(format!(
                "```json\n{{\"summary\": \"scripted by {}\", \"event_type\": \"{event_type}\", \
                 \"asset\": \"{asset}\", \"action\": \"{action}\", \"confidence\": {confidence}, \
                 \"risk_flags\": []}}\n```",
                self.name
            )),
            Reply::Transient => Err(Error::TransientProvider {
                provider: self.name.clone(),
                cause: "503 service unavailable".to_string(),
            }),
            Reply::Permanent => Err(Error::PermanentProvider {
                provider: self.name.clone(),
                cause: "401 unauthorized".to_string(),
            }),
            Reply::Garbage => Ok("I cannot help with that.".to_string()),
        }
    }
}

/// Embedder with fixed vectors per text; unknown texts map to a default axis.
pub struct ScriptedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    fail: bool,
}

impl ScriptedEmbedder {
    pub fn new(vectors: Vec<(&str, Vec<f32>)>, fallback: Vec<f32>) -> Self {
        Self {
            vectors: vectors
                .into_iter()
                .map(|(text, v)| (text.to_string(), v))
                .collect(),
            fallback,
            fail: false,
        }
    }

    pub fn failing(dimensions: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            fallback: vec![0.0; dimensions],
            fail: true,
        }
    }
}

impl Embedder for ScriptedEmbedder {
    fn dimensions(&self) -> usize {
        self.fallback.len()
    }

    fn embed(&self, text: &str) -> signalgate::Result<Vec<f32>> {
        if self.fail {
            return Err(Error::DedupBackendUnavailable {
                backend: "scripted".to_string(),
                cause: "connection refused".to_string(),
            });
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Forwarder keeping every record it receives.
#[derive(Default)]
pub struct CollectingForwarder {
    records: Mutex<Vec<SignalRecord>>,
}

impl CollectingForwarder {
    pub fn records(&self) -> Vec<SignalRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl Forwarder for CollectingForwarder {
    fn forward(&self, record: &SignalRecord) -> signalgate::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
