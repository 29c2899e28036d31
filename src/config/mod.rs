//! Configuration management.
//!
//! Configuration is read from TOML and then overridden by `SIGNALGATE_*`
//! environment variables. Every section has defaults, so an empty file (or
//! no file) is a valid configuration.
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SIGNALGATE_EXACT_HORIZON_SECS` | `dedup.exact_horizon_secs` |
//! | `SIGNALGATE_SEMANTIC_ENABLED` | `semantic.enabled` |
//! | `SIGNALGATE_SEMANTIC_MAX_DISTANCE` | `semantic.max_distance` |
//! | `SIGNALGATE_SEMANTIC_HORIZON_SECS` | `semantic.horizon_secs` |
//! | `SIGNALGATE_SIGNAL_THRESHOLD` | `signal.similarity_threshold` |
//! | `SIGNALGATE_SIGNAL_WINDOW_SECS` | `signal.window_secs` |
//! | `SIGNALGATE_ESCALATION_THRESHOLD` | `analysis.escalation_threshold` |
//! | `SIGNALGATE_FAST_CONCURRENCY` | `analysis.fast_concurrency` |
//! | `SIGNALGATE_DEEP_CONCURRENCY` | `analysis.deep_concurrency` |
//! | `SIGNALGATE_DEEP_MIN_INTERVAL_MS` | `analysis.deep_min_interval_ms` |
//! | `SIGNALGATE_FORWARD_UNANALYZED` | `analysis.forward_unanalyzed` |
//! | `SIGNALGATE_LOG_LEVEL` | `logging.level` |
//! | `SIGNALGATE_LOG_FORMAT` | `logging.format` |
//! | `SIGNALGATE_METRICS_ENABLED` | `metrics.enabled` |
//! | `SIGNALGATE_METRICS_PORT` | `metrics.port` |

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ingest normalization.
    pub ingest: IngestConfig,
    /// Exact fingerprint cache.
    pub dedup: ExactDedupConfig,
    /// Semantic fingerprint service.
    pub semantic: SemanticConfig,
    /// Signal fingerprint matcher.
    pub signal: SignalMatchConfig,
    /// Memory context coordinator.
    pub memory: MemoryConfig,
    /// Analysis router.
    pub analysis: AnalysisConfig,
    /// Embedding provider.
    pub embedding: EmbeddingConfig,
    /// Persistence.
    pub storage: StorageConfig,
    /// Logging.
    pub logging: LoggingSettings,
    /// Metrics exporter.
    pub metrics: MetricsSettings,
}

/// Ingest normalizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum characters sent to analysis providers.
    pub max_analysis_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_analysis_chars: 4000,
        }
    }
}

/// Exact fingerprint cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExactDedupConfig {
    /// Horizon within which identical canonical text is a duplicate.
    pub exact_horizon_secs: u64,
    /// Size ceiling; oldest entries are evicted first.
    pub exact_capacity: usize,
}

impl Default for ExactDedupConfig {
    fn default() -> Self {
        Self {
            exact_horizon_secs: 3 * 60 * 60,
            exact_capacity: 10_000,
        }
    }
}

impl ExactDedupConfig {
    /// Horizon as a chrono duration.
    #[must_use]
    pub fn horizon(&self) -> chrono::Duration {
        chrono_secs(self.exact_horizon_secs)
    }
}

/// Semantic fingerprint service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Disables both semantic passes when false.
    pub enabled: bool,
    /// Maximum cosine distance for a match.
    pub max_distance: f32,
    /// Horizon relative to the incoming message.
    pub horizon_secs: u64,
    /// Timeout for each embed or query call.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff between retries.
    pub backoff_ms: u64,
    /// Maximum candidates requested from the store.
    pub search_limit: usize,
    /// Size ceiling of the in-process vector store.
    pub capacity: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_distance: 0.15,
            horizon_secs: 60 * 60,
            timeout_ms: 5000,
            max_retries: 1,
            backoff_ms: 200,
            search_limit: 5,
            capacity: 10_000,
        }
    }
}

impl SemanticConfig {
    /// Horizon as a chrono duration.
    #[must_use]
    pub fn horizon(&self) -> chrono::Duration {
        chrono_secs(self.horizon_secs)
    }
}

/// Signal fingerprint matcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalMatchConfig {
    /// Minimum sequence similarity ratio of normalized text.
    pub similarity_threshold: f32,
    /// Minimum count of distinct characters shared by both texts.
    pub min_shared_chars: usize,
    /// Trailing recency window.
    pub window_secs: u64,
    /// Maximum signals kept in the recent window.
    pub capacity: usize,
    /// Characters of normalized text compared per signal.
    pub max_compare_chars: usize,
}

impl Default for SignalMatchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.80,
            min_shared_chars: 10,
            window_secs: 6 * 60 * 60,
            capacity: 1000,
            max_compare_chars: 1000,
        }
    }
}

impl SignalMatchConfig {
    /// Window as a chrono duration.
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        chrono_secs(self.window_secs)
    }
}

/// Which memory backends are queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// Vector first, keyword fallback below the floor.
    #[default]
    Vector,
    /// Keyword only.
    Keyword,
    /// Both, merged.
    Hybrid,
}

/// How vector and keyword hits are merged when both are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// All vector hits, then keyword hits fill the remainder.
    #[default]
    VectorFirst,
    /// Alternate vector and keyword hits, vector first.
    Interleave,
}

/// Memory context coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Backend selection.
    pub mode: MemoryMode,
    /// Merge policy.
    pub merge: MergePolicy,
    /// Vector hit count below which keyword search fills in.
    pub min_vector_hits: usize,
    /// Context size for fast analysis.
    pub fast_limit: usize,
    /// Context size for deep analysis.
    pub deep_limit: usize,
    /// Timeout per backend call.
    pub timeout_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mode: MemoryMode::Vector,
            merge: MergePolicy::VectorFirst,
            min_vector_hits: 2,
            fast_limit: 3,
            deep_limit: 8,
            timeout_ms: 3000,
        }
    }
}

/// Supported analysis provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Anthropic,
    /// `OpenAI` chat completions.
    #[serde(rename = "openai")]
    OpenAi,
    /// LM Studio (OpenAI-compatible, local).
    #[serde(rename = "lmstudio", alias = "lm_studio")]
    LmStudio,
    /// Ollama chat.
    Ollama,
}

impl ProviderKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::LmStudio => "lmstudio",
            Self::Ollama => "ollama",
        }
    }
}

/// One entry in a provider fallback list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider kind.
    pub kind: ProviderKind,
    /// Identifier used in logs and records; defaults to the kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Model name; each client has a default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ProviderSpec {
    /// Creates a spec with client defaults.
    #[must_use]
    pub const fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            name: None,
            model: None,
            base_url: None,
            api_key_env: None,
        }
    }

    /// Identifier for this provider.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.kind.as_str())
    }
}

/// Analysis router settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum fast confidence (inclusive) that triggers deep analysis.
    pub escalation_threshold: f32,
    /// Event types never escalated.
    pub excluded_event_types: Vec<String>,
    /// Forward messages no provider could analyze.
    pub forward_unanalyzed: bool,
    /// Minimum terminal confidence for analyzed messages to be forwarded.
    pub min_forward_confidence: f32,
    /// Global ceiling on concurrent pipeline passes and fast calls.
    pub fast_concurrency: usize,
    /// Ceiling on concurrent deep calls.
    pub deep_concurrency: usize,
    /// Minimum interval between deep call starts.
    pub deep_min_interval_ms: u64,
    /// Timeout per provider call.
    pub call_timeout_ms: u64,
    /// Fast-tier retries per provider after the first attempt.
    pub fast_max_retries: u32,
    /// Deep-tier retries per provider after the first attempt.
    pub deep_max_retries: u32,
    /// Base exponential backoff.
    pub backoff_base_ms: u64,
    /// Backoff ceiling.
    pub backoff_max_ms: u64,
    /// Ordered fast-tier providers.
    pub fast_providers: Vec<ProviderSpec>,
    /// Ordered deep-tier providers.
    pub deep_providers: Vec<ProviderSpec>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 0.75,
            excluded_event_types: Vec::new(),
            forward_unanalyzed: true,
            min_forward_confidence: 0.0,
            fast_concurrency: 8,
            deep_concurrency: 2,
            deep_min_interval_ms: 1500,
            call_timeout_ms: 30_000,
            fast_max_retries: 2,
            deep_max_retries: 1,
            backoff_base_ms: 250,
            backoff_max_ms: 4000,
            fast_providers: Vec::new(),
            deep_providers: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    /// Minimum deep-tier call interval.
    #[must_use]
    pub const fn deep_min_interval(&self) -> Duration {
        Duration::from_millis(self.deep_min_interval_ms)
    }
}

/// Embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// Deterministic local hash embedding.
    #[default]
    Hash,
    /// `OpenAI`-compatible `/embeddings` endpoint.
    #[serde(rename = "openai")]
    OpenAi,
}

/// Embedding provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend.
    pub provider: EmbeddingProviderKind,
    /// Model name for remote providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Endpoint override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Vector dimensions.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            model: None,
            base_url: None,
            api_key_env: None,
            dimensions: 384,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database; enables signal persistence and keyword memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Optional log file (appended).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Installs the Prometheus exporter when true.
    pub enabled: bool,
    /// Listener port.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir and then `~/.config/signalgate/`.
    /// Returns defaults when no readable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("signalgate").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("signalgate")
                .join("config.toml"),
        ];

        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                },
            }
        }

        Self::default()
    }

    /// Applies `SIGNALGATE_*` environment overrides.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        override_from_env("SIGNALGATE_EXACT_HORIZON_SECS", &mut self.dedup.exact_horizon_secs);
        override_bool_from_env("SIGNALGATE_SEMANTIC_ENABLED", &mut self.semantic.enabled);
        override_from_env("SIGNALGATE_SEMANTIC_MAX_DISTANCE", &mut self.semantic.max_distance);
        override_from_env("SIGNALGATE_SEMANTIC_HORIZON_SECS", &mut self.semantic.horizon_secs);
        override_from_env("SIGNALGATE_SIGNAL_THRESHOLD", &mut self.signal.similarity_threshold);
        override_from_env("SIGNALGATE_SIGNAL_WINDOW_SECS", &mut self.signal.window_secs);
        override_from_env(
            "SIGNALGATE_ESCALATION_THRESHOLD",
            &mut self.analysis.escalation_threshold,
        );
        override_from_env("SIGNALGATE_FAST_CONCURRENCY", &mut self.analysis.fast_concurrency);
        override_from_env("SIGNALGATE_DEEP_CONCURRENCY", &mut self.analysis.deep_concurrency);
        override_from_env(
            "SIGNALGATE_DEEP_MIN_INTERVAL_MS",
            &mut self.analysis.deep_min_interval_ms,
        );
        override_bool_from_env(
            "SIGNALGATE_FORWARD_UNANALYZED",
            &mut self.analysis.forward_unanalyzed,
        );
        if let Ok(level) = std::env::var("SIGNALGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        override_from_env("SIGNALGATE_LOG_FORMAT", &mut self.logging.format);
        override_bool_from_env("SIGNALGATE_METRICS_ENABLED", &mut self.metrics.enabled);
        override_from_env("SIGNALGATE_METRICS_PORT", &mut self.metrics.port);
        self
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        check_unit("semantic.max_distance", self.semantic.max_distance)?;
        check_unit("signal.similarity_threshold", self.signal.similarity_threshold)?;
        check_unit("analysis.escalation_threshold", self.analysis.escalation_threshold)?;
        check_unit(
            "analysis.min_forward_confidence",
            self.analysis.min_forward_confidence,
        )?;
        check_nonzero("dedup.exact_capacity", self.dedup.exact_capacity)?;
        check_nonzero("semantic.capacity", self.semantic.capacity)?;
        check_nonzero("signal.capacity", self.signal.capacity)?;
        check_nonzero("analysis.fast_concurrency", self.analysis.fast_concurrency)?;
        check_nonzero("analysis.deep_concurrency", self.analysis.deep_concurrency)?;
        check_nonzero("embedding.dimensions", self.embedding.dimensions)?;
        check_nonzero("ingest.max_analysis_chars", self.ingest.max_analysis_chars)?;
        check_nonzero("signal.max_compare_chars", self.signal.max_compare_chars)?;
        check_horizon("dedup.exact_horizon_secs", self.dedup.exact_horizon_secs)?;
        check_horizon("semantic.horizon_secs", self.semantic.horizon_secs)?;
        check_horizon("signal.window_secs", self.signal.window_secs)?;
        if self.analysis.deep_concurrency > self.analysis.fast_concurrency {
            return Err(Error::InvalidInput(format!(
                "analysis.deep_concurrency ({}) must not exceed analysis.fast_concurrency ({})",
                self.analysis.deep_concurrency, self.analysis.fast_concurrency
            )));
        }
        Ok(())
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::OperationFailed {
            operation: "serialize_config".to_string(),
            cause: e.to_string(),
        })
    }
}

/// Longest accepted dedup horizon or window: ten years.
pub const MAX_HORIZON_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn chrono_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn check_horizon(field: &str, secs: u64) -> Result<()> {
    if secs > MAX_HORIZON_SECS {
        Err(Error::InvalidInput(format!(
            "{field} must be at most {MAX_HORIZON_SECS} seconds, got {secs}"
        )))
    } else {
        Ok(())
    }
}

fn check_unit(field: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{field} must be within [0, 1], got {value}"
        )))
    }
}

fn check_nonzero(field: &str, value: usize) -> Result<()> {
    if value == 0 {
        Err(Error::InvalidInput(format!("{field} must be greater than 0")))
    } else {
        Ok(())
    }
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}

fn override_bool_from_env(key: &str, target: &mut bool) {
    if let Ok(raw) = std::env::var(key) {
        *target = !matches!(raw.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off");
    }
}
