//! Binary entry point for signalgate.
//!
//! Reads JSON-lines message envelopes, runs them through the pipeline and
//! writes forwarded signal records to stdout as JSON lines.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use signalgate::config::PipelineConfig;
use signalgate::embedding::build_embedder;
use signalgate::llm::LlmHttpConfig;
use signalgate::observability::{self, ObservabilityConfig};
use signalgate::storage::{InMemoryVectorStore, JsonLinesForwarder, SqliteSignalStore};
use signalgate::services::SignalPipelineBuilder;
use signalgate::{MessageEnvelope, SignalPipeline, SignalSink};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Signalgate - deduplication and analysis escalation for message streams.
#[derive(Parser)]
#[command(name = "signalgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "SIGNALGATE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Process JSON-lines envelopes and emit forwarded signals.
    Run {
        /// Input file (defaults to stdin).
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let expose_metrics = matches!(cli.command, Commands::Run { .. });
    let observability_config =
        ObservabilityConfig::from_settings(&config, cli.verbose, expose_metrics);
    let _observability = match observability::init(observability_config) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    let result = match cli.command {
        Commands::Run { input } => cmd_run(config, input).await,
        Commands::Config => cmd_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration from an explicit path or the default location.
fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::load_default(),
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Prints the effective configuration.
fn cmd_config(config: &PipelineConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Runs the pipeline over an input stream.
async fn cmd_run(config: PipelineConfig, input: Option<PathBuf>) -> anyhow::Result<()> {
    let http = LlmHttpConfig::with_timeout_ms(config.analysis.call_timeout_ms);
    let embedder = build_embedder(&config.embedding, http);
    let vector_store = Arc::new(InMemoryVectorStore::with_retention(
        embedder.dimensions(),
        config.semantic.horizon(),
        config.semantic.capacity,
    ));

    let mut builder = SignalPipeline::builder(config.clone())
        .embedder(embedder)
        .vector_store(vector_store)
        .forwarder(Arc::new(JsonLinesForwarder::stdout()));

    if let Some(path) = &config.storage.sqlite_path {
        builder = attach_signal_store(builder, path)?;
    }

    let pipeline = Arc::new(builder.build()?);
    let (sender, receiver) = mpsc::channel(config.analysis.fast_concurrency.max(1) * 4);

    let reader = tokio::spawn(async move {
        match input {
            Some(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?;
                read_envelopes(BufReader::new(file), sender).await
            },
            None => read_envelopes(BufReader::new(tokio::io::stdin()), sender).await,
        }
    });

    let summary = pipeline.run(receiver).await;
    let read = reader.await.context("input reader task panicked")??;

    tracing::info!(
        read,
        forwarded = summary.forwarded,
        skipped = summary.skipped,
        failed = summary.failed,
        reasons = ?summary.by_reason,
        "Run complete"
    );
    Ok(())
}

/// Opens the SQLite signal store as both persistence sink and keyword memory.
fn attach_signal_store(
    builder: SignalPipelineBuilder,
    path: &Path,
) -> anyhow::Result<SignalPipelineBuilder> {
    let store = Arc::new(
        SqliteSignalStore::open(path)
            .with_context(|| format!("opening signal store {}", path.display()))?,
    );
    let sink: Arc<dyn SignalSink> = store.clone();
    Ok(builder.sink(sink).memory_backend(store))
}

/// Feeds parsed envelopes into the pipeline channel.
///
/// Blank lines are ignored and unparseable lines are logged and skipped.
/// Returns the number of envelopes sent.
async fn read_envelopes<R>(reader: R, sender: mpsc::Sender<MessageEnvelope>) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0usize;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("reading input")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MessageEnvelope>(&line) {
            Ok(envelope) => {
                if sender.send(envelope).await.is_err() {
                    break;
                }
                sent += 1;
            },
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed envelope");
            },
        }
    }
    Ok(sent)
}
