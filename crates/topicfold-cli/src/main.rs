use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use topicfold_ai::{
    CondenseConfig, DEFAULT_SUMMARY_COLUMN, DEFAULT_TEXT_COLUMN, DEFAULT_TOPIC_COLUMN,
    DispatchConfig, ModelSettings, RetryPolicy,
};
use topicfold_core::Category;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "topicfold")]
#[command(about = "LLM batch annotation of Parquet datasets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    service: ServiceArgs,

    /// Directory for the dated run log
    #[arg(long, global = true, default_value = "./logs", env = "TOPICFOLD_LOG_DIR")]
    log_dir: PathBuf,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Connection and call settings shared by every subcommand.
#[derive(Args)]
struct ServiceArgs {
    /// Base URL (OpenAI style) or resource endpoint (Azure)
    #[arg(long, global = true, env = "TOPICFOLD_ENDPOINT", default_value = "https://api.openai.com/v1")]
    endpoint: String,

    #[arg(long, global = true, env = "TOPICFOLD_API_KEY", hide_env_values = true, default_value = "")]
    api_key: String,

    /// Model name (the deployment name on Azure)
    #[arg(long, global = true, env = "TOPICFOLD_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// Talk to Azure OpenAI with this api-version
    #[arg(long, global = true, env = "TOPICFOLD_AZURE_API_VERSION")]
    azure_api_version: Option<String>,

    #[arg(long, global = true, default_value_t = 0.0)]
    temperature: f32,

    /// Reply budget for per-row calls
    #[arg(long, global = true, default_value_t = 1000)]
    max_reply_tokens: u32,

    /// Rows in flight at once
    #[arg(long, global = true, default_value_t = 5, env = "TOPICFOLD_WORKERS")]
    workers: usize,

    /// Attempts per call before a rate-limited row is given up
    #[arg(long, global = true, default_value_t = 8)]
    max_attempts: u32,

    /// Backoff unit in milliseconds
    #[arg(long, global = true, default_value_t = 1000)]
    base_delay_ms: u64,
}

impl ServiceArgs {
    fn settings(&self) -> ModelSettings {
        ModelSettings::new(&self.model)
            .with_temperature(self.temperature)
            .with_max_reply_tokens(self.max_reply_tokens)
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: self.base_delay_ms,
            max_attempts: self.max_attempts,
        }
    }

    fn dispatch(&self) -> DispatchConfig {
        DispatchConfig::with_workers(self.workers)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a short primary-topic summary for every row
    Summarize(SummarizeArgs),

    /// Derive a ranked label set from a text column
    Condense(CondenseArgs),

    /// Assign every row one label from a given list
    Classify(ClassifyArgs),

    /// Condense a column into labels, then classify every row with them
    Model(ModelArgs),
}

#[derive(Args)]
struct IoArgs {
    /// Input Parquet file
    #[arg(short, long)]
    input: PathBuf,

    /// Integer column holding stable row ids (default: a saved `row_id` column, else positional)
    #[arg(long)]
    id_column: Option<String>,
}

#[derive(Args)]
struct SummarizeArgs {
    #[command(flatten)]
    io: IoArgs,

    /// Output Parquet file
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value = DEFAULT_TEXT_COLUMN)]
    text_column: String,

    #[arg(long, default_value = DEFAULT_SUMMARY_COLUMN)]
    summary_column: String,
}

#[derive(Args)]
struct CondenseOpts {
    /// Maximum number of labels
    #[arg(long, default_value_t = 15)]
    num_topics: usize,

    /// Ask for subtopics of this topic
    #[arg(long)]
    parent_topic: Option<String>,

    /// Token budget per reduction input
    #[arg(long, default_value_t = 20_000)]
    max_input_tokens: usize,

    /// Reply budget for reduction calls
    #[arg(long, default_value_t = 4000)]
    condense_reply_tokens: u32,

    /// Sampling seed, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// tokenizer.json used to size reduction inputs
    #[arg(long)]
    tokenizer: Option<PathBuf>,
}

impl CondenseOpts {
    fn config(&self) -> CondenseConfig {
        CondenseConfig {
            num_topics: self.num_topics,
            parent_topic: self.parent_topic.clone(),
            max_input_tokens: self.max_input_tokens,
            max_reply_tokens: self.condense_reply_tokens,
            seed: self.seed,
        }
    }
}

#[derive(Args)]
struct CondenseArgs {
    #[command(flatten)]
    io: IoArgs,

    #[arg(long, default_value = DEFAULT_TOPIC_COLUMN)]
    column: String,

    #[command(flatten)]
    opts: CondenseOpts,

    /// Also write the labels here, one per line
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ClassifyArgs {
    #[command(flatten)]
    io: IoArgs,

    #[arg(short, long)]
    output: PathBuf,

    /// Comma-separated labels
    #[arg(long, value_delimiter = ',', required_unless_present = "labels_file")]
    labels: Vec<String>,

    /// File with one label per line
    #[arg(long, conflicts_with = "labels")]
    labels_file: Option<PathBuf>,

    /// topic or subtopic
    #[arg(long, default_value = "topic")]
    category: Category,

    #[arg(long, default_value = DEFAULT_TEXT_COLUMN)]
    text_column: String,

    #[arg(long, default_value = DEFAULT_TOPIC_COLUMN)]
    topic_column: String,
}

#[derive(Args)]
struct ModelArgs {
    #[command(flatten)]
    io: IoArgs,

    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value = DEFAULT_TEXT_COLUMN)]
    text_column: String,

    #[arg(long, default_value = DEFAULT_TOPIC_COLUMN)]
    topic_column: String,

    /// Summarize rows first and model the summaries
    #[arg(long)]
    summarize: bool,

    #[arg(long, default_value = DEFAULT_SUMMARY_COLUMN)]
    summary_column: String,

    /// topic or subtopic
    #[arg(long, default_value = "topic")]
    category: Category,

    #[command(flatten)]
    opts: CondenseOpts,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::info!("topicfold v{}", env!("CARGO_PKG_VERSION"));

    let ctx = commands::Context::new(&cli.service, &cli.log_dir)
        .with_context(|| format!("setting up run log in {}", cli.log_dir.display()))?;

    match cli.command {
        Commands::Summarize(args) => commands::summarize(&ctx, args).await,
        Commands::Condense(args) => commands::condense(&ctx, args).await,
        Commands::Classify(args) => commands::classify(&ctx, args).await,
        Commands::Model(args) => commands::model(&ctx, args).await,
    }
}
