//! Subcommand handlers: load Parquet, run a stage, save Parquet, report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use topicfold_ai::{
    ChatCompletionsClient, Classifier, CompletionClient, Condenser, DispatchConfig,
    HeuristicTokenCounter, ModelOptions, ModelSettings, RetryingExecutor, StageOutput,
    Summarizer, TokenCounter, TopicModeler,
};
use topicfold_core::{DailyLog, Dataset, StageReport};
use tracing::info;

use crate::{ClassifyArgs, CondenseArgs, IoArgs, ModelArgs, ServiceArgs, SummarizeArgs};

/// Everything a subcommand needs to talk to the service.
pub(crate) struct Context {
    executor: Arc<RetryingExecutor>,
    settings: ModelSettings,
    dispatch: DispatchConfig,
}

impl Context {
    pub(crate) fn new(service: &ServiceArgs, log_dir: &Path) -> anyhow::Result<Self> {
        let log = Arc::new(DailyLog::open(log_dir)?);
        let client: Arc<dyn CompletionClient> = match &service.azure_api_version {
            Some(version) => Arc::new(ChatCompletionsClient::azure(
                &service.endpoint,
                service.api_key.clone(),
                version.clone(),
            )),
            None => Arc::new(ChatCompletionsClient::openai(
                &service.endpoint,
                service.api_key.clone(),
            )),
        };
        let executor = RetryingExecutor::new(client)
            .with_policy(service.retry())
            .with_log(log);
        info!(
            endpoint = %service.endpoint,
            model = %service.model,
            workers = service.workers,
            "service configured"
        );
        Ok(Self {
            executor: Arc::new(executor),
            settings: service.settings(),
            dispatch: service.dispatch(),
        })
    }
}

fn load(io: &IoArgs) -> anyhow::Result<Dataset> {
    topicfold_store::load_dataset(&io.input, io.id_column.as_deref())
        .with_context(|| format!("reading {}", io.input.display()))
}

fn save(path: &Path, dataset: &Dataset) -> anyhow::Result<()> {
    topicfold_store::save_dataset(path, dataset)
        .with_context(|| format!("writing {}", path.display()))
}

fn print_report(report: &StageReport) {
    eprintln!("  {report}");
}

fn print_stage(output: &StageOutput) {
    print_report(&output.report);
    for row in &output.dropped {
        eprintln!("    dropped row {}: {}", row.row_id, row.failure);
    }
}

fn print_labels(labels: &[String]) {
    for (rank, label) in labels.iter().enumerate() {
        println!("{}. {label}", rank + 1);
    }
}

fn token_counter(tokenizer: Option<&PathBuf>) -> anyhow::Result<Arc<dyn TokenCounter>> {
    match tokenizer {
        None => Ok(Arc::new(HeuristicTokenCounter::default())),
        #[cfg(feature = "tokenizers")]
        Some(path) => Ok(Arc::new(topicfold_ai::HfTokenCounter::load(path)?)),
        #[cfg(not(feature = "tokenizers"))]
        Some(path) => anyhow::bail!(
            "--tokenizer {} needs topicfold built with the `tokenizers` feature",
            path.display()
        ),
    }
}

fn read_labels(args: &ClassifyArgs) -> anyhow::Result<Vec<String>> {
    let raw: Vec<String> = match &args.labels_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading labels from {}", path.display()))?
            .lines()
            .map(String::from)
            .collect(),
        None => args.labels.clone(),
    };
    Ok(raw
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

pub(crate) async fn summarize(ctx: &Context, args: SummarizeArgs) -> anyhow::Result<()> {
    let dataset = load(&args.io)?;
    let output = Summarizer::new(Arc::clone(&ctx.executor), ctx.settings.clone())
        .with_columns(args.text_column, args.summary_column)
        .with_dispatch(ctx.dispatch.clone())
        .run(&dataset)
        .await
        .context("summarize")?;
    save(&args.output, &output.dataset)?;
    print_stage(&output);
    Ok(())
}

pub(crate) async fn condense(ctx: &Context, args: CondenseArgs) -> anyhow::Result<()> {
    let dataset = load(&args.io)?;
    let condenser = Condenser::new(
        Arc::clone(&ctx.executor),
        token_counter(args.opts.tokenizer.as_ref())?,
        ctx.settings.clone(),
        args.opts.config(),
    )?;
    let condensed = condenser
        .condense_column(&dataset, &args.column)
        .await
        .context("condense")?;
    if let Some(path) = &args.output {
        let mut text = condensed.labels.join("\n");
        text.push('\n');
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    }
    print_report(&condensed.report);
    eprintln!("  sample size {}", condensed.sample_size);
    print_labels(&condensed.labels);
    Ok(())
}

pub(crate) async fn classify(ctx: &Context, args: ClassifyArgs) -> anyhow::Result<()> {
    let labels = read_labels(&args)?;
    let dataset = load(&args.io)?;
    let output = Classifier::new(Arc::clone(&ctx.executor), ctx.settings.clone(), labels)?
        .with_category(args.category)
        .with_columns(args.text_column, args.topic_column)
        .with_dispatch(ctx.dispatch.clone())
        .run(&dataset)
        .await
        .context("classify")?;
    save(&args.output, &output.dataset)?;
    print_stage(&output);
    Ok(())
}

pub(crate) async fn model(ctx: &Context, args: ModelArgs) -> anyhow::Result<()> {
    let dataset = load(&args.io)?;
    let modeler = TopicModeler::new(
        Arc::clone(&ctx.executor),
        token_counter(args.opts.tokenizer.as_ref())?,
        ctx.settings.clone(),
    );
    let options = ModelOptions {
        target_column: args.text_column,
        topic_column: args.topic_column,
        summary_column: args.summary_column,
        category: args.category,
        summarize_first: args.summarize,
        dispatch: ctx.dispatch.clone(),
        condense: args.opts.config(),
    };
    let run = modeler
        .model_column(&dataset, &options)
        .await
        .context("topic modeling")?;
    save(&args.output, &run.dataset)?;
    for report in &run.reports {
        print_report(report);
    }
    print_labels(&run.labels);
    Ok(())
}
