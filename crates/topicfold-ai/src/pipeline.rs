//! End-to-end topic modeling: summarize (optional), condense, classify.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use topicfold_core::{Category, Dataset, StageReport};
use tracing::info;

use crate::client::ModelSettings;
use crate::condense::{CondenseConfig, Condenser};
use crate::dispatch::{DispatchConfig, DroppedRow};
use crate::error::{PipelineError, StageError};
use crate::executor::RetryingExecutor;
use crate::stages::{
    Classifier, DEFAULT_SUMMARY_COLUMN, DEFAULT_TEXT_COLUMN, DEFAULT_TOPIC_COLUMN, Summarizer,
};
use crate::tokens::TokenCounter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Column holding the raw text.
    pub target_column: String,
    /// Column the assigned label is written to.
    pub topic_column: String,
    pub summary_column: String,
    pub category: Category,
    /// Summarize first, then condense and classify the summaries.
    pub summarize_first: bool,
    pub dispatch: DispatchConfig,
    pub condense: CondenseConfig,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            target_column: DEFAULT_TEXT_COLUMN.to_string(),
            topic_column: DEFAULT_TOPIC_COLUMN.to_string(),
            summary_column: DEFAULT_SUMMARY_COLUMN.to_string(),
            category: Category::Topic,
            summarize_first: false,
            dispatch: DispatchConfig::default(),
            condense: CondenseConfig::default(),
        }
    }
}

/// Annotated dataset plus everything learned along the way.
#[derive(Debug)]
pub struct ModelRun {
    pub dataset: Dataset,
    pub labels: Vec<String>,
    /// One report per stage, in run order.
    pub reports: Vec<StageReport>,
    /// Rows dropped by any stage.
    pub dropped: Vec<DroppedRow>,
}

pub struct TopicModeler {
    executor: Arc<RetryingExecutor>,
    tokens: Arc<dyn TokenCounter>,
    settings: ModelSettings,
}

impl TopicModeler {
    pub fn new(
        executor: Arc<RetryingExecutor>,
        tokens: Arc<dyn TokenCounter>,
        settings: ModelSettings,
    ) -> Self {
        Self {
            executor,
            tokens,
            settings,
        }
    }

    pub async fn model_column(
        &self,
        dataset: &Dataset,
        options: &ModelOptions,
    ) -> Result<ModelRun, PipelineError> {
        dataset.require_column(&options.target_column).map_err(StageError::from)?;

        let mut reports = Vec::with_capacity(3);
        let mut dropped = Vec::new();

        let (dataset, text_column) = if options.summarize_first {
            let out = Summarizer::new(Arc::clone(&self.executor), self.settings.clone())
                .with_columns(&options.target_column, &options.summary_column)
                .with_dispatch(options.dispatch.clone())
                .run(dataset)
                .await?;
            reports.push(out.report);
            dropped.extend(out.dropped);
            (out.dataset, options.summary_column.as_str())
        } else {
            (dataset.clone(), options.target_column.as_str())
        };

        let condenser = Condenser::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.tokens),
            self.settings.clone(),
            options.condense.clone(),
        )?;
        let condensed = condenser.condense_column(&dataset, text_column).await?;
        reports.push(condensed.report);

        let out = Classifier::new(
            Arc::clone(&self.executor),
            self.settings.clone(),
            condensed.labels.clone(),
        )?
        .with_category(options.category)
        .with_columns(text_column, &options.topic_column)
        .with_dispatch(options.dispatch.clone())
        .run(&dataset)
        .await?;
        reports.push(out.report);
        dropped.extend(out.dropped);

        info!(
            rows = out.dataset.len(),
            labels = condensed.labels.len(),
            dropped = dropped.len(),
            "modeling finished"
        );
        Ok(ModelRun {
            dataset: out.dataset,
            labels: condensed.labels,
            reports,
            dropped,
        })
    }
}
