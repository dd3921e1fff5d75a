//! Row-level stages built on the dispatcher: summarize and classify.

use std::sync::Arc;

use async_trait::async_trait;
use topicfold_core::{Category, Dataset, RowOutcome, StageKind, WorkItem};
use tracing::debug;

use crate::client::{ChatMessage, CompletionRequest, ModelSettings};
use crate::dispatch::{DispatchConfig, DispatchJob, Dispatcher, RowTransform, StageOutput};
use crate::error::StageError;
use crate::executor::RetryingExecutor;
use crate::prompts;

pub const DEFAULT_TEXT_COLUMN: &str = "redacted_transcript";
pub const DEFAULT_SUMMARY_COLUMN: &str = "summary";
pub const DEFAULT_TOPIC_COLUMN: &str = "topic";

/// How a row's text becomes the user message.
enum UserMessage {
    Text,
    WithLabels(Vec<String>),
}

/// Fixed system prompt plus a per-row user message.
struct PromptTransform {
    executor: Arc<RetryingExecutor>,
    settings: ModelSettings,
    system: String,
    user: UserMessage,
}

#[async_trait]
impl RowTransform for PromptTransform {
    async fn apply(&self, item: &WorkItem) -> RowOutcome {
        let user = match &self.user {
            UserMessage::Text => item.input.clone(),
            UserMessage::WithLabels(labels) => prompts::classify_user(labels, &item.input),
        };
        let request = CompletionRequest::new(
            &self.settings,
            vec![
                ChatMessage::system(self.system.as_str()),
                ChatMessage::user(user),
            ],
        );
        self.executor.execute(&request).await
    }
}

/// Writes a short primary-topic summary of each row.
pub struct Summarizer {
    executor: Arc<RetryingExecutor>,
    settings: ModelSettings,
    dispatch: DispatchConfig,
    input_column: String,
    output_column: String,
}

impl Summarizer {
    pub fn new(executor: Arc<RetryingExecutor>, settings: ModelSettings) -> Self {
        Self {
            executor,
            settings,
            dispatch: DispatchConfig::default(),
            input_column: DEFAULT_TEXT_COLUMN.to_string(),
            output_column: DEFAULT_SUMMARY_COLUMN.to_string(),
        }
    }

    pub fn with_columns(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input_column = input.into();
        self.output_column = output.into();
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn output_column(&self) -> &str {
        &self.output_column
    }

    pub async fn run(&self, dataset: &Dataset) -> Result<StageOutput, StageError> {
        let dispatcher = Dispatcher::new(self.dispatch.clone())?;
        let transform = Arc::new(PromptTransform {
            executor: Arc::clone(&self.executor),
            settings: self.settings.clone(),
            system: prompts::summarize_system(),
            user: UserMessage::Text,
        });
        let job = DispatchJob {
            stage: StageKind::Summarize,
            input_column: &self.input_column,
            output_column: &self.output_column,
        };
        dispatcher
            .run(dataset, job, transform, self.executor.log())
            .await
    }
}

/// Assigns each row one label from a fixed list.
pub struct Classifier {
    executor: Arc<RetryingExecutor>,
    settings: ModelSettings,
    dispatch: DispatchConfig,
    labels: Vec<String>,
    category: Category,
    input_column: String,
    output_column: String,
}

impl Classifier {
    pub fn new(
        executor: Arc<RetryingExecutor>,
        settings: ModelSettings,
        labels: Vec<String>,
    ) -> Result<Self, StageError> {
        if labels.iter().all(|l| l.trim().is_empty()) {
            return Err(StageError::NoLabels);
        }
        Ok(Self {
            executor,
            settings,
            dispatch: DispatchConfig::default(),
            labels,
            category: Category::default(),
            input_column: DEFAULT_TEXT_COLUMN.to_string(),
            output_column: DEFAULT_TOPIC_COLUMN.to_string(),
        })
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_columns(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input_column = input.into();
        self.output_column = output.into();
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub async fn run(&self, dataset: &Dataset) -> Result<StageOutput, StageError> {
        let dispatcher = Dispatcher::new(self.dispatch.clone())?;
        let transform = Arc::new(PromptTransform {
            executor: Arc::clone(&self.executor),
            settings: self.settings.clone(),
            system: prompts::classify_system(self.category),
            user: UserMessage::WithLabels(self.labels.clone()),
        });
        let job = DispatchJob {
            stage: StageKind::Classify,
            input_column: &self.input_column,
            output_column: &self.output_column,
        };
        let mut output = dispatcher
            .run(dataset, job, transform, self.executor.log())
            .await?;

        let none_answer = self.category.none_answer();
        let none_label = self.category.none_label();
        let mut unmatched = 0usize;
        output.dataset.map_column(&self.output_column, |value| {
            if value == none_answer {
                unmatched += 1;
                none_label.to_string()
            } else {
                value.to_string()
            }
        })?;
        debug!(unmatched, label = none_label, "rows without a fitting label");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InferenceError;
    use crate::testing::ScriptedClient;
    use topicfold_core::{CoreError, Failure, RowId};

    fn executor(client: Arc<ScriptedClient>) -> Arc<RetryingExecutor> {
        Arc::new(RetryingExecutor::new(client))
    }

    fn transcripts(texts: &[&str]) -> Dataset {
        Dataset::from_texts(DEFAULT_TEXT_COLUMN, texts.iter().copied()).unwrap()
    }

    #[tokio::test]
    async fn summarizer_writes_summary_column() {
        let client = Arc::new(ScriptedClient::new(|input, _| {
            Ok(Some(format!("about {}", input.len())))
        }));
        let out = Summarizer::new(executor(client.clone()), ModelSettings::new("m"))
            .run(&transcripts(&["abc", "abcdef"]))
            .await
            .unwrap();

        assert_eq!(out.report.stage, StageKind::Summarize);
        assert_eq!(out.dataset.get(RowId(0), "summary"), Some("about 3"));
        assert_eq!(out.dataset.get(RowId(1), "summary"), Some("about 6"));
        // The raw text is the user message.
        assert_eq!(client.calls_for("abc"), 1);
    }

    #[tokio::test]
    async fn summarizer_requires_input_column() {
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(Some("x".into()))));
        let ds = Dataset::from_texts("transcript", ["hello"]).unwrap();
        let err = Summarizer::new(executor(client.clone()), ModelSettings::new("m"))
            .run(&ds)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Dataset(CoreError::MissingColumn(_))));
        assert_eq!(client.total_calls(), 0);
    }

    #[tokio::test]
    async fn classifier_drops_failed_rows() {
        let texts: Vec<String> = (0..20)
            .map(|i| {
                if i < 15 {
                    format!("billing question {i}")
                } else {
                    format!("unreadable {i}")
                }
            })
            .collect();
        let ds = Dataset::from_texts(DEFAULT_TEXT_COLUMN, texts).unwrap();
        let client = Arc::new(ScriptedClient::new(|input, _| {
            if input.contains("unreadable") {
                Err(InferenceError::Other("model refused".into()))
            } else {
                Ok(Some("topic-A".into()))
            }
        }));
        let out = Classifier::new(
            executor(client),
            ModelSettings::new("m"),
            vec!["topic-A".into(), "topic-B".into()],
        )
        .unwrap()
        .with_dispatch(DispatchConfig::with_workers(4))
        .run(&ds)
        .await
        .unwrap();

        assert_eq!(out.dataset.len(), 15);
        assert_eq!(out.report.rows_dropped, 5);
        assert!(
            out.dataset
                .texts(DEFAULT_TOPIC_COLUMN)
                .unwrap()
                .iter()
                .all(|t| *t == "topic-A")
        );
        assert!(
            out.dropped
                .iter()
                .all(|d| d.failure == Failure::Call("model refused".into()))
        );
    }

    #[tokio::test]
    async fn no_fit_answer_is_normalised() {
        let client = Arc::new(ScriptedClient::new(|input, _| {
            if input.contains("weather") {
                Ok(Some("no subtopic".into()))
            } else if input.contains("shouting") {
                Ok(Some("NO SUBTOPIC".into()))
            } else {
                Ok(Some("Late Fees".into()))
            }
        }));
        let out = Classifier::new(
            executor(client.clone()),
            ModelSettings::new("m"),
            vec!["Late Fees".into(), "Autopay".into()],
        )
        .unwrap()
        .with_category(Category::Subtopic)
        .with_columns(DEFAULT_TEXT_COLUMN, "subtopic")
        .run(&transcripts(&["nice weather today", "why a late fee", "shouting"]))
        .await
        .unwrap();

        assert_eq!(out.dataset.get(RowId(0), "subtopic"), Some("No Subtopic"));
        assert_eq!(out.dataset.get(RowId(1), "subtopic"), Some("Late Fees"));
        // Only the exact answer is rewritten.
        assert_eq!(out.dataset.get(RowId(2), "subtopic"), Some("NO SUBTOPIC"));
        // Labels travel in the user message, separated by '|'.
        assert_eq!(
            client.calls_for(&prompts::classify_user(
                &["Late Fees".to_string(), "Autopay".to_string()],
                "why a late fee"
            )),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_respects_worker_limit() {
        let client = Arc::new(
            ScriptedClient::new(|_, _| Ok(Some("A".into())))
                .with_delay(std::time::Duration::from_millis(100)),
        );
        let texts: Vec<String> = (0..12).map(|i| format!("row {i}")).collect();
        let out = Classifier::new(executor(client.clone()), ModelSettings::new("m"), vec!["A".into()])
            .unwrap()
            .with_dispatch(DispatchConfig::with_workers(2))
            .run(&Dataset::from_texts(DEFAULT_TEXT_COLUMN, texts).unwrap())
            .await
            .unwrap();

        assert_eq!(out.dataset.len(), 12);
        assert_eq!(client.total_calls(), 12);
        assert_eq!(client.max_in_flight(), 2);
    }

    #[test]
    fn classifier_needs_labels() {
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(Some("x".into()))));
        for labels in [vec![], vec!["  ".to_string()]] {
            assert!(matches!(
                Classifier::new(executor(client.clone()), ModelSettings::new("m"), labels),
                Err(StageError::NoLabels)
            ));
        }
    }
}
