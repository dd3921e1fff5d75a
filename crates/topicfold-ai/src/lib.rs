//! LLM batch annotation: retrying inference calls, bounded row dispatch and
//! map-reduce label condensation, composed into summarize / condense /
//! classify stages.

mod client;
mod condense;
mod dispatch;
mod error;
mod executor;
#[cfg(feature = "http")]
mod http;
mod pipeline;
pub mod prompts;
mod stages;
mod tokens;

#[cfg(test)]
mod testing;

pub use client::{
    ChatMessage, CompletionClient, CompletionRequest, InferenceError, ModelSettings, Role,
};
pub use condense::{
    CondenseConfig, Condensed, Condenser, adaptive_sample_size, parse_ranked_labels,
};
pub use dispatch::{
    DispatchConfig, DispatchJob, Dispatcher, DroppedRow, RowTransform, StageOutput,
};
pub use error::{CondenseError, PipelineError, StageError};
pub use executor::{RetryPolicy, RetryingExecutor};
#[cfg(feature = "http")]
pub use http::ChatCompletionsClient;
pub use pipeline::{ModelOptions, ModelRun, TopicModeler};
pub use stages::{
    Classifier, DEFAULT_SUMMARY_COLUMN, DEFAULT_TEXT_COLUMN, DEFAULT_TOPIC_COLUMN, Summarizer,
};
#[cfg(feature = "tokenizers")]
pub use tokens::HfTokenCounter;
pub use tokens::{HeuristicTokenCounter, TokenCounter};
