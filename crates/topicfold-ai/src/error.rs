use thiserror::Error;
use topicfold_core::{CoreError, Failure};

/// Configuration faults detected before a row-level stage dispatches any work.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Dataset(#[from] CoreError),

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("classification needs at least one label")]
    NoLabels,
}

/// Why a condensation round produced no label set.
#[derive(Debug, Error)]
pub enum CondenseError {
    #[error("nothing to condense: column has no values")]
    EmptyCorpus,

    #[error("invalid condense configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Dataset(#[from] CoreError),

    #[error("round {round} branch {branch} failed: {failure}")]
    Branch {
        round: u8,
        branch: usize,
        failure: Failure,
    },

    #[error("reduction reply line {line_number} is not `<rank>. <name> (<examples>)`: {line:?}")]
    Parse { line_number: usize, line: String },

    #[error("final reduction returned no labels")]
    NoLabels,
}

/// Failure of an end-to-end modeling run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Condense(#[from] CondenseError),
}
