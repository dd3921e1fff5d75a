//! Per-attempt and per-row outcomes.
//!
//! Failures stay a tagged value ([`Failure`]) inside the pipeline and are only
//! rendered to the `FAILED: ...` marker string at the dataset boundary.

use thiserror::Error;

/// Prefix of every failure marker written into a text column.
pub const FAILURE_MARKER: &str = "FAILED: ";

/// Result of a single inference attempt; drives the retry state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(String),
    /// Rate limited; carries the number of attempts made so far.
    RateLimited(u32),
    TerminalFailure(Failure),
}

/// Why a row produced no usable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("No response")]
    NoResponse,

    #[error("{0}")]
    Call(String),

    #[error("rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Uncaught Exception: {0}")]
    Uncaught(String),
}

impl Failure {
    /// The sentinel string stored in a dataset cell for this failure.
    pub fn marker(&self) -> String {
        format!("{FAILURE_MARKER}{self}")
    }
}

/// Final value of one row (or one reduction call).
pub type RowOutcome = Result<String, Failure>;

pub fn is_failure_marker(value: &str) -> bool {
    value.starts_with(FAILURE_MARKER)
}
