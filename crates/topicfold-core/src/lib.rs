//! Core types for topicfold: row-addressable datasets, per-row outcomes and
//! failure markers, stage reports, and the append-only log sink.

mod category;
mod dataset;
mod error;
pub mod journal;
mod outcome;
mod report;
pub mod schema;

pub use category::Category;
pub use dataset::{Dataset, RowId, WorkItem};
pub use error::CoreError;
pub use journal::{DailyLog, LogSink, NullLog};
pub use outcome::{CallOutcome, FAILURE_MARKER, Failure, RowOutcome, is_failure_marker};
pub use report::{StageKind, StageReport, StageTimer};
