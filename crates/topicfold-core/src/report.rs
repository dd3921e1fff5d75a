use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Pipeline phase a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Summarize,
    Condense,
    Classify,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Condense => "condense",
            Self::Classify => "classify",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and drop statistics for one finished stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageKind,
    pub rows_in: usize,
    pub rows_dropped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl StageReport {
    pub fn rows_out(&self) -> usize {
        self.rows_in - self.rows_dropped
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} rows in, {} out, {} dropped in {:.2}s",
            self.stage,
            self.rows_in,
            self.rows_out(),
            self.rows_dropped,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Started at stage entry, turned into a [`StageReport`] at stage exit.
#[derive(Debug)]
pub struct StageTimer {
    stage: StageKind,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl StageTimer {
    pub fn start(stage: StageKind) -> Self {
        Self {
            stage,
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finish(self, rows_in: usize, rows_dropped: usize) -> StageReport {
        StageReport {
            stage: self.stage,
            rows_in,
            rows_dropped: rows_dropped.min(rows_in),
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed: self.start.elapsed(),
        }
    }
}
