//! Row dispatcher: one transform call per row, at most `workers` in flight.
//!
//! Outcomes land in a row-slot arena (one `OnceLock` per row), so workers
//! never contend on a shared lock and each row is written at most once. The
//! arena is folded into the output column keyed by [`RowId`] after every
//! task has joined; failed rows are then dropped from the returned dataset.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use topicfold_core::{
    Dataset, Failure, LogSink, RowId, RowOutcome, StageKind, StageReport, StageTimer, WorkItem,
};
use tracing::{info, warn};

use crate::error::StageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of rows in flight at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    5
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl DispatchConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self { workers }
    }
}

/// Per-row work applied by the dispatcher.
#[async_trait]
pub trait RowTransform: Send + Sync {
    async fn apply(&self, item: &WorkItem) -> RowOutcome;
}

/// A row removed from a stage's output, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRow {
    pub row_id: RowId,
    pub failure: Failure,
}

/// Result of one row-level stage.
#[derive(Debug)]
pub struct StageOutput {
    /// Surviving rows, with the output column filled in.
    pub dataset: Dataset,
    pub report: StageReport,
    /// Failed rows in row-id order.
    pub dropped: Vec<DroppedRow>,
}

/// One dispatch: which stage, which column is read and which is written.
#[derive(Debug, Clone, Copy)]
pub struct DispatchJob<'a> {
    pub stage: StageKind,
    pub input_column: &'a str,
    pub output_column: &'a str,
}

pub struct Dispatcher {
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Result<Self, StageError> {
        if config.workers == 0 {
            return Err(StageError::NoWorkers);
        }
        Ok(Self { config })
    }

    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Run `transform` over every row of `job.input_column`.
    ///
    /// Fails only on configuration faults, before any work is dispatched.
    /// Row-level failures, including a panicking transform, become dropped rows.
    pub async fn run(
        &self,
        dataset: &Dataset,
        job: DispatchJob<'_>,
        transform: Arc<dyn RowTransform>,
        log: &dyn LogSink,
    ) -> Result<StageOutput, StageError> {
        let rows = dataset.column(job.input_column)?;
        let timer = StageTimer::start(job.stage);
        let rows_in = rows.len();
        info!(
            stage = %job.stage,
            rows = rows_in,
            workers = self.config.workers,
            input = job.input_column,
            output = job.output_column,
            "dispatching rows"
        );
        log.append(&format!(
            "{}: Begin {} of {} rows",
            timer.started_at(),
            job.stage,
            rows_in
        ));

        let ids: Vec<RowId> = rows.iter().map(|(id, _)| *id).collect();
        let slots: Arc<Vec<OnceLock<RowOutcome>>> =
            Arc::new((0..rows_in).map(|_| OnceLock::new()).collect());
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();

        for (slot, (row_id, input)) in rows.into_iter().enumerate() {
            let Some(input) = input else {
                let _ = slots[slot].set(Err(Failure::Uncaught(format!(
                    "row {row_id} has no value in column {}",
                    job.input_column
                ))));
                continue;
            };
            // Wait for a free worker before spawning, so at most `workers`
            // tasks exist at a time.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let item = WorkItem {
                row_id,
                input: input.to_string(),
            };
            let transform = Arc::clone(&transform);
            let slots = Arc::clone(&slots);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(transform.apply(&item))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(Failure::Uncaught(panic_message(panic.as_ref()))));
                let _ = slots[slot].set(outcome);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(stage = %job.stage, error = %e, "worker task aborted");
            }
        }

        let mut values = HashMap::with_capacity(rows_in);
        let mut dropped = Vec::new();
        for (row_id, slot) in ids.iter().zip(slots.iter()) {
            let outcome = slot
                .get()
                .cloned()
                .unwrap_or_else(|| Err(Failure::Uncaught("worker task did not complete".into())));
            match outcome {
                Ok(text) => {
                    values.insert(*row_id, text);
                }
                Err(failure) => {
                    values.insert(*row_id, failure.marker());
                    dropped.push(DroppedRow {
                        row_id: *row_id,
                        failure,
                    });
                }
            }
        }
        dropped.sort_by_key(|d| d.row_id);

        let mut annotated = dataset.clone();
        annotated.write_column(job.output_column, values)?;
        let failed: HashSet<RowId> = dropped.iter().map(|d| d.row_id).collect();
        let dataset = annotated.retain_rows(|id| !failed.contains(&id))?;

        let report = timer.finish(rows_in, dropped.len());
        log.append(&format!(
            "{}: Finish {} of {} rows",
            report.finished_at,
            job.stage,
            report.rows_out()
        ));
        log.append(&format!("Dropped {} rows for error", report.rows_dropped));
        log.append(&format!(
            "Total {} time: {:.3}s",
            job.stage,
            report.elapsed.as_secs_f64()
        ));
        if report.rows_dropped > 0 {
            warn!(stage = %job.stage, dropped = report.rows_dropped, "rows dropped for error");
        }
        info!(%report, "stage finished");

        Ok(StageOutput {
            dataset,
            report,
            dropped,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use topicfold_core::{LogSink, NullLog, is_failure_marker};

    const JOB: DispatchJob<'static> = DispatchJob {
        stage: StageKind::Classify,
        input_column: "text",
        output_column: "topic",
    };

    fn dataset(n: usize) -> Dataset {
        Dataset::from_texts("text", (0..n).map(|i| format!("row text {i}"))).unwrap()
    }

    /// Fails rows whose id is divisible by 4, answers "topic-A" otherwise.
    struct EveryFourthFails;

    #[async_trait]
    impl RowTransform for EveryFourthFails {
        async fn apply(&self, item: &WorkItem) -> RowOutcome {
            tokio::task::yield_now().await;
            if item.row_id.0 % 4 == 0 {
                Err(Failure::Call("service unavailable".into()))
            } else {
                Ok("topic-A".into())
            }
        }
    }

    #[derive(Default)]
    struct RecordingLog(Mutex<Vec<String>>);

    impl LogSink for RecordingLog {
        fn append(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[tokio::test]
    async fn failed_rows_are_dropped_and_counted() {
        let log = RecordingLog::default();
        let dispatcher = Dispatcher::new(DispatchConfig::with_workers(4)).unwrap();
        let out = dispatcher
            .run(&dataset(20), JOB, Arc::new(EveryFourthFails), &log)
            .await
            .unwrap();

        assert_eq!(out.report.rows_in, 20);
        assert_eq!(out.report.rows_dropped, 5);
        assert_eq!(out.report.rows_out(), 15);
        assert_eq!(out.dataset.len(), 15);
        for (id, value) in out.dataset.column("topic").unwrap() {
            assert_eq!(value, Some("topic-A"), "row {id}");
        }
        let dropped: Vec<u64> = out.dropped.iter().map(|d| d.row_id.0).collect();
        assert_eq!(dropped, vec![0, 4, 8, 12, 16]);
        assert!(
            out.dropped
                .iter()
                .all(|d| is_failure_marker(&d.failure.marker()))
        );

        let lines = log.0.lock().unwrap();
        assert!(lines.iter().any(|l| l == "Dropped 5 rows for error"), "{lines:?}");
        assert!(lines.iter().any(|l| l.ends_with("of 15 rows")), "{lines:?}");
        assert!(lines.iter().any(|l| l.starts_with("Total ")), "{lines:?}");
    }

    struct Tracked {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RowTransform for Tracked {
        async fn apply(&self, item: &WorkItem) -> RowOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("seen {}", item.row_id))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_worker_limit() {
        let tracked = Arc::new(Tracked {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(DispatchConfig::with_workers(3)).unwrap();
        let out = dispatcher
            .run(&dataset(17), JOB, tracked.clone(), &NullLog)
            .await
            .unwrap();

        assert_eq!(tracked.calls.load(Ordering::SeqCst), 17);
        let peak = tracked.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in flight {peak}");
        assert!(peak >= 2, "rows never overlapped");
        // Exactly one value per row, addressed by id.
        for (id, value) in out.dataset.column("topic").unwrap() {
            assert_eq!(value, Some(format!("seen {id}").as_str()));
        }
        assert!(out.dropped.is_empty());
    }

    struct PanicsOnRowTwo;

    #[async_trait]
    impl RowTransform for PanicsOnRowTwo {
        async fn apply(&self, item: &WorkItem) -> RowOutcome {
            if item.row_id == RowId(2) {
                panic!("bad row");
            }
            Ok(item.input.to_uppercase())
        }
    }

    #[tokio::test]
    async fn panicking_row_is_captured() {
        let dispatcher = Dispatcher::new(DispatchConfig::default()).unwrap();
        let out = dispatcher
            .run(&dataset(4), JOB, Arc::new(PanicsOnRowTwo), &NullLog)
            .await
            .unwrap();

        assert_eq!(out.dataset.len(), 3);
        assert_eq!(
            out.dropped,
            vec![DroppedRow {
                row_id: RowId(2),
                failure: Failure::Uncaught("bad row".into()),
            }]
        );
        assert_eq!(out.dataset.get(RowId(3), "topic"), Some("ROW TEXT 3"));
    }

    #[tokio::test]
    async fn null_input_is_dropped_without_a_call() {
        let mut ds = Dataset::with_positional_ids(3);
        ds.add_column("text", vec![Some("a".into()), None, Some("c".into())])
            .unwrap();
        let tracked = Arc::new(Tracked {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(DispatchConfig::default()).unwrap();
        let out = dispatcher.run(&ds, JOB, tracked.clone(), &NullLog).await.unwrap();

        assert_eq!(tracked.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.dropped.len(), 1);
        assert_eq!(out.dropped[0].row_id, RowId(1));
        assert!(matches!(out.dropped[0].failure, Failure::Uncaught(_)));
    }

    #[tokio::test]
    async fn missing_column_fails_before_dispatch() {
        let dispatcher = Dispatcher::new(DispatchConfig::default()).unwrap();
        let job = DispatchJob {
            input_column: "transcript",
            ..JOB
        };
        let err = dispatcher
            .run(&dataset(3), job, Arc::new(EveryFourthFails), &NullLog)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Dataset(topicfold_core::CoreError::MissingColumn(ref c)) if c == "transcript"
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            Dispatcher::new(DispatchConfig::with_workers(0)),
            Err(StageError::NoWorkers)
        ));
    }

    #[tokio::test]
    async fn empty_dataset_is_a_noop() {
        let ds = Dataset::from_texts("text", Vec::<String>::new()).unwrap();
        let dispatcher = Dispatcher::new(DispatchConfig::default()).unwrap();
        let out = dispatcher
            .run(&ds, JOB, Arc::new(EveryFourthFails), &NullLog)
            .await
            .unwrap();
        assert!(out.dataset.is_empty());
        assert_eq!(out.report.rows_dropped, 0);
    }
}
