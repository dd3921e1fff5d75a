//! Map-reduce condensation of a free-text corpus into at most K ranked labels.
//!
//! 1. Pick the largest sample size whose rendered sample fits the input token
//!    budget, shrinking by 3/4 until it does.
//! 2. Draw three independent samples of that size and reduce each one
//!    concurrently to a ranked list.
//! 3. Concatenate the three lists in branch order and reduce once more into
//!    `<rank>. <name> (<examples>)` lines.
//! 4. Parse label names out of the final lines.
//!
//! Any failed reduction or malformed final line fails the whole round.

use std::sync::Arc;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use topicfold_core::{Dataset, RowOutcome, StageKind, StageReport, StageTimer};
use tracing::{debug, info, warn};

use crate::client::{ChatMessage, CompletionRequest, ModelSettings};
use crate::error::CondenseError;
use crate::executor::RetryingExecutor;
use crate::prompts;
use crate::tokens::TokenCounter;

const BRANCHES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondenseConfig {
    /// Maximum number of labels returned (K).
    #[serde(default = "default_num_topics")]
    pub num_topics: usize,
    /// When set, labels are requested as subtopics of this topic.
    #[serde(default)]
    pub parent_topic: Option<String>,
    /// Token budget for the item list sent in one reduction call.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_max_reply_tokens")]
    pub max_reply_tokens: u32,
    /// Fixed sampling seed; drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_num_topics() -> usize {
    15
}

fn default_max_input_tokens() -> usize {
    20_000
}

fn default_max_reply_tokens() -> u32 {
    4000
}

impl Default for CondenseConfig {
    fn default() -> Self {
        Self {
            num_topics: default_num_topics(),
            parent_topic: None,
            max_input_tokens: default_max_input_tokens(),
            max_reply_tokens: default_max_reply_tokens(),
            seed: None,
        }
    }
}

impl CondenseConfig {
    fn validate(&self) -> Result<(), CondenseError> {
        if self.num_topics == 0 {
            return Err(CondenseError::Config("num_topics must be at least 1".into()));
        }
        if self.max_input_tokens == 0 {
            return Err(CondenseError::Config(
                "max_input_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one condensation round.
#[derive(Debug, Clone)]
pub struct Condensed {
    /// Canonical labels, most common first.
    pub labels: Vec<String>,
    /// Items per first-round sample.
    pub sample_size: usize,
    pub report: StageReport,
}

pub struct Condenser {
    executor: Arc<RetryingExecutor>,
    tokens: Arc<dyn TokenCounter>,
    settings: ModelSettings,
    config: CondenseConfig,
}

impl Condenser {
    pub fn new(
        executor: Arc<RetryingExecutor>,
        tokens: Arc<dyn TokenCounter>,
        settings: ModelSettings,
        config: CondenseConfig,
    ) -> Result<Self, CondenseError> {
        config.validate()?;
        // Reductions reply with whole lists, so they get their own reply budget.
        let settings = settings.with_max_reply_tokens(config.max_reply_tokens);
        Ok(Self {
            executor,
            tokens,
            settings,
            config,
        })
    }

    pub fn config(&self) -> &CondenseConfig {
        &self.config
    }

    /// Condense the non-null values of `column`.
    pub async fn condense_column(
        &self,
        dataset: &Dataset,
        column: &str,
    ) -> Result<Condensed, CondenseError> {
        let corpus = dataset.texts(column)?;
        self.condense(&corpus).await
    }

    pub async fn condense<S: AsRef<str> + Sync>(
        &self,
        corpus: &[S],
    ) -> Result<Condensed, CondenseError> {
        if corpus.is_empty() {
            return Err(CondenseError::EmptyCorpus);
        }
        let timer = StageTimer::start(StageKind::Condense);
        let log = self.executor.log();
        log.append(&format!(
            "{}: Begin condensing {} topics",
            timer.started_at(),
            corpus.len()
        ));

        let (sample_size, samples) = {
            let mut rng = match self.config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let size = adaptive_sample_size(
                corpus,
                self.config.max_input_tokens,
                self.tokens.as_ref(),
                &mut rng,
            );
            let samples: Vec<Vec<&str>> = (0..BRANCHES)
                .map(|_| {
                    corpus
                        .choose_multiple(&mut rng, size)
                        .map(|item: &S| item.as_ref())
                        .collect()
                })
                .collect();
            (size, samples)
        };
        info!(
            corpus = corpus.len(),
            sample_size,
            budget = self.config.max_input_tokens,
            "condensing"
        );

        let first_round = prompts::condense_first_round(
            self.config.num_topics,
            self.config.parent_topic.as_deref(),
        );
        let replies = join_all(
            samples
                .iter()
                .map(|sample| self.reduce(&first_round, sample)),
        )
        .await;

        let mut merged: Vec<String> = Vec::new();
        for (branch, reply) in replies.into_iter().enumerate() {
            let text = reply.map_err(|failure| CondenseError::Branch {
                round: 1,
                branch: branch + 1,
                failure,
            })?;
            let lines: Vec<String> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
            debug!(branch = branch + 1, items = lines.len(), "first-round list");
            merged.extend(lines);
        }

        let final_round = prompts::condense_final(self.config.num_topics);
        let text = self
            .reduce(&final_round, &merged)
            .await
            .map_err(|failure| CondenseError::Branch {
                round: 2,
                branch: 1,
                failure,
            })?;

        let mut labels = parse_ranked_labels(&text).inspect_err(|e| {
            warn!(error = %e, "unparseable final reduction");
            log.append(&format!("FAILED: {e}"));
        })?;
        if labels.is_empty() {
            return Err(CondenseError::NoLabels);
        }
        if labels.len() > self.config.num_topics {
            warn!(
                returned = labels.len(),
                limit = self.config.num_topics,
                "final reduction exceeded label limit, truncating"
            );
            labels.truncate(self.config.num_topics);
        }

        let report = timer.finish(corpus.len(), 0);
        log.append(&format!("{}: Finish condensing topics", report.finished_at));
        log.append(&format!(
            "Total Condensation Time: {:.3}s",
            report.elapsed.as_secs_f64()
        ));
        log.append(&format!("List of topics: {labels:?}"));
        info!(labels = labels.len(), %report, "condensed");

        Ok(Condensed {
            labels,
            sample_size,
            report,
        })
    }

    /// One reduction call over `items`.
    async fn reduce<S: AsRef<str>>(
        &self,
        system: &str,
        items: &[S],
    ) -> RowOutcome {
        let user = prompts::condense_user(&prompts::render_topics(items));
        let token_count = self.tokens.count_tokens(&user);
        debug!(items = items.len(), tokens = token_count, "reduction input");
        self.executor
            .log()
            .append(&format!("Topics Token Count: {token_count}"));
        let request = CompletionRequest::new(
            &self.settings,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        );
        self.executor.execute(&request).await
    }
}

/// Largest sample size (shrinking by 3/4) whose rendered random sample fits
/// `budget` tokens.
///
/// Stops at 1 even if a single item is over budget.
pub fn adaptive_sample_size<S, R>(
    corpus: &[S],
    budget: usize,
    tokens: &dyn TokenCounter,
    rng: &mut R,
) -> usize
where
    S: AsRef<str>,
    R: Rng + ?Sized,
{
    let mut size = corpus.len();
    loop {
        let sample: Vec<&S> = corpus.choose_multiple(rng, size).collect();
        let count = tokens.count_tokens(&prompts::render_topics(&sample));
        if count <= budget {
            return size;
        }
        if size <= 1 {
            warn!(tokens = count, budget, "a single item exceeds the token budget");
            return size;
        }
        debug!(size, tokens = count, budget, "sample over budget, shrinking");
        size = size * 3 / 4;
    }
}

/// Label names from `<rank>. <name> (<examples>)` lines.
///
/// Blank lines are skipped; any other line that does not match fails.
pub fn parse_ranked_labels(text: &str) -> Result<Vec<String>, CondenseError> {
    let mut labels = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let name = parse_ranked_line(line).ok_or_else(|| CondenseError::Parse {
            line_number: i + 1,
            line: raw.to_string(),
        })?;
        labels.push(name.to_string());
    }
    Ok(labels)
}

fn parse_ranked_line(line: &str) -> Option<&str> {
    let (rank, rest) = line.split_once('.')?;
    let rank = rank.trim();
    if rank.is_empty() || !rank.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (name, _examples) = rest.split_once('(')?;
    let name = name
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InferenceError;
    use crate::testing::ScriptedClient;
    use crate::tokens::HeuristicTokenCounter;
    use std::time::Duration;
    use topicfold_core::Failure;

    const FINAL_REPLY: &str =
        "1. Billing Issues (late fee, autopay)\n2. Login Problems (password reset)";

    fn is_final_round(input: &str) -> bool {
        input.contains("\n1. ")
    }

    fn condenser(client: Arc<ScriptedClient>, config: CondenseConfig) -> Condenser {
        let executor = Arc::new(RetryingExecutor::new(client));
        Condenser::new(
            executor,
            Arc::new(HeuristicTokenCounter::default()),
            ModelSettings::new("test-model"),
            config,
        )
        .unwrap()
    }

    fn seeded(k: usize) -> CondenseConfig {
        CondenseConfig {
            num_topics: k,
            seed: Some(7),
            ..CondenseConfig::default()
        }
    }

    fn corpus(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| match i % 3 {
                0 => format!("late fee {i}"),
                1 => format!("password reset {i}"),
                _ => format!("autopay double charge {i}"),
            })
            .collect()
    }

    #[test]
    fn parses_ranked_lines() {
        assert_eq!(
            parse_ranked_labels(FINAL_REPLY).unwrap(),
            vec!["Billing Issues", "Login Problems"]
        );
        assert_eq!(
            parse_ranked_labels("\n10. [Refunds] ([refund status])\n\n").unwrap(),
            vec!["Refunds"]
        );
    }

    #[test]
    fn malformed_line_is_a_parse_error() {
        let err = parse_ranked_labels("1. Billing (fees)\nHere you go!\n").unwrap_err();
        match err {
            CondenseError::Parse { line_number, line } => {
                assert_eq!(line_number, 2);
                assert_eq!(line, "Here you go!");
            }
            other => panic!("unexpected error {other:?}"),
        }
        for bad in ["Billing (fees)", "1. Billing", "a. Billing (x)", "1. (x)"] {
            assert!(parse_ranked_labels(bad).is_err(), "{bad:?} should not parse");
        }
    }

    /// Heuristic counter that remembers the last count it produced.
    #[derive(Default)]
    struct LastCount {
        inner: HeuristicTokenCounter,
        last: std::sync::Mutex<usize>,
    }

    impl TokenCounter for LastCount {
        fn count_tokens(&self, text: &str) -> usize {
            let count = self.inner.count_tokens(text);
            *self.last.lock().unwrap() = count;
            count
        }
    }

    #[test]
    fn sample_fits_budget() {
        let items = corpus(500);
        let counter = LastCount::default();
        let mut rng = StdRng::seed_from_u64(1);
        let size = adaptive_sample_size(&items, 300, &counter, &mut rng);

        assert!(size >= 1 && size < items.len());
        assert!(*counter.last.lock().unwrap() <= 300);
    }

    #[test]
    fn small_corpus_is_used_whole() {
        let items = corpus(12);
        let mut rng = StdRng::seed_from_u64(1);
        let size =
            adaptive_sample_size(&items, 10_000, &HeuristicTokenCounter::default(), &mut rng);
        assert_eq!(size, 12);
    }

    #[test]
    fn oversized_single_item_stops_at_one() {
        let items = vec!["x".repeat(4000), "y".repeat(4000)];
        let mut rng = StdRng::seed_from_u64(1);
        let size = adaptive_sample_size(&items, 10, &HeuristicTokenCounter::default(), &mut rng);
        assert_eq!(size, 1);
    }

    #[test]
    fn sampling_is_deterministic_under_a_seed() {
        let items = corpus(400);
        let counter = HeuristicTokenCounter::default();
        let a = adaptive_sample_size(&items, 250, &counter, &mut StdRng::seed_from_u64(9));
        let b = adaptive_sample_size(&items, 250, &counter, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn three_branches_then_final_merge() {
        let client = Arc::new(ScriptedClient::new(|input, _| {
            if is_final_round(input) {
                Ok(Some(FINAL_REPLY.to_string()))
            } else {
                Ok(Some("1. Billing\n2. Login".to_string()))
            }
        }));
        let condensed = condenser(client.clone(), seeded(15))
            .condense(&corpus(30))
            .await
            .unwrap();

        assert_eq!(condensed.labels, vec!["Billing Issues", "Login Problems"]);
        assert_eq!(condensed.sample_size, 30);
        assert_eq!(condensed.report.rows_in, 30);
        assert_eq!(condensed.report.rows_dropped, 0);
        assert_eq!(client.total_calls(), 4);
        // The final call saw all three first-round lists, in order.
        assert_eq!(
            client.calls_for("Topics:\n1. Billing\n2. Login\n1. Billing\n2. Login\n1. Billing\n2. Login\n\nCombined Topics:"),
            1
        );
    }

    #[tokio::test]
    async fn label_list_is_capped_at_k() {
        let long_reply: String = (1..=20)
            .map(|i| format!("{i}. Label {i} (example {i})\n"))
            .collect();
        let client = Arc::new(ScriptedClient::new(move |input, _| {
            if is_final_round(input) {
                Ok(Some(long_reply.clone()))
            } else {
                Ok(Some("1. Something".to_string()))
            }
        }));
        let condensed = condenser(client, seeded(3))
            .condense(&corpus(10))
            .await
            .unwrap();
        assert_eq!(condensed.labels, vec!["Label 1", "Label 2", "Label 3"]);
        assert!(
            condensed
                .labels
                .iter()
                .all(|l| !l.is_empty() && l.trim() == l)
        );
    }

    #[tokio::test]
    async fn failed_branch_fails_the_round() {
        let client = Arc::new(ScriptedClient::new(|input, _| {
            if is_final_round(input) {
                Ok(Some(FINAL_REPLY.to_string()))
            } else {
                Err(InferenceError::Http {
                    status: 400,
                    body: "content filtered".into(),
                })
            }
        }));
        let err = condenser(client, seeded(5))
            .condense(&corpus(9))
            .await
            .unwrap_err();
        match err {
            CondenseError::Branch {
                round,
                branch,
                failure,
            } => {
                assert_eq!(round, 1);
                assert_eq!(branch, 1);
                assert_eq!(failure, Failure::Call("HTTP 400: content filtered".into()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_final_reply_fails_the_round() {
        let client = Arc::new(ScriptedClient::new(|input, _| {
            if is_final_round(input) {
                Ok(Some("Combined topics below\n1. Billing (fees)".to_string()))
            } else {
                Ok(Some("1. Billing".to_string()))
            }
        }));
        let err = condenser(client, seeded(5))
            .condense(&corpus(6))
            .await
            .unwrap_err();
        assert!(matches!(err, CondenseError::Parse { line_number: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn first_round_branches_run_concurrently() {
        let client = Arc::new(
            ScriptedClient::new(|input, _| {
                if is_final_round(input) {
                    Ok(Some(FINAL_REPLY.to_string()))
                } else {
                    Ok(Some("1. Billing".to_string()))
                }
            })
            .with_delay(Duration::from_secs(1)),
        );
        condenser(client.clone(), seeded(5))
            .condense(&corpus(9))
            .await
            .unwrap();

        let gaps = client.call_gaps();
        assert_eq!(gaps.len(), 3);
        assert_eq!(gaps[0], Duration::ZERO);
        assert_eq!(gaps[1], Duration::ZERO);
        assert!(gaps[2] >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn empty_corpus_and_bad_config_are_rejected() {
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(Some(FINAL_REPLY.into()))));
        let err = condenser(client.clone(), seeded(5))
            .condense::<String>(&[])
            .await
            .unwrap_err();
        assert!(matches!(err, CondenseError::EmptyCorpus));
        assert_eq!(client.total_calls(), 0);

        let executor = Arc::new(RetryingExecutor::new(client));
        let bad = Condenser::new(
            executor,
            Arc::new(HeuristicTokenCounter::default()),
            ModelSettings::new("m"),
            seeded(0),
        );
        assert!(matches!(bad, Err(CondenseError::Config(_))));
    }

    #[tokio::test]
    async fn condenses_a_dataset_column() {
        let client = Arc::new(ScriptedClient::new(|input, _| {
            if is_final_round(input) {
                Ok(Some(FINAL_REPLY.to_string()))
            } else {
                Ok(Some("1. Billing".to_string()))
            }
        }));
        let ds = Dataset::from_texts("summary", corpus(8)).unwrap();
        let condensed = condenser(client.clone(), seeded(5))
            .condense_column(&ds, "summary")
            .await
            .unwrap();
        assert_eq!(condensed.labels.len(), 2);

        let err = condenser(client, seeded(5))
            .condense_column(&ds, "topic")
            .await
            .unwrap_err();
        assert!(matches!(err, CondenseError::Dataset(_)));
    }
}
