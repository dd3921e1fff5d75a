//! Scripted completion client for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::client::{CompletionClient, CompletionRequest, InferenceError};

type Script = dyn Fn(&str, u32) -> Result<Option<String>, InferenceError> + Send + Sync;

/// Answers each request by calling `script(user_content, call_number)`, where
/// `call_number` counts calls with the same user content, starting at 1.
pub(crate) struct ScriptedClient {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<String, u32>>,
    instants: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub(crate) fn new(
        script: impl Fn(&str, u32) -> Result<Option<String>, InferenceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: None,
            calls: Mutex::new(HashMap::new()),
            instants: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every call open for `delay` before answering.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.instants.lock().unwrap().len()
    }

    pub(crate) fn calls_for(&self, input: &str) -> u32 {
        self.calls.lock().unwrap().get(input).copied().unwrap_or(0)
    }

    /// Time between consecutive calls, in call order.
    pub(crate) fn call_gaps(&self) -> Vec<Duration> {
        let instants = self.instants.lock().unwrap();
        instants.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Option<String>, InferenceError> {
        let input = request.user_content().unwrap_or_default().to_string();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(input.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.instants.lock().unwrap().push(Instant::now());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.script)(&input, call)
    }
}
