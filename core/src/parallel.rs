//! Concurrent operation batches with configurable success semantics.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// One operation of a batch: an event, its arguments, and an optional
/// per-operation timeout override.
#[derive(Debug, Clone)]
pub struct ParallelOp {
    pub event: String,
    pub args: Vec<Value>,
    pub timeout: Option<Duration>,
}

impl ParallelOp {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Aggregation rule for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Success requires every operation to succeed; the whole batch is
    /// drained before returning.
    #[default]
    All,
    /// Success requires at least one success; returns at the first one.
    Any,
    /// Whichever operation completes first decides the outcome.
    Race,
}

/// Aggregate outcome of a batch. An event name appears in at most one of
/// the two maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelOutcome {
    pub success: bool,
    pub results: HashMap<String, Value>,
    pub errors: HashMap<String, String>,
}

impl ParallelOutcome {
    fn record_ok(&mut self, event: String, value: Value) {
        self.errors.remove(&event);
        self.results.insert(event, value);
    }

    fn record_err(&mut self, event: String, message: String) {
        // A recorded success for the same name wins; a name never lives in
        // both maps.
        if !self.results.contains_key(&event) {
            self.errors.insert(event, message);
        }
    }
}

/// Runs every operation concurrently via `run` and folds completions into
/// a [`ParallelOutcome`] under `strategy`.
///
/// Each operation carries its own timeout (the runner applies the 5s
/// default), so the batch as a whole is bounded by the batch maximum; an
/// operation still unresolved at its bound is recorded as an error. An
/// empty batch performs no work and fails immediately.
pub(crate) async fn orchestrate<F, Fut>(
    ops: Vec<ParallelOp>,
    strategy: Strategy,
    run: F,
) -> ParallelOutcome
where
    F: Fn(ParallelOp) -> Fut,
    Fut: Future<Output = (String, Result<Value>)>,
{
    let mut outcome = ParallelOutcome::default();
    if ops.is_empty() {
        outcome.errors.insert(
            "batch".to_string(),
            "empty operation batch: nothing to run".to_string(),
        );
        return outcome;
    }

    let mut in_flight = FuturesUnordered::new();
    for op in ops {
        in_flight.push(run(op));
    }

    while let Some((event, result)) = in_flight.next().await {
        match result {
            Ok(value) => {
                outcome.record_ok(event, value);
                match strategy {
                    Strategy::Any | Strategy::Race => {
                        // Remaining operations are cancelled by dropping
                        // their futures.
                        outcome.success = true;
                        return outcome;
                    }
                    Strategy::All => {}
                }
            }
            Err(err) => {
                outcome.record_err(event, err.to_string());
                if strategy == Strategy::Race {
                    return outcome;
                }
            }
        }
    }

    outcome.success = match strategy {
        Strategy::All => outcome.errors.is_empty(),
        // Reaching here under Any means no operation succeeded; Race
        // always returns from inside the loop for a non-empty batch.
        Strategy::Any | Strategy::Race => false,
    };
    outcome
}
