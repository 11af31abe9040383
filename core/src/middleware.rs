//! Ordered transform pipeline applied to outgoing and incoming events.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::{Result, WeftError};

/// Which way an event is travelling when a stage sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// One pipeline stage. May rename the event or rewrite its arguments; an
/// `Err` aborts the remaining stages and the enclosing send or dispatch.
pub type Stage = Arc<
    dyn Fn(Direction, &str, Vec<Value>) -> std::result::Result<(String, Vec<Value>), String>
        + Send
        + Sync,
>;

/// Append-only stage list for one direction, folded left-to-right on every
/// logical send or receive. Zero stages is the identity.
pub struct MiddlewarePipeline {
    direction: Direction,
    stages: RwLock<Vec<Stage>>,
}

impl MiddlewarePipeline {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            stages: RwLock::new(Vec::new()),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.stages.read().expect("middleware lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `stage` to the pipeline.
    pub fn push<F>(&self, stage: F)
    where
        F: Fn(Direction, &str, Vec<Value>) -> std::result::Result<(String, Vec<Value>), String>
            + Send
            + Sync
            + 'static,
    {
        self.stages
            .write()
            .expect("middleware lock poisoned")
            .push(Arc::new(stage));
    }

    /// Folds every stage left-to-right, each receiving the previous stage's
    /// output. A failing stage surfaces as [`WeftError::Middleware`].
    pub fn apply(&self, event: String, args: Vec<Value>) -> Result<(String, Vec<Value>)> {
        let stages: Vec<Stage> = self
            .stages
            .read()
            .expect("middleware lock poisoned")
            .clone();

        let mut event = event;
        let mut args = args;
        for (index, stage) in stages.iter().enumerate() {
            match stage(self.direction, &event, std::mem::take(&mut args)) {
                Ok((next_event, next_args)) => {
                    event = next_event;
                    args = next_args;
                }
                Err(message) => {
                    return Err(WeftError::Middleware {
                        index,
                        event,
                        message,
                    })
                }
            }
        }
        Ok((event, args))
    }
}
