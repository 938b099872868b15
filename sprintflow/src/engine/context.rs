//! Read-side context handed down the workflow tree.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::core::error::{EngineError, StoreError};
use crate::core::gating::{self, RecordReader};
use crate::core::types::{Iteration, NodeId, RunId, StoredRecord};
use crate::store::RunStore;

/// Progress notifications emitted while a workflow executes.
#[derive(Debug)]
pub enum Event<'a> {
    StepStarted {
        node: &'a NodeId,
        iteration: Iteration,
    },
    StepWritten {
        node: &'a NodeId,
        iteration: Iteration,
    },
    StepSkipped {
        node: &'a NodeId,
        iteration: Iteration,
    },
    /// The step wrote `iteration` in a pass interrupted before it finished;
    /// the resumed pass keeps that record instead of running the action again.
    StepRecovered {
        node: &'a NodeId,
        iteration: Iteration,
    },
    StepFailed {
        node: &'a NodeId,
        error: &'a EngineError,
    },
    /// A best-effort sequence swallowed a recoverable child failure.
    FailureTolerated {
        error: &'a EngineError,
    },
    LoopPassStarted {
        node: &'a NodeId,
        activation: u32,
        pass: u32,
    },
    LoopFinished {
        node: &'a NodeId,
        passes: u32,
        satisfied: bool,
    },
}

/// Observer callback; shared by the threads of a parallel group.
pub type Observer<'a> = &'a (dyn Fn(&Event<'_>) + Sync);

/// Per-run view of the store plus an optional observer.
///
/// Nodes never hand values to each other directly; everything downstream
/// reads goes through this context by (run, node).
pub struct RunContext<'a> {
    run: RunId,
    store: &'a dyn RunStore,
    observer: Option<Observer<'a>>,
}

impl<'a> RunContext<'a> {
    pub fn new(run: RunId, store: &'a dyn RunStore) -> Self {
        Self {
            run,
            store,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Observer<'a>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn run(&self) -> &RunId {
        &self.run
    }

    pub fn store(&self) -> &'a dyn RunStore {
        self.store
    }

    pub fn read_latest(&self, node: &NodeId) -> Result<Option<StoredRecord>, StoreError> {
        self.store.read_latest(&self.run, node)
    }

    pub fn read_at(
        &self,
        node: &NodeId,
        iteration: Iteration,
    ) -> Result<Option<StoredRecord>, StoreError> {
        self.store.read_at(&self.run, node, iteration)
    }

    /// Latest payload of `node` decoded as `T`; `None` when absent or unreadable.
    pub fn latest<T: DeserializeOwned>(&self, node: &NodeId) -> Option<T> {
        gating::latest(self, node)
    }

    pub(crate) fn emit(&self, event: Event<'_>) {
        if let Some(observer) = self.observer {
            observer(&event);
        }
    }
}

impl RecordReader for RunContext<'_> {
    fn latest_record(&self, node: &NodeId) -> Option<StoredRecord> {
        match self.read_latest(node) {
            Ok(record) => record,
            Err(err) => {
                warn!(run = %self.run, node = %node, err = %err, "read failed, treating as absent");
                None
            }
        }
    }
}

/// What a step action sees: the run context plus the key it will publish to.
pub struct StepContext<'a> {
    ctx: &'a RunContext<'a>,
    node: &'a NodeId,
    iteration: Iteration,
}

impl<'a> StepContext<'a> {
    pub fn new(ctx: &'a RunContext<'a>, node: &'a NodeId, iteration: Iteration) -> Self {
        Self {
            ctx,
            node,
            iteration,
        }
    }

    pub fn run(&self) -> &RunId {
        self.ctx.run()
    }

    /// Node this step writes to.
    pub fn node(&self) -> &NodeId {
        self.node
    }

    /// Iteration this execution will be recorded under.
    pub fn iteration(&self) -> Iteration {
        self.iteration
    }

    pub fn read_latest(&self, node: &NodeId) -> Result<Option<StoredRecord>, StoreError> {
        self.ctx.read_latest(node)
    }

    pub fn read_at(
        &self,
        node: &NodeId,
        iteration: Iteration,
    ) -> Result<Option<StoredRecord>, StoreError> {
        self.ctx.read_at(node, iteration)
    }

    pub fn latest<T: DeserializeOwned>(&self, node: &NodeId) -> Option<T> {
        self.ctx.latest(node)
    }
}

impl RecordReader for StepContext<'_> {
    fn latest_record(&self, node: &NodeId) -> Option<StoredRecord> {
        self.ctx.latest_record(node)
    }
}
