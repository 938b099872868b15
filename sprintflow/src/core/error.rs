//! Error taxonomy surfaced by the engine.

use thiserror::Error;

use crate::core::types::{Iteration, NodeId, RecordKey, RunId};

/// Failures reported by a [`RunStore`](crate::store::RunStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0} already exists")]
    Duplicate(RecordKey),
    #[error("out-of-order write to {key}: next iteration is {expected}")]
    OutOfOrder { key: RecordKey, expected: Iteration },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failures raised while executing a workflow node.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A write targeted an occupied (run, node, iteration). Indicates a scheduling bug.
    #[error("duplicate record for {run}/{node} iteration {iteration}")]
    DuplicateRecord {
        run: RunId,
        node: NodeId,
        iteration: Iteration,
    },
    /// The action's output did not match the step's declared shape.
    #[error("step {node} violated its output contract: {}", .violations.join("; "))]
    ContractViolation {
        node: NodeId,
        violations: Vec<String>,
    },
    /// The external action itself failed.
    #[error("step {node} failed: {cause:#}")]
    ActionFailure { node: NodeId, cause: anyhow::Error },
    /// A retry loop configured with `fail` ran out of passes.
    #[error("retry loop {node} exceeded {max_iterations} iterations")]
    MaxIterationsExceeded { node: NodeId, max_iterations: u32 },
    /// One or more children of a parallel group failed.
    #[error("{} parallel step(s) failed: {}", .failures.len(), summarize(.failures))]
    Aggregate { failures: Vec<EngineError> },
    #[error("run store: {0}")]
    Store(#[source] StoreError),
}

impl EngineError {
    /// True for failures a best-effort sequence may tolerate.
    ///
    /// Duplicate writes and store failures are never recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::ContractViolation { .. }
            | EngineError::ActionFailure { .. }
            | EngineError::MaxIterationsExceeded { .. } => true,
            EngineError::Aggregate { failures } => failures.iter().all(EngineError::is_recoverable),
            EngineError::DuplicateRecord { .. } | EngineError::Store(_) => false,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(key) => EngineError::DuplicateRecord {
                run: key.run,
                node: key.node,
                iteration: key.iteration,
            },
            other => EngineError::Store(other),
        }
    }
}

fn summarize(failures: &[EngineError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn node(id: &str) -> NodeId {
        NodeId::new(id).expect("node id")
    }

    #[test]
    fn duplicate_store_error_maps_to_duplicate_record() {
        let run = RunId::new("run-1").expect("run id");
        let key = RecordKey::new(&run, &node("plan-1"), 2);
        let err = EngineError::from(StoreError::Duplicate(key));
        assert!(matches!(
            err,
            EngineError::DuplicateRecord { iteration: 2, .. }
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn aggregate_is_recoverable_only_when_every_failure_is() {
        let action = EngineError::ActionFailure {
            node: node("rev-1-codex"),
            cause: anyhow!("boom"),
        };
        let contract = EngineError::ContractViolation {
            node: node("rev-1-gemini"),
            violations: vec!["missing approved".to_string()],
        };
        let recoverable = EngineError::Aggregate {
            failures: vec![action, contract],
        };
        assert!(recoverable.is_recoverable());
        assert!(recoverable.to_string().starts_with("2 parallel step(s) failed"));

        let fatal = EngineError::Aggregate {
            failures: vec![EngineError::Store(StoreError::Backend(anyhow!("disk")))],
        };
        assert!(!fatal.is_recoverable());
    }
}
