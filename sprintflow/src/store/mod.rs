//! Append-only run store keyed by (run, node, iteration).
//!
//! The store is the only channel between workflow nodes: a step publishes its
//! output with a single [`RunStore::write`], and downstream nodes read it back
//! by key. There is no update or delete; every record stays available for
//! audit.

use serde_json::Value;

use crate::core::error::StoreError;
use crate::core::types::{Iteration, NodeId, RecordKey, RunId, StoredRecord};

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Persistence contract used by the engine.
///
/// Implementations must be safe to share across the threads of a parallel
/// group. The only concurrency control is the write contract: a second write
/// to an occupied key fails with [`StoreError::Duplicate`].
pub trait RunStore: Send + Sync {
    /// Persist `payload` under `key`.
    ///
    /// Fails with `Duplicate` if the key holds a record and with `OutOfOrder`
    /// if `key.iteration` would leave a gap.
    fn write(&self, key: &RecordKey, payload: Value) -> Result<StoredRecord, StoreError>;

    /// Record at the highest existing iteration of `node`, or `None`.
    fn read_latest(&self, run: &RunId, node: &NodeId) -> Result<Option<StoredRecord>, StoreError>;

    fn read_at(
        &self,
        run: &RunId,
        node: &NodeId,
        iteration: Iteration,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// One past the highest existing iteration of `node`, or 0.
    fn next_iteration(&self, run: &RunId, node: &NodeId) -> Result<Iteration, StoreError>;

    /// Every record of `node`, ordered by iteration.
    fn history(&self, run: &RunId, node: &NodeId) -> Result<Vec<StoredRecord>, StoreError>;

    /// Nodes holding at least one record in `run`, sorted.
    fn nodes(&self, run: &RunId) -> Result<Vec<NodeId>, StoreError>;
}

/// Iteration the next execution of `node` must target.
///
/// Always derived from the store; never cached, so a restarted process picks
/// up exactly where the persisted history ends.
pub fn next_iteration(
    store: &dyn RunStore,
    run: &RunId,
    node: &NodeId,
) -> Result<Iteration, StoreError> {
    store.next_iteration(run, node)
}

/// Shared gap/duplicate check for backends that know their next iteration.
pub(crate) fn check_append(key: &RecordKey, next: Iteration) -> Result<(), StoreError> {
    if key.iteration < next {
        return Err(StoreError::Duplicate(key.clone()));
    }
    if key.iteration > next {
        return Err(StoreError::OutOfOrder {
            key: key.clone(),
            expected: next,
        });
    }
    Ok(())
}
