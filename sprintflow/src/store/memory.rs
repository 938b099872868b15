//! In-process store; the backend for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::Utc;
use serde_json::Value;

use super::{RunStore, check_append};
use crate::core::error::StoreError;
use crate::core::types::{Iteration, NodeId, RecordKey, RunId, StoredRecord};

/// Records per (run, node); the position in the vector is the iteration.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

type Records = BTreeMap<(RunId, NodeId), Vec<StoredRecord>>;

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("memory store lock poisoned")))
    }
}

impl RunStore for MemoryStore {
    fn write(&self, key: &RecordKey, payload: Value) -> Result<StoredRecord, StoreError> {
        let mut records = self.lock()?;
        let entries = records
            .entry((key.run.clone(), key.node.clone()))
            .or_default();
        check_append(key, entries.len() as Iteration)?;
        let record = StoredRecord {
            key: key.clone(),
            written_at: Utc::now(),
            payload,
        };
        entries.push(record.clone());
        Ok(record)
    }

    fn read_latest(&self, run: &RunId, node: &NodeId) -> Result<Option<StoredRecord>, StoreError> {
        let records = self.lock()?;
        Ok(records
            .get(&(run.clone(), node.clone()))
            .and_then(|entries| entries.last().cloned()))
    }

    fn read_at(
        &self,
        run: &RunId,
        node: &NodeId,
        iteration: Iteration,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let records = self.lock()?;
        Ok(records
            .get(&(run.clone(), node.clone()))
            .and_then(|entries| entries.get(iteration as usize).cloned()))
    }

    fn next_iteration(&self, run: &RunId, node: &NodeId) -> Result<Iteration, StoreError> {
        let records = self.lock()?;
        Ok(records
            .get(&(run.clone(), node.clone()))
            .map(|entries| entries.len() as Iteration)
            .unwrap_or(0))
    }

    fn history(&self, run: &RunId, node: &NodeId) -> Result<Vec<StoredRecord>, StoreError> {
        let records = self.lock()?;
        Ok(records
            .get(&(run.clone(), node.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn nodes(&self, run: &RunId) -> Result<Vec<NodeId>, StoreError> {
        let records = self.lock()?;
        Ok(records
            .iter()
            .filter(|((r, _), entries)| r == run && !entries.is_empty())
            .map(|((_, node), _)| node.clone())
            .collect())
    }
}
