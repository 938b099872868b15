//! Identifiers and keys shared by the store, the engine and the workflow.
//!
//! Run and node ids double as path components in the file-backed store, so
//! both are restricted to `[A-Za-z0-9._-]`.

use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier of one workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Parse a run id, rejecting characters that are unsafe in paths.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable name of a position in the workflow topology.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Parse a node id, rejecting characters that are unsafe in paths.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    /// Build an id from crate-generated names that are valid by construction.
    pub(crate) fn known(id: String) -> Self {
        debug_assert!(validate_id(&id).is_ok(), "invalid node id {id}");
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Iteration counter scoped to one (run, node) pair.
pub type Iteration = u32;

/// Address of exactly one record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub run: RunId,
    pub node: NodeId,
    pub iteration: Iteration,
}

impl RecordKey {
    pub fn new(run: &RunId, node: &NodeId, iteration: Iteration) -> Self {
        Self {
            run: run.clone(),
            node: node.clone(),
            iteration,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.run, self.node, self.iteration)
    }
}

/// Persisted envelope around a step's output payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: RecordKey,
    pub written_at: DateTime<Utc>,
    pub payload: Value,
}

/// Validate an id used for runs and nodes.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("id must not be empty"));
    }
    if id == "." || id == ".." {
        return Err(anyhow!("id must not be '{id}'"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}
