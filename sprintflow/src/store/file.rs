//! Durable store: one JSON file per record.
//!
//! Layout: `<runs_dir>/<run>/<node>/<iteration>.json`. A record is first
//! written to a temp file in the node directory and then hard-linked to its
//! final name; the link fails if the name exists, so two writers racing for
//! the same key can never both succeed and readers never see partial files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, anyhow};
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::{RunStore, check_append};
use crate::core::error::StoreError;
use crate::core::types::{Iteration, NodeId, RecordKey, RunId, StoredRecord};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FileStore {
    runs_dir: PathBuf,
}

impl FileStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn run_dir(&self, run: &RunId) -> PathBuf {
        self.runs_dir.join(run.as_str())
    }

    fn node_dir(&self, run: &RunId, node: &NodeId) -> PathBuf {
        self.run_dir(run).join(node.as_str())
    }

    fn record_path(&self, key: &RecordKey) -> PathBuf {
        self.node_dir(&key.run, &key.node)
            .join(format!("{}.json", key.iteration))
    }

    /// Iterations present on disk, ascending.
    fn iterations(&self, run: &RunId, node: &NodeId) -> Result<Vec<Iteration>, StoreError> {
        let dir = self.node_dir(run, node);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("read node dir {}", dir.display()))
                    .into());
            }
        };
        let mut iterations = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(iteration) = name
                .strip_suffix(".json")
                .and_then(|stem| stem.parse::<Iteration>().ok())
            {
                iterations.push(iteration);
            }
        }
        iterations.sort_unstable();
        Ok(iterations)
    }

    fn load(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> {
        let path = self.record_path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("read record {}", path.display()))
                    .into());
            }
        };
        let record: StoredRecord = serde_json::from_str(&contents)
            .with_context(|| format!("parse record {}", path.display()))?;
        if record.key != *key {
            return Err(StoreError::Backend(anyhow!(
                "record {} holds key {}",
                path.display(),
                record.key
            )));
        }
        Ok(Some(record))
    }
}

impl RunStore for FileStore {
    fn write(&self, key: &RecordKey, payload: Value) -> Result<StoredRecord, StoreError> {
        let next = self.next_iteration(&key.run, &key.node)?;
        check_append(key, next)?;

        let dir = self.node_dir(&key.run, &key.node);
        fs::create_dir_all(&dir).with_context(|| format!("create node dir {}", dir.display()))?;

        let record = StoredRecord {
            key: key.clone(),
            written_at: Utc::now(),
            payload,
        };
        let mut buf = serde_json::to_string_pretty(&record).context("serialize record")?;
        buf.push('\n');

        let tmp_path = dir.join(format!(
            ".{}.json.tmp-{}-{}",
            key.iteration,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp record {}", tmp_path.display()))?;

        let final_path = self.record_path(key);
        let linked = fs::hard_link(&tmp_path, &final_path);
        let _ = fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => {
                debug!(key = %key, path = %final_path.display(), "record written");
                Ok(record)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::Duplicate(key.clone()))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("publish record {}", final_path.display()))
                .into()),
        }
    }

    fn read_latest(&self, run: &RunId, node: &NodeId) -> Result<Option<StoredRecord>, StoreError> {
        match self.iterations(run, node)?.last() {
            Some(&iteration) => self.load(&RecordKey::new(run, node, iteration)),
            None => Ok(None),
        }
    }

    fn read_at(
        &self,
        run: &RunId,
        node: &NodeId,
        iteration: Iteration,
    ) -> Result<Option<StoredRecord>, StoreError> {
        self.load(&RecordKey::new(run, node, iteration))
    }

    fn next_iteration(&self, run: &RunId, node: &NodeId) -> Result<Iteration, StoreError> {
        Ok(self
            .iterations(run, node)?
            .last()
            .map(|last| last + 1)
            .unwrap_or(0))
    }

    fn history(&self, run: &RunId, node: &NodeId) -> Result<Vec<StoredRecord>, StoreError> {
        let mut records = Vec::new();
        for iteration in self.iterations(run, node)? {
            if let Some(record) = self.load(&RecordKey::new(run, node, iteration))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn nodes(&self, run: &RunId) -> Result<Vec<NodeId>, StoreError> {
        let dir = self.run_dir(run);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("read run dir {}", dir.display()))
                    .into());
            }
        };
        let mut nodes = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(node) = NodeId::new(name) else { continue };
            if !self.iterations(run, &node)?.is_empty() {
                nodes.push(node);
            }
        }
        nodes.sort();
        Ok(nodes)
    }
}
