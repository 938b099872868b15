//! `.sprintflow/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{SprintflowConfig, write_config};
use crate::core::shape::RecordKind;
use crate::core::types::RunId;

/// All canonical paths within `.sprintflow/` for a project root.
#[derive(Debug, Clone)]
pub struct SprintflowPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub schemas_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl SprintflowPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".sprintflow");
        Self {
            root: root.clone(),
            config_path: state_dir.join("config.toml"),
            schemas_dir: state_dir.join("schemas"),
            runs_dir: state_dir.join("runs"),
            gitignore_path: state_dir.join(".gitignore"),
            state_dir,
        }
    }

    pub fn schema_path(&self, kind: RecordKind) -> PathBuf {
        self.schemas_dir.join(kind.schema_file_name())
    }

    /// Agent logs for one run live next to its records.
    pub fn logs_dir(&self, run: &RunId) -> PathBuf {
        self.runs_dir.join(run.as_str()).join("logs")
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing sprintflow-owned files.
    pub force: bool,
}

/// Create `.sprintflow/` scaffolding in `root`.
///
/// Fails if `.sprintflow/` already exists unless `options.force` is set.
/// Existing runs are never touched.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<SprintflowPaths> {
    let paths = SprintflowPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "sprintflow init: .sprintflow exists but is not a directory"
        ));
    }
    if paths.state_dir.exists() && !options.force {
        return Err(anyhow!(
            "sprintflow init: .sprintflow already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.runs_dir)?;
    write_file(&paths.gitignore_path, GITIGNORE)?;
    write_config(&paths.config_path, &SprintflowConfig::default())?;
    write_schemas(&paths, true)?;
    Ok(paths)
}

/// Write every built-in output schema to `.sprintflow/schemas/`.
///
/// With `overwrite` unset, files that already exist are left alone.
pub fn write_schemas(paths: &SprintflowPaths, overwrite: bool) -> Result<()> {
    create_dir(&paths.schemas_dir)?;
    for kind in RecordKind::ALL {
        let path = paths.schema_path(kind);
        if overwrite || !path.exists() {
            write_file(&path, kind.schema_source())?;
        }
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const GITIGNORE: &str = "runs/\n";
