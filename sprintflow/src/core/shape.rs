//! Declared output shapes, backed by compiled JSON Schemas.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::Value;

const SPRINT_PLAN_SCHEMA: &str = include_str!("../../schemas/sprint_plan.schema.json");
const TASK_PLAN_SCHEMA: &str = include_str!("../../schemas/task_plan.schema.json");
const IMPLEMENT_SCHEMA: &str = include_str!("../../schemas/implement.schema.json");
const REVIEW_SCHEMA: &str = include_str!("../../schemas/review.schema.json");
const FIX_SCHEMA: &str = include_str!("../../schemas/fix.schema.json");
const TEST_COVERAGE_SCHEMA: &str = include_str!("../../schemas/test_coverage.schema.json");
const SPRINT_TRACKER_SCHEMA: &str = include_str!("../../schemas/sprint_tracker.schema.json");

/// Record kinds with a built-in schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    SprintPlan,
    TaskPlan,
    Implement,
    Review,
    Fix,
    TestCoverage,
    SprintTracker,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::SprintPlan,
        RecordKind::TaskPlan,
        RecordKind::Implement,
        RecordKind::Review,
        RecordKind::Fix,
        RecordKind::TestCoverage,
        RecordKind::SprintTracker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::SprintPlan => "sprint_plan",
            RecordKind::TaskPlan => "task_plan",
            RecordKind::Implement => "implement",
            RecordKind::Review => "review",
            RecordKind::Fix => "fix",
            RecordKind::TestCoverage => "test_coverage",
            RecordKind::SprintTracker => "sprint_tracker",
        }
    }

    /// Raw JSON Schema text for this kind.
    pub fn schema_source(self) -> &'static str {
        match self {
            RecordKind::SprintPlan => SPRINT_PLAN_SCHEMA,
            RecordKind::TaskPlan => TASK_PLAN_SCHEMA,
            RecordKind::Implement => IMPLEMENT_SCHEMA,
            RecordKind::Review => REVIEW_SCHEMA,
            RecordKind::Fix => FIX_SCHEMA,
            RecordKind::TestCoverage => TEST_COVERAGE_SCHEMA,
            RecordKind::SprintTracker => SPRINT_TRACKER_SCHEMA,
        }
    }

    /// File name used when the schema is written next to a run.
    pub fn schema_file_name(self) -> String {
        format!("{}.schema.json", self.as_str())
    }
}

/// Compiled output contract of a step.
///
/// Cheap to clone; the compiled validator is shared.
#[derive(Clone)]
pub struct OutputShape {
    name: String,
    validator: Arc<Validator>,
}

impl OutputShape {
    /// Compile the built-in schema for `kind`.
    pub fn for_kind(kind: RecordKind) -> Result<Self> {
        let schema: Value = serde_json::from_str(kind.schema_source())
            .with_context(|| format!("parse {} schema", kind.as_str()))?;
        Self::from_schema(kind.as_str(), &schema)
    }

    /// Compile an arbitrary JSON Schema (Draft 2020-12).
    pub fn from_schema(name: impl Into<String>, schema: &Value) -> Result<Self> {
        let name = name.into();
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(schema)
            .map_err(|err| anyhow!("compile {name} schema: {err}"))?;
        Ok(Self {
            name,
            validator: Arc::new(validator),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns every violation of the shape; empty when `instance` conforms.
    pub fn violations(&self, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect()
    }
}

impl fmt::Debug for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputShape")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
