//! Agent prompts rendered from minijinja templates.

use anyhow::{Context, Result, anyhow};
use minijinja::Environment;
use serde::Serialize;
use tracing::debug;

use crate::core::shape::RecordKind;

const TEMPLATES: [(&str, &str); 7] = [
    ("contract", include_str!("prompts/contract.md")),
    ("sprint_plan", include_str!("prompts/sprint_plan.md")),
    ("task_plan", include_str!("prompts/task_plan.md")),
    ("implement", include_str!("prompts/implement.md")),
    ("review", include_str!("prompts/review.md")),
    ("fix", include_str!("prompts/fix.md")),
    ("test_coverage", include_str!("prompts/test_coverage.md")),
];

/// Values a template may reference. Unused fields render as nothing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptInputs {
    /// 1-based sprint number.
    pub sprint: u32,
    pub task_number: Option<u8>,
    /// Task description from the sprint plan.
    pub task: Option<String>,
    pub plan: Option<String>,
    /// Report of the latest implementation of the task.
    pub implementation: Option<String>,
    /// Latest fix made on top of that implementation.
    pub fix: Option<String>,
    pub reviewer: Option<String>,
    pub issues: Vec<String>,
    /// Titles of every task in the sprint.
    pub tasks: Vec<String>,
    /// Summary written by the previous sprint's tracker.
    pub previous: Option<String>,
    pub coverage: Option<String>,
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    schema: &'a str,
    #[serde(flatten)]
    inputs: &'a PromptInputs,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load {name} prompt template"))?;
        }
        Ok(Self { env })
    }

    /// Prompt for the agent producing a `kind` record; ends with that kind's output contract.
    pub fn render(&self, kind: RecordKind, inputs: &PromptInputs) -> Result<String> {
        let template = self
            .env
            .get_template(kind.as_str())
            .map_err(|_| anyhow!("no prompt template for {} records", kind.as_str()))?;
        let rendered = template
            .render(TemplateContext {
                schema: kind.schema_source().trim(),
                inputs,
            })
            .with_context(|| format!("render {} prompt", kind.as_str()))?;
        debug!(kind = kind.as_str(), bytes = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}
