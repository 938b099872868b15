//! Agent-backed step actions.
//!
//! Each action gathers its inputs from the run's records at execution time,
//! renders the step's prompt and hands it to an [`Executor`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::core::gating;
use crate::core::nodes::{self, Reviewer, TASKS_PER_SPRINT};
use crate::core::records::{SprintTask, SprintTracker, TestCoverage};
use crate::engine::{Action, StepContext};
use crate::io::config::{AgentRole, SprintflowConfig};
use crate::io::executor::{ExecRequest, Executor};
use crate::io::init::{SprintflowPaths, write_schemas};
use crate::io::prompt::{PromptEngine, PromptInputs};
use crate::workflow::{ActionSource, StepKind};

/// Agent that answers for `kind`.
pub fn role_for(kind: StepKind) -> AgentRole {
    match kind {
        StepKind::SprintPlan => AgentRole::Planner,
        StepKind::TaskPlan(_) | StepKind::TestCoverage => AgentRole::Writer,
        StepKind::Implement(_) | StepKind::Fix(_) => AgentRole::Coder,
        StepKind::Review(_, Reviewer::Claude) => AgentRole::Writer,
        StepKind::Review(_, Reviewer::Codex) => AgentRole::Auditor,
        StepKind::Review(_, Reviewer::Gemini) => AgentRole::Gemini,
    }
}

struct Shared {
    executor: Arc<dyn Executor>,
    prompts: PromptEngine,
    paths: SprintflowPaths,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

/// [`ActionSource`] that routes every step to a configured agent CLI.
#[derive(Clone)]
pub struct AgentActions {
    shared: Arc<Shared>,
}

impl AgentActions {
    pub fn new(
        executor: Arc<dyn Executor>,
        paths: SprintflowPaths,
        cfg: &SprintflowConfig,
    ) -> Result<Self> {
        write_schemas(&paths, false).context("materialize output schemas")?;
        let workdir = paths.root.join(&cfg.workdir);
        Ok(Self {
            shared: Arc::new(Shared {
                executor,
                prompts: PromptEngine::new()?,
                paths,
                workdir,
                timeout: Duration::from_secs(cfg.step_timeout_secs),
                output_limit_bytes: cfg.output_limit_bytes,
            }),
        })
    }
}

impl ActionSource for AgentActions {
    fn action(&self, kind: StepKind) -> Result<Arc<dyn Action>> {
        Ok(Arc::new(AgentAction {
            kind,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct AgentAction {
    kind: StepKind,
    shared: Arc<Shared>,
}

impl Action for AgentAction {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Value> {
        let inputs = prompt_inputs(self.kind, ctx)?;
        let record_kind = self.kind.record_kind();
        let prompt = self.shared.prompts.render(record_kind, &inputs)?;
        let logs_dir = self.shared.paths.logs_dir(ctx.run());
        let stem = format!("{}-{}", ctx.node(), ctx.iteration());
        let request = ExecRequest {
            role: role_for(self.kind),
            workdir: self.shared.workdir.clone(),
            prompt,
            output_schema_path: self.shared.paths.schema_path(record_kind),
            log_path: logs_dir.join(format!("{stem}.log")),
            last_message_path: logs_dir.join(format!("{stem}.last.md")),
            timeout: self.shared.timeout,
            output_limit_bytes: self.shared.output_limit_bytes,
        };
        debug!(node = %ctx.node(), role = request.role.as_str(), "invoking agent");
        self.shared.executor.exec(&request)
    }
}

/// Everything the prompt for `kind` needs, read from the store.
pub fn prompt_inputs(kind: StepKind, ctx: &StepContext<'_>) -> Result<PromptInputs> {
    let mut inputs = PromptInputs {
        sprint: gating::sprints_completed(ctx) + 1,
        ..PromptInputs::default()
    };
    match kind {
        StepKind::SprintPlan => {
            inputs.previous = ctx
                .latest::<SprintTracker>(&nodes::node(nodes::SPRINT_TRACKER))
                .map(|tracker| tracker.summary);
            inputs.coverage = ctx
                .latest::<TestCoverage>(&nodes::node(nodes::TEST_COVERAGE))
                .map(|report| {
                    format!(
                        "{:.1}% coverage, {} tests added, suite {}. {}",
                        report.coverage_percent,
                        report.tests_added,
                        if report.all_pass { "passing" } else { "failing" },
                        report.summary
                    )
                });
        }
        StepKind::TaskPlan(task) => {
            inputs.task_number = Some(task);
            inputs.task = Some(require_task(ctx, task)?.describe());
        }
        StepKind::Implement(task) => {
            inputs.task_number = Some(task);
            inputs.task = Some(require_task(ctx, task)?.describe());
            inputs.plan = gating::latest_plan(ctx, task).map(|plan| plan.describe());
        }
        StepKind::Review(task, reviewer) => {
            inputs.task_number = Some(task);
            inputs.task = Some(require_task(ctx, task)?.describe());
            inputs.plan = gating::latest_plan(ctx, task).map(|plan| plan.describe());
            inputs.implementation =
                gating::latest_implementation(ctx, task).map(|report| report.describe());
            inputs.fix = gating::latest_fix(ctx, task).map(|fix| fix.describe());
            inputs.reviewer = Some(reviewer.display_name().to_string());
        }
        StepKind::Fix(task) => {
            inputs.task_number = Some(task);
            inputs.task = Some(require_task(ctx, task)?.describe());
            inputs.implementation =
                gating::latest_implementation(ctx, task).map(|report| report.describe());
            inputs.issues = gating::collect_issues(ctx, task);
        }
        StepKind::TestCoverage => {
            inputs.tasks = (1..=TASKS_PER_SPRINT)
                .filter_map(|task| gating::task_for(ctx, task))
                .map(|task| format!("{}: {}", task.id, task.title))
                .collect();
        }
    }
    Ok(inputs)
}

fn require_task(ctx: &StepContext<'_>, task: u8) -> Result<SprintTask> {
    gating::task_for(ctx, task)
        .with_context(|| format!("latest sprint plan has no task {task}"))
}
