//! Sprint workflow topology and its entry point.
//!
//! ```text
//! sprint-loop (until project complete, max_sprints)
//! └─ sequence
//!    ├─ sprint-plan
//!    ├─ task 1..3: sequence
//!    │  ├─ plan-n, impl-n            (skipped when the slot is empty)
//!    │  └─ review-loop-n (until reviewed once and quorum, review_max_iterations)
//!    │     └─ best-effort sequence
//!    │        ├─ parallel: rev-n-claude, rev-n-codex, rev-n-gemini
//!    │        └─ fix-n               (skipped on quorum)
//!    ├─ test-coverage
//!    └─ sprint-tracker
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::info;

use crate::core::gating;
use crate::core::nodes::{self, Reviewer, TASKS_PER_SPRINT};
use crate::core::records::SprintTracker;
use crate::core::shape::{OutputShape, RecordKind};
use crate::core::types::{NodeId, RunId};
use crate::engine::{
    Action, Node, Observer, OnMaxReached, Outcome, RetryLoop, RunContext, Step, StepContext,
    execute, validate_topology,
};
use crate::io::config::SprintflowConfig;
use crate::store::RunStore;

/// Agent-backed steps of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    SprintPlan,
    TaskPlan(u8),
    Implement(u8),
    Review(u8, Reviewer),
    Fix(u8),
    TestCoverage,
}

impl StepKind {
    pub fn node(self) -> NodeId {
        match self {
            StepKind::SprintPlan => nodes::node(nodes::SPRINT_PLAN),
            StepKind::TaskPlan(task) => nodes::task_plan(task),
            StepKind::Implement(task) => nodes::implement(task),
            StepKind::Review(task, reviewer) => nodes::review(task, reviewer),
            StepKind::Fix(task) => nodes::fix(task),
            StepKind::TestCoverage => nodes::node(nodes::TEST_COVERAGE),
        }
    }

    pub fn record_kind(self) -> RecordKind {
        match self {
            StepKind::SprintPlan => RecordKind::SprintPlan,
            StepKind::TaskPlan(_) => RecordKind::TaskPlan,
            StepKind::Implement(_) => RecordKind::Implement,
            StepKind::Review(..) => RecordKind::Review,
            StepKind::Fix(_) => RecordKind::Fix,
            StepKind::TestCoverage => RecordKind::TestCoverage,
        }
    }
}

/// Supplies the action behind every agent step.
pub trait ActionSource {
    fn action(&self, kind: StepKind) -> Result<Arc<dyn Action>>;
}

/// Loop bounds of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub max_sprints: u32,
    pub review_max_iterations: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_sprints: 25,
            review_max_iterations: 3,
        }
    }
}

impl From<&SprintflowConfig> for Settings {
    fn from(cfg: &SprintflowConfig) -> Self {
        Self {
            max_sprints: cfg.max_sprints,
            review_max_iterations: cfg.review_max_iterations,
        }
    }
}

/// Summary of one `run_workflow` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOutcome {
    pub run_id: RunId,
    pub sprints_completed: u32,
    pub project_complete: bool,
    /// Sprint-loop passes executed by this call.
    pub passes: u32,
    /// The sprint loop stopped at `max_sprints` without the project being complete.
    pub capped: bool,
}

struct Builder<'a> {
    actions: &'a dyn ActionSource,
    settings: Settings,
    shapes: HashMap<RecordKind, OutputShape>,
}

impl Builder<'_> {
    fn shape(&self, kind: RecordKind) -> Result<OutputShape> {
        self.shapes
            .get(&kind)
            .cloned()
            .with_context(|| format!("missing {} shape", kind.as_str()))
    }

    fn agent_step(&self, kind: StepKind) -> Result<Step> {
        let action = self
            .actions
            .action(kind)
            .with_context(|| format!("action for {}", kind.node()))?;
        Ok(Step::new(kind.node(), self.shape(kind.record_kind())?, action))
    }

    fn task_pipeline(&self, task: u8) -> Result<Node> {
        let mut reviews: Vec<Node> = Vec::new();
        for reviewer in Reviewer::ALL {
            reviews.push(self.agent_step(StepKind::Review(task, reviewer))?.into());
        }
        let fix = self
            .agent_step(StepKind::Fix(task))?
            .skip_if(move |ctx| gating::is_quorum_approved(ctx, task));
        let review_loop = RetryLoop::new(
            nodes::review_loop(task),
            self.settings.review_max_iterations,
            Node::best_effort(vec![Node::parallel(reviews), fix.into()]),
        )
        .until(move |ctx, state| {
            gating::task_for(ctx, task).is_none()
                || (state.pass > 0 && gating::is_quorum_approved(ctx, task))
        })
        .on_max_reached(OnMaxReached::ReturnLast);

        Ok(Node::sequence(vec![
            self.agent_step(StepKind::TaskPlan(task))?
                .skip_if(move |ctx| gating::task_for(ctx, task).is_none())
                .into(),
            self.agent_step(StepKind::Implement(task))?
                .skip_if(move |ctx| gating::task_for(ctx, task).is_none())
                .into(),
            review_loop.into(),
        ]))
    }

    fn build(&self) -> Result<Node> {
        let mut sprint = vec![self.agent_step(StepKind::SprintPlan)?.into()];
        for task in 1..=TASKS_PER_SPRINT {
            sprint.push(self.task_pipeline(task)?);
        }
        sprint.push(self.agent_step(StepKind::TestCoverage)?.into());
        sprint.push(
            Step::new(
                nodes::node(nodes::SPRINT_TRACKER),
                self.shape(RecordKind::SprintTracker)?,
                Arc::new(TrackerAction),
            )
            .into(),
        );

        Ok(RetryLoop::new(
            nodes::node(nodes::SPRINT_LOOP),
            self.settings.max_sprints,
            Node::sequence(sprint),
        )
        .until(|ctx, _| gating::is_project_complete(ctx))
        .on_max_reached(OnMaxReached::ReturnLast)
        .into())
    }
}

/// Assemble the sprint workflow. The tree is immutable and may be executed
/// against any number of runs.
pub fn build_workflow(actions: &dyn ActionSource, settings: &Settings) -> Result<Node> {
    let mut shapes = HashMap::new();
    for kind in RecordKind::ALL {
        shapes.insert(kind, OutputShape::for_kind(kind)?);
    }
    let workflow = Builder {
        actions,
        settings: *settings,
        shapes,
    }
    .build()?;

    let errors = validate_topology(&workflow);
    if !errors.is_empty() {
        bail!("invalid workflow:\n- {}", errors.join("\n- "));
    }
    Ok(workflow)
}

/// Closes a sprint: bumps the completed-sprint counter.
struct TrackerAction;

impl Action for TrackerAction {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Value> {
        let sprints_completed = gating::sprints_completed(ctx) + 1;
        let planned: Vec<u8> = (1..=TASKS_PER_SPRINT)
            .filter(|task| gating::task_for(ctx, *task).is_some())
            .collect();
        let approved = planned
            .iter()
            .filter(|task| gating::is_quorum_approved(ctx, **task))
            .count();
        let mut summary = format!(
            "sprint {sprints_completed} finished: {approved}/{} tasks approved",
            planned.len()
        );
        if gating::is_project_complete(ctx) {
            summary.push_str("; planner declared the project complete");
        }
        let record = SprintTracker {
            sprints_completed,
            summary,
        };
        serde_json::to_value(record).context("encode sprint tracker")
    }
}

/// Run (or resume) the sprint workflow for `run`.
///
/// Resuming is the same call: iterations and loop progress are derived from
/// the records already in `store`.
pub fn run_workflow(
    run: &RunId,
    store: &dyn RunStore,
    actions: &dyn ActionSource,
    settings: &Settings,
    observer: Option<Observer<'_>>,
) -> Result<WorkflowOutcome> {
    let workflow = build_workflow(actions, settings)?;
    let mut ctx = RunContext::new(run.clone(), store);
    if let Some(observer) = observer {
        ctx = ctx.with_observer(observer);
    }

    info!(run = %run, max_sprints = settings.max_sprints, "starting workflow");
    let outcome = execute(&workflow, &ctx).with_context(|| format!("run {run}"))?;
    let (passes, satisfied) = match outcome {
        Outcome::Looped {
            passes, satisfied, ..
        } => (passes, satisfied),
        other => bail!("sprint loop returned unexpected outcome {other:?}"),
    };

    let result = WorkflowOutcome {
        run_id: run.clone(),
        sprints_completed: gating::sprints_completed(&ctx),
        project_complete: gating::is_project_complete(&ctx),
        passes,
        capped: !satisfied,
    };
    info!(
        run = %run,
        sprints_completed = result.sprints_completed,
        project_complete = result.project_complete,
        "workflow finished"
    );
    Ok(result)
}
