//! Node ids of the sprint workflow topology.

use crate::core::types::NodeId;

/// Number of task pipelines in every sprint.
pub const TASKS_PER_SPRINT: u8 = 3;

pub const SPRINT_LOOP: &str = "sprint-loop";
pub const SPRINT_PLAN: &str = "sprint-plan";
pub const TEST_COVERAGE: &str = "test-coverage";
pub const SPRINT_TRACKER: &str = "sprint-tracker";

/// Independent reviewers; quorum requires all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reviewer {
    Claude,
    Codex,
    Gemini,
}

impl Reviewer {
    pub const ALL: [Reviewer; 3] = [Reviewer::Claude, Reviewer::Codex, Reviewer::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            Reviewer::Claude => "claude",
            Reviewer::Codex => "codex",
            Reviewer::Gemini => "gemini",
        }
    }

    /// Human-facing name used in prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            Reviewer::Claude => "Claude",
            Reviewer::Codex => "Codex",
            Reviewer::Gemini => "Gemini",
        }
    }
}

pub fn node(id: &str) -> NodeId {
    NodeId::known(id.to_string())
}

pub fn task_plan(task: u8) -> NodeId {
    NodeId::known(format!("plan-{task}"))
}

pub fn implement(task: u8) -> NodeId {
    NodeId::known(format!("impl-{task}"))
}

pub fn review(task: u8, reviewer: Reviewer) -> NodeId {
    NodeId::known(format!("rev-{task}-{}", reviewer.as_str()))
}

pub fn fix(task: u8) -> NodeId {
    NodeId::known(format!("fix-{task}"))
}

pub fn review_loop(task: u8) -> NodeId {
    NodeId::known(format!("review-loop-{task}"))
}
