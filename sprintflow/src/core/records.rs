//! Typed payloads for every record kind the sprint workflow persists.
//!
//! Field names are camelCase on the wire so agent output can be stored
//! verbatim after shape validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{Iteration, NodeId};

/// One task picked by the sprint planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance: String,
}

impl SprintTask {
    /// Render the task as the single-paragraph description handed to agents.
    pub fn describe(&self) -> String {
        format!(
            "{}: {} - {}\n\nAcceptance: {}",
            self.id, self.title, self.description, self.acceptance
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintPlan {
    pub task1: Option<SprintTask>,
    pub task2: Option<SprintTask>,
    pub task3: Option<SprintTask>,
    pub project_complete: bool,
    pub reasoning: String,
}

impl SprintPlan {
    /// Task for pipeline `n` (1-based); `None` for unknown slots.
    pub fn task(&self, n: u8) -> Option<&SprintTask> {
        match n {
            1 => self.task1.as_ref(),
            2 => self.task2.as_ref(),
            3 => self.task3.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    pub plan: String,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    pub test_strategy: String,
}

impl TaskPlan {
    pub fn describe(&self) -> String {
        let mut out = self.plan.trim().to_string();
        for (label, files) in [
            ("Create", &self.files_to_create),
            ("Modify", &self.files_to_modify),
        ] {
            if !files.is_empty() {
                out.push_str(&format!("\n\n{label}: {}", files.join(", ")));
            }
        }
        out.push_str(&format!("\n\nTesting: {}", self.test_strategy.trim()));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implement {
    pub files_created: Option<Vec<String>>,
    pub files_modified: Option<Vec<String>>,
    pub commit_message: String,
    pub what_was_done: String,
    pub tests_passing: bool,
}

impl Implement {
    pub fn describe(&self) -> String {
        let mut out = self.what_was_done.trim().to_string();
        for (label, files) in [
            ("Created", &self.files_created),
            ("Modified", &self.files_modified),
        ] {
            if let Some(files) = files.as_ref().filter(|files| !files.is_empty()) {
                out.push_str(&format!("\n\n{label}: {}", files.join(", ")));
            }
        }
        out.push_str(&format!(
            "\n\nCommit: {}\nTests passing: {}",
            self.commit_message.trim(),
            if self.tests_passing { "yes" } else { "no" }
        ));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub approved: bool,
    pub feedback: String,
    #[serde(default)]
    pub issues: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub fixes_made: Option<Vec<String>>,
    pub commit_message: String,
    pub summary: String,
}

impl Fix {
    pub fn describe(&self) -> String {
        let mut out = self.summary.trim().to_string();
        for fix in self.fixes_made.iter().flatten() {
            out.push_str(&format!("\n- {fix}"));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCoverage {
    pub coverage_percent: f64,
    pub tests_added: u32,
    pub summary: String,
    pub all_pass: bool,
}

/// Output of the in-engine tracker step closing every sprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintTracker {
    pub sprints_completed: u32,
    pub summary: String,
}

/// Bookkeeping a retry loop writes under its own node id.
///
/// `finished: false` is written when pass `pass` starts; `finished: true`
/// closes the activation after `pass` passes. `baseline` holds the next
/// iteration of every node in the loop body when the (last) pass started:
/// records at or above it belong to that pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopMark {
    pub activation: u32,
    pub pass: u32,
    pub finished: bool,
    pub satisfied: bool,
    #[serde(default)]
    pub baseline: BTreeMap<NodeId, Iteration>,
}

impl LoopMark {
    /// First iteration of `node` written by the marked pass; 0 when unknown.
    pub fn floor(&self, node: &NodeId) -> Iteration {
        self.baseline.get(node).copied().unwrap_or(0)
    }
}
