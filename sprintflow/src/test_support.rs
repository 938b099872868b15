//! Test-only helpers: scripted step actions and canned record payloads.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::engine::{Action, StepContext};
use crate::workflow::{ActionSource, StepKind};

type Responder = Box<dyn Fn(&StepContext<'_>) -> Result<Value> + Send + Sync>;

enum Scripted {
    Value(Value),
    Fail(String),
    With(Responder),
}

#[derive(Default)]
struct Script {
    queues: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<String>,
}

/// [`ActionSource`] answering each node from a per-node queue.
///
/// Every execution pops the next scripted answer for its node; an empty queue
/// fails the step. Executions are logged as `node#iteration`.
#[derive(Clone, Default)]
pub struct ScriptedActions {
    script: Arc<Mutex<Script>>,
}

impl ScriptedActions {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, node: &str, answer: Scripted) -> &Self {
        self.script
            .lock()
            .expect("script lock")
            .queues
            .entry(node.to_string())
            .or_default()
            .push_back(answer);
        self
    }

    pub fn push(&self, node: &str, payload: Value) -> &Self {
        self.enqueue(node, Scripted::Value(payload))
    }

    pub fn push_failure(&self, node: &str, message: &str) -> &Self {
        self.enqueue(node, Scripted::Fail(message.to_string()))
    }

    /// Answer computed from the step context, e.g. to assert on upstream records.
    pub fn push_with<F>(&self, node: &str, respond: F) -> &Self
    where
        F: Fn(&StepContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.enqueue(node, Scripted::With(Box::new(respond)))
    }

    /// Executed steps in order, as `node#iteration`.
    pub fn calls(&self) -> Vec<String> {
        self.script.lock().expect("script lock").calls.clone()
    }

    /// Scripted answers not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .expect("script lock")
            .queues
            .values()
            .map(VecDeque::len)
            .sum()
    }
}

impl ActionSource for ScriptedActions {
    fn action(&self, _kind: StepKind) -> Result<Arc<dyn Action>> {
        Ok(Arc::new(ScriptedAction {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedAction {
    script: Arc<Mutex<Script>>,
}

impl Action for ScriptedAction {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Value> {
        let node = ctx.node().to_string();
        let answer = {
            let mut script = self
                .script
                .lock()
                .map_err(|_| anyhow!("script lock poisoned"))?;
            script.calls.push(format!("{node}#{}", ctx.iteration()));
            script.queues.get_mut(&node).and_then(VecDeque::pop_front)
        };
        match answer {
            Some(Scripted::Value(payload)) => Ok(payload),
            Some(Scripted::Fail(message)) => Err(anyhow!(message)),
            Some(Scripted::With(respond)) => respond(ctx),
            None => Err(anyhow!("no scripted answer left for {node}")),
        }
    }
}

/// Sprint plan with `tasks` filled slots (1..=3).
pub fn sprint_plan(tasks: u8, project_complete: bool) -> Value {
    let slot = |n: u8| {
        if n <= tasks {
            json!({
                "id": format!("T-{n}"),
                "title": format!("Task {n}"),
                "description": format!("Do task {n}"),
                "acceptance": format!("Task {n} works"),
            })
        } else {
            Value::Null
        }
    };
    json!({
        "task1": slot(1),
        "task2": slot(2),
        "task3": slot(3),
        "projectComplete": project_complete,
        "reasoning": "scripted",
    })
}

pub fn task_plan() -> Value {
    json!({
        "plan": "scripted plan",
        "filesToCreate": [],
        "filesToModify": ["src/lib.rs"],
        "testStrategy": "unit tests",
    })
}

pub fn implement() -> Value {
    json!({
        "filesCreated": null,
        "filesModified": ["src/lib.rs"],
        "commitMessage": "implement",
        "whatWasDone": "scripted",
        "testsPassing": true,
    })
}

pub fn review(approved: bool, issues: &[&str]) -> Value {
    json!({
        "approved": approved,
        "feedback": if approved { "lgtm" } else { "changes requested" },
        "issues": if issues.is_empty() { Value::Null } else { json!(issues) },
    })
}

pub fn fix() -> Value {
    json!({
        "fixesMade": ["scripted fix"],
        "commitMessage": "fix",
        "summary": "scripted",
    })
}

pub fn test_coverage() -> Value {
    json!({
        "coveragePercent": 80.0,
        "testsAdded": 2,
        "summary": "scripted",
        "allPass": true,
    })
}
