//! Workflow tree: steps composed by sequences, parallel groups and retry loops.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::core::types::NodeId;
use crate::engine::context::RunContext;
use crate::engine::step::Step;

#[derive(Debug)]
pub enum Node {
    Step(Step),
    Sequence(Sequence),
    Parallel(Parallel),
    RetryLoop(RetryLoop),
}

impl Node {
    /// Children run in order; the first failure aborts the rest.
    pub fn sequence(children: Vec<Node>) -> Self {
        Node::Sequence(Sequence {
            children,
            policy: SequencePolicy::FailFast,
        })
    }

    /// Children run in order; recoverable failures are logged and skipped over.
    pub fn best_effort(children: Vec<Node>) -> Self {
        Node::Sequence(Sequence {
            children,
            policy: SequencePolicy::BestEffort,
        })
    }

    pub fn parallel(children: Vec<Node>) -> Self {
        Node::Parallel(Parallel { children })
    }

    /// Every node id this subtree writes to, in tree order.
    pub fn writers(&self) -> Vec<&NodeId> {
        let mut out = Vec::new();
        collect_writers(self, &mut out);
        out
    }
}

impl From<Step> for Node {
    fn from(step: Step) -> Self {
        Node::Step(step)
    }
}

impl From<RetryLoop> for Node {
    fn from(retry: RetryLoop) -> Self {
        Node::RetryLoop(retry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePolicy {
    FailFast,
    BestEffort,
}

#[derive(Debug)]
pub struct Sequence {
    pub children: Vec<Node>,
    pub policy: SequencePolicy,
}

#[derive(Debug)]
pub struct Parallel {
    pub children: Vec<Node>,
}

/// What a retry loop does once `max_iterations` passes ran without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMaxReached {
    /// Finish normally; the last pass's records stand.
    ReturnLast,
    Fail,
}

impl FromStr for OnMaxReached {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "return-last" => Ok(OnMaxReached::ReturnLast),
            "fail" => Ok(OnMaxReached::Fail),
            other => bail!(
                "unknown on-max-reached policy '{other}' (expected return-last or fail)"
            ),
        }
    }
}

/// Position of a retry loop, handed to its termination predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopState {
    /// How many times the loop was entered before this activation.
    pub activation: u32,
    /// Passes of the body completed in this activation.
    pub pass: u32,
}

pub type Predicate = Arc<dyn Fn(&RunContext<'_>, &LoopState) -> bool + Send + Sync>;

/// Repeats its body until `until` holds or `max_iterations` passes completed.
///
/// `until` is checked before every pass, so a loop whose condition already
/// holds runs zero passes. Progress is persisted under the loop's own id.
pub struct RetryLoop {
    pub id: NodeId,
    pub body: Box<Node>,
    pub until: Predicate,
    pub max_iterations: u32,
    pub on_max_reached: OnMaxReached,
}

impl RetryLoop {
    /// A loop that runs `body` `max_iterations` times unless told to stop earlier.
    pub fn new(id: NodeId, max_iterations: u32, body: Node) -> Self {
        Self {
            id,
            body: Box::new(body),
            until: Arc::new(|_, _| false),
            max_iterations,
            on_max_reached: OnMaxReached::ReturnLast,
        }
    }

    pub fn until<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RunContext<'_>, &LoopState) -> bool + Send + Sync + 'static,
    {
        self.until = Arc::new(predicate);
        self
    }

    pub fn on_max_reached(mut self, policy: OnMaxReached) -> Self {
        self.on_max_reached = policy;
        self
    }
}

impl fmt::Debug for RetryLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryLoop")
            .field("id", &self.id)
            .field("max_iterations", &self.max_iterations)
            .field("on_max_reached", &self.on_max_reached)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

fn collect_writers<'a>(node: &'a Node, out: &mut Vec<&'a NodeId>) {
    match node {
        Node::Step(step) => out.push(step.id()),
        Node::Sequence(Sequence { children, .. }) | Node::Parallel(Parallel { children }) => {
            for child in children {
                collect_writers(child, out);
            }
        }
        Node::RetryLoop(retry) => {
            out.push(&retry.id);
            collect_writers(&retry.body, out);
        }
    }
}

/// Structural checks the type system cannot express:
/// - every step and loop id is unique (one writer per node)
/// - retry loops allow at least one pass
/// - composites are non-empty
pub fn validate_topology(root: &Node) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for id in root.writers() {
        if !seen.insert(id.as_str()) {
            errors.push(format!("duplicate node id '{id}'"));
        }
    }
    check_shape(root, &mut errors);
    errors
}

fn check_shape(node: &Node, errors: &mut Vec<String>) {
    match node {
        Node::Step(_) => {}
        Node::Sequence(Sequence { children, .. }) | Node::Parallel(Parallel { children }) => {
            if children.is_empty() {
                errors.push("empty sequence or parallel group".to_string());
            }
            for child in children {
                check_shape(child, errors);
            }
        }
        Node::RetryLoop(retry) => {
            if retry.max_iterations == 0 {
                errors.push(format!("{}: max_iterations must be > 0", retry.id));
            }
            check_shape(&retry.body, errors);
        }
    }
}
