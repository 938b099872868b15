//! Leaf nodes: one action, one output shape, one record per execution.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::core::shape::OutputShape;
use crate::core::types::NodeId;
use crate::engine::context::{RunContext, StepContext};

/// Work performed by a step. Implementations read upstream records through
/// the context and return the payload to publish.
pub trait Action: Send + Sync {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Value>;
}

impl<F> Action for F
where
    F: Fn(&StepContext<'_>) -> Result<Value> + Send + Sync,
{
    fn run(&self, ctx: &StepContext<'_>) -> Result<Value> {
        self(ctx)
    }
}

/// Wraps a closure as a shareable action.
pub fn action<F>(f: F) -> Arc<dyn Action>
where
    F: Fn(&StepContext<'_>) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Evaluated against the store immediately before a step would run.
pub type SkipCondition = Arc<dyn Fn(&RunContext<'_>) -> bool + Send + Sync>;

pub struct Step {
    id: NodeId,
    shape: OutputShape,
    action: Arc<dyn Action>,
    skip_if: Option<SkipCondition>,
}

impl Step {
    pub fn new(id: NodeId, shape: OutputShape, action: Arc<dyn Action>) -> Self {
        Self {
            id,
            shape,
            action,
            skip_if: None,
        }
    }

    /// Skip the step (no action, no record) whenever `condition` holds.
    pub fn skip_if<F>(mut self, condition: F) -> Self
    where
        F: Fn(&RunContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.skip_if = Some(Arc::new(condition));
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn shape(&self) -> &OutputShape {
        &self.shape
    }

    pub(crate) fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }

    pub(crate) fn should_skip(&self, ctx: &RunContext<'_>) -> bool {
        self.skip_if.as_ref().is_some_and(|condition| condition(ctx))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("shape", &self.shape.name())
            .field("conditional", &self.skip_if.is_some())
            .finish()
    }
}
