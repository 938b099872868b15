//! Workflow engine: a tree of steps interpreted against a [`RunStore`](crate::store::RunStore).
//!
//! Nodes communicate only through the store. A step reads upstream records
//! by node id, runs its action, validates the output against its shape and
//! publishes exactly one record at the next free iteration.

pub mod context;
pub mod interpreter;
pub mod node;
pub mod step;

pub use context::{Event, Observer, RunContext, StepContext};
pub use interpreter::{Outcome, execute};
pub use node::{LoopState, Node, OnMaxReached, RetryLoop, SequencePolicy, validate_topology};
pub use step::{Action, SkipCondition, Step, action};
