//! Executes a workflow tree against a run store.
//!
//! Retry loops mark the start of every pass with a baseline: the next
//! iteration of each node in the body at that moment. When a run is resumed
//! inside an interrupted pass, steps that already wrote at or above their
//! baseline keep that record instead of running again.

use std::collections::BTreeMap;
use std::panic;
use std::thread;

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::core::error::{EngineError, StoreError};
use crate::core::records::LoopMark;
use crate::core::types::{Iteration, NodeId, RecordKey};
use crate::engine::context::{Event, RunContext, StepContext};
use crate::engine::node::{
    LoopState, Node, OnMaxReached, Parallel, RetryLoop, Sequence, SequencePolicy,
};
use crate::engine::step::Step;
use crate::store::next_iteration;

/// Result of executing one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A step published a record (or kept the one from an interrupted pass).
    Written { node: NodeId, iteration: u32 },
    /// A step's skip condition held; nothing was written.
    Skipped { node: NodeId, iteration: u32 },
    /// A sequence or parallel group finished.
    Completed,
    /// A retry loop terminated after `passes` passes in this activation.
    Looped {
        node: NodeId,
        passes: u32,
        satisfied: bool,
    },
}

type Baseline = BTreeMap<NodeId, Iteration>;

pub fn execute(node: &Node, ctx: &RunContext<'_>) -> Result<Outcome, EngineError> {
    execute_in(node, ctx, None)
}

/// `pass` is the baseline of the innermost loop pass around `node`.
fn execute_in(
    node: &Node,
    ctx: &RunContext<'_>,
    pass: Option<&Baseline>,
) -> Result<Outcome, EngineError> {
    match node {
        Node::Step(step) => execute_step(step, ctx, pass),
        Node::Sequence(sequence) => execute_sequence(sequence, ctx, pass),
        Node::Parallel(parallel) => execute_parallel(parallel, ctx, pass),
        Node::RetryLoop(retry) => execute_retry_loop(retry, ctx, pass),
    }
}

#[instrument(skip_all, fields(run = %ctx.run(), node = %step.id()))]
fn execute_step(
    step: &Step,
    ctx: &RunContext<'_>,
    pass: Option<&Baseline>,
) -> Result<Outcome, EngineError> {
    let node = step.id();
    let iteration = next_iteration(ctx.store(), ctx.run(), node)?;

    if let Some(written) = written_in_pass(node, iteration, pass) {
        debug!(iteration = written, "record kept from interrupted pass");
        ctx.emit(Event::StepRecovered {
            node,
            iteration: written,
        });
        return Ok(Outcome::Written {
            node: node.clone(),
            iteration: written,
        });
    }

    if step.should_skip(ctx) {
        debug!(iteration, "skip condition holds");
        ctx.emit(Event::StepSkipped { node, iteration });
        return Ok(Outcome::Skipped {
            node: node.clone(),
            iteration,
        });
    }

    ctx.emit(Event::StepStarted { node, iteration });
    let step_ctx = StepContext::new(ctx, node, iteration);
    let payload = match step.action().run(&step_ctx) {
        Ok(payload) => payload,
        Err(cause) => {
            return Err(step_failed(
                ctx,
                EngineError::ActionFailure {
                    node: node.clone(),
                    cause,
                },
            ));
        }
    };

    let violations = step.shape().violations(&payload);
    if !violations.is_empty() {
        return Err(step_failed(
            ctx,
            EngineError::ContractViolation {
                node: node.clone(),
                violations,
            },
        ));
    }

    ctx.store()
        .write(&RecordKey::new(ctx.run(), node, iteration), payload)
        .map_err(|err| step_failed(ctx, err.into()))?;
    info!(iteration, "record written");
    ctx.emit(Event::StepWritten { node, iteration });
    Ok(Outcome::Written {
        node: node.clone(),
        iteration,
    })
}

/// Iteration `node` already wrote during the current pass, if any.
fn written_in_pass(
    node: &NodeId,
    next: Iteration,
    pass: Option<&Baseline>,
) -> Option<Iteration> {
    let floor = *pass?.get(node)?;
    (next > floor).then(|| next - 1)
}

fn step_failed(ctx: &RunContext<'_>, err: EngineError) -> EngineError {
    let node = match &err {
        EngineError::ActionFailure { node, .. }
        | EngineError::ContractViolation { node, .. }
        | EngineError::DuplicateRecord { node, .. } => Some(node),
        _ => None,
    };
    warn!(err = %err, "step failed");
    if let Some(node) = node {
        ctx.emit(Event::StepFailed { node, error: &err });
    }
    err
}

fn execute_sequence(
    sequence: &Sequence,
    ctx: &RunContext<'_>,
    pass: Option<&Baseline>,
) -> Result<Outcome, EngineError> {
    for child in &sequence.children {
        match execute_in(child, ctx, pass) {
            Ok(_) => {}
            Err(err)
                if sequence.policy == SequencePolicy::BestEffort && err.is_recoverable() =>
            {
                warn!(
                    run = %ctx.run(),
                    err = %err,
                    "best-effort sequence continuing past failure"
                );
                ctx.emit(Event::FailureTolerated { error: &err });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(Outcome::Completed)
}

/// Runs every child to completion, then reports all failures together.
fn execute_parallel(
    parallel: &Parallel,
    ctx: &RunContext<'_>,
    pass: Option<&Baseline>,
) -> Result<Outcome, EngineError> {
    let results: Vec<Result<Outcome, EngineError>> = thread::scope(|scope| {
        let handles: Vec<_> = parallel
            .children
            .iter()
            .map(|child| scope.spawn(move || execute_in(child, ctx, pass)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| panic::resume_unwind(payload))
            })
            .collect()
    });

    let failures: Vec<EngineError> = results.into_iter().filter_map(Result::err).collect();
    if failures.is_empty() {
        Ok(Outcome::Completed)
    } else {
        Err(EngineError::Aggregate { failures })
    }
}

/// How a loop picks up from its latest mark.
enum Resume {
    /// The loop finished inside the enclosing pass being resumed.
    Done(Outcome),
    /// A new activation with this number.
    Fresh(u32),
    /// The marked pass was interrupted; run it again with its baseline.
    Interrupted { state: LoopState, baseline: Baseline },
}

#[instrument(skip_all, fields(run = %ctx.run(), node = %retry.id))]
fn execute_retry_loop(
    retry: &RetryLoop,
    ctx: &RunContext<'_>,
    enclosing: Option<&Baseline>,
) -> Result<Outcome, EngineError> {
    let (mut state, mut interrupted) = match resume_point(retry, ctx, enclosing)? {
        Resume::Done(outcome) => {
            info!("loop already finished before the interruption");
            return Ok(outcome);
        }
        Resume::Fresh(activation) => (LoopState { activation, pass: 0 }, None),
        Resume::Interrupted { state, baseline } => (state, Some(baseline)),
    };
    let mut last = Baseline::new();

    loop {
        let baseline = match interrupted.take() {
            Some(baseline) => {
                info!(
                    activation = state.activation,
                    pass = state.pass,
                    "resuming interrupted pass"
                );
                baseline
            }
            None => {
                if (retry.until)(ctx, &state) {
                    return finish(retry, ctx, state, true, last);
                }
                if state.pass >= retry.max_iterations {
                    let outcome = finish(retry, ctx, state, false, last)?;
                    return match retry.on_max_reached {
                        OnMaxReached::ReturnLast => Ok(outcome),
                        OnMaxReached::Fail => Err(EngineError::MaxIterationsExceeded {
                            node: retry.id.clone(),
                            max_iterations: retry.max_iterations,
                        }),
                    };
                }
                start_pass(retry, ctx, state)?
            }
        };

        debug!(activation = state.activation, pass = state.pass, "loop pass");
        ctx.emit(Event::LoopPassStarted {
            node: &retry.id,
            activation: state.activation,
            pass: state.pass,
        });
        execute_in(&retry.body, ctx, Some(&baseline))?;
        last = baseline;
        state.pass += 1;
    }
}

/// Record where every body node stands and mark the pass as started.
fn start_pass(
    retry: &RetryLoop,
    ctx: &RunContext<'_>,
    state: LoopState,
) -> Result<Baseline, EngineError> {
    let mut baseline = Baseline::new();
    for node in retry.body.writers() {
        baseline.insert(node.clone(), next_iteration(ctx.store(), ctx.run(), node)?);
    }
    write_mark(
        retry,
        ctx,
        &LoopMark {
            activation: state.activation,
            pass: state.pass,
            finished: false,
            satisfied: false,
            baseline: baseline.clone(),
        },
    )?;
    Ok(baseline)
}

fn finish(
    retry: &RetryLoop,
    ctx: &RunContext<'_>,
    state: LoopState,
    satisfied: bool,
    last: Baseline,
) -> Result<Outcome, EngineError> {
    write_mark(
        retry,
        ctx,
        &LoopMark {
            activation: state.activation,
            pass: state.pass,
            finished: true,
            satisfied,
            baseline: last,
        },
    )?;
    if satisfied {
        info!(passes = state.pass, "loop condition satisfied");
    } else {
        warn!(
            passes = state.pass,
            max_iterations = retry.max_iterations,
            "loop reached max iterations"
        );
    }
    ctx.emit(Event::LoopFinished {
        node: &retry.id,
        passes: state.pass,
        satisfied,
    });
    Ok(Outcome::Looped {
        node: retry.id.clone(),
        passes: state.pass,
        satisfied,
    })
}

/// Where the loop picks up, derived from its latest mark.
///
/// Without a mark the loop starts its first activation. A finished mark
/// means the loop is entered again, and an unfinished one that the process
/// stopped inside the marked pass. Inside a resumed pass of an enclosing
/// loop, marks older than that pass belong to earlier activations, while a
/// finished mark written during it means this loop already completed there.
fn resume_point(
    retry: &RetryLoop,
    ctx: &RunContext<'_>,
    enclosing: Option<&Baseline>,
) -> Result<Resume, EngineError> {
    let Some(record) = ctx.read_latest(&retry.id)? else {
        return Ok(Resume::Fresh(0));
    };
    let mark: LoopMark = serde_json::from_value(record.payload)
        .with_context(|| format!("decode loop mark {}", record.key))
        .map_err(StoreError::Backend)?;

    let floor = enclosing.and_then(|baseline| baseline.get(&retry.id)).copied();
    let in_enclosing_pass = floor.map(|floor| record.key.iteration >= floor);
    Ok(match (in_enclosing_pass, mark.finished) {
        (Some(false), _) | (None, true) => Resume::Fresh(mark.activation + 1),
        (Some(true), true) => Resume::Done(Outcome::Looped {
            node: retry.id.clone(),
            passes: mark.pass,
            satisfied: mark.satisfied,
        }),
        (_, false) => Resume::Interrupted {
            state: LoopState {
                activation: mark.activation,
                pass: mark.pass,
            },
            baseline: mark.baseline,
        },
    })
}

fn write_mark(
    retry: &RetryLoop,
    ctx: &RunContext<'_>,
    mark: &LoopMark,
) -> Result<(), EngineError> {
    let iteration = next_iteration(ctx.store(), ctx.run(), &retry.id)?;
    let payload = serde_json::to_value(mark)
        .context("encode loop mark")
        .map_err(StoreError::Backend)?;
    ctx.store().write(&RecordKey::new(ctx.run(), &retry.id, iteration), payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use serde_json::{Value, json};

    use crate::core::shape::OutputShape;
    use crate::core::types::RunId;
    use crate::engine::step::action;
    use crate::store::{MemoryStore, RunStore};

    fn id(s: &str) -> NodeId {
        NodeId::new(s).expect("node id")
    }

    fn run_id() -> RunId {
        RunId::new("run-1").expect("run id")
    }

    fn any_shape() -> OutputShape {
        OutputShape::from_schema("object", &json!({"type": "object"})).expect("shape")
    }

    fn flag_shape() -> OutputShape {
        OutputShape::from_schema(
            "flag",
            &json!({
                "type": "object",
                "required": ["ok"],
                "properties": {"ok": {"type": "boolean"}}
            }),
        )
        .expect("shape")
    }

    fn traced(name: &str, trace: &Arc<Mutex<Vec<String>>>) -> Node {
        let label = name.to_string();
        let trace = Arc::clone(trace);
        Step::new(
            id(name),
            any_shape(),
            action(move |_| {
                trace.lock().expect("trace lock").push(label.clone());
                Ok(json!({}))
            }),
        )
        .into()
    }

    fn constant(name: &str, payload: Value) -> Node {
        Step::new(id(name), any_shape(), action(move |_| Ok(payload.clone()))).into()
    }

    fn failing(name: &str) -> Node {
        Step::new(id(name), any_shape(), action(|_| Err(anyhow!("agent exited 1")))).into()
    }

    /// Step counting its executions; fails the first `failures` of them.
    fn counted(name: &str, runs: &Arc<AtomicU32>, failures: u32) -> Node {
        let runs = Arc::clone(runs);
        Step::new(
            id(name),
            any_shape(),
            action(move |_| {
                if runs.fetch_add(1, Ordering::SeqCst) < failures {
                    return Err(anyhow!("agent crashed"));
                }
                Ok(json!({}))
            }),
        )
        .into()
    }

    fn latest_mark(store: &MemoryStore, node: &str) -> LoopMark {
        let record = store
            .read_latest(&run_id(), &id(node))
            .expect("read")
            .expect("mark present");
        serde_json::from_value(record.payload).expect("decode mark")
    }

    #[test]
    fn sequence_runs_children_in_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);
        let tree = Node::sequence(vec![
            traced("a", &trace),
            traced("b", &trace),
            traced("c", &trace),
        ]);

        assert_eq!(execute(&tree, &ctx).expect("execute"), Outcome::Completed);
        assert_eq!(*trace.lock().expect("trace lock"), vec!["a", "b", "c"]);
    }

    #[test]
    fn fail_fast_sequence_stops_at_first_failure() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);
        let tree = Node::sequence(vec![failing("a"), constant("b", json!({}))]);

        let err = execute(&tree, &ctx).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ActionFailure { ref node, .. } if node.as_str() == "a"
        ));
        assert!(store.read_latest(&run_id(), &id("b")).expect("read").is_none());
    }

    #[test]
    fn best_effort_sequence_tolerates_recoverable_failures() {
        let store = MemoryStore::new();
        let tolerated = AtomicU32::new(0);
        let observer = |event: &Event<'_>| {
            if matches!(event, Event::FailureTolerated { .. }) {
                tolerated.fetch_add(1, Ordering::SeqCst);
            }
        };
        let ctx = RunContext::new(run_id(), &store).with_observer(&observer);
        let tree = Node::best_effort(vec![failing("a"), constant("b", json!({}))]);

        assert_eq!(execute(&tree, &ctx).expect("execute"), Outcome::Completed);
        assert!(store.read_latest(&run_id(), &id("b")).expect("read").is_some());
        assert_eq!(tolerated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn best_effort_sequence_still_propagates_duplicate_writes() {
        let store = Arc::new(MemoryStore::new());
        let racer = Arc::clone(&store);
        let ctx = RunContext::new(run_id(), store.as_ref());
        let tree = Node::best_effort(vec![
            Step::new(
                id("a"),
                any_shape(),
                action(move |step| {
                    let key = RecordKey::new(step.run(), step.node(), step.iteration());
                    racer.write(&key, json!({}))?;
                    Ok(json!({}))
                }),
            )
            .into(),
        ]);

        let err = execute(&tree, &ctx).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DuplicateRecord { iteration: 0, .. }
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn parallel_runs_every_child_and_aggregates_failures() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);
        let tree = Node::parallel(vec![
            constant("rev-claude", json!({"approved": true})),
            failing("rev-codex"),
            constant("rev-gemini", json!({"approved": true})),
        ]);

        let err = execute(&tree, &ctx).unwrap_err();
        let EngineError::Aggregate { failures } = err else {
            panic!("expected aggregate, got {err:?}");
        };
        assert_eq!(failures.len(), 1);
        for sibling in ["rev-claude", "rev-gemini"] {
            assert!(
                store.read_latest(&run_id(), &id(sibling)).expect("read").is_some(),
                "{sibling} should have written"
            );
        }
    }

    #[test]
    fn step_records_land_at_successive_iterations() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);
        let tree = constant("plan-1", json!({"n": 1}));

        assert_eq!(
            execute(&tree, &ctx).expect("first"),
            Outcome::Written {
                node: id("plan-1"),
                iteration: 0
            }
        );
        assert_eq!(
            execute(&tree, &ctx).expect("second"),
            Outcome::Written {
                node: id("plan-1"),
                iteration: 1
            }
        );
    }

    #[test]
    fn skipped_step_runs_no_action_and_leaves_prior_record_latest() {
        let store = MemoryStore::new();
        store
            .write(&RecordKey::new(&run_id(), &id("fix-1"), 0), json!({"pass": 0}))
            .expect("seed");
        let ran = Arc::new(AtomicU32::new(0));
        let ctx = RunContext::new(run_id(), &store);
        let counter = Arc::clone(&ran);
        let tree: Node = Step::new(
            id("fix-1"),
            any_shape(),
            action(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({}))
            }),
        )
        .skip_if(|_| true)
        .into();

        assert_eq!(
            execute(&tree, &ctx).expect("execute"),
            Outcome::Skipped {
                node: id("fix-1"),
                iteration: 1
            }
        );
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        let latest = store
            .read_latest(&run_id(), &id("fix-1"))
            .expect("read")
            .expect("prior record");
        assert_eq!(latest.key.iteration, 0);
        assert_eq!(latest.payload, json!({"pass": 0}));
        assert_eq!(store.next_iteration(&run_id(), &id("fix-1")).expect("next"), 1);
    }

    #[test]
    fn malformed_output_is_a_contract_violation_and_is_not_written() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);
        let tree: Node =
            Step::new(id("check"), flag_shape(), action(|_| Ok(json!({"ok": "yes"})))).into();

        let err = execute(&tree, &ctx).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ContractViolation { ref violations, .. } if !violations.is_empty()
        ));
        assert!(err.is_recoverable());
        assert!(store.read_latest(&run_id(), &id("check")).expect("read").is_none());
    }

    #[test]
    fn action_sees_its_own_iteration_and_upstream_records() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);
        let tree = Node::sequence(vec![
            constant("upstream", json!({"ok": true})),
            Step::new(
                id("downstream"),
                any_shape(),
                action(|step| {
                    let upstream = step
                        .read_latest(&NodeId::new("upstream")?)?
                        .ok_or_else(|| anyhow!("upstream missing"))?;
                    Ok(json!({
                        "iteration": step.iteration(),
                        "node": step.node().as_str(),
                        "seen": upstream.payload["ok"],
                    }))
                }),
            )
            .into(),
        ]);

        execute(&tree, &ctx).expect("execute");
        let record = store
            .read_latest(&run_id(), &id("downstream"))
            .expect("read")
            .expect("present");
        assert_eq!(
            record.payload,
            json!({"iteration": 0, "node": "downstream", "seen": true})
        );
    }

    /// Loop whose body writes one record per pass; stops once `stop_after` exist.
    fn counting_loop(max: u32, on_max: OnMaxReached, stop_after: u32) -> Node {
        let body = id("body");
        RetryLoop::new(
            id("loop"),
            max,
            Step::new(
                id("body"),
                any_shape(),
                action(|step| Ok(json!({"pass": step.iteration()}))),
            )
            .into(),
        )
        .until(move |ctx, _| {
            ctx.store()
                .next_iteration(ctx.run(), &body)
                .map(|n| n >= stop_after)
                .unwrap_or(false)
        })
        .on_max_reached(on_max)
        .into()
    }

    #[test]
    fn retry_loop_stops_when_condition_flips() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);

        let outcome = execute(&counting_loop(5, OnMaxReached::Fail, 2), &ctx).expect("execute");
        assert_eq!(
            outcome,
            Outcome::Looped {
                node: id("loop"),
                passes: 2,
                satisfied: true
            }
        );
        assert_eq!(store.next_iteration(&run_id(), &id("body")).expect("next"), 2);
    }

    #[test]
    fn retry_loop_with_satisfied_condition_runs_no_pass() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);

        let outcome = execute(&counting_loop(5, OnMaxReached::Fail, 0), &ctx).expect("execute");
        assert_eq!(
            outcome,
            Outcome::Looped {
                node: id("loop"),
                passes: 0,
                satisfied: true
            }
        );
        assert!(store.read_latest(&run_id(), &id("body")).expect("read").is_none());
    }

    #[test]
    fn retry_loop_return_last_finishes_after_one_pass() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);

        let outcome =
            execute(&counting_loop(1, OnMaxReached::ReturnLast, 10), &ctx).expect("execute");
        assert_eq!(
            outcome,
            Outcome::Looped {
                node: id("loop"),
                passes: 1,
                satisfied: false
            }
        );
        assert_eq!(store.next_iteration(&run_id(), &id("body")).expect("next"), 1);
    }

    #[test]
    fn retry_loop_fail_policy_raises_max_iterations_exceeded() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);

        let err = execute(&counting_loop(3, OnMaxReached::Fail, 10), &ctx).unwrap_err();
        assert!(matches!(
            err,
            EngineError::MaxIterationsExceeded {
                max_iterations: 3,
                ..
            }
        ));
        assert_eq!(store.next_iteration(&run_id(), &id("body")).expect("next"), 3);
    }

    #[test]
    fn pass_start_marks_carry_the_body_baseline() {
        let store = MemoryStore::new();
        let ctx = RunContext::new(run_id(), &store);

        execute(&counting_loop(5, OnMaxReached::Fail, 2), &ctx).expect("execute");
        let history = store.history(&run_id(), &id("loop")).expect("history");
        let marks: Vec<LoopMark> = history
            .into_iter()
            .map(|record| serde_json::from_value(record.payload).expect("decode"))
            .collect();
        let floors: Vec<(u32, bool, u32)> = marks
            .iter()
            .map(|mark| (mark.pass, mark.finished, mark.floor(&id("body"))))
            .collect();
        assert_eq!(floors, vec![(0, false, 0), (1, false, 1), (2, true, 1)]);
    }

    #[test]
    fn retry_loop_resumes_inside_interrupted_pass() {
        let store = MemoryStore::new();
        let run = run_id();
        // Pass 0 completed and pass 1 started before the process stopped.
        store
            .write(&RecordKey::new(&run, &id("body"), 0), json!({"pass": 0}))
            .expect("seed body");
        for (pass, floor) in [(0, 0), (1, 1)] {
            let mark = LoopMark {
                activation: 0,
                pass,
                finished: false,
                satisfied: false,
                baseline: BTreeMap::from([(id("body"), floor)]),
            };
            store
                .write(
                    &RecordKey::new(&run, &id("loop"), pass),
                    serde_json::to_value(mark).expect("mark"),
                )
                .expect("seed mark");
        }

        let ctx = RunContext::new(run.clone(), &store);
        let outcome =
            execute(&counting_loop(2, OnMaxReached::ReturnLast, 10), &ctx).expect("execute");
        assert_eq!(
            outcome,
            Outcome::Looped {
                node: id("loop"),
                passes: 2,
                satisfied: false
            }
        );
        assert_eq!(store.next_iteration(&run, &id("body")).expect("next"), 2);

        let last = latest_mark(&store, "loop");
        assert_eq!(
            (last.activation, last.pass, last.finished, last.satisfied),
            (0, 2, true, false)
        );
    }

    #[test]
    fn resumed_pass_keeps_records_of_steps_that_finished() {
        let store = MemoryStore::new();
        let planned = Arc::new(AtomicU32::new(0));
        let built = Arc::new(AtomicU32::new(0));
        let tree: Node = RetryLoop::new(
            id("loop"),
            1,
            Node::sequence(vec![
                counted("plan", &planned, 0),
                counted("build", &built, 1),
            ]),
        )
        .into();
        let recovered = Mutex::new(Vec::new());
        let observer = |event: &Event<'_>| {
            if let Event::StepRecovered { node, iteration } = event {
                recovered
                    .lock()
                    .expect("lock")
                    .push(format!("{node}#{iteration}"));
            }
        };
        let ctx = RunContext::new(run_id(), &store).with_observer(&observer);

        execute(&tree, &ctx).unwrap_err();
        let outcome = execute(&tree, &ctx).expect("resume");

        assert_eq!(
            outcome,
            Outcome::Looped {
                node: id("loop"),
                passes: 1,
                satisfied: false
            }
        );
        assert_eq!(planned.load(Ordering::SeqCst), 1);
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(store.next_iteration(&run_id(), &id("plan")).expect("next"), 1);
        assert_eq!(store.next_iteration(&run_id(), &id("build")).expect("next"), 1);
        assert_eq!(*recovered.lock().expect("lock"), vec!["plan#0"]);
    }

    #[test]
    fn inner_loop_finished_before_interruption_is_not_repeated() {
        let store = MemoryStore::new();
        let inner_runs = Arc::new(AtomicU32::new(0));
        let tail_runs = Arc::new(AtomicU32::new(0));
        let inner = RetryLoop::new(id("inner"), 1, counted("inner-body", &inner_runs, 0));
        let tree: Node = RetryLoop::new(
            id("outer"),
            1,
            Node::sequence(vec![inner.into(), counted("tail", &tail_runs, 1)]),
        )
        .into();
        let ctx = RunContext::new(run_id(), &store);

        execute(&tree, &ctx).unwrap_err();
        execute(&tree, &ctx).expect("resume");

        assert_eq!(inner_runs.load(Ordering::SeqCst), 1);
        assert_eq!(tail_runs.load(Ordering::SeqCst), 2);
        let inner_mark = latest_mark(&store, "inner");
        assert_eq!((inner_mark.activation, inner_mark.finished), (0, true));
        assert_eq!(
            store.history(&run_id(), &id("inner")).expect("history").len(),
            2
        );
    }

    #[test]
    fn reentered_loop_starts_a_fresh_activation() {
        let store = MemoryStore::new();
        let seen = Mutex::new(Vec::new());
        let tree: Node = RetryLoop::new(id("loop"), 1, constant("body", json!({})))
            .until(|_, _| false)
            .into();
        let observer = |event: &Event<'_>| {
            if let Event::LoopPassStarted {
                activation, pass, ..
            } = event
            {
                seen.lock().expect("lock").push((*activation, *pass));
            }
        };
        let ctx = RunContext::new(run_id(), &store).with_observer(&observer);

        execute(&tree, &ctx).expect("first activation");
        execute(&tree, &ctx).expect("second activation");
        assert_eq!(*seen.lock().expect("lock"), vec![(0, 0), (1, 0)]);
    }
}
