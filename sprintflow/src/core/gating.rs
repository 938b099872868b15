//! Pure gating decisions over persisted records.
//!
//! Every function here is total: absence is an expected state (first pass,
//! skipped step, failed reviewer) and always resolves to the failure-safe
//! answer. Nothing here writes.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::core::nodes::{self, Reviewer};
use crate::core::records::{
    Fix, Implement, LoopMark, Review, SprintPlan, SprintTask, SprintTracker, TaskPlan,
};
use crate::core::types::{NodeId, StoredRecord};

/// Read access to the latest record of a node within one run.
///
/// Implementations must not fail; read errors surface as `None`.
pub trait RecordReader {
    fn latest_record(&self, node: &NodeId) -> Option<StoredRecord>;
}

/// Latest payload of `node` decoded as `T`, or `None` when absent or malformed.
pub fn latest<T: DeserializeOwned>(
    reader: &(impl RecordReader + ?Sized),
    node: &NodeId,
) -> Option<T> {
    decode(reader.latest_record(node)?)
}

fn decode<T: DeserializeOwned>(record: StoredRecord) -> Option<T> {
    match serde_json::from_value(record.payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                node = %record.key.node,
                iteration = record.key.iteration,
                err = %err,
                "ignoring malformed record"
            );
            None
        }
    }
}

/// Latest review of `task` by `reviewer`, if it was written during the
/// current (or last) pass of the task's review loop.
///
/// A reviewer whose action failed this pass leaves only older records behind;
/// those count as absent.
fn current_review(
    reader: &(impl RecordReader + ?Sized),
    task: u8,
    reviewer: Reviewer,
) -> Option<Review> {
    let node = nodes::review(task, reviewer);
    let record = reader.latest_record(&node)?;
    let floor = latest::<LoopMark>(reader, &nodes::review_loop(task))
        .map(|mark| mark.floor(&node))
        .unwrap_or(0);
    if record.key.iteration < floor {
        return None;
    }
    decode(record)
}

/// `projectComplete` of the latest sprint plan; absent means not complete.
pub fn is_project_complete(reader: &(impl RecordReader + ?Sized)) -> bool {
    latest::<SprintPlan>(reader, &nodes::node(nodes::SPRINT_PLAN))
        .map(|plan| plan.project_complete)
        .unwrap_or(false)
}

/// True only when every reviewer has a current review of `task` and all of
/// them approve.
pub fn is_quorum_approved(reader: &(impl RecordReader + ?Sized), task: u8) -> bool {
    Reviewer::ALL.iter().all(|reviewer| {
        current_review(reader, task, *reviewer)
            .map(|review| review.approved)
            .unwrap_or(false)
    })
}

/// Issues raised by the current reviews of `task`, in reviewer order.
pub fn collect_issues(reader: &(impl RecordReader + ?Sized), task: u8) -> Vec<String> {
    Reviewer::ALL
        .iter()
        .filter_map(|reviewer| current_review(reader, task, *reviewer))
        .flat_map(|review| review.issues.unwrap_or_default())
        .collect()
}

/// Sprints recorded by the tracker so far.
pub fn sprints_completed(reader: &(impl RecordReader + ?Sized)) -> u32 {
    latest::<SprintTracker>(reader, &nodes::node(nodes::SPRINT_TRACKER))
        .map(|tracker| tracker.sprints_completed)
        .unwrap_or(0)
}

/// Task assigned to pipeline `task` by the latest sprint plan.
pub fn task_for(reader: &(impl RecordReader + ?Sized), task: u8) -> Option<SprintTask> {
    latest::<SprintPlan>(reader, &nodes::node(nodes::SPRINT_PLAN))
        .and_then(|plan| plan.task(task).cloned())
}

/// Latest implementation plan for pipeline `task`.
pub fn latest_plan(reader: &(impl RecordReader + ?Sized), task: u8) -> Option<TaskPlan> {
    latest::<TaskPlan>(reader, &nodes::task_plan(task))
}

/// Latest implementation report for pipeline `task`.
pub fn latest_implementation(
    reader: &(impl RecordReader + ?Sized),
    task: u8,
) -> Option<Implement> {
    latest::<Implement>(reader, &nodes::implement(task))
}

/// Latest fix for pipeline `task`, unless the task was implemented again
/// after it.
pub fn latest_fix(reader: &(impl RecordReader + ?Sized), task: u8) -> Option<Fix> {
    let fix = reader.latest_record(&nodes::fix(task))?;
    let implemented = reader.latest_record(&nodes::implement(task))?;
    if fix.written_at < implemented.written_at {
        return None;
    }
    decode(fix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RecordKey, RunId};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{Value, json};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Latest(HashMap<NodeId, StoredRecord>);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("timestamp")
    }

    impl Latest {
        fn with(self, node: NodeId, payload: Value) -> Self {
            self.with_at(node, 0, payload)
        }

        fn with_at(mut self, node: NodeId, iteration: u32, payload: Value) -> Self {
            let run = RunId::new("run-1").expect("run id");
            let record = StoredRecord {
                key: RecordKey::new(&run, &node, iteration),
                written_at: at(0),
                payload,
            };
            self.0.insert(node, record);
            self
        }

        fn written(mut self, node: &NodeId, secs: i64) -> Self {
            if let Some(record) = self.0.get_mut(node) {
                record.written_at = at(secs);
            }
            self
        }
    }

    impl RecordReader for Latest {
        fn latest_record(&self, node: &NodeId) -> Option<StoredRecord> {
            self.0.get(node).cloned()
        }
    }

    fn review_pass(task: u8, floor: u32) -> Value {
        let baseline: HashMap<String, u32> = Reviewer::ALL
            .iter()
            .map(|reviewer| (nodes::review(task, *reviewer).to_string(), floor))
            .collect();
        json!({
            "activation": 1,
            "pass": 0,
            "finished": false,
            "satisfied": false,
            "baseline": baseline,
        })
    }

    fn review(approved: bool, issues: Option<Vec<&str>>) -> Value {
        json!({"approved": approved, "feedback": "f", "issues": issues})
    }

    #[test]
    fn project_complete_defaults_to_false_when_absent() {
        assert!(!is_project_complete(&Latest::default()));

        let reader = Latest::default().with(
            nodes::node(nodes::SPRINT_PLAN),
            json!({
                "task1": null,
                "task2": null,
                "task3": null,
                "projectComplete": true,
                "reasoning": "done"
            }),
        );
        assert!(is_project_complete(&reader));
    }

    #[test]
    fn quorum_is_false_when_any_reviewer_is_absent() {
        let reader = Latest::default()
            .with(nodes::review(1, Reviewer::Claude), review(true, None))
            .with(nodes::review(1, Reviewer::Codex), review(true, None));
        assert!(!is_quorum_approved(&reader, 1));
    }

    #[test]
    fn quorum_is_false_when_any_reviewer_rejects() {
        let reader = Latest::default()
            .with(nodes::review(1, Reviewer::Claude), review(true, None))
            .with(nodes::review(1, Reviewer::Codex), review(false, Some(vec!["x"])))
            .with(nodes::review(1, Reviewer::Gemini), review(true, None));
        assert!(!is_quorum_approved(&reader, 1));
    }

    #[test]
    fn quorum_is_true_only_when_all_three_approve() {
        let reader = Latest::default()
            .with(nodes::review(2, Reviewer::Claude), review(true, None))
            .with(nodes::review(2, Reviewer::Codex), review(true, Some(vec![])))
            .with(nodes::review(2, Reviewer::Gemini), review(true, None));
        assert!(is_quorum_approved(&reader, 2));
        assert!(!is_quorum_approved(&reader, 1));
    }

    #[test]
    fn malformed_review_counts_as_absent() {
        let reader = Latest::default()
            .with(nodes::review(1, Reviewer::Claude), review(true, None))
            .with(nodes::review(1, Reviewer::Codex), json!({"approved": "yes"}))
            .with(nodes::review(1, Reviewer::Gemini), review(true, None));
        assert!(!is_quorum_approved(&reader, 1));
    }

    #[test]
    fn reviews_from_before_the_current_pass_do_not_count() {
        // Gemini failed this pass; its record is left over from the previous one.
        let reader = Latest::default()
            .with(nodes::review_loop(1), review_pass(1, 1))
            .with_at(nodes::review(1, Reviewer::Claude), 1, review(true, None))
            .with_at(nodes::review(1, Reviewer::Codex), 1, review(true, None))
            .with_at(nodes::review(1, Reviewer::Gemini), 0, review(false, Some(vec!["old"])));
        assert!(!is_quorum_approved(&reader, 1));
        assert!(collect_issues(&reader, 1).is_empty());

        let reader = reader.with_at(nodes::review(1, Reviewer::Gemini), 1, review(true, None));
        assert!(is_quorum_approved(&reader, 1));
    }

    #[test]
    fn collect_issues_flattens_in_reviewer_order_and_skips_null() {
        let reader = Latest::default()
            .with(nodes::review(3, Reviewer::Claude), review(false, Some(vec!["a", "b"])))
            .with(nodes::review(3, Reviewer::Codex), review(true, None))
            .with(nodes::review(3, Reviewer::Gemini), review(false, Some(vec!["c"])));
        assert_eq!(collect_issues(&reader, 3), vec!["a", "b", "c"]);
        assert!(collect_issues(&Latest::default(), 3).is_empty());
    }

    #[test]
    fn sprints_completed_reads_tracker_or_zero() {
        assert_eq!(sprints_completed(&Latest::default()), 0);
        let reader = Latest::default().with(
            nodes::node(nodes::SPRINT_TRACKER),
            json!({"sprintsCompleted": 4, "summary": "s"}),
        );
        assert_eq!(sprints_completed(&reader), 4);
    }

    fn implement(what: &str) -> Value {
        json!({
            "filesCreated": null,
            "filesModified": ["src/lib.rs"],
            "commitMessage": "wip",
            "whatWasDone": what,
            "testsPassing": true
        })
    }

    #[test]
    fn fix_is_dropped_once_the_task_is_implemented_again() {
        let fix = json!({"fixesMade": ["added test"], "commitMessage": "fix", "summary": "s"});
        let reader = Latest::default()
            .with(nodes::implement(1), implement("parser"))
            .written(&nodes::implement(1), 10)
            .with(nodes::fix(1), fix)
            .written(&nodes::fix(1), 20);
        assert_eq!(
            latest_fix(&reader, 1).map(|fix| fix.describe()),
            Some("s\n- added test".to_string())
        );
        assert_eq!(
            latest_implementation(&reader, 1).map(|report| report.what_was_done),
            Some("parser".to_string())
        );

        let reader = reader
            .with_at(nodes::implement(1), 1, implement("parser v2"))
            .written(&nodes::implement(1), 30);
        assert!(latest_fix(&reader, 1).is_none());
        assert!(latest_fix(&Latest::default(), 1).is_none());
    }
}
