//! CLI tests for the `sprintflow` binary.
//!
//! Spawns the binary against temp project roots and checks exit codes and the
//! rendered status/history output.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use sprintflow::core::types::{NodeId, RecordKey, RunId};
use sprintflow::exit_codes;
use sprintflow::io::init::{InitOptions, SprintflowPaths, init_project};
use sprintflow::store::{FileStore, RunStore};
use sprintflow::test_support::{review, sprint_plan};

fn sprintflow(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sprintflow"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("spawn sprintflow")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn seed(store: &FileStore, run: &RunId, node: &str, payload: serde_json::Value) {
    let node = NodeId::new(node).expect("node id");
    let next = store.next_iteration(run, &node).expect("next");
    store
        .write(&RecordKey::new(run, &node, next), payload)
        .expect("seed");
}

#[test]
fn init_creates_config_and_schemas() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sprintflow(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let paths = SprintflowPaths::new(temp.path());
    assert!(paths.config_path.is_file());
    assert!(paths.schemas_dir.join("review.schema.json").is_file());
    assert_eq!(
        fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
        "runs/\n"
    );
}

#[test]
fn status_summarizes_seeded_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
    let store = FileStore::new(&paths.runs_dir);
    let run = RunId::new("run-7").expect("run id");
    seed(&store, &run, "sprint-plan", sprint_plan(1, false));
    seed(&store, &run, "rev-1-claude", review(false, &["flaky test"]));
    seed(&store, &run, "rev-1-claude", review(true, &[]));
    seed(
        &store,
        &run,
        "sprint-tracker",
        serde_json::json!({
            "sprintsCompleted": 1,
            "summary": "sprint 1 finished: 1/1 tasks approved"
        }),
    );

    let output = sprintflow(temp.path(), &["status", "--run-id", "run-7"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    assert!(text.contains("run run-7"), "{text}");
    assert!(text.contains("sprints completed: 1"), "{text}");
    assert!(text.contains("project complete: no"), "{text}");
    let review_line = text
        .lines()
        .find(|line| line.contains("rev-1-claude"))
        .expect("review line");
    assert!(review_line.contains("#1"), "{review_line}");
}

#[test]
fn status_of_unknown_run_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_project(temp.path(), &InitOptions { force: false }).expect("init");

    let output = sprintflow(temp.path(), &["status", "--run-id", "missing"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown run missing"));
}

#[test]
fn history_prints_one_json_line_per_iteration() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
    let store = FileStore::new(&paths.runs_dir);
    let run = RunId::new("run-7").expect("run id");
    seed(&store, &run, "rev-1-codex", review(false, &["no docs"]));
    seed(&store, &run, "rev-1-codex", review(true, &[]));

    let output = sprintflow(
        temp.path(),
        &["history", "--run-id", "run-7", "--node", "rev-1-codex"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let records: Vec<serde_json::Value> = stdout(&output)
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["key"]["iteration"], 0);
    assert_eq!(records[0]["payload"]["issues"][0], "no docs");
    assert_eq!(records[1]["payload"]["approved"], true);
}

#[test]
fn invalid_run_id_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sprintflow(temp.path(), &["status", "--run-id", "../escape"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

/// Full run with shell stand-ins for the agent CLIs: the planner declares the
/// project complete right away, so only the planner and the coverage writer
/// are ever invoked.
#[cfg(unix)]
#[test]
fn run_with_stub_agents_completes_project() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

    let planner = temp.path().join("planner.sh");
    fs::write(
        &planner,
        concat!(
            "cat > /dev/null\n",
            "echo 'Planning done.'\n",
            "echo '```json'\n",
            "echo '{\"task1\": null, \"task2\": null, \"task3\": null, ",
            "\"projectComplete\": true, \"reasoning\": \"nothing left\"}'\n",
            "echo '```'\n",
        ),
    )
    .expect("planner script");
    let writer = temp.path().join("writer.sh");
    fs::write(
        &writer,
        concat!(
            "cat > /dev/null\n",
            "echo '{\"coveragePercent\": 92.5, \"testsAdded\": 0, ",
            "\"summary\": \"covered\", \"allPass\": true}'\n",
        ),
    )
    .expect("writer script");
    let failing = "[\"sh\", \"-c\", \"exit 3\"]";
    fs::write(
        &paths.config_path,
        format!(
            "max_sprints = 2\n\
             [agents.planner]\ncommand = [\"sh\", \"{}\"]\n\
             [agents.writer]\ncommand = [\"sh\", \"{}\"]\n\
             [agents.coder]\ncommand = {failing}\n\
             [agents.auditor]\ncommand = {failing}\n\
             [agents.gemini]\ncommand = {failing}\n",
            planner.display(),
            writer.display()
        ),
    )
    .expect("config");

    let output = sprintflow(temp.path(), &["run", "--run-id", "cli-run"]);
    let text = stdout(&output);
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stdout: {text}\nstderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("starting cli-run"), "{text}");
    assert!(text.contains("skip   plan-1#0"), "{text}");
    assert!(text.contains("1 sprint(s) completed, project complete"), "{text}");
    let logs_dir = paths.logs_dir(&RunId::new("cli-run").expect("run id"));
    assert!(logs_dir.join("sprint-plan-0.log").is_file());

    let status = sprintflow(temp.path(), &["status", "--run-id", "cli-run"]);
    assert!(stdout(&status).contains("project complete: yes"));
}
