use std::time::{Duration, Instant};

use quarry::{Config, ScriptError, ScriptRunner, ScriptWorker};
use serde_json::json;

fn worker_runner(timeout: Duration) -> ScriptRunner {
    ScriptRunner::new(
        &Config::default()
            .with_script_timeout(timeout)
            .with_script_worker(ScriptWorker::new(env!(
                "CARGO_BIN_EXE_quarry-script-worker"
            ))),
    )
}

// Child process ids of every thread in this process, where the platform
// exposes them.
fn child_pids() -> Vec<String> {
    let tasks = match std::fs::read_dir("/proc/self/task") {
        Ok(tasks) => tasks,
        Err(_) => return Vec::new(),
    };
    tasks
        .filter_map(Result::ok)
        .flat_map(|task| {
            std::fs::read_to_string(task.path().join("children"))
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<String>>()
        })
        .collect()
}

fn script_threads() -> usize {
    std::fs::read_dir("/proc/self/task")
        .map(|tasks| {
            tasks
                .filter_map(Result::ok)
                .filter(|task| {
                    std::fs::read_to_string(task.path().join("comm"))
                        .map(|comm| comm.trim() == "quarry-script")
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn worker_runs_scripts_and_is_killed_at_the_deadline() {
    let runner = worker_runner(Duration::from_secs(10));
    let output = runner
        .execute(
            "function processData(a, b) { return { rows: a.length, first: a[0].Name }; }",
            vec![json!([{"Name": "Acme"}, {"Name": "Globex"}])],
        )
        .await
        .unwrap();
    assert_eq!(output.data["rows"], json!(2));
    assert_eq!(output.data["first"], json!("Acme"));
    assert!(child_pids().is_empty());

    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let err = worker_runner(timeout)
        .execute("function processData(a, b) { while (true) {} }", vec![])
        .await
        .unwrap_err();
    assert_eq!(err, ScriptError::Timeout(timeout));
    assert!(started.elapsed() < Duration::from_secs(5));

    // the worker was killed and reaped, and no in-process thread was left
    // spinning in its place
    assert!(child_pids().is_empty(), "{:?}", child_pids());
    assert_eq!(script_threads(), 0);
}
