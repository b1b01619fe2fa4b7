//! Execution of user transformation scripts.

use std::io::{Read, Write};
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
    sync::oneshot,
    time::Sleep,
};

use crate::{
    config::{Config, ScriptWorker, SlotCount},
    js::{self, USER_SCRIPT_LOG_PREFIX, USER_SCRIPT_LOG_TARGET},
    policy,
    value::{normalize_row_sets, type_name},
    ScriptError,
};

/// The processed data returned by a user script, along with everything it
/// logged while running.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutput {
    pub data: JsonMap<String, JsonValue>,
    pub logs: Vec<String>,
    pub elapsed: Duration,
}

// What the generated driver code reports back from inside the engine.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Envelope {
    Ok {
        #[serde(default)]
        data: JsonValue,
        #[serde(default)]
        logs: Vec<String>,
    },
    Missing,
    Arity {
        declared: usize,
    },
    Thrown {
        message: String,
    },
    Unserializable {
        message: String,
    },
}

// What a single engine run hands back to the runner, either across a thread
// or as one JSON document on a worker's stdout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "lowercase")]
enum WorkerReply {
    Finished { envelope: String, elapsed_us: u64 },
    Thrown { message: String },
    Failed { message: String },
}

impl WorkerReply {
    fn into_engine_output(self) -> Result<EngineOutput, ScriptError> {
        match self {
            Self::Finished {
                envelope,
                elapsed_us,
            } => Ok(EngineOutput {
                envelope: serde_json::from_str(&envelope)
                    .map_err(|e| ScriptError::Marshal(e.to_string()))?,
                elapsed: Duration::from_micros(elapsed_us),
            }),
            Self::Thrown { message } => Err(ScriptError::Thrown(message)),
            Self::Failed { message } => Err(ScriptError::Marshal(message)),
        }
    }
}

/// Runs a user script's entry point against the row sets of each query slot.
///
/// Every run gets a brand new engine context. The context has no host globals
/// beyond `JSON`, the language built-ins and a `console` that forwards to the
/// host logger, and the row sets are copied in as JSON text. Scripts that
/// mention a blocked capability are rejected before they are run.
///
/// With a [`ScriptWorker`] configured, each run happens in a child process
/// that is killed once the run exceeds its budget. Without one, the run
/// happens on a dedicated thread, which the engine cannot interrupt: a
/// timed-out thread is abandoned and keeps running until the script ends.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    entry_point: String,
    slot_count: SlotCount,
    timeout: Duration,
    worker: Option<ScriptWorker>,
}

impl ScriptRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            entry_point: config.entry_point.clone(),
            slot_count: config.slot_count,
            timeout: config.script_timeout(),
            worker: config.script_worker.clone(),
        }
    }

    pub fn slot_count(&self) -> SlotCount {
        self.slot_count
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn worker(&self) -> Option<&ScriptWorker> {
        self.worker.as_ref()
    }

    /// The checks that run before any user code executes: the capability
    /// policy, then a parse of the script.
    pub fn preflight(&self, script: &str) -> Result<(), ScriptError> {
        let violations = policy::scan(script);
        if !violations.is_empty() {
            return Err(ScriptError::Banned(
                violations
                    .into_iter()
                    .map(|p| p.capability.to_string())
                    .collect(),
            ));
        }
        js::check_syntax(script, &self.slot_count.param_names()).map_err(ScriptError::Syntax)
    }

    /// Execute the script against the given row sets (one per slot, in slot
    /// order; missing slots receive empty row sets).
    ///
    /// The wall-clock budget starts before the engine is started.
    pub async fn execute(
        &self,
        script: &str,
        row_sets: Vec<JsonValue>,
    ) -> Result<ScriptOutput, ScriptError> {
        self.preflight(script)?;
        let row_sets = normalize_row_sets(row_sets, self.slot_count.get());
        let source = self.driver_source(script, &row_sets)?;
        trace!("Attempting to execute script:\n{}", source);

        let deadline = tokio::time::sleep(self.timeout);
        let reply = match &self.worker {
            Some(worker) => {
                let reply = self.run_in_worker(worker, source, deadline).await?;
                if let WorkerReply::Finished { envelope, .. } = &reply {
                    replay_logs(envelope);
                }
                reply
            }
            None => self.run_on_thread(source, deadline).await?,
        };
        let output = self.check_entry_point(reply.into_engine_output()?)?;
        debug!(
            "Script produced {} top-level keys in {:?}",
            output.data.len(),
            output.elapsed
        );
        Ok(output)
    }

    async fn run_on_thread(
        &self,
        source: String,
        deadline: Sleep,
    ) -> Result<WorkerReply, ScriptError> {
        let (tx, rx) = oneshot::channel();
        thread::Builder::new()
            .name("quarry-script".to_string())
            .spawn(move || {
                let _ = tx.send(run_in_engine(&source));
            })
            .map_err(|e| ScriptError::Worker(e.to_string()))?;

        tokio::select! {
            reply = rx => reply.map_err(|_| ScriptError::WorkerLost),
            _ = deadline => {
                warn!("Script exceeded its {:?} budget, abandoning its thread", self.timeout);
                Err(ScriptError::Timeout(self.timeout))
            }
        }
    }

    async fn run_in_worker(
        &self,
        worker: &ScriptWorker,
        source: String,
        deadline: Sleep,
    ) -> Result<WorkerReply, ScriptError> {
        let mut child = Command::new(&worker.program)
            .args(&worker.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ScriptError::Worker(format!(
                    "failed to start {}: {}",
                    worker.program.display(),
                    e
                ))
            })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScriptError::Worker("worker stdin unavailable".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScriptError::Worker("worker stdout unavailable".to_string()))?;
        let exchange = async move {
            stdin.write_all(source.as_bytes()).await?;
            drop(stdin);
            let mut reply = String::new();
            stdout.read_to_string(&mut reply).await?;
            Ok::<String, std::io::Error>(reply)
        };

        tokio::select! {
            reply = exchange => {
                let reply = reply.map_err(|e| ScriptError::Worker(e.to_string()))?;
                let status = child
                    .wait()
                    .await
                    .map_err(|e| ScriptError::Worker(e.to_string()))?;
                if reply.trim().is_empty() {
                    debug!("Script worker exited ({}) without a reply", status);
                    return Err(ScriptError::WorkerLost);
                }
                serde_json::from_str::<WorkerReply>(&reply)
                    .map_err(|e| ScriptError::Marshal(e.to_string()))
            }
            _ = deadline => {
                warn!("Script exceeded its {:?} budget, killing its worker", self.timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill script worker: {}", e);
                }
                Err(ScriptError::Timeout(self.timeout))
            }
        }
    }

    fn check_entry_point(&self, output: EngineOutput) -> Result<ScriptOutput, ScriptError> {
        match output.envelope {
            Envelope::Ok { data, logs } => match data {
                JsonValue::Object(data) => Ok(ScriptOutput {
                    data,
                    logs,
                    elapsed: output.elapsed,
                }),
                other => Err(ScriptError::UnexpectedReturnValue(
                    type_name(&other).to_string(),
                )),
            },
            Envelope::Missing => Err(ScriptError::MissingEntryPoint(self.entry_point.clone())),
            Envelope::Arity { declared } => Err(ScriptError::ArityMismatch {
                name: self.entry_point.clone(),
                expected: self.slot_count.get(),
                declared,
            }),
            Envelope::Thrown { message } => Err(ScriptError::Thrown(message)),
            Envelope::Unserializable { message } => Err(ScriptError::Thrown(format!(
                "result could not be converted to JSON: {}",
                message
            ))),
        }
    }

    fn driver_source(&self, script: &str, row_sets: &[JsonValue]) -> Result<String, ScriptError> {
        let args = row_sets
            .iter()
            .map(js::json_literal)
            .collect::<Result<Vec<String>, serde_json::Error>>()
            .map_err(|e| ScriptError::Marshal(e.to_string()))?;
        Ok(format!(
            r#"
(function ({params}) {{
{script}
;
if (typeof {entry} !== 'function') {{
    return JSON.stringify({{ status: 'missing' }});
}}
if ({entry}.length !== {slots}) {{
    return JSON.stringify({{ status: 'arity', declared: {entry}.length }});
}}
var __result;
try {{
    __result = {entry}({params});
}} catch (e) {{
    return JSON.stringify({{ status: 'thrown', message: __describe(e) }});
}}
try {{
    return JSON.stringify({{ status: 'ok', data: (__result === undefined ? null : __result), logs: __logs }});
}} catch (e) {{
    return JSON.stringify({{ status: 'unserializable', message: __describe(e) }});
}}
}})({args})
"#,
            params = self.slot_count.param_names().join(", "),
            script = script,
            entry = self.entry_point,
            slots = self.slot_count.get(),
            args = args.join(",\n"),
        ))
    }
}

struct EngineOutput {
    envelope: Envelope,
    elapsed: Duration,
}

// A worker's console output was logged in its own process; repeat it here.
fn replay_logs(envelope: &str) {
    if let Ok(Envelope::Ok { logs, .. }) = serde_json::from_str::<Envelope>(envelope) {
        for line in logs {
            info!(target: USER_SCRIPT_LOG_TARGET, "{} {}", USER_SCRIPT_LOG_PREFIX, line);
        }
    }
}

// The engine context never leaves the thread or process this runs on.
fn run_in_engine(source: &str) -> WorkerReply {
    let started = Instant::now();
    let mut ctx = match js::sandbox_context() {
        Ok(ctx) => ctx,
        Err(message) => return WorkerReply::Failed { message },
    };
    let result = match ctx.eval(source) {
        Ok(result) => result,
        Err(e) => {
            return WorkerReply::Thrown {
                message: js::describe_error(&mut ctx, &e),
            }
        }
    };
    match js::expect_string(&result) {
        Some(envelope) => WorkerReply::Finished {
            envelope,
            elapsed_us: started.elapsed().as_micros() as u64,
        },
        None => WorkerReply::Failed {
            message: format!("unexpected engine result: {:?}", result),
        },
    }
}

/// Serve a single run for a [`ScriptWorker`]: read the driver source the
/// runner writes to `input`, run it, and write the reply to `output`.
pub fn serve_worker<R: Read, W: Write>(mut input: R, mut output: W) -> Result<(), ScriptError> {
    let mut source = String::new();
    input
        .read_to_string(&mut source)
        .map_err(|e| ScriptError::Worker(e.to_string()))?;
    let reply = run_in_engine(&source);
    serde_json::to_writer(&mut output, &reply).map_err(|e| ScriptError::Marshal(e.to_string()))?;
    output
        .flush()
        .map_err(|e| ScriptError::Worker(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn runner(slots: SlotCount) -> ScriptRunner {
        ScriptRunner::new(
            &Config::default()
                .with_slot_count(slots)
                .with_script_timeout(Duration::from_secs(5)),
        )
    }

    fn accounts() -> JsonValue {
        json!([
            {"Id": "001A", "Name": "Acme", "Industry": "Technology", "AnnualRevenue": 1000000},
            {"Id": "001B", "Name": "Globex", "Industry": "Finance", "AnnualRevenue": 500000}
        ])
    }

    #[tokio::test]
    async fn runs_entry_point_with_row_sets() {
        let script = r#"
            function processData(accounts, contacts) {
                console.log('accounts', accounts.length);
                var total = accounts.reduce(function (sum, a) { return sum + a.AnnualRevenue; }, 0);
                return {
                    summary: { totalAccounts: accounts.length, totalContacts: contacts.length },
                    totalRevenue: total
                };
            }
        "#;
        let output = runner(SlotCount::Two)
            .execute(script, vec![accounts(), json!([{"Id": "003A"}])])
            .await
            .unwrap();
        assert_eq!(
            JsonValue::Object(output.data),
            json!({
                "summary": {"totalAccounts": 2, "totalContacts": 1},
                "totalRevenue": 1500000
            })
        );
        assert_eq!(output.logs, vec!["accounts 2".to_string()]);
    }

    #[tokio::test]
    async fn missing_slots_receive_empty_row_sets() {
        let script = r#"
            function processData(q1, q2, q3, q4) {
                return { sizes: [q1.length, q2.length, q3.length, q4.length] };
            }
        "#;
        let output = runner(SlotCount::Four)
            .execute(script, vec![accounts()])
            .await
            .unwrap();
        assert_eq!(output.data["sizes"], json!([2, 0, 0, 0]));
    }

    #[tokio::test]
    async fn missing_entry_point_fails_fast() {
        let runner = runner(SlotCount::Two);
        let started = Instant::now();
        let err = runner
            .execute("function transform(a, b) { return {}; }", vec![])
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::MissingEntryPoint("processData".to_string()));
        assert!(!err.is_timeout());
        assert!(started.elapsed() < runner.timeout());
    }

    #[tokio::test]
    async fn arity_must_match_slot_count() {
        let err = runner(SlotCount::Two)
            .execute("function processData(a, b, c, d) { return {}; }", vec![])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ScriptError::ArityMismatch {
                name: "processData".to_string(),
                expected: 2,
                declared: 4
            }
        );
    }

    #[tokio::test]
    async fn banned_capabilities_never_run() {
        let script = r#"
            function processData(a, b) {
                window.location = 'https://example.com';
                return { ok: true };
            }
        "#;
        let err = runner(SlotCount::Two)
            .execute(script, vec![])
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::Banned(vec!["window".to_string()]));
    }

    #[tokio::test]
    async fn thrown_errors_are_wrapped() {
        let script = "function processData(a, b) { throw new Error('no accounts'); }";
        let err = runner(SlotCount::Two)
            .execute(script, vec![])
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::Thrown("no accounts".to_string()));
        assert!(err.to_string().starts_with("JavaScript processing failed"));
    }

    #[tokio::test]
    async fn syntax_errors_are_reported_as_script_errors() {
        let script = "function processData(a, b) { return { ; }";
        let err = runner(SlotCount::Two)
            .execute(script, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn results_must_be_objects() {
        let err = runner(SlotCount::Two)
            .execute("function processData(a, b) { return [1, 2]; }", vec![])
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::UnexpectedReturnValue("array".to_string()));
    }

    #[tokio::test]
    async fn non_json_values_are_stripped() {
        let script = r#"
            function processData(a, b) {
                return { total: 3, helper: function () { return 1; } };
            }
        "#;
        let output = runner(SlotCount::Two)
            .execute(script, vec![])
            .await
            .unwrap();
        assert_eq!(JsonValue::Object(output.data), json!({"total": 3}));
    }

    #[tokio::test]
    async fn slow_scripts_time_out() {
        let runner = ScriptRunner::new(
            &Config::default().with_script_timeout(Duration::from_millis(200)),
        );
        let script = r#"
            function processData(a, b) {
                var start = Date.now();
                while (Date.now() - start < 3000) {}
                return { done: true };
            }
        "#;
        let err = runner.execute(script, vec![]).await.unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
        assert_eq!(err, ScriptError::Timeout(Duration::from_millis(200)));
    }

    #[test]
    fn worker_serves_one_run_over_its_streams() {
        let runner = runner(SlotCount::Two);
        let source = runner
            .driver_source(
                "function processData(a, b) { console.log('rows', a.length); return { n: a.length }; }",
                &[json!([{"Id": 1}, {"Id": 2}]), json!([])],
            )
            .unwrap();
        let mut out = Vec::new();
        serve_worker(source.as_bytes(), &mut out).unwrap();

        let reply: WorkerReply = serde_json::from_slice(&out).unwrap();
        let output = runner
            .check_entry_point(reply.into_engine_output().unwrap())
            .unwrap();
        assert_eq!(JsonValue::Object(output.data), json!({"n": 2}));
        assert_eq!(output.logs, vec!["rows 2".to_string()]);
    }

    #[tokio::test]
    async fn unknown_worker_program_is_reported() {
        let runner = ScriptRunner::new(
            &Config::default()
                .with_script_worker(ScriptWorker::new("/nonexistent/quarry-script-worker")),
        );
        let err = runner
            .execute("function processData(a, b) { return {}; }", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Worker(_)), "{:?}", err);
        assert!(!err.is_timeout());
    }
}
