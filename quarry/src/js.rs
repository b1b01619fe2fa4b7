//! JSON/JavaScript-related functionality.
//!
//! Data crosses into the engine as `JSON.parse('...')` literals and comes back
//! out as a `JSON.stringify` string, so nothing but plain JSON ever crosses the
//! boundary in either direction.

use boa::{JsResult, JsValue};
use log::{error, info, warn};
use serde_json::Value as JsonValue;

/// Log target for output produced by user scripts through `console`.
pub const USER_SCRIPT_LOG_TARGET: &str = "quarry::user_script";

/// Prefix applied to every line a user script logs.
pub const USER_SCRIPT_LOG_PREFIX: &str = "[User Script]:";

/// Name of the native function backing the script-visible `console`.
const HOST_LOG_FN: &str = "__hostLog";

// Installed ahead of every user script. `console` is the only capability the
// script gets; each line is kept for the run's output and forwarded to the
// host logger.
const PRELUDE: &str = r#"
var __logs = [];
function __describe(e) {
    if (e !== null && e !== undefined && e.message !== undefined) {
        return String(e.message);
    }
    return String(e);
}
function __format(args) {
    var parts = [];
    for (var i = 0; i < args.length; i++) {
        var a = args[i];
        parts.push((typeof a === 'object' && a !== null) ? JSON.stringify(a) : String(a));
    }
    return parts.join(' ');
}
function __emit(level, args) {
    var line = __format(args);
    __logs.push(line);
    __hostLog(level, line);
}
var console = {
    log: function (...args) { __emit('info', args); },
    info: function (...args) { __emit('info', args); },
    warn: function (...args) { __emit('warn', args); },
    error: function (...args) { __emit('error', args); }
};
eval = undefined;
"#;

/// Build a JavaScript expression that evaluates to a copy of the given value.
pub fn json_literal(value: &JsonValue) -> Result<String, serde_json::Error> {
    Ok(format!(
        "JSON.parse('{}')",
        format_json_str(&serde_json::to_string(value)?)
    ))
}

fn format_json_str(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Wrap a script body in an uninvoked function expression with the given
/// parameter names.
pub fn wrap_in_function(script: &str, params: &[String]) -> String {
    format!(
        "(function ({params}) {{\n{script}\n}});",
        params = params.join(", "),
        script = script,
    )
}

/// Create a fresh engine context with the host-provided `console` installed.
pub fn sandbox_context() -> Result<boa::Context, String> {
    let mut ctx = boa::Context::new();
    ctx.register_global_function(HOST_LOG_FN, 2, host_log)
        .map_err(|e| describe_error(&mut ctx, &e))?;
    ctx.eval(PRELUDE).map_err(|e| describe_error(&mut ctx, &e))?;
    Ok(ctx)
}

/// Check that the script parses as the body of a function taking the given
/// parameters, without running any of it.
pub fn check_syntax(script: &str, params: &[String]) -> Result<(), String> {
    let mut ctx = boa::Context::new();
    ctx.eval(wrap_in_function(script, params))
        .map(|_| ())
        .map_err(|e| describe_error(&mut ctx, &e))
}

/// Produce a human-readable message for a thrown JavaScript value, e.g.
/// `SyntaxError: unexpected token`.
pub fn describe_error(ctx: &mut boa::Context, thrown: &JsValue) -> String {
    match thrown.to_string(ctx) {
        Ok(s) => s.to_string(),
        Err(_) => format!("{:?}", thrown),
    }
}

/// Extract the string result of a script evaluation.
pub fn expect_string(value: &JsValue) -> Option<String> {
    match value {
        JsValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn host_log(_this: &JsValue, args: &[JsValue], _ctx: &mut boa::Context) -> JsResult<JsValue> {
    let level = args.get(0).and_then(expect_string).unwrap_or_default();
    let line = args.get(1).and_then(expect_string).unwrap_or_default();
    match level.as_str() {
        "error" => error!(target: USER_SCRIPT_LOG_TARGET, "{} {}", USER_SCRIPT_LOG_PREFIX, line),
        "warn" => warn!(target: USER_SCRIPT_LOG_TARGET, "{} {}", USER_SCRIPT_LOG_PREFIX, line),
        _ => info!(target: USER_SCRIPT_LOG_TARGET, "{} {}", USER_SCRIPT_LOG_PREFIX, line),
    }
    Ok(JsValue::Undefined)
}
