//! Static checks over query and script text, used for live feedback while the
//! user types and before anything is executed.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::{
    config::{Config, SlotCount},
    js, policy,
};

lazy_static! {
    static ref FROM_CLAUSE: Regex = Regex::new(r"(?i)\bFROM\b").unwrap();
    static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?i)\bLIMIT\s+(\d+)").unwrap();
    static ref MUTATING_KEYWORDS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\bDELETE\b").unwrap(), "DELETE"),
        (Regex::new(r"(?i)\bINSERT\b").unwrap(), "INSERT"),
        (Regex::new(r"(?i)\bUPDATE\b").unwrap(), "UPDATE"),
        (Regex::new(r"(?i)\bUPSERT\b").unwrap(), "UPSERT"),
    ];
    static ref FUNCTION_SIGNATURE: Regex =
        Regex::new(r"\bfunction\s+([A-Za-z_$][\w$]*)\s*\(\s*([^)]*)\s*\)").unwrap();
}

/// The outcome of validating a query or a script. Validation problems are
/// never raised as errors; they are accumulated here in the order they were
/// found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub has_errors: bool,
    /// The parser's message when the script failed to parse. The same problem
    /// also appears in `errors`, prefixed with `Syntax error:`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syntax_error: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    fn from_errors(errors: Vec<String>, syntax_error: Option<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            has_errors: !errors.is_empty(),
            errors,
            syntax_error,
        }
    }
}

/// A best-effort estimate of how many rows a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEstimate {
    Limit(u64),
    Unknown,
}

impl std::fmt::Display for RowEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit(n) => write!(f, "{}", n),
            Self::Unknown => write!(f, "Unknown (consider adding LIMIT)"),
        }
    }
}

/// Validates queries and scripts for a particular slot configuration.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    slot_count: SlotCount,
    entry_point: String,
}

impl QueryValidator {
    pub fn new(config: &Config) -> Self {
        Self {
            slot_count: config.slot_count,
            entry_point: config.entry_point.clone(),
        }
    }

    pub fn slot_count(&self) -> SlotCount {
        self.slot_count
    }

    /// An empty query is valid (the slot is simply unused). Otherwise the
    /// query must be a read-only selection with a `FROM` clause. Mutating
    /// keywords are reported, never stripped.
    pub fn validate_query(&self, text: &str) -> ValidationResult {
        let query = text.trim();
        if query.is_empty() {
            return ValidationResult::valid();
        }
        let mut errors = Vec::new();
        if !query.to_uppercase().starts_with("SELECT") {
            errors.push("Query must start with SELECT".to_string());
        }
        if !FROM_CLAUSE.is_match(query) {
            errors.push("Query must include FROM clause".to_string());
        }
        for (pattern, keyword) in MUTATING_KEYWORDS.iter() {
            if pattern.is_match(query) {
                errors.push(format!("{} operations not allowed", keyword));
            }
        }
        ValidationResult::from_errors(errors, None)
    }

    /// Estimates the row count from a `LIMIT` clause. Returns `None` for an
    /// empty query.
    pub fn estimate_rows(&self, text: &str) -> Option<RowEstimate> {
        let query = text.trim();
        if query.is_empty() {
            return None;
        }
        Some(
            LIMIT_CLAUSE
                .captures(query)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .map(RowEstimate::Limit)
                .unwrap_or(RowEstimate::Unknown),
        )
    }

    /// An empty script is valid. Otherwise it must declare the entry point
    /// with one parameter per slot, must not touch a blocked capability and
    /// must parse as the body of a function over the slot parameters.
    pub fn validate_script(&self, text: &str) -> ValidationResult {
        let script = text.trim();
        if script.is_empty() {
            return ValidationResult::valid();
        }
        let mut errors = Vec::new();

        match self.declared_params(script) {
            None => errors.push(format!(
                "Script must contain a {} function",
                self.entry_point
            )),
            Some(declared) if declared != self.slot_count.get() => errors.push(format!(
                "{} function must accept exactly {} parameters for {}-query mode",
                self.entry_point, self.slot_count, self.slot_count
            )),
            Some(_) => (),
        }

        errors.extend(
            policy::scan(script)
                .into_iter()
                .map(|p| p.message.to_string()),
        );

        let syntax_error = js::check_syntax(script, &self.slot_count.param_names()).err();
        if let Some(e) = &syntax_error {
            errors.push(format!("Syntax error: {}", e));
        }
        ValidationResult::from_errors(errors, syntax_error)
    }

    // The number of parameters in the first declaration of the entry point.
    fn declared_params(&self, script: &str) -> Option<usize> {
        FUNCTION_SIGNATURE
            .captures_iter(script)
            .find(|caps| &caps[1] == self.entry_point)
            .map(|caps| {
                caps[2]
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .count()
            })
    }
}
