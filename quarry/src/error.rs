use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// The primary error type produced by Quarry's orchestration layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error {0}: {1}")]
    Io(String, std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("cannot determine file type of file: {0}")]
    CannotDetermineFileType(PathBuf),
    #[error("failed to load configuration from {0}")]
    FailedToLoadConfig(PathBuf),
    #[error("query slot count must be 2 or 4, got {0}")]
    InvalidSlotCount(usize),
    #[error("no such query slot: {0}")]
    NoSuchSlot(usize),
    #[error("at least one query must be provided")]
    NoQueries,
    #[error("fix the validation errors before executing")]
    ValidationFailed,
    #[error("a run is already in progress")]
    RunInProgress,
    #[error("failed to parse server response")]
    ResponseParse(#[source] serde_json::Error),
    #[error("no such template: {0}")]
    NoSuchTemplate(String),
    #[error("template {0} is malformed: {1}")]
    MalformedTemplate(String, String),
    #[error("failed to parse template file pattern \"{0}\": {1}")]
    TemplateFilePattern(String, glob::PatternError),
    #[error("template file iteration failed: {0}")]
    TemplateFileIter(#[from] glob::GlobError),
    #[error("failed to render report \"{0}\": {1}")]
    ReportRender(String, handlebars::RenderError),
    #[error("failed to register report template \"{0}\": {1}")]
    ReportTemplate(String, Box<handlebars::TemplateError>),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Failures of a user transformation script. Every variant aborts the current
/// run and is reported to the user as a single message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("script must define a {0} function")]
    MissingEntryPoint(String),
    #[error("{name} function must accept exactly {expected} parameters, but declares {declared}")]
    ArityMismatch {
        name: String,
        expected: usize,
        declared: usize,
    },
    #[error("script uses blocked capabilities: {}", .0.join(", "))]
    Banned(Vec<String>),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("JavaScript processing failed: {0}")]
    Thrown(String),
    #[error("script must return an object, but returned {0}")]
    UnexpectedReturnValue(String),
    #[error("script execution timeout ({} seconds)", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("script worker stopped before producing a result")]
    WorkerLost,
    #[error("failed to run script worker: {0}")]
    Worker(String),
    #[error("failed to exchange data with the script engine: {0}")]
    Marshal(String),
}

impl ScriptError {
    /// Whether the script was abandoned because it exceeded its wall-clock
    /// budget, as opposed to failing on its own.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Failures while exporting a section or a dashboard. Each one only affects
/// the section it was raised for.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export not supported for {kind} sections")]
    Unsupported { kind: String },
    #[error("no data available for export")]
    Empty,
    #[error("failed to write {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
    #[error("failed to write CSV: {0}")]
    Csv(String),
}

/// A collaborator the results view depends on is unavailable. Callers degrade
/// rather than abort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("chart library unavailable: {0}")]
    ChartLibrary(String),
    #[error("query backend unavailable: {0}")]
    Backend(String),
    #[error("failed to read query results from {0}: {1}")]
    Fixture(PathBuf, String),
}
