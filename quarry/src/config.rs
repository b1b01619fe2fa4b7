//! Configuration-related functionality for Quarry.

use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use eyre::{Result, WrapErr};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{fs::maybe_canonicalize, Error};

/// How many query slots (and therefore `processData` parameters) the query
/// builder offers. The trial configuration has two, the full one four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum SlotCount {
    Two,
    Four,
}

impl SlotCount {
    pub fn get(self) -> usize {
        match self {
            Self::Two => 2,
            Self::Four => 4,
        }
    }

    /// The parameter names bound to each slot's row set, in slot order.
    pub fn param_names(self) -> Vec<String> {
        (1..=self.get())
            .map(|i| format!("query{}Results", i))
            .collect()
    }
}

impl Default for SlotCount {
    fn default() -> Self {
        Self::Two
    }
}

impl TryFrom<usize> for SlotCount {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            _ => Err(Error::InvalidSlotCount(value)),
        }
    }
}

impl From<SlotCount> for usize {
    fn from(s: SlotCount) -> Self {
        s.get()
    }
}

impl std::fmt::Display for SlotCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// The file formats from which a [`Config`] can be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    Json,
    Yaml,
}

impl FromStr for SupportedFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Ok(match lower.as_ref() {
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            _ => return Err(Error::UnsupportedFileType(s.to_string())),
        })
    }
}

impl SupportedFormat {
    /// Detect the format of a file from its extension.
    pub fn for_path(path: &Path) -> Result<Self, Error> {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .ok_or_else(|| Error::CannotDetermineFileType(path.to_path_buf()))?;
        Self::from_str(ext)
    }
}

/// A command that serves a single script run over stdin and stdout. Scripts
/// run through a worker can be killed when they exceed their budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptWorker {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ScriptWorker {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Quarry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of query slots.
    pub slot_count: SlotCount,
    /// Name of the function user scripts must define.
    pub entry_point: String,
    /// Wall-clock budget for a single script execution.
    pub script_timeout_ms: u64,
    /// Quiet period after a keystroke before a field is re-validated.
    pub validation_debounce_ms: u64,
    pub default_page_size: usize,
    pub page_size_options: Vec<usize>,
    /// Lifetime of success and info toasts.
    pub toast_info_ms: u64,
    /// Lifetime of warning toasts. Error toasts never expire on their own.
    pub toast_warning_ms: u64,
    /// Restricts the template library to templates that fit two slots.
    pub trial_mode: bool,
    /// Run scripts in this worker process instead of on a thread of the
    /// current process.
    pub script_worker: Option<ScriptWorker>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slot_count: SlotCount::Two,
            entry_point: "processData".to_string(),
            script_timeout_ms: 30_000,
            validation_debounce_ms: 500,
            default_page_size: 10,
            page_size_options: vec![5, 10, 25, 50, 100],
            toast_info_ms: 5_000,
            toast_warning_ms: 7_000,
            trial_mode: false,
            script_worker: None,
        }
    }
}

impl Config {
    /// Convenience method for selecting the slot count.
    pub fn with_slot_count(mut self, slot_count: SlotCount) -> Self {
        self.slot_count = slot_count;
        self
    }

    /// Convenience method for overriding the script timeout.
    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_script_worker(mut self, worker: ScriptWorker) -> Self {
        self.script_worker = Some(worker);
        self
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn validation_debounce(&self) -> Duration {
        Duration::from_millis(self.validation_debounce_ms)
    }

    /// Parse a configuration from a string in the given format.
    pub fn load_as(fmt: SupportedFormat, content: &str) -> Result<Self, Error> {
        Ok(match fmt {
            SupportedFormat::Json => serde_json::from_str(content)?,
            SupportedFormat::Yaml => serde_yaml::from_str(content)?,
        })
    }

    /// Load a configuration from the given file, detecting its format from
    /// the file extension.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let fmt = SupportedFormat::for_path(path)?;
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("while trying to read from {}", path.display()), e))?;
        Self::load_as(fmt, &content)
    }

    /// Load the configuration file if it exists, otherwise fall back to the
    /// defaults.
    pub fn load_or_default<P: AsRef<Path>>(maybe_config_file: P) -> Result<Self> {
        let maybe_config_file = maybe_config_file.as_ref();
        match maybe_canonicalize(maybe_config_file)? {
            Some(config_path) => {
                let config = Self::load_from_file(&config_path)
                    .wrap_err_with(|| Error::FailedToLoadConfig(config_path.clone()))?;
                debug!("Loaded configuration from {}", config_path.display());
                Ok(config)
            }
            None => {
                debug!(
                    "No such configuration file, using defaults: {}",
                    maybe_config_file.display()
                );
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::load_as(
            SupportedFormat::Yaml,
            "slot_count: 4\nscript_timeout_ms: 1500\n",
        )
        .unwrap();
        assert_eq!(config.slot_count, SlotCount::Four);
        assert_eq!(config.script_timeout(), Duration::from_millis(1500));
        assert_eq!(config.entry_point, "processData");
        assert_eq!(config.default_page_size, 10);
    }

    #[test]
    fn rejects_unsupported_slot_count() {
        let err = Config::load_as(SupportedFormat::Json, r#"{"slot_count": 3}"#).unwrap_err();
        assert!(err.to_string().contains("2 or 4"), "{}", err);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("quarry.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn loads_json_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarry.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"trial_mode": true, "default_page_size": 25}}"#).unwrap();
        let config = Config::load_or_default(&path).unwrap();
        assert!(config.trial_mode);
        assert_eq!(config.default_page_size, 25);
    }

    #[test]
    fn script_worker_args_default_to_empty() {
        let config = Config::load_as(
            SupportedFormat::Yaml,
            "script_worker:\n  program: /usr/local/bin/quarry-script-worker\n",
        )
        .unwrap();
        assert_eq!(
            config.script_worker,
            Some(ScriptWorker::new("/usr/local/bin/quarry-script-worker"))
        );
        assert_eq!(Config::default().script_worker, None);
    }

    #[test]
    fn param_names_follow_slot_order() {
        assert_eq!(
            SlotCount::Four.param_names(),
            vec![
                "query1Results",
                "query2Results",
                "query3Results",
                "query4Results"
            ]
        );
    }
}
