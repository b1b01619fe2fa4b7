//! Quarry runs user-supplied JavaScript transformation scripts over the
//! results of several read-only queries and turns whatever the script returns
//! into dashboard sections: tables, charts, metrics and lists.
//!
//! This crate provides the engine. For the command line interface, see the
//! `quarry-cli` crate.

pub mod builder;
pub mod chart;
mod config;
pub mod debounce;
mod error;
pub mod executor;
pub mod export;
pub mod format;
mod fs;
mod hash;
mod js;
pub mod notify;
pub mod policy;
pub mod present;
pub mod report;
mod sandbox;
pub mod session;
pub mod shape;
pub mod template;
pub mod validate;
pub mod value;

pub use builder::{QueryBuilder, TemplateOutcome};
pub use chart::{ChartAdapter, ChartLibrary};
pub use config::{Config, ScriptWorker, SlotCount, SupportedFormat};
pub use error::{Error, ExportError, LoadError, ScriptError};
pub use executor::{FileExecutor, QueryExecutor, StaticExecutor};
pub use export::{CsvDelivery, Delivery};
pub use js::{USER_SCRIPT_LOG_PREFIX, USER_SCRIPT_LOG_TARGET};
pub use present::{ResultsView, SectionView, TableView};
pub use sandbox::{serve_worker, ScriptOutput, ScriptRunner};
pub use session::{ReportSession, RunStatus};
pub use shape::Section;
pub use template::{Template, TemplateLibrary};
pub use validate::{QueryValidator, ValidationResult};
