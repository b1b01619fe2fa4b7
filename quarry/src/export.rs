//! CSV export of sections and dashboards, and delivery of the result.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use csv::{QuoteStyle, Terminator, WriterBuilder};
use log::{debug, info, warn};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::{
    format::sanitize_identifier,
    fs::ensure_path_exists,
    present::{ResultsView, SectionBody, SectionView, TableView},
    value::display_string,
    ExportError,
};

/// Filename used for whole-dashboard exports.
pub const DASHBOARD_EXPORT_FILENAME: &str = "dashboard-export.csv";

// Builds one CSV document in memory. Fields are quoted only when they hold a
// comma, a quote or a line break, and the document has no trailing newline.
struct CsvSheet {
    writer: csv::Writer<Vec<u8>>,
}

impl CsvSheet {
    fn new() -> Self {
        Self::with_quote_style(QuoteStyle::Necessary)
    }

    fn with_quote_style(style: QuoteStyle) -> Self {
        Self {
            writer: WriterBuilder::new()
                .quote_style(style)
                .terminator(Terminator::Any(b'\n'))
                .flexible(true)
                .from_writer(Vec::new()),
        }
    }

    fn record<I, S>(&mut self, fields: I) -> Result<(), ExportError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .map_err(|e| ExportError::Csv(e.to_string()))
    }

    fn finish(self) -> Result<String, ExportError> {
        let bytes = self
            .writer
            .into_inner()
            .map_err(|e| ExportError::Csv(e.to_string()))?;
        let mut content = String::from_utf8(bytes).map_err(|e| ExportError::Csv(e.to_string()))?;
        if content.ends_with('\n') {
            content.pop();
        }
        Ok(content)
    }
}

fn write_sheet<H, R>(headers: &[H], rows: R) -> Result<String, ExportError>
where
    H: AsRef<str>,
    R: IntoIterator<Item = Vec<String>>,
{
    let mut sheet = CsvSheet::new();
    sheet.record(headers.iter().map(|h| h.as_ref()))?;
    for row in rows {
        sheet.record(row)?;
    }
    sheet.finish()
}

/// Render object rows as CSV. The header is the key list of the first row;
/// rows are newline-joined without a trailing newline. Returns an empty
/// string when there are no rows.
pub fn to_csv(rows: &[JsonValue]) -> Result<String, ExportError> {
    let headers = match rows.first().and_then(JsonValue::as_object) {
        Some(first) => first.keys().cloned().collect::<Vec<String>>(),
        None => return Ok(String::new()),
    };
    let records = rows.iter().map(|row| {
        headers
            .iter()
            .map(|h| row.get(h).map(display_string).unwrap_or_default())
            .collect::<Vec<String>>()
    });
    write_sheet(headers.as_slice(), records)
}

/// Render a table as CSV. The header is the table's column list and each
/// field is the raw (unformatted) value, in the table's current sort order.
pub fn table_to_csv(table: &TableView) -> Result<String, ExportError> {
    if table.all_rows().is_empty() {
        return Ok(String::new());
    }
    let fields = table
        .columns()
        .iter()
        .map(|c| c.field.as_str())
        .collect::<Vec<&str>>();
    let records = table.all_rows().iter().map(|row| {
        fields
            .iter()
            .map(|f| row.get(f).map(display_string).unwrap_or_default())
            .collect::<Vec<String>>()
    });
    write_sheet(fields.as_slice(), records)
}

fn pairs_to_csv(
    data: &JsonMap<String, JsonValue>,
    key_header: &str,
    value_header: &str,
) -> Result<String, ExportError> {
    let rows = data
        .iter()
        .map(|(k, v)| {
            let mut row = JsonMap::new();
            row.insert(key_header.to_string(), JsonValue::String(k.clone()));
            row.insert(value_header.to_string(), v.clone());
            JsonValue::Object(row)
        })
        .collect::<Vec<JsonValue>>();
    to_csv(&rows)
}

/// `Revenue by Industry` → `Revenue_by_Industry_export.csv`.
pub fn section_filename(title: &str) -> String {
    format!("{}_export.csv", sanitize_identifier(title))
}

/// A CSV document ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    pub filename: String,
    pub content: String,
}

/// Export a single section. Metrics, chart and list sections are flattened
/// into two-column sheets.
pub fn export_section(section: &SectionView) -> Result<CsvExport, ExportError> {
    let content = match &section.body {
        SectionBody::Table(table) => table_to_csv(table)?,
        SectionBody::Metrics { data, .. } => pairs_to_csv(data, "Metric", "Value")?,
        SectionBody::Chart(chart) => pairs_to_csv(&chart.data, "Category", "Value")?,
        SectionBody::List { items, .. } => to_csv(
            &items
                .iter()
                .enumerate()
                .map(|(i, item)| json!({"Index": i + 1, "Item": item}))
                .collect::<Vec<JsonValue>>(),
        )?,
        SectionBody::Metric { .. } => {
            return Err(ExportError::Unsupported {
                kind: section.kind().to_string(),
            })
        }
    };
    if content.is_empty() {
        return Err(ExportError::Empty);
    }
    Ok(CsvExport {
        filename: section_filename(&section.title),
        content,
    })
}

/// Export the whole dashboard: every table, each preceded by its quoted
/// title, or when there are no tables, one sheet of every metric.
pub fn export_dashboard(view: &ResultsView) -> Result<CsvExport, ExportError> {
    let tables = view
        .sections()
        .iter()
        .filter_map(|s| s.as_table().map(|t| (s, t)))
        .collect::<Vec<(&SectionView, &TableView)>>();

    let content = if !tables.is_empty() {
        tables
            .iter()
            .map(|(section, table)| {
                let mut title = CsvSheet::with_quote_style(QuoteStyle::Always);
                title.record([section.title.as_str()])?;
                Ok(format!("{}\n{}", title.finish()?, table_to_csv(table)?))
            })
            .collect::<Result<Vec<String>, ExportError>>()?
            .join("\n\n")
    } else {
        let rows = view
            .sections()
            .iter()
            .filter_map(|s| match &s.body {
                SectionBody::Metrics { data, .. } => Some((s, data)),
                _ => None,
            })
            .flat_map(|(s, data)| {
                data.iter()
                    .map(move |(k, v)| json!({"Section": s.title, "Metric": k, "Value": v}))
            })
            .collect::<Vec<JsonValue>>();
        to_csv(&rows)?
    };

    if content.is_empty() {
        return Err(ExportError::Empty);
    }
    Ok(CsvExport {
        filename: DASHBOARD_EXPORT_FILENAME.to_string(),
        content,
    })
}

/// Where a CSV payload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Saved(PathBuf),
    Copied { filename: String },
    Logged { filename: String },
}

impl Delivery {
    /// The message shown to the user.
    pub fn message(&self) -> String {
        match self {
            Self::Saved(path) => format!(
                "Downloaded {}",
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string())
            ),
            Self::Copied { filename } => {
                format!("CSV data copied to clipboard! Save as \"{}\"", filename)
            }
            Self::Logged { .. } => {
                "Download blocked by security settings. Check the log for data.".to_string()
            }
        }
    }

    /// Only the last-resort tier counts as a failure from the user's point
    /// of view.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Logged { .. })
    }
}

/// One way of handing a CSV payload to the user.
pub trait CsvSink {
    fn deliver(&self, content: &str, filename: &str) -> Result<Delivery, ExportError>;
}

/// Saves CSV files into a directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl CsvSink for FileSink {
    fn deliver(&self, content: &str, filename: &str) -> Result<Delivery, ExportError> {
        ensure_path_exists(&self.dir).map_err(|e| ExportError::Io(self.dir.clone(), e))?;
        let path = self.dir.join(filename);
        fs::write(&path, content).map_err(|e| ExportError::Io(path.clone(), e))?;
        debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(Delivery::Saved(path))
    }
}

/// Copies CSV payloads to the clipboard by piping them into a command such as
/// `pbcopy`, `wl-copy` or `xclip -selection clipboard`.
#[derive(Debug, Clone)]
pub struct ClipboardSink {
    program: String,
    args: Vec<String>,
}

impl ClipboardSink {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The conventional clipboard command for the current platform.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("pbcopy", Vec::new())
        } else if cfg!(target_os = "windows") {
            Self::new("clip", Vec::new())
        } else if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            Self::new("wl-copy", Vec::new())
        } else {
            Self::new(
                "xclip",
                vec!["-selection".to_string(), "clipboard".to_string()],
            )
        }
    }
}

impl CsvSink for ClipboardSink {
    fn deliver(&self, content: &str, filename: &str) -> Result<Delivery, ExportError> {
        let clipboard_err = |e: std::io::Error| ExportError::Clipboard(format!("{}: {}", self.program, e));
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(clipboard_err)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content.as_bytes()).map_err(clipboard_err)?;
        }
        let status = child.wait().map_err(clipboard_err)?;
        if !status.success() {
            return Err(ExportError::Clipboard(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(Delivery::Copied {
            filename: filename.to_string(),
        })
    }
}

/// The delivery chain for CSV payloads: save to a file, else copy to the
/// clipboard, else log the payload for manual copying.
#[derive(Default)]
pub struct CsvDelivery {
    save: Option<Box<dyn CsvSink>>,
    clipboard: Option<Box<dyn CsvSink>>,
}

impl CsvDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save(mut self, sink: Box<dyn CsvSink>) -> Self {
        self.save = Some(sink);
        self
    }

    pub fn with_clipboard(mut self, sink: Box<dyn CsvSink>) -> Self {
        self.clipboard = Some(sink);
        self
    }

    /// Deliver a payload through the first tier that works. An empty payload
    /// is refused outright. Filenames without a `.csv` extension get one.
    pub fn deliver(&self, content: &str, filename: &str) -> Result<Delivery, ExportError> {
        if content.trim().is_empty() {
            return Err(ExportError::Empty);
        }
        let filename = if filename.ends_with(".csv") {
            filename.to_string()
        } else {
            format!("{}.csv", filename)
        };

        for (tier, sink) in [("file", &self.save), ("clipboard", &self.clipboard)] {
            if let Some(sink) = sink {
                match sink.deliver(content, &filename) {
                    Ok(delivery) => return Ok(delivery),
                    Err(e) => warn!("CSV {} delivery failed: {}", tier, e),
                }
            }
        }

        info!("CSV content for manual copy:");
        info!("=====================================");
        for line in content.lines() {
            info!("{}", line);
        }
        info!("=====================================");
        info!("Save the above content as: {}", filename);
        Ok(Delivery::Logged { filename })
    }
}

impl std::fmt::Debug for CsvDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvDelivery")
            .field("save", &self.save.is_some())
            .field("clipboard", &self.clipboard.is_some())
            .finish()
    }
}
