//! Display-ready view models over classified sections: pagination, sorting
//! and per-cell formatting.

use std::cmp::Ordering;

use log::debug;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::{
    config::Config,
    format::{format_cell, format_metric, format_title, sanitize_identifier},
    hash::fingerprint,
    shape::{self, ChartType, Column, ColumnType, ListKind, MetricsLayout, Section, SectionKind},
    value::{display_string, parse_number_prefix},
};

/// The rows on a 1-indexed page. Pages past the end (and page 0) are empty;
/// clamping is up to the caller.
pub fn paginate<T>(rows: &[T], page: usize, page_size: usize) -> &[T] {
    if page == 0 {
        return &[];
    }
    let start = (page - 1).saturating_mul(page_size).min(rows.len());
    let end = start.saturating_add(page_size).min(rows.len());
    &rows[start..end]
}

pub fn total_pages(total_rows: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    (total_rows + page_size - 1) / page_size
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

fn sort_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => parse_number_prefix(s),
        _ => None,
    }
}

/// Compare two cell values: numerically when both sides parse as numbers,
/// otherwise as case-insensitive strings. Missing values compare as empty
/// strings.
pub fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let a = a.unwrap_or(&JsonValue::Null);
    let b = b.unwrap_or(&JsonValue::Null);
    if let (Some(x), Some(y)) = (sort_number(a), sort_number(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    display_string(a)
        .to_lowercase()
        .cmp(&display_string(b).to_lowercase())
}

/// Stable sort of rows on the value the accessor extracts.
pub fn sort_by_field<T, F>(rows: &mut [T], direction: SortDirection, value_of: F)
where
    F: Fn(&T) -> Option<&JsonValue>,
{
    rows.sort_by(|a, b| {
        let ord = compare_values(value_of(a), value_of(b));
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

/// Sort plain JSON rows on the given field.
pub fn sort_rows(rows: &mut [JsonValue], field: &str, direction: SortDirection) {
    sort_by_field(rows, direction, |row| row.get(field));
}

fn cell_class(column_type: ColumnType) -> String {
    let suffix = match column_type {
        ColumnType::Text => "text",
        other => other.as_str(),
    };
    format!("table-cell cell-{}", suffix)
}

fn value_class(column_type: ColumnType) -> String {
    let suffix = match column_type {
        ColumnType::Text => "text",
        other => other.as_str(),
    };
    format!("value-{}", suffix)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnView {
    pub field: String,
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub sortable: bool,
    pub filterable: bool,
    pub cell_class: String,
    pub value_class: String,
    pub field_key: String,
}

impl ColumnView {
    fn new(index: usize, column: Column) -> Self {
        Self {
            label: format_title(&column.field),
            sortable: true,
            filterable: column.column_type.is_filterable(),
            cell_class: cell_class(column.column_type),
            value_class: value_class(column.column_type),
            field_key: format!("field_{}", index),
            field: column.field,
            column_type: column.column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub field: String,
    /// The formatted value.
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_link: Option<String>,
    pub cell_class: String,
    pub value_class: String,
    pub key: String,
}

/// A table row: the raw row plus one display cell per column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub key: String,
    pub values: JsonValue,
    pub cells: Vec<Cell>,
}

impl RowView {
    fn new(section_id: &str, index: usize, values: JsonValue, columns: &[ColumnView]) -> Self {
        let key = match values.get("Id") {
            Some(JsonValue::String(id)) if !id.is_empty() => id.clone(),
            _ => format!("{}_row_{}", section_id, index),
        };
        let cells = columns
            .iter()
            .map(|column| {
                let raw = values.get(&column.field).unwrap_or(&JsonValue::Null);
                let email_link = match (column.column_type, raw) {
                    (ColumnType::Email, JsonValue::String(s)) if !s.is_empty() => {
                        Some(format!("mailto:{}", s))
                    }
                    _ => None,
                };
                Cell {
                    field: column.field.clone(),
                    value: format_cell(raw, &column.field),
                    email_link,
                    cell_class: column.cell_class.clone(),
                    value_class: column.value_class.clone(),
                    key: format!("{}_{}", key, column.field),
                }
            })
            .collect();
        Self { key, values, cells }
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.values.get(field)
    }
}

/// Moves between pages of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    First,
    Previous,
    Next,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSizeOption {
    pub label: String,
    pub value: usize,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub start_record: usize,
    pub end_record: usize,
    pub total_records: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub has_previous: bool,
    pub has_next: bool,
    pub page_options: Vec<PageSizeOption>,
}

/// A paginated, sortable table.
///
/// The full row set is kept in display order. The visible page is always
/// derived from it, so the page is never out of step with the current page,
/// page size or sort.
#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    columns: Vec<ColumnView>,
    rows: Vec<RowView>,
    current_page: usize,
    page_size: usize,
    page_size_options: Vec<usize>,
    sort: Option<(String, SortDirection)>,
}

impl TableView {
    pub fn new(
        section_id: &str,
        rows: Vec<JsonValue>,
        columns: Vec<Column>,
        page_size: usize,
        page_size_options: Vec<usize>,
    ) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, c)| ColumnView::new(i, c))
            .collect::<Vec<ColumnView>>();
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| RowView::new(section_id, i, row, &columns))
            .collect();
        Self {
            columns,
            rows,
            current_page: 1,
            page_size: page_size.max(1),
            page_size_options,
            sort: None,
        }
    }

    pub fn columns(&self) -> &[ColumnView] {
        &self.columns
    }

    /// Every row, in the current sort order.
    pub fn all_rows(&self) -> &[RowView] {
        &self.rows
    }

    /// The rows on the current page.
    pub fn page(&self) -> &[RowView] {
        paginate(&self.rows, self.current_page, self.page_size)
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_records(&self) -> usize {
        self.rows.len()
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.rows.len(), self.page_size)
    }

    pub fn show_pagination(&self) -> bool {
        self.total_records() > self.page_size
    }

    pub fn sort_field(&self) -> Option<&str> {
        self.sort.as_ref().map(|(f, _)| f.as_str())
    }

    pub fn sort_direction(&self) -> Option<SortDirection> {
        self.sort.as_ref().map(|(_, d)| *d)
    }

    /// Move to another page, staying within the first and last pages.
    pub fn go_to(&mut self, action: PageAction) {
        let last = self.total_pages().max(1);
        self.current_page = match action {
            PageAction::First => 1,
            PageAction::Previous => self.current_page.saturating_sub(1).max(1),
            PageAction::Next => (self.current_page + 1).min(last),
            PageAction::Last => last,
        };
    }

    /// Change the page size and return to the first page. A zero page size
    /// is ignored.
    pub fn set_page_size(&mut self, page_size: usize) {
        if page_size == 0 {
            return;
        }
        self.page_size = page_size;
        self.current_page = 1;
    }

    /// Sort the full row set on the given field. Sorting the same field again
    /// flips the direction; a new field starts ascending. The current page is
    /// kept.
    pub fn sort_by(&mut self, field: &str) -> SortDirection {
        let direction = match &self.sort {
            Some((current, direction)) if current == field => direction.toggled(),
            _ => SortDirection::Asc,
        };
        sort_by_field(&mut self.rows, direction, |row| row.get(field));
        self.sort = Some((field.to_string(), direction));
        direction
    }

    pub fn pagination_info(&self) -> PaginationInfo {
        let total_pages = self.total_pages();
        PaginationInfo {
            start_record: (self.current_page - 1) * self.page_size + 1,
            end_record: (self.current_page * self.page_size).min(self.total_records()),
            total_records: self.total_records(),
            current_page: self.current_page,
            total_pages,
            has_previous: self.current_page > 1,
            has_next: self.current_page < total_pages,
            page_options: self
                .page_size_options
                .iter()
                .map(|&value| PageSizeOption {
                    label: value.to_string(),
                    value,
                    selected: value == self.page_size,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSection {
    pub chart_id: String,
    pub title: String,
    pub chart_type: ChartType,
    pub data: JsonMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEntry {
    pub key: String,
    pub label: String,
    pub value: JsonValue,
    pub formatted_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub content: String,
    pub key: String,
}

/// The display state of one section.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionBody {
    Table(TableView),
    Chart(ChartSection),
    Metrics {
        layout: MetricsLayout,
        data: JsonMap<String, JsonValue>,
        entries: Vec<MetricEntry>,
    },
    Metric {
        value: JsonValue,
        formatted_value: String,
    },
    List {
        kind: ListKind,
        items: Vec<JsonValue>,
        entries: Vec<ListItem>,
    },
}

/// A classified section ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionView {
    pub id: String,
    pub title: String,
    pub body: SectionBody,
}

impl SectionView {
    pub fn new(key: &str, section: Section, config: &Config) -> Self {
        let id = format!("section_{}", sanitize_identifier(key));
        let title = format_title(key);
        let body = match section {
            Section::Table { rows, columns } => SectionBody::Table(TableView::new(
                &id,
                rows,
                columns,
                config.default_page_size,
                config.page_size_options.clone(),
            )),
            Section::Chart { data, chart_type } => SectionBody::Chart(ChartSection {
                chart_id: format!("chart_{}", id),
                title: title.clone(),
                chart_type,
                data,
            }),
            Section::Metrics { data, layout } => SectionBody::Metrics {
                layout,
                entries: data
                    .iter()
                    .map(|(k, v)| MetricEntry {
                        key: k.clone(),
                        label: format_title(k),
                        value: v.clone(),
                        formatted_value: format_metric(v),
                    })
                    .collect(),
                data,
            },
            Section::Metric { value } => SectionBody::Metric {
                formatted_value: format_metric(&value),
                value,
            },
            Section::List { items, kind } => SectionBody::List {
                kind,
                entries: items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| ListItem {
                        content: display_string(item),
                        key: format!("{}_item_{}", id, i),
                    })
                    .collect(),
                items,
            },
        };
        Self { id, title, body }
    }

    pub fn kind(&self) -> SectionKind {
        match &self.body {
            SectionBody::Table(_) => SectionKind::Table,
            SectionBody::Chart(_) => SectionKind::Chart,
            SectionBody::Metrics { .. } => SectionKind::Metrics,
            SectionBody::Metric { .. } => SectionKind::Metric,
            SectionBody::List { .. } => SectionKind::List,
        }
    }

    pub fn icon(&self) -> &'static str {
        match self.kind() {
            SectionKind::Metrics => "utility:analytics",
            SectionKind::Metric => "utility:number_input",
            SectionKind::Table => "utility:table",
            SectionKind::Chart => "utility:chart",
            SectionKind::List => "utility:list",
        }
    }

    pub fn as_table(&self) -> Option<&TableView> {
        match &self.body {
            SectionBody::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_chart(&self) -> Option<&ChartSection> {
        match &self.body {
            SectionBody::Chart(c) => Some(c),
            _ => None,
        }
    }
}

/// The raw inputs of a run, kept for the "show raw data" panel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawData {
    pub row_sets: Vec<JsonValue>,
    pub queries: Vec<String>,
    pub script: String,
}

/// All sections derived from one processed-data object.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsView {
    processed: JsonMap<String, JsonValue>,
    fingerprint: String,
    sections: Vec<SectionView>,
    raw: RawData,
    show_raw_data: bool,
}

impl ResultsView {
    pub fn new(processed: JsonMap<String, JsonValue>, config: &Config) -> Self {
        let sections = shape::classify_all(&processed)
            .into_iter()
            .map(|(key, section)| SectionView::new(&key, section, config))
            .collect::<Vec<SectionView>>();
        debug!(
            "Dashboard sections created: {} ({} charts)",
            sections.len(),
            sections
                .iter()
                .filter(|s| s.kind() == SectionKind::Chart)
                .count()
        );
        let fingerprint = fingerprint(&JsonValue::Object(processed.clone()));
        Self {
            processed,
            fingerprint,
            sections,
            raw: RawData::default(),
            show_raw_data: false,
        }
    }

    pub fn with_raw_data(mut self, raw: RawData) -> Self {
        self.raw = raw;
        self
    }

    pub fn processed(&self) -> &JsonMap<String, JsonValue> {
        &self.processed
    }

    /// Content fingerprint of the processed data this view was built from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn sections(&self) -> &[SectionView] {
        &self.sections
    }

    pub fn section(&self, id: &str) -> Option<&SectionView> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn table_mut(&mut self, id: &str) -> Option<&mut TableView> {
        self.sections
            .iter_mut()
            .find(|s| s.id == id)
            .and_then(|s| match &mut s.body {
                SectionBody::Table(t) => Some(t),
                _ => None,
            })
    }

    pub fn charts(&self) -> impl Iterator<Item = &ChartSection> {
        self.sections.iter().filter_map(SectionView::as_chart)
    }

    pub fn raw(&self) -> &RawData {
        &self.raw
    }

    pub fn toggle_raw_data(&mut self) -> bool {
        self.show_raw_data = !self.show_raw_data;
        self.show_raw_data
    }

    pub fn raw_data_toggle_label(&self) -> &'static str {
        if self.show_raw_data {
            "Hide Raw Data"
        } else {
            "Show Raw Data"
        }
    }

    /// Total number of raw rows across all queries.
    pub fn raw_data_count(&self) -> usize {
        self.raw
            .row_sets
            .iter()
            .map(|rows| rows.as_array().map(Vec::len).unwrap_or(0))
            .sum()
    }

    /// Pretty-printed raw rows, one block per query.
    pub fn formatted_raw_data(&self) -> String {
        self.raw
            .row_sets
            .iter()
            .enumerate()
            .map(|(i, rows)| {
                format!(
                    "Query {} Results ({} records):\n{}",
                    i + 1,
                    rows.as_array().map(Vec::len).unwrap_or(0),
                    serde_json::to_string_pretty(rows).unwrap_or_default()
                )
            })
            .collect::<Vec<String>>()
            .join(&format!("\n\n{}\n\n", "=".repeat(50)))
    }

    /// The executed queries, one numbered block each.
    pub fn executed_queries(&self) -> String {
        self.raw
            .queries
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let text = if q.trim().is_empty() {
                    "-- No query provided --"
                } else {
                    q.trim()
                };
                format!("Query {}:\n{}", i + 1, text)
            })
            .collect::<Vec<String>>()
            .join(&format!("\n\n{}\n\n", "=".repeat(50)))
    }
}
