//! Classification of processed data into renderable sections.
//!
//! Classification is a pure function of a key and its value. The processed
//! data object is classified one top-level key at a time, in key order.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::value::{as_number, is_date_like};

/// Number of leading rows inspected when inferring column types.
pub const COLUMN_SAMPLE_SIZE: usize = 10;

/// Metrics objects with more keys than this are laid out as a grid.
pub const METRICS_CARD_LIMIT: usize = 6;

lazy_static! {
    static ref YEAR_MONTH: Regex = Regex::new(r"^\d{4}-\d{2}").unwrap();
    static ref MONTH_NAME: Regex =
        Regex::new(r"(?i)^(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Percentage,
    Currency,
    Email,
    Date,
    Text,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Percentage => "percentage",
            Self::Currency => "currency",
            Self::Email => "email",
            Self::Date => "date",
            Self::Text => "text",
        }
    }

    /// Whether values of this type can be filtered on.
    pub fn is_filterable(self) -> bool {
        matches!(
            self,
            Self::Text | Self::Number | Self::Percentage | Self::Currency
        )
    }
}

/// An inferred table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub field: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    HorizontalBar,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Pie => "pie",
            Self::HorizontalBar => "horizontalBar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Insights,
    Recommendations,
    #[serde(rename = "list")]
    Generic,
}

impl ListKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insights => "insights",
            Self::Recommendations => "recommendations",
            Self::Generic => "list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsLayout {
    Grid,
    Cards,
}

/// One classified unit of processed data.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    /// An array of objects.
    Table {
        rows: Vec<JsonValue>,
        columns: Vec<Column>,
    },
    /// An object that looks like chart data.
    Chart {
        data: JsonMap<String, JsonValue>,
        chart_type: ChartType,
    },
    /// Any other object.
    Metrics {
        data: JsonMap<String, JsonValue>,
        layout: MetricsLayout,
    },
    /// A scalar.
    Metric { value: JsonValue },
    /// An array of non-objects.
    List { items: Vec<JsonValue>, kind: ListKind },
}

/// The discriminant of a [`Section`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Table,
    Chart,
    Metrics,
    Metric,
    List,
}

impl SectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Chart => "chart",
            Self::Metrics => "metrics",
            Self::Metric => "metric",
            Self::List => "list",
        }
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Section {
    pub fn kind(&self) -> SectionKind {
        match self {
            Self::Table { .. } => SectionKind::Table,
            Self::Chart { .. } => SectionKind::Chart,
            Self::Metrics { .. } => SectionKind::Metrics,
            Self::Metric { .. } => SectionKind::Metric,
            Self::List { .. } => SectionKind::List,
        }
    }
}

/// Classify a single top-level entry of processed data. Returns `None` for an
/// empty array, which is omitted rather than rendered empty.
pub fn classify(key: &str, value: &JsonValue) -> Option<Section> {
    Some(match value {
        JsonValue::Array(items) => match items.first() {
            None => return None,
            Some(JsonValue::Object(_)) => Section::Table {
                columns: infer_columns(items),
                rows: items.clone(),
            },
            Some(_) => Section::List {
                items: items.clone(),
                kind: list_kind(key),
            },
        },
        JsonValue::Object(data) if is_chart_data(data) => Section::Chart {
            chart_type: chart_type(data),
            data: data.clone(),
        },
        JsonValue::Object(data) => Section::Metrics {
            layout: if data.len() > METRICS_CARD_LIMIT {
                MetricsLayout::Grid
            } else {
                MetricsLayout::Cards
            },
            data: data.clone(),
        },
        scalar => Section::Metric {
            value: scalar.clone(),
        },
    })
}

/// Classify every top-level entry of the processed data, in key order.
pub fn classify_all(data: &JsonMap<String, JsonValue>) -> Vec<(String, Section)> {
    data.iter()
        .filter_map(|(key, value)| classify(key, value).map(|s| (key.clone(), s)))
        .collect()
}

/// Infer columns from the first row's keys, typing each one from a sample of
/// the leading rows.
pub fn infer_columns(rows: &[JsonValue]) -> Vec<Column> {
    let first = match rows.first().and_then(JsonValue::as_object) {
        Some(first) => first,
        None => return Vec::new(),
    };
    let sample = &rows[..rows.len().min(COLUMN_SAMPLE_SIZE)];
    first
        .keys()
        .map(|field| Column {
            field: field.clone(),
            column_type: column_type(sample, field),
        })
        .collect()
}

fn column_type(sample: &[JsonValue], field: &str) -> ColumnType {
    let values = sample
        .iter()
        .filter_map(|row| row.get(field))
        .filter(|v| !v.is_null())
        .collect::<Vec<&JsonValue>>();
    if values.is_empty() {
        return ColumnType::Text;
    }
    let all_strings_containing = |needles: &[&str]| {
        values.iter().all(|v| {
            v.as_str()
                .map(|s| needles.iter().any(|n| s.contains(n)))
                .unwrap_or(false)
        })
    };

    if values.iter().all(|v| as_number(v).is_some()) {
        ColumnType::Number
    } else if all_strings_containing(&["%"]) {
        ColumnType::Percentage
    } else if all_strings_containing(&["$", "USD"]) {
        ColumnType::Currency
    } else if all_strings_containing(&["@"]) {
        ColumnType::Email
    } else if values.iter().all(|v| is_date_like(v)) {
        ColumnType::Date
    } else {
        ColumnType::Text
    }
}

fn list_kind(key: &str) -> ListKind {
    let lower = key.to_lowercase();
    if lower.contains("insight") || lower.contains("finding") {
        ListKind::Insights
    } else if lower.contains("recommendation") || lower.contains("action") {
        ListKind::Recommendations
    } else {
        ListKind::Generic
    }
}

fn has_keys(data: &JsonMap<String, JsonValue>, a: &str, b: &str) -> bool {
    data.contains_key(a) && data.contains_key(b)
}

fn is_chart_data(data: &JsonMap<String, JsonValue>) -> bool {
    has_keys(data, "labels", "datasets")
        || has_keys(data, "x", "y")
        || has_keys(data, "categories", "series")
        || data.values().all(JsonValue::is_number)
}

fn is_time_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.contains("time")
        || lower.contains("date")
        || lower.contains("month")
        || lower.contains("day")
        || YEAR_MONTH.is_match(key)
        || MONTH_NAME.is_match(key)
}

fn chart_type(data: &JsonMap<String, JsonValue>) -> ChartType {
    if has_keys(data, "labels", "datasets") {
        return ChartType::Bar;
    }
    if data.keys().any(|k| is_time_key(k)) {
        return ChartType::Line;
    }
    if data.len() > 8 {
        return ChartType::HorizontalBar;
    }
    let small_values = data
        .values()
        .all(|v| v.as_f64().map(|f| f <= 100.0).unwrap_or(false));
    if data.len() <= 6 && small_values {
        return ChartType::Pie;
    }
    ChartType::Bar
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn chart_type_of(value: JsonValue) -> ChartType {
        match classify("chart", &value) {
            Some(Section::Chart { chart_type, .. }) => chart_type,
            other => panic!("expected a chart section, got {:?}", other),
        }
    }

    #[test]
    fn small_percentages_become_a_pie() {
        let section = classify("revenue", &json!({"Tech": 40, "Finance": 25, "Retail": 10}));
        assert_eq!(
            section,
            Some(Section::Chart {
                data: json!({"Tech": 40, "Finance": 25, "Retail": 10})
                    .as_object()
                    .unwrap()
                    .clone(),
                chart_type: ChartType::Pie,
            })
        );
    }

    #[test]
    fn chart_type_inference() {
        assert_eq!(
            chart_type_of(json!({"labels": ["a"], "datasets": [{"data": [1]}]})),
            ChartType::Bar
        );
        assert_eq!(chart_type_of(json!({"2024-01": 5, "2024-02": 7})), ChartType::Line);
        assert_eq!(chart_type_of(json!({"January": 5, "February": 7})), ChartType::Line);
        assert_eq!(chart_type_of(json!({"Weekday": 500, "Weekend": 700})), ChartType::Line);
        let many = (0..9)
            .map(|i| (format!("Category {}", i), json!(i * 1000)))
            .collect::<JsonMap<String, JsonValue>>();
        assert_eq!(chart_type_of(JsonValue::Object(many)), ChartType::HorizontalBar);
        assert_eq!(
            chart_type_of(json!({"Prospecting": 1200, "Closed Won": 3400})),
            ChartType::Bar
        );
        assert_eq!(chart_type_of(json!({"x": [1, 2], "y": [3, 4]})), ChartType::Bar);
    }

    #[test]
    fn non_numeric_objects_are_metrics() {
        let small = classify("summary", &json!({"Total Accounts": 12, "Top Industry": "Tech"}));
        assert!(matches!(
            small,
            Some(Section::Metrics {
                layout: MetricsLayout::Cards,
                ..
            })
        ));
        let big = classify(
            "summary",
            &json!({"a": "1", "b": 2, "c": 3, "d": 4, "e": 5, "f": 6, "g": 7}),
        );
        assert!(matches!(
            big,
            Some(Section::Metrics {
                layout: MetricsLayout::Grid,
                ..
            })
        ));
    }

    #[test]
    fn accounts_become_a_table() {
        let section = classify(
            "accounts",
            &json!([
                {"Name": "Acme", "Revenue": 1000000},
                {"Name": "Globex", "Revenue": 500000}
            ]),
        )
        .unwrap();
        match section {
            Section::Table { rows, columns } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(
                    columns,
                    vec![
                        Column {
                            field: "Name".to_string(),
                            column_type: ColumnType::Text
                        },
                        Column {
                            field: "Revenue".to_string(),
                            column_type: ColumnType::Number
                        },
                    ]
                );
            }
            other => panic!("expected a table, got {:?}", other),
        }
    }

    #[test]
    fn column_type_inference() {
        let rows = vec![
            json!({"Rate": "50%", "Price": "$10", "Email": "a@example.com", "Closed": "2024-03-01", "Code": "42", "Notes": null}),
            json!({"Rate": "7.5%", "Price": "12 USD", "Email": "b@example.com", "Closed": "2024-03-02T10:00:00Z", "Code": 7, "Notes": null}),
        ];
        let types = infer_columns(&rows)
            .into_iter()
            .map(|c| c.column_type)
            .collect::<Vec<ColumnType>>();
        assert_eq!(
            types,
            vec![
                ColumnType::Percentage,
                ColumnType::Currency,
                ColumnType::Email,
                ColumnType::Date,
                ColumnType::Number,
                ColumnType::Text,
            ]
        );
    }

    // Numeric typing needs the whole string to be a number, so values with a
    // leading number and a unit suffix keep their more specific type.
    #[test]
    fn unit_suffixed_numbers_are_not_numeric() {
        let rows = vec![
            json!({"Rate": "7.5%", "Weight": "12kg", "Amount": "12.50"}),
            json!({"Rate": "10%", "Weight": "3kg", "Amount": 8}),
        ];
        let types = infer_columns(&rows)
            .into_iter()
            .map(|c| c.column_type)
            .collect::<Vec<ColumnType>>();
        assert_eq!(
            types,
            vec![ColumnType::Percentage, ColumnType::Text, ColumnType::Number]
        );
    }

    #[test]
    fn only_the_leading_rows_are_sampled() {
        let mut rows = (0..COLUMN_SAMPLE_SIZE)
            .map(|i| json!({"Score": i}))
            .collect::<Vec<JsonValue>>();
        rows.push(json!({"Score": "n/a"}));
        assert_eq!(infer_columns(&rows)[0].column_type, ColumnType::Number);
    }

    #[test]
    fn lists_are_typed_by_key() {
        let kind = |key: &str| match classify(key, &json!(["one"])) {
            Some(Section::List { kind, .. }) => kind,
            other => panic!("expected a list, got {:?}", other),
        };
        assert_eq!(kind("keyInsights"), ListKind::Insights);
        assert_eq!(kind("findings"), ListKind::Insights);
        assert_eq!(kind("recommendations"), ListKind::Recommendations);
        assert_eq!(kind("nextActions"), ListKind::Recommendations);
        assert_eq!(kind("notes"), ListKind::Generic);
    }

    #[test]
    fn empty_arrays_are_omitted() {
        assert_eq!(classify("accounts", &json!([])), None);
    }

    #[test]
    fn scalars_are_single_metrics() {
        assert_eq!(
            classify("executionTimestamp", &json!("2024-03-01T10:00:00Z")),
            Some(Section::Metric {
                value: json!("2024-03-01T10:00:00Z")
            })
        );
        assert_eq!(
            classify("total", &json!(null)).map(|s| s.kind()),
            Some(SectionKind::Metric)
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let data = json!({
            "summary": {"total": 3, "label": "x"},
            "revenue": {"Tech": 40},
            "rows": [{"a": 1}],
            "insights": ["x"],
            "count": 3,
            "empty": []
        });
        let data = data.as_object().unwrap();
        let first = classify_all(data);
        assert_eq!(first, classify_all(data));
        assert_eq!(
            first.iter().map(|(k, _)| k.as_str()).collect::<Vec<&str>>(),
            vec!["summary", "revenue", "rows", "insights", "count"]
        );
    }
}
