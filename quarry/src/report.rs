//! Standalone HTML rendering of a results view.

use std::{fs, path::Path};

use eyre::{Result, WrapErr};
use handlebars::Handlebars;
use log::debug;
use serde::Serialize;

use crate::{
    chart::{chart_config, ChartAdapter, ChartHandle, ChartLibrary},
    fs::ensure_path_exists,
    present::{ColumnView, ListItem, MetricEntry, ResultsView, RowView, SectionBody, SectionView},
    Error, LoadError,
};

pub const CHART_JS_URL: &str = "https://cdn.jsdelivr.net/npm/chart.js@4";

const REPORT_TEMPLATE_NAME: &str = "report";

const REPORT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="quarry-fingerprint" content="{{fingerprint}}">
<title>{{title}}</title>
{{#if hasCharts}}<script src="{{chartLibraryUrl}}"></script>{{/if}}
</head>
<body>
<h1>{{title}}</h1>
{{#each sections}}
<section id="{{id}}" class="section section-{{kind}}" data-icon="{{icon}}">
<h2>{{title}}</h2>
{{#if table}}
<table>
<thead><tr>{{#each table.columns}}<th class="{{cellClass}}">{{label}}</th>{{/each}}</tr></thead>
<tbody>
{{#each table.rows}}<tr data-key="{{key}}">{{#each cells}}<td class="{{cellClass}}"><span class="{{valueClass}}">{{#if emailLink}}<a href="{{emailLink}}">{{value}}</a>{{else}}{{value}}{{/if}}</span></td>{{/each}}</tr>
{{/each}}
</tbody>
</table>
<p class="table-footer">{{table.totalRecords}} records</p>
{{/if}}
{{#if chart}}
{{#if chart.config}}
<canvas id="{{chart.chartId}}"></canvas>
<script>new Chart(document.getElementById("{{chart.chartId}}"), {{{chart.config}}});</script>
{{else}}
<div class="chart-placeholder">Chart library unavailable{{#if chart.reason}} ({{chart.reason}}){{/if}}</div>
{{/if}}
{{/if}}
{{#if metrics}}
<dl class="metrics">
{{#each metrics}}<dt>{{label}}</dt><dd>{{formattedValue}}</dd>
{{/each}}
</dl>
{{/if}}
{{#if metric}}<p class="metric-value">{{metric}}</p>{{/if}}
{{#if list}}
<ul class="list-{{listKind}}">
{{#each list}}<li>{{content}}</li>
{{/each}}
</ul>
{{/if}}
</section>
{{/each}}
</body>
</html>
"#;

/// Chart.js, as driven from a rendered HTML report. Charts are created by
/// the script the report embeds for each live chart configuration.
#[derive(Debug, Default)]
pub struct ChartJs {
    next_handle: u64,
    live: usize,
}

impl ChartJs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the library. Never fails; the report pulls the script itself.
    pub async fn load() -> std::result::Result<Box<dyn ChartLibrary>, LoadError> {
        Ok(Box::new(Self::new()))
    }

    pub fn live(&self) -> usize {
        self.live
    }
}

impl ChartLibrary for ChartJs {
    fn name(&self) -> &str {
        "Chart.js"
    }

    fn create(
        &mut self,
        canvas_id: &str,
        config: &serde_json::Value,
    ) -> std::result::Result<ChartHandle, LoadError> {
        if !config.get("type").map(|t| t.is_string()).unwrap_or(false) {
            return Err(LoadError::ChartLibrary(format!(
                "chart {} has no type",
                canvas_id
            )));
        }
        self.next_handle += 1;
        self.live += 1;
        Ok(ChartHandle(self.next_handle))
    }

    fn destroy(&mut self, _handle: ChartHandle) {
        self.live = self.live.saturating_sub(1);
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableContext<'a> {
    columns: &'a [ColumnView],
    rows: &'a [RowView],
    total_records: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChartContext {
    chart_id: String,
    config: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SectionContext<'a> {
    id: &'a str,
    title: &'a str,
    icon: &'static str,
    kind: String,
    table: Option<TableContext<'a>>,
    chart: Option<ChartContext>,
    metrics: Option<&'a [MetricEntry]>,
    metric: Option<&'a str>,
    list: Option<&'a [ListItem]>,
    list_kind: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportContext<'a> {
    title: &'a str,
    fingerprint: &'a str,
    chart_library_url: &'static str,
    has_charts: bool,
    sections: Vec<SectionContext<'a>>,
}

// Keeps a closing tag inside the JSON from ending the script element.
fn script_safe_json(value: &serde_json::Value) -> String {
    value.to_string().replace("</", "<\\/")
}

fn chart_context(section: &SectionView, adapter: &ChartAdapter) -> Option<ChartContext> {
    let chart = section.as_chart()?;
    let config = match adapter.unavailable_reason() {
        Some(reason) => {
            return Some(ChartContext {
                chart_id: chart.chart_id.clone(),
                config: None,
                reason: Some(reason.to_string()),
            })
        }
        None => adapter
            .config(&chart.chart_id)
            .cloned()
            .unwrap_or_else(|| chart_config(chart)),
    };
    Some(ChartContext {
        chart_id: chart.chart_id.clone(),
        config: Some(script_safe_json(&config)),
        reason: None,
    })
}

fn section_context<'a>(section: &'a SectionView, adapter: &ChartAdapter) -> SectionContext<'a> {
    let mut ctx = SectionContext {
        id: &section.id,
        title: &section.title,
        icon: section.icon(),
        kind: section.kind().to_string(),
        table: None,
        chart: chart_context(section, adapter),
        metrics: None,
        metric: None,
        list: None,
        list_kind: None,
    };
    match &section.body {
        SectionBody::Table(table) => {
            ctx.table = Some(TableContext {
                columns: table.columns(),
                rows: table.all_rows(),
                total_records: table.total_records(),
            })
        }
        SectionBody::Metrics { entries, .. } => ctx.metrics = Some(entries),
        SectionBody::Metric {
            formatted_value, ..
        } => ctx.metric = Some(formatted_value),
        SectionBody::List { entries, kind, .. } => {
            ctx.list = Some(entries);
            ctx.list_kind = Some(kind.as_str());
        }
        SectionBody::Chart(_) => (),
    }
    ctx
}

/// Render every section of the view as a standalone HTML page. Chart
/// sections embed the configuration the chart adapter created them with, or
/// a placeholder when the chart library is unavailable.
pub fn render_html(title: &str, view: &ResultsView, adapter: &ChartAdapter) -> Result<String> {
    let mut hb = Handlebars::new();
    hb.register_template_string(REPORT_TEMPLATE_NAME, REPORT_TEMPLATE)
        .map_err(|e| Error::ReportTemplate(REPORT_TEMPLATE_NAME.to_string(), Box::new(e)))?;

    let sections = view
        .sections()
        .iter()
        .map(|s| section_context(s, adapter))
        .collect::<Vec<SectionContext>>();
    let context = ReportContext {
        title,
        fingerprint: view.fingerprint(),
        chart_library_url: CHART_JS_URL,
        has_charts: adapter.is_available() && sections.iter().any(|s| s.chart.is_some()),
        sections,
    };
    let rendered = hb
        .render(REPORT_TEMPLATE_NAME, &context)
        .map_err(|e| Error::ReportRender(REPORT_TEMPLATE_NAME.to_string(), e))?;
    debug!("Rendered report with {} sections", context.sections.len());
    Ok(rendered)
}

/// Render the report and write it to the given path, creating parent
/// directories as necessary.
pub fn write_html<P: AsRef<Path>>(
    path: P,
    title: &str,
    view: &ResultsView,
    adapter: &ChartAdapter,
) -> Result<()> {
    let path = path.as_ref();
    let html = render_html(title, view, adapter)?;
    if let Some(parent) = path.parent() {
        ensure_path_exists(parent)
            .wrap_err_with(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(path, html).wrap_err_with(|| format!("failed to write report to {}", path.display()))?;
    debug!("Wrote report to {}", path.display());
    Ok(())
}
