//! Adapter between chart sections and an external charting library.

use std::future::Future;

use indexmap::IndexMap;
use log::{debug, warn};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::{
    present::{ChartSection, ResultsView},
    shape::ChartType,
    LoadError,
};

/// The fixed palette chart colors cycle through, as RGB triples.
pub const PALETTE: [(u8, u8, u8); 8] = [
    (54, 162, 235),
    (255, 99, 132),
    (255, 205, 86),
    (75, 192, 192),
    (153, 102, 255),
    (255, 159, 64),
    (199, 199, 199),
    (83, 102, 255),
];

/// Opaque handle to a live chart owned by a [`ChartLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChartHandle(pub u64);

/// An external charting library that can draw charts from a configuration
/// object (a `type`, `data` and `options`).
pub trait ChartLibrary: Send {
    fn name(&self) -> &str;

    /// Create a chart on the canvas with the given identifier.
    fn create(&mut self, canvas_id: &str, config: &JsonValue) -> Result<ChartHandle, LoadError>;

    /// Tear down a chart, releasing whatever the library holds for it.
    fn destroy(&mut self, handle: ChartHandle);
}

/// What happened when a chart section was rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Created,
    AlreadyLive,
    /// The chart library never loaded; the section shows a placeholder.
    Unavailable(String),
    Failed(String),
}

#[derive(Debug)]
struct LiveChart {
    handle: ChartHandle,
    config: JsonValue,
}

/// Keeps at most one live chart per chart section.
///
/// Every chart is destroyed before it is re-created, on [`Self::destroy_all`]
/// and when the adapter is dropped.
pub struct ChartAdapter {
    library: Result<Box<dyn ChartLibrary>, LoadError>,
    live: IndexMap<String, LiveChart>,
    // fingerprint of the processed data the live charts were built from
    shown: Option<String>,
}

impl std::fmt::Debug for ChartAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartAdapter")
            .field(
                "library",
                &self.library.as_ref().map(|l| l.name().to_string()),
            )
            .field("live", &self.live.keys().collect::<Vec<&String>>())
            .finish()
    }
}

impl ChartAdapter {
    pub fn new(library: Box<dyn ChartLibrary>) -> Self {
        Self {
            library: Ok(library),
            live: IndexMap::new(),
            shown: None,
        }
    }

    /// An adapter whose library failed to load. Every chart renders as
    /// unavailable.
    pub fn unavailable(reason: LoadError) -> Self {
        Self {
            library: Err(reason),
            live: IndexMap::new(),
            shown: None,
        }
    }

    /// Wait for the chart library to load. A failure is logged and leaves
    /// the adapter in the unavailable state.
    pub async fn load<F>(loader: F) -> Self
    where
        F: Future<Output = Result<Box<dyn ChartLibrary>, LoadError>>,
    {
        match loader.await {
            Ok(library) => {
                debug!("Chart library loaded: {}", library.name());
                Self::new(library)
            }
            Err(e) => {
                warn!("Failed to load chart library: {}", e);
                Self::unavailable(e)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.library.is_ok()
    }

    pub fn unavailable_reason(&self) -> Option<&LoadError> {
        self.library.as_ref().err()
    }

    pub fn is_live(&self, chart_id: &str) -> bool {
        self.live.contains_key(chart_id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// The configuration a live chart was created with.
    pub fn config(&self, chart_id: &str) -> Option<&JsonValue> {
        self.live.get(chart_id).map(|c| &c.config)
    }

    /// Create the chart for a section unless one is already live.
    pub fn render(&mut self, section: &ChartSection) -> RenderOutcome {
        let library = match &mut self.library {
            Ok(library) => library,
            Err(e) => return RenderOutcome::Unavailable(e.to_string()),
        };
        if self.live.contains_key(&section.chart_id) {
            return RenderOutcome::AlreadyLive;
        }
        let config = chart_config(section);
        match library.create(&section.chart_id, &config) {
            Ok(handle) => {
                debug!("Chart created: {}", section.chart_id);
                self.live
                    .insert(section.chart_id.clone(), LiveChart { handle, config });
                RenderOutcome::Created
            }
            Err(e) => {
                warn!("Failed to create chart {}: {}", section.chart_id, e);
                RenderOutcome::Failed(e.to_string())
            }
        }
    }

    /// Tear down and forget the chart with the given identifier. Returns
    /// whether a chart was live.
    pub fn destroy(&mut self, chart_id: &str) -> bool {
        match self.live.shift_remove(chart_id) {
            Some(chart) => {
                if let Ok(library) = &mut self.library {
                    library.destroy(chart.handle);
                }
                true
            }
            None => false,
        }
    }

    pub fn destroy_all(&mut self) {
        let ids = self.live.keys().cloned().collect::<Vec<String>>();
        for id in ids {
            self.destroy(&id);
        }
        self.shown = None;
    }

    /// Render every chart section of the view that is not yet live.
    pub fn render_all(&mut self, view: &ResultsView) -> Vec<(String, RenderOutcome)> {
        view.charts()
            .map(|section| (section.chart_id.clone(), self.render(section)))
            .collect()
    }

    /// Destroy every chart, then render the view's charts from scratch. Used
    /// when the processed data is replaced wholesale.
    pub fn refresh(&mut self, view: &ResultsView) -> Vec<(String, RenderOutcome)> {
        self.destroy_all();
        self.render_all(view)
    }

    /// Render the charts of a view. When the view was built from different
    /// processed data than the live charts, every chart is refreshed;
    /// otherwise only missing charts are created.
    pub fn show(&mut self, view: &ResultsView) -> Vec<(String, RenderOutcome)> {
        let outcomes = if self.shown.as_deref() == Some(view.fingerprint()) {
            self.render_all(view)
        } else {
            if !self.live.is_empty() {
                debug!("Processed data replaced, refreshing {} chart(s)", self.live.len());
            }
            self.refresh(view)
        };
        self.shown = Some(view.fingerprint().to_string());
        outcomes
    }
}

impl Drop for ChartAdapter {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            debug!("Cleaning up {} chart(s)", self.live.len());
        }
        self.destroy_all();
    }
}

/// `count` colors from the palette at the given opacity.
pub fn palette(count: usize, alpha: f64) -> Vec<String> {
    PALETTE
        .iter()
        .cycle()
        .take(count)
        .map(|(r, g, b)| format!("rgba({}, {}, {}, {})", r, g, b, alpha))
        .collect()
}

/// Convert a chart section's data into the library's `labels`/`datasets`
/// shape.
pub fn chart_data(data: &JsonMap<String, JsonValue>, chart_type: ChartType) -> JsonValue {
    if data.contains_key("labels") && data.contains_key("datasets") {
        return JsonValue::Object(data.clone());
    }

    if let (Some(JsonValue::Array(xs)), Some(ys)) = (data.get("x"), data.get("y")) {
        let points = xs
            .iter()
            .enumerate()
            .map(|(i, x)| json!({"x": x, "y": ys.get(i).cloned().unwrap_or(JsonValue::Null)}))
            .collect::<Vec<JsonValue>>();
        return json!({
            "datasets": [{
                "label": "Data Points",
                "data": points,
                "backgroundColor": palette(1, 0.6)[0],
                "borderColor": palette(1, 1.0)[0],
                "borderWidth": 2
            }]
        });
    }

    if let (Some(JsonValue::Array(categories)), Some(JsonValue::Array(series))) =
        (data.get("categories"), data.get("series"))
    {
        let colors = palette(series.len(), 0.6);
        let borders = palette(series.len(), 1.0);
        let datasets = series
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let label = s
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| json!(format!("Series {}", i + 1)));
                let points = s.get("data").cloned().unwrap_or_else(|| s.clone());
                json!({
                    "label": label,
                    "data": points,
                    "backgroundColor": colors[i],
                    "borderColor": borders[i],
                    "borderWidth": 2
                })
            })
            .collect::<Vec<JsonValue>>();
        return json!({"labels": categories, "datasets": datasets});
    }

    if data.is_empty() {
        return json!({
            "labels": ["No Data"],
            "datasets": [{
                "label": "No Data Available",
                "data": [0],
                "backgroundColor": "rgba(200, 200, 200, 0.6)"
            }]
        });
    }

    let labels = data.keys().cloned().collect::<Vec<String>>();
    let values = data.values().cloned().collect::<Vec<JsonValue>>();
    let border_width = if chart_type == ChartType::Pie { 0 } else { 2 };
    let tension = if chart_type == ChartType::Line { 0.4 } else { 0.0 };
    json!({
        "labels": labels,
        "datasets": [{
            "label": "Values",
            "data": values,
            "backgroundColor": palette(labels.len(), 0.6),
            "borderColor": palette(labels.len(), 1.0),
            "borderWidth": border_width,
            "tension": tension
        }]
    })
}

/// Axis configuration for a chart type. Pie charts have no axes.
pub fn scale_config(chart_type: ChartType) -> JsonValue {
    match chart_type {
        ChartType::Pie => json!({}),
        ChartType::HorizontalBar => json!({
            "x": {"beginAtZero": true, "grid": {"display": true}},
            "y": {"grid": {"display": false}}
        }),
        ChartType::Bar | ChartType::Line => json!({
            "x": {"grid": {"display": false}},
            "y": {"beginAtZero": true, "grid": {"display": true}}
        }),
    }
}

/// The full library configuration for a chart section. Horizontal bars are
/// bar charts drawn along the y axis.
pub fn chart_config(section: &ChartSection) -> JsonValue {
    let data = chart_data(&section.data, section.chart_type);
    let show_legend = data
        .get("datasets")
        .and_then(JsonValue::as_array)
        .map(|d| d.len() > 1)
        .unwrap_or(false);
    let mut options = json!({
        "responsive": true,
        "maintainAspectRatio": false,
        "plugins": {
            "title": {
                "display": true,
                "text": section.title,
                "font": {"size": 16, "weight": "bold"}
            },
            "legend": {"display": show_legend, "position": "bottom"}
        },
        "scales": scale_config(section.chart_type),
        "animation": {"duration": 1000, "easing": "easeInOutQuart"}
    });
    let chart_type = match section.chart_type {
        ChartType::HorizontalBar => {
            options["indexAxis"] = json!("y");
            "bar"
        }
        other => other.as_str(),
    };
    json!({"type": chart_type, "data": data, "options": options})
}
