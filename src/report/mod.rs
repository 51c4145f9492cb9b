//! Report Renderer
//!
//! Turns query results into a JSON document or a self-contained HTML page
//! with embedded chart configuration. Rendering is pure; callers write the
//! output wherever they like.

use crate::metrics::QueryResult;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use serde::Serialize;

/// HTML page skeleton with `{{KEY}}` placeholders
const HTML_TEMPLATE: &str = include_str!("template.html");

/// Series colours, cycled by series position
const PALETTE: [(u8, u8, u8); 8] = [
    (49, 45, 42),
    (40, 167, 69),
    (220, 53, 69),
    (255, 193, 7),
    (111, 66, 193),
    (23, 162, 184),
    (253, 126, 20),
    (108, 117, 125),
];

/// `rgba(...)` colour for the series at `index`
pub fn series_color(index: usize, alpha: f64) -> String {
    let (r, g, b) = PALETTE[index % PALETTE.len()];
    format!("rgba({}, {}, {}, {})", r, g, b, alpha)
}

/// Aggregation window of a built query
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Interval {
    #[value(name = "1m")]
    OneMinute,
    #[value(name = "5m")]
    FiveMinutes,
    #[value(name = "15m")]
    FifteenMinutes,
    #[value(name = "1h")]
    OneHour,
    #[value(name = "6h")]
    SixHours,
    #[value(name = "1d")]
    OneDay,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::OneHour,
        Interval::SixHours,
        Interval::OneDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::SixHours => "6h",
            Interval::OneDay => "1d",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1 minute",
            Interval::FiveMinutes => "5 minutes",
            Interval::FifteenMinutes => "15 minutes",
            Interval::OneHour => "1 hour",
            Interval::SixHours => "6 hours",
            Interval::OneDay => "1 day",
        }
    }
}

/// Aggregation statistic of a built query
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Statistic {
    Mean,
    Max,
    Min,
    Sum,
    Count,
    Rate,
    P50,
    P90,
    P95,
    P99,
}

impl Statistic {
    pub const ALL: [Statistic; 10] = [
        Statistic::Mean,
        Statistic::Max,
        Statistic::Min,
        Statistic::Sum,
        Statistic::Count,
        Statistic::Rate,
        Statistic::P50,
        Statistic::P90,
        Statistic::P95,
        Statistic::P99,
    ];

    /// Function name as written in MQL
    pub fn mql(&self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Max => "max",
            Statistic::Min => "min",
            Statistic::Sum => "sum",
            Statistic::Count => "count",
            Statistic::Rate => "rate",
            Statistic::P50 => "percentile(0.5)",
            Statistic::P90 => "percentile(0.9)",
            Statistic::P95 => "percentile(0.95)",
            Statistic::P99 => "percentile(0.99)",
        }
    }
}

/// Build `metric[interval]{resourceGroup="rg"}.groupBy(dim).stat()`
pub fn build_mql(
    metric: &str,
    interval: Interval,
    statistic: Statistic,
    group_by: Option<&str>,
    resource_group: Option<&str>,
) -> String {
    let mut mql = format!("{}[{}]", metric, interval.as_str());

    if let Some(group) = resource_group {
        mql.push_str(&format!("{{resourceGroup=\"{}\"}}", group));
    }
    if let Some(dimension) = group_by {
        mql.push_str(&format!(".groupBy({})", dimension));
    }

    // percentile(q) already carries its arguments
    let stat = statistic.mql();
    if stat.ends_with(')') {
        mql.push_str(&format!(".{}", stat));
    } else {
        mql.push_str(&format!(".{}()", stat));
    }
    mql
}

/// Pretty JSON array of results
pub fn render_json(results: &[QueryResult]) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}

/// Header details shown on an HTML report
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub title: String,
    pub compartment_id: String,
    pub namespace: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ChartPoint {
    x: String,
    y: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChartDataset {
    label: String,
    data: Vec<ChartPoint>,
    border_color: String,
    background_color: String,
    fill: bool,
    tension: f64,
}

#[derive(Debug, Serialize)]
struct ChartSpec {
    id: String,
    query: String,
    namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    datasets: Vec<ChartDataset>,
}

fn chart_specs(results: &[QueryResult]) -> Vec<ChartSpec> {
    results
        .iter()
        .enumerate()
        .map(|(idx, result)| ChartSpec {
            id: format!("chart_{}", idx),
            query: result.query.clone(),
            namespace: result.namespace.clone(),
            error: result.error.clone(),
            datasets: result
                .metric_data
                .iter()
                .enumerate()
                .map(|(series_idx, series)| ChartDataset {
                    label: if series.label.is_empty() {
                        format!("Series {}", series_idx)
                    } else {
                        series.label.clone()
                    },
                    data: series
                        .data_points
                        .iter()
                        .map(|p| ChartPoint {
                            x: p.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                            y: p.value,
                        })
                        .collect(),
                    border_color: series_color(series_idx, 1.0),
                    background_color: series_color(series_idx, 0.1),
                    fill: false,
                    tension: 0.1,
                })
                .collect(),
        })
        .collect()
}

/// Escape text for HTML element content and attribute values
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// JSON safe to embed in a `<script>` element
fn script_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

/// First `max` characters of an identifier, with an ellipsis when cut
fn shorten(id: &str, max: usize) -> String {
    if id.chars().count() <= max {
        return id.to_string();
    }
    let head: String = id.chars().take(max).collect();
    format!("{}...", head)
}

/// Window length in hours, e.g. `24` or `1.5`
fn range_hours(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let minutes = (end - start).num_minutes();
    if minutes % 60 == 0 {
        format!("{}", minutes / 60)
    } else {
        format!("{:.1}", minutes as f64 / 60.0)
    }
}

/// Substitute `{{KEY}}` placeholders in a single pass
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = &after[..close];
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Self-contained HTML report
pub fn render_html(results: &[QueryResult], meta: &ReportMeta) -> Result<String> {
    let charts = script_json(&chart_specs(results))?;
    let hours = range_hours(meta.start_time, meta.end_time);

    let title = escape_html(&meta.title);
    let generated = meta.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let compartment = escape_html(&shorten(&meta.compartment_id, 30));
    let range = format!("{} hours", hours);
    let range_short = format!("{}h", hours);
    let total = results.len().to_string();
    let namespace = escape_html(meta.namespace.as_deref().unwrap_or("Multiple"));

    Ok(fill_template(
        HTML_TEMPLATE,
        &[
            ("TITLE", &title),
            ("GENERATED", &generated),
            ("COMPARTMENT", &compartment),
            ("RANGE", &range),
            ("RANGE_SHORT", &range_short),
            ("TOTAL_QUERIES", &total),
            ("NAMESPACE", &namespace),
            ("CHARTS_JSON", &charts),
        ],
    ))
}
