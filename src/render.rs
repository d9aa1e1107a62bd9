use crate::catalog::CatalogKey;
use crate::error::ChartError;
use crate::types::{ColumnType, Feature, GeometryCollection, TabularSeries, Value};
use chrono::{Days, NaiveDate};
use geojson::{FeatureCollection, JsonObject};
use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const AXIS: Rgba<u8> = Rgba([64, 64, 64, 255]);
const MARGIN: u32 = 24;
const POINT_RADIUS: i64 = 2;

pub const DEFAULT_PALETTE: &[&str] = &["#1F77B4", "#FF7F0E", "#2CA02C", "#D62728", "#9467BD"];

/// Selections made on the page, passed explicitly to every render call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ViewParams {
    /// Reporting year or period of the artifact to show
    pub period: Option<CatalogKey>,
    /// Keep only points whose filter value is at most this (e.g. cloud %)
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChartSpec {
    Bar {
        x: String,
        y: Vec<String>,
        y_label: Option<String>,
    },
    Scatter {
        x: String,
        y: String,
        filter: Option<String>,
        x_label: Option<String>,
        y_label: Option<String>,
    },
    /// One row's float list laid out on a daily (or `step_days`) date axis.
    TimeSeries {
        key: String,
        key_value: String,
        column: String,
        start: NaiveDate,
        step_days: u32,
        y_label: Option<String>,
    },
}

impl ChartSpec {
    pub fn build(&self, series: &TabularSeries, params: &ViewParams) -> Result<ChartModel, ChartError> {
        match self {
            ChartSpec::Bar { x, y, y_label } => {
                bar_chart(series, x, y, y_label.clone()).map(ChartModel::Bar)
            }
            ChartSpec::Scatter {
                x,
                y,
                filter,
                x_label,
                y_label,
            } => {
                let filter = filter.as_deref().unwrap_or(y);
                let mut chart = scatter_chart(series, x, y, filter, params.threshold)?;
                chart.x_label = x_label.clone();
                chart.y_label = y_label.clone();
                Ok(ChartModel::Scatter(chart))
            }
            ChartSpec::TimeSeries {
                key,
                key_value,
                column,
                start,
                step_days,
                y_label,
            } => {
                let mut chart = time_series_chart(series, key, key_value, column, *start, *step_days)?;
                chart.y_label = y_label.clone();
                Ok(ChartModel::Scatter(chart))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChartModel {
    Bar(BarChart),
    Scatter(ScatterChart),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarChart {
    pub x: String,
    pub categories: Vec<String>,
    pub series: Vec<BarSeries>,
    pub y_label: Option<String>,
    pub stacked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarSeries {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterChart {
    pub x: String,
    pub y: String,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub points: Vec<ScatterPoint>,
    /// Rows before the threshold filter
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub x: Value,
    pub y: f64,
}

fn position(series: &TabularSeries, column: &str) -> Result<usize, ChartError> {
    series
        .position(column)
        .ok_or_else(|| ChartError::UnknownColumn(column.to_string()))
}

fn numeric_position(series: &TabularSeries, column: &str) -> Result<usize, ChartError> {
    let idx = position(series, column)?;
    match series.columns()[idx].kind {
        ColumnType::Int | ColumnType::Float => Ok(idx),
        _ => Err(ChartError::NotNumeric(column.to_string())),
    }
}

/// Grouped (unstacked) bars, one group per row of the category column `x`.
pub fn bar_chart(
    series: &TabularSeries,
    x: &str,
    y: &[String],
    y_label: Option<String>,
) -> Result<BarChart, ChartError> {
    if y.is_empty() {
        return Err(ChartError::Invalid("a bar chart needs at least one value column".into()));
    }

    let x_idx = position(series, x)?;
    let mut seen = HashSet::new();
    let mut categories = Vec::with_capacity(series.len());
    for row in series.rows() {
        let category = row[x_idx].to_string();
        if !seen.insert(category.clone()) {
            return Err(ChartError::DuplicateCategory {
                column: x.to_string(),
                value: category,
            });
        }
        categories.push(category);
    }

    let mut bars = Vec::with_capacity(y.len());
    for column in y {
        let idx = numeric_position(series, column)?;
        let values = series
            .rows()
            .iter()
            .filter_map(|row| row[idx].as_f64())
            .collect();
        bars.push(BarSeries {
            name: column.clone(),
            values,
        });
    }

    Ok(BarChart {
        x: x.to_string(),
        categories,
        series: bars,
        y_label,
        stacked: false,
    })
}

/// Points of `y` against `x`, keeping rows whose `filter` value is `<= threshold`.
pub fn scatter_chart(
    series: &TabularSeries,
    x: &str,
    y: &str,
    filter: &str,
    threshold: Option<f64>,
) -> Result<ScatterChart, ChartError> {
    let x_idx = position(series, x)?;
    if !matches!(
        series.columns()[x_idx].kind,
        ColumnType::Int | ColumnType::Float | ColumnType::Date
    ) {
        return Err(ChartError::NotNumeric(x.to_string()));
    }
    let y_idx = numeric_position(series, y)?;
    let filter_idx = numeric_position(series, filter)?;

    let points = series
        .rows()
        .iter()
        .filter(|row| match (threshold, row[filter_idx].as_f64()) {
            (Some(limit), Some(value)) => value <= limit,
            _ => true,
        })
        .filter_map(|row| {
            row[y_idx].as_f64().map(|y| ScatterPoint {
                x: row[x_idx].clone(),
                y,
            })
        })
        .collect();

    Ok(ScatterChart {
        x: x.to_string(),
        y: y.to_string(),
        x_label: None,
        y_label: None,
        points,
        total: series.len(),
    })
}

/// Expand the list in `column` of the row where `key == key_value` into dated points.
///
/// Entry `i` is dated `start + i * step_days`; missing observations (NaN)
/// keep their slot on the axis but produce no point.
pub fn time_series_chart(
    series: &TabularSeries,
    key: &str,
    key_value: &str,
    column: &str,
    start: NaiveDate,
    step_days: u32,
) -> Result<ScatterChart, ChartError> {
    if step_days == 0 {
        return Err(ChartError::Invalid("step_days must be positive".into()));
    }
    let key_idx = position(series, key)?;
    let list_idx = position(series, column)?;
    if series.columns()[list_idx].kind != ColumnType::FloatList {
        return Err(ChartError::NotFloatList(column.to_string()));
    }

    let mut rows = series
        .rows()
        .iter()
        .filter(|row| row[key_idx].to_string() == key_value);
    let row = rows.next().ok_or_else(|| ChartError::MissingRow {
        column: key.to_string(),
        value: key_value.to_string(),
    })?;
    if rows.next().is_some() {
        return Err(ChartError::DuplicateCategory {
            column: key.to_string(),
            value: key_value.to_string(),
        });
    }

    let values = match &row[list_idx] {
        Value::FloatList(values) => values,
        _ => return Err(ChartError::NotFloatList(column.to_string())),
    };

    let mut points = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        let date = start
            .checked_add_days(Days::new(i as u64 * u64::from(step_days)))
            .ok_or_else(|| ChartError::Invalid(format!("date overflow at entry {}", i)))?;
        if value.is_finite() {
            points.push(ScatterPoint {
                x: Value::Date(date),
                y: *value,
            });
        }
    }

    Ok(ScatterChart {
        x: "date".to_string(),
        y: column.to_string(),
        x_label: None,
        y_label: None,
        points,
        total: values.len(),
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LayerStyle {
    pub fill: String,
    pub stroke: String,
}

impl Default for LayerStyle {
    fn default() -> Self {
        LayerStyle {
            fill: "#C0C0C0".to_string(),
            stroke: "#696969".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PopupField {
    /// Attribute name after renaming
    pub field: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupEntry {
    pub label: String,
    pub value: String,
}

pub fn popup(feature: &Feature, fields: &[PopupField]) -> Vec<PopupEntry> {
    fields
        .iter()
        .map(|f| PopupEntry {
            label: f.alias.clone().unwrap_or_else(|| f.field.clone()),
            value: feature
                .attributes
                .get(&f.field)
                .map(|v| v.to_string())
                .unwrap_or_default(),
        })
        .collect()
}

/// Styled GeoJSON layer for the map widget; style and popup travel as foreign members.
pub fn map_layer(
    collection: &GeometryCollection,
    style: &LayerStyle,
    popup: &[PopupField],
) -> Result<FeatureCollection, ChartError> {
    if !collection.is_empty() {
        let names = collection.attribute_names();
        if let Some(missing) = popup.iter().find(|p| !names.contains(&p.field.as_str())) {
            return Err(ChartError::UnknownColumn(missing.field.clone()));
        }
    }

    let features = collection
        .features
        .iter()
        .map(|feature| {
            let properties: JsonObject = feature
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), serde_json::to_value(value).unwrap_or_default()))
                .collect();
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&feature.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let mut members = JsonObject::new();
    members.insert("style".to_string(), serde_json::to_value(style).unwrap_or_default());
    members.insert("popup".to_string(), serde_json::to_value(popup).unwrap_or_default());

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    })
}

/// Parse `#RRGGBB` into an opaque colour.
pub fn hex_to_rgba(hex: &str) -> Option<Rgba<u8>> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Rgba([r, g, b, 255]))
}

pub fn palette(colors: &[String]) -> Result<Vec<Rgba<u8>>, ChartError> {
    colors
        .iter()
        .map(|c| hex_to_rgba(c).ok_or_else(|| ChartError::Invalid(format!("invalid colour {:?}", c))))
        .collect()
}

fn default_palette() -> Vec<Rgba<u8>> {
    DEFAULT_PALETTE.iter().filter_map(|c| hex_to_rgba(c)).collect()
}

/// Draw a chart model onto a `width` x `height` RGBA canvas.
pub fn rasterize(chart: &ChartModel, width: u32, height: u32, colors: &[Rgba<u8>]) -> RgbaImage {
    let fallback = default_palette();
    let colors = if colors.is_empty() { &fallback[..] } else { colors };

    let mut img: RgbaImage = ImageBuffer::from_pixel(width, height, BACKGROUND);
    if width <= 2 * MARGIN || height <= 2 * MARGIN {
        return img;
    }
    let plot = Plot {
        left: MARGIN,
        top: MARGIN,
        width: width - 2 * MARGIN,
        height: height - 2 * MARGIN,
    };

    match chart {
        ChartModel::Bar(bar) => draw_bars(&mut img, &plot, bar, colors),
        ChartModel::Scatter(scatter) => draw_points(&mut img, &plot, scatter, colors[0]),
    }

    // axes
    fill_rect(&mut img, plot.left, plot.top, 1, plot.height, AXIS);
    fill_rect(&mut img, plot.left, plot.top + plot.height - 1, plot.width, 1, AXIS);
    img
}

struct Plot {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    for px in x..(x + w).min(img.width()) {
        for py in y..(y + h).min(img.height()) {
            img.put_pixel(px, py, color);
        }
    }
}

fn draw_bars(img: &mut RgbaImage, plot: &Plot, chart: &BarChart, colors: &[Rgba<u8>]) {
    let groups = chart.categories.len() as u32;
    let max = chart
        .series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .fold(0.0_f64, f64::max);
    if groups == 0 || max <= 0.0 {
        return;
    }

    let group_width = plot.width / groups;
    let bar_width = (group_width / (chart.series.len() as u32 + 1)).max(1);

    for (s, series) in chart.series.iter().enumerate() {
        let color = colors[s % colors.len()];
        for (g, value) in series.values.iter().enumerate() {
            let bar_height = ((value.max(0.0) / max) * plot.height as f64).round() as u32;
            let x = plot.left + g as u32 * group_width + bar_width / 2 + s as u32 * bar_width;
            let y = plot.top + plot.height - bar_height;
            fill_rect(img, x, y, bar_width, bar_height, color);
        }
    }
}

fn axis_value(value: &Value) -> Option<f64> {
    match value {
        Value::Date(d) => {
            use chrono::Datelike;
            Some(d.num_days_from_ce() as f64)
        }
        other => other.as_f64(),
    }
}

fn draw_points(img: &mut RgbaImage, plot: &Plot, chart: &ScatterChart, color: Rgba<u8>) {
    let coords: Vec<(f64, f64)> = chart
        .points
        .iter()
        .filter_map(|p| axis_value(&p.x).map(|x| (x, p.y)))
        .collect();
    if coords.is_empty() {
        return;
    }

    let bounds = |pick: fn(&(f64, f64)) -> f64| {
        coords.iter().map(pick).fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)))
    };
    let (x_min, x_max) = bounds(|c| c.0);
    let (y_min, y_max) = bounds(|c| c.1);
    let scale = |v: f64, lo: f64, hi: f64, span: u32| {
        if hi > lo {
            ((v - lo) / (hi - lo) * (span - 1) as f64).round() as i64
        } else {
            (span / 2) as i64
        }
    };

    for (x, y) in coords {
        let px = plot.left as i64 + scale(x, x_min, x_max, plot.width);
        let py = (plot.top + plot.height - 1) as i64 - scale(y, y_min, y_max, plot.height);
        for dx in -POINT_RADIUS..=POINT_RADIUS {
            for dy in -POINT_RADIUS..=POINT_RADIUS {
                let (cx, cy) = (px + dx, py + dy);
                if cx >= 0 && cy >= 0 && (cx as u32) < img.width() && (cy as u32) < img.height() {
                    img.put_pixel(cx as u32, cy as u32, color);
                }
            }
        }
    }
}
