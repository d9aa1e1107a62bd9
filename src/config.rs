use crate::catalog::CatalogEntry;
use crate::render::{palette, ChartSpec, LayerStyle, PopupField};
use crate::types::{ColumnType, GeometrySchema, TableSchema};
use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default, rename = "layer")]
    pub layers: Vec<LayerConfig>,
    #[serde(default, rename = "table")]
    pub tables: Vec<TableConfig>,
    #[serde(default, rename = "chart")]
    pub charts: Vec<ChartConfig>,
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
    #[serde(default, rename = "scan")]
    pub scans: Vec<ScanConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: 8501 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Directory every relative artifact path resolves against
    pub root: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            root: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LayerConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    #[serde(default)]
    pub popup: Vec<PopupField>,
    #[serde(default)]
    pub style: LayerStyle,
}

impl LayerConfig {
    pub fn schema(&self) -> GeometrySchema {
        GeometrySchema {
            required: self.required.clone(),
            dates: self.dates.clone(),
            rename: self.rename.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableConfig {
    pub name: String,
    /// Fixed file, or...
    pub path: Option<PathBuf>,
    /// ...a catalog product published per year/period
    pub product: Option<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnType>,
    pub date_format: Option<String>,
}

impl TableConfig {
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            columns: self.columns.clone(),
            date_format: self.date_format.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Scatter,
    /// `x` selects the row by `key_value`, `y` names its float-list column
    TimeSeries,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChartConfig {
    pub name: String,
    pub table: String,
    pub kind: ChartKind,
    pub x: String,
    pub y: Vec<String>,
    /// Column compared against the threshold (scatter only, defaults to y)
    pub filter: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    pub key_value: Option<String>,
    /// Date of the first list entry (time series only)
    pub start: Option<NaiveDate>,
    #[serde(default = "default_step_days")]
    pub step_days: u32,
}

fn default_step_days() -> u32 {
    1
}

impl ChartConfig {
    pub fn spec(&self) -> Result<ChartSpec> {
        match self.kind {
            ChartKind::Bar => Ok(ChartSpec::Bar {
                x: self.x.clone(),
                y: self.y.clone(),
                y_label: self.y_label.clone(),
            }),
            ChartKind::Scatter => match self.y.as_slice() {
                [y] => Ok(ChartSpec::Scatter {
                    x: self.x.clone(),
                    y: y.clone(),
                    filter: self.filter.clone(),
                    x_label: self.x_label.clone(),
                    y_label: self.y_label.clone(),
                }),
                _ => bail!("Scatter chart '{}' needs exactly one y column", self.name),
            },
            ChartKind::TimeSeries => {
                let [column] = self.y.as_slice() else {
                    bail!("Time series chart '{}' needs exactly one y column", self.name);
                };
                let key_value = self
                    .key_value
                    .clone()
                    .ok_or_else(|| anyhow!("Time series chart '{}' needs `key_value`", self.name))?;
                let start = self
                    .start
                    .ok_or_else(|| anyhow!("Time series chart '{}' needs `start`", self.name))?;
                if self.step_days == 0 {
                    bail!("Time series chart '{}' needs a positive `step_days`", self.name);
                }
                Ok(ChartSpec::TimeSeries {
                    key: self.x.clone(),
                    key_value,
                    column: column.clone(),
                    start,
                    step_days: self.step_days,
                    y_label: self.y_label.clone(),
                })
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    pub product: String,
    /// Relative to the data root
    pub dir: PathBuf,
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an artifact path against the data root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.data.root.join(path)
    }

    fn validate(&self) -> Result<()> {
        unique("layer", self.layers.iter().map(|l| l.name.as_str()))?;
        unique("table", self.tables.iter().map(|t| t.name.as_str()))?;
        unique("chart", self.charts.iter().map(|c| c.name.as_str()))?;

        for layer in &self.layers {
            palette(&[layer.style.fill.clone(), layer.style.stroke.clone()])
                .with_context(|| format!("Layer '{}' has an invalid style", layer.name))?;
        }

        for table in &self.tables {
            if table.path.is_some() == table.product.is_some() {
                bail!("Table '{}' needs exactly one of `path` or `product`", table.name);
            }
        }

        for chart in &self.charts {
            let table = self
                .tables
                .iter()
                .find(|t| t.name == chart.table)
                .ok_or_else(|| anyhow!("Chart '{}' refers to unknown table '{}'", chart.name, chart.table))?;
            chart.spec()?;
            for column in std::iter::once(&chart.x).chain(&chart.y).chain(&chart.filter) {
                if !table.columns.contains_key(column) {
                    bail!(
                        "Chart '{}' uses column '{}' which table '{}' does not declare",
                        chart.name,
                        column,
                        table.name
                    );
                }
            }
            palette(&chart.colors).with_context(|| format!("Chart '{}' has invalid colors", chart.name))?;
        }

        Ok(())
    }
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            bail!("Duplicate {} name '{}'", kind, name);
        }
    }
    Ok(())
}
