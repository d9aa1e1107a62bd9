//! Deploy-time validation: load every configured artifact once.

use crate::catalog::{ArtifactKind, CatalogKey};
use crate::dashboard::Dashboard;
use crate::error::{DashboardError, LoadError};
use crate::render::ViewParams;
use rayon::prelude::*;
use tracing::{error, info};

enum Task {
    Layer(String),
    Table(String, Option<CatalogKey>),
    Chart(String, Option<CatalogKey>),
    Image(String, CatalogKey),
    /// A table or chart over a product with nothing catalogued
    Unpublished { owner: String, product: String },
}

impl Task {
    fn label(&self) -> String {
        let with_period = |kind: &str, name: &str, key: &Option<CatalogKey>| match key {
            Some(key) => format!("{} {} [{}]", kind, name, key),
            None => format!("{} {}", kind, name),
        };
        match self {
            Task::Layer(name) => format!("layer {}", name),
            Task::Table(name, key) => with_period("table", name, key),
            Task::Chart(name, key) => with_period("chart", name, key),
            Task::Image(product, key) => format!("image {} [{}]", product, key),
            Task::Unpublished { owner, product } => format!("{} [{}: no periods]", owner, product),
        }
    }

    fn run(&self, dashboard: &Dashboard) -> Result<(), DashboardError> {
        match self {
            Task::Layer(name) => dashboard.map_layer(name).map(drop),
            Task::Table(name, key) => dashboard.table(name, *key).map(drop),
            Task::Chart(name, key) => {
                let params = ViewParams {
                    period: *key,
                    threshold: None,
                };
                dashboard.chart(name, &params).map(drop)
            }
            Task::Image(product, key) => {
                let artifact = dashboard
                    .catalog()
                    .get(product, *key)
                    .ok_or_else(|| DashboardError::NotInCatalog {
                        product: product.clone(),
                        key: key.to_string(),
                    })?;
                let path = dashboard.config().resolve(&artifact.path);
                if path.is_file() {
                    Ok(())
                } else {
                    Err(LoadError::NotFound(path).into())
                }
            }
            Task::Unpublished { product, .. } => Err(DashboardError::Unpublished(product.clone())),
        }
    }
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub checked: usize,
    /// (artifact label, error message)
    pub failures: Vec<(String, String)>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Periods {
    Fixed,
    Published(Vec<CatalogKey>),
    Unpublished(String),
}

fn periods_for(dashboard: &Dashboard, table: &str) -> Periods {
    let product = dashboard
        .table_config(table)
        .ok()
        .and_then(|t| t.product.clone());
    match product {
        None => Periods::Fixed,
        Some(product) => {
            let keys = dashboard.catalog().keys(&product);
            if keys.is_empty() {
                Periods::Unpublished(product)
            } else {
                Periods::Published(keys)
            }
        }
    }
}

fn push_periods(
    tasks: &mut Vec<Task>,
    periods: Periods,
    kind: &str,
    name: &str,
    task: fn(String, Option<CatalogKey>) -> Task,
) {
    match periods {
        Periods::Fixed => tasks.push(task(name.to_string(), None)),
        Periods::Published(keys) => {
            for key in keys {
                tasks.push(task(name.to_string(), Some(key)));
            }
        }
        // Nothing to load would otherwise pass silently.
        Periods::Unpublished(product) => tasks.push(Task::Unpublished {
            owner: format!("{} {}", kind, name),
            product,
        }),
    }
}

fn tasks(dashboard: &Dashboard) -> Vec<Task> {
    let config = dashboard.config();
    let mut tasks: Vec<Task> = config.layers.iter().map(|l| Task::Layer(l.name.clone())).collect();

    for table in &config.tables {
        let periods = periods_for(dashboard, &table.name);
        push_periods(&mut tasks, periods, "table", &table.name, Task::Table);
    }

    for chart in &config.charts {
        let periods = periods_for(dashboard, &chart.table);
        push_periods(&mut tasks, periods, "chart", &chart.name, Task::Chart);
    }

    let catalog = dashboard.catalog();
    for product in catalog.products() {
        for (key, artifact) in catalog.entries(product) {
            if artifact.kind == ArtifactKind::Image {
                tasks.push(Task::Image(product.to_string(), key));
            }
        }
    }

    tasks
}

/// Load every layer, table (per published period), chart and catalogued image.
pub fn check_all(dashboard: &Dashboard) -> CheckReport {
    let tasks = tasks(dashboard);
    info!("Checking {} artifacts...", tasks.len());

    let failures: Vec<(String, String)> = tasks
        .par_iter()
        .filter_map(|task| match task.run(dashboard) {
            Ok(()) => None,
            Err(e) => {
                error!(artifact = %task.label(), "{}", e);
                Some((task.label(), e.to_string()))
            }
        })
        .collect();

    CheckReport {
        checked: tasks.len(),
        failures,
    }
}
