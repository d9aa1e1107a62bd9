use crate::cache::ArtifactCache;
use crate::catalog::{Artifact, ArtifactKind, Catalog, CatalogKey};
use crate::config::{AppConfig, ChartConfig, LayerConfig, TableConfig};
use crate::error::{ChartError, DashboardError};
use crate::render::{self, ChartModel, ViewParams};
use crate::types::{GeometryCollection, TabularSeries};
use geojson::FeatureCollection;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Everything a page needs to resolve and load its artifacts.
pub struct Dashboard {
    config: AppConfig,
    catalog: Catalog,
    cache: ArtifactCache,
}

impl Dashboard {
    /// Build the catalog once from the declared entries and directory scans.
    pub fn open(config: AppConfig) -> Result<Self, DashboardError> {
        let mut catalog = Catalog::from_entries(config.catalog.iter().cloned())?;
        for scan in &config.scans {
            let added = catalog.scan(&config.data.root, &scan.dir, &scan.product)?;
            info!(product = %scan.product, dir = %scan.dir.display(), added, "scanned catalog");
        }
        info!(entries = catalog.len(), "catalog ready");

        Ok(Dashboard {
            config,
            catalog,
            cache: ArtifactCache::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn layer_config(&self, name: &str) -> Result<&LayerConfig, DashboardError> {
        self.config
            .layers
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| DashboardError::unknown("layer", name))
    }

    pub fn table_config(&self, name: &str) -> Result<&TableConfig, DashboardError> {
        self.config
            .tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| DashboardError::unknown("table", name))
    }

    pub fn chart_config(&self, name: &str) -> Result<&ChartConfig, DashboardError> {
        self.config
            .charts
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DashboardError::unknown("chart", name))
    }

    pub fn geometry(&self, name: &str) -> Result<Arc<GeometryCollection>, DashboardError> {
        let layer = self.layer_config(name)?;
        let path = self.config.resolve(&layer.path);
        Ok(self.cache.geometry(&path, &layer.schema())?)
    }

    pub fn map_layer(&self, name: &str) -> Result<FeatureCollection, DashboardError> {
        let layer = self.layer_config(name)?;
        let collection = self.geometry(name)?;
        Ok(render::map_layer(&collection, &layer.style, &layer.popup)?)
    }

    /// File backing a table: its fixed path, or the catalog entry for `period`.
    pub fn table_path(
        &self,
        table: &TableConfig,
        period: Option<CatalogKey>,
    ) -> Result<PathBuf, DashboardError> {
        if let Some(path) = &table.path {
            return Ok(self.config.resolve(path));
        }
        let product = table.product.as_deref().unwrap_or(&table.name);
        let key = period.ok_or_else(|| DashboardError::MissingPeriod(table.name.clone()))?;
        match self.catalog.get(product, key) {
            Some(artifact) if artifact.kind == ArtifactKind::Table => Ok(self.config.resolve(&artifact.path)),
            _ => Err(DashboardError::NotInCatalog {
                product: product.to_string(),
                key: key.to_string(),
            }),
        }
    }

    pub fn table(&self, name: &str, period: Option<CatalogKey>) -> Result<Arc<TabularSeries>, DashboardError> {
        let table = self.table_config(name)?;
        let path = self.table_path(table, period)?;
        Ok(self.cache.table(&path, &table.schema())?)
    }

    pub fn chart(&self, name: &str, params: &ViewParams) -> Result<ChartModel, DashboardError> {
        let chart = self.chart_config(name)?;
        let spec = chart
            .spec()
            .map_err(|e| ChartError::Invalid(e.to_string()))?;
        let series = self.table(&chart.table, params.period)?;
        Ok(spec.build(&series, params)?)
    }

    /// Change artifact for the period ending in `year` (the status year a page selected).
    pub fn change_for(&self, product: &str, year: u16) -> Result<(CatalogKey, &Artifact), DashboardError> {
        self.catalog
            .change_for(product, year)?
            .ok_or_else(|| DashboardError::NotInCatalog {
                product: product.to_string(),
                key: format!("a period ending {}", year),
            })
    }

    /// Periods a chart can be shown for; empty when its table is a fixed file.
    pub fn chart_periods(&self, name: &str) -> Result<Vec<CatalogKey>, DashboardError> {
        let chart = self.chart_config(name)?;
        let table = self.table_config(&chart.table)?;
        Ok(match &table.product {
            Some(product) => self.catalog.keys(product),
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::types::{AttributeValue, Value};
    use std::path::Path;

    const CATCHMENTS: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature",
         "geometry": {"type": "Polygon", "coordinates": [[[-3.0, 48.0], [-2.5, 48.0], [-2.5, 48.5], [-3.0, 48.0]]]},
         "properties": {"ida": "12", "area_km2": 101.5, "DateCreationOH": "2009-01-15"}}
    ]}"#;

    /// A data root with one layer, a per-period table and a fixed table.
    pub(crate) fn fixture(name: &str) -> (PathBuf, AppConfig) {
        let root = std::env::temp_dir().join(format!("ifm-dashboard-{}-{}", std::process::id(), name));
        let write = |rel: &str, body: &str| {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        };
        write("geometries/bv.geojson", CATCHMENTS);
        write("dataframes/tccm_12-15.csv", "Catchment basin,Gain,Loss\n12,3.5,1.25\n13,0.5,4.0\n");
        write("dataframes/tccm_15-18.csv", "Catchment basin,Gain,Loss\n12,1.0,2.0\n");
        write(
            "dataframes/cloud_stats_2023_df.csv",
            "date,perc_cloud\n2023-03-02,95.0\n2023-07-15,12.0\n",
        );
        write("images/clms/clc_2018.png", "");
        write("images/clms/clc_2012.png", "");

        let toml = format!(
            r##"
            [data]
            root = {root:?}

            [[layer]]
            name = "catchments"
            path = "geometries/bv.geojson"
            required = ["ida", "area_km2"]
            dates = ["DateCreationOH"]
            rename = {{ ida = "BV Ref" }}
            popup = [{{ field = "BV Ref", alias = "BV Ref : " }}]

            [[table]]
            name = "tccm"
            product = "tccm"
            columns = {{ "Catchment basin" = "int", Gain = "float", Loss = "float" }}

            [[table]]
            name = "clouds"
            path = "dataframes/cloud_stats_2023_df.csv"
            columns = {{ date = "date", perc_cloud = "float" }}

            [[chart]]
            name = "tccm"
            table = "tccm"
            kind = "bar"
            x = "Catchment basin"
            y = ["Gain", "Loss"]

            [[chart]]
            name = "clouds"
            table = "clouds"
            kind = "scatter"
            x = "date"
            y = ["perc_cloud"]

            [[catalog]]
            product = "tccm"
            kind = "table"
            key = "12-15"
            path = "dataframes/tccm_12-15.csv"

            [[catalog]]
            product = "tccm"
            kind = "table"
            key = "15-18"
            path = "dataframes/tccm_15-18.csv"

            [[scan]]
            product = "clc"
            dir = "images/clms"
            "##,
            root = root.display().to_string()
        );
        (root.clone(), AppConfig::from_toml(&toml).unwrap())
    }

    pub(crate) fn cleanup(root: &Path) {
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn loads_layer_through_config() {
        let (root, config) = fixture("layer");
        let dashboard = Dashboard::open(config).unwrap();
        let collection = dashboard.geometry("catchments").unwrap();
        let again = dashboard.geometry("catchments").unwrap();
        let layer = dashboard.map_layer("catchments").unwrap();
        cleanup(&root);

        assert!(Arc::ptr_eq(&collection, &again));
        assert_eq!(
            collection.features[0].attributes["DateCreationOH"],
            AttributeValue::Text("2009-01-15".into())
        );
        assert_eq!(layer.features.len(), 1);
    }

    #[test]
    fn period_tables_resolve_through_catalog() {
        let (root, config) = fixture("period");
        let dashboard = Dashboard::open(config).unwrap();

        let key: CatalogKey = "2015-2018".parse().unwrap();
        let late = dashboard.table("tccm", Some(key)).unwrap();
        let missing = dashboard.table("tccm", None).unwrap_err();
        let absent = dashboard.table("tccm", Some(CatalogKey::Year(2020))).unwrap_err();
        let periods = dashboard.chart_periods("tccm").unwrap();
        cleanup(&root);

        assert_eq!(late.len(), 1);
        assert_eq!(late.value(0, "Loss"), Some(&Value::Float(2.0)));
        assert!(matches!(missing, DashboardError::MissingPeriod(_)));
        assert!(matches!(absent, DashboardError::NotInCatalog { .. }));
        assert_eq!(periods.len(), 2);
    }

    #[test]
    fn charts_take_explicit_view_params() {
        let (root, config) = fixture("charts");
        let dashboard = Dashboard::open(config).unwrap();

        let bar = dashboard
            .chart(
                "tccm",
                &ViewParams {
                    period: Some("12-15".parse().unwrap()),
                    threshold: None,
                },
            )
            .unwrap();
        let scatter = dashboard
            .chart(
                "clouds",
                &ViewParams {
                    period: None,
                    threshold: Some(50.0),
                },
            )
            .unwrap();
        cleanup(&root);

        match bar {
            ChartModel::Bar(chart) => assert_eq!(chart.categories, vec!["12", "13"]),
            other => panic!("unexpected chart: {other:?}"),
        }
        match scatter {
            ChartModel::Scatter(chart) => assert_eq!(chart.points.len(), 1),
            other => panic!("unexpected chart: {other:?}"),
        }
    }

    #[test]
    fn change_lookup_by_status_year() {
        let (root, mut config) = fixture("change");
        config.catalog.push(crate::catalog::CatalogEntry {
            product: "cz_change".into(),
            kind: ArtifactKind::Image,
            key: "12-18".parse().unwrap(),
            path: "images/clms/cz_change_12-18.png".into(),
        });
        config.catalog.push(crate::catalog::CatalogEntry {
            product: "cz_change".into(),
            kind: ArtifactKind::Image,
            key: "06-18".parse().unwrap(),
            path: "images/clms/cz_change_06-18.png".into(),
        });
        let dashboard = Dashboard::open(config).unwrap();
        cleanup(&root);

        let (key, artifact) = dashboard.change_for("tccm", 2018).unwrap();
        assert_eq!(key.to_string(), "2015-2018");
        assert_eq!(artifact.path, PathBuf::from("dataframes/tccm_15-18.csv"));
        assert!(matches!(
            dashboard.change_for("tccm", 2012),
            Err(DashboardError::NotInCatalog { .. })
        ));
        assert!(matches!(
            dashboard.change_for("cz_change", 2018),
            Err(DashboardError::Catalog(crate::error::CatalogError::Ambiguous { .. }))
        ));
    }

    #[test]
    fn scanned_images_are_catalogued() {
        let (root, config) = fixture("scan");
        let dashboard = Dashboard::open(config).unwrap();
        cleanup(&root);

        assert_eq!(
            dashboard.catalog().keys("clc"),
            vec![CatalogKey::Year(2012), CatalogKey::Year(2018)]
        );
    }

    #[test]
    fn deleted_artifact_surfaces_not_found() {
        let (root, config) = fixture("deleted");
        let dashboard = Dashboard::open(config).unwrap();
        std::fs::remove_file(root.join("dataframes/cloud_stats_2023_df.csv")).unwrap();
        let err = dashboard.table("clouds", None).unwrap_err();
        cleanup(&root);

        assert!(matches!(err, DashboardError::Load(LoadError::NotFound(_))));
    }

    #[test]
    fn unknown_names_are_reported() {
        let (root, config) = fixture("unknown");
        let dashboard = Dashboard::open(config).unwrap();
        cleanup(&root);

        assert!(matches!(
            dashboard.geometry("n2k"),
            Err(DashboardError::Unknown { kind: "layer", .. })
        ));
    }
}
