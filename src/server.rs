use crate::dashboard::Dashboard;
use crate::error::{DashboardError, LoadError};
use crate::index::FeatureIndex;
use crate::catalog::{ArtifactKind, CatalogKey};
use crate::render::{self, ChartModel, PopupEntry, ViewParams};
use crate::types::{GeometryCollection, TabularSeries};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

type LayerIndex = (Arc<GeometryCollection>, Arc<FeatureIndex>);

pub struct AppState {
    pub dashboard: Dashboard,
    // Rebuilt whenever the cache hands out a different collection.
    indexes: Mutex<HashMap<String, LayerIndex>>,
}

impl AppState {
    pub fn new(dashboard: Dashboard) -> Self {
        AppState {
            dashboard,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    fn layer_index(&self, name: &str) -> Result<LayerIndex, DashboardError> {
        let collection = self.dashboard.geometry(name)?;
        let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached, index)) = indexes.get(name) {
            if Arc::ptr_eq(cached, &collection) {
                return Ok((collection, Arc::clone(index)));
            }
        }
        let index = Arc::new(FeatureIndex::build(&collection));
        indexes.insert(name.to_string(), (Arc::clone(&collection), Arc::clone(&index)));
        Ok((collection, index))
    }
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        let status = match &err {
            DashboardError::Unknown { .. }
            | DashboardError::NotInCatalog { .. }
            | DashboardError::Load(LoadError::NotFound(_)) => StatusCode::NOT_FOUND,
            DashboardError::MissingPeriod(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("{}", self.message);
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Run a blocking load off the async executor.
async fn blocking<T, F>(state: Arc<AppState>, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> std::result::Result<T, DashboardError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&state)).await {
        Ok(result) => result.map(Json).map_err(ApiError::from),
        Err(e) => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("Loader task failed: {}", e),
        }),
    }
}

#[derive(Serialize)]
pub struct Index {
    layers: Vec<String>,
    tables: Vec<String>,
    charts: Vec<String>,
    products: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangeEntry {
    key: CatalogKey,
    kind: ArtifactKind,
    path: PathBuf,
}

#[derive(Deserialize)]
pub struct PopupParams {
    lat: f64,
    lon: f64,
}

pub fn router(state: Arc<AppState>, data_root: PathBuf) -> Router {
    Router::new()
        .route("/api/layers", get(index_handler))
        .route("/api/layers/:name", get(layer_handler))
        .route("/api/layers/:name/popup", get(popup_handler))
        .route("/api/tables/:name", get(table_handler))
        .route("/api/charts/:name", get(chart_handler))
        .route("/api/charts/:name/periods", get(chart_periods_handler))
        .route("/api/catalog/:product", get(catalog_handler))
        .route("/api/catalog/:product/change/:year", get(change_handler))
        .nest_service("/data", ServeDir::new(data_root))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(dashboard: Dashboard) -> Result<()> {
    let port = dashboard.config().server.port;
    let data_root = dashboard.config().data.root.clone();
    let state = Arc::new(AppState::new(dashboard));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let app = router(state, data_root);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Json<Index> {
    let config = state.dashboard.config();
    Json(Index {
        layers: config.layers.iter().map(|l| l.name.clone()).collect(),
        tables: config.tables.iter().map(|t| t.name.clone()).collect(),
        charts: config.charts.iter().map(|c| c.name.clone()).collect(),
        products: state
            .dashboard
            .catalog()
            .products()
            .into_iter()
            .map(String::from)
            .collect(),
    })
}

async fn layer_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<FeatureCollection> {
    blocking(state, move |s| s.dashboard.map_layer(&name)).await
}

async fn popup_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<PopupParams>,
) -> ApiResult<Option<Vec<PopupEntry>>> {
    blocking(state, move |s| {
        let layer = s.dashboard.layer_config(&name)?;
        let (collection, index) = s.layer_index(&name)?;
        Ok(index
            .locate(&collection, params.lon, params.lat)
            .map(|feature| render::popup(feature, &layer.popup)))
    })
    .await
}

async fn table_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<ViewParams>,
) -> ApiResult<TabularSeries> {
    blocking(state, move |s| {
        s.dashboard
            .table(&name, params.period)
            .map(|series| series.as_ref().clone())
    })
    .await
}

async fn chart_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<ViewParams>,
) -> ApiResult<ChartModel> {
    blocking(state, move |s| s.dashboard.chart(&name, &params)).await
}

async fn chart_periods_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Vec<CatalogKey>> {
    state
        .dashboard
        .chart_periods(&name)
        .map(Json)
        .map_err(ApiError::from)
}

async fn change_handler(
    State(state): State<Arc<AppState>>,
    Path((product, year)): Path<(String, u16)>,
) -> ApiResult<ChangeEntry> {
    let (key, artifact) = state.dashboard.change_for(&product, year)?;
    Ok(Json(ChangeEntry {
        key,
        kind: artifact.kind,
        path: artifact.path.clone(),
    }))
}

async fn catalog_handler(
    State(state): State<Arc<AppState>>,
    Path(product): Path<String>,
) -> ApiResult<BTreeMap<String, PathBuf>> {
    let entries: BTreeMap<String, PathBuf> = state
        .dashboard
        .catalog()
        .entries(&product)
        .map(|(key, artifact)| (key.to_string(), artifact.path.clone()))
        .collect();
    if entries.is_empty() {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("Unknown product '{}'", product),
        });
    }
    Ok(Json(entries))
}
