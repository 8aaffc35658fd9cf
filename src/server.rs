use crate::config::AppConfig;
use crate::data::{DatasetLoader, LoadReport};
use crate::heat::{aggregate, HeatOptions};
use crate::lifecycle::HeatLayerManager;
use crate::render::{TileSurface, TileTarget};
use crate::resolver::{resolve, ResolverInputs};
use crate::types::{HeatPoint, LayerSet, LayerType, Project, ResolvedCoordinate, SimpleLocations};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, String)>;

pub struct AppState {
    pub loader: DatasetLoader,
    pub projects: Vec<Project>,
    pub locations: SimpleLocations,
    pub target: TileTarget,
    pub heat_layer: Mutex<HeatLayerManager<TileSurface>>,
}

#[derive(Deserialize)]
pub struct ResolveParams {
    keys: String,
}

#[derive(Deserialize)]
pub struct HeatmapToggle {
    show: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStatus {
    layer: LayerType,
    display_name: &'static str,
    loaded: bool,
    features: usize,
}

#[derive(Serialize)]
pub struct LayersResponse {
    layers: Vec<LayerStatus>,
    warning: Option<String>,
}

#[derive(Serialize)]
pub struct HeatResponse {
    points: Vec<HeatPoint>,
    resolved: usize,
    unresolved: usize,
    warning: Option<String>,
}

#[derive(Serialize)]
pub struct HeatmapResponse {
    attached: bool,
    points: usize,
    // Tile path below /tiles, e.g. "heat-4120-2"
    layer: Option<String>,
    warning: Option<String>,
}

impl AppState {
    pub fn new(
        loader: DatasetLoader,
        projects: Vec<Project>,
        locations: SimpleLocations,
        target: TileTarget,
        options: HeatOptions,
    ) -> Self {
        Self {
            loader,
            projects,
            locations,
            target,
            heat_layer: Mutex::new(HeatLayerManager::new(TileSurface::new(), options)),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let tiles = ServeDir::new(&state.target.dir);
    Router::new()
        .route("/api/layers", get(layers_handler))
        .route("/api/heat", get(heat_handler))
        .route("/api/resolve", get(resolve_handler))
        .route("/api/heatmap", post(heatmap_handler))
        .nest_service("/tiles", tiles)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(
    config: AppConfig,
    loader: DatasetLoader,
    projects: Vec<Project>,
    locations: SimpleLocations,
    shutdown: CancellationToken,
) -> Result<()> {
    let state = Arc::new(AppState::new(
        loader,
        projects,
        locations,
        config.tile_target(),
        config.heatmap.options.clone(),
    ));

    match refresh_heat_layer(state.clone(), config.heatmap.show, &shutdown).await {
        Ok(status) => info!(attached = status.attached, points = status.points, "initial heat layer"),
        Err((_, msg)) => warn!("initial heat layer failed: {}", msg),
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

/// Serves until `shutdown` fires, then removes the attached heat layer.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped, removing heat layer");
    state
        .heat_layer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .teardown();
    Ok(())
}

async fn load_report(state: &AppState, cancel: &CancellationToken) -> Result<LoadReport, (StatusCode, String)> {
    state.loader.load_all(cancel).await.ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Layer loading was cancelled".to_string(),
    ))
}

/// Reloads layers and re-syncs the heat layer against them.
async fn refresh_heat_layer(
    state: Arc<AppState>,
    show: bool,
    cancel: &CancellationToken,
) -> std::result::Result<HeatmapResponse, (StatusCode, String)> {
    let report = load_report(&state, cancel).await?;
    let warning = report.warning();
    let layers: LayerSet = report.layers;

    // Tile rendering is CPU bound.
    let synced = tokio::task::spawn_blocking(move || {
        let mut manager = state
            .heat_layer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let inputs = ResolverInputs {
            layers: &layers,
            locations: &state.locations,
        };
        let points = manager.sync(show, &state.target, &state.projects, &inputs)?;
        let layer = manager
            .handle()
            .and_then(|h| h.dir.file_name())
            .map(|name| name.to_string_lossy().into_owned());
        anyhow::Ok((points, layer))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))?;

    let (points, layer) = synced;
    Ok(HeatmapResponse {
        attached: layer.is_some(),
        points,
        layer,
        warning,
    })
}

async fn layers_handler(State(state): State<Arc<AppState>>) -> ApiResult<LayersResponse> {
    let report = load_report(&state, &CancellationToken::new()).await?;
    let layers = report
        .layers
        .iter()
        .map(|(layer, dataset)| LayerStatus {
            layer,
            display_name: layer.display_name(),
            loaded: dataset.is_some(),
            features: dataset.map_or(0, |d| d.features.len()),
        })
        .collect();

    Ok(Json(LayersResponse {
        layers,
        warning: report.warning(),
    }))
}

async fn heat_handler(State(state): State<Arc<AppState>>) -> ApiResult<HeatResponse> {
    let report = load_report(&state, &CancellationToken::new()).await?;
    let inputs = ResolverInputs {
        layers: &report.layers,
        locations: &state.locations,
    };
    let agg = aggregate(&state.projects, &inputs);

    Ok(Json(HeatResponse {
        points: agg.points,
        resolved: agg.resolved,
        unresolved: agg.unresolved,
        warning: report.warning(),
    }))
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResolveParams>,
) -> ApiResult<Option<ResolvedCoordinate>> {
    let keys = parse_keys(&params.keys).map_err(|msg| (StatusCode::BAD_REQUEST, msg))?;
    let report = load_report(&state, &CancellationToken::new()).await?;
    let inputs = ResolverInputs {
        layers: &report.layers,
        locations: &state.locations,
    };
    Ok(Json(resolve(&keys, &inputs)))
}

async fn heatmap_handler(
    State(state): State<Arc<AppState>>,
    Json(toggle): Json<HeatmapToggle>,
) -> ApiResult<HeatmapResponse> {
    refresh_heat_layer(state, toggle.show, &CancellationToken::new())
        .await
        .map(Json)
}

fn parse_keys(raw: &str) -> std::result::Result<Vec<u64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| k.parse::<u64>().map_err(|_| format!("Invalid area key '{}'", k)))
        .collect()
}
