use crate::cache::LayerCache;
use crate::types::{
    BoundaryDataset, BoundaryFeature, LayerSet, LayerType, Project, SimpleLocation,
    SimpleLocations,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload parsed but is not a usable feature collection.
    #[error("invalid boundary payload: {0}")]
    Shape(String),
}

/// Where a layer's raw boundary document comes from.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn fetch(&self, layer: LayerType) -> Result<serde_json::Value, LoadError>;
}

/// Resource path per layer, with optional overrides.
#[derive(Debug, Clone, Default)]
pub struct LayerPaths {
    overrides: HashMap<LayerType, String>,
}

impl LayerPaths {
    pub fn new(overrides: HashMap<LayerType, String>) -> Self {
        Self { overrides }
    }

    pub fn path(&self, layer: LayerType) -> &str {
        self.overrides
            .get(&layer)
            .map(String::as_str)
            .unwrap_or_else(|| layer.default_path())
    }
}

pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    paths: LayerPaths,
}

impl HttpSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, paths: LayerPaths) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            paths,
        }
    }

    fn url(&self, layer: LayerType) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.paths.path(layer).trim_start_matches('/')
        )
    }
}

#[async_trait]
impl DatasetSource for HttpSource {
    async fn fetch(&self, layer: LayerType) -> Result<serde_json::Value, LoadError> {
        let url = self.url(layer);
        debug!(%layer, %url, "fetching boundary layer");
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LoadError::Status { status, url });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub struct FileSource {
    dir: PathBuf,
    paths: LayerPaths,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>, paths: LayerPaths) -> Self {
        Self {
            dir: dir.into(),
            paths,
        }
    }
}

#[async_trait]
impl DatasetSource for FileSource {
    async fn fetch(&self, layer: LayerType) -> Result<serde_json::Value, LoadError> {
        let path = self.dir.join(self.paths.path(layer));
        debug!(%layer, ?path, "reading boundary layer");
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| LoadError::Io { path, source })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Checks the payload carries a non-empty `features` list and converts it.
pub fn parse_dataset(value: serde_json::Value) -> Result<BoundaryDataset, LoadError> {
    let features = match value {
        serde_json::Value::Object(mut obj) => obj.remove("features"),
        _ => None,
    };
    let Some(serde_json::Value::Array(raw)) = features else {
        return Err(LoadError::Shape("missing `features` array".into()));
    };

    let features: Vec<BoundaryFeature> = raw
        .into_iter()
        .filter_map(|f| geojson::Feature::from_json_value(f).ok())
        .map(BoundaryFeature::from_geojson)
        .collect();

    if features.is_empty() {
        return Err(LoadError::Shape("no usable features".into()));
    }
    Ok(BoundaryDataset { features })
}

/// Outcome of loading every layer once.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub layers: LayerSet,
    pub failed: Vec<LayerType>,
}

impl LoadReport {
    /// Human readable partial-failure notice, `None` when every layer loaded.
    pub fn warning(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let names: Vec<&str> = self.failed.iter().map(|l| l.display_name()).collect();
        Some(format!("Failed to load boundary layers: {}", names.join(", ")))
    }

    pub fn all_failed(&self) -> bool {
        self.failed.len() == LayerType::ALL.len()
    }
}

pub struct DatasetLoader {
    source: Arc<dyn DatasetSource>,
    cache: Arc<LayerCache>,
    ttl: Duration,
}

impl DatasetLoader {
    pub fn new(source: Arc<dyn DatasetSource>, cache: Arc<LayerCache>, ttl: Duration) -> Self {
        Self { source, cache, ttl }
    }

    pub fn cache(&self) -> &Arc<LayerCache> {
        &self.cache
    }

    /// Returns a fresh cached dataset, a newly fetched one, or a stale fallback.
    ///
    /// Never fails: every error path ends in `None` or the stale entry. A fetch that
    /// completes after `cancel` fires is discarded without touching the cache.
    pub async fn load(
        &self,
        layer: LayerType,
        cancel: &CancellationToken,
    ) -> Option<Arc<BoundaryDataset>> {
        if cancel.is_cancelled() {
            return None;
        }

        let cached = self.cache.get(layer);
        if let Some(entry) = &cached {
            if entry.is_fresh(self.ttl) {
                debug!(%layer, "boundary cache hit");
                return Some(entry.dataset.clone());
            }
        }

        let fetched = self
            .source
            .fetch(layer)
            .await
            .and_then(parse_dataset);

        if cancel.is_cancelled() {
            debug!(%layer, "load cancelled, discarding result");
            return None;
        }

        match fetched {
            Ok(dataset) => {
                info!(%layer, features = dataset.features.len(), "loaded boundary layer");
                let dataset = Arc::new(dataset);
                self.cache.insert(layer, dataset.clone());
                Some(dataset)
            }
            Err(err) => match cached {
                Some(stale) => {
                    warn!(%layer, error = %err, "reload failed, serving stale boundaries");
                    Some(stale.dataset)
                }
                None => {
                    warn!(%layer, error = %err, "boundary layer unavailable");
                    None
                }
            },
        }
    }

    /// Loads all five layers concurrently. `None` if `cancel` fired before the join.
    pub async fn load_all(&self, cancel: &CancellationToken) -> Option<LoadReport> {
        let (region, district, nrm, ibra, imcra) = tokio::join!(
            self.load(LayerType::RegionBoundaries, cancel),
            self.load(LayerType::DistrictBoundaries, cancel),
            self.load(LayerType::NrmBoundaries, cancel),
            self.load(LayerType::IbraBoundaries, cancel),
            self.load(LayerType::ImcraBoundaries, cancel),
        );

        if cancel.is_cancelled() {
            return None;
        }

        let mut layers = LayerSet::new();
        let mut failed = Vec::new();
        for (layer, dataset) in LayerType::ALL
            .into_iter()
            .zip([region, district, nrm, ibra, imcra])
        {
            if dataset.is_none() {
                failed.push(layer);
            }
            layers.insert(layer, dataset);
        }

        let report = LoadReport { layers, failed };
        if let Some(warning) = report.warning() {
            warn!("{}", warning);
        }
        Some(report)
    }
}

#[derive(Debug, Deserialize)]
struct ProjectRecord {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    area_keys: String,
}

#[derive(Debug, Deserialize)]
struct LocationRecord {
    layer: LayerType,
    key: u64,
    name: String,
}

pub fn load_projects(path: &Path) -> Result<Vec<Project>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open projects CSV: {:?}", path))?;
    let projects = read_projects(file)?;
    info!("Loaded {} projects", projects.len());
    Ok(projects)
}

/// Reads `id,title,area_keys` rows; `area_keys` is `;` separated and keeps its order.
pub fn read_projects<R: Read>(reader: R) -> Result<Vec<Project>> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut projects = Vec::new();

    for (row, result) in rdr.deserialize::<ProjectRecord>().enumerate() {
        let record = result.with_context(|| format!("Bad project row {}", row + 1))?;
        let area_keys = record
            .area_keys
            .split(';')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| {
                k.parse::<u64>()
                    .map_err(|_| anyhow!("Project '{}' has a non-numeric area key '{}'", record.id, k))
            })
            .collect::<Result<Vec<_>>>()?;

        projects.push(Project {
            id: record.id,
            title: record.title,
            area_keys,
        });
    }

    Ok(projects)
}

pub fn load_locations(path: &Path) -> Result<SimpleLocations> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open locations CSV: {:?}", path))?;
    let locations = read_locations(file)?;
    info!("Loaded {} simple locations", locations.len());
    Ok(locations)
}

/// Reads `layer,key,name` rows into per-layer lists.
pub fn read_locations<R: Read>(reader: R) -> Result<SimpleLocations> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut locations = SimpleLocations::default();

    for (row, result) in rdr.deserialize::<LocationRecord>().enumerate() {
        let record = result.with_context(|| format!("Bad location row {}", row + 1))?;
        locations.push(
            record.layer,
            SimpleLocation {
                key: record.key,
                name: record.name,
            },
        );
    }

    Ok(locations)
}
