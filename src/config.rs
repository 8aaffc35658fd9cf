use crate::data::{DatasetSource, FileSource, HttpSource, LayerPaths};
use crate::heat::HeatOptions;
use crate::render::TileTarget;
use crate::types::LayerType;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub input: InputConfig,
    #[serde(default)]
    pub heatmap: HeatmapConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where boundary layers are read from. Exactly one of `base_url` and `dir` is set.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub base_url: Option<String>,
    pub dir: Option<PathBuf>,
    // Keyed by layer type, e.g. `nrmBoundaries = "nrm/regions.json"`
    #[serde(default)]
    pub paths: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub ttl_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_minutes: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub projects_csv: PathBuf,
    pub locations_csv: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeatmapConfig {
    #[serde(default = "default_show")]
    pub show: bool,
    #[serde(flatten)]
    pub options: HeatOptions,
}

fn default_show() -> bool {
    true
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            show: true,
            options: HeatOptions::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub tile_dir: PathBuf,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match (&self.source.base_url, &self.source.dir) {
            (Some(_), Some(_)) => bail!("[source] sets both base_url and dir; pick one"),
            (None, None) => bail!("[source] needs either base_url or dir"),
            _ => {}
        }
        self.layer_paths()?;
        if self.output.min_zoom > self.output.max_zoom {
            bail!(
                "[output] min_zoom {} is above max_zoom {}",
                self.output.min_zoom,
                self.output.max_zoom
            );
        }
        if self.output.max_zoom > 22 {
            bail!("[output] max_zoom {} is above 22", self.output.max_zoom);
        }
        Ok(())
    }

    pub fn layer_paths(&self) -> Result<LayerPaths> {
        let overrides = self
            .source
            .paths
            .iter()
            .map(|(layer, path)| -> Result<(LayerType, String)> {
                Ok((layer.parse()?, path.clone()))
            })
            .collect::<Result<HashMap<_, _>>>()
            .context("Invalid [source.paths] entry")?;
        Ok(LayerPaths::new(overrides))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_minutes.saturating_mul(60))
    }

    pub fn tile_target(&self) -> TileTarget {
        TileTarget {
            dir: self.output.tile_dir.clone(),
            min_zoom: self.output.min_zoom,
            max_zoom: self.output.max_zoom,
        }
    }

    pub fn dataset_source(&self) -> Result<Arc<dyn DatasetSource>> {
        let paths = self.layer_paths()?;
        if let Some(url) = &self.source.base_url {
            let client = reqwest::Client::builder()
                .gzip(true)
                .build()
                .context("Failed to build HTTP client")?;
            return Ok(Arc::new(HttpSource::new(client, url.clone(), paths)));
        }
        let dir = self
            .source
            .dir
            .clone()
            .ok_or_else(|| anyhow!("[source] needs either base_url or dir"))?;
        Ok(Arc::new(FileSource::new(dir, paths)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[source]
dir = "data/boundaries"

[input]
projects_csv = "data/projects.csv"
locations_csv = "data/locations.csv"

[output]
tile_dir = "output/tiles"
min_zoom = 4
max_zoom = 9
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = AppConfig::parse(MINIMAL).expect("parse");
        assert_eq!(config.ttl(), Duration::from_secs(1800));
        assert!(config.heatmap.show);
        assert_eq!(config.heatmap.options, HeatOptions::default());
        assert_eq!(config.server.port, 3000);
        assert!(config.source.paths.is_empty());
    }

    #[test]
    fn heatmap_and_path_overrides() {
        let content = format!(
            "{MINIMAL}\n[source.paths]\nnrmBoundaries = \"nrm/regions.json\"\n\n[heatmap]\nshow = false\nradius = 30.0\n"
        );
        // `[source.paths]` after `[output]` is still a sub-table of `[source]`.
        let config = AppConfig::parse(&content).expect("parse");
        assert!(!config.heatmap.show);
        assert_eq!(config.heatmap.options.radius, 30.0);
        assert_eq!(config.heatmap.options.blur, 15.0);
        let paths = config.layer_paths().expect("paths");
        assert_eq!(paths.path(LayerType::NrmBoundaries), "nrm/regions.json");
        assert_eq!(paths.path(LayerType::RegionBoundaries), "regions.geojson");
    }

    #[test]
    fn rejects_ambiguous_source_and_bad_zoom() {
        let both = MINIMAL.replace(
            "dir = \"data/boundaries\"",
            "dir = \"data\"\nbase_url = \"https://example.org\"",
        );
        assert!(AppConfig::parse(&both).is_err());

        let zoom = MINIMAL.replace("min_zoom = 4", "min_zoom = 12");
        assert!(AppConfig::parse(&zoom).is_err());

        let huge = format!("{MINIMAL}\n[cache]\nttl_minutes = {}\n", i64::MAX);
        let config = AppConfig::parse(&huge).expect("parse");
        assert_eq!(config.ttl(), Duration::from_secs(u64::MAX));

        let unknown = format!("{MINIMAL}\n[source.paths]\nsuburbs = \"x.json\"\n");
        assert!(AppConfig::parse(&unknown).is_err());
    }
}
