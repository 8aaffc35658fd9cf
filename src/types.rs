use geo::{BoundingRect, Geometry, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The five boundary layers a project area key may point into.
///
/// Declaration order is the resolution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayerType {
    RegionBoundaries,
    DistrictBoundaries,
    NrmBoundaries,
    IbraBoundaries,
    ImcraBoundaries,
}

impl LayerType {
    pub const ALL: [LayerType; 5] = [
        LayerType::RegionBoundaries,
        LayerType::DistrictBoundaries,
        LayerType::NrmBoundaries,
        LayerType::IbraBoundaries,
        LayerType::ImcraBoundaries,
    ];

    /// Feature property holding the human readable boundary name.
    pub fn name_key(self) -> &'static str {
        match self {
            LayerType::RegionBoundaries => "REGION",
            LayerType::DistrictBoundaries => "DISTRICT",
            LayerType::NrmBoundaries => "NRM_REGION",
            LayerType::IbraBoundaries => "SUB_NAME_7",
            LayerType::ImcraBoundaries => "MESO_NAME",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            LayerType::RegionBoundaries => "Regions",
            LayerType::DistrictBoundaries => "Districts",
            LayerType::NrmBoundaries => "NRM Regions",
            LayerType::IbraBoundaries => "IBRA Subregions",
            LayerType::ImcraBoundaries => "IMCRA Meso-scale Regions",
        }
    }

    pub fn default_path(self) -> &'static str {
        match self {
            LayerType::RegionBoundaries => "regions.geojson",
            LayerType::DistrictBoundaries => "districts.geojson",
            LayerType::NrmBoundaries => "nrm_regions.geojson",
            LayerType::IbraBoundaries => "ibra_subregions.geojson",
            LayerType::ImcraBoundaries => "imcra_mesoscale.geojson",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LayerType::RegionBoundaries => "regionBoundaries",
            LayerType::DistrictBoundaries => "districtBoundaries",
            LayerType::NrmBoundaries => "nrmBoundaries",
            LayerType::IbraBoundaries => "ibraBoundaries",
            LayerType::ImcraBoundaries => "imcraBoundaries",
        }
    }
}

impl FromStr for LayerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerType::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown layer type '{}'", s))
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BoundaryFeature {
    pub properties: serde_json::Map<String, serde_json::Value>,
    // Only polygonal geometry with a bounding box is kept; anything else leaves this empty.
    pub geometry: Option<MultiPolygon<f64>>,
}

impl BoundaryFeature {
    pub fn from_geojson(feature: geojson::Feature) -> Self {
        let geometry = feature.geometry.and_then(|geom| {
            let converted: Geometry<f64> = geom.value.try_into().ok()?;
            match converted {
                Geometry::MultiPolygon(mp) => Some(mp),
                Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
                _ => None,
            }
        });
        // Empty coordinate lists have no bounding box and so no centroid.
        let geometry = geometry.filter(|mp| mp.bounding_rect().is_some());

        Self {
            properties: feature.properties.unwrap_or_default(),
            geometry,
        }
    }

    /// Name stored under `key`, if it is a string.
    pub fn name(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(serde_json::Value::as_str)
    }

    /// Center of the geometry's bounding box.
    pub fn centroid(&self) -> Option<ResolvedCoordinate> {
        let rect = self.geometry.as_ref()?.bounding_rect()?;
        let center = rect.center();
        Some(ResolvedCoordinate {
            lat: center.y,
            lon: center.x,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BoundaryDataset {
    pub features: Vec<BoundaryFeature>,
}

/// Every layer's load outcome, keyed by layer. All five keys are always present.
#[derive(Debug, Clone, Default)]
pub struct LayerSet {
    layers: BTreeMap<LayerType, Option<Arc<BoundaryDataset>>>,
}

impl LayerSet {
    pub fn new() -> Self {
        Self {
            layers: LayerType::ALL.iter().map(|l| (*l, None)).collect(),
        }
    }

    pub fn insert(&mut self, layer: LayerType, dataset: Option<Arc<BoundaryDataset>>) {
        self.layers.insert(layer, dataset);
    }

    pub fn get(&self, layer: LayerType) -> Option<&BoundaryDataset> {
        self.layers.get(&layer).and_then(|d| d.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayerType, Option<&BoundaryDataset>)> {
        self.layers.iter().map(|(l, d)| (*l, d.as_deref()))
    }
}

/// A `{key, name}` record translating an opaque area key into a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleLocation {
    pub key: u64,
    pub name: String,
}

/// Per-layer simple location lists supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct SimpleLocations {
    by_layer: BTreeMap<LayerType, Vec<SimpleLocation>>,
}

impl SimpleLocations {
    pub fn push(&mut self, layer: LayerType, location: SimpleLocation) {
        self.by_layer.entry(layer).or_default().push(location);
    }

    pub fn for_layer(&self, layer: LayerType) -> Option<&[SimpleLocation]> {
        self.by_layer.get(&layer).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.by_layer.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    pub area_keys: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCoordinate {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatPoint {
    pub lat: f64,
    pub lon: f64,
    pub intensity: f64,
}
