use crate::resolver::{resolve, ResolverInputs};
use crate::types::{HeatPoint, Project};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub stop: f64,
    pub color: String, // Hex code
}

/// Fixed visual parameters of the density layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatOptions {
    /// Kernel radius in pixels.
    pub radius: f64,
    /// Outer part of the radius over which the kernel fades out.
    pub blur: f64,
    /// From this zoom on, points are drawn discretely.
    pub max_zoom: u8,
    pub gradient: Vec<GradientStop>,
}

impl Default for HeatOptions {
    fn default() -> Self {
        let stop = |stop: f64, color: &str| GradientStop {
            stop,
            color: color.to_string(),
        };
        Self {
            radius: 25.0,
            blur: 15.0,
            max_zoom: 17,
            gradient: vec![
                stop(0.4, "#0000ff"),
                stop(0.6, "#00ffff"),
                stop(0.7, "#00ff00"),
                stop(0.8, "#ffff00"),
                stop(1.0, "#ff0000"),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HeatAggregate {
    pub points: Vec<HeatPoint>,
    pub resolved: usize,
    pub unresolved: usize,
}

/// One unit-intensity point per resolvable project, in project order.
pub fn build_heat_points(projects: &[Project], inputs: &ResolverInputs<'_>) -> Vec<HeatPoint> {
    aggregate(projects, inputs).points
}

/// Like [`build_heat_points`], also counting projects with keys that did not resolve.
pub fn aggregate(projects: &[Project], inputs: &ResolverInputs<'_>) -> HeatAggregate {
    let with_areas: Vec<&Project> = projects.iter().filter(|p| !p.area_keys.is_empty()).collect();

    let resolved: Vec<Option<HeatPoint>> = with_areas
        .par_iter()
        .map(|project| {
            let coord = resolve(&project.area_keys, inputs);
            if coord.is_none() {
                debug!(project = %project.id, "project area did not resolve");
            }
            coord.map(|c| HeatPoint {
                lat: c.lat,
                lon: c.lon,
                intensity: 1.0,
            })
        })
        .collect();

    let points: Vec<HeatPoint> = resolved.into_iter().flatten().collect();
    HeatAggregate {
        resolved: points.len(),
        unresolved: with_areas.len() - points.len(),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_dataset;
    use crate::data::tests::{collection, feature};
    use crate::types::{LayerSet, LayerType, SimpleLocation, SimpleLocations};
    use std::sync::Arc;

    fn project(id: &str, keys: &[u64]) -> Project {
        Project {
            id: id.to_string(),
            title: format!("Project {id}"),
            area_keys: keys.to_vec(),
        }
    }

    fn fixtures() -> (LayerSet, SimpleLocations) {
        let mut layers = LayerSet::new();
        let districts = parse_dataset(collection(vec![
            feature("DISTRICT", "Perth Hills", -32.0, 116.0),
            feature("DISTRICT", "Swan Coastal", -31.8, 115.8),
        ]))
        .expect("dataset");
        layers.insert(LayerType::DistrictBoundaries, Some(Arc::new(districts)));

        let mut locations = SimpleLocations::default();
        for (key, name) in [(1, "Perth Hills"), (2, "Swan Coastal"), (3, "Exmouth")] {
            locations.push(
                LayerType::DistrictBoundaries,
                SimpleLocation {
                    key,
                    name: name.to_string(),
                },
            );
        }
        (layers, locations)
    }

    #[test]
    fn skips_unresolved_and_keeps_order_and_duplicates() {
        let (layers, locations) = fixtures();
        let inputs = ResolverInputs {
            layers: &layers,
            locations: &locations,
        };
        let projects = vec![
            project("a", &[2]),
            project("b", &[3]),
            project("c", &[]),
            project("d", &[1]),
            project("e", &[2]),
        ];

        let agg = aggregate(&projects, &inputs);
        assert_eq!(agg.resolved, 3);
        assert_eq!(agg.unresolved, 1);
        assert_eq!(agg.points.len(), 3);
        assert_eq!(agg.points[0], agg.points[2]);
        assert!((agg.points[1].lat - -32.0).abs() < 1e-9);
        assert!(agg.points.iter().all(|p| p.intensity == 1.0));
    }

    #[test]
    fn no_projects_no_points() {
        let (layers, locations) = fixtures();
        let inputs = ResolverInputs {
            layers: &layers,
            locations: &locations,
        };
        assert!(build_heat_points(&[], &inputs).is_empty());
    }

    #[test]
    fn default_options_have_five_stop_gradient() {
        let options = HeatOptions::default();
        assert_eq!(options.gradient.len(), 5);
        assert!(options.gradient.windows(2).all(|w| w[0].stop < w[1].stop));
    }
}
