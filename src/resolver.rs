use crate::matching::fuzzy_match;
use crate::types::{
    BoundaryDataset, BoundaryFeature, LayerSet, LayerType, ResolvedCoordinate, SimpleLocations,
};

/// Everything a project needs to be placed on the map.
#[derive(Debug, Clone, Copy)]
pub struct ResolverInputs<'a> {
    pub layers: &'a LayerSet,
    pub locations: &'a SimpleLocations,
}

/// First coordinate any of `area_keys` resolves to.
///
/// Layers are walked in [`LayerType::ALL`] order and keys in the order given; the first
/// matched feature wins. A layer with no dataset or no location list is skipped.
/// A key listed under several layers resolves through the highest priority layer.
pub fn resolve(area_keys: &[u64], inputs: &ResolverInputs<'_>) -> Option<ResolvedCoordinate> {
    for layer in LayerType::ALL {
        let (Some(dataset), Some(locations)) =
            (inputs.layers.get(layer), inputs.locations.for_layer(layer))
        else {
            continue;
        };

        for key in area_keys {
            let Some(location) = locations.iter().find(|l| l.key == *key) else {
                continue;
            };
            let centroid =
                find_feature(dataset, layer, &location.name).and_then(BoundaryFeature::centroid);
            if centroid.is_some() {
                return centroid;
            }
        }
    }
    None
}

/// Exact name-property match first, then a fuzzy one. Features without a centroid
/// are never returned.
pub fn find_feature<'d>(
    dataset: &'d BoundaryDataset,
    layer: LayerType,
    name: &str,
) -> Option<&'d BoundaryFeature> {
    let key = layer.name_key();
    let candidates = || dataset.features.iter().filter(|f| f.centroid().is_some());

    candidates()
        .find(|f| f.name(key) == Some(name))
        .or_else(|| candidates().find(|f| f.name(key).is_some_and(|n| fuzzy_match(name, n))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_dataset;
    use crate::data::tests::{collection, feature};
    use crate::types::SimpleLocation;
    use std::sync::Arc;

    fn dataset(features: Vec<serde_json::Value>) -> Arc<BoundaryDataset> {
        Arc::new(parse_dataset(collection(features)).expect("valid dataset"))
    }

    fn location(key: u64, name: &str) -> SimpleLocation {
        SimpleLocation {
            key,
            name: name.to_string(),
        }
    }

    fn assert_close(actual: ResolvedCoordinate, lat: f64, lon: f64) {
        assert!((actual.lat - lat).abs() < 1e-9, "lat {} != {}", actual.lat, lat);
        assert!((actual.lon - lon).abs() < 1e-9, "lon {} != {}", actual.lon, lon);
    }

    #[test]
    fn region_layer_wins_over_district_layer() {
        let mut layers = LayerSet::new();
        layers.insert(
            LayerType::RegionBoundaries,
            Some(dataset(vec![feature("REGION", "Swan", -31.5, 116.0)])),
        );
        layers.insert(
            LayerType::DistrictBoundaries,
            Some(dataset(vec![feature("DISTRICT", "Perth Hills", -32.0, 116.2)])),
        );

        let mut locations = SimpleLocations::default();
        locations.push(LayerType::DistrictBoundaries, location(20, "Perth Hills"));
        locations.push(LayerType::RegionBoundaries, location(3, "Swan"));

        let inputs = ResolverInputs {
            layers: &layers,
            locations: &locations,
        };
        // District key listed first; layer priority still decides.
        let resolved = resolve(&[20, 3], &inputs).expect("resolved");
        assert_close(resolved, -31.5, 116.0);

        let district_only = resolve(&[20], &inputs).expect("resolved");
        assert_close(district_only, -32.0, 116.2);
    }

    #[test]
    fn key_order_decides_within_a_layer() {
        let mut layers = LayerSet::new();
        layers.insert(
            LayerType::NrmBoundaries,
            Some(dataset(vec![
                feature("NRM_REGION", "Rangelands", -25.0, 120.0),
                feature("NRM_REGION", "Wheatbelt", -31.0, 117.0),
            ])),
        );
        let mut locations = SimpleLocations::default();
        locations.push(LayerType::NrmBoundaries, location(1, "Rangelands"));
        locations.push(LayerType::NrmBoundaries, location(2, "Wheatbelt"));
        let inputs = ResolverInputs {
            layers: &layers,
            locations: &locations,
        };

        assert_close(resolve(&[2, 1], &inputs).expect("resolved"), -31.0, 117.0);
        assert_close(resolve(&[1, 2], &inputs).expect("resolved"), -25.0, 120.0);
    }

    #[test]
    fn exact_match_preferred_over_earlier_fuzzy_match() {
        let data = dataset(vec![
            feature("SUB_NAME_7", "Dandaragan Plateau North", -30.0, 115.0),
            feature("SUB_NAME_7", "Dandaragan Plateau", -30.5, 115.5),
        ]);
        let found = find_feature(&data, LayerType::IbraBoundaries, "Dandaragan Plateau")
            .expect("found");
        assert_eq!(found.name("SUB_NAME_7"), Some("Dandaragan Plateau"));

        let fuzzy = find_feature(&data, LayerType::IbraBoundaries, "dandaragan plateau north!")
            .expect("fuzzy");
        assert_eq!(fuzzy.name("SUB_NAME_7"), Some("Dandaragan Plateau North"));
    }

    #[test]
    fn missing_layers_and_unknown_keys_resolve_to_none() {
        let mut layers = LayerSet::new();
        layers.insert(
            LayerType::ImcraBoundaries,
            Some(dataset(vec![feature("MESO_NAME", "Leeuwin-Naturaliste", -34.0, 115.0)])),
        );
        let mut locations = SimpleLocations::default();
        // Location list for a layer that failed to load.
        locations.push(LayerType::RegionBoundaries, location(5, "Leeuwin-Naturaliste"));
        locations.push(LayerType::ImcraBoundaries, location(6, "Abrolhos Islands"));
        let inputs = ResolverInputs {
            layers: &layers,
            locations: &locations,
        };

        assert!(resolve(&[5, 6, 99], &inputs).is_none());
        assert!(resolve(&[], &inputs).is_none());
    }

    #[test]
    fn features_without_polygon_geometry_are_skipped() {
        let mut point = feature("REGION", "Kimberley", -17.0, 125.0);
        point["geometry"] = serde_json::json!({ "type": "Point", "coordinates": [125.0, -17.0] });
        let data = dataset(vec![point, feature("REGION", "Kimberley Coast", -16.0, 124.0)]);

        let found = find_feature(&data, LayerType::RegionBoundaries, "Kimberley").expect("found");
        assert_eq!(found.name("REGION"), Some("Kimberley Coast"));
    }

    #[test]
    fn empty_geometry_falls_through_to_next_layer() {
        let mut empty = feature("REGION", "Pilbara", -21.0, 118.0);
        empty["geometry"] = serde_json::json!({ "type": "MultiPolygon", "coordinates": [] });
        let mut layers = LayerSet::new();
        layers.insert(LayerType::RegionBoundaries, Some(dataset(vec![empty])));
        layers.insert(
            LayerType::DistrictBoundaries,
            Some(dataset(vec![feature("DISTRICT", "Pilbara", -22.0, 118.5)])),
        );

        let mut locations = SimpleLocations::default();
        locations.push(LayerType::RegionBoundaries, location(1, "Pilbara"));
        locations.push(LayerType::DistrictBoundaries, location(1, "Pilbara"));
        let inputs = ResolverInputs {
            layers: &layers,
            locations: &locations,
        };

        let resolved = resolve(&[1], &inputs).expect("district layer resolves");
        assert_close(resolved, -22.0, 118.5);
        assert!(layers.get(LayerType::RegionBoundaries).unwrap().features[0].geometry.is_none());
    }
}
