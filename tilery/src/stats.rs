//! Layer schema metadata: the `vector_layers` array and the tilestats
//! histogram derived from the layer catalogue.

use serde_json::{Value, json};
use tilejson::VectorLayer;
use tilery_core::feature::{AttrValue, LayerEntry};
use tilery_core::LayerMap;

/// Sample values shown per attribute in tilestats.
const MAX_STAT_VALUES: usize = 1000;

pub fn vector_layers(layers: &LayerMap, minzoom: u8, maxzoom: u8) -> Vec<VectorLayer> {
    layers
        .iter()
        .map(|(name, entry)| VectorLayer {
            id: name.clone(),
            fields: entry
                .attributes
                .iter()
                .map(|(attr, stats)| (attr.clone(), stats.type_name().to_string()))
                .collect(),
            description: None,
            minzoom: Some(if entry.minzoom == u8::MAX { minzoom } else { entry.minzoom }),
            maxzoom: Some(if entry.maxzoom == 0 { maxzoom } else { entry.maxzoom }),
            other: std::collections::BTreeMap::default(),
        })
        .collect()
}

fn dominant_geometry(entry: &LayerEntry) -> &'static str {
    if entry.polygon_count >= entry.line_count && entry.polygon_count >= entry.point_count {
        if entry.polygon_count == 0 {
            "Point"
        } else {
            "Polygon"
        }
    } else if entry.line_count >= entry.point_count {
        "LineString"
    } else {
        "Point"
    }
}

fn sample_value(value: &AttrValue) -> Value {
    match value {
        AttrValue::String(s) => Value::String(s.clone()),
        AttrValue::Double(f) => json!(f),
        AttrValue::Int(i) => json!(i),
        AttrValue::Uint(u) => json!(u),
        AttrValue::Bool(b) => json!(b),
        AttrValue::Null => Value::Null,
    }
}

pub fn tilestats(layers: &LayerMap) -> Value {
    let layer_stats: Vec<Value> = layers
        .iter()
        .map(|(name, entry)| {
            let attributes: Vec<Value> = entry
                .attributes
                .iter()
                .map(|(attr, stats)| {
                    let mut v = json!({
                        "attribute": attr,
                        "count": stats.sample_values.len(),
                        "type": stats.type_name().to_lowercase(),
                        "values": stats
                            .sample_values
                            .iter()
                            .take(MAX_STAT_VALUES)
                            .map(sample_value)
                            .collect::<Vec<_>>(),
                    });
                    if let (Some(min), Some(max)) = (stats.min, stats.max) {
                        v["min"] = json!(min);
                        v["max"] = json!(max);
                    }
                    v
                })
                .collect();
            json!({
                "layer": name,
                "count": entry.point_count + entry.line_count + entry.polygon_count,
                "geometry": dominant_geometry(entry),
                "attributeCount": attributes.len(),
                "attributes": attributes,
            })
        })
        .collect();
    json!({
        "layerCount": layers.len(),
        "layers": layer_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> LayerMap {
        let mut entry = LayerEntry::new(0);
        entry.observe_feature(
            tilery_core::FeatureType::Point,
            &[
                ("name".to_string(), AttrValue::String("a".to_string())),
                ("pop".to_string(), AttrValue::Int(5)),
            ],
        );
        entry.observe_feature(
            tilery_core::FeatureType::Point,
            &[("pop".to_string(), AttrValue::Int(9))],
        );
        let mut map = LayerMap::new();
        map.insert("poi".to_string(), entry);
        map
    }

    #[test]
    fn test_vector_layers() {
        let layers = vector_layers(&catalogue(), 0, 14);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].id, "poi");
        assert_eq!(layers[0].fields["pop"], "Number");
        assert_eq!(layers[0].fields["name"], "String");
        assert_eq!(layers[0].minzoom, Some(0));
        assert_eq!(layers[0].maxzoom, Some(14));
    }

    #[test]
    fn test_tilestats() {
        let stats = tilestats(&catalogue());
        assert_eq!(stats["layerCount"], 1);
        let layer = &stats["layers"][0];
        assert_eq!(layer["layer"], "poi");
        assert_eq!(layer["count"], 2);
        assert_eq!(layer["geometry"], "Point");
        let pop = layer["attributes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["attribute"] == "pop")
            .unwrap();
        assert_eq!(pop["min"], 5.0);
        assert_eq!(pop["max"], 9.0);
        assert_eq!(pop["values"].as_array().unwrap().len(), 2);
    }
}
