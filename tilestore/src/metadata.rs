//! The metadata rows shared by both store layouts.
//!
//! MBTiles stores them in the `metadata(name, value)` table; the
//! directory layout writes the same pairs into `metadata.json`. The
//! `json` row carries the `vector_layers` array and the optional
//! tilestats histogram.

use serde_json::{Value, json};
use tilejson::VectorLayer;

#[derive(Debug, Clone)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub minzoom: u8,
    pub maxzoom: u8,
    /// `[west, south, east, north]` in degrees.
    pub bounds: Option<[f64; 4]>,
    /// `(lon, lat, zoom)`.
    pub center: Option<(f64, f64, u8)>,
    pub generator: String,
    pub generator_options: String,
    pub vector_layers: Vec<VectorLayer>,
    pub tilestats: Option<Value>,
}

impl Metadata {
    /// The `(name, value)` pairs to write, in a stable order.
    #[must_use]
    pub fn rows(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("name".to_string(), self.name.clone()),
            ("description".to_string(), self.description.clone()),
            ("version".to_string(), "2".to_string()),
            ("minzoom".to_string(), self.minzoom.to_string()),
            ("maxzoom".to_string(), self.maxzoom.to_string()),
            ("type".to_string(), "overlay".to_string()),
            ("format".to_string(), "pbf".to_string()),
            ("generator".to_string(), self.generator.clone()),
            (
                "generator_options".to_string(),
                self.generator_options.clone(),
            ),
        ];
        if let Some(b) = self.bounds {
            rows.push((
                "bounds".to_string(),
                format!("{:.6},{:.6},{:.6},{:.6}", b[0], b[1], b[2], b[3]),
            ));
        }
        if let Some((lon, lat, zoom)) = self.center {
            rows.push(("center".to_string(), format!("{lon:.6},{lat:.6},{zoom}")));
        }
        let mut json = json!({ "vector_layers": self.vector_layers });
        if let Some(stats) = &self.tilestats {
            json["tilestats"] = stats.clone();
        }
        rows.push(("json".to_string(), json.to_string()));
        rows
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> Metadata {
        Metadata {
            name: "test".to_string(),
            description: "a test set".to_string(),
            minzoom: 0,
            maxzoom: 14,
            bounds: Some([-10.0, -20.0, 30.0, 40.0]),
            center: Some((10.0, 10.0, 14)),
            generator: "tilery v0.1.0".to_string(),
            generator_options: "--maxzoom 14".to_string(),
            vector_layers: vec![VectorLayer {
                id: "roads".to_string(),
                fields: BTreeMap::from([("kind".to_string(), "String".to_string())]),
                description: None,
                minzoom: Some(0),
                maxzoom: Some(14),
                other: BTreeMap::default(),
            }],
            tilestats: None,
        }
    }

    #[test]
    fn test_rows() {
        let rows = sample().rows();
        let map: BTreeMap<_, _> = rows.into_iter().collect();
        assert_eq!(map["version"], "2");
        assert_eq!(map["format"], "pbf");
        assert_eq!(map["maxzoom"], "14");
        assert_eq!(map["bounds"], "-10.000000,-20.000000,30.000000,40.000000");
        assert_eq!(map["center"], "10.000000,10.000000,14");

        let json: Value = serde_json::from_str(&map["json"]).unwrap();
        assert_eq!(json["vector_layers"][0]["id"], "roads");
        assert_eq!(json["vector_layers"][0]["fields"]["kind"], "String");
    }

    #[test]
    fn test_tilestats_lands_in_json_row() {
        let mut md = sample();
        md.tilestats = Some(json!({"layerCount": 1}));
        let rows = md.rows();
        let json_row = &rows.iter().find(|(k, _)| k == "json").unwrap().1;
        let json: Value = serde_json::from_str(json_row).unwrap();
        assert_eq!(json["tilestats"]["layerCount"], 1);
    }
}
