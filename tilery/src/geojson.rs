//! GeoJSON source adapter: streams `FeatureCollection` members off disk
//! (or stdin) into parsed features on a bounded channel, one reader
//! thread per input, so the ingest workers never block on parsing.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use geojson::FeatureReader;
use log::warn;
use serde_json::Value;
use tilery_core::{AttrValue, CoreError, CoreResult, ParsedFeature};

const CHANNEL_DEPTH: usize = 1024;

pub struct GeoJsonSource {
    rx: mpsc::IntoIter<CoreResult<ParsedFeature>>,
    _reader: std::thread::JoinHandle<()>,
}

impl Iterator for GeoJsonSource {
    type Item = CoreResult<ParsedFeature>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.next()
    }
}

/// Open one input. `-` reads standard input. The layer defaults to the
/// file stem unless forced.
pub fn open_source(path: &Path, forced_layer: Option<&str>) -> GeoJsonSource {
    let layer = forced_layer
        .map(ToString::to_string)
        .or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .filter(|s| s != "-")
        });
    let path = path.to_path_buf();
    let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
    let reader = std::thread::spawn(move || read_into(&path, layer, &tx));
    GeoJsonSource {
        rx: rx.into_iter(),
        _reader: reader,
    }
}

fn read_into(
    path: &PathBuf,
    layer: Option<String>,
    tx: &mpsc::SyncSender<CoreResult<ParsedFeature>>,
) {
    let input: Box<dyn Read> = if path.to_str() == Some("-") {
        Box::new(std::io::stdin())
    } else {
        match File::open(path) {
            Ok(f) => Box::new(f),
            Err(e) => {
                let _ = tx.send(Err(CoreError::Io(e)));
                return;
            }
        }
    };

    let mut reader = FeatureReader::from_reader(BufReader::new(input));
    for feature in reader.features() {
        let feature = match feature {
            Ok(f) => f,
            Err(e) => {
                let _ = tx.send(Err(CoreError::Parse(format!("{}: {e}", path.display()))));
                return;
            }
        };
        if let Some(parsed) = convert(feature, layer.as_deref()) {
            if tx.send(Ok(parsed)).is_err() {
                return; // ingest worker went away
            }
        }
    }
}

fn convert(feature: geojson::Feature, layer: Option<&str>) -> Option<ParsedFeature> {
    let Some(geometry) = feature.geometry else {
        warn!("Dropping feature without geometry");
        return None;
    };
    let geometry: geo_types::Geometry<f64> = match (&geometry).try_into() {
        Ok(g) => g,
        Err(e) => {
            warn!("Dropping feature with unusable geometry: {e}");
            return None;
        }
    };

    let id = match &feature.id {
        Some(geojson::feature::Id::Number(n)) => n.as_u64(),
        _ => None,
    };

    let attributes = feature
        .properties
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), attr_value(v)))
        .collect();

    // per-feature tiling hints ride in a foreign member
    let hints = feature
        .foreign_members
        .as_ref()
        .and_then(|m| m.get("tilery"));
    let zoom_hint = |name: &str| {
        hints
            .and_then(|h| h.get(name))
            .and_then(Value::as_u64)
            .map(|z| z as u8)
    };
    let layer = hints
        .and_then(|h| h.get("layer"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| layer.map(ToString::to_string));

    Some(ParsedFeature {
        layer,
        geometry,
        id,
        attributes,
        minzoom: zoom_hint("minzoom"),
        maxzoom: zoom_hint("maxzoom"),
    })
}

fn attr_value(v: &Value) -> AttrValue {
    match v {
        Value::String(s) => AttrValue::String(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttrValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                AttrValue::Uint(u)
            } else {
                AttrValue::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::Bool(b) => AttrValue::Bool(*b),
        Value::Null => AttrValue::Null,
        // nested structures are carried as their JSON text
        nested => AttrValue::String(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn write_geojson(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new()
            .suffix(".geojson")
            .tempfile()
            .unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_reads_feature_collection() {
        let f = write_geojson(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","id":7,"properties":{"name":"a","pop":12,"tags":["x"]},
                 "geometry":{"type":"Point","coordinates":[1.0,2.0]}},
                {"type":"Feature","properties":{},
                 "geometry":{"type":"LineString","coordinates":[[0,0],[1,1]]}}
            ]}"#,
        );
        let features: Vec<_> = open_source(f.path(), None)
            .collect::<CoreResult<Vec<_>>>()
            .unwrap();
        assert_eq!(features.len(), 2);
        let first = &features[0];
        assert_eq!(first.id, Some(7));
        assert!(matches!(first.geometry, geo_types::Geometry::Point(_)));
        assert!(
            first
                .attributes
                .iter()
                .any(|(k, v)| k == "pop" && *v == AttrValue::Int(12))
        );
        // nested arrays become their JSON text
        assert!(
            first
                .attributes
                .iter()
                .any(|(k, v)| k == "tags" && *v == AttrValue::String("[\"x\"]".to_string()))
        );
        // layer defaults to the file stem
        assert!(first.layer.as_deref().unwrap().len() > 1);
    }

    #[test]
    fn test_forced_layer_and_hints() {
        let f = write_geojson(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{},"tilery":{"minzoom":4,"maxzoom":9},
                 "geometry":{"type":"Point","coordinates":[0.0,0.0]}}
            ]}"#,
        );
        let features: Vec<_> = open_source(f.path(), Some("roads"))
            .collect::<CoreResult<Vec<_>>>()
            .unwrap();
        assert_eq!(features[0].layer.as_deref(), Some("roads"));
        assert_eq!(features[0].minzoom, Some(4));
        assert_eq!(features[0].maxzoom, Some(9));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let f = write_geojson("this is not geojson");
        let result: CoreResult<Vec<_>> = open_source(f.path(), None).collect();
        assert!(result.is_err());
    }
}
