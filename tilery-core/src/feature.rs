//! Parsed input features and the per-layer attribute catalogue.

use std::collections::BTreeMap;

use tilery_tile_utils::mvt::{GeomType, MvtValue};

/// Geometry class of a feature as stored in serial records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FeatureType {
    Point = 1,
    Line = 2,
    Polygon = 3,
}

impl FeatureType {
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Point),
            2 => Some(Self::Line),
            3 => Some(Self::Polygon),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_mvt(self) -> GeomType {
        match self {
            Self::Point => GeomType::Point,
            Self::Line => GeomType::Linestring,
            Self::Polygon => GeomType::Polygon,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::Line => "LineString",
            Self::Polygon => "Polygon",
        }
    }
}

/// An attribute value as delivered by a source parser.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Double(f64),
    Int(i64),
    Uint(u64),
    Bool(bool),
    Null,
}

impl AttrValue {
    /// Type byte stored ahead of the textual form in the string pool.
    #[must_use]
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::String(_) => 1,
            Self::Double(_) => 3,
            Self::Int(_) => 4,
            Self::Uint(_) => 5,
            Self::Bool(_) => 7,
            Self::Null => 8,
        }
    }

    /// Textual form stored in the string pool.
    #[must_use]
    pub fn to_pool_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Double(f) => format_double(*f),
            Self::Int(i) => i.to_string(),
            Self::Uint(u) => u.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Null => "null".to_string(),
        }
    }

    /// Reconstruct a value from its pool representation.
    #[must_use]
    pub fn from_pool(type_byte: u8, s: &str) -> Self {
        match type_byte {
            3 => s.parse().map_or(Self::Null, Self::Double),
            4 => s.parse().map_or(Self::Null, Self::Int),
            5 => s.parse().map_or(Self::Null, Self::Uint),
            7 => Self::Bool(s == "true"),
            8 => Self::Null,
            _ => Self::String(s.to_string()),
        }
    }

    /// Wire value with its explicit MVT value type. Whole doubles that
    /// fit an integer slot are narrowed the way the original encoder does.
    #[must_use]
    pub fn to_mvt(&self) -> MvtValue {
        match self {
            Self::String(s) => MvtValue::String(s.clone()),
            Self::Double(f) => {
                if f.fract() == 0.0 && f.abs() < 1e18 {
                    if *f < 0.0 {
                        MvtValue::Sint(*f as i64)
                    } else {
                        MvtValue::Uint(*f as u64)
                    }
                } else {
                    MvtValue::Double(*f)
                }
            }
            Self::Int(i) => MvtValue::Int(*i),
            Self::Uint(u) => MvtValue::Uint(*u),
            Self::Bool(b) => MvtValue::Bool(*b),
            Self::Null => MvtValue::Null,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Uint(u) => Some(*u as f64),
            _ => None,
        }
    }
}

/// Render a double the way JSON does, so `1.0` interns equal to `1`.
fn format_double(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.0}")
    } else {
        format!("{f}")
    }
}

/// One parsed input feature, in lon/lat coordinates, as handed to the
/// ingest stage by a source adapter.
#[derive(Debug, Clone)]
pub struct ParsedFeature {
    pub layer: Option<String>,
    pub geometry: geo_types::Geometry<f64>,
    pub id: Option<u64>,
    pub attributes: Vec<(String, AttrValue)>,
    /// Explicit per-feature zoom overrides.
    pub minzoom: Option<u8>,
    pub maxzoom: Option<u8>,
}

/// Attribute statistics accumulated for the layer schema metadata.
#[derive(Debug, Clone, Default)]
pub struct AttrStats {
    /// Bitmask over [`AttrValue::type_byte`] values seen.
    pub type_mask: u16,
    /// First distinct values, capped at [`MAX_SAMPLE_VALUES`].
    pub sample_values: Vec<AttrValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

pub const MAX_SAMPLE_VALUES: usize = 1000;
pub const MAX_CATALOGUED_ATTRIBUTES: usize = 1000;

impl AttrStats {
    pub fn observe(&mut self, value: &AttrValue) {
        self.type_mask |= 1 << value.type_byte();
        if let Some(n) = value.as_f64() {
            self.min = Some(self.min.map_or(n, |m| m.min(n)));
            self.max = Some(self.max.map_or(n, |m| m.max(n)));
        }
        if self.sample_values.len() < MAX_SAMPLE_VALUES && !self.sample_values.contains(value) {
            self.sample_values.push(value.clone());
        }
    }

    /// The tilejson-style type name for this attribute.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        let numeric = self.type_mask & (1 << 3 | 1 << 4 | 1 << 5) != 0;
        let string = self.type_mask & (1 << 1) != 0;
        let boolean = self.type_mask & (1 << 7) != 0;
        match (string, numeric, boolean) {
            (true, false, false) => "String",
            (false, true, false) => "Number",
            (false, false, true) => "Boolean",
            _ => "Mixed",
        }
    }
}

/// Per-layer entry of the layer catalogue.
#[derive(Debug, Clone)]
pub struct LayerEntry {
    pub id: usize,
    /// Zoom range over which this layer was actually emitted.
    pub minzoom: u8,
    pub maxzoom: u8,
    pub attributes: BTreeMap<String, AttrStats>,
    /// Features written per geometry class, for tilestats.
    pub point_count: u64,
    pub line_count: u64,
    pub polygon_count: u64,
}

impl LayerEntry {
    #[must_use]
    pub fn new(id: usize) -> Self {
        Self {
            id,
            minzoom: u8::MAX,
            maxzoom: 0,
            attributes: BTreeMap::new(),
            point_count: 0,
            line_count: 0,
            polygon_count: 0,
        }
    }

    pub fn observe_feature(&mut self, ty: FeatureType, attrs: &[(String, AttrValue)]) {
        match ty {
            FeatureType::Point => self.point_count += 1,
            FeatureType::Line => self.line_count += 1,
            FeatureType::Polygon => self.polygon_count += 1,
        }
        for (key, value) in attrs {
            if self.attributes.len() >= MAX_CATALOGUED_ATTRIBUTES
                && !self.attributes.contains_key(key)
            {
                continue;
            }
            self.attributes.entry(key.clone()).or_default().observe(value);
        }
    }
}

/// Layer name -> catalogue entry, ordered for stable metadata output.
pub type LayerMap = BTreeMap<String, LayerEntry>;

/// Merge per-segment catalogues into one, re-assigning ids in name order.
#[must_use]
pub fn merge_layer_maps(maps: &[LayerMap]) -> LayerMap {
    let mut merged = LayerMap::new();
    for map in maps {
        for (name, entry) in map {
            let target = merged
                .entry(name.clone())
                .or_insert_with(|| LayerEntry::new(0));
            target.minzoom = target.minzoom.min(entry.minzoom);
            target.maxzoom = target.maxzoom.max(entry.maxzoom);
            target.point_count += entry.point_count;
            target.line_count += entry.line_count;
            target.polygon_count += entry.polygon_count;
            for (attr, stats) in &entry.attributes {
                if target.attributes.len() >= MAX_CATALOGUED_ATTRIBUTES
                    && !target.attributes.contains_key(attr)
                {
                    continue;
                }
                let t = target.attributes.entry(attr.clone()).or_default();
                t.type_mask |= stats.type_mask;
                t.min = match (t.min, stats.min) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                t.max = match (t.max, stats.max) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                for v in &stats.sample_values {
                    if t.sample_values.len() >= MAX_SAMPLE_VALUES {
                        break;
                    }
                    if !t.sample_values.contains(v) {
                        t.sample_values.push(v.clone());
                    }
                }
            }
        }
    }
    for (i, entry) in merged.values_mut().enumerate() {
        entry.id = i;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_value_pool_roundtrip() {
        for v in [
            AttrValue::String("hello".into()),
            AttrValue::Double(2.5),
            AttrValue::Int(-7),
            AttrValue::Uint(u64::MAX),
            AttrValue::Bool(true),
            AttrValue::Null,
        ] {
            let restored = AttrValue::from_pool(v.type_byte(), &v.to_pool_string());
            assert_eq!(restored, v);
        }
    }

    #[test]
    fn test_whole_doubles_intern_like_ints() {
        assert_eq!(
            AttrValue::Double(3.0).to_pool_string(),
            AttrValue::Int(3).to_pool_string()
        );
    }

    #[test]
    fn test_big_int_attr_keeps_precision() {
        let v = AttrValue::Int(1_234_567_890_123);
        match v.to_mvt() {
            tilery_tile_utils::mvt::MvtValue::Int(i) => assert_eq!(i, 1_234_567_890_123),
            other => panic!("unexpected encoding {other:?}"),
        }
    }

    #[test]
    fn test_layer_merge_assigns_ids_in_name_order() {
        let mut a = LayerMap::new();
        a.insert("roads".into(), LayerEntry::new(3));
        let mut b = LayerMap::new();
        b.insert("buildings".into(), LayerEntry::new(9));
        let merged = merge_layer_maps(&[a, b]);
        assert_eq!(merged["buildings"].id, 0);
        assert_eq!(merged["roads"].id, 1);
    }

    #[test]
    fn test_attr_stats() {
        let mut stats = AttrStats::default();
        stats.observe(&AttrValue::Int(5));
        stats.observe(&AttrValue::Int(9));
        stats.observe(&AttrValue::Int(5));
        assert_eq!(stats.min, Some(5.0));
        assert_eq!(stats.max, Some(9.0));
        assert_eq!(stats.sample_values.len(), 2);
        assert_eq!(stats.type_name(), "Number");
        stats.observe(&AttrValue::String("x".into()));
        assert_eq!(stats.type_name(), "Mixed");
    }
}
