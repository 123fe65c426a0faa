//! In-memory model and wire codec for Mapbox Vector Tiles (spec v2).
//!
//! The encoder consumes draw vectors in tile-local integer coordinates and
//! produces the protobuf layer/feature/value structure with run-length
//! encoded geometry commands. The decoder is the exact inverse and is used
//! by tile joining and by round-trip tests.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use prost::Message as _;

pub mod vector_tile;

pub use vector_tile::tile::GeomType;
use vector_tile::{Tile, tile as vt};

/// The only vector-tile version this codec produces and accepts.
pub const MVT_VERSION: u32 = 2;

#[derive(thiserror::Error, Debug)]
pub enum MvtError {
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error("Unsupported vector tile layer version {0} in layer {1}")]
    UnsupportedVersion(u32, String),

    #[error("Invalid geometry command {0}")]
    InvalidGeometryCommand(u32),

    #[error("Geometry command stream ended inside a {0}-point run")]
    TruncatedGeometry(u32),

    #[error("Feature tags of layer {0} do not come in key/value pairs")]
    UnpairedTag(String),

    #[error("Feature tag index {0} is out of range for layer {1}")]
    TagOutOfRange(u32, String),
}

/// Geometry operation of one [`Draw`] coordinate.
///
/// `End` never appears in an encoded tile; it terminates draw vectors in
/// the tiler's temporary streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DrawOp {
    End = 0,
    MoveTo = 1,
    LineTo = 2,
    ClosePath = 7,
}

impl DrawOp {
    #[must_use]
    pub fn from_command(cmd: u32) -> Option<Self> {
        match cmd {
            1 => Some(Self::MoveTo),
            2 => Some(Self::LineTo),
            7 => Some(Self::ClosePath),
            _ => None,
        }
    }
}

/// A tagged coordinate: one geometry operation plus its target point.
///
/// `necessary` marks vertices that simplification is forbidden to drop
/// (ring endpoints, tile-boundary crossings, shared-border nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub op: DrawOp,
    pub x: i64,
    pub y: i64,
    pub necessary: bool,
}

impl Draw {
    #[must_use]
    pub fn new(op: DrawOp, x: i64, y: i64) -> Self {
        Self {
            op,
            x,
            y,
            necessary: false,
        }
    }
}

/// One geometry of a single feature, in drawing order.
pub type DrawVec = Vec<Draw>;

/// An attribute value with its explicit wire type.
#[derive(Debug, Clone)]
pub enum MvtValue {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    Uint(u64),
    Sint(i64),
    Bool(bool),
    Null,
}

// Values are interned per layer, which needs bit-exact float equality
// rather than IEEE semantics (NaN == NaN here).
impl PartialEq for MvtValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Int(a), Self::Int(b)) | (Self::Sint(a), Self::Sint(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Null, Self::Null) => true,
            _ => false,
        }
    }
}

impl Eq for MvtValue {}

impl Hash for MvtValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::String(s) => s.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Double(f) => f.to_bits().hash(state),
            Self::Int(i) | Self::Sint(i) => i.hash(state),
            Self::Uint(u) => u.hash(state),
            Self::Bool(b) => b.hash(state),
            Self::Null => {}
        }
    }
}

impl std::fmt::Display for MvtValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Int(v) | Self::Sint(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MvtFeature {
    pub id: Option<u64>,
    pub geom_type: GeomType,
    /// Key/value index pairs into the owning layer's pools.
    pub tags: Vec<u32>,
    pub geometry: DrawVec,
}

/// A layer under construction, with its key and value interning pools.
#[derive(Debug, Clone, Default)]
pub struct MvtLayer {
    pub name: String,
    pub extent: u32,
    pub features: Vec<MvtFeature>,
    pub keys: Vec<String>,
    pub values: Vec<MvtValue>,
    key_index: HashMap<String, u32>,
    value_index: HashMap<MvtValue, u32>,
}

impl MvtLayer {
    #[must_use]
    pub fn new(name: impl Into<String>, extent: u32) -> Self {
        Self {
            name: name.into(),
            extent,
            ..Self::default()
        }
    }

    /// Intern a key into the layer-local key pool.
    pub fn tag_key(&mut self, key: &str) -> u32 {
        if let Some(&i) = self.key_index.get(key) {
            return i;
        }
        let i = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), i);
        i
    }

    /// Intern a value into the layer-local value pool.
    pub fn tag_value(&mut self, value: &MvtValue) -> u32 {
        if let Some(&i) = self.value_index.get(value) {
            return i;
        }
        let i = self.values.len() as u32;
        self.values.push(value.clone());
        self.value_index.insert(value.clone(), i);
        i
    }

    /// Attach an attribute to a feature of this layer.
    pub fn tag(&mut self, feature: &mut MvtFeature, key: &str, value: &MvtValue) {
        let k = self.tag_key(key);
        let v = self.tag_value(value);
        feature.tags.push(k);
        feature.tags.push(v);
    }
}

fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Run-length encode a draw vector into MVT geometry commands,
/// `(op | count << 3)` followed by zigzag deltas.
#[must_use]
pub fn encode_geometry(ops: &[Draw]) -> Vec<u32> {
    let mut out = Vec::with_capacity(ops.len() * 2);
    let (mut px, mut py) = (0_i64, 0_i64);
    let mut i = 0;
    while i < ops.len() {
        let op = ops[i].op;
        let mut run = 1;
        while i + run < ops.len() && ops[i + run].op == op {
            run += 1;
        }
        out.push(op as u32 | (run as u32) << 3);
        if matches!(op, DrawOp::MoveTo | DrawOp::LineTo) {
            for d in &ops[i..i + run] {
                out.push(zigzag(d.x - px) as u32);
                out.push(zigzag(d.y - py) as u32);
                px = d.x;
                py = d.y;
            }
        }
        i += run;
    }
    out
}

/// Decode MVT geometry commands back into a draw vector with
/// absolute coordinates.
pub fn decode_geometry(commands: &[u32]) -> Result<DrawVec, MvtError> {
    let mut out = DrawVec::new();
    let (mut px, mut py) = (0_i64, 0_i64);
    let mut it = commands.iter().copied();
    while let Some(cmd) = it.next() {
        let op = DrawOp::from_command(cmd & 7).ok_or(MvtError::InvalidGeometryCommand(cmd))?;
        let count = cmd >> 3;
        for _ in 0..count {
            if matches!(op, DrawOp::MoveTo | DrawOp::LineTo) {
                let dx = it.next().ok_or(MvtError::TruncatedGeometry(count))?;
                let dy = it.next().ok_or(MvtError::TruncatedGeometry(count))?;
                px += unzigzag(u64::from(dx));
                py += unzigzag(u64::from(dy));
                out.push(Draw::new(op, px, py));
            } else {
                out.push(Draw::new(op, px, py));
            }
        }
    }
    Ok(out)
}

fn to_wire_value(value: &MvtValue) -> vt::Value {
    let mut v = vt::Value::default();
    match value {
        MvtValue::String(s) => v.string_value = Some(s.clone()),
        MvtValue::Float(f) => v.float_value = Some(*f),
        MvtValue::Double(f) => v.double_value = Some(*f),
        MvtValue::Int(i) => v.int_value = Some(*i),
        MvtValue::Uint(u) => v.uint_value = Some(*u),
        MvtValue::Sint(i) => v.sint_value = Some(*i),
        MvtValue::Bool(b) => v.bool_value = Some(*b),
        // A null has no slot on the wire; an empty Value decodes back to Null
        MvtValue::Null => {}
    }
    v
}

fn from_wire_value(v: &vt::Value) -> MvtValue {
    if let Some(s) = &v.string_value {
        MvtValue::String(s.clone())
    } else if let Some(f) = v.float_value {
        MvtValue::Float(f)
    } else if let Some(f) = v.double_value {
        MvtValue::Double(f)
    } else if let Some(i) = v.int_value {
        MvtValue::Int(i)
    } else if let Some(u) = v.uint_value {
        MvtValue::Uint(u)
    } else if let Some(i) = v.sint_value {
        MvtValue::Sint(i)
    } else if let Some(b) = v.bool_value {
        MvtValue::Bool(b)
    } else {
        MvtValue::Null
    }
}

/// Serialize layers into one protobuf tile. Layers without features are
/// skipped.
#[must_use]
pub fn encode_tile(layers: &[MvtLayer]) -> Vec<u8> {
    let tile = Tile {
        layers: layers
            .iter()
            .filter(|layer| !layer.features.is_empty())
            .map(|layer| vt::Layer {
                version: MVT_VERSION,
                name: layer.name.clone(),
                features: layer
                    .features
                    .iter()
                    .map(|f| vt::Feature {
                        id: f.id,
                        tags: f.tags.clone(),
                        r#type: Some(f.geom_type as i32),
                        geometry: encode_geometry(&f.geometry),
                    })
                    .collect(),
                keys: layer.keys.clone(),
                values: layer.values.iter().map(to_wire_value).collect(),
                extent: Some(layer.extent),
            })
            .collect(),
    };
    tile.encode_to_vec()
}

/// Parse an (uncompressed) protobuf tile back into layers with populated
/// interning pools, so decoded layers can be extended and re-encoded.
pub fn decode_tile(data: &[u8]) -> Result<Vec<MvtLayer>, MvtError> {
    let tile = Tile::decode(data)?;
    let mut layers = Vec::with_capacity(tile.layers.len());
    for wire in tile.layers {
        if wire.version > MVT_VERSION {
            return Err(MvtError::UnsupportedVersion(wire.version, wire.name));
        }
        let mut layer = MvtLayer::new(wire.name, wire.extent.unwrap_or(4096));
        for key in wire.keys {
            layer.tag_key(&key);
        }
        for value in &wire.values {
            layer.tag_value(&from_wire_value(value));
        }
        for f in wire.features {
            if f.tags.len() % 2 != 0 {
                return Err(MvtError::UnpairedTag(layer.name.clone()));
            }
            for pair in f.tags.chunks_exact(2) {
                if pair[0] as usize >= layer.keys.len() {
                    return Err(MvtError::TagOutOfRange(pair[0], layer.name.clone()));
                }
                if pair[1] as usize >= layer.values.len() {
                    return Err(MvtError::TagOutOfRange(pair[1], layer.name.clone()));
                }
            }
            layer.features.push(MvtFeature {
                id: f.id,
                geom_type: GeomType::try_from(f.r#type.unwrap_or(0))
                    .unwrap_or(GeomType::Unknown),
                tags: f.tags,
                geometry: decode_geometry(&f.geometry)?,
            });
        }
        layers.push(layer);
    }
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: i64, y0: i64, side: i64) -> DrawVec {
        vec![
            Draw::new(DrawOp::MoveTo, x0, y0),
            Draw::new(DrawOp::LineTo, x0 + side, y0),
            Draw::new(DrawOp::LineTo, x0 + side, y0 + side),
            Draw::new(DrawOp::LineTo, x0, y0 + side),
            Draw::new(DrawOp::ClosePath, x0, y0 + side),
        ]
    }

    #[test]
    fn test_square_command_stream() {
        let cmds = encode_geometry(&square(10, 10, 10));
        // MoveTo(10,10), a LineTo run of length 3, ClosePath
        assert_eq!(
            cmds,
            vec![
                (1 | 1 << 3),
                20,
                20, // (10, 10) zigzagged
                (2 | 3 << 3),
                20,
                0,
                0,
                20,
                19,
                0, // (+10,0) (0,+10) (-10,0)
                (7 | 1 << 3),
            ]
        );
    }

    #[test]
    fn test_geometry_roundtrip() {
        let geom = square(10, 10, 10);
        let decoded = decode_geometry(&encode_geometry(&geom)).unwrap();
        assert_eq!(decoded.len(), geom.len());
        for (a, b) in geom.iter().zip(&decoded) {
            assert_eq!(a.op, b.op);
            if a.op != DrawOp::ClosePath {
                assert_eq!((a.x, a.y), (b.x, b.y));
            }
        }
    }

    #[test]
    fn test_tile_roundtrip() {
        let mut layer = MvtLayer::new("roads", 4096);
        let mut f = MvtFeature {
            id: Some(42),
            geom_type: GeomType::Polygon,
            tags: vec![],
            geometry: square(0, 0, 100),
        };
        layer.tag(&mut f, "kind", &MvtValue::String("park".into()));
        layer.tag(&mut f, "pop", &MvtValue::Int(1_234_567_890_123));
        layer.tag(&mut f, "big", &MvtValue::Uint(u64::MAX));
        layer.features.push(f);

        let decoded = decode_tile(&encode_tile(&[layer])).unwrap();
        assert_eq!(decoded.len(), 1);
        let layer = &decoded[0];
        assert_eq!(layer.name, "roads");
        assert_eq!(layer.extent, 4096);
        let f = &layer.features[0];
        assert_eq!(f.id, Some(42));
        assert_eq!(f.geom_type, GeomType::Polygon);
        assert_eq!(f.tags.len(), 6);
        assert_eq!(
            layer.values[f.tags[3] as usize],
            MvtValue::Int(1_234_567_890_123)
        );
        assert_eq!(layer.values[f.tags[5] as usize], MvtValue::Uint(u64::MAX));
    }

    #[test]
    fn test_value_interning_dedupes() {
        let mut layer = MvtLayer::new("l", 4096);
        let a = layer.tag_value(&MvtValue::Double(2.5));
        let b = layer.tag_value(&MvtValue::Double(2.5));
        let c = layer.tag_value(&MvtValue::Double(-2.5));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(layer.values.len(), 2);
    }

    #[test]
    fn test_empty_layer_is_skipped() {
        let layer = MvtLayer::new("empty", 4096);
        let decoded = decode_tile(&encode_tile(&[layer])).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_tile(b"not a protobuf tile").is_err());
    }
}
