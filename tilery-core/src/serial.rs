//! The serial feature format used in every temporary stream.
//!
//! A record is fully self-delimiting. Its first byte is the feature's
//! computed minzoom, deliberately at a fixed position so the
//! minzoom-assignment pass can rewrite it in place. A header varint
//! records which optional fields follow. Geometry is delta-coded against
//! the owning segment's origin, which is fixed at the first `MoveTo` the
//! segment ever saw and stored once per segment, not per record.

use std::io::{self, Read, Write};

use crate::feature::FeatureType;
use crate::geometry::{Draw, DrawOp, DrawVec};
use crate::varint::{VarintReader, VarintWriter};

const FLAG_HAS_ID: u64 = 1;
const FLAG_HAS_MINZOOM: u64 = 1 << 1;
const FLAG_HAS_MAXZOOM: u64 = 1 << 2;
const FLAG_REF_ATTRS: u64 = 1 << 3;
const TYPE_SHIFT: u32 = 4;

/// Attribute storage: inlined pool-offset pairs for small features, or a
/// reference into the segment's attribute side file for features big
/// enough to amortize repetition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialAttrs {
    Inline(Vec<(u64, u64)>),
    Referenced { off: u64, count: u64 },
}

impl SerialAttrs {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Inline(pairs) => pairs.len(),
            Self::Referenced { count, .. } => *count as usize,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct SerialFeature {
    pub feature_minzoom: u8,
    pub geom_type: FeatureType,
    pub layer: u64,
    pub seq: u64,
    /// Which ingest worker wrote this record; selects the delta origin,
    /// string pool and layer catalogue.
    pub segment: u16,
    pub id: Option<u64>,
    pub minzoom: Option<u8>,
    pub maxzoom: Option<u8>,
    /// Space-filling-curve key of the bbox center.
    pub index: u64,
    /// Signed area (polygons) or length (lines) in world units.
    pub extent: i64,
    pub bbox: [i64; 4],
    pub geometry: DrawVec,
    pub attrs: SerialAttrs,
}

/// Write one record; returns the byte offset it starts at.
pub fn write_serial_feature<W: Write>(
    w: &mut VarintWriter<W>,
    sf: &SerialFeature,
    origin: (i64, i64),
    scale: u32,
) -> io::Result<u64> {
    let start = w.position();
    w.write_byte(sf.feature_minzoom)?;

    let mut flags = (sf.geom_type as u64) << TYPE_SHIFT;
    if sf.id.is_some() {
        flags |= FLAG_HAS_ID;
    }
    if sf.minzoom.is_some() {
        flags |= FLAG_HAS_MINZOOM;
    }
    if sf.maxzoom.is_some() {
        flags |= FLAG_HAS_MAXZOOM;
    }
    if matches!(sf.attrs, SerialAttrs::Referenced { .. }) {
        flags |= FLAG_REF_ATTRS;
    }
    w.write_varint(flags)?;
    w.write_varint(sf.layer)?;
    w.write_varint(sf.seq)?;
    if let Some(id) = sf.id {
        w.write_varint(id)?;
    }
    if let Some(z) = sf.minzoom {
        w.write_varint(u64::from(z))?;
    }
    if let Some(z) = sf.maxzoom {
        w.write_varint(u64::from(z))?;
    }
    w.write_varint(sf.index)?;
    w.write_svarint(sf.extent)?;
    for v in sf.bbox {
        w.write_svarint(v)?;
    }

    let (mut px, mut py) = origin;
    for d in &sf.geometry {
        w.write_byte(d.op as u8)?;
        if matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo) {
            let (x, y) = (d.x >> scale, d.y >> scale);
            w.write_svarint(x - px)?;
            w.write_svarint(y - py)?;
            px = x;
            py = y;
        }
    }
    w.write_byte(DrawOp::End as u8)?;

    match &sf.attrs {
        SerialAttrs::Inline(pairs) => {
            w.write_varint(pairs.len() as u64)?;
            for (k, v) in pairs {
                w.write_varint(*k)?;
                w.write_varint(*v)?;
            }
        }
        SerialAttrs::Referenced { off, count } => {
            w.write_varint(*off)?;
            w.write_varint(*count)?;
        }
    }
    Ok(start)
}

/// Read one record starting at the reader's current position.
pub fn read_serial_feature<R: Read>(
    r: &mut VarintReader<R>,
    segment: u16,
    origin: (i64, i64),
    scale: u32,
) -> io::Result<SerialFeature> {
    let feature_minzoom = r.read_byte()?;
    let flags = r.read_varint()?;
    let geom_type = FeatureType::from_u8(((flags >> TYPE_SHIFT) & 3) as u8).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "bad geometry type in record")
    })?;
    let layer = r.read_varint()?;
    let seq = r.read_varint()?;
    let id = (flags & FLAG_HAS_ID != 0)
        .then(|| r.read_varint())
        .transpose()?;
    let minzoom = (flags & FLAG_HAS_MINZOOM != 0)
        .then(|| r.read_varint())
        .transpose()?
        .map(|z| z as u8);
    let maxzoom = (flags & FLAG_HAS_MAXZOOM != 0)
        .then(|| r.read_varint())
        .transpose()?
        .map(|z| z as u8);
    let index = r.read_varint()?;
    let extent = r.read_svarint()?;
    let mut bbox = [0_i64; 4];
    for v in &mut bbox {
        *v = r.read_svarint()?;
    }

    let mut geometry = DrawVec::new();
    let (mut px, mut py) = origin;
    loop {
        let op = r.read_byte()?;
        match op {
            op if op == DrawOp::End as u8 => break,
            op if op == DrawOp::MoveTo as u8 || op == DrawOp::LineTo as u8 => {
                px += r.read_svarint()?;
                py += r.read_svarint()?;
                let kind = if op == DrawOp::MoveTo as u8 {
                    DrawOp::MoveTo
                } else {
                    DrawOp::LineTo
                };
                geometry.push(Draw::new(kind, px << scale, py << scale));
            }
            op if op == DrawOp::ClosePath as u8 => {
                geometry.push(Draw::new(DrawOp::ClosePath, 0, 0));
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad geometry op {other} in record"),
                ));
            }
        }
    }

    let attrs = if flags & FLAG_REF_ATTRS != 0 {
        SerialAttrs::Referenced {
            off: r.read_varint()?,
            count: r.read_varint()?,
        }
    } else {
        let count = r.read_varint()?;
        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            pairs.push((r.read_varint()?, r.read_varint()?));
        }
        SerialAttrs::Inline(pairs)
    };

    Ok(SerialFeature {
        feature_minzoom,
        geom_type,
        layer,
        seq,
        segment,
        id,
        minzoom,
        maxzoom,
        index,
        extent,
        bbox,
        geometry,
        attrs,
    })
}

/// The fixed-size sort record: 32 bytes addressing one feature in its
/// geometry file. `seq` is capped at 46 bits and `segment` at 15, which
/// also caps the worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub start: u64,
    pub end: u64,
    pub index: u64,
    pub segment: u16,
    pub geom_type: FeatureType,
    pub seq: u64,
}

pub const INDEX_RECORD_SIZE: usize = 32;

const SEQ_MASK: u64 = (1 << 46) - 1;

impl IndexRecord {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; INDEX_RECORD_SIZE] {
        let packed = (self.seq & SEQ_MASK)
            | ((self.geom_type as u64) << 46)
            | (u64::from(self.segment) << 48);
        let mut buf = [0_u8; INDEX_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.start.to_le_bytes());
        buf[8..16].copy_from_slice(&self.end.to_le_bytes());
        buf[16..24].copy_from_slice(&self.index.to_le_bytes());
        buf[24..32].copy_from_slice(&packed.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_RECORD_SIZE]) -> io::Result<Self> {
        let start = u64::from_le_bytes(buf[0..8].try_into().expect("8 bytes"));
        let end = u64::from_le_bytes(buf[8..16].try_into().expect("8 bytes"));
        let index = u64::from_le_bytes(buf[16..24].try_into().expect("8 bytes"));
        let packed = u64::from_le_bytes(buf[24..32].try_into().expect("8 bytes"));
        let geom_type = FeatureType::from_u8(((packed >> 46) & 3) as u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad type in index"))?;
        Ok(Self {
            start,
            end,
            index,
            segment: (packed >> 48) as u16,
            geom_type,
            seq: packed & SEQ_MASK,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::{VarintReader, VarintWriter};

    fn sample_feature() -> SerialFeature {
        SerialFeature {
            feature_minzoom: 3,
            geom_type: FeatureType::Line,
            layer: 2,
            seq: 17,
            segment: 1,
            id: Some(99),
            minzoom: None,
            maxzoom: Some(12),
            index: 0xABCD_EF01_2345,
            extent: -1024,
            bbox: [100, 200, 5000, 6000],
            geometry: vec![
                Draw::new(DrawOp::MoveTo, 100, 200),
                Draw::new(DrawOp::LineTo, 5000, 6000),
                Draw::new(DrawOp::LineTo, 4000, 6000),
            ],
            attrs: SerialAttrs::Inline(vec![(0, 6), (12, 20)]),
        }
    }

    #[test]
    fn test_roundtrip() {
        let sf = sample_feature();
        let mut w = VarintWriter::new(Vec::new());
        let origin = (50, 50);
        let start = write_serial_feature(&mut w, &sf, origin, 0).unwrap();
        assert_eq!(start, 0);
        let bytes = w.into_inner();

        let mut r = VarintReader::new(bytes.as_slice());
        let back = read_serial_feature(&mut r, 1, origin, 0).unwrap();
        assert_eq!(back.feature_minzoom, 3);
        assert_eq!(back.geom_type, FeatureType::Line);
        assert_eq!(back.layer, 2);
        assert_eq!(back.seq, 17);
        assert_eq!(back.id, Some(99));
        assert_eq!(back.minzoom, None);
        assert_eq!(back.maxzoom, Some(12));
        assert_eq!(back.index, sf.index);
        assert_eq!(back.extent, -1024);
        assert_eq!(back.bbox, sf.bbox);
        assert_eq!(back.geometry, sf.geometry);
        assert_eq!(back.attrs, sf.attrs);
        assert_eq!(r.position(), bytes.len() as u64);
    }

    #[test]
    fn test_two_records_back_to_back() {
        let mut sf = sample_feature();
        let mut w = VarintWriter::new(Vec::new());
        let s1 = write_serial_feature(&mut w, &sf, (0, 0), 0).unwrap();
        sf.seq = 18;
        let s2 = write_serial_feature(&mut w, &sf, (0, 0), 0).unwrap();
        assert_eq!(s1, 0);
        assert!(s2 > 0);
        let bytes = w.into_inner();
        let mut r = VarintReader::new(bytes.as_slice());
        assert_eq!(read_serial_feature(&mut r, 0, (0, 0), 0).unwrap().seq, 17);
        assert_eq!(r.position(), s2);
        assert_eq!(read_serial_feature(&mut r, 0, (0, 0), 0).unwrap().seq, 18);
    }

    #[test]
    fn test_minzoom_byte_is_first() {
        let sf = sample_feature();
        let mut w = VarintWriter::new(Vec::new());
        write_serial_feature(&mut w, &sf, (0, 0), 0).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes[0], 3);
    }

    #[test]
    fn test_geometry_scale_quantizes() {
        let sf = SerialFeature {
            geometry: vec![Draw::new(DrawOp::MoveTo, 1027, 2051)],
            bbox: [1027, 2051, 1027, 2051],
            ..sample_feature()
        };
        let mut w = VarintWriter::new(Vec::new());
        write_serial_feature(&mut w, &sf, (0, 0), 2).unwrap();
        let bytes = w.into_inner();
        let mut r = VarintReader::new(bytes.as_slice());
        let back = read_serial_feature(&mut r, 0, (0, 0), 2).unwrap();
        assert_eq!((back.geometry[0].x, back.geometry[0].y), (1024, 2048));
    }

    #[test]
    fn test_index_record_roundtrip() {
        let rec = IndexRecord {
            start: 1234,
            end: 5678,
            index: u64::MAX,
            segment: 32_000,
            geom_type: FeatureType::Polygon,
            seq: (1 << 46) - 1,
        };
        let back = IndexRecord::from_bytes(&rec.to_bytes()).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_referenced_attrs_roundtrip() {
        let sf = SerialFeature {
            attrs: SerialAttrs::Referenced { off: 777, count: 3 },
            ..sample_feature()
        };
        let mut w = VarintWriter::new(Vec::new());
        write_serial_feature(&mut w, &sf, (0, 0), 0).unwrap();
        let bytes = w.into_inner();
        let mut r = VarintReader::new(bytes.as_slice());
        let back = read_serial_feature(&mut r, 0, (0, 0), 0).unwrap();
        assert_eq!(back.attrs, SerialAttrs::Referenced { off: 777, count: 3 });
    }
}
