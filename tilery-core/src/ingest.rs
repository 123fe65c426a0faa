//! Ingest stage: one worker per input segment turns parsed features into
//! serial records.
//!
//! Each worker owns its temp files outright (geometry, fixed-size index,
//! string pool, attribute side file) and writes them without any
//! synchronization; only the disk-usage watchdog shares an atomic
//! counter across workers.

use std::fs::File;
use std::io::{BufWriter, Seek as _, Write as _};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::warn;
use tilery_tile_utils::{WORLD_EXTENT, lonlat_to_world};

use crate::config::Config;
use crate::curve;
use crate::error::{CoreError, CoreResult};
use crate::feature::{AttrValue, FeatureType, LayerEntry, LayerMap, ParsedFeature};
use crate::filter::FilterFeature;
use crate::geometry::{Draw, DrawOp, DrawVec, fix_polygon, get_area, get_bbox, get_length, ring_ranges};
use crate::memfile::MemFile;
use crate::pool::StringPool;
use crate::serial::{IndexRecord, SerialAttrs, SerialFeature, write_serial_feature};
use crate::varint::VarintWriter;

/// How often the disk watchdog looks at cumulative temp usage.
const DENSITY_CHECK_INTERVAL: u64 = 10_000;

/// An unclipped feature may span at most this many tiles at maxzoom.
const PREVENT_CLIPPING_TILE_LIMIT: u64 = 10_000;

/// Everything one ingest worker hands to the rest of the pipeline.
pub struct SegmentOutput {
    pub geom: File,
    pub index: File,
    pub pool: StringPool,
    /// Referenced-attribute side file: 16-byte `(key_off, val_off)` pairs.
    pub meta: MemFile,
    pub origin: (i64, i64),
    pub layer_map: LayerMap,
    /// Layer id -> name, for this segment's records.
    pub layer_names: Vec<String>,
    pub bbox: [i64; 4],
    pub feature_count: u64,
}

impl SegmentOutput {
    /// Resolve a record's attribute storage to pool offset pairs.
    #[must_use]
    pub fn attr_pairs(&self, attrs: &SerialAttrs) -> Vec<(u64, u64)> {
        match attrs {
            SerialAttrs::Inline(pairs) => pairs.clone(),
            SerialAttrs::Referenced { off, count } => (0..*count)
                .map(|i| {
                    let base = off + i * 16;
                    (self.meta.read_u64(base), self.meta.read_u64(base + 8))
                })
                .collect(),
        }
    }
}

pub struct IngestWorker<'a> {
    config: &'a Config,
    segment: u16,
    segments_total: u64,
    geom: VarintWriter<BufWriter<File>>,
    index: BufWriter<File>,
    index_len: u64,
    pool: StringPool,
    meta: MemFile,
    origin: Option<(i64, i64)>,
    layer_ids: Vec<String>,
    layer_map: LayerMap,
    bbox: [i64; 4],
    seq: u64,
    feature_count: u64,
    reported_bytes: u64,
    disk_used: &'a AtomicU64,
    disk_warned: &'a AtomicBool,
}

impl<'a> IngestWorker<'a> {
    pub fn new(
        config: &'a Config,
        segment: u16,
        segments_total: usize,
        disk_used: &'a AtomicU64,
        disk_warned: &'a AtomicBool,
    ) -> CoreResult<Self> {
        Ok(Self {
            config,
            segment,
            segments_total: segments_total as u64,
            geom: VarintWriter::new(BufWriter::new(tempfile::tempfile_in(&config.tmp_dir)?)),
            index: BufWriter::new(tempfile::tempfile_in(&config.tmp_dir)?),
            index_len: 0,
            pool: StringPool::create_in(&config.tmp_dir)?,
            meta: MemFile::create_in(&config.tmp_dir)?,
            origin: None,
            layer_ids: Vec::new(),
            layer_map: LayerMap::new(),
            bbox: [i64::MAX, i64::MAX, i64::MIN, i64::MIN],
            seq: 0,
            feature_count: 0,
            reported_bytes: 0,
            disk_used,
            disk_warned,
        })
    }

    /// Serialize one parsed feature; returns whether it was kept.
    pub fn serialize_feature(&mut self, pf: &ParsedFeature) -> CoreResult<bool> {
        let Some((geom_type, mut geometry)) = project_geometry(&pf.geometry) else {
            warn!("Dropping feature with empty or unsupported geometry");
            return Ok(false);
        };

        if self.config.detect_wraparound && geom_type != FeatureType::Point {
            unwrap_antimeridian(&mut geometry);
        }
        if geom_type == FeatureType::Polygon {
            geometry = fix_polygon(&geometry);
        }
        if geometry.is_empty() {
            warn!("Dropping feature whose geometry vanished during fix-up");
            return Ok(false);
        }

        let bbox = get_bbox(&geometry);
        if self.config.prevent_clipping {
            let span = (bbox[2] - bbox[0]).max(bbox[3] - bbox[1]).max(0) as u64
                / (1_u64 << (32 - u32::from(self.config.maxzoom)));
            if span > PREVENT_CLIPPING_TILE_LIMIT {
                return Err(CoreError::OversizeFeature(span));
            }
        }
        for i in 0..2 {
            self.bbox[i] = self.bbox[i].min(bbox[i]);
            self.bbox[i + 2] = self.bbox[i + 2].max(bbox[i + 2]);
        }

        let cx = ((bbox[0] + bbox[2]) / 2).clamp(0, WORLD_EXTENT - 1) as u32;
        let cy = ((bbox[1] + bbox[3]) / 2).clamp(0, WORLD_EXTENT - 1) as u32;
        let index = curve::encode(cx, cy);

        let layer_name = pf
            .layer
            .clone()
            .unwrap_or_else(|| self.config.default_layer.clone());
        let mut attrs = self.filter_attributes(pf);
        let keep = match &self.config.filter {
            Some(filters) if !filters.references("$zoom") => {
                let ff = FilterFeature {
                    attrs: &attrs,
                    id: pf.id,
                    geom_type,
                    zoom: None,
                };
                let mut exclusions = Vec::new();
                let keep = filters.keep(&layer_name, &ff, &mut exclusions);
                attrs.retain(|(k, _)| !exclusions.contains(k));
                keep
            }
            _ => true,
        };
        if !keep {
            return Ok(false);
        }

        let extent = match geom_type {
            FeatureType::Polygon => ring_ranges(&geometry)
                .iter()
                .map(|&(s, e)| get_area(&geometry, s, e))
                .sum::<f64>() as i64,
            FeatureType::Line => get_length(&geometry) as i64,
            FeatureType::Point => 0,
        };

        let mut pairs = Vec::with_capacity(attrs.len());
        for (key, value) in &attrs {
            let k = self.pool.intern(1, key)?;
            let v = self.pool.intern_value(value)?;
            pairs.push((k, v));
        }
        let span = (bbox[2] - bbox[0]).max(bbox[3] - bbox[1]);
        let serial_attrs = if span <= self.config.inline_attr_span() {
            SerialAttrs::Inline(pairs)
        } else {
            let count = pairs.len() as u64;
            let mut off = self.meta.len();
            for (i, (k, v)) in pairs.iter().enumerate() {
                let o = self.meta.append(&k.to_le_bytes())?;
                self.meta.append(&v.to_le_bytes())?;
                if i == 0 {
                    off = o;
                }
            }
            SerialAttrs::Referenced { off, count }
        };

        let layer = self.layer_id(&layer_name);
        self.layer_map
            .entry(layer_name)
            .or_insert_with(|| LayerEntry::new(layer as usize))
            .observe_feature(geom_type, &attrs);

        let scale = self.config.geometry_scale;
        if self.origin.is_none() {
            if let Some(first) = geometry.iter().find(|d| d.op == DrawOp::MoveTo) {
                self.origin = Some((first.x >> scale, first.y >> scale));
            }
        }
        let origin = self.origin.unwrap_or((0, 0));

        // An unwrapped dateline crossing sticks out past a world edge;
        // write a second copy shifted a full world over so the tiles on
        // the far side render their piece too.
        let mut shifts = vec![0_i64];
        if self.config.detect_wraparound {
            if bbox[2] >= WORLD_EXTENT {
                shifts.push(-WORLD_EXTENT);
            } else if bbox[0] < 0 {
                shifts.push(WORLD_EXTENT);
            }
        }

        for shift in shifts {
            let mut geometry = geometry.clone();
            let mut bbox = bbox;
            if shift != 0 {
                for d in &mut geometry {
                    if matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo) {
                        d.x += shift;
                    }
                }
                bbox[0] += shift;
                bbox[2] += shift;
            }
            let cx = ((bbox[0] + bbox[2]) / 2).clamp(0, WORLD_EXTENT - 1) as u32;
            let cy = ((bbox[1] + bbox[3]) / 2).clamp(0, WORLD_EXTENT - 1) as u32;
            let index = if shift == 0 { index } else { curve::encode(cx, cy) };

            let seq = self.seq * self.segments_total + u64::from(self.segment);
            self.seq += 1;
            let sf = SerialFeature {
                feature_minzoom: 0,
                geom_type,
                layer,
                seq,
                segment: self.segment,
                id: pf.id,
                minzoom: pf.minzoom,
                maxzoom: pf.maxzoom,
                index,
                extent,
                bbox,
                geometry,
                attrs: serial_attrs.clone(),
            };
            let start = write_serial_feature(&mut self.geom, &sf, origin, scale)?;
            let end = self.geom.position();

            let record = IndexRecord {
                start,
                end,
                index,
                segment: self.segment,
                geom_type,
                seq,
            };
            self.index.write_all(&record.to_bytes())?;
            self.index_len += crate::serial::INDEX_RECORD_SIZE as u64;
        }
        self.feature_count += 1;

        if self.feature_count % DENSITY_CHECK_INTERVAL == 0 {
            self.check_disk_usage(self.geom.position());
        }
        Ok(true)
    }

    fn layer_id(&mut self, name: &str) -> u64 {
        if let Some(pos) = self.layer_ids.iter().position(|n| n == name) {
            return pos as u64;
        }
        self.layer_ids.push(name.to_string());
        (self.layer_ids.len() - 1) as u64
    }

    fn filter_attributes(&self, pf: &ParsedFeature) -> Vec<(String, AttrValue)> {
        if self.config.exclude_all {
            return Vec::new();
        }
        pf.attributes
            .iter()
            .filter(|(k, _)| {
                if let Some(include) = &self.config.include {
                    include.contains(k)
                } else {
                    !self.config.exclude.contains(k)
                }
            })
            .cloned()
            .collect()
    }

    fn check_disk_usage(&mut self, written: u64) {
        let Some(budget) = self.config.temp_budget else {
            return;
        };
        let mine = written + self.index_len;
        let delta = mine - self.reported_bytes;
        self.reported_bytes = mine;
        let total = self.disk_used.fetch_add(delta, Ordering::Relaxed) + delta;
        if total > budget / 10 * 9 && !self.disk_warned.swap(true, Ordering::Relaxed) {
            warn!(
                "Temporary files are using {total} bytes, over 90% of the {budget} byte budget"
            );
        }
    }

    /// Flush and rewind, handing the files to the sort stage.
    pub fn finish(self) -> CoreResult<SegmentOutput> {
        let mut geom_writer = self.geom;
        geom_writer.flush()?;
        let mut geom = geom_writer
            .into_inner()
            .into_inner()
            .map_err(|e| CoreError::Io(e.into_error()))?;
        geom.rewind()?;
        let mut index = self
            .index
            .into_inner()
            .map_err(|e| CoreError::Io(e.into_error()))?;
        index.rewind()?;
        Ok(SegmentOutput {
            geom,
            index,
            pool: self.pool,
            meta: self.meta,
            origin: self.origin.unwrap_or((0, 0)),
            layer_map: self.layer_map,
            layer_names: self.layer_ids,
            bbox: self.bbox,
            feature_count: self.feature_count,
        })
    }
}

/// Project a parsed geometry onto the world plane as a draw vector.
fn project_geometry(geometry: &geo_types::Geometry<f64>) -> Option<(FeatureType, DrawVec)> {
    use geo_types::Geometry;

    let mut out = DrawVec::new();
    let geom_type = match geometry {
        Geometry::Point(p) => {
            push_point(&mut out, p.x(), p.y());
            FeatureType::Point
        }
        Geometry::MultiPoint(mp) => {
            for p in &mp.0 {
                push_point(&mut out, p.x(), p.y());
            }
            FeatureType::Point
        }
        Geometry::Line(l) => {
            push_line(&mut out, &[l.start, l.end]);
            FeatureType::Line
        }
        Geometry::LineString(ls) => {
            push_line(&mut out, &ls.0);
            FeatureType::Line
        }
        Geometry::MultiLineString(mls) => {
            for ls in &mls.0 {
                push_line(&mut out, &ls.0);
            }
            FeatureType::Line
        }
        Geometry::Polygon(p) => {
            push_polygon(&mut out, p);
            FeatureType::Polygon
        }
        Geometry::MultiPolygon(mp) => {
            for p in &mp.0 {
                push_polygon(&mut out, p);
            }
            FeatureType::Polygon
        }
        Geometry::Rect(r) => {
            push_polygon(&mut out, &r.to_polygon());
            FeatureType::Polygon
        }
        Geometry::Triangle(t) => {
            push_polygon(&mut out, &t.to_polygon());
            FeatureType::Polygon
        }
        Geometry::GeometryCollection(_) => return None,
    };
    if out.is_empty() {
        return None;
    }
    Some((geom_type, out))
}

fn warn_out_of_range_lat(lat: f64) {
    use std::sync::atomic::AtomicBool;
    static WARNED: AtomicBool = AtomicBool::new(false);
    if lat.abs() > tilery_tile_utils::LAT_LIMIT && !WARNED.swap(true, Ordering::Relaxed) {
        warn!("Latitude {lat} is out of range and will be clamped (warning given only once)");
    }
}

fn push_point(out: &mut DrawVec, lon: f64, lat: f64) {
    warn_out_of_range_lat(lat);
    let (x, y) = lonlat_to_world(lon, lat);
    out.push(Draw::new(DrawOp::MoveTo, x, y));
}

fn push_line(out: &mut DrawVec, coords: &[geo_types::Coord<f64>]) {
    for (i, c) in coords.iter().enumerate() {
        warn_out_of_range_lat(c.y);
        let (x, y) = lonlat_to_world(c.x, c.y);
        let op = if i == 0 { DrawOp::MoveTo } else { DrawOp::LineTo };
        out.push(Draw::new(op, x, y));
    }
}

fn push_polygon(out: &mut DrawVec, poly: &geo_types::Polygon<f64>) {
    push_line(out, &poly.exterior().0);
    for interior in poly.interiors() {
        push_line(out, &interior.0);
    }
    out.push(Draw::new(DrawOp::ClosePath, 0, 0));
}

/// Bring anti-meridian crossings into one continuous copy: whenever a
/// vertex lands more than half the world away from its predecessor, shift
/// it by a full world width. The first vertex of each feature is never
/// adjusted.
fn unwrap_antimeridian(geom: &mut DrawVec) {
    let mut prev: Option<i64> = None;
    for d in geom.iter_mut() {
        if !matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo) {
            continue;
        }
        if let Some(px) = prev {
            if d.x - px > WORLD_EXTENT / 2 {
                d.x -= WORLD_EXTENT;
            } else if px - d.x > WORLD_EXTENT / 2 {
                d.x += WORLD_EXTENT;
            }
        }
        prev = Some(d.x);
    }
}

#[cfg(test)]
mod tests {
    use geo_types::{Geometry, LineString, Point};

    use super::*;
    use crate::varint::VarintReader;

    fn ingest(features: &[ParsedFeature], config: &Config) -> SegmentOutput {
        let used = AtomicU64::new(0);
        let warned = AtomicBool::new(false);
        let mut worker = IngestWorker::new(config, 0, 1, &used, &warned).unwrap();
        for f in features {
            worker.serialize_feature(f).unwrap();
        }
        worker.finish().unwrap()
    }

    fn point_feature(lon: f64, lat: f64) -> ParsedFeature {
        ParsedFeature {
            layer: None,
            geometry: Geometry::Point(Point::new(lon, lat)),
            id: None,
            attributes: vec![("name".to_string(), AttrValue::String("x".to_string()))],
            minzoom: None,
            maxzoom: None,
        }
    }

    #[test]
    fn test_ingest_writes_records() {
        let config = Config::default();
        let out = ingest(&[point_feature(0.0, 0.0), point_feature(1.0, 1.0)], &config);
        assert_eq!(out.feature_count, 2);
        assert_eq!(out.layer_names, vec!["features".to_string()]);
        assert!(out.layer_map.contains_key("features"));

        let mut r = VarintReader::new(std::io::BufReader::new(out.geom));
        let a =
            crate::serial::read_serial_feature(&mut r, 0, out.origin, 0).unwrap();
        let b =
            crate::serial::read_serial_feature(&mut r, 0, out.origin, 0).unwrap();
        assert_eq!(a.geom_type, FeatureType::Point);
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        // (0,0) projects to the center of the world plane
        assert_eq!(a.bbox[0], WORLD_EXTENT / 2);
    }

    #[test]
    fn test_attribute_include_exclude() {
        let mut config = Config::default();
        config.exclude.insert("name".to_string());
        let out = ingest(&[point_feature(0.0, 0.0)], &config);
        let entry = &out.layer_map["features"];
        assert!(entry.attributes.is_empty());
    }

    #[test]
    fn test_filter_drops_at_ingest() {
        let mut config = Config::default();
        config.filter = Some(
            crate::filter::FilterSet::parse_str(r#"{"*": ["has", "missing"]}"#).unwrap(),
        );
        let out = ingest(&[point_feature(0.0, 0.0)], &config);
        assert_eq!(out.feature_count, 0);
    }

    #[test]
    fn test_antimeridian_split_into_continuous_copy() {
        let mut config = Config::default();
        config.detect_wraparound = true;
        let line = ParsedFeature {
            layer: None,
            geometry: Geometry::LineString(LineString::from(vec![
                (179.9, 0.0),
                (-179.9, 0.0),
            ])),
            id: None,
            attributes: vec![],
            minzoom: None,
            maxzoom: None,
        };
        let out = ingest(&[line], &config);
        let mut r = VarintReader::new(std::io::BufReader::new(out.geom));
        let sf = crate::serial::read_serial_feature(&mut r, 0, out.origin, 0).unwrap();
        // second vertex is pulled past the right world edge instead of
        // jumping back across the plane
        assert!(sf.geometry[1].x > WORLD_EXTENT - 1);
        let width = sf.geometry[1].x - sf.geometry[0].x;
        assert!(width > 0 && width < WORLD_EXTENT / 100);
    }

    #[test]
    fn test_polygon_extent_is_area() {
        let poly = geo_types::Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let f = ParsedFeature {
            layer: Some("shapes".to_string()),
            geometry: Geometry::Polygon(poly),
            id: Some(5),
            attributes: vec![],
            minzoom: None,
            maxzoom: None,
        };
        let config = Config::default();
        let out = ingest(&[f], &config);
        let mut r = VarintReader::new(std::io::BufReader::new(out.geom));
        let sf = crate::serial::read_serial_feature(&mut r, 0, out.origin, 0).unwrap();
        assert_eq!(sf.geom_type, FeatureType::Polygon);
        assert!(sf.extent > 0);
        assert_eq!(sf.id, Some(5));
        assert_eq!(out.layer_names, vec!["shapes".to_string()]);
    }

    #[test]
    fn test_oversize_unclipped_feature_aborts() {
        let mut config = Config::default();
        config.prevent_clipping = true;
        config.maxzoom = 14;
        let line = ParsedFeature {
            layer: None,
            geometry: Geometry::LineString(LineString::from(vec![(-179.0, 0.0), (179.0, 0.0)])),
            id: None,
            attributes: vec![],
            minzoom: None,
            maxzoom: None,
        };
        let used = AtomicU64::new(0);
        let warned = AtomicBool::new(false);
        let mut worker = IngestWorker::new(&config, 0, 1, &used, &warned).unwrap();
        assert!(matches!(
            worker.serialize_feature(&line),
            Err(CoreError::OversizeFeature(_))
        ));
    }
}
