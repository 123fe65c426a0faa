//! The per-tile renderer.
//!
//! One pass takes a tile's feature batch through filter, clip, simplify,
//! quantize, clean, coalesce and MVT encoding, then checks the byte and
//! feature budgets. Overflow is handled by an explicit state machine with
//! two recovery moves: reduce detail by one, or (with dynamic drop) scale
//! the kept fraction by `budget / actual * 0.95` and start over at full
//! detail. Child re-emission happens exactly once, before any attempt.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Mutex;

use rayon::prelude::*;
use tilery_tile_utils::mvt::{MvtFeature, MvtLayer, encode_tile};
use tilery_tile_utils::{TileCoord, encode_gzip, world_per_tile};

use crate::borders::simplify_shared_borders;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::feature::{AttrValue, FeatureType};
use crate::filter::FilterFeature;
use crate::geometry::{
    Draw, DrawOp, DrawVec, QuickCheck, SimplifyOptions, clean_polygon, clip_lines, clip_point,
    clip_poly, get_area, get_bbox, quick_check, reduce_tiny_poly, remove_noop_movetos,
    revive_polygon, ring_ranges, simplify_lines,
};
use crate::ingest::SegmentOutput;
use crate::serial::SerialFeature;
use crate::traverse::{ChildWriters, TileSink};

/// Polygons are chopped along their bbox median until no ring has more
/// vertices than this.
const MAX_POLYGON_VERTICES: usize = 700;

pub struct RenderContext<'a> {
    pub config: &'a Config,
    pub segments: &'a [SegmentOutput],
}

#[derive(Debug)]
pub enum TileOutcome {
    Written { bytes: usize },
    Empty,
}

enum Attempt {
    Empty,
    Encoded(Vec<u8>),
    TooMany(usize),
    TooBig(usize),
}

/// One feature being rendered into this tile.
struct WorkItem {
    geom_type: FeatureType,
    id: Option<u64>,
    seq: u64,
    index: u64,
    segment: u16,
    /// Attribute identity: string-pool offset pairs. Two features
    /// coalesce only if these are equal, so pool duplicates (from the
    /// depth-cap escape) can keep otherwise-equal features apart.
    pairs: Vec<(u64, u64)>,
    exclusions: Vec<String>,
    layer: String,
    geometry: DrawVec,
    /// Post-clip area, for reviving collapsed polygons.
    pre_area: f64,
    reduced: bool,
}

pub fn render_tile(
    ctx: &RenderContext<'_>,
    coord: TileCoord,
    batch: &[SerialFeature],
    children: Option<&mut ChildWriters>,
    sink: &Mutex<&mut dyn TileSink>,
) -> CoreResult<TileOutcome> {
    let config = ctx.config;

    if let Some(children) = children {
        emit_children(ctx, coord, batch, children)?;
    }
    if coord.z < config.minzoom || batch.is_empty() {
        return Ok(TileOutcome::Empty);
    }

    let full_detail = config.detail_at(coord.z);
    let min_detail = config.min_detail.min(full_detail);
    let mut detail = full_detail;
    let mut fraction = 1.0_f64;
    let mut drop_all = false;

    loop {
        match attempt(ctx, coord, batch, detail, fraction, drop_all)? {
            Attempt::Empty => return Ok(TileOutcome::Empty),
            Attempt::Encoded(data) => {
                let bytes = data.len();
                let mut sink = sink.lock().map_err(|_| {
                    CoreError::Sink("tile store lock poisoned".to_string())
                })?;
                sink.put_tile(coord, data)?;
                return Ok(TileOutcome::Written { bytes });
            }
            Attempt::TooMany(count) => {
                return Err(CoreError::TooManyFeatures(
                    coord,
                    count,
                    config.max_tile_features,
                ));
            }
            Attempt::TooBig(actual) => {
                if config.drop_densest_as_needed {
                    fraction = fraction * (config.max_tile_bytes as f64 / actual as f64) * 0.95;
                    detail = full_detail;
                    drop_all = true;
                } else if detail > min_detail {
                    detail -= 1;
                } else {
                    return Err(CoreError::TileTooBig(coord, actual));
                }
            }
        }
    }
}

/// Re-emit every feature of this batch, clipped to this tile's buffered
/// extent, into the quadrant streams of the children it overlaps. Runs
/// once per tile, before any encoding attempt.
fn emit_children(
    ctx: &RenderContext<'_>,
    coord: TileCoord,
    batch: &[SerialFeature],
    children: &mut ChildWriters,
) -> CoreResult<()> {
    let config = ctx.config;
    let clip_box = buffered_bounds(coord, config.detail_at(coord.z), config.buffer);
    let child_z = coord.z + 1;
    let child_buffer =
        config.buffer * (world_per_tile(child_z) >> config.detail_at(child_z).min(31));

    for sf in batch {
        let geometry = match clip_feature(ctx, coord, sf, clip_box)? {
            Some(g) => g,
            None => continue,
        };
        let bbox = get_bbox(&geometry);
        let mut child_sf = sf.clone();
        child_sf.geometry = geometry;
        child_sf.bbox = bbox;

        for dx in 0..2_u32 {
            for dy in 0..2_u32 {
                let child = TileCoord::new_unchecked(child_z, coord.x * 2 + dx, coord.y * 2 + dy);
                let cb = child.world_bounds();
                let cb = [
                    cb[0] - child_buffer,
                    cb[1] - child_buffer,
                    cb[2] + child_buffer,
                    cb[3] + child_buffer,
                ];
                if quick_check(bbox, cb) != QuickCheck::Outside {
                    children.emit(child, &child_sf)?;
                }
            }
        }
    }
    Ok(())
}

fn buffered_bounds(coord: TileCoord, detail: u8, buffer: i64) -> [i64; 4] {
    let bounds = coord.world_bounds();
    let pixel = world_per_tile(coord.z) >> detail.min(31);
    [
        bounds[0] - buffer * pixel,
        bounds[1] - buffer * pixel,
        bounds[2] + buffer * pixel,
        bounds[3] + buffer * pixel,
    ]
}

/// Clip one feature to a box, honoring `prevent_clipping` and
/// `prevent_duplication`. Returns `None` when nothing of it remains.
fn clip_feature(
    ctx: &RenderContext<'_>,
    coord: TileCoord,
    sf: &SerialFeature,
    clip_box: [i64; 4],
) -> CoreResult<Option<DrawVec>> {
    let config = ctx.config;
    match quick_check(sf.bbox, clip_box) {
        QuickCheck::Outside => Ok(None),
        _ if config.prevent_clipping => Ok(Some(sf.geometry.clone())),
        QuickCheck::Inside => {
            if config.prevent_duplication {
                // half-open point-in-tile test: the copy whose tile owns
                // the first vertex is the only one emitted
                let bounds = coord.world_bounds();
                if let Some(first) = sf.geometry.first() {
                    if !(first.x >= bounds[0]
                        && first.x < bounds[2]
                        && first.y >= bounds[1]
                        && first.y < bounds[3])
                    {
                        return Ok(None);
                    }
                }
            }
            Ok(Some(sf.geometry.clone()))
        }
        QuickCheck::Partial => {
            let clipped = match sf.geom_type {
                FeatureType::Point => {
                    let clip = if config.prevent_duplication {
                        coord.world_bounds()
                    } else {
                        clip_box
                    };
                    clip_point(&sf.geometry, clip)
                }
                FeatureType::Line => clip_lines(&sf.geometry, clip_box),
                FeatureType::Polygon => clip_poly(&sf.geometry, clip_box)
                    .map_err(|msg| polygon_failure(ctx, coord, &sf.geometry, &msg))?,
            };
            let has_points = clipped
                .iter()
                .any(|d| matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo));
            Ok(has_points.then_some(clipped))
        }
    }
}

/// Dump the offending polygon for postmortem and produce the fatal error.
fn polygon_failure(
    ctx: &RenderContext<'_>,
    coord: TileCoord,
    geometry: &[Draw],
    message: &str,
) -> CoreError {
    let path = ctx.config.tmp_dir.join("polygon-failure.txt");
    if let Ok(mut f) = std::fs::File::create(&path) {
        let _ = writeln!(f, "tile {coord:#}: {message}");
        for d in geometry {
            let _ = writeln!(f, "{:?} {} {}", d.op, d.x, d.y);
        }
    }
    CoreError::PolygonClean(coord, path)
}

/// The gamma spacing rule: alternately choose a gap from the observed
/// curve distance and then require the next kept point to exceed its
/// gamma-th root. Returns true when the feature should be dropped.
fn manage_gap(index: u64, previndex: &mut u64, scale: f64, gamma: f64, gap: &mut f64) -> bool {
    if gamma > 0.0 {
        if *gap > 0.0 {
            if index == *previndex {
                return true; // exact duplicate
            }
            if ((index - *previndex) as f64 / scale).powf(gamma) < *gap {
                return true;
            }
            *previndex = index;
            *gap = 0.0;
        } else if index >= *previndex {
            *gap = (index - *previndex) as f64 / scale;
            *previndex = index;
        }
    }
    false
}

#[expect(clippy::too_many_lines)]
fn attempt(
    ctx: &RenderContext<'_>,
    coord: TileCoord,
    batch: &[SerialFeature],
    detail: u8,
    fraction: f64,
    drop_all: bool,
) -> CoreResult<Attempt> {
    let config = ctx.config;
    let z = coord.z;
    let clip_box = buffered_bounds(coord, detail, config.buffer);
    let zoom_filter = config
        .filter
        .as_ref()
        .filter(|f| f.references("$zoom"));

    // 1. filter, clip, gamma, fractional drop, tiny-polygon reduction
    let mut items: Vec<WorkItem> = Vec::new();
    let mut previndex = 0_u64;
    let mut gap = 0.0_f64;
    let mut drop_accum = 0.0_f64;
    let mut tiny_accum = 0.0_f64;

    for sf in batch {
        if sf.feature_minzoom > z {
            continue;
        }
        if sf.minzoom.is_some_and(|m| z < m) || sf.maxzoom.is_some_and(|m| z > m) {
            continue;
        }

        let segment = &ctx.segments[usize::from(sf.segment)];
        let layer = segment
            .layer_names
            .get(sf.layer as usize)
            .cloned()
            .unwrap_or_else(|| config.default_layer.clone());

        let mut exclusions = Vec::new();
        if let Some(filters) = zoom_filter {
            let attrs = resolve_attrs(segment, sf);
            let ff = FilterFeature {
                attrs: &attrs,
                id: sf.id,
                geom_type: sf.geom_type,
                zoom: Some(z),
            };
            if !filters.keep(&layer, &ff, &mut exclusions) {
                continue;
            }
        }

        let Some(mut geometry) = clip_feature(ctx, coord, sf, clip_box)? else {
            continue;
        };

        if sf.geom_type == FeatureType::Point
            && manage_gap(
                sf.index,
                &mut previndex,
                Config::curve_scale(z),
                config.gamma,
                &mut gap,
            )
        {
            continue;
        }

        let droppable = drop_all
            || match sf.geom_type {
                FeatureType::Point => true,
                FeatureType::Line => config.drop_lines,
                FeatureType::Polygon => config.drop_polygons,
            };
        if fraction < 1.0 && droppable {
            drop_accum += fraction;
            if drop_accum >= 1.0 {
                drop_accum -= 1.0;
            } else {
                continue;
            }
        }

        let mut reduced = false;
        if sf.geom_type == FeatureType::Polygon && config.tiny_polygon_reduction {
            let (g, r) = reduce_tiny_poly(&geometry, z, detail, &mut tiny_accum);
            geometry = g;
            reduced = r;
            if geometry.is_empty() {
                continue;
            }
        }

        let pre_area = if sf.geom_type == FeatureType::Polygon {
            ring_ranges(&geometry)
                .iter()
                .map(|&(s, e)| get_area(&geometry, s, e))
                .sum()
        } else {
            0.0
        };

        items.push(WorkItem {
            geom_type: sf.geom_type,
            id: sf.id,
            seq: sf.seq,
            index: sf.index,
            segment: sf.segment,
            pairs: segment.attr_pairs(&sf.attrs),
            exclusions,
            layer,
            geometry,
            pre_area,
            reduced,
        });
    }

    if items.is_empty() {
        return Ok(Attempt::Empty);
    }

    // 3. simplify, in parallel across features
    let opts = SimplifyOptions {
        z,
        detail,
        simplification: config.simplification,
        retain: 0,
        visvalingam: config.simplifier == crate::config::LineSimplifier::Visvalingam,
        mark_tile_bounds: true,
        tile_bounds: clip_box,
        shared_nodes: None,
    };
    if config.detect_shared_borders {
        let mut polys: Vec<&mut DrawVec> = items
            .iter_mut()
            .filter(|i| i.geom_type == FeatureType::Polygon && !i.reduced)
            .map(|i| &mut i.geometry)
            .collect();
        simplify_shared_borders(&mut polys, &opts);
        items
            .par_iter_mut()
            .filter(|i| i.geom_type == FeatureType::Line)
            .for_each(|item| item.geometry = simplify_lines(&item.geometry, &opts));
    } else {
        items.par_iter_mut().for_each(|item| {
            if item.geom_type != FeatureType::Point && !item.reduced {
                item.geometry = simplify_lines(&item.geometry, &opts);
            }
        });
    }
    for item in &mut items {
        if item.geom_type == FeatureType::Polygon && !item.reduced {
            let verts = item
                .geometry
                .iter()
                .filter(|d| matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo))
                .count();
            if verts < 4 {
                item.geometry = revive_polygon(&item.geometry, item.pre_area);
            }
        }
    }

    // 4. quantize from world units to tile-local units
    let shift = u32::from(32 - z - detail.min(32 - z));
    let origin_x = i64::from(coord.x) << detail;
    let origin_y = i64::from(coord.y) << detail;
    for item in &mut items {
        quantize(&mut item.geometry, shift, origin_x, origin_y);
    }

    // 5. heal quantization artifacts in polygons, then chop huge ones
    let mut failed: Option<CoreError> = None;
    for item in &mut items {
        if item.geom_type == FeatureType::Polygon && !item.reduced && !item.geometry.is_empty() {
            match clean_polygon(&item.geometry) {
                Ok(cleaned) => {
                    item.geometry = chop_polygon(cleaned);
                }
                Err(msg) => {
                    failed = Some(polygon_failure(ctx, coord, &item.geometry, &msg));
                    break;
                }
            }
        }
    }
    if let Some(err) = failed {
        return Err(err);
    }
    items.retain(|item| !item.geometry.is_empty());

    // 6. group by layer
    let mut groups: BTreeMap<String, Vec<WorkItem>> = BTreeMap::new();
    for item in items {
        groups.entry(item.layer.clone()).or_default().push(item);
    }

    for group in groups.values_mut() {
        // 7. coalesce adjacent features with identical attributes
        if config.reorder {
            group.sort_by(|a, b| {
                (a.geom_type, a.segment, &a.pairs, a.index).cmp(&(
                    b.geom_type,
                    b.segment,
                    &b.pairs,
                    b.index,
                ))
            });
        }
        if config.coalesce {
            let drained = std::mem::take(group);
            for item in drained {
                let mergeable = group.last_mut().is_some_and(|prev| {
                    prev.geom_type == item.geom_type
                        && prev.geom_type != FeatureType::Point
                        && prev.segment == item.segment
                        && prev.pairs == item.pairs
                });
                if mergeable {
                    let prev = group.last_mut().expect("nonempty after is_some_and");
                    prev.geometry.extend(item.geometry);
                } else {
                    group.push(item);
                }
            }
            let tile_opts = SimplifyOptions {
                // tolerance of one tile-local unit
                z: 32 - detail,
                detail,
                simplification: config.simplification,
                retain: 0,
                visvalingam: false,
                mark_tile_bounds: false,
                tile_bounds: [0, 0, 0, 0],
                shared_nodes: None,
            };
            for item in group.iter_mut() {
                match item.geom_type {
                    FeatureType::Line => {
                        item.geometry = simplify_lines(&item.geometry, &tile_opts);
                    }
                    FeatureType::Polygon if !item.reduced => {
                        if let Ok(cleaned) = clean_polygon(&item.geometry) {
                            item.geometry = cleaned;
                        }
                    }
                    _ => {}
                }
            }
        }
        // 8. restore input order if requested
        if config.preserve_input_order {
            group.sort_by_key(|item| item.seq);
        }
    }

    // 9. encode
    let extent = 1_u32 << detail;
    let mut layers: Vec<MvtLayer> = Vec::new();
    let mut feature_count = 0_usize;
    for (name, group) in &groups {
        let mut layer = MvtLayer::new(name.clone(), extent);
        for item in group {
            let Some(ops) = encode_geometry_ops(item) else {
                continue;
            };
            let mut feature = MvtFeature {
                id: item.id,
                geom_type: item.geom_type.as_mvt(),
                tags: Vec::new(),
                geometry: ops,
            };
            let segment = &ctx.segments[usize::from(item.segment)];
            for &(k_off, v_off) in &item.pairs {
                let (_, key) = segment.pool.resolve(k_off);
                if item.exclusions.iter().any(|e| e == key) {
                    continue;
                }
                let key = key.to_string();
                let (ty, text) = segment.pool.resolve(v_off);
                let value = AttrValue::from_pool(ty, text).to_mvt();
                layer.tag(&mut feature, &key, &value);
            }
            layer.features.push(feature);
            feature_count += 1;
        }
        if !layer.features.is_empty() {
            layers.push(layer);
        }
    }

    if layers.is_empty() {
        return Ok(Attempt::Empty);
    }
    if feature_count > config.max_tile_features && !config.force {
        return Ok(Attempt::TooMany(feature_count));
    }

    // 10. compress and check the size budget
    let compressed = encode_gzip(&encode_tile(&layers))?;
    if compressed.len() > config.max_tile_bytes {
        return Ok(Attempt::TooBig(compressed.len()));
    }
    Ok(Attempt::Encoded(compressed))
}

fn resolve_attrs(segment: &SegmentOutput, sf: &SerialFeature) -> Vec<(String, AttrValue)> {
    segment
        .attr_pairs(&sf.attrs)
        .into_iter()
        .map(|(k, v)| {
            let (_, key) = segment.pool.resolve(k);
            let (ty, text) = segment.pool.resolve(v);
            (key.to_string(), AttrValue::from_pool(ty, text))
        })
        .collect()
}

fn quantize(geom: &mut DrawVec, shift: u32, origin_x: i64, origin_y: i64) {
    let mut out = DrawVec::with_capacity(geom.len());
    for d in geom.iter() {
        let mut q = *d;
        if matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo) {
            q.x = (d.x >> shift) - origin_x;
            q.y = (d.y >> shift) - origin_y;
            // quantization collapses consecutive points
            if let Some(prev) = out.last() {
                if prev.op != DrawOp::ClosePath
                    && q.op == DrawOp::LineTo
                    && (prev.x, prev.y) == (q.x, q.y)
                {
                    continue;
                }
            }
        }
        out.push(q);
    }
    *geom = out;
}

/// Split polygons along their bbox median, alternating axes, until every
/// ring is below the vertex ceiling.
fn chop_polygon(geom: DrawVec) -> DrawVec {
    fn chop(geom: DrawVec, axis_x: bool, depth: u32) -> DrawVec {
        let biggest = ring_ranges(&geom)
            .iter()
            .map(|&(s, e)| e - s)
            .max()
            .unwrap_or(0);
        if biggest <= MAX_POLYGON_VERTICES || depth > 30 {
            return geom;
        }
        let bbox = get_bbox(&geom);
        let (lo, hi) = if axis_x {
            ([bbox[0], bbox[1], (bbox[0] + bbox[2]) / 2, bbox[3]], [
                (bbox[0] + bbox[2]) / 2,
                bbox[1],
                bbox[2],
                bbox[3],
            ])
        } else {
            ([bbox[0], bbox[1], bbox[2], (bbox[1] + bbox[3]) / 2], [
                bbox[0],
                (bbox[1] + bbox[3]) / 2,
                bbox[2],
                bbox[3],
            ])
        };
        let mut out = DrawVec::new();
        for half in [lo, hi] {
            if let Ok(piece) = clip_poly(&geom, half) {
                out.extend(chop(piece, !axis_x, depth + 1));
            }
        }
        out
    }
    chop(geom, true, 0)
}

/// Produce the MVT operation sequence for one work item, in tile-local
/// coordinates. Returns `None` when nothing drawable remains.
fn encode_geometry_ops(item: &WorkItem) -> Option<DrawVec> {
    match item.geom_type {
        FeatureType::Point => {
            let pts: DrawVec = item
                .geometry
                .iter()
                .filter(|d| matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo))
                .map(|d| Draw::new(DrawOp::MoveTo, d.x, d.y))
                .collect();
            (!pts.is_empty()).then_some(pts)
        }
        FeatureType::Line => {
            let runs = remove_noop_movetos(&item.geometry);
            let out: DrawVec = runs
                .iter()
                .filter(|d| matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo))
                .copied()
                .collect();
            (out.len() >= 2).then_some(out)
        }
        FeatureType::Polygon => {
            let mut out = DrawVec::new();
            for (s, e) in ring_ranges(&item.geometry) {
                let ring = &item.geometry[s..e];
                // drop the closing duplicate; ClosePath implies it
                let end = if ring.len() > 1
                    && (ring[0].x, ring[0].y) == (ring[ring.len() - 1].x, ring[ring.len() - 1].y)
                {
                    ring.len() - 1
                } else {
                    ring.len()
                };
                if end < 3 {
                    continue;
                }
                out.extend_from_slice(&ring[..end]);
                out.push(Draw::new(DrawOp::ClosePath, 0, 0));
            }
            (!out.is_empty()).then_some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manage_gap_disabled_by_zero_gamma() {
        let mut previndex = 0;
        let mut gap = 0.0;
        for i in 0..10 {
            assert!(!manage_gap(i, &mut previndex, 1.0, 0.0, &mut gap));
        }
    }

    #[test]
    fn test_manage_gap_drops_duplicates() {
        let mut previndex = 0;
        let mut gap = 0.0;
        // first point chooses a gap, duplicate indexes then drop
        assert!(!manage_gap(1000, &mut previndex, 1.0, 2.0, &mut gap));
        assert!(manage_gap(1000, &mut previndex, 1.0, 2.0, &mut gap));
    }

    #[test]
    fn test_manage_gap_enforces_spacing() {
        let mut previndex = 0;
        let mut gap = 0.0;
        assert!(!manage_gap(1 << 20, &mut previndex, 1.0, 1.0, &mut gap));
        // closer than the chosen gap: dropped
        assert!(manage_gap((1 << 20) + 10, &mut previndex, 1.0, 1.0, &mut gap));
        // far enough: kept
        assert!(!manage_gap(1 << 22, &mut previndex, 1.0, 1.0, &mut gap));
    }

    #[test]
    fn test_quantize_tile_local() {
        let mut geom = vec![
            Draw::new(DrawOp::MoveTo, 3 << 20, 5 << 20),
            Draw::new(DrawOp::LineTo, (3 << 20) + (1 << 21), 5 << 20),
        ];
        // z=0, detail=12: shift 20, origin 0
        quantize(&mut geom, 20, 0, 0);
        assert_eq!((geom[0].x, geom[0].y), (3, 5));
        assert_eq!((geom[1].x, geom[1].y), (5, 5));
    }

    #[test]
    fn test_quantize_collapses_duplicates() {
        let mut geom = vec![
            Draw::new(DrawOp::MoveTo, 0, 0),
            Draw::new(DrawOp::LineTo, 1, 1),
            Draw::new(DrawOp::LineTo, 2, 2),
            Draw::new(DrawOp::LineTo, 1 << 20, 0),
        ];
        quantize(&mut geom, 20, 0, 0);
        assert_eq!(geom.len(), 2);
    }

    #[test]
    fn test_chop_polygon_limits_ring_size() {
        // a dense ring with ~1200 vertices around a big square
        let n: i64 = 300;
        let side: i64 = 1 << 12;
        let mut ring = DrawVec::new();
        let step = side / n;
        for i in 0..n {
            ring.push(Draw::new(
                if i == 0 { DrawOp::MoveTo } else { DrawOp::LineTo },
                i * step,
                0,
            ));
        }
        for i in 0..n {
            ring.push(Draw::new(DrawOp::LineTo, side, i * step));
        }
        for i in 0..n {
            ring.push(Draw::new(DrawOp::LineTo, side - i * step, side));
        }
        for i in 0..n {
            ring.push(Draw::new(DrawOp::LineTo, 0, side - i * step));
        }
        ring.push(Draw::new(DrawOp::LineTo, 0, 0));
        ring.push(Draw::new(DrawOp::ClosePath, 0, 0));

        let chopped = chop_polygon(ring);
        let biggest = ring_ranges(&chopped)
            .iter()
            .map(|&(s, e)| e - s)
            .max()
            .unwrap();
        assert!(biggest <= MAX_POLYGON_VERTICES, "biggest ring {biggest}");
        // area is preserved across the chop
        let total: f64 = ring_ranges(&chopped)
            .iter()
            .map(|&(s, e)| get_area(&chopped, s, e))
            .sum();
        assert_eq!(total, (side * side) as f64);
    }

    #[test]
    fn test_encode_geometry_ops_polygon_closepath() {
        let item = WorkItem {
            geom_type: FeatureType::Polygon,
            id: None,
            seq: 0,
            index: 0,
            segment: 0,
            pairs: vec![],
            exclusions: vec![],
            layer: "l".to_string(),
            geometry: crate::geometry::fix_polygon(&vec![
                Draw::new(DrawOp::MoveTo, 10, 10),
                Draw::new(DrawOp::LineTo, 20, 10),
                Draw::new(DrawOp::LineTo, 20, 20),
                Draw::new(DrawOp::LineTo, 10, 20),
                Draw::new(DrawOp::LineTo, 10, 10),
            ]),
            pre_area: 100.0,
            reduced: false,
        };
        let ops = encode_geometry_ops(&item).unwrap();
        assert_eq!(ops.len(), 5);
        assert_eq!(ops[0].op, DrawOp::MoveTo);
        assert_eq!(ops[4].op, DrawOp::ClosePath);
        assert!(ops[1..4].iter().all(|d| d.op == DrawOp::LineTo));
    }
}
