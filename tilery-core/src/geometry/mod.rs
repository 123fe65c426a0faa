//! Integer geometry primitives over draw vectors.
//!
//! Conventions: a line geometry is one or more `MoveTo` + `LineTo` runs.
//! A polygon geometry holds one or more parts, each part being an outer
//! ring followed by its inner rings, terminated by a `ClosePath` op;
//! after [`fix_polygon`] outer rings have positive shoelace area and
//! inner rings negative, so ring role can always be recovered from the
//! area sign alone.

use tilery_tile_utils::TileCoord;
pub use tilery_tile_utils::mvt::{Draw, DrawOp, DrawVec};

mod clip;
mod simplify;

pub use clip::{
    QuickCheck, clean_polygon, clip_lines, clip_point, clip_poly, quick_check,
    remove_noop_movetos,
};
pub use simplify::{SimplifyOptions, simplify_lines};

/// Golden angle, for sunflower label-anchor spirals.
const SPIRAL_ANGLE: f64 = 2.399_963_229_728_653;

/// Shoelace area of the ring `geom[i..j]`, in half world-units squared.
///
/// The accumulation is exact (i128) for any 32-bit world coordinates, so
/// the sign is the authoritative winding indicator.
#[must_use]
pub fn get_area(geom: &[Draw], i: usize, j: usize) -> f64 {
    let mut sum = 0_i128;
    let n = j - i;
    for k in 0..n {
        let a = &geom[i + k];
        let b = &geom[i + (k + 1) % n];
        sum += i128::from(a.x) * i128::from(b.y) - i128::from(b.x) * i128::from(a.y);
    }
    sum as f64 / 2.0
}

/// Bounding box `[min_x, min_y, max_x, max_y]` of the drawn coordinates.
/// `ClosePath` markers carry no coordinates of their own.
#[must_use]
pub fn get_bbox(geom: &[Draw]) -> [i64; 4] {
    let mut bbox = [i64::MAX, i64::MAX, i64::MIN, i64::MIN];
    for d in geom {
        if matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo) {
            bbox[0] = bbox[0].min(d.x);
            bbox[1] = bbox[1].min(d.y);
            bbox[2] = bbox[2].max(d.x);
            bbox[3] = bbox[3].max(d.y);
        }
    }
    bbox
}

/// Half-open ranges of the rings in `geom`, where a ring starts at each
/// `MoveTo`. `ClosePath` ops are not part of any ring.
#[must_use]
pub fn ring_ranges(geom: &[Draw]) -> Vec<(usize, usize)> {
    let mut rings = Vec::new();
    let mut start = None;
    for (i, d) in geom.iter().enumerate() {
        match d.op {
            DrawOp::MoveTo => {
                if let Some(s) = start {
                    rings.push((s, i));
                }
                start = Some(i);
            }
            DrawOp::LineTo => {}
            _ => {
                if let Some(s) = start.take() {
                    rings.push((s, i));
                }
            }
        }
    }
    if let Some(s) = start {
        rings.push((s, geom.len()));
    }
    rings
}

/// Total length of a line geometry, in world units.
#[must_use]
pub fn get_length(geom: &[Draw]) -> f64 {
    let mut total = 0.0;
    for w in geom.windows(2) {
        if w[1].op == DrawOp::LineTo {
            let dx = (w[1].x - w[0].x) as f64;
            let dy = (w[1].y - w[0].y) as f64;
            total += dx.hypot(dy);
        }
    }
    total
}

fn ring_centroid(ring: &[Draw]) -> (i64, i64) {
    // average of the distinct vertices; good enough for rotation and
    // label seeding
    let n = ring.len().saturating_sub(1).max(1);
    let sx: i64 = ring[..n].iter().map(|d| d.x).sum();
    let sy: i64 = ring[..n].iter().map(|d| d.y).sum();
    (sx / n as i64, sy / n as i64)
}

fn dist2(ax: i64, ay: i64, bx: i64, by: i64) -> i128 {
    let dx = i128::from(ax - bx);
    let dy = i128::from(ay - by);
    dx * dx + dy * dy
}

/// Normalize polygon rings: close each ring, give outer rings positive
/// and inner rings negative winding, and rotate each ring to start at
/// the vertex least likely to matter to simplification (the point
/// farthest from the vertex farthest from the centroid). Idempotent.
#[must_use]
pub fn fix_polygon(geom: &[Draw]) -> DrawVec {
    let mut out = DrawVec::with_capacity(geom.len() + 2);
    let mut outer = true;
    let mut i = 0;
    while i < geom.len() {
        match geom[i].op {
            DrawOp::ClosePath => {
                out.push(geom[i]);
                outer = true;
                i += 1;
            }
            DrawOp::MoveTo => {
                let mut j = i + 1;
                while j < geom.len() && geom[j].op == DrawOp::LineTo {
                    j += 1;
                }
                let mut ring: Vec<Draw> = geom[i..j].to_vec();
                // ensure closure
                if ring.len() > 1
                    && (ring[0].x, ring[0].y) != (ring[ring.len() - 1].x, ring[ring.len() - 1].y)
                {
                    let mut close = ring[0];
                    close.op = DrawOp::LineTo;
                    ring.push(close);
                }
                let area = get_area(&ring, 0, ring.len());
                if (area > 0.0) != outer && area != 0.0 {
                    ring.reverse();
                }

                // rotate so the ring endpoints land far from the centroid;
                // ties break on coordinates so the choice does not depend
                // on where the ring happened to start
                let n = ring.len() - 1; // distinct vertices
                if n >= 3 {
                    let (cx, cy) = ring_centroid(&ring);
                    let far1 = (0..n)
                        .max_by_key(|&k| (dist2(ring[k].x, ring[k].y, cx, cy), ring[k].x, ring[k].y))
                        .unwrap_or(0);
                    let start = (0..n)
                        .max_by_key(|&k| {
                            (
                                dist2(ring[k].x, ring[k].y, ring[far1].x, ring[far1].y),
                                ring[k].x,
                                ring[k].y,
                            )
                        })
                        .unwrap_or(0);
                    ring.truncate(n);
                    ring.rotate_left(start);
                    let close = ring[0];
                    ring.push(close);
                }

                for (k, d) in ring.iter_mut().enumerate() {
                    d.op = if k == 0 { DrawOp::MoveTo } else { DrawOp::LineTo };
                }
                out.extend_from_slice(&ring);
                outer = false;
                i = j;
            }
            _ => {
                i += 1;
            }
        }
    }
    out
}

/// Replace sub-pixel polygons with accumulated one-pixel squares.
///
/// `accum` carries fractional pixel area across features of the same tile
/// so that clusters of dropped slivers still produce output. Inner rings
/// of a dropped outer ring subtract from the accumulator instead of being
/// drawn. Returns the reduced geometry and whether a reduction happened
/// (reduced polygons are exempt from simplification).
#[must_use]
pub fn reduce_tiny_poly(geom: &[Draw], z: u8, detail: u8, accum: &mut f64) -> (DrawVec, bool) {
    let pixel = 1_i64 << (32 - u32::from(z) - u32::from(detail)).min(31);
    let pixel2 = (pixel as f64) * (pixel as f64);
    let mut out = DrawVec::new();
    let mut reduced = false;
    let mut outer_dropped = false;

    let rings = ring_ranges(geom);
    let mut part_out = DrawVec::new();
    let mut flush_part = |part_out: &mut DrawVec, out: &mut DrawVec| {
        if !part_out.is_empty() {
            out.append(part_out);
            out.push(Draw::new(DrawOp::ClosePath, 0, 0));
        }
    };

    let mut prev_end = 0;
    for (start, end) in rings {
        // a ClosePath between the previous ring and this one ends a part
        if geom[prev_end..start].iter().any(|d| d.op == DrawOp::ClosePath) {
            flush_part(&mut part_out, &mut out);
            outer_dropped = false;
        }
        prev_end = end;

        let ring = &geom[start..end];
        let area = get_area(geom, start, end);
        let is_outer = area >= 0.0;
        if is_outer {
            if area <= pixel2 {
                outer_dropped = true;
                *accum += area / pixel2;
                if *accum >= 1.0 {
                    *accum -= 1.0;
                    reduced = true;
                    let (x, y) = (ring[0].x, ring[0].y);
                    part_out.push(Draw::new(DrawOp::MoveTo, x, y));
                    part_out.push(Draw::new(DrawOp::LineTo, x + pixel, y));
                    part_out.push(Draw::new(DrawOp::LineTo, x + pixel, y + pixel));
                    part_out.push(Draw::new(DrawOp::LineTo, x, y + pixel));
                    part_out.push(Draw::new(DrawOp::LineTo, x, y));
                }
            } else {
                outer_dropped = false;
                part_out.extend_from_slice(ring);
            }
        } else if outer_dropped {
            // inner ring of a dropped outer: subtract instead of drawing
            *accum += area / pixel2;
        } else {
            part_out.extend_from_slice(ring);
        }
    }
    flush_part(&mut part_out, &mut out);
    (out, reduced)
}

/// Rebuild a polygon that simplification or quantization collapsed,
/// as a square of the original area centered on the original centroid.
#[must_use]
pub fn revive_polygon(geom: &[Draw], area: f64) -> DrawVec {
    let side = (area.abs().sqrt() as i64).max(1);
    let (cx, cy) = if geom.is_empty() {
        (0, 0)
    } else {
        ring_centroid(geom)
    };
    let (x, y) = (cx - side / 2, cy - side / 2);
    vec![
        Draw::new(DrawOp::MoveTo, x, y),
        Draw::new(DrawOp::LineTo, x + side, y),
        Draw::new(DrawOp::LineTo, x + side, y + side),
        Draw::new(DrawOp::LineTo, x, y + side),
        Draw::new(DrawOp::LineTo, x, y),
        Draw::new(DrawOp::ClosePath, 0, 0),
    ]
}

/// Even-odd point-in-ring test. Boundary points count as outside on the
/// high side, matching the half-open tile extents.
#[must_use]
pub fn point_within_ring(ring: &[Draw], x: i64, y: i64) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (ring[i].x as f64, ring[i].y as f64);
        let (xj, yj) = (ring[j].x as f64, ring[j].y as f64);
        let (px, py) = (x as f64, y as f64);
        if ((yi > py) != (yj > py)) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// True if the point is inside the polygon, honoring holes.
#[must_use]
pub fn point_within_polygon(geom: &[Draw], x: i64, y: i64) -> bool {
    let mut winding = 0_i32;
    for (start, end) in ring_ranges(geom) {
        if point_within_ring(&geom[start..end], x, y) {
            if get_area(geom, start, end) >= 0.0 {
                winding += 1;
            } else {
                winding -= 1;
            }
        }
    }
    winding > 0
}

/// Deterministic sunflower spiral of candidate label anchors inside a
/// polygon, centered on its centroid and biased away from the edges by
/// starting from the inside of the spiral.
#[must_use]
pub fn spiral_anchors(geom: &[Draw], tile: TileCoord, detail: u8, label_seed: u64) -> Vec<(i64, i64)> {
    let rings = ring_ranges(geom);
    let Some(&(s0, e0)) = rings.first() else {
        return Vec::new();
    };
    let (cx, cy) = ring_centroid(&geom[s0..e0]);
    let bounds = tile.world_bounds();
    let step = (1_i64 << (32 - u32::from(tile.z) - u32::from(detail)).min(31)) as f64;
    let phase = (label_seed % 360) as f64 / 360.0 * SPIRAL_ANGLE;

    let mut anchors = Vec::new();
    for i in 0..512_u32 {
        let r = step * f64::from(i).sqrt();
        let theta = f64::from(i).mul_add(SPIRAL_ANGLE, phase);
        let x = cx + (r * theta.cos()) as i64;
        let y = cy + (r * theta.sin()) as i64;
        if x < bounds[0] || x >= bounds[2] || y < bounds[1] || y >= bounds[3] {
            continue;
        }
        if point_within_polygon(geom, x, y) {
            anchors.push((x, y));
        }
    }
    anchors
}

/// Bresenham stair-step rasterization of a line geometry at the pixel
/// grid of `(z, detail)`. Debug rendering only.
#[must_use]
pub fn stairstep(geom: &[Draw], z: u8, detail: u8) -> DrawVec {
    let shift = (32 - u32::from(z) - u32::from(detail)).min(31);
    let mut out = DrawVec::new();
    for d in geom {
        match d.op {
            DrawOp::MoveTo => out.push(Draw::new(DrawOp::MoveTo, d.x >> shift, d.y >> shift)),
            DrawOp::LineTo => {
                let Some(prev) = out.last().copied() else {
                    continue;
                };
                let (mut x0, mut y0) = (prev.x, prev.y);
                let (x1, y1) = (d.x >> shift, d.y >> shift);
                let dx = (x1 - x0).abs();
                let dy = -(y1 - y0).abs();
                let sx = if x0 < x1 { 1 } else { -1 };
                let sy = if y0 < y1 { 1 } else { -1 };
                let mut err = dx + dy;
                while x0 != x1 || y0 != y1 {
                    let e2 = 2 * err;
                    if e2 >= dy {
                        err += dy;
                        x0 += sx;
                        out.push(Draw::new(DrawOp::LineTo, x0, y0));
                    }
                    if e2 <= dx {
                        err += dx;
                        y0 += sy;
                        out.push(Draw::new(DrawOp::LineTo, x0, y0));
                    }
                }
            }
            _ => out.push(*d),
        }
    }
    for d in &mut out {
        if matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo) {
            d.x <<= shift;
            d.y <<= shift;
        }
    }
    out
}

/// Convert a polygon draw vector to a `geo` multipolygon using the ring
/// area signs, for the boolean engine. Coordinates stay integral in f64.
#[must_use]
pub fn to_multi_polygon(geom: &[Draw]) -> geo_types::MultiPolygon<f64> {
    let mut polys: Vec<geo_types::Polygon<f64>> = Vec::new();
    for (start, end) in ring_ranges(geom) {
        if end - start < 4 {
            continue; // degenerate ring
        }
        let coords: Vec<geo_types::Coord<f64>> = geom[start..end]
            .iter()
            .map(|d| geo_types::Coord {
                x: d.x as f64,
                y: d.y as f64,
            })
            .collect();
        let ring = geo_types::LineString::from(coords);
        if get_area(geom, start, end) >= 0.0 {
            polys.push(geo_types::Polygon::new(ring, vec![]));
        } else if let Some(last) = polys.last_mut() {
            last.interiors_push(ring);
        }
    }
    geo_types::MultiPolygon(polys)
}

/// Convert a `geo` multipolygon back to the canonical draw vector form:
/// outer rings positive, inner rings negative, `ClosePath` after each
/// polygon. Coordinates are rounded back onto the integer grid.
#[must_use]
pub fn from_multi_polygon(mp: &geo_types::MultiPolygon<f64>) -> DrawVec {
    let mut out = DrawVec::new();
    for poly in &mp.0 {
        push_ring(&mut out, poly.exterior(), true);
        for interior in poly.interiors() {
            push_ring(&mut out, interior, false);
        }
        out.push(Draw::new(DrawOp::ClosePath, 0, 0));
    }
    out
}

fn push_ring(out: &mut DrawVec, ring: &geo_types::LineString<f64>, outer: bool) {
    let mut pts: Vec<Draw> = ring
        .coords()
        .map(|c| Draw::new(DrawOp::LineTo, c.x.round() as i64, c.y.round() as i64))
        .collect();
    if pts.len() < 4 {
        return;
    }
    let area = get_area(&pts, 0, pts.len());
    if (area > 0.0) != outer && area != 0.0 {
        pts.reverse();
    }
    pts[0].op = DrawOp::MoveTo;
    out.append(&mut pts);
}
