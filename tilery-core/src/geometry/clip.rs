//! Clipping against tile extents.
//!
//! Lines use Cohen-Sutherland per segment. Polygons go through the 2D
//! boolean engine with positive fill semantics: the union of outer rings
//! minus the union of inner rings, optionally intersected with the clip
//! rectangle. World coordinates are at most 2^32 and therefore exact in
//! the engine's f64 arithmetic.

use geo::BooleanOps as _;
use geo::unary_union;
use geo_types::{Coord, LineString, MultiPolygon, Polygon};

use super::{Draw, DrawOp, DrawVec, from_multi_polygon, get_area, ring_ranges};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickCheck {
    /// No overlap with the clip box at all.
    Outside,
    /// Entirely inside; the geometry can pass through unmodified.
    Inside,
    /// Straddles an edge and needs real clipping.
    Partial,
}

/// Compare a feature bbox against a clip box without touching geometry.
#[must_use]
pub fn quick_check(bbox: [i64; 4], clip: [i64; 4]) -> QuickCheck {
    if bbox[2] < clip[0] || bbox[0] > clip[2] || bbox[3] < clip[1] || bbox[1] > clip[3] {
        QuickCheck::Outside
    } else if bbox[0] >= clip[0] && bbox[2] <= clip[2] && bbox[1] >= clip[1] && bbox[3] <= clip[3]
    {
        QuickCheck::Inside
    } else {
        QuickCheck::Partial
    }
}

/// Keep only points inside the clip box. The box is inclusive on the low
/// edges and exclusive on the high edges, so a point exactly on a shared
/// tile corner lands in exactly one tile.
#[must_use]
pub fn clip_point(geom: &[Draw], clip: [i64; 4]) -> DrawVec {
    geom.iter()
        .filter(|d| d.x >= clip[0] && d.x < clip[2] && d.y >= clip[1] && d.y < clip[3])
        .copied()
        .collect()
}

const INSIDE: u8 = 0;
const LEFT: u8 = 1;
const RIGHT: u8 = 2;
const BOTTOM: u8 = 4;
const TOP: u8 = 8;

fn outcode(x: f64, y: f64, clip: [i64; 4]) -> u8 {
    let mut code = INSIDE;
    if x < clip[0] as f64 {
        code |= LEFT;
    } else if x > clip[2] as f64 {
        code |= RIGHT;
    }
    if y < clip[1] as f64 {
        code |= BOTTOM;
    } else if y > clip[3] as f64 {
        code |= TOP;
    }
    code
}

/// Cohen-Sutherland on one segment. Returns the clipped endpoints and
/// whether each end moved, or `None` when the segment misses the box.
#[expect(clippy::many_single_char_names)]
fn clip_segment(
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
    clip: [i64; 4],
) -> Option<(i64, i64, i64, i64, bool, bool)> {
    let (mut ax, mut ay) = (x0 as f64, y0 as f64);
    let (mut bx, mut by) = (x1 as f64, y1 as f64);
    let mut code_a = outcode(ax, ay, clip);
    let mut code_b = outcode(bx, by, clip);

    loop {
        if code_a | code_b == 0 {
            let changed_a = (ax.round() as i64, ay.round() as i64) != (x0, y0);
            let changed_b = (bx.round() as i64, by.round() as i64) != (x1, y1);
            return Some((
                ax.round() as i64,
                ay.round() as i64,
                bx.round() as i64,
                by.round() as i64,
                changed_a,
                changed_b,
            ));
        }
        if code_a & code_b != 0 {
            return None;
        }
        let code = if code_a != 0 { code_a } else { code_b };
        let (x, y);
        if code & TOP != 0 {
            let t = clip[3] as f64;
            x = ax + (bx - ax) * (t - ay) / (by - ay);
            y = t;
        } else if code & BOTTOM != 0 {
            let t = clip[1] as f64;
            x = ax + (bx - ax) * (t - ay) / (by - ay);
            y = t;
        } else if code & RIGHT != 0 {
            let t = clip[2] as f64;
            y = ay + (by - ay) * (t - ax) / (bx - ax);
            x = t;
        } else {
            let t = clip[0] as f64;
            y = ay + (by - ay) * (t - ax) / (bx - ax);
            x = t;
        }
        if code == code_a {
            ax = x;
            ay = y;
            code_a = outcode(ax, ay, clip);
        } else {
            bx = x;
            by = y;
            code_b = outcode(bx, by, clip);
        }
    }
}

/// Clip line geometry to a box. Segments wholly outside degrade to a lone
/// `MoveTo` at their endpoint, so downstream passes stay cheap; callers
/// drop the no-op `MoveTo`s before encoding.
#[must_use]
pub fn clip_lines(geom: &[Draw], clip: [i64; 4]) -> DrawVec {
    let mut out = DrawVec::with_capacity(geom.len());
    for i in 0..geom.len() {
        let d = geom[i];
        if d.op == DrawOp::LineTo && i > 0 && matches!(geom[i - 1].op, DrawOp::MoveTo | DrawOp::LineTo) {
            let p = geom[i - 1];
            match clip_segment(p.x, p.y, d.x, d.y, clip) {
                Some((ax, ay, bx, by, changed_a, changed_b)) => {
                    if changed_a {
                        out.push(Draw::new(DrawOp::MoveTo, ax, ay));
                    }
                    let mut end = Draw::new(DrawOp::LineTo, bx, by);
                    end.necessary = d.necessary;
                    out.push(end);
                    if changed_b {
                        out.push(Draw::new(DrawOp::MoveTo, d.x, d.y));
                    }
                }
                None => out.push(Draw::new(DrawOp::MoveTo, d.x, d.y)),
            }
        } else {
            out.push(d);
        }
    }
    out
}

/// Drop `MoveTo`s that no `LineTo` follows; clipping leaves them behind.
#[must_use]
pub fn remove_noop_movetos(geom: &[Draw]) -> DrawVec {
    let mut out = DrawVec::with_capacity(geom.len());
    for (i, d) in geom.iter().enumerate() {
        if d.op == DrawOp::MoveTo
            && geom.get(i + 1).is_none_or(|next| next.op != DrawOp::LineTo)
        {
            continue;
        }
        out.push(*d);
    }
    out
}

fn positive_fill(geom: &[Draw]) -> (Vec<Polygon<f64>>, Vec<Polygon<f64>>) {
    let mut pos = Vec::new();
    let mut neg = Vec::new();
    for (start, end) in ring_ranges(geom) {
        if end - start < 4 {
            continue;
        }
        let coords: Vec<Coord<f64>> = geom[start..end]
            .iter()
            .map(|d| Coord {
                x: d.x as f64,
                y: d.y as f64,
            })
            .collect();
        let poly = Polygon::new(LineString::from(coords), vec![]);
        if get_area(geom, start, end) >= 0.0 {
            pos.push(poly);
        } else {
            neg.push(poly);
        }
    }
    (pos, neg)
}

fn boolean_clean(geom: &[Draw], clip: Option<[i64; 4]>) -> Result<DrawVec, String> {
    let run = || {
        let (pos, neg) = positive_fill(geom);
        if pos.is_empty() {
            return DrawVec::new();
        }
        let mut result: MultiPolygon<f64> = unary_union(pos.iter());
        if !neg.is_empty() {
            result = result.difference(&unary_union(neg.iter()));
        }
        if let Some(c) = clip {
            let rect = Polygon::new(
                LineString::from(vec![
                    (c[0] as f64, c[1] as f64),
                    (c[2] as f64, c[1] as f64),
                    (c[2] as f64, c[3] as f64),
                    (c[0] as f64, c[3] as f64),
                    (c[0] as f64, c[1] as f64),
                ]),
                vec![],
            );
            result = result.intersection(&MultiPolygon(vec![rect]));
        }
        from_multi_polygon(&result)
    };
    std::panic::catch_unwind(run).map_err(|panic| {
        panic
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| panic.downcast_ref::<&str>().map(ToString::to_string))
            .unwrap_or_else(|| "polygon boolean operation panicked".to_string())
    })
}

/// Clip a polygon to a box through the boolean engine. Rings degraded
/// below three distinct vertices are discarded.
pub fn clip_poly(geom: &[Draw], clip: [i64; 4]) -> Result<DrawVec, String> {
    boolean_clean(geom, Some(clip))
}

/// Heal self-intersections (typically introduced by quantization) by
/// re-running the positive-fill union with no clip rectangle.
pub fn clean_polygon(geom: &[Draw]) -> Result<DrawVec, String> {
    boolean_clean(geom, None)
}

#[cfg(test)]
mod tests {
    use super::super::tests::square_poly;
    use super::super::{fix_polygon, get_bbox};
    use super::*;

    #[test]
    fn test_quick_check() {
        let clip = [0, 0, 100, 100];
        assert_eq!(quick_check([10, 10, 20, 20], clip), QuickCheck::Inside);
        assert_eq!(quick_check([-20, -20, -10, -10], clip), QuickCheck::Outside);
        assert_eq!(quick_check([-10, 10, 20, 20], clip), QuickCheck::Partial);
        // touching the boundary is not outside
        assert_eq!(quick_check([100, 100, 120, 120], clip), QuickCheck::Partial);
    }

    #[test]
    fn test_clip_point_half_open() {
        let pts = vec![
            Draw::new(DrawOp::MoveTo, 0, 0),
            Draw::new(DrawOp::MoveTo, 99, 99),
            Draw::new(DrawOp::MoveTo, 100, 50),
            Draw::new(DrawOp::MoveTo, -1, 50),
        ];
        let kept = clip_point(&pts, [0, 0, 100, 100]);
        assert_eq!(kept.len(), 2);
        assert_eq!((kept[0].x, kept[0].y), (0, 0));
        assert_eq!((kept[1].x, kept[1].y), (99, 99));
    }

    #[test]
    fn test_clip_lines_inside_unchanged() {
        let line = vec![
            Draw::new(DrawOp::MoveTo, 10, 10),
            Draw::new(DrawOp::LineTo, 90, 90),
        ];
        assert_eq!(clip_lines(&line, [0, 0, 100, 100]), line);
    }

    #[test]
    fn test_clip_lines_crossing_boundary() {
        // a line crossing x=4096 with a 5 px buffer on each side, as one
        // tile sees it
        let line = vec![
            Draw::new(DrawOp::MoveTo, 4000, 0),
            Draw::new(DrawOp::LineTo, 4200, 0),
        ];
        let clipped = clip_lines(&line, [-5, -5, 4101, 4101]);
        // the segment is truncated at the clip edge, with a moveto left
        // at the original endpoint
        assert_eq!(clipped.len(), 3);
        assert_eq!(clipped[0].op, DrawOp::MoveTo);
        assert_eq!(clipped[1].op, DrawOp::LineTo);
        assert_eq!((clipped[1].x, clipped[1].y), (4101, 0));
        assert_eq!(clipped[2].op, DrawOp::MoveTo);
        assert_eq!((clipped[2].x, clipped[2].y), (4200, 0));

        // and the neighbor tile keeps the other side, buffer included
        let other = clip_lines(&line, [4091, -5, 8197, 4101]);
        let kept: Vec<_> = remove_noop_movetos(&other);
        assert_eq!(kept.len(), 2);
        assert_eq!((kept[0].x, kept[0].y), (4091, 0));
        assert_eq!((kept[1].x, kept[1].y), (4200, 0));
    }

    #[test]
    fn test_clip_lines_wholly_outside() {
        let line = vec![
            Draw::new(DrawOp::MoveTo, 500, 500),
            Draw::new(DrawOp::LineTo, 600, 600),
        ];
        let clipped = clip_lines(&line, [0, 0, 100, 100]);
        assert!(remove_noop_movetos(&clipped).is_empty());
    }

    #[test]
    fn test_clip_poly_contained_keeps_area() {
        let poly = fix_polygon(&square_poly(10, 10, 50));
        let clipped = clip_poly(&poly, [0, 0, 100, 100]).unwrap();
        let rings = ring_ranges(&clipped);
        assert_eq!(rings.len(), 1);
        let area = get_area(&clipped, rings[0].0, rings[0].1);
        assert_eq!(area, 2500.0);
    }

    #[test]
    fn test_clip_poly_truncates_area() {
        let poly = fix_polygon(&square_poly(50, 50, 100));
        let clipped = clip_poly(&poly, [0, 0, 100, 100]).unwrap();
        let rings = ring_ranges(&clipped);
        assert_eq!(rings.len(), 1);
        let area = get_area(&clipped, rings[0].0, rings[0].1).abs();
        assert_eq!(area, 2500.0);
        let bbox = get_bbox(&clipped);
        assert!(bbox[0] >= 50 && bbox[2] <= 100);
    }

    #[test]
    fn test_clip_poly_outside_is_empty() {
        let poly = fix_polygon(&square_poly(500, 500, 10));
        let clipped = clip_poly(&poly, [0, 0, 100, 100]).unwrap();
        assert!(clipped.is_empty());
    }

    #[test]
    fn test_clean_polygon_keeps_holes() {
        let mut geom = square_poly(0, 0, 100);
        geom.pop();
        let mut hole = square_poly(25, 25, 50);
        hole.pop();
        geom.extend(hole);
        geom.push(Draw::new(DrawOp::ClosePath, 0, 0));
        let fixed = fix_polygon(&geom);
        let cleaned = clean_polygon(&fixed).unwrap();
        let rings = ring_ranges(&cleaned);
        let total: f64 = rings
            .iter()
            .map(|&(s, e)| get_area(&cleaned, s, e))
            .sum();
        // 100^2 outer minus 50^2 hole
        assert_eq!(total, 7500.0);
    }
}
