//! Shared-border unification.
//!
//! Rings that share an edge are decomposed into topology-preserving arcs
//! between the vertices where their edge-sharing changes. Each distinct
//! arc (an arc and its reverse count as one) is simplified exactly once
//! and every ring is reassembled from the simplified arcs, so polygons
//! that used to share a border still share an identical vertex sequence
//! afterwards and cannot crack apart.

use std::collections::{BTreeSet, HashMap};

use crate::geometry::{Draw, DrawOp, DrawVec, SimplifyOptions, simplify_lines};

type Pt = (i64, i64);

#[derive(Clone, Copy)]
struct ArcRef {
    id: usize,
    reversed: bool,
}

enum Item {
    Ring(usize),
    Close,
}

fn edge_key(a: Pt, b: Pt) -> (Pt, Pt) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Simplify all polygon draw vectors of a tile together, keeping shared
/// borders in sync. Geometry is rewritten in place.
pub fn simplify_shared_borders(polys: &mut [&mut DrawVec], opts: &SimplifyOptions<'_>) {
    // 1. pull the rings out, remembering each polygon's part structure
    let mut rings: Vec<Vec<Pt>> = Vec::new();
    let mut structure: Vec<Vec<Item>> = Vec::new();
    for poly in polys.iter() {
        let mut items = Vec::new();
        let mut current: Vec<Pt> = Vec::new();
        for d in poly.iter() {
            match d.op {
                DrawOp::MoveTo => {
                    push_ring(&mut rings, &mut items, std::mem::take(&mut current));
                    current.push((d.x, d.y));
                }
                DrawOp::LineTo => current.push((d.x, d.y)),
                _ => {
                    push_ring(&mut rings, &mut items, std::mem::take(&mut current));
                    items.push(Item::Close);
                }
            }
        }
        push_ring(&mut rings, &mut items, current);
        structure.push(items);
    }

    // 2. which rings use each edge
    let mut edge_rings: HashMap<(Pt, Pt), BTreeSet<usize>> = HashMap::new();
    for (id, points) in rings.iter().enumerate() {
        let n = points.len();
        for i in 0..n {
            let key = edge_key(points[i], points[(i + 1) % n]);
            edge_rings.entry(key).or_default().insert(id);
        }
    }

    // 3-5. per ring: mark vertices where edge-sharing changes, rotate to
    // start at one, and cut into arcs between them
    let mut ring_arc_pts: Vec<Vec<Vec<Pt>>> = Vec::with_capacity(rings.len());
    for points in &mut rings {
        let n = points.len();
        let mut necessary: Vec<bool> = (0..n)
            .map(|i| {
                let prev = edge_key(points[(i + n - 1) % n], points[i]);
                let next = edge_key(points[i], points[(i + 1) % n]);
                edge_rings[&prev] != edge_rings[&next]
            })
            .collect();
        let start = necessary.iter().position(|&v| v).unwrap_or_else(|| {
            // no topology changes anywhere: anchor at the smallest vertex
            (0..n).min_by_key(|&i| points[i]).unwrap_or(0)
        });
        points.rotate_left(start);
        necessary.rotate_left(start);

        let mut cuts: Vec<usize> = (0..n).filter(|&i| necessary[i]).collect();
        if cuts.is_empty() {
            cuts.push(0);
        }
        let mut arcs = Vec::with_capacity(cuts.len());
        for (i, &from) in cuts.iter().enumerate() {
            let to = cuts.get(i + 1).copied().unwrap_or(n);
            // inclusive of the next cut, wrapping to the ring start
            let mut pts: Vec<Pt> = points[from..to].to_vec();
            pts.push(points[to % n]);
            arcs.push(pts);
        }
        ring_arc_pts.push(arcs);
    }

    // intern the arcs so each distinct path is simplified exactly once;
    // an arc hashes together with its reverse
    let mut arc_index: HashMap<Vec<Pt>, usize> = HashMap::new();
    let mut arcs: Vec<Vec<Pt>> = Vec::new();
    let mut ring_arcs: Vec<Vec<ArcRef>> = Vec::with_capacity(rings.len());
    for arc_pts in ring_arc_pts {
        let mut refs = Vec::with_capacity(arc_pts.len());
        for pts in arc_pts {
            let mut rev = pts.clone();
            rev.reverse();
            let (canonical, reversed) = if rev < pts { (rev, true) } else { (pts, false) };
            let id = *arc_index.entry(canonical.clone()).or_insert_with(|| {
                arcs.push(canonical);
                arcs.len() - 1
            });
            refs.push(ArcRef { id, reversed });
        }
        ring_arcs.push(refs);
    }

    // 6. simplify each arc once
    let simplified: Vec<Vec<Pt>> = arcs
        .iter()
        .map(|pts| {
            let run: DrawVec = pts
                .iter()
                .enumerate()
                .map(|(i, &(x, y))| {
                    Draw::new(if i == 0 { DrawOp::MoveTo } else { DrawOp::LineTo }, x, y)
                })
                .collect();
            simplify_lines(&run, opts)
                .iter()
                .map(|d| (d.x, d.y))
                .collect()
        })
        .collect();

    // 7. reassemble every ring from its signed arc sequence
    let mut ring_output: Vec<DrawVec> = Vec::with_capacity(rings.len());
    for refs in &ring_arcs {
        let mut pts: Vec<Pt> = Vec::new();
        for arc in refs {
            let mut seq = simplified[arc.id].clone();
            if arc.reversed {
                seq.reverse();
            }
            let skip = usize::from(!pts.is_empty());
            pts.extend(seq.into_iter().skip(skip));
        }
        let mut out = DrawVec::new();
        for (i, &(x, y)) in pts.iter().enumerate() {
            out.push(Draw::new(
                if i == 0 { DrawOp::MoveTo } else { DrawOp::LineTo },
                x,
                y,
            ));
        }
        ring_output.push(out);
    }

    for (poly, items) in polys.iter_mut().zip(&structure) {
        let mut out = DrawVec::new();
        for item in items {
            match item {
                Item::Ring(id) => out.extend_from_slice(&ring_output[*id]),
                Item::Close => out.push(Draw::new(DrawOp::ClosePath, 0, 0)),
            }
        }
        **poly = out;
    }
}

fn push_ring(rings: &mut Vec<Vec<Pt>>, items: &mut Vec<Item>, mut points: Vec<Pt>) {
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return;
    }
    items.push(Item::Ring(rings.len()));
    rings.push(points);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly(points: &[Pt]) -> DrawVec {
        let mut out: DrawVec = points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                Draw::new(if i == 0 { DrawOp::MoveTo } else { DrawOp::LineTo }, x, y)
            })
            .collect();
        let first = out[0];
        out.push(Draw::new(DrawOp::LineTo, first.x, first.y));
        out.push(Draw::new(DrawOp::ClosePath, 0, 0));
        out
    }

    fn options() -> SimplifyOptions<'static> {
        SimplifyOptions {
            z: 0,
            detail: 12,
            simplification: 1.0,
            retain: 0,
            visvalingam: false,
            mark_tile_bounds: false,
            tile_bounds: [0, 0, i64::MAX, i64::MAX],
            shared_nodes: None,
        }
    }

    fn border_points(geom: &DrawVec) -> Vec<Pt> {
        geom.iter()
            .filter(|d| matches!(d.op, DrawOp::MoveTo | DrawOp::LineTo))
            .map(|d| (d.x, d.y))
            .collect()
    }

    #[test]
    fn test_shared_edge_stays_identical() {
        // two big rectangles sharing the segmented edge x = 2^24, with a
        // wiggle that plain per-feature simplification could resolve
        // differently on each side
        let e = 1_i64 << 24;
        let mid = |i: i64| e + (i % 2) * 1000;
        let shared: Vec<Pt> = (0..=8).map(|i| (mid(i), i * (e / 8))).collect();

        let mut left: Vec<Pt> = vec![(0, 0)];
        left.extend(shared.iter().copied());
        left.push((0, e));

        let mut right: Vec<Pt> = shared.iter().rev().copied().collect();
        right.push((2 * e, 0));
        right.insert(0, (2 * e, e));

        let mut a = poly(&left);
        let mut b = poly(&right);
        let mut polys = vec![&mut a, &mut b];
        simplify_shared_borders(&mut polys, &options());

        let pa = border_points(&a);
        let pb = border_points(&b);
        // every surviving border vertex of one polygon that lies on the
        // shared edge also survives identically in the other
        let on_edge = |p: &&Pt| p.0 >= e;
        let edge_a: BTreeSet<Pt> = pa.iter().filter(|p| on_edge(p) && p.0 < 2 * e).copied().collect();
        let edge_b: BTreeSet<Pt> = pb.iter().filter(|p| on_edge(p) && p.0 < 2 * e).copied().collect();
        assert_eq!(edge_a, edge_b);
        assert!(!edge_a.is_empty());
    }

    #[test]
    fn test_lone_polygon_still_simplifies() {
        let e = 1_i64 << 24;
        // collinear midpoints on each side should go away
        let mut a = poly(&[
            (0, 0),
            (e / 2, 3),
            (e, 0),
            (e, e / 2),
            (e, e),
            (0, e),
        ]);
        let before = border_points(&a).len();
        let mut polys = vec![&mut a];
        simplify_shared_borders(&mut polys, &options());
        assert!(border_points(&a).len() < before);
    }

    #[test]
    fn test_structure_preserved() {
        let e = 1_i64 << 20;
        let mut a = poly(&[(0, 0), (e, 0), (e, e), (0, e)]);
        let close_count = |g: &DrawVec| g.iter().filter(|d| d.op == DrawOp::ClosePath).count();
        let before = close_count(&a);
        let mut polys = vec![&mut a];
        simplify_shared_borders(&mut polys, &options());
        assert_eq!(close_count(&a), before);
        let pts = border_points(&a);
        assert!(pts.len() >= 4);
        assert_eq!(pts.first(), pts.last());
    }
}
