//! Line and ring simplification.
//!
//! Douglas-Peucker by default, Visvalingam effective-area optionally.
//! Both respect the `necessary` flag: run endpoints, points on the tile
//! border, and shared-border nodes survive no matter the tolerance.

use std::collections::HashSet;

use super::{Draw, DrawOp, DrawVec};

pub struct SimplifyOptions<'a> {
    pub z: u8,
    pub detail: u8,
    /// Multiplier on the one-pixel base tolerance.
    pub simplification: f64,
    /// Keep at least this many points per run even beyond tolerance.
    pub retain: usize,
    pub visvalingam: bool,
    /// Mark points on (or beyond) `tile_bounds` as unremovable.
    pub mark_tile_bounds: bool,
    /// Buffered world bounds of the tile being rendered.
    pub tile_bounds: [i64; 4],
    /// Vertices that shared-border detection pinned down.
    pub shared_nodes: Option<&'a HashSet<(i64, i64)>>,
}

impl SimplifyOptions<'_> {
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        let pixel = 1_i64 << (32 - u32::from(self.z) - u32::from(self.detail)).min(31);
        pixel as f64 * self.simplification
    }
}

/// Squared distance from `p` to the segment `a..b`.
fn segment_dist2(p: &Draw, a: &Draw, b: &Draw) -> f64 {
    let (px, py) = (p.x as f64, p.y as f64);
    let (ax, ay) = (a.x as f64, a.y as f64);
    let (bx, by) = (b.x as f64, b.y as f64);
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 0.0 {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (px - cx).powi(2) + (py - cy).powi(2)
}

/// Mark the points of `run` that Douglas-Peucker keeps. Splits while the
/// worst deviation exceeds `tol`, or while fewer than `retain` points of
/// the run are kept.
fn douglas_peucker(run: &mut [Draw], tol: f64, retain: usize) {
    let tol2 = tol * tol;
    let mut kept = run.iter().filter(|d| d.necessary).count();
    // candidate splits, worst-first
    let mut stack = vec![(0_usize, run.len() - 1)];
    let mut splits: Vec<(f64, usize, usize, usize)> = Vec::new();
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut worst = 0.0_f64;
        let mut worst_i = first + 1;
        for i in first + 1..last {
            let d2 = segment_dist2(&run[i], &run[first], &run[last]);
            if d2 > worst {
                worst = d2;
                worst_i = i;
            }
        }
        if worst > tol2 {
            run[worst_i].necessary = true;
            kept += 1;
            stack.push((first, worst_i));
            stack.push((worst_i, last));
        } else {
            splits.push((worst, first, worst_i, last));
        }
    }
    // under the retain floor, re-admit the worst offenders
    splits.sort_by(|a, b| b.0.total_cmp(&a.0));
    let mut queue: Vec<(f64, usize, usize, usize)> = splits;
    while kept < retain {
        queue.sort_by(|a, b| b.0.total_cmp(&a.0));
        let Some((err, first, i, last)) = queue.first().copied() else {
            break;
        };
        queue.remove(0);
        if err == 0.0 || run[i].necessary {
            continue;
        }
        run[i].necessary = true;
        kept += 1;
        for (lo, hi) in [(first, i), (i, last)] {
            if hi > lo + 1 {
                let mut worst = 0.0_f64;
                let mut worst_i = lo + 1;
                for k in lo + 1..hi {
                    let d2 = segment_dist2(&run[k], &run[lo], &run[hi]);
                    if d2 > worst {
                        worst = d2;
                        worst_i = k;
                    }
                }
                queue.push((worst, lo, worst_i, hi));
            }
        }
    }
}

fn triangle_area2(a: &Draw, b: &Draw, c: &Draw) -> f64 {
    let abx = (b.x - a.x) as f64;
    let aby = (b.y - a.y) as f64;
    let acx = (c.x - a.x) as f64;
    let acy = (c.y - a.y) as f64;
    (abx * acy - acx * aby).abs() / 2.0
}

/// Visvalingam: repeatedly drop the point spanning the smallest triangle
/// until every remaining triangle is significant.
fn visvalingam(run: &mut [Draw], tol: f64, retain: usize) {
    let tol_area = tol * tol;
    let n = run.len();
    let mut alive: Vec<bool> = vec![true; n];
    let mut live = n;
    loop {
        let necessary_left = run
            .iter()
            .zip(&alive)
            .filter(|&(d, &a)| a && d.necessary)
            .count();
        if live <= retain.max(2) || live <= necessary_left {
            break;
        }
        let mut min_area = f64::INFINITY;
        let mut min_i = None;
        let mut prev = None;
        let mut cur: Option<usize> = None;
        for i in 0..n {
            if !alive[i] {
                continue;
            }
            if let (Some(p), Some(c)) = (prev, cur) {
                if !run[c].necessary {
                    let area = triangle_area2(&run[p], &run[c], &run[i]);
                    if area < min_area {
                        min_area = area;
                        min_i = Some(c);
                    }
                }
            }
            prev = cur;
            cur = Some(i);
        }
        match min_i {
            Some(i) if min_area < tol_area => {
                alive[i] = false;
                live -= 1;
            }
            _ => break,
        }
    }
    for (d, a) in run.iter_mut().zip(&alive) {
        if *a {
            d.necessary = true;
        }
    }
}

/// Simplify the `MoveTo`+`LineTo` runs of `geom` in place and return the
/// surviving points. `ClosePath` markers pass through untouched.
#[must_use]
pub fn simplify_lines(geom: &[Draw], opts: &SimplifyOptions<'_>) -> DrawVec {
    let tol = opts.tolerance();
    let mut out = DrawVec::with_capacity(geom.len());
    let mut i = 0;
    while i < geom.len() {
        if geom[i].op != DrawOp::MoveTo {
            out.push(geom[i]);
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < geom.len() && geom[j].op == DrawOp::LineTo {
            j += 1;
        }
        let mut run: Vec<Draw> = geom[i..j].to_vec();
        let last = run.len() - 1;
        run[0].necessary = true;
        run[last].necessary = true;
        for d in &mut run {
            if opts.mark_tile_bounds
                && (d.x <= opts.tile_bounds[0]
                    || d.x >= opts.tile_bounds[2]
                    || d.y <= opts.tile_bounds[1]
                    || d.y >= opts.tile_bounds[3])
            {
                d.necessary = true;
            }
            if let Some(nodes) = opts.shared_nodes {
                if nodes.contains(&(d.x, d.y)) {
                    d.necessary = true;
                }
            }
        }
        if run.len() > 2 {
            if opts.visvalingam {
                visvalingam(&mut run, tol, opts.retain);
            } else {
                douglas_peucker(&mut run, tol, opts.retain);
            }
        }
        out.extend(run.into_iter().filter(|d| d.necessary));
        i = j;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(points: &[(i64, i64)]) -> DrawVec {
        points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                Draw::new(if i == 0 { DrawOp::MoveTo } else { DrawOp::LineTo }, x, y)
            })
            .collect()
    }

    fn options(bounds: [i64; 4]) -> SimplifyOptions<'static> {
        SimplifyOptions {
            z: 0,
            detail: 12,
            simplification: 1.0,
            retain: 0,
            visvalingam: false,
            mark_tile_bounds: false,
            tile_bounds: bounds,
            shared_nodes: None,
        }
    }

    #[test]
    fn test_collinear_points_removed() {
        // one pixel at z0/d12 is 2^20 world units; deviations below that
        // are noise
        let g = line(&[(0, 0), (1 << 22, 10), (2 << 22, 0), (4 << 22, 5)]);
        let opts = options([0, 0, 1 << 30, 1 << 30]);
        let simplified = simplify_lines(&g, &opts);
        assert_eq!(simplified.len(), 2);
        assert_eq!((simplified[0].x, simplified[0].y), (0, 0));
        assert_eq!((simplified[1].x, simplified[1].y), (4 << 22, 5));
    }

    #[test]
    fn test_corner_survives() {
        let g = line(&[(0, 0), (1 << 24, 0), (1 << 24, 1 << 24)]);
        let opts = options([0, 0, 1 << 30, 1 << 30]);
        let simplified = simplify_lines(&g, &opts);
        assert_eq!(simplified.len(), 3);
    }

    #[test]
    fn test_necessary_points_survive() {
        let mut g = line(&[(0, 0), (1 << 22, 10), (2 << 22, 0)]);
        g[1].necessary = true;
        let opts = options([0, 0, 1 << 30, 1 << 30]);
        let simplified = simplify_lines(&g, &opts);
        assert_eq!(simplified.len(), 3);
    }

    #[test]
    fn test_tile_bound_points_survive() {
        let g = line(&[(0, 5), (1 << 22, 5), (2 << 22, 5)]);
        let mut opts = options([0, 0, 1 << 30, 1 << 30]);
        opts.mark_tile_bounds = true;
        let simplified = simplify_lines(&g, &opts);
        // (0, 5) sits on the x=0 bound; the middle point still goes
        assert_eq!(simplified.len(), 2);

        let g2 = line(&[(5, 5), (0, 1 << 22), (5, 2 << 22)]);
        let simplified2 = simplify_lines(&g2, &opts);
        assert_eq!(simplified2.len(), 3);
    }

    #[test]
    fn test_shared_nodes_survive() {
        let nodes: HashSet<(i64, i64)> = [(1 << 22, 10_i64)].into_iter().collect();
        let g = line(&[(0, 0), (1 << 22, 10), (2 << 22, 0)]);
        let mut opts = options([0, 0, 1 << 30, 1 << 30]);
        opts.shared_nodes = Some(&nodes);
        let simplified = simplify_lines(&g, &opts);
        assert_eq!(simplified.len(), 3);
    }

    #[test]
    fn test_retain_floor() {
        let g = line(&[(0, 0), (1 << 20, 1), (2 << 20, 0), (3 << 20, 1), (4 << 20, 0)]);
        let mut opts = options([0, 0, 1 << 30, 1 << 30]);
        opts.retain = 4;
        let simplified = simplify_lines(&g, &opts);
        assert!(simplified.len() >= 4, "kept {}", simplified.len());
    }

    #[test]
    fn test_visvalingam_smooths() {
        let g = line(&[(0, 0), (1 << 22, 10), (2 << 22, 0), (4 << 22, 5)]);
        let mut opts = options([0, 0, 1 << 30, 1 << 30]);
        opts.visvalingam = true;
        let simplified = simplify_lines(&g, &opts);
        assert_eq!(simplified.len(), 2);
    }

    #[test]
    fn test_multiple_runs_independent() {
        let mut g = line(&[(0, 0), (1 << 22, 10), (2 << 22, 0)]);
        g.extend(line(&[(5 << 22, 0), (6 << 22, 4), (7 << 22, 0)]));
        let opts = options([0, 0, 1 << 30, 1 << 30]);
        let simplified = simplify_lines(&g, &opts);
        assert_eq!(simplified.len(), 4);
        assert_eq!(simplified[2].op, DrawOp::MoveTo);
    }
}
