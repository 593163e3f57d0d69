//! Local refinement after coordinates exist: adjacent nodes in a column are
//! swapped when that lowers a weighted sum of crossings and distance from
//! the neighbours' median rank. Each unordered pair swaps at most once.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use super::LayoutGraph;
use crate::config::LayoutConfig;
use crate::model::Position;

/// Columns rebuilt from x coordinates, each ordered by y.
struct Grid {
    cols: Vec<Vec<usize>>,
    col_of: Vec<Option<usize>>,
    rank: Vec<usize>,
}

impl Grid {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_positions(positions: &[Position], x_spacing: f64) -> Self {
        let min_x = positions.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let mut col_of = vec![None; positions.len()];
        let mut cols: Vec<Vec<usize>> = Vec::new();
        for (node, p) in positions.iter().enumerate() {
            let c = ((p.x - min_x) / x_spacing).round().max(0.0) as usize;
            if cols.len() <= c {
                cols.resize_with(c + 1, Vec::new);
            }
            if let Some(col) = cols.get_mut(c) {
                col.push(node);
            }
            if let Some(slot) = col_of.get_mut(node) {
                *slot = Some(c);
            }
        }
        let y = |n: &usize| positions.get(*n).map_or(0.0, |p| p.y);
        let mut rank = vec![0; positions.len()];
        for col in &mut cols {
            col.sort_by(|a, b| y(a).total_cmp(&y(b)));
            for (i, &n) in col.iter().enumerate() {
                if let Some(r) = rank.get_mut(n) {
                    *r = i;
                }
            }
        }
        Self { cols, col_of, rank }
    }

    fn in_col(&self, node: usize, col: Option<usize>) -> bool {
        col.is_some() && self.col_of.get(node).copied().flatten() == col
    }

    fn ranks_of(&self, nodes: &[usize]) -> Vec<usize> {
        nodes.iter().filter_map(|n| self.rank.get(*n).copied()).collect()
    }
}

/// Pairs where an endpoint of `a` ranks below one of `b`.
fn inversions(a: &[usize], b: &[usize]) -> usize {
    a.iter().map(|ra| b.iter().filter(|rb| ra > rb).count()).sum()
}

fn median(mut ranks: Vec<usize>) -> Option<f64> {
    ranks.sort_unstable();
    let m = ranks.len();
    if m == 0 {
        return None;
    }
    let hi = *ranks.get(m / 2)?;
    if m % 2 == 1 {
        return Some(hi as f64);
    }
    let lo = *ranks.get(m / 2 - 1)?;
    Some(0.5 * (lo + hi) as f64)
}

fn median_cost(pos: usize, left: Option<f64>, right: Option<f64>) -> f64 {
    let ms: Vec<f64> = [left, right].into_iter().flatten().collect();
    if ms.is_empty() {
        return 0.0;
    }
    let avg = ms.iter().sum::<f64>() / ms.len() as f64;
    (pos as f64 - avg).abs()
}

struct Neighbours {
    left: Vec<usize>,
    right: Vec<usize>,
}

fn neighbours(graph: &LayoutGraph, grid: &Grid, node: usize, col: usize) -> Neighbours {
    let left_col = col.checked_sub(1);
    let right_col = Some(col + 1);
    let left: Vec<usize> = graph.preds(node).iter().copied().filter(|p| grid.in_col(*p, left_col)).collect();
    let right: Vec<usize> = graph.succs(node).iter().copied().filter(|s| grid.in_col(*s, right_col)).collect();
    Neighbours {
        left: grid.ranks_of(&left),
        right: grid.ranks_of(&right),
    }
}

/// Score change from swapping adjacent `u` (above) and `v` in `col`.
/// Negative means better.
fn swap_delta(graph: &LayoutGraph, grid: &Grid, u: usize, v: usize, col: usize, config: &LayoutConfig) -> f64 {
    let nu = neighbours(graph, grid, u, col);
    let nv = neighbours(graph, grid, v, col);
    let pos_u = grid.rank.get(u).copied().unwrap_or(0);
    let pos_v = grid.rank.get(v).copied().unwrap_or(0);

    let cross_before = inversions(&nu.left, &nv.left) + inversions(&nu.right, &nv.right);
    let cross_after = inversions(&nv.left, &nu.left) + inversions(&nv.right, &nu.right);

    let (mu_l, mu_r) = (median(nu.left.clone()), median(nu.right.clone()));
    let (mv_l, mv_r) = (median(nv.left.clone()), median(nv.right.clone()));
    let median_before = median_cost(pos_u, mu_l, mu_r) + median_cost(pos_v, mv_l, mv_r);
    let median_after = median_cost(pos_v, mu_l, mu_r) + median_cost(pos_u, mv_l, mv_r);

    let before = config.swap_crossing_weight * cross_before as f64 + config.swap_median_weight * median_before;
    let after = config.swap_crossing_weight * cross_after as f64 + config.swap_median_weight * median_after;
    after - before
}

/// Run the swap passes in place. Returns the number of swaps made.
pub fn local_swaps(graph: &LayoutGraph, positions: &mut [Position], config: &LayoutConfig) -> usize {
    if positions.is_empty() {
        return 0;
    }
    let mut swapped: HashSet<(usize, usize)> = HashSet::new();
    for pass in 0..config.swap_passes {
        let mut grid = Grid::from_positions(positions, config.x_spacing);
        let before = swapped.len();
        for c in 0..grid.cols.len() {
            let len = grid.cols.get(c).map_or(0, Vec::len);
            let mut queue: VecDeque<(usize, usize)> = (1..len).map(|j| (j - 1, j)).collect();
            while let Some((i, j)) = queue.pop_front() {
                let Some((&u, &v)) = grid.cols.get(c).and_then(|col| col.get(i).zip(col.get(j))) else {
                    continue;
                };
                let pair = (u.min(v), u.max(v));
                if swapped.contains(&pair) {
                    continue;
                }
                if swap_delta(graph, &grid, u, v, c, config) >= 0.0 {
                    continue;
                }
                let yu = positions.get(u).map_or(0.0, |p| p.y);
                let yv = positions.get(v).map_or(0.0, |p| p.y);
                if let Some(p) = positions.get_mut(u) {
                    p.y = yv;
                }
                if let Some(p) = positions.get_mut(v) {
                    p.y = yu;
                }
                if let Some(col) = grid.cols.get_mut(c) {
                    col.swap(i, j);
                }
                if let Some(r) = grid.rank.get_mut(u) {
                    *r = j;
                }
                if let Some(r) = grid.rank.get_mut(v) {
                    *r = i;
                }
                swapped.insert(pair);
                if i > 0 {
                    queue.push_back((i - 1, i));
                }
                if j + 1 < len {
                    queue.push_back((j, j + 1));
                }
            }
        }
        debug!(pass, swaps = swapped.len() - before, "local swap pass");
        if swapped.len() == before {
            break;
        }
    }
    swapped.len()
}
