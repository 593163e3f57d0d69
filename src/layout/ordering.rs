//! Column ordering. Long edges are split with dummy nodes so every ordering
//! edge spans one column, then alternating barycenter sweeps reorder each
//! column. A sweep is kept only if it does not add crossings.

use std::cmp::Ordering;

use super::LayoutGraph;

/// Real nodes grouped by layer, each column sorted by node id.
pub fn columns(graph: &LayoutGraph, layers: &[usize]) -> Vec<Vec<usize>> {
    let depth = layers.iter().max().map_or(0, |m| m + 1);
    let mut cols = vec![Vec::new(); depth];
    for (node, &layer) in layers.iter().enumerate() {
        if let Some(col) = cols.get_mut(layer) {
            col.push(node);
        }
    }
    for col in &mut cols {
        col.sort_by(|a, b| graph.id(*a).cmp(graph.id(*b)));
    }
    cols
}

/// Columns extended with dummy nodes. Indices `< real` are graph nodes,
/// the rest are dummies.
#[derive(Debug, Clone)]
pub struct Augmented {
    pub cols: Vec<Vec<usize>>,
    pub real: usize,
    pub pred_adj: Vec<Vec<usize>>,
    pub succ_adj: Vec<Vec<usize>>,
}

impl Augmented {
    pub fn is_dummy(&self, node: usize) -> bool {
        node >= self.real
    }

    pub fn dummies(&self) -> usize {
        self.pred_adj.len() - self.real
    }

    fn link(&mut self, from: usize, to: usize) {
        if let Some(s) = self.succ_adj.get_mut(from) {
            s.push(to);
        }
        if let Some(p) = self.pred_adj.get_mut(to) {
            p.push(from);
        }
    }
}

/// Walk every edge column by column, adding a dummy at each column strictly
/// between its ends. Edges inside one column are dropped from ordering.
pub fn insert_dummies(graph: &LayoutGraph, layers: &[usize], cols: &[Vec<usize>]) -> Augmented {
    let real = graph.len();
    let mut aug = Augmented {
        cols: cols.to_vec(),
        real,
        pred_adj: vec![Vec::new(); real],
        succ_adj: vec![Vec::new(); real],
    };
    for u in 0..real {
        let Some(&cu) = layers.get(u) else { continue };
        for &v in graph.succs(u) {
            let Some(&cv) = layers.get(v) else { continue };
            if cu == cv {
                continue;
            }
            let mut prev = u;
            let mut c = cu;
            while c != cv {
                c = if cv > cu { c + 1 } else { c - 1 };
                let next = if c == cv {
                    v
                } else {
                    let d = aug.pred_adj.len();
                    aug.pred_adj.push(Vec::new());
                    aug.succ_adj.push(Vec::new());
                    if let Some(col) = aug.cols.get_mut(c) {
                        col.push(d);
                    }
                    d
                };
                aug.link(prev, next);
                prev = next;
            }
        }
    }
    aug
}

/// Position of every node within its column.
fn ranks(cols: &[Vec<usize>], nodes: usize) -> Vec<usize> {
    let mut rank = vec![0; nodes];
    for col in cols {
        set_ranks(&mut rank, col);
    }
    rank
}

fn set_ranks(rank: &mut [usize], col: &[usize]) {
    for (i, &n) in col.iter().enumerate() {
        if let Some(r) = rank.get_mut(n) {
            *r = i;
        }
    }
}

/// Stable reorder by `key`, ties broken by the current position.
fn reorder(col: &mut Vec<usize>, key: impl Fn(usize, usize) -> f64) {
    let mut keyed: Vec<(f64, usize, usize)> = col.iter().enumerate().map(|(i, &n)| (key(n, i), i, n)).collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    *col = keyed.into_iter().map(|(_, _, n)| n).collect();
}

fn mean_rank(neighbours: &[usize], rank: &[usize]) -> Option<f64> {
    let idxs: Vec<usize> = neighbours.iter().filter_map(|n| rank.get(*n).copied()).collect();
    if idxs.is_empty() {
        return None;
    }
    Some(idxs.iter().sum::<usize>() as f64 / idxs.len() as f64)
}

fn sweep_pass(aug: &mut Augmented) {
    let nodes = aug.pred_adj.len();
    let mut rank = ranks(&aug.cols, nodes);
    let n_cols = aug.cols.len();
    let empty: Vec<usize> = Vec::new();

    for c in 1..n_cols {
        let Some(col) = aug.cols.get_mut(c) else { continue };
        let preds = &aug.pred_adj;
        let r = &rank;
        reorder(col, |n, i| mean_rank(preds.get(n).unwrap_or(&empty), r).unwrap_or(i as f64));
        set_ranks(&mut rank, col);
    }
    for c in (0..n_cols.saturating_sub(1)).rev() {
        let Some(col) = aug.cols.get_mut(c) else { continue };
        let succs = &aug.succ_adj;
        let r = &rank;
        reorder(col, |n, i| mean_rank(succs.get(n).unwrap_or(&empty), r).unwrap_or(i as f64));
        set_ranks(&mut rank, col);
    }
}

/// Crossings between ordering edges, which all join neighbouring columns.
/// A long edge is counted through its dummies.
pub fn count_crossings(aug: &Augmented) -> usize {
    let rank = ranks(&aug.cols, aug.pred_adj.len());
    let mut crossings = 0;
    for col in &aug.cols {
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for &u in col {
            let (Some(&ru), Some(succs)) = (rank.get(u), aug.succ_adj.get(u)) else { continue };
            edges.extend(succs.iter().filter_map(|v| rank.get(*v).map(|&rv| (ru, rv))));
        }
        for (i, a) in edges.iter().enumerate() {
            for b in edges.iter().skip(i + 1) {
                let inverted = matches!(
                    (a.0.cmp(&b.0), a.1.cmp(&b.1)),
                    (Ordering::Less, Ordering::Greater) | (Ordering::Greater, Ordering::Less)
                );
                if inverted {
                    crossings += 1;
                }
            }
        }
    }
    crossings
}

/// Up to `passes` alternating left-to-right / right-to-left barycenter
/// sweeps over the augmented columns. Nodes without neighbours on the
/// reference side keep their place. Returns the crossing count before the
/// first sweep followed by the count after each accepted sweep; a sweep that
/// would add crossings is discarded and ends the run.
pub fn barycenter_sweeps(aug: &mut Augmented, passes: usize) -> Vec<usize> {
    let mut current = count_crossings(aug);
    let mut history = vec![current];
    for _ in 0..passes {
        let mut candidate = aug.clone();
        sweep_pass(&mut candidate);
        let crossings = count_crossings(&candidate);
        if crossings > current {
            break;
        }
        aug.cols = candidate.cols;
        current = crossings;
        history.push(current);
    }
    history
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::layout::layering::alap;

    fn graph(n: usize, edges: &[(usize, usize)]) -> LayoutGraph {
        let mut g = LayoutGraph::new((0..n).map(|i| format!("n{i}")));
        for &(a, b) in edges {
            g.add_edge(a, b);
        }
        g
    }

    #[test]
    fn columns_are_sorted_by_id() {
        let g = LayoutGraph::new(["b", "a", "c"]);
        assert_eq!(columns(&g, &[0, 0, 1]), vec![vec![1, 0], vec![2]]);
    }

    #[test]
    fn long_edges_get_one_dummy_per_gap() {
        // 0 -> 1 -> 2 -> 3 plus the shortcut 0 -> 3
        let g = graph(4, &[(0, 1), (1, 2), (2, 3), (0, 3)]);
        let layers = alap(&g);
        let cols = columns(&g, &layers);
        let aug = insert_dummies(&g, &layers, &cols);
        assert_eq!(aug.dummies(), 2);
        for (c, col) in aug.cols.iter().enumerate().skip(1) {
            for &n in col {
                for &p in &aug.pred_adj[n] {
                    assert!(aug.cols[c - 1].contains(&p), "edge into column {c} skips a column");
                }
            }
        }
        assert!(aug.is_dummy(aug.succ_adj[0].iter().copied().max().unwrap()));
    }

    #[test]
    fn sweeps_untangle_a_crossed_pair() {
        // a0 -> b1, a1 -> b0 sorted by id crosses once
        let mut g = LayoutGraph::new(["a0", "a1", "b0", "b1"]);
        g.add_edge(0, 3);
        g.add_edge(1, 2);
        let layers = alap(&g);
        let cols = columns(&g, &layers);
        let mut aug = insert_dummies(&g, &layers, &cols);
        assert_eq!(count_crossings(&aug), 1);
        let history = barycenter_sweeps(&mut aug, 4);
        assert_eq!(history.first(), Some(&1));
        assert_eq!(count_crossings(&aug), 0);
    }

    #[test]
    fn long_edges_are_counted_through_their_dummies() {
        // two chains, each with a shortcut spanning two columns
        let g = graph(6, &[(0, 1), (1, 2), (3, 4), (4, 5), (3, 5), (0, 2)]);
        let layers = alap(&g);
        let cols = columns(&g, &layers);
        let mut aug = insert_dummies(&g, &layers, &cols);
        assert_eq!(aug.dummies(), 2);
        let before = count_crossings(&aug);
        barycenter_sweeps(&mut aug, 4);
        assert!(count_crossings(&aug) <= before);
        let real: usize = aug.cols.iter().flatten().filter(|n| !aug.is_dummy(**n)).count();
        assert_eq!(real, 6);
    }

    #[test]
    fn zero_passes_keep_the_initial_order() {
        let g = graph(4, &[(0, 3), (1, 2)]);
        let layers = alap(&g);
        let cols = columns(&g, &layers);
        let mut aug = insert_dummies(&g, &layers, &cols);
        let history = barycenter_sweeps(&mut aug, 0);
        assert_eq!(history.len(), 1);
        assert_eq!(aug.cols, cols);
    }
}
