//! Longest-path layering: ASAP to find the depth, then ALAP so nodes sit as
//! far right as their successors allow.

use std::collections::VecDeque;

use super::LayoutGraph;

/// Kahn order over the acyclic part of the graph. Nodes on or behind a
/// cycle never reach in-degree zero and are left out.
pub fn topological_order(graph: &LayoutGraph) -> Vec<usize> {
    let mut indegree: Vec<usize> = (0..graph.len()).map(|i| graph.preds(i).len()).collect();
    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(graph.len());
    while let Some(u) = queue.pop_front() {
        order.push(u);
        for &v in graph.succs(u) {
            if let Some(d) = indegree.get_mut(v) {
                *d = d.saturating_sub(1);
                if *d == 0 {
                    queue.push_back(v);
                }
            }
        }
    }
    order
}

/// Earliest layer per node: sources at 0, successors one past their latest
/// predecessor. `None` for nodes outside the topological order.
pub fn asap(graph: &LayoutGraph, order: &[usize]) -> Vec<Option<usize>> {
    let mut layers = vec![None; graph.len()];
    for &u in order {
        let layer = graph
            .preds(u)
            .iter()
            .filter_map(|&p| layers.get(p).copied().flatten())
            .map(|l: usize| l + 1)
            .max()
            .unwrap_or(0);
        if let Some(slot) = layers.get_mut(u) {
            *slot = Some(layer);
        }
    }
    layers
}

/// Latest layer per node without breaking precedence. Sinks sit on the last
/// layer; cycle members fall back to their ASAP layer, or 0.
pub fn alap(graph: &LayoutGraph) -> Vec<usize> {
    let order = topological_order(graph);
    let early = asap(graph, &order);
    let depth = early.iter().flatten().copied().max().unwrap_or(0);

    let mut late: Vec<Option<usize>> = vec![None; graph.len()];
    for &u in order.iter().rev() {
        let layer = graph
            .succs(u)
            .iter()
            .filter_map(|&s| late.get(s).copied().flatten())
            .map(|l| l.saturating_sub(1))
            .min()
            .unwrap_or(depth);
        if let Some(slot) = late.get_mut(u) {
            *slot = Some(layer);
        }
    }
    late.into_iter()
        .zip(early)
        .map(|(l, e)| l.or(e).unwrap_or(0))
        .collect()
}
