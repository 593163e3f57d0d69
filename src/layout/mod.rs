//! Layered layout of the wired chip graph.
//!
//! Nodes are layered as late as possible, columns are ordered by barycenter
//! sweeps over a dummy-augmented graph, rows are spaced and re-centred, and
//! a final local swap pass tidies adjacent pairs.

pub mod layering;
pub mod ordering;
pub mod swap;

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::LayoutConfig;
use crate::error::{CompileError, Result};
use crate::model::{ChipDocument, Position};

/// Directed graph over node indices, keeping each node's document id for
/// stable ordering.
#[derive(Debug, Clone, Default)]
pub struct LayoutGraph {
    ids: Vec<String>,
    preds: Vec<Vec<usize>>,
    succs: Vec<Vec<usize>>,
}

impl LayoutGraph {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let n = ids.len();
        Self {
            ids,
            preds: vec![Vec::new(); n],
            succs: vec![Vec::new(); n],
        }
    }

    /// Nodes in document order; an edge for every input whose upstream node
    /// exists in the document.
    pub fn from_document(doc: &ChipDocument) -> Self {
        let mut graph = Self::new(doc.graph.nodes.iter().map(|n| n.id.clone()));
        let index: HashMap<&str, usize> = doc
            .graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        for (to, node) in doc.graph.nodes.iter().enumerate() {
            for port in &node.inputs {
                let Some(upstream) = &port.connected_output else { continue };
                if let Some(&from) = index.get(upstream.node_id.as_str()) {
                    graph.add_edge(from, to);
                }
            }
        }
        graph
    }

    /// Add `from -> to`. Self loops and repeats are ignored.
    pub fn add_edge(&mut self, from: usize, to: usize) {
        if from == to || from >= self.len() || to >= self.len() {
            return;
        }
        if let Some(s) = self.succs.get_mut(from) {
            if s.contains(&to) {
                return;
            }
            s.push(to);
        }
        if let Some(p) = self.preds.get_mut(to) {
            p.push(from);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, node: usize) -> &str {
        self.ids.get(node).map_or("", String::as_str)
    }

    pub fn preds(&self, node: usize) -> &[usize] {
        self.preds.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn succs(&self, node: usize) -> &[usize] {
        self.succs.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.succs.iter().map(Vec::len).sum()
    }
}

/// Per-layer overlap removal, x from the layer, then vertical re-centring
/// around zero.
fn finalize(layers: &[usize], ys: &[f64], config: &LayoutConfig) -> Vec<Position> {
    let mut positions: Vec<Position> = layers
        .iter()
        .zip(ys)
        .map(|(&layer, &y)| Position {
            x: layer as f64 * config.x_spacing,
            y,
        })
        .collect();

    let depth = layers.iter().max().map_or(0, |m| m + 1);
    let mut by_layer: Vec<Vec<usize>> = vec![Vec::new(); depth];
    for (node, &layer) in layers.iter().enumerate() {
        if let Some(col) = by_layer.get_mut(layer) {
            col.push(node);
        }
    }
    for col in &mut by_layer {
        col.sort_by(|a, b| {
            let ya = positions.get(*a).map_or(0.0, |p| p.y);
            let yb = positions.get(*b).map_or(0.0, |p| p.y);
            ya.total_cmp(&yb).then(a.cmp(b))
        });
        let mut floor: Option<f64> = None;
        for &node in col.iter() {
            let Some(p) = positions.get_mut(node) else { continue };
            if let Some(min_y) = floor {
                if p.y < min_y {
                    p.y = min_y;
                }
            }
            floor = Some(p.y + config.y_spacing);
        }
    }

    let (lo, hi) = positions
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));
    if lo.is_finite() && hi.is_finite() {
        let centre = (lo + hi) / 2.0;
        for p in &mut positions {
            p.y -= centre;
        }
    }
    positions
}

/// Layers and crossing-reduced column order, before any coordinates.
#[derive(Debug, Clone)]
pub struct Ordered {
    pub layers: Vec<usize>,
    pub aug: ordering::Augmented,
    /// Crossing count before the sweeps, then after each accepted sweep.
    pub crossings: Vec<usize>,
}

pub fn order(graph: &LayoutGraph, config: &LayoutConfig) -> Ordered {
    let layers = layering::alap(graph);
    let cols = ordering::columns(graph, &layers);
    let mut aug = ordering::insert_dummies(graph, &layers, &cols);
    debug!(columns = aug.cols.len(), dummies = aug.dummies(), "split long edges");
    let crossings = ordering::barycenter_sweeps(&mut aug, config.sweep_passes);
    debug!(?crossings, "barycenter sweeps");
    Ordered { layers, aug, crossings }
}

/// Positions for every node of `graph`, indexed like the graph. The global
/// x offset is not applied here.
pub fn compute(graph: &LayoutGraph, config: &LayoutConfig) -> Vec<Position> {
    if graph.is_empty() {
        return Vec::new();
    }
    let Ordered { layers, aug, .. } = order(graph, config);

    let mut ys = vec![0.0; graph.len()];
    for col in &aug.cols {
        let real = col.iter().filter(|n| !aug.is_dummy(**n));
        for (row, &node) in real.enumerate() {
            if let Some(y) = ys.get_mut(node) {
                *y = row as f64 * config.y_spacing;
            }
        }
    }

    let mut positions = finalize(&layers, &ys, config);
    let swaps = swap::local_swaps(graph, &mut positions, config);
    debug!(swaps, "local swaps");
    positions
}

/// Lay out the document's nodes and write their visual positions. Returns
/// the number of nodes placed.
pub fn apply(doc: &mut ChipDocument, config: &LayoutConfig) -> Result<usize> {
    let graph = LayoutGraph::from_document(doc);
    let positions = compute(&graph, config);
    if let Some((i, p)) = positions
        .iter()
        .enumerate()
        .find(|(_, p)| !(p.x.is_finite() && p.y.is_finite()))
    {
        return Err(CompileError::layout(format!("non-finite position ({}, {})", p.x, p.y)).with_node(graph.id(i)));
    }
    for (node, p) in doc.graph.nodes.iter_mut().zip(&positions) {
        node.visual_position = Position {
            x: p.x + config.global_x_offset,
            y: p.y,
        };
    }
    info!(nodes = positions.len(), edges = graph.edge_count(), "laid out graph");
    Ok(positions.len())
}
