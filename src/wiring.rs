//! Connection wiring: IR edges to port-index instructions, then applied to
//! the lowered document.

use tracing::{debug, info};

use crate::catalog::{port_index, PortMiss};
use crate::dsl::ir::{IrEdge, IrGraph};
use crate::error::{CompileError, Result};
use crate::lower::NodeMap;
use crate::model::node::normalize_node_id;
use crate::model::{ChipDocument, PortRef};

/// One resolved connection between lowered nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub from_node: String,
    pub from_port: usize,
    pub to_node: String,
    pub to_port: usize,
    /// The IR edge this came from, for error reports.
    pub edge: IrEdge,
}

fn miss_error(miss: PortMiss, node: &str, port: &str, names: &[&str], side: &str) -> CompileError {
    let message = match miss {
        PortMiss::Ambiguous(n) => {
            format!("{side} port of '{node}' is ambiguous: the module has {n} {side} ports, name one")
        }
        PortMiss::OutOfRange(i) => {
            format!("{side} port index {i} of '{node}' is out of range ({} ports)", names.len())
        }
        PortMiss::Unmatched => format!("{side} port '{port}' of '{node}' matches no declared port"),
    };
    CompileError::wiring(message)
        .with_node(node)
        .with_port(port)
        .with_candidates(names.iter().map(|n| (*n).to_string()))
}

/// Resolve every IR edge to a connection instruction.
pub fn build(graph: &IrGraph, nodes: &NodeMap<'_>, port_cutoff: f64) -> Result<Vec<Connection>> {
    let mut out = Vec::with_capacity(graph.edges.len());
    for edge in &graph.edges {
        let lookup = |id: &str| {
            nodes
                .get(id)
                .ok_or_else(|| CompileError::wiring(format!("edge endpoint '{id}' was never lowered")).with_node(id))
        };
        let from = lookup(&edge.from_node)?;
        let to = lookup(&edge.to_node)?;

        let outputs: Vec<&str> = from.descriptor.output_names().collect();
        let inputs: Vec<&str> = to.descriptor.input_names().collect();
        let from_port = port_index(&edge.from_port, &outputs, port_cutoff)
            .map_err(|m| miss_error(m, &edge.from_node, &edge.from_port, &outputs, "output"))?;
        let to_port = port_index(&edge.to_port, &inputs, port_cutoff)
            .map_err(|m| miss_error(m, &edge.to_node, &edge.to_port, &inputs, "input"))?;

        debug!(
            from = %edge.from_node, from_port, to = %edge.to_node, to_port,
            "resolved connection"
        );
        out.push(Connection {
            from_node: from.lowered_id.clone(),
            from_port,
            to_node: to.lowered_id.clone(),
            to_port,
            edge: edge.clone(),
        });
    }
    Ok(out)
}

/// Apply connections. Each sets the downstream port's upstream reference and
/// adds itself to the upstream port's downstream set, which is kept sorted so
/// the result does not depend on application order.
pub fn apply(doc: &mut ChipDocument, connections: &[Connection]) -> Result<usize> {
    for conn in connections {
        let fail = |msg: String| {
            CompileError::wiring(msg)
                .with_node(&conn.edge.from_node)
                .with_port(&conn.edge.from_port)
        };
        let from_idx = doc
            .node_index(&normalize_node_id(&conn.from_node))
            .ok_or_else(|| fail(format!("node '{}' is not in the document", conn.from_node)))?;
        let to_idx = doc
            .node_index(&normalize_node_id(&conn.to_node))
            .ok_or_else(|| fail(format!("node '{}' is not in the document", conn.to_node)))?;

        let (from_id, from_port_id) = {
            let node = doc.graph.nodes.get(from_idx).ok_or_else(|| fail("upstream node vanished".into()))?;
            let port = node
                .outputs
                .get(conn.from_port)
                .ok_or_else(|| fail(format!("'{}' has no output {}", node.id, conn.from_port)))?;
            (node.id.clone(), port.id.clone())
        };
        let downstream = {
            let node = doc.graph.nodes.get_mut(to_idx).ok_or_else(|| fail("downstream node vanished".into()))?;
            let node_id = node.id.clone();
            let port = node.inputs.get_mut(conn.to_port).ok_or_else(|| {
                CompileError::wiring(format!("'{node_id}' has no input {}", conn.to_port))
                    .with_node(&conn.edge.to_node)
                    .with_port(&conn.edge.to_port)
            })?;
            port.connected_output = Some(PortRef {
                id: from_port_id,
                node_id: from_id,
            });
            PortRef {
                id: port.id.clone(),
                node_id,
            }
        };

        let port = doc
            .graph
            .nodes
            .get_mut(from_idx)
            .and_then(|n| n.outputs.get_mut(conn.from_port))
            .ok_or_else(|| fail("upstream port vanished".into()))?;
        if let Err(pos) = port
            .connected_inputs
            .binary_search_by(|r| (&r.node_id, &r.id).cmp(&(&downstream.node_id, &downstream.id)))
        {
            port.connected_inputs.insert(pos, downstream);
        }
    }
    info!(connections = connections.len(), "wired graph");
    Ok(connections.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::catalog::ModuleCatalog;
    use crate::dsl::compile_source;
    use crate::error::Stage;
    use crate::lower::{instantiate, resolve};
    use crate::model::SaveDocument;
    use serde_json::json;

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::from_json(json!({
            "1": {
                "source_info": {"chip_names_friendly_name": "Add", "allmod_viewmodel": "AddNodeViewModel"},
                "inputs": [{"name": "A"}, {"name": "B"}],
                "outputs": [{"name": "Sum"}],
                "gate_data_type": 2
            },
            "2": {
                "source_info": {"chip_names_friendly_name": "Split", "allmod_viewmodel": "SplitViewModel"},
                "inputs": [{"name": "Vector"}],
                "outputs": [{"name": "X"}, {"name": "Y"}, {"name": "Z"}],
                "gate_data_type": 8
            }
        }))
        .unwrap()
    }

    fn lowered(src: &str) -> (IrGraph, ChipDocument, Result<Vec<Connection>>) {
        let graph = compile_source(src).unwrap();
        let catalog = catalog();
        let res = resolve(&graph, &catalog, 0.1).unwrap();
        let mut doc = SaveDocument::from_value(json!({"saveObjectContainers": [{"saveObjects": {}}]}))
            .unwrap()
            .unpack(Stage::Wiring)
            .unwrap();
        let map = instantiate(&mut doc, &graph, &res, catalog.get("variable").unwrap()).unwrap();
        let conns = build(&graph, &map, 0.4);
        (graph, doc, conns)
    }

    #[test]
    fn every_edge_becomes_one_connection() {
        let (graph, mut doc, conns) = lowered("s = Add(A=INPUT(), B=INPUT())\nOUTPUT(Number=s)");
        let conns = conns.unwrap();
        assert_eq!(conns.len(), graph.edges.len());
        assert_eq!(apply(&mut doc, &conns).unwrap(), 3);

        let add = doc.graph.nodes.iter().find(|n| n.id.starts_with("AddNodeViewModel")).unwrap();
        assert!(add.inputs.iter().all(|p| p.connected_output.is_some()));
        assert_eq!(add.outputs[0].connected_inputs.len(), 1);
        let exit = doc.graph.nodes.iter().find(|n| n.id.starts_with("ExitNodeViewModel")).unwrap();
        assert_eq!(exit.inputs[0].connected_output.as_ref().unwrap().node_id, add.id);
    }

    #[test]
    fn application_order_does_not_matter() {
        let (_, doc, conns) = lowered("x = INPUT()\na = Add(A=x, B=x)\nb = Add(A=x, B=a)");
        let conns = conns.unwrap();
        let mut forward = doc.clone();
        let mut backward = doc;
        apply(&mut forward, &conns).unwrap();
        let reversed: Vec<_> = conns.iter().rev().cloned().collect();
        apply(&mut backward, &reversed).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn named_output_ports_resolve() {
        let (_, _, conns) = lowered("s = Split(Vector=INPUT())\nOUTPUT(Number=s[\"Y\"])");
        let conns = conns.unwrap();
        assert!(conns.iter().any(|c| c.from_port == 1));
    }

    #[test]
    fn ambiguous_output_is_fatal() {
        let (_, _, conns) = lowered("s = Split(Vector=INPUT())\nOUTPUT(Number=s)");
        let err = conns.unwrap_err();
        assert_eq!(err.stage, Stage::Wiring);
        assert_eq!(err.context.candidates, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn missing_document_node_is_fatal() {
        let (_, mut doc, conns) = lowered("s = Add(A=INPUT(), B=INPUT())");
        doc.graph.nodes.clear();
        let err = apply(&mut doc, &conns.unwrap()).unwrap_err();
        assert_eq!(err.stage, Stage::Wiring);
    }
}
