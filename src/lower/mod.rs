//! Lowering from IR to document nodes: catalog resolution first, then
//! instantiation of nodes, ports and side-table rows.

pub mod instantiate;
pub mod resolve;

pub use instantiate::{instantiate, safe_key, LoweredRef, NodeMap};
pub use resolve::{resolve, Resolution, ResolvedNode, VariableBinding};
