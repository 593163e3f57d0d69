pub mod document;
pub mod gate;
pub mod node;
pub mod payload;

pub use document::{ChipDocument, ChipGraph, IoEntry, MechanicInput, SaveDocument, VariableEntry};
pub use gate::{GateType, GateValue, OpSchema};
pub use node::{InputPort, LoweredNode, OpCode, OutputPort, PortRef, Position};
pub use payload::Vector4;
