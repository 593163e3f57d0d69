//! Post-lowering fix-ups: gate types first, then constant payloads.

pub mod constant;
pub mod datatype;

pub use constant::{ConstantValue, ConstantWrite};
pub use datatype::Retype;
