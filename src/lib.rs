//! Compiler from the chip DSL to `.melsave` chip-graph archives.
//!
//! `pipeline` is the entry point. The stages it drives live in their own
//! modules: `dsl` (text to IR), `infer`, `lower`, `propagate`, `wiring`,
//! `layout` and `archive`.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod dsl;
pub mod error;
pub mod infer;
pub mod layout;
pub mod lower;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod propagate;
pub mod sandbox;
pub mod wiring;

pub use config::{CompileConfig, LayoutConfig};
pub use error::{CompileError, CompileReport, Result, Stage};
pub use pipeline::{check, compile, compile_blocking, CompileStats};
