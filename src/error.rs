use std::fmt;
use std::path::Path;

use schemars::JsonSchema;
use serde::Serialize;

/// Pipeline stage that produced an error. Callers branch on this, so the
/// serialized names are part of the report contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parser,
    TypeInference,
    ModuleResolver,
    Propagation,
    Wiring,
    Layout,
    Archive,
    FileIo,
    Sandbox,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Parser => "parser",
            Stage::TypeInference => "type_inference",
            Stage::ModuleResolver => "module_resolver",
            Stage::Propagation => "propagation",
            Stage::Wiring => "wiring",
            Stage::Layout => "layout",
            Stage::Archive => "archive",
            Stage::FileIo => "file_io",
            Stage::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whatever the failing stage knew about the offending item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

/// A fatal compilation error. Every stage fails with one of these; the
/// pipeline never returns a partial artifact.
#[derive(Debug, thiserror::Error)]
#[error("[{stage}] {message}")]
pub struct CompileError {
    pub stage: Stage,
    pub message: String,
    pub context: ErrorContext,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, CompileError>;

impl CompileError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    pub fn parser(message: impl Into<String>) -> Self {
        Self::new(Stage::Parser, message)
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::new(Stage::TypeInference, message)
    }

    pub fn resolver(message: impl Into<String>) -> Self {
        Self::new(Stage::ModuleResolver, message)
    }

    pub fn propagation(message: impl Into<String>) -> Self {
        Self::new(Stage::Propagation, message)
    }

    pub fn wiring(message: impl Into<String>) -> Self {
        Self::new(Stage::Wiring, message)
    }

    pub fn layout(message: impl Into<String>) -> Self {
        Self::new(Stage::Layout, message)
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::new(Stage::Archive, message)
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::new(Stage::Sandbox, message)
    }

    /// I/O failure on a named file.
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        Self::new(Stage::FileIo, format!("{}: {err}", path.display()))
            .with_file(path.display().to_string())
            .with_source(err)
    }

    /// A data file that exists but does not parse.
    pub fn json(stage: Stage, path: &Path, err: serde_json::Error) -> Self {
        Self::new(stage, format!("invalid JSON in {}: {err}", path.display()))
            .with_file(path.display().to_string())
            .with_line(err.line())
            .with_source(err)
    }

    pub fn with_node(mut self, id: impl Into<String>) -> Self {
        self.context.node_id = Some(id.into());
        self
    }

    pub fn with_node_type(mut self, ty: impl Into<String>) -> Self {
        self.context.node_type = Some(ty.into());
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.context.port = Some(port.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.context.variable = Some(name.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.context.file = Some(file.into());
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.context.line = Some(line);
        self
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.context.column = Some(column);
        self
    }

    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(err));
        self
    }

    pub fn report(&self) -> CompileReport {
        CompileReport::from(self)
    }
}

/// Serializable failure report handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct CompileReport {
    pub stage: Stage,
    pub message: String,
    pub context: ErrorContext,
}

impl From<&CompileError> for CompileReport {
    fn from(e: &CompileError) -> Self {
        Self {
            stage: e.stage,
            message: e.message.clone(),
            context: e.context.clone(),
        }
    }
}

impl From<CompileError> for CompileReport {
    fn from(e: CompileError) -> Self {
        Self::from(&e)
    }
}

impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)?;
        if let Some(line) = self.context.line {
            write!(f, " (line {line})")?;
        }
        if let Some(node) = &self.context.node_id {
            write!(f, " (node {node})")?;
        }
        if !self.context.candidates.is_empty() {
            write!(f, " candidates: {}", self.context.candidates.join(", "))?;
        }
        Ok(())
    }
}
