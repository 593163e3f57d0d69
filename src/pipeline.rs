//! The compile driver: DSL text in, `.melsave` archive out.
//!
//! Stages run one after another inside a private [`Workspace`]. Each stage
//! that touches the document goes through [`SaveDocument::edit`], so a
//! failing stage never leaves a half-written document behind, and any
//! failure aborts the whole compile.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{self, Artifact};
use crate::catalog::{ModuleCatalog, RuleTable};
use crate::config::CompileConfig;
use crate::dsl::{self, ir::IrGraph};
use crate::error::{CompileError, CompileReport, Result, Stage};
use crate::model::SaveDocument;
use crate::paths;
use crate::sandbox::Workspace;
use crate::{infer, layout, lower, propagate, wiring};

/// Counts gathered along the way, reported by `check` and logged by
/// `compile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CompileStats {
    pub ir_nodes: usize,
    pub ir_edges: usize,
    pub variables: usize,
    pub lowered_nodes: usize,
    pub retyped_nodes: usize,
    pub constants: usize,
    pub connections: usize,
    pub placed_nodes: usize,
    pub type_conflicts: usize,
}

/// Fail with a Sandbox error once the cancel flag is raised.
fn check_cancelled(cancel: &AtomicBool, next: &str) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(CompileError::sandbox(format!("compile cancelled before {next}")));
    }
    Ok(())
}

/// Parse DSL text into the IR graph.
pub fn parse(source: &str) -> Result<IrGraph> {
    dsl::compile_source(source).map_err(|errors| dsl::error::collect(errors, source))
}

struct Compiled {
    document: SaveDocument,
    stats: CompileStats,
    workspace: Workspace,
}

fn run_stages(source: &str, config: &CompileConfig, cancel: &AtomicBool) -> Result<Compiled> {
    config.validate()?;
    let workspace = Workspace::prepare(&config.assets)?;

    check_cancelled(cancel, "parsing")?;
    let graph = parse(source)?;
    info!(nodes = graph.nodes.len(), edges = graph.edges.len(), "built IR graph");
    if config.dump_graph {
        let dump = graph
            .to_json_pretty()
            .map_err(|e| CompileError::parser(format!("cannot serialize IR graph: {e}")).with_source(e))?;
        workspace.write(paths::GRAPH_DUMP_FILE, dump.as_bytes())?;
    }

    let catalog = ModuleCatalog::load(&workspace.file(paths::MODULE_CATALOG_FILE))?;
    let rules = RuleTable::load(&workspace.file(paths::RULE_TABLE_FILE))?;
    let mut document = SaveDocument::load(&workspace.file(paths::TEMPLATE_FILE))?;
    let variable_module = catalog
        .get("variable")
        .ok_or_else(|| CompileError::resolver("catalog has no Variable module"))?;

    check_cancelled(cancel, "module resolution")?;
    let resolution = lower::resolve(&graph, &catalog, config.node_match_cutoff)?;

    check_cancelled(cancel, "type inference")?;
    let inference = infer::infer(&graph, &resolution, &rules, config.port_match_cutoff);
    for conflict in &inference.conflicts {
        warn!(node = %conflict.node, kept = %conflict.kept, dropped = %conflict.dropped, "type conflict");
    }

    check_cancelled(cancel, "lowering")?;
    let nodes = document.edit(Stage::ModuleResolver, |doc| {
        lower::instantiate(doc, &graph, &resolution, variable_module)
    })?;

    check_cancelled(cancel, "propagation")?;
    let retypes = propagate::datatype::plan(&graph, &inference, &nodes);
    let retyped_nodes = document.edit(Stage::Propagation, |doc| propagate::datatype::apply(doc, &retypes, &rules))?;
    let writes = propagate::constant::plan(&graph, &nodes)?;
    let constants = document.edit(Stage::Propagation, |doc| propagate::constant::apply(doc, &writes))?;

    check_cancelled(cancel, "wiring")?;
    let connections = wiring::build(&graph, &nodes, config.port_match_cutoff)?;
    if connections.len() != graph.edges.len() {
        return Err(CompileError::wiring(format!(
            "{} connections for {} edges",
            connections.len(),
            graph.edges.len()
        )));
    }
    let connections = document.edit(Stage::Wiring, |doc| wiring::apply(doc, &connections))?;

    check_cancelled(cancel, "layout")?;
    let placed_nodes = document.edit(Stage::Layout, |doc| layout::apply(doc, &config.layout))?;

    let stats = CompileStats {
        ir_nodes: graph.nodes.len(),
        ir_edges: graph.edges.len(),
        variables: graph.variables.len(),
        lowered_nodes: nodes.len(),
        retyped_nodes,
        constants,
        connections,
        placed_nodes,
        type_conflicts: inference.conflicts.len(),
    };
    Ok(Compiled {
        document,
        stats,
        workspace,
    })
}

/// Run every stage except packaging.
pub fn check(source: &str, config: &CompileConfig) -> Result<CompileStats> {
    run_stages(source, config, &AtomicBool::new(false)).map(|c| c.stats)
}

/// Full compile on the current thread, stopping at the next stage boundary
/// once `cancel` is raised.
pub fn compile_with_cancel(source: &str, config: &CompileConfig, cancel: &AtomicBool) -> Result<Artifact> {
    let Compiled {
        document,
        stats,
        workspace,
    } = run_stages(source, config, cancel)?;

    check_cancelled(cancel, "packaging")?;
    let data = document.to_json_bytes()?;
    workspace.write(paths::FINAL_DATA_FILE, &data)?;
    let artifact = archive::package(
        &data,
        &workspace.file(paths::METADATA_FILE),
        &workspace.file(paths::ICON_FILE),
    )?;
    info!(file = %artifact.file_name, ?stats, "compile finished");
    Ok(artifact)
}

pub fn compile_blocking(source: &str, config: &CompileConfig) -> Result<Artifact> {
    compile_with_cancel(source, config, &AtomicBool::new(false))
}

/// Compile on the blocking pool under the configured wall-clock budget. On
/// timeout the worker is told to stop and a Sandbox report is returned.
pub async fn compile(source: &str, config: &CompileConfig) -> std::result::Result<Artifact, CompileReport> {
    run_with_budget(source.to_string(), config.clone(), Arc::new(AtomicBool::new(false))).await
}

async fn run_with_budget(
    source: String,
    config: CompileConfig,
    cancel: Arc<AtomicBool>,
) -> std::result::Result<Artifact, CompileReport> {
    let flag = Arc::clone(&cancel);
    let budget = config.time_budget();
    let task = tokio::task::spawn_blocking(move || compile_with_cancel(&source, &config, &flag));

    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result.map_err(|e| e.report()),
        Ok(Err(join)) => Err(CompileError::sandbox(format!("compile task failed: {join}")).report()),
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            warn!(budget_secs = budget.as_secs(), "compile timed out");
            Err(CompileError::sandbox(format!("compile exceeded its {}s budget", budget.as_secs())).report())
        }
    }
}

// ── Concurrent compiles ─────────────────────────────────────────

/// Cancel flags of in-flight compiles, keyed by a caller-chosen label.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh flag for `label`, replacing any previous one.
    pub fn register(&self, label: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags.lock().insert(label.to_string(), Arc::clone(&flag));
        flag
    }

    pub fn finish(&self, label: &str) {
        self.flags.lock().remove(label);
    }

    /// Raise the flag for `label`. Returns false if nothing is running
    /// under that label.
    pub fn cancel(&self, label: &str) -> bool {
        match self.flags.lock().get(label) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Raise every flag. Returns how many compiles were signalled.
    pub fn cancel_all(&self) -> usize {
        let flags = self.flags.lock();
        for flag in flags.values() {
            flag.store(true, Ordering::Relaxed);
        }
        flags.len()
    }

    pub fn active(&self) -> usize {
        self.flags.lock().len()
    }
}

/// One labelled compile request.
#[derive(Debug, Clone)]
pub struct Job {
    pub label: String,
    pub source: String,
}

/// Compile many sources with at most `concurrency` running at once. Each
/// gets its own workspace and budget; results come back in job order.
pub async fn compile_batch(
    jobs: Vec<Job>,
    config: &CompileConfig,
    registry: Arc<CancelRegistry>,
    concurrency: usize,
) -> Vec<(String, std::result::Result<Artifact, CompileReport>)> {
    stream::iter(jobs)
        .map(|job| {
            let config = config.clone();
            let registry = Arc::clone(&registry);
            async move {
                let cancel = registry.register(&job.label);
                let result = run_with_budget(job.source, config, cancel).await;
                registry.finish(&job.label);
                (job.label, result)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::{ChipDocument, GateValue, LoweredNode};
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};

    fn asset_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("assets")
    }

    fn config() -> CompileConfig {
        CompileConfig::from_asset_dir(&asset_dir())
    }

    fn unpack(artifact: &Artifact) -> ChipDocument {
        let entries = archive::read_entries(&artifact.bytes).unwrap();
        let (name, data) = &entries[0];
        assert_eq!(name, paths::ARCHIVE_DATA_ENTRY);
        let text = String::from_utf8(data.clone()).unwrap();
        SaveDocument::parse(&text).unwrap().unpack(Stage::Layout).unwrap()
    }

    fn nodes_of<'d>(doc: &'d ChipDocument, view_model: &str) -> Vec<&'d LoweredNode> {
        doc.graph
            .nodes
            .iter()
            .filter(|n| n.id.starts_with(&format!("{view_model} : ")))
            .collect()
    }

    fn connection_count(doc: &ChipDocument) -> usize {
        doc.graph.nodes.iter().flat_map(|n| &n.outputs).map(|p| p.connected_inputs.len()).sum()
    }

    const SCENARIO_B: &str = r#"x = INPUT(attrs={"name": "x", "data_type": "Number"})
y = INPUT(attrs={"name": "y", "data_type": "Number"})
z = (x + y) * 2
"#;

    #[test]
    fn raised_flag_stops_before_the_next_stage() {
        let flag = AtomicBool::new(true);
        let err = check_cancelled(&flag, "layout").unwrap_err();
        assert_eq!(err.stage, Stage::Sandbox);
        assert!(err.message.contains("layout"));
        assert!(check_cancelled(&AtomicBool::new(false), "layout").is_ok());
    }

    #[test]
    fn registry_tracks_and_cancels() {
        let registry = CancelRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        assert_eq!(registry.active(), 2);
        assert!(registry.cancel("a"));
        assert!(a.load(Ordering::Relaxed));
        assert!(!b.load(Ordering::Relaxed));
        registry.finish("a");
        assert!(!registry.cancel("a"));
        assert_eq!(registry.cancel_all(), 1);
        assert!(b.load(Ordering::Relaxed));
    }

    #[test]
    fn parse_errors_carry_a_line() {
        let err = parse("a = Add(\nb = 1").unwrap_err();
        assert_eq!(err.stage, Stage::Parser);
        assert!(err.context.line.is_some());
    }

    #[test]
    fn missing_assets_fail_before_parsing() {
        let config = CompileConfig::from_asset_dir(Path::new("/nonexistent/melsave-assets"));
        let err = check("this is not valid (", &config).unwrap_err();
        assert_eq!(err.stage, Stage::FileIo);
    }

    #[test]
    fn constant_into_output() {
        let src = r##"a=Constant(attrs={"value":1}); b=OUTPUT(INPUT=a["OUT"],attrs={"name":"#x","data_type":2})"##;
        let doc = unpack(&compile_blocking(src, &config()).unwrap());
        assert_eq!(doc.graph.nodes.len(), 2);
        assert_eq!(connection_count(&doc), 1);

        let exit = nodes_of(&doc, "ExitNodeViewModel");
        assert_eq!(exit.len(), 1);
        assert_eq!(exit[0].gate_data_type, Some(GateValue::Code(2)));
        assert_eq!(doc.outputs.len(), 1);
        assert_eq!(doc.outputs[0].data_name, "#x");

        let constant = nodes_of(&doc, "ConstantNodeViewModel");
        let save: serde_json::Value = serde_json::from_str(constant[0].save_data.as_deref().unwrap()).unwrap();
        assert_eq!(save["DataValue"], "1.0");
        assert!(constant[0].visual_position.x < exit[0].visual_position.x);
    }

    #[test]
    fn arithmetic_shares_one_constant() {
        let doc = unpack(&compile_blocking(SCENARIO_B, &config()).unwrap());
        assert_eq!(nodes_of(&doc, "AddNodeViewModel").len(), 1);
        assert_eq!(nodes_of(&doc, "ConstantNodeViewModel").len(), 1);
        let mul = nodes_of(&doc, "MultiplyNodeViewModel");
        assert_eq!(mul.len(), 1);
        let wired = mul[0].inputs.iter().filter(|p| p.connected_output.is_some()).count();
        assert_eq!(wired, 2);
        assert_eq!(doc.inputs.len(), 2);
    }

    #[test]
    fn unknown_module_fails_with_node_and_type() {
        let err = compile_blocking("q = Zjzjzj(A=1)", &config()).unwrap_err();
        assert_eq!(err.stage, Stage::ModuleResolver);
        assert_eq!(err.context.node_type.as_deref(), Some("Zjzjzj"));
        assert!(err.context.node_id.is_some());
        assert!(err.message.contains("Zjzjzj"));
    }

    #[test]
    fn every_edge_becomes_one_connection() {
        let graph = parse(SCENARIO_B).unwrap();
        let doc = unpack(&compile_blocking(SCENARIO_B, &config()).unwrap());
        assert_eq!(connection_count(&doc), graph.edges.len());

        for node in &doc.graph.nodes {
            for input in &node.inputs {
                let Some(src) = &input.connected_output else { continue };
                let owner = doc.graph.nodes.iter().find(|n| n.id == src.node_id).unwrap();
                let out = owner.outputs.iter().find(|p| p.id == src.id).unwrap();
                assert!(out.connected_inputs.iter().any(|r| r.id == input.id && r.node_id == node.id));
            }
        }
    }

    #[test]
    fn mixed_array_constant_fails_in_propagation() {
        let src = r##"a = Constant(attrs={"value": [1, "a"]})
b = OUTPUT(INPUT=a["OUT"], attrs={"name": "#x"})"##;
        let err = compile_blocking(src, &config()).unwrap_err();
        assert_eq!(err.stage, Stage::Propagation);
        assert!(err.context.node_id.is_some());
        assert!(err.message.contains("homogeneous array"), "{}", err.message);
    }

    #[test]
    fn alias_to_a_later_name_is_wired() {
        let src = r#"b = a
c = Add(A=b, B=1)
a = INPUT(attrs={"name": "a"})"#;
        let graph = parse(src).unwrap();
        assert_eq!(graph.edges.len(), 2);
        let doc = unpack(&compile_blocking(src, &config()).unwrap());
        assert_eq!(connection_count(&doc), graph.edges.len());

        let add = nodes_of(&doc, "AddNodeViewModel");
        assert_eq!(add.len(), 1);
        let root = nodes_of(&doc, "RootNodeViewModel");
        assert_eq!(root.len(), 1);
        let from = add[0].inputs[0].connected_output.as_ref().unwrap();
        assert_eq!(from.node_id, root[0].id);
    }

    #[test]
    fn repeated_compiles_agree_on_shape() {
        let shape = |doc: &ChipDocument| {
            let mut rows: Vec<(String, i64)> = doc
                .graph
                .nodes
                .iter()
                .map(|n| {
                    let vm = n.id.split(" : ").next().unwrap_or_default().to_string();
                    #[allow(clippy::cast_possible_truncation)]
                    let x = n.visual_position.x.round() as i64;
                    (vm, x)
                })
                .collect();
            rows.sort();
            rows
        };
        let a = unpack(&compile_blocking(SCENARIO_B, &config()).unwrap());
        let b = unpack(&compile_blocking(SCENARIO_B, &config()).unwrap());
        assert_eq!(shape(&a), shape(&b));
        assert!(a.graph.nodes.iter().all(|n| n.visual_position.x.is_finite() && n.visual_position.y.is_finite()));
    }

    #[test]
    fn ir_and_inferred_types_are_reproducible() {
        let catalog = ModuleCatalog::load(&asset_dir().join(paths::MODULE_CATALOG_FILE)).unwrap();
        let rules = RuleTable::load(&asset_dir().join(paths::RULE_TABLE_FILE)).unwrap();
        let run = || {
            let graph = parse(SCENARIO_B).unwrap();
            let resolution = lower::resolve(&graph, &catalog, 0.1).unwrap();
            let mut types: Vec<_> = infer::infer(&graph, &resolution, &rules, 0.4).types.into_iter().collect();
            types.sort();
            (graph, types)
        };
        let (first_graph, first_types) = run();
        let (second_graph, second_types) = run();
        assert_eq!(first_graph, second_graph);
        assert_eq!(first_types, second_types);
        assert!(!first_types.is_empty());
    }

    #[test]
    fn check_reports_stage_counts() {
        let stats = check(SCENARIO_B, &config()).unwrap();
        assert_eq!(stats.ir_nodes, 5);
        assert_eq!(stats.lowered_nodes, 5);
        assert_eq!(stats.connections, 4);
        assert_eq!(stats.placed_nodes, 5);
        assert_eq!(stats.type_conflicts, 0);
    }

    #[test]
    fn archive_carries_the_sidecars() {
        let artifact = compile_blocking(SCENARIO_B, &config()).unwrap();
        let entries = archive::read_entries(&artifact.bytes).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Data", "MetaData", "Icon"]);
        assert_eq!(entries[1].1, std::fs::read(asset_dir().join("MetaData")).unwrap());
        assert_eq!(entries[2].1, std::fs::read(asset_dir().join("Icon")).unwrap());
        assert!(artifact.file_name.ends_with(".melsave"));
    }

    #[tokio::test]
    async fn async_compile_and_batch() {
        let artifact = compile(SCENARIO_B, &config()).await.unwrap();
        assert_eq!(unpack(&artifact).graph.nodes.len(), 5);

        let registry = Arc::new(CancelRegistry::new());
        let jobs = vec![
            Job {
                label: "ok".into(),
                source: SCENARIO_B.into(),
            },
            Job {
                label: "bad".into(),
                source: "q = Zjzjzj(A=1)".into(),
            },
        ];
        let results = compile_batch(jobs, &config(), Arc::clone(&registry), 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "ok");
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].1.as_ref().unwrap_err().stage, Stage::ModuleResolver);
        assert_eq!(registry.active(), 0);
    }
}
