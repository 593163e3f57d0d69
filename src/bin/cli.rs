// CLI binary: exiting on unrecoverable errors is fine here.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::unreachable, clippy::indexing_slicing)]

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use melsave_compiler::config::AssetPaths;
use melsave_compiler::error::CompileReport;
use melsave_compiler::paths;
use melsave_compiler::pipeline::{self, CancelRegistry, Job};
use melsave_compiler::{CompileConfig, CompileError};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "melsave-cli", about = "Compile chip DSL scripts into .melsave archives", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile one or more DSL files into archives
    Compile {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        inputs: Inputs,
        /// Directory the archives are written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// Maximum number of compiles running at once
        #[arg(long, default_value = "4")]
        jobs: usize,
    },
    /// Print the IR graph of a DSL file
    Graph {
        file: PathBuf,
        /// Indent the JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Run every stage except packaging
    Check {
        file: PathBuf,
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Print the JSON schema of the config file and the error report
    Schema,
}

#[derive(clap::Args)]
struct Inputs {
    /// Directory holding moduledef.json, data_type_rules.json, data.json, MetaData and Icon
    #[arg(long)]
    assets: Option<PathBuf>,
    /// JSON config file (defaults to ./melsave.json when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

// ── Setup ────────────────────────────────────────────────────────

fn setup_logging(level: LogLevel, format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    });
    let formatter = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => tracing_subscriber::registry().with(formatter).with(filter).init(),
        LogFormat::Json => tracing_subscriber::registry().with(formatter.json()).with(filter).init(),
    }
}

fn load_config(inputs: &Inputs) -> Result<CompileConfig, CompileError> {
    let local = paths::config_path(Path::new("."));
    let mut config = match &inputs.config {
        Some(path) => CompileConfig::load(path)?,
        None if local.is_file() => CompileConfig::load(&local)?,
        None => CompileConfig::default(),
    };
    if let Some(dir) = &inputs.assets {
        config.assets = AssetPaths::in_dir(dir);
    }
    Ok(config)
}

fn read_source(path: &Path) -> Result<String, CompileError> {
    std::fs::read_to_string(path).map_err(|e| CompileError::io(path, e))
}

// ── Output ───────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap());
}

fn fail(report: &CompileReport, raw: bool) -> ! {
    if raw {
        print_json(report);
    } else {
        eprintln!("Error: [{}] {}", report.stage, report.message);
        let ctx = &report.context;
        for (label, value) in [
            ("node", &ctx.node_id),
            ("type", &ctx.node_type),
            ("port", &ctx.port),
            ("variable", &ctx.variable),
            ("file", &ctx.file),
        ] {
            if let Some(v) = value {
                eprintln!("  {label}: {v}");
            }
        }
        if let Some(line) = ctx.line {
            eprintln!("  line: {line}");
        }
        if !ctx.candidates.is_empty() {
            eprintln!("  candidates: {}", ctx.candidates.join(", "));
        }
    }
    process::exit(1);
}

#[derive(Serialize)]
struct Written {
    source: String,
    archive: PathBuf,
}

// ── Commands ─────────────────────────────────────────────────────

async fn run_compile(files: &[PathBuf], inputs: &Inputs, out: &Path, jobs: usize, raw: bool) {
    let config = load_config(inputs).unwrap_or_else(|e| fail(&e.report(), raw));
    let mut batch = Vec::with_capacity(files.len());
    for file in files {
        let source = read_source(file).unwrap_or_else(|e| fail(&e.report(), raw));
        batch.push(Job {
            label: file.display().to_string(),
            source,
        });
    }

    let registry = Arc::new(CancelRegistry::new());
    let on_interrupt = Arc::clone(&registry);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let n = on_interrupt.cancel_all();
            eprintln!("Interrupted, cancelling {n} compile(s)");
        }
    });

    let results = pipeline::compile_batch(batch, &config, registry, jobs).await;
    let mut written = Vec::new();
    let mut failed = None;
    for (label, result) in results {
        match result.and_then(|artifact| artifact.write_to(out).map_err(|e| e.report())) {
            Ok(path) => written.push(Written {
                source: label,
                archive: path,
            }),
            Err(report) => {
                if !raw {
                    eprintln!("{label}: [{}] {}", report.stage, report.message);
                }
                failed.get_or_insert(report);
            }
        }
    }

    if raw {
        print_json(&serde_json::json!({ "written": written, "error": failed }));
        if failed.is_some() {
            process::exit(1);
        }
        return;
    }
    for w in &written {
        println!("{}", w.archive.display());
    }
    if let Some(report) = failed {
        fail(&report, raw);
    }
}

fn run_graph(file: &Path, pretty: bool, raw: bool) {
    let source = read_source(file).unwrap_or_else(|e| fail(&e.report(), raw));
    let graph = pipeline::parse(&source).unwrap_or_else(|e| fail(&e.report(), raw));
    let text = if pretty {
        serde_json::to_string_pretty(&graph)
    } else {
        serde_json::to_string(&graph)
    };
    println!("{}", text.unwrap());
}

fn run_check(file: &Path, inputs: &Inputs, raw: bool) {
    let config = load_config(inputs).unwrap_or_else(|e| fail(&e.report(), raw));
    let source = read_source(file).unwrap_or_else(|e| fail(&e.report(), raw));
    match pipeline::check(&source, &config) {
        Ok(stats) if raw => print_json(&stats),
        Ok(stats) => {
            println!("OK: {} IR nodes, {} edges", stats.ir_nodes, stats.ir_edges);
            println!(
                "    {} lowered nodes, {} connections, {} retyped, {} constants",
                stats.lowered_nodes, stats.connections, stats.retyped_nodes, stats.constants
            );
            if stats.type_conflicts > 0 {
                println!("    {} type conflicts (see warnings)", stats.type_conflicts);
            }
        }
        Err(e) => fail(&e.report(), raw),
    }
}

fn run_schema() {
    let schema = serde_json::json!({
        "config": schemars::schema_for!(CompileConfig),
        "report": schemars::schema_for!(CompileReport),
    });
    print_json(&schema);
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.log_level, cli.log_format);
    let raw = cli.json;

    match &cli.command {
        Commands::Compile {
            files,
            inputs,
            out,
            jobs,
        } => run_compile(files, inputs, out, *jobs, raw).await,
        Commands::Graph { file, pretty } => run_graph(file, *pretty, raw),
        Commands::Check { file, inputs } => run_check(file, inputs, raw),
        Commands::Schema => run_schema(),
    }
}
