use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result, Stage};
use crate::paths;

// ── Asset locations ─────────────────────────────────────────────

/// Where the five static inputs of a compile live on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssetPaths {
    pub module_catalog: PathBuf,
    pub rule_table: PathBuf,
    pub template: PathBuf,
    pub metadata: PathBuf,
    pub icon: PathBuf,
}

impl AssetPaths {
    /// Standard filenames inside one directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            module_catalog: paths::module_catalog_path(dir),
            rule_table: paths::rule_table_path(dir),
            template: paths::template_path(dir),
            metadata: paths::metadata_path(dir),
            icon: paths::icon_path(dir),
        }
    }

    /// Pairs of (workspace filename, source path).
    pub fn entries(&self) -> [(&'static str, &Path); 5] {
        [
            (paths::MODULE_CATALOG_FILE, self.module_catalog.as_path()),
            (paths::RULE_TABLE_FILE, self.rule_table.as_path()),
            (paths::TEMPLATE_FILE, self.template.as_path()),
            (paths::METADATA_FILE, self.metadata.as_path()),
            (paths::ICON_FILE, self.icon.as_path()),
        ]
    }

    fn rebase(&mut self, base: &Path) {
        for p in [
            &mut self.module_catalog,
            &mut self.rule_table,
            &mut self.template,
            &mut self.metadata,
            &mut self.icon,
        ] {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self::in_dir(Path::new("assets"))
    }
}

// ── Layout tuning ───────────────────────────────────────────────

/// Spacing and iteration limits for the layered layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LayoutConfig {
    pub x_spacing: f64,
    pub y_spacing: f64,
    /// Added to every x when positions are written back.
    pub global_x_offset: f64,
    /// Number of left-right/right-left barycenter sweep pairs.
    pub sweep_passes: usize,
    /// Upper bound on fish-school swap passes.
    pub swap_passes: usize,
    pub swap_crossing_weight: f64,
    pub swap_median_weight: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            x_spacing: 800.0,
            y_spacing: 600.0,
            global_x_offset: -2000.0,
            sweep_passes: 4,
            swap_passes: 3,
            swap_crossing_weight: 1.0,
            swap_median_weight: 0.5,
        }
    }
}

// ── Compile configuration ───────────────────────────────────────

/// Everything a compile needs besides the DSL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CompileConfig {
    pub assets: AssetPaths,
    /// Minimum similarity for a DSL node type to match a catalog module.
    pub node_match_cutoff: f64,
    /// Minimum similarity for a DSL port name to match a catalog port.
    pub port_match_cutoff: f64,
    /// Wall-clock budget for one compile, in seconds.
    pub time_budget_secs: u64,
    /// Write the IR graph dump into the workspace for debugging.
    pub dump_graph: bool,
    pub layout: LayoutConfig,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            assets: AssetPaths::default(),
            node_match_cutoff: 0.10,
            port_match_cutoff: 0.40,
            time_budget_secs: 60,
            dump_graph: false,
            layout: LayoutConfig::default(),
        }
    }
}

impl CompileConfig {
    /// Defaults with all assets taken from `dir`.
    pub fn from_asset_dir(dir: &Path) -> Self {
        Self {
            assets: AssetPaths::in_dir(dir),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Relative asset paths are resolved against
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = read_json(path, Stage::FileIo)?;
        if let Some(base) = path.parent() {
            config.assets.rebase(base);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, cutoff) in [
            ("node_match_cutoff", self.node_match_cutoff),
            ("port_match_cutoff", self.port_match_cutoff),
        ] {
            if !(0.0..=1.0).contains(&cutoff) {
                return Err(CompileError::new(
                    Stage::FileIo,
                    format!("{name} must be within [0, 1], got {cutoff}"),
                ));
            }
        }
        if self.layout.x_spacing <= 0.0 || self.layout.y_spacing <= 0.0 {
            return Err(CompileError::new(Stage::FileIo, "layout spacing must be positive"));
        }
        if self.time_budget_secs == 0 {
            return Err(CompileError::new(Stage::FileIo, "time_budget_secs must be non-zero"));
        }
        Ok(())
    }
}

// ── JSON helpers ────────────────────────────────────────────────

/// Read and deserialize a JSON file, attributing parse failures to `stage`.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path, stage: Stage) -> Result<T> {
    let data = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
    serde_json::from_str(&data).map_err(|e| CompileError::json(stage, path, e))
}
