//! Centralized path definitions for the compiler's data files.
//!
//! This module is the single source of truth for asset filenames and the
//! scratch-file names used inside a compile workspace. No other module should
//! hard-code these strings.

use std::path::{Path, PathBuf};

// ── Asset filenames ──────────────────────────────────────────────

pub const MODULE_CATALOG_FILE: &str = "moduledef.json";
pub const RULE_TABLE_FILE: &str = "data_type_rules.json";
pub const TEMPLATE_FILE: &str = "data.json";
pub const METADATA_FILE: &str = "MetaData";
pub const ICON_FILE: &str = "Icon";

/// Every file a compile workspace must contain before the pipeline runs.
pub const REQUIRED_ASSETS: [&str; 5] = [
    MODULE_CATALOG_FILE,
    RULE_TABLE_FILE,
    TEMPLATE_FILE,
    METADATA_FILE,
    ICON_FILE,
];

// ── Workspace scratch files ──────────────────────────────────────

pub const GRAPH_DUMP_FILE: &str = "graph.json";
pub const FINAL_DATA_FILE: &str = "ungraph.json";

/// Config file the CLI picks up from the current directory.
pub const CONFIG_FILE: &str = "melsave.json";

// ── Archive entry names ──────────────────────────────────────────

pub const ARCHIVE_DATA_ENTRY: &str = "Data";
pub const ARCHIVE_METADATA_ENTRY: &str = "MetaData";
pub const ARCHIVE_ICON_ENTRY: &str = "Icon";
pub const ARCHIVE_EXTENSION: &str = "melsave";

// ── Path functions (take the asset root) ─────────────────────────

pub fn module_catalog_path(root: &Path) -> PathBuf {
    root.join(MODULE_CATALOG_FILE)
}

pub fn rule_table_path(root: &Path) -> PathBuf {
    root.join(RULE_TABLE_FILE)
}

pub fn template_path(root: &Path) -> PathBuf {
    root.join(TEMPLATE_FILE)
}

pub fn metadata_path(root: &Path) -> PathBuf {
    root.join(METADATA_FILE)
}

pub fn icon_path(root: &Path) -> PathBuf {
    root.join(ICON_FILE)
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}
