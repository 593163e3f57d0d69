//! Per-compile working directory. Every compile gets a fresh temporary
//! directory holding its own copy of the asset files; the directory is
//! removed when the workspace is dropped, whatever the outcome.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::config::AssetPaths;
use crate::error::{CompileError, Result, Stage};

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create the directory and copy every asset into it under its standard
    /// filename. A missing asset fails before any stage runs.
    pub fn prepare(assets: &AssetPaths) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("melsave-")
            .tempdir()
            .map_err(|e| CompileError::sandbox(format!("cannot create workspace: {e}")).with_source(e))?;
        for (name, source) in assets.entries() {
            if !source.is_file() {
                return Err(CompileError::new(
                    Stage::FileIo,
                    format!("required asset '{name}' not found at {}", source.display()),
                )
                .with_file(source.display().to_string()));
            }
            let target = dir.path().join(name);
            fs::copy(source, &target).map_err(|e| CompileError::io(source, e))?;
        }
        debug!(dir = %dir.path().display(), "prepared workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a scratch file and return its path.
    pub fn write(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.file(name);
        fs::write(&path, contents).map_err(|e| CompileError::io(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::paths;

    fn assets(dir: &Path) -> AssetPaths {
        for name in paths::REQUIRED_ASSETS {
            fs::write(dir.join(name), name).unwrap();
        }
        AssetPaths::in_dir(dir)
    }

    #[test]
    fn copies_assets_and_cleans_up() {
        let src = tempfile::tempdir().unwrap();
        let ws = Workspace::prepare(&assets(src.path())).unwrap();
        let root = ws.path().to_path_buf();
        for name in paths::REQUIRED_ASSETS {
            assert_eq!(fs::read_to_string(ws.file(name)).unwrap(), name);
        }
        ws.write("scratch.json", b"{}").unwrap();
        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn missing_asset_is_reported_with_its_path() {
        let src = tempfile::tempdir().unwrap();
        let assets = assets(src.path());
        fs::remove_file(&assets.icon).unwrap();
        let err = Workspace::prepare(&assets).unwrap_err();
        assert_eq!(err.stage, Stage::FileIo);
        assert!(err.context.file.unwrap().ends_with("Icon"));
    }

    #[test]
    fn workspaces_are_disjoint() {
        let src = tempfile::tempdir().unwrap();
        let assets = assets(src.path());
        let a = Workspace::prepare(&assets).unwrap();
        let b = Workspace::prepare(&assets).unwrap();
        assert_ne!(a.path(), b.path());
        a.write("x", b"1").unwrap();
        assert!(!b.file("x").exists());
    }
}
