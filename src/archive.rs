//! `.melsave` packaging: the final document plus the two sidecar blobs in
//! one deflated zip with fixed entry names.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{CompileError, Result};
use crate::paths::{ARCHIVE_DATA_ENTRY, ARCHIVE_EXTENSION, ARCHIVE_ICON_ENTRY, ARCHIVE_METADATA_ENTRY};

const NAME_LEN: usize = 8;

/// A finished archive held in memory until the caller writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Write into `dir` through a temporary file, so a failed write never
    /// leaves a partial archive behind.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| CompileError::io(dir, e))?;
        let target = dir.join(&self.file_name);
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CompileError::io(dir, e))?;
        tmp.write_all(&self.bytes).map_err(|e| CompileError::io(&target, e))?;
        tmp.persist(&target).map_err(|e| CompileError::io(&target, e.error))?;
        info!(path = %target.display(), bytes = self.bytes.len(), "wrote archive");
        Ok(target)
    }
}

/// Eight random letters and digits plus the archive extension.
pub fn random_file_name<R: Rng>(rng: &mut R) -> String {
    let stem: String = rng.sample_iter(&Alphanumeric).take(NAME_LEN).map(char::from).collect();
    format!("{stem}.{ARCHIVE_EXTENSION}")
}

fn read_sidecar(path: &Path, what: &str) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(CompileError::archive(format!("required {what} file not found: {}", path.display()))
            .with_file(path.display().to_string()));
    }
    fs::read(path).map_err(|e| CompileError::io(path, e))
}

fn zip_error(e: zip::result::ZipError) -> CompileError {
    CompileError::archive(format!("zip: {e}")).with_source(e)
}

/// Build the archive. Both sidecars are read before anything is written.
pub fn package(data: &[u8], metadata: &Path, icon: &Path) -> Result<Artifact> {
    let metadata = read_sidecar(metadata, "metadata")?;
    let icon = read_sidecar(icon, "icon")?;
    package_bytes(data, &metadata, &icon, &mut rand::thread_rng())
}

pub fn package_bytes<R: Rng>(data: &[u8], metadata: &[u8], icon: &[u8], rng: &mut R) -> Result<Artifact> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in [
        (ARCHIVE_DATA_ENTRY, data),
        (ARCHIVE_METADATA_ENTRY, metadata),
        (ARCHIVE_ICON_ENTRY, icon),
    ] {
        writer.start_file(name, options).map_err(zip_error)?;
        writer
            .write_all(bytes)
            .map_err(|e| CompileError::archive(format!("writing entry {name}: {e}")).with_source(e))?;
        debug!(entry = name, bytes = bytes.len(), "added archive entry");
    }
    let bytes = writer.finish().map_err(zip_error)?.into_inner();
    Ok(Artifact {
        file_name: random_file_name(rng),
        bytes,
    })
}

/// Entry names and contents, in archive order.
pub fn read_entries(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_error)?;
        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .map_err(|e| CompileError::archive(format!("reading entry {}: {e}", entry.name())).with_source(e))?;
        out.push((entry.name().to_string(), buf));
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn three_fixed_entries() {
        let mut rng = StdRng::seed_from_u64(7);
        let artifact = package_bytes(b"{\"a\":1}", b"meta", b"\x89PNG", &mut rng).unwrap();
        let entries = read_entries(&artifact.bytes).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Data", "MetaData", "Icon"]);
        assert_eq!(entries[0].1, b"{\"a\":1}");
        assert_eq!(entries[2].1, b"\x89PNG");
    }

    #[test]
    fn file_name_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let name = random_file_name(&mut rng);
        let (stem, ext) = name.split_once('.').unwrap();
        assert_eq!(ext, "melsave");
        assert_eq!(stem.len(), 8);
        assert!(stem.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn missing_sidecar_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("MetaData");
        fs::write(&meta, "m").unwrap();
        let err = package(b"{}", &meta, &dir.path().join("Icon")).unwrap_err();
        assert_eq!(err.stage, Stage::Archive);
        assert!(err.context.file.unwrap().ends_with("Icon"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn write_to_creates_the_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact {
            file_name: "abcdefgh.melsave".into(),
            bytes: vec![1, 2, 3],
        };
        let path = artifact.write_to(&dir.path().join("out")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3]);
        assert_eq!(fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
    }
}
