//! Content-addressed artifact mirror.
//!
//! Each artifact lives in `<root>/<key digest>/`:
//!
//! ```text
//! meta.json        key text and ArtifactMetadata
//! kernel.cubin     binary (kernel.hsaco on ROCm)
//! kernel.ptx       assembly (kernel.amdgcn on ROCm)
//! ```
//!
//! Entries are written into a private scratch directory and renamed into place,
//! so a reader never observes a half written entry. Disk failures are logged
//! and reported as a miss; they never fail a compile.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kiln_codegen::{ArtifactMetadata, CompiledArtifact};
use kiln_ir::SpecializationKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const META: &str = "meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    key: String,
    metadata: ArtifactMetadata,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the entry for `key`.
    pub fn entry_dir(&self, key: &SpecializationKey) -> PathBuf {
        self.root.join(key.digest())
    }

    pub fn load(&self, key: &SpecializationKey) -> Option<CompiledArtifact> {
        let dir = self.entry_dir(key);
        match read_entry(&dir, key) {
            Ok(artifact) => {
                debug!(dir = %dir.display(), "disk cache hit");
                artifact
            }
            Err(error) => {
                warn!(dir = %dir.display(), %error, "ignoring unreadable disk cache entry");
                None
            }
        }
    }

    pub fn store(&self, key: &SpecializationKey, artifact: &CompiledArtifact) {
        let dir = self.entry_dir(key);
        if dir.join(META).exists() {
            return;
        }
        if let Err(error) = write_entry(&self.root, &dir, key, artifact) {
            warn!(dir = %dir.display(), %error, "failed to write disk cache entry");
        }
    }
}

fn invalid(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

/// `Ok(None)` when there is no entry.
fn read_entry(dir: &Path, key: &SpecializationKey) -> io::Result<Option<CompiledArtifact>> {
    let meta = match fs::read(dir.join(META)) {
        Ok(meta) => meta,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };
    let Meta { key: stored, metadata } = serde_json::from_slice(&meta).map_err(io::Error::from)?;
    if stored != key.to_string() {
        return Err(invalid(format!("entry belongs to `{stored}`")));
    }

    let format = metadata.format;
    let binary = fs::read(dir.join(format!("kernel.{format}")))?;
    let image = kiln_codegen::decode(&binary).map_err(|err| invalid(err.to_string()))?;
    if image.entry() != metadata.entry || image.arch != metadata.arch {
        return Err(invalid("binary does not match its metadata"));
    }

    let stage = format.asm_stage();
    let asm = fs::read_to_string(dir.join(format!("kernel.{stage}")))?;
    Ok(Some(CompiledArtifact { metadata, binary, asm: BTreeMap::from([(stage.to_string(), asm)]) }))
}

fn write_entry(root: &Path, dir: &Path, key: &SpecializationKey, artifact: &CompiledArtifact) -> io::Result<()> {
    fs::create_dir_all(root)?;
    // Removed on drop unless renamed into place.
    let scratch = tempfile::Builder::new().prefix(&format!(".{}.", key.digest())).tempdir_in(root)?;

    let format = artifact.format();
    fs::write(scratch.path().join(format!("kernel.{format}")), &artifact.binary)?;
    for (stage, text) in &artifact.asm {
        fs::write(scratch.path().join(format!("kernel.{stage}")), text)?;
    }
    let meta = Meta { key: key.to_string(), metadata: artifact.metadata.clone() };
    fs::write(scratch.path().join(META), serde_json::to_vec_pretty(&meta).map_err(io::Error::from)?)?;

    match fs::rename(scratch.path(), dir) {
        // Another writer published the same entry first.
        Err(_) if dir.join(META).exists() => Ok(()),
        other => other,
    }
}
