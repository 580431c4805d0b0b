//! Compile entry point.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use kiln_codegen::{ArtifactMetadata, BinaryFormat, CompiledArtifact};
use kiln_device::{Device, Module};
use kiln_dtype::Target;
use kiln_ir::{Constants, KernelDescriptor, Param, Signature, SpecializationKey, specialize};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::cache::ArtifactCache;
use crate::config::RuntimeConfig;
use crate::disk::DiskCache;
use crate::error::Result;

/// One inspectable output of a compile, keyed by stage in [`CompiledKernel::asm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmArtifact {
    Text(String),
    Binary(Vec<u8>),
    Path(PathBuf),
}

impl AsmArtifact {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            _ => None,
        }
    }
}

struct KernelInner {
    key: SpecializationKey,
    artifact: Arc<CompiledArtifact>,
    asm: BTreeMap<String, AsmArtifact>,
    /// Every descriptor parameter, constexprs included, in declaration order.
    params: Vec<Param>,
    /// Loaded modules by device id.
    modules: Mutex<HashMap<u64, Module>>,
}

/// A specialized, compiled kernel ready to launch. Cheap to clone.
#[derive(Clone)]
pub struct CompiledKernel {
    inner: Arc<KernelInner>,
}

impl std::fmt::Debug for CompiledKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledKernel").field("key", &self.inner.key).field("asm", &self.inner.asm.keys()).finish()
    }
}

impl CompiledKernel {
    pub fn name(&self) -> &str {
        &self.inner.artifact.metadata.entry
    }

    pub fn key(&self) -> &SpecializationKey {
        &self.inner.key
    }

    pub fn artifact(&self) -> &Arc<CompiledArtifact> {
        &self.inner.artifact
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.inner.artifact.metadata
    }

    pub fn target(&self) -> &Target {
        &self.inner.artifact.metadata.target
    }

    pub fn format(&self) -> BinaryFormat {
        self.inner.artifact.metadata.format
    }

    /// Named outputs: `ptx` + `cubin` on CUDA, `amdgcn` + `hsaco_path` on ROCm.
    pub fn asm(&self) -> &BTreeMap<String, AsmArtifact> {
        &self.inner.asm
    }

    pub fn constants(&self) -> &Constants {
        &self.inner.key.constants
    }

    pub fn signature(&self) -> &Signature {
        &self.inner.key.signature
    }

    pub fn params(&self) -> &[Param] {
        &self.inner.params
    }

    /// The module for `device`, loading it on first use.
    pub fn module(&self, device: &Device) -> Result<Module> {
        let mut modules = self.inner.modules.lock();
        if let Some(module) = modules.get(&device.id()) {
            return Ok(module.clone());
        }
        let module = device.load_module(&self.inner.artifact.binary)?;
        modules.insert(device.id(), module.clone());
        Ok(module)
    }
}

struct CompilerInner {
    config: RuntimeConfig,
    cache: ArtifactCache,
}

/// Specializes, compiles and caches kernels. Clones share one cache.
#[derive(Clone)]
pub struct Compiler {
    inner: Arc<CompilerInner>,
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler").field("config", &self.inner.config).field("cache", &self.inner.cache).finish()
    }
}

static GLOBAL: OnceLock<Compiler> = OnceLock::new();

impl Compiler {
    pub fn new(config: RuntimeConfig) -> Self {
        let disk = config.disk_cache.then(|| DiskCache::new(config.cache_dir.join("artifacts")));
        let cache = ArtifactCache::new(config.cache_capacity, disk);
        Self { inner: Arc::new(CompilerInner { config, cache }) }
    }

    pub fn from_env() -> Self {
        Self::new(RuntimeConfig::from_env())
    }

    /// Process-wide compiler configured from the environment on first use.
    pub fn global() -> Self {
        GLOBAL.get_or_init(Self::from_env).clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.inner.cache
    }

    /// Compile `desc` for the target of `device`.
    ///
    /// `signature` lists the runtime parameter types, e.g. `"*fp32,i32,i32"`.
    pub fn compile(
        &self,
        desc: &KernelDescriptor,
        signature: &str,
        constants: &Constants,
        device: &Device,
    ) -> Result<CompiledKernel> {
        device.check_alive()?;
        self.compile_for_target(desc, signature, constants, device.target())
    }

    /// Compile without a device.
    pub fn compile_for_target(
        &self,
        desc: &KernelDescriptor,
        signature: &str,
        constants: &Constants,
        target: &Target,
    ) -> Result<CompiledKernel> {
        let signature: Signature = signature.parse()?;
        self.compile_signature(desc, &signature, constants, target)
    }

    #[instrument(skip_all, fields(kernel = desc.name(), %signature, %target))]
    pub fn compile_signature(
        &self,
        desc: &KernelDescriptor,
        signature: &Signature,
        constants: &Constants,
        target: &Target,
    ) -> Result<CompiledKernel> {
        let options = self.inner.config.options;
        let (key, body) = specialize(desc, signature, constants, target, &options)?;
        let artifact = self.inner.cache.get_or_compile(&key, || Ok(kiln_codegen::compile(&body, target, &options)?))?;
        debug!(digest = %key.digest(), "kernel ready");

        let asm = self.asm_outputs(&key, &artifact);
        Ok(CompiledKernel {
            inner: Arc::new(KernelInner {
                key,
                artifact,
                asm,
                params: desc.params().to_vec(),
                modules: Mutex::new(HashMap::new()),
            }),
        })
    }

    fn asm_outputs(&self, key: &SpecializationKey, artifact: &CompiledArtifact) -> BTreeMap<String, AsmArtifact> {
        let mut outputs: BTreeMap<String, AsmArtifact> =
            artifact.asm.iter().map(|(stage, text)| (stage.clone(), AsmArtifact::Text(text.clone()))).collect();
        match artifact.format() {
            BinaryFormat::Cubin => {
                outputs.insert("cubin".into(), AsmArtifact::Binary(artifact.binary.clone()));
            }
            BinaryFormat::Hsaco => {
                let path = self.inner.config.cache_dir.join("hsaco").join(format!("{}.hsaco", key.digest()));
                match write_once(&path, &artifact.binary) {
                    Ok(()) => {
                        outputs.insert("hsaco_path".into(), AsmArtifact::Path(path));
                    }
                    Err(error) => warn!(path = %path.display(), %error, "failed to write hsaco"),
                }
            }
        }
        outputs
    }
}

/// Write `bytes` to `path` unless it already exists.
///
/// Every writer stages into its own temporary file, so concurrent writers of
/// the same path never clobber each other; losing the race is success.
fn write_once(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    let dir = path.parent().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut scratch = NamedTempFile::new_in(dir)?;
    scratch.write_all(bytes)?;
    match scratch.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(_) if path.exists() => Ok(()),
        Err(err) => Err(err.error),
    }
}
