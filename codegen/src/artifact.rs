//! Compiled artifacts and the backend entry point.

use std::collections::BTreeMap;

use kiln_dtype::{Target, TargetFamily};
use kiln_ir::{CompileOptions, ConcreteBody};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::analysis::{self, ResourceUsage};
use crate::binary::{self, CUBIN_MAGIC, HSACO_MAGIC};
use crate::error::Result;
use crate::kir::ParamInfo;
use crate::{gcn, lower, opt, ptx};

/// Loadable binary format of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BinaryFormat {
    Cubin,
    Hsaco,
}

impl BinaryFormat {
    pub fn of(target: &Target) -> Self {
        match target.family() {
            TargetFamily::Cuda => Self::Cubin,
            TargetFamily::Rocm => Self::Hsaco,
        }
    }

    pub const fn magic(&self) -> [u8; 4] {
        match self {
            Self::Cubin => CUBIN_MAGIC,
            Self::Hsaco => HSACO_MAGIC,
        }
    }

    /// Assembly stage recorded next to the binary.
    pub const fn asm_stage(&self) -> &'static str {
        match self {
            Self::Cubin => "ptx",
            Self::Hsaco => "amdgcn",
        }
    }

    pub fn from_magic(magic: [u8; 4]) -> Option<Self> {
        match magic {
            CUBIN_MAGIC => Some(Self::Cubin),
            HSACO_MAGIC => Some(Self::Hsaco),
            _ => None,
        }
    }
}

/// Everything a launcher needs to know about a compiled kernel besides its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub target: Target,
    pub arch: String,
    pub format: BinaryFormat,
    pub entry: String,
    pub shared_mem: u32,
    pub registers: u32,
    pub num_warps: u32,
    pub params: Vec<ParamInfo>,
}

impl ArtifactMetadata {
    pub fn threads_per_program(&self) -> u32 {
        self.num_warps * self.target.warp_size()
    }
}

/// Output of one backend run: the loadable binary and its intermediate assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub metadata: ArtifactMetadata,
    pub binary: Vec<u8>,
    /// Assembly by stage name (`ptx` or `amdgcn`).
    pub asm: BTreeMap<String, String>,
}

impl CompiledArtifact {
    pub fn format(&self) -> BinaryFormat {
        self.metadata.format
    }
}

/// Compile a concrete body for `target`.
///
/// Deterministic: the same body, target and options always give byte-identical
/// binaries.
#[instrument(skip_all, fields(kernel = %body.name, target = %target))]
pub fn compile(body: &ConcreteBody, target: &Target, options: &CompileOptions) -> Result<CompiledArtifact> {
    let mut kernel = lower::lower(body)?;
    if options.optimize {
        opt::optimize(&mut kernel);
    }
    let usage: ResourceUsage = analysis::analyze(&kernel, target, options);

    let asm = match target {
        Target::Cuda(cap) => ptx::emit(&kernel, cap, options, &usage),
        Target::Rocm(cap) => gcn::emit(&kernel, cap, options, &usage),
    };
    let format = BinaryFormat::of(target);
    let arch = target.arch_name();
    let binary = binary::encode(format.magic(), &arch, options.num_warps, usage.shared_mem, usage.registers, &kernel, &asm);
    debug!(
        nodes = kernel.nodes.len(),
        registers = usage.registers,
        shared_mem = usage.shared_mem,
        bytes = binary.len(),
        "compiled"
    );

    let metadata = ArtifactMetadata {
        target: target.clone(),
        arch,
        format,
        entry: kernel.name.clone(),
        shared_mem: usage.shared_mem,
        registers: usage.registers,
        num_warps: options.num_warps,
        params: kernel.params.clone(),
    };
    Ok(CompiledArtifact { metadata, binary, asm: BTreeMap::from([(format.asm_stage().to_string(), asm)]) })
}
