//! Compile targets.
//!
//! The set of device families is closed: a kernel is compiled for exactly one
//! [`Target`], and each family carries its own capability description.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, InvalidTargetSnafu, Result};

/// Family of a [`Target`], without capability details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
pub enum TargetFamily {
    Cuda,
    Rocm,
}

/// NVIDIA compute capability (`sm_80` is `major = 8, minor = 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CudaCapability {
    pub major: u32,
    pub minor: u32,
}

/// AMD GPU architecture (`gfx90a`, `gfx1100`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RocmCapability {
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Target {
    Cuda(CudaCapability),
    Rocm(RocmCapability),
}

impl CudaCapability {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn arch_name(&self) -> String {
        format!("sm_{}{}", self.major, self.minor)
    }
}

impl RocmCapability {
    pub fn new(arch: impl Into<String>) -> Self {
        Self { arch: arch.into() }
    }

    /// RDNA parts (gfx10xx, gfx11xx, ...) run wave32; CDNA and GCN run wave64.
    pub fn is_rdna(&self) -> bool {
        self.arch.strip_prefix("gfx").is_some_and(|digits| digits.len() >= 4 && !digits.starts_with('9'))
    }

    /// Matrix core generation: 1 for gfx908, 2 for gfx90a, 3 for gfx94x, 0 otherwise.
    pub fn mfma_version(&self) -> u32 {
        match self.arch.as_str() {
            "gfx908" => 1,
            "gfx90a" => 2,
            arch if arch.starts_with("gfx94") => 3,
            _ => 0,
        }
    }
}

impl Target {
    pub const fn cuda(major: u32, minor: u32) -> Self {
        Self::Cuda(CudaCapability::new(major, minor))
    }

    pub fn rocm(arch: impl Into<String>) -> Self {
        Self::Rocm(RocmCapability::new(arch))
    }

    pub fn family(&self) -> TargetFamily {
        match self {
            Self::Cuda(_) => TargetFamily::Cuda,
            Self::Rocm(_) => TargetFamily::Rocm,
        }
    }

    /// Architecture string recorded in artifact metadata.
    pub fn arch_name(&self) -> String {
        match self {
            Self::Cuda(cap) => cap.arch_name(),
            Self::Rocm(cap) => cap.arch.clone(),
        }
    }

    /// Threads that execute in lockstep.
    pub fn warp_size(&self) -> u32 {
        match self {
            Self::Cuda(_) => 32,
            Self::Rocm(cap) if cap.is_rdna() => 32,
            Self::Rocm(_) => 64,
        }
    }

    /// Name of the loadable binary format for this family.
    pub fn binary_format_name(&self) -> &'static str {
        match self {
            Self::Cuda(_) => "cubin",
            Self::Rocm(_) => "hsaco",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family(), self.arch_name())
    }
}

/// Accepts `cuda:sm_80`, `sm_80`, `rocm:gfx90a` and `gfx90a`.
impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let spec = s.trim();
        let lowered = spec.to_ascii_lowercase();
        let (family, arch) = match lowered.split_once(':') {
            Some((family, arch)) => {
                let family = TargetFamily::from_str(family)
                    .map_err(|_| InvalidTargetSnafu { target: spec, reason: "unknown family" }.build())?;
                (Some(family), arch.to_string())
            }
            None => (None, lowered.clone()),
        };

        if let Some(digits) = arch.strip_prefix("sm_") {
            if family == Some(TargetFamily::Rocm) {
                return InvalidTargetSnafu { target: spec, reason: "sm_ architecture on rocm" }.fail();
            }
            let (major, minor) = parse_sm(digits).ok_or_else(|| {
                InvalidTargetSnafu { target: spec, reason: "compute capability must be sm_<major><minor>" }.build()
            })?;
            return Ok(Target::cuda(major, minor));
        }

        if let Some(rest) = arch.strip_prefix("gfx") {
            if family == Some(TargetFamily::Cuda) {
                return InvalidTargetSnafu { target: spec, reason: "gfx architecture on cuda" }.fail();
            }
            if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_alphanumeric()) {
                return InvalidTargetSnafu { target: spec, reason: "malformed gfx architecture" }.fail();
            }
            return Ok(Target::rocm(arch));
        }

        InvalidTargetSnafu { target: spec, reason: "expected sm_XY or gfxNNN" }.fail()
    }
}

fn parse_sm(digits: &str) -> Option<(u32, u32)> {
    if digits.len() < 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (major, minor) = digits.split_at(digits.len() - 1);
    Some((major.parse().ok()?, minor.parse().ok()?))
}
