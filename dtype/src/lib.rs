//! Data types shared by every stage of the kiln pipeline.
//!
//! Kernels only ever see scalars and pointers to scalars living in global
//! device memory. Block values (tiles of scalars) are a property of the kernel
//! IR, not of the dtype, so they do not appear here.

pub mod error;
pub mod ext;
pub mod promote;
pub mod target;


use std::fmt;
use std::str::FromStr;

pub use error::{Error, Result};
pub use ext::HasDType;
pub use target::{CudaCapability, RocmCapability, Target, TargetFamily};

use error::UnknownTypeTokenSnafu;

/// Address space for pointer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddrSpace {
    /// Global/device memory.
    Global,
    /// Per-program shared memory (LDS on ROCm).
    Shared,
}

/// Scalar data types.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[enumset(repr = "u32")]
pub enum ScalarDType {
    Bool = 0,

    // Interleaved signed/unsigned for correct LUB priority (lower = more specific)
    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 7,
    UInt64 = 8,

    Float16 = 9,
    BFloat16 = 10,
    Float32 = 11,
    Float64 = 12,
}

/// Data type of a kernel parameter or value: a scalar or a pointer to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    /// Scalar type (single value).
    Scalar(ScalarDType),

    /// Pointer to scalars.
    Ptr { base: ScalarDType, addrspace: AddrSpace },
}

impl ScalarDType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 => 4,
            Self::Int64 | Self::UInt64 => 8,
            Self::Float16 | Self::BFloat16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Width in bits. `Bool` is a one-bit predicate.
    pub const fn bits(&self) -> u32 {
        match self {
            Self::Bool => 1,
            _ => self.bytes() as u32 * 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// Signature token (`fp32`, `i32`, ...).
    pub const fn token(&self) -> &'static str {
        match self {
            Self::Bool => "i1",
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::UInt8 => "u8",
            Self::UInt16 => "u16",
            Self::UInt32 => "u32",
            Self::UInt64 => "u64",
            Self::Float16 => "fp16",
            Self::BFloat16 => "bf16",
            Self::Float32 => "fp32",
            Self::Float64 => "fp64",
        }
    }

    /// Inverse of [`ScalarDType::token`].
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "i1" => Self::Bool,
            "i8" => Self::Int8,
            "i16" => Self::Int16,
            "i32" => Self::Int32,
            "i64" => Self::Int64,
            "u8" => Self::UInt8,
            "u16" => Self::UInt16,
            "u32" => Self::UInt32,
            "u64" => Self::UInt64,
            "fp16" => Self::Float16,
            "bf16" => Self::BFloat16,
            "fp32" => Self::Float32,
            "fp64" => Self::Float64,
            _ => return None,
        })
    }

    /// Range of values representable by an integer type, as i128 to cover u64.
    pub const fn int_range(&self) -> Option<(i128, i128)> {
        Some(match self {
            Self::Bool => (0, 1),
            Self::Int8 => (i8::MIN as i128, i8::MAX as i128),
            Self::Int16 => (i16::MIN as i128, i16::MAX as i128),
            Self::Int32 => (i32::MIN as i128, i32::MAX as i128),
            Self::Int64 => (i64::MIN as i128, i64::MAX as i128),
            Self::UInt8 => (0, u8::MAX as i128),
            Self::UInt16 => (0, u16::MAX as i128),
            Self::UInt32 => (0, u32::MAX as i128),
            Self::UInt64 => (0, u64::MAX as i128),
            _ => return None,
        })
    }
}

impl fmt::Display for ScalarDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl From<ScalarDType> for DType {
    fn from(scalar: ScalarDType) -> Self {
        Self::Scalar(scalar)
    }
}

impl DType {
    /// Create a global pointer to `base`.
    pub const fn ptr(base: ScalarDType) -> Self {
        Self::Ptr { base, addrspace: AddrSpace::Global }
    }

    pub fn scalar(&self) -> Option<ScalarDType> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// Get the base scalar type (the pointee for pointers).
    pub fn base(&self) -> ScalarDType {
        match self {
            Self::Scalar(s) => *s,
            Self::Ptr { base, .. } => *base,
        }
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Self::Ptr { .. })
    }

    pub fn bytes(&self) -> usize {
        match self {
            Self::Scalar(s) => s.bytes(),
            Self::Ptr { .. } => 8, // Pointers are 64-bit
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.scalar(), Some(ScalarDType::Bool))
    }

    pub fn is_signed(&self) -> bool {
        self.scalar().is_some_and(|s| s.is_signed())
    }

    pub fn is_unsigned(&self) -> bool {
        self.scalar().is_some_and(|s| s.is_unsigned())
    }

    pub fn is_int(&self) -> bool {
        self.scalar().is_some_and(|s| s.is_int())
    }

    pub fn is_float(&self) -> bool {
        self.scalar().is_some_and(|s| s.is_float())
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s.token()),
            Self::Ptr { base, addrspace: AddrSpace::Global } => write!(f, "*{}", base.token()),
            Self::Ptr { base, addrspace: AddrSpace::Shared } => write!(f, "*shared {}", base.token()),
        }
    }
}

/// Parses a single signature token: `i32`, `fp16`, `*fp32`.
impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        let (is_ptr, name) = match token.strip_prefix('*') {
            Some(rest) => (true, rest.trim()),
            None => (false, token),
        };
        let Some(base) = ScalarDType::from_token(name) else {
            return UnknownTypeTokenSnafu { token }.fail();
        };
        Ok(if is_ptr { DType::ptr(base) } else { DType::Scalar(base) })
    }
}

// Convenient constructors for common scalar types
impl DType {
    pub const fn bool_() -> Self {
        Self::Scalar(ScalarDType::Bool)
    }
    pub const fn int32() -> Self {
        Self::Scalar(ScalarDType::Int32)
    }
    pub const fn int64() -> Self {
        Self::Scalar(ScalarDType::Int64)
    }
    pub const fn float32() -> Self {
        Self::Scalar(ScalarDType::Float32)
    }
}

#[allow(non_upper_case_globals)]
impl DType {
    pub const Bool: Self = Self::Scalar(ScalarDType::Bool);
    pub const Int8: Self = Self::Scalar(ScalarDType::Int8);
    pub const Int16: Self = Self::Scalar(ScalarDType::Int16);
    pub const Int32: Self = Self::Scalar(ScalarDType::Int32);
    pub const Int64: Self = Self::Scalar(ScalarDType::Int64);
    pub const UInt8: Self = Self::Scalar(ScalarDType::UInt8);
    pub const UInt16: Self = Self::Scalar(ScalarDType::UInt16);
    pub const UInt32: Self = Self::Scalar(ScalarDType::UInt32);
    pub const UInt64: Self = Self::Scalar(ScalarDType::UInt64);
    pub const Float16: Self = Self::Scalar(ScalarDType::Float16);
    pub const BFloat16: Self = Self::Scalar(ScalarDType::BFloat16);
    pub const Float32: Self = Self::Scalar(ScalarDType::Float32);
    pub const Float64: Self = Self::Scalar(ScalarDType::Float64);
}
