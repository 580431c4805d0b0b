//! Kernel descriptors.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use bon::bon;
use snafu::{OptionExt, ensure};
use tracing::trace;

use crate::error::{Error, MalformedKernelSnafu, Result};
use crate::parse::{Body, Operand, RESERVED};

/// How a parameter is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumString, strum::IntoStaticStr)]
pub enum ParamKind {
    /// Device pointer, passed at launch.
    #[strum(serialize = "ptr", serialize = "pointer")]
    Pointer,
    /// Numeric scalar, passed at launch.
    #[strum(serialize = "scalar")]
    Scalar,
    /// Compile-time constant, substituted during specialization.
    #[strum(serialize = "constexpr")]
    Constexpr,
}

impl ParamKind {
    pub const fn is_runtime(&self) -> bool {
        !matches!(self, Self::Constexpr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

impl Param {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self { name: name.into(), kind }
    }

    pub fn ptr(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Pointer)
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Scalar)
    }

    pub fn constexpr(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Constexpr)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.kind)
    }
}

/// Parses `"X: ptr"`, `"n: scalar"`, `"BLOCK: constexpr"`.
impl FromStr for Param {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, kind) = s.split_once(':').context(MalformedKernelSnafu {
            kernel: "<param>",
            reason: format!("parameter `{s}` is not of the form `name: kind`"),
        })?;
        let kind = ParamKind::from_str(kind.trim()).map_err(|_| {
            MalformedKernelSnafu { kernel: "<param>", reason: format!("unknown parameter kind `{}`", kind.trim()) }
                .build()
        })?;
        Ok(Self::new(name.trim(), kind))
    }
}

/// Stable content identity of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 32]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Immutable description of a kernel: parameters, parsed body and layout hints.
#[derive(Debug, Clone)]
pub struct KernelDescriptor {
    name: String,
    params: Vec<Param>,
    body: Body,
    /// Runtime parameter name -> guaranteed divisor (bytes for pointers, value for scalars).
    hints: BTreeMap<String, u32>,
    fingerprint: Fingerprint,
}

#[bon]
impl KernelDescriptor {
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        #[builder(default)] params: Vec<Param>,
        #[builder(into)] body: String,
        #[builder(default)] hints: BTreeMap<String, u32>,
    ) -> Result<Self> {
        let malformed = |reason: String| MalformedKernelSnafu { kernel: name.clone(), reason }.build();

        ensure!(is_identifier(&name), MalformedKernelSnafu { kernel: name.clone(), reason: "kernel name is not an identifier" });

        let mut seen = HashSet::new();
        for param in &params {
            if !is_identifier(&param.name) || RESERVED.contains(&param.name.as_str()) {
                return Err(malformed(format!("`{}` is not a valid parameter name", param.name)));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(malformed(format!("parameter name `{}` collides", param.name)));
            }
        }

        let body = Body::parse(&body).map_err(|err| malformed(format!("body: {err}")))?;

        let mut defined = HashSet::new();
        for stmt in &body.stmts {
            for arg in stmt.operands() {
                match &arg.operand {
                    Operand::Value(v) if !defined.contains(v.as_str()) => {
                        return Err(malformed(format!("{}: `%{v}` used before definition", arg.span)));
                    }
                    Operand::Param(p) if !seen.contains(p.as_str()) => {
                        return Err(malformed(format!("{}: `{p}` does not name a parameter", arg.span)));
                    }
                    _ => {}
                }
            }
            if let Some(result) = &stmt.result
                && !defined.insert(result.as_str())
            {
                return Err(malformed(format!("{}: `%{result}` defined twice", stmt.span)));
            }
        }

        for (param, divisor) in &hints {
            let runtime = params.iter().any(|p| p.name == *param && p.kind.is_runtime());
            if !runtime {
                return Err(malformed(format!("hint on `{param}`, which is not a runtime parameter")));
            }
            if !divisor.is_power_of_two() {
                return Err(malformed(format!("hint divisor {divisor} for `{param}` is not a power of two")));
            }
        }

        let fingerprint = fingerprint_of(&name, &params, &body, &hints);
        trace!(kernel = %name, %fingerprint, params = params.len(), stmts = body.stmts.len(), "kernel descriptor built");

        Ok(Self { name, params, body, hints, fingerprint })
    }
}

impl KernelDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn hints(&self) -> &BTreeMap<String, u32> {
        &self.hints
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn runtime_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.kind.is_runtime())
    }

    pub fn constexpr_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| !p.kind.is_runtime())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn fingerprint_of(name: &str, params: &[Param], body: &Body, hints: &BTreeMap<String, u32>) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"kiln-kernel-v1\0");
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    for param in params {
        hasher.update(param.to_string().as_bytes());
        hasher.update(b"\0");
    }
    for (param, divisor) in hints {
        hasher.update(format!("{param}%{divisor}\0").as_bytes());
    }
    hasher.update(body.to_string().as_bytes());
    Fingerprint(*hasher.finalize().as_bytes())
}
