//! Specialization: binding a signature and constexpr values to a descriptor.
//!
//! Constexpr references in the body are replaced structurally by literals, so the
//! backend sees them as compile-time known values. The result is a pure function of
//! its inputs: equal inputs produce equal keys and equal bodies.

use std::fmt;

use kiln_dtype::{DType, Target};
use snafu::OptionExt;
use tracing::debug;

use crate::constants::Constants;
use crate::error::{MissingConstantSnafu, Result, SignatureMismatchSnafu, UnknownConstantSnafu};
use crate::kernel::{Fingerprint, KernelDescriptor, Param, ParamKind};
use crate::options::CompileOptions;
use crate::parse::{Operand, Stmt};
use crate::signature::Signature;
use crate::types::ConstexprValue;

/// Cache identity of one specialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecializationKey {
    pub kernel: String,
    pub descriptor: Fingerprint,
    /// Runtime parameter types only.
    pub signature: Signature,
    pub constants: Constants,
    pub target: Target,
    pub options: CompileOptions,
}

impl SpecializationKey {
    /// Stable hex digest, suitable for content-addressed storage.
    pub fn digest(&self) -> String {
        blake3::hash(self.to_string().as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for SpecializationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}|{}|{}|{}|{}",
            self.kernel,
            hex(&self.descriptor.0),
            self.signature,
            self.constants,
            self.target,
            self.options
        )
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Runtime parameter with its concrete type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConcreteParam {
    pub name: String,
    pub dtype: DType,
    pub divisible_by: Option<u32>,
}

/// Kernel body with every constexpr reference replaced by its literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConcreteBody {
    pub name: String,
    pub params: Vec<ConcreteParam>,
    pub constants: Constants,
    pub stmts: Vec<Stmt>,
}

impl ConcreteBody {
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

impl fmt::Display for ConcreteBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel {}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", param.name, param.dtype)?;
            if let Some(divisor) = param.divisible_by {
                write!(f, " align={divisor}")?;
            }
        }
        writeln!(f, ") {}", self.constants)?;
        for stmt in &self.stmts {
            writeln!(f, "  {stmt}")?;
        }
        Ok(())
    }
}

#[tracing::instrument(skip_all, fields(kernel = desc.name(), signature = %signature, target = %target))]
pub fn specialize(
    desc: &KernelDescriptor,
    signature: &Signature,
    constants: &Constants,
    target: &Target,
    options: &CompileOptions,
) -> Result<(SpecializationKey, ConcreteBody)> {
    let runtime_sig = check_signature(desc, signature, constants)?;

    for (name, _) in constants.iter() {
        let is_constexpr = desc.param(name).is_some_and(|p| p.kind == ParamKind::Constexpr);
        if !is_constexpr {
            return UnknownConstantSnafu { name }.fail();
        }
    }
    for param in desc.constexpr_params() {
        if !constants.contains(&param.name) {
            return MissingConstantSnafu { name: param.name.as_str() }.fail();
        }
    }

    let mut stmts = desc.body().stmts.clone();
    for stmt in &mut stmts {
        for arg in stmt.operands_mut() {
            if let Operand::Param(name) = &arg.operand
                && let Some(value) = constants.get(name)
            {
                arg.operand = Operand::Lit(value.to_literal());
            }
        }
    }

    let params = desc
        .runtime_params()
        .zip(runtime_sig.types())
        .map(|(param, dtype)| ConcreteParam {
            name: param.name.clone(),
            dtype: *dtype,
            divisible_by: desc.hints().get(&param.name).copied(),
        })
        .collect();

    let body = ConcreteBody { name: desc.name().to_string(), params, constants: constants.clone(), stmts };
    let key = SpecializationKey {
        kernel: desc.name().to_string(),
        descriptor: desc.fingerprint(),
        signature: runtime_sig,
        constants: constants.clone(),
        target: target.clone(),
        options: *options,
    };
    debug!(key = %key.digest(), "specialized");
    Ok((key, body))
}

/// Validate `signature` and return the runtime-only signature.
///
/// Accepts one type per runtime parameter, or one per parameter including
/// constexprs, in which case constexpr positions must be scalar types able to hold
/// the bound value.
fn check_signature(desc: &KernelDescriptor, signature: &Signature, constants: &Constants) -> Result<Signature> {
    let runtime = desc.runtime_params().count();
    let total = desc.params().len();

    if signature.len() == runtime {
        for (param, dtype) in desc.runtime_params().zip(signature.types()) {
            check_kind(param, *dtype)?;
        }
        return Ok(signature.clone());
    }

    if signature.len() != total {
        let expected = if runtime == total { format!("{runtime}") } else { format!("{runtime} (or {total} with constexprs)") };
        return SignatureMismatchSnafu {
            reason: format!("expected {expected} types, got {} in `{signature}`", signature.len()),
        }
        .fail();
    }

    let mut types = Vec::with_capacity(runtime);
    for (param, dtype) in desc.params().iter().zip(signature.types()) {
        if param.kind.is_runtime() {
            check_kind(param, *dtype)?;
            types.push(*dtype);
            continue;
        }
        let scalar = dtype.scalar().context(SignatureMismatchSnafu {
            reason: format!("constexpr `{}` typed as pointer `{dtype}`", param.name),
        })?;
        // Unbound constexprs are reported as missing once the signature is accepted.
        if let Some(value) = constants.get(&param.name) {
            let fits = match value {
                ConstexprValue::Int(v) => scalar.int_range().is_some_and(|(lo, hi)| (lo..=hi).contains(&(*v as i128))),
                ConstexprValue::Bool(_) => scalar.is_bool() || scalar.is_int(),
                ConstexprValue::Enum(_) => false,
            };
            if !fits {
                return SignatureMismatchSnafu {
                    reason: format!("constexpr `{}` = {value} does not fit `{dtype}`", param.name),
                }
                .fail();
            }
        }
    }
    Ok(Signature::new(types))
}

fn check_kind(param: &Param, dtype: DType) -> Result<()> {
    let ok = match param.kind {
        ParamKind::Pointer => dtype.is_ptr(),
        ParamKind::Scalar => !dtype.is_ptr(),
        ParamKind::Constexpr => false,
    };
    if ok {
        Ok(())
    } else {
        SignatureMismatchSnafu { reason: format!("parameter `{}` is {} but typed `{dtype}`", param.name, param.kind) }
            .fail()
    }
}
