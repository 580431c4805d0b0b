//! Kernel-level intermediate representation for kiln.
//!
//! # Module Organization
//!
//! - [`kernel`] - Kernel descriptors and their parameters
//! - [`parse`] - Body syntax tree and parser
//! - [`signature`] - Concrete parameter types
//! - [`constants`] - Constexpr bindings
//! - [`specialize`] - Specialization keys and concrete bodies
//! - [`options`] - Compile options that take part in the key
//! - [`error`] - Error types and result handling

pub mod constants;
pub mod error;
pub mod kernel;
pub mod options;
pub mod parse;
pub mod signature;
pub mod specialize;
pub mod types;

#[cfg(any(test, feature = "proptest"))]
pub mod test;

pub use constants::Constants;
pub use error::{Error, Result};
pub use kernel::{Fingerprint, KernelDescriptor, Param, ParamKind};
pub use options::CompileOptions;
pub use parse::{Arg, Body, Operand, Span, Stmt};
pub use signature::Signature;
pub use specialize::{ConcreteBody, ConcreteParam, SpecializationKey, specialize};
pub use types::{ConstValue, ConstexprValue};

pub use kiln_dtype::{DType, ScalarDType, Target};
