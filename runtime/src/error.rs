//! Error taxonomy of the compile and launch pipeline.
//!
//! Every lower crate has its own error type; they are folded into the variants
//! below so that callers match on one enum regardless of which stage failed.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("malformed kernel `{kernel}`: {reason}"))]
    MalformedKernel { kernel: String, reason: String },

    #[snafu(display("signature mismatch: {reason}"))]
    SignatureMismatch { reason: String },

    #[snafu(display("missing constexpr binding for `{name}`"))]
    MissingConstant { name: String },

    #[snafu(display("`{name}` is not a constexpr parameter of this kernel"))]
    UnknownConstant { name: String },

    #[snafu(display("constexpr `{name}` bound more than once"))]
    DuplicateConstant { name: String },

    #[snafu(display("compilation failed: {source}"))]
    Compilation { source: kiln_codegen::Error },

    /// The compile function panicked; waiters of that attempt get this instead.
    #[snafu(display("compilation of `{kernel}` panicked"))]
    CompilePanicked { kernel: String },

    #[snafu(display("argument mismatch: {reason}"))]
    ArgumentMismatch { reason: String },

    /// The device refused the launch configuration.
    #[snafu(display("launch rejected: {reason}"))]
    Launch { reason: String },

    /// The device context is unusable.
    #[snafu(display("device error: {source}"))]
    Device { source: kiln_device::Error },
}

impl From<kiln_ir::Error> for Error {
    fn from(error: kiln_ir::Error) -> Self {
        use kiln_ir::Error as Ir;
        match error {
            Ir::MalformedKernel { kernel, reason } => Self::MalformedKernel { kernel, reason },
            Ir::Syntax { .. } => Self::MalformedKernel { kernel: String::new(), reason: error.to_string() },
            Ir::InvalidSignature { .. } | Ir::SignatureMismatch { .. } => {
                Self::SignatureMismatch { reason: error.to_string() }
            }
            Ir::MissingConstant { name } => Self::MissingConstant { name },
            Ir::UnknownConstant { name } => Self::UnknownConstant { name },
            Ir::DuplicateConstant { name } => Self::DuplicateConstant { name },
        }
    }
}

impl From<kiln_codegen::Error> for Error {
    fn from(source: kiln_codegen::Error) -> Self {
        Self::Compilation { source }
    }
}

/// Rejected configurations and unloadable modules are launch errors; anything
/// else means the device itself is in trouble.
impl From<kiln_device::Error> for Error {
    fn from(source: kiln_device::Error) -> Self {
        use kiln_device::Error as Dev;
        match source {
            Dev::Launch { reason } | Dev::InvalidModule { reason } => Self::Launch { reason },
            source => Self::Device { source },
        }
    }
}
