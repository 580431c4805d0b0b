use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Descriptor failed construction-time validation.
    #[snafu(display("malformed kernel `{kernel}`: {reason}"))]
    MalformedKernel { kernel: String, reason: String },

    /// Kernel body text could not be parsed.
    #[snafu(display("{line}:{col}: {message}"))]
    Syntax { line: u32, col: u32, message: String },

    /// Signature text is not a comma separated list of type tokens.
    #[snafu(display("invalid signature `{signature}`: {source}"))]
    InvalidSignature { signature: String, source: kiln_dtype::Error },

    /// Signature disagrees with the descriptor's parameter list.
    #[snafu(display("signature mismatch: {reason}"))]
    SignatureMismatch { reason: String },

    #[snafu(display("missing constexpr binding for `{name}`"))]
    MissingConstant { name: String },

    #[snafu(display("`{name}` is not a constexpr parameter of this kernel"))]
    UnknownConstant { name: String },

    #[snafu(display("constexpr `{name}` bound more than once"))]
    DuplicateConstant { name: String },
}
