//! Error types for code generation.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The body uses something the backend cannot lower.
    #[snafu(display("{line}:{col}: cannot compile `{construct}`: {reason}"))]
    Compilation { construct: String, line: u32, col: u32, reason: String },

    /// Binary container is truncated or inconsistent.
    #[snafu(display("invalid kernel binary: {reason}"))]
    Decode { reason: String },
}
