use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Signature token that names no known type.
    #[snafu(display("unknown type token `{token}`"))]
    UnknownTypeToken { token: String },

    /// Target description that could not be parsed.
    #[snafu(display("invalid target `{target}`: {reason}"))]
    InvalidTarget { target: String, reason: String },
}
