use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The device context is unusable; every later operation fails the same way.
    #[snafu(display("device {device} is lost: {reason}"))]
    DeviceLost { device: String, reason: String },

    /// `KILN_DEVICE` or a builder argument does not name a supported device.
    #[snafu(display("invalid device `{spec}`: {reason}"))]
    InvalidDevice { spec: String, reason: String },

    #[snafu(display("out of device memory: requested {requested} bytes, {available} available"))]
    OutOfMemory { requested: usize, available: usize },

    /// Host copy length does not match the buffer.
    #[snafu(display("size mismatch: expected {expected} elements, got {actual}"))]
    SizeMismatch { expected: usize, actual: usize },

    /// The device refused the launch configuration.
    #[snafu(display("launch rejected: {reason}"))]
    Launch { reason: String },

    /// Binary cannot be loaded on this device.
    #[snafu(display("cannot load module: {reason}"))]
    InvalidModule { reason: String },

    /// A kernel touched memory it does not own.
    #[snafu(display("kernel `{kernel}` faulted: {reason}"))]
    Fault { kernel: String, reason: String },

    #[snafu(display("timed out waiting for stream {stream} to reach {value}"))]
    Timeout { stream: u64, value: u64 },
}
