//! Simulated accelerator for kiln.
//!
//! Plays the role of a vendor driver context: it owns device memory, runs
//! in-order streams on worker threads, loads kernel binaries produced by
//! `kiln-codegen` and executes them one program instance at a time over the
//! kernel IR they carry.
//!
//! ```ignore
//! let device = Device::builder().target(Target::cuda(8, 0)).build();
//! let x = DeviceBuffer::from_slice(&device, &[1.0f32, 2.0, 3.0])?;
//! let module = device.load_module(&artifact.binary)?;
//! device.launch(&module, [1, 1, 1], vec![Imm::Int(x.address() as i64)], device.default_stream())?.wait()?;
//! ```

pub mod buffer;
pub mod device;
pub mod error;
pub mod exec;
pub mod memory;
pub mod module;
pub mod stream;
pub mod sync;

#[cfg(test)]
pub mod test;

pub use buffer::DeviceBuffer;
pub use device::{Completion, DEFAULT_MEMORY, Device, DeviceLimits};
pub use error::{Error, Result};
pub use module::Module;
pub use stream::Stream;
pub use sync::TimelineSignal;
