//! Compile and launch pipeline for kiln kernels.
//!
//! A [`KernelDescriptor`](kiln_ir::KernelDescriptor) is specialized for a
//! signature and constant bindings, compiled once per specialization key through
//! the [`ArtifactCache`], and launched on a caller-owned [`Device`](kiln_device::Device)
//! over a grid computed from the META view.
//!
//! ```ignore
//! let device = Device::from_env()?;
//! let compiler = Compiler::global();
//! let constants = Constants::new().with("BLOCK", 256)?;
//! let kernel = compiler.compile(&desc, "*fp32,i32,i32", &constants, &device)?;
//!
//! let args = Args::new().arg(&x).arg(m).arg(n);
//! launch(&kernel, |meta| cdiv(m, meta["BLOCK"]) * cdiv(n, meta["BLOCK"]), args, &device)?.wait()?;
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod disk;
pub mod error;
pub mod grid;
pub mod jit;
pub mod launcher;

#[cfg(test)]
pub mod test;

pub use cache::{ArtifactCache, CacheStats};
pub use compiler::{AsmArtifact, CompiledKernel, Compiler};
pub use config::RuntimeConfig;
pub use disk::DiskCache;
pub use error::{Error, Result};
pub use grid::{Grid, Meta, MetaValue, cdiv};
pub use jit::JitKernel;
pub use launcher::{Arg, Args, BoundArgs, LaunchHandle, bind, launch, launch_grid, launch_on};
