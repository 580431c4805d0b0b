//! Backend for kiln kernels.
//!
//! A [`ConcreteBody`](kiln_ir::ConcreteBody) is lowered to a typed SSA form
//! ([`kir`]), optimized, analyzed for resource usage and emitted as PTX for CUDA
//! targets or AMDGCN assembly for ROCm targets. The result is packed into a
//! loadable image together with the kernel IR.
//!
//! # Usage
//!
//! ```ignore
//! use kiln_codegen::compile;
//!
//! let artifact = compile(&body, &Target::cuda(8, 0), &CompileOptions::default())?;
//! println!("{}", artifact.asm["ptx"]);
//! ```

pub mod analysis;
pub mod artifact;
pub mod binary;
pub mod error;
pub mod eval;
pub mod gcn;
pub mod kir;
pub mod lower;
pub mod opt;
pub mod ptx;

#[cfg(test)]
pub mod test;

pub use analysis::ResourceUsage;
pub use artifact::{ArtifactMetadata, BinaryFormat, CompiledArtifact, compile};
pub use binary::{Image, decode};
pub use error::{Error, Result};
pub use kir::Kernel;
