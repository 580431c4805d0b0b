//! Call-style front door: `kernel.run(grid, args, device)`.
//!
//! Mirrors `kernel[grid](X, Y, OUT, n, BLOCK=256)`: arguments bind to the
//! descriptor's parameters in declaration order or by name, constexpr ones become
//! the constant bindings and the signature is inferred from the runtime ones.

use std::sync::Arc;

use kiln_device::Device;
use kiln_ir::{Constants, KernelDescriptor, ParamKind, Signature};
use snafu::ensure;

use crate::compiler::{CompiledKernel, Compiler};
use crate::error::{ArgumentMismatchSnafu, Result};
use crate::grid::{Grid, Meta};
use crate::launcher::{Arg, Args, LaunchHandle, launch};

#[derive(Debug, Clone)]
pub struct JitKernel {
    descriptor: Arc<KernelDescriptor>,
    compiler: Compiler,
}

impl JitKernel {
    /// Use the process-wide [`Compiler::global`].
    pub fn new(descriptor: KernelDescriptor) -> Self {
        Self::with_compiler(descriptor, Compiler::global())
    }

    pub fn with_compiler(descriptor: KernelDescriptor, compiler: Compiler) -> Self {
        Self { descriptor: Arc::new(descriptor), compiler }
    }

    pub fn descriptor(&self) -> &KernelDescriptor {
        &self.descriptor
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Specialize and compile for `args` on `device` without launching.
    pub fn warmup(&self, args: &Args, device: &Device) -> Result<(CompiledKernel, Args)> {
        device.check_alive()?;
        let (signature, constants, runtime) = self.split(args)?;
        let kernel = self.compiler.compile_signature(&self.descriptor, &signature, &constants, device.target())?;
        Ok((kernel, runtime))
    }

    /// Compile (cached) and launch.
    pub fn run<F, G>(&self, grid: F, args: Args, device: &Device) -> Result<LaunchHandle>
    where
        F: FnOnce(&Meta) -> G,
        G: Into<Grid>,
    {
        let (kernel, runtime) = self.warmup(&args, device)?;
        launch(&kernel, grid, runtime, device)
    }

    /// Sort arguments into signature, constant bindings and named runtime arguments.
    fn split(&self, args: &Args) -> Result<(Signature, Constants, Args)> {
        let params = self.descriptor.params();
        ensure!(
            args.positional.len() <= params.len(),
            ArgumentMismatchSnafu {
                reason: format!(
                    "`{}` takes {} arguments, got {}",
                    self.descriptor.name(),
                    params.len(),
                    args.positional.len()
                )
            }
        );

        let mut slots: Vec<Option<&Arg>> = vec![None; params.len()];
        for (slot, arg) in slots.iter_mut().zip(&args.positional) {
            *slot = Some(arg);
        }
        for (name, arg) in &args.named {
            let index = params.iter().position(|p| &p.name == name).ok_or_else(|| {
                ArgumentMismatchSnafu { reason: format!("`{}` has no parameter `{name}`", self.descriptor.name()) }
                    .build()
            })?;
            ensure!(slots[index].is_none(), ArgumentMismatchSnafu { reason: format!("`{name}` bound twice") });
            slots[index] = Some(arg);
        }

        let mut constants = Constants::new();
        let mut types = Vec::new();
        let mut runtime = Args::new();
        for (param, slot) in params.iter().zip(slots) {
            let Some(arg) = slot else {
                // Missing constexprs are reported by specialization.
                ensure!(
                    param.kind == ParamKind::Constexpr,
                    ArgumentMismatchSnafu { reason: format!("missing argument `{}`", param.name) }
                );
                continue;
            };
            match param.kind {
                ParamKind::Constexpr => {
                    let value = arg.to_constexpr().ok_or_else(|| {
                        ArgumentMismatchSnafu { reason: format!("constexpr `{}` cannot be {arg}", param.name) }.build()
                    })?;
                    constants.insert(param.name.clone(), value)?;
                }
                ParamKind::Pointer | ParamKind::Scalar => {
                    let dtype = arg.infer_dtype().filter(|dtype| dtype.is_ptr() == (param.kind == ParamKind::Pointer));
                    let dtype = dtype.ok_or_else(|| {
                        ArgumentMismatchSnafu { reason: format!("`{}` is a {} parameter, got {arg}", param.name, param.kind) }
                            .build()
                    })?;
                    types.push(dtype);
                    runtime = runtime.named(param.name.clone(), arg.clone());
                }
            }
        }
        Ok((Signature::new(types), constants, runtime))
    }
}
