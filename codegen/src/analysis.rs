//! Resource estimates: registers per thread and shared memory per program.

use kiln_dtype::{DType, Target};
use kiln_ir::CompileOptions;

use crate::kir::{Inst, Kernel, Shape, Ty};

/// Registers reserved for program ids, thread ids and parameter addresses.
const BASE_REGISTERS: u32 = 8;
/// Allocation granularity of the register file.
const REGISTER_GRANULE: u32 = 8;
pub const MAX_REGISTERS: u32 = 255;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResourceUsage {
    pub registers: u32,
    pub shared_mem: u32,
    pub threads: u32,
}

/// 32-bit registers one lane of `dtype` occupies.
fn words(dtype: DType) -> u32 {
    dtype.bytes().div_ceil(4) as u32
}

/// Registers a value occupies in each thread.
pub fn value_registers(ty: Ty, threads: u32) -> u32 {
    let lanes = match ty.shape {
        Shape::Scalar => 1,
        Shape::Block(len) => len.div_ceil(threads),
    };
    lanes * words(ty.dtype)
}

pub fn analyze(kernel: &Kernel, target: &Target, options: &CompileOptions) -> ResourceUsage {
    let warp = target.warp_size();
    let threads = options.num_warps * warp;

    let mut last_use = vec![None; kernel.nodes.len()];
    for (id, node) in kernel.nodes.iter().enumerate() {
        for operand in node.inst.operands() {
            last_use[operand as usize] = Some(id);
        }
    }

    // Live-range pressure; immediates fold into instructions and need no register.
    let mut pressure = 0u32;
    let mut live: Vec<(usize, u32)> = Vec::new();
    for (id, node) in kernel.nodes.iter().enumerate() {
        live.retain(|(end, _)| *end >= id);
        if let (Some(ty), Some(end)) = (node.ty, last_use[id])
            && !matches!(node.inst, Inst::Const(_))
        {
            live.push((end, value_registers(ty, threads)));
        }
        pressure = pressure.max(live.iter().map(|(_, regs)| regs).sum());
    }

    let registers = (pressure + BASE_REGISTERS).next_multiple_of(REGISTER_GRANULE).min(MAX_REGISTERS);

    // Cross-warp reductions stage one partial per warp in shared memory.
    let shared_mem = kernel
        .nodes
        .iter()
        .filter_map(|node| match node.inst {
            Inst::Reduce(_, operand) => kernel.ty(operand),
            _ => None,
        })
        .filter(|ty| ty.shape.len() > warp && options.num_warps > 1)
        .map(|ty| words(ty.dtype) * 4 * options.num_warps)
        .max()
        .unwrap_or(0);

    ResourceUsage { registers, shared_mem, threads }
}
