//! Kernel execution.
//!
//! Every program instance of the grid runs the kernel IR independently against a
//! read-only view of device memory; stores are collected and committed once all
//! instances have finished. Reads therefore see memory as it was when the launch
//! started, which is all the ordering a launch guarantees.

use half::{bf16, f16};
use kiln_codegen::eval;
use kiln_codegen::kir::{Imm, Inst, Kernel};
use kiln_dtype::{DType, ScalarDType};
use rayon::prelude::*;

use crate::memory::{MemoryView, Write};

#[derive(Debug, Clone)]
enum Value {
    Scalar(Imm),
    Block(Vec<Imm>),
    /// Result slot of a store.
    Unit,
}

impl Value {
    fn lane(&self, i: usize) -> Imm {
        match self {
            Self::Scalar(imm) => *imm,
            Self::Block(lanes) => lanes.get(i).copied().unwrap_or(Imm::Int(0)),
            Self::Unit => Imm::Int(0),
        }
    }

    fn lanes(&self) -> usize {
        match self {
            Self::Block(lanes) => lanes.len(),
            _ => 1,
        }
    }
}

fn element_dtype(dtype: DType) -> ScalarDType {
    match dtype {
        DType::Scalar(s) => s,
        // Addresses are plain 64-bit integers.
        DType::Ptr { .. } => ScalarDType::UInt64,
    }
}

/// Decode a little-endian scalar.
pub fn decode(dtype: ScalarDType, bytes: &[u8]) -> Imm {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    let bits = u64::from_le_bytes(raw);
    match dtype {
        ScalarDType::Float16 => Imm::Float(f16::from_bits(bits as u16).to_f64()),
        ScalarDType::BFloat16 => Imm::Float(bf16::from_bits(bits as u16).to_f64()),
        ScalarDType::Float32 => Imm::Float(f32::from_bits(bits as u32) as f64),
        ScalarDType::Float64 => Imm::Float(f64::from_bits(bits)),
        // Truncating normalization sign-extends signed types.
        int => eval::normalize(int, Imm::Int(bits as i64)),
    }
}

/// Encode a scalar as little-endian bytes.
pub fn encode(dtype: ScalarDType, value: Imm) -> ([u8; 8], u8) {
    let len = dtype.bytes();
    let bits: u64 = match dtype {
        ScalarDType::Float16 => f16::from_f64(value.as_f64()).to_bits() as u64,
        ScalarDType::BFloat16 => bf16::from_f64(value.as_f64()).to_bits() as u64,
        ScalarDType::Float32 => (value.as_f64() as f32).to_bits() as u64,
        ScalarDType::Float64 => value.as_f64().to_bits(),
        int => eval::normalize(int, value).as_i64() as u64,
    };
    (bits.to_le_bytes(), len as u8)
}

/// Launch geometry seen by one program instance.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub grid: [u32; 3],
}

impl Geometry {
    pub fn programs(&self) -> u64 {
        self.grid.iter().map(|d| *d as u64).product()
    }

    fn program_id(&self, linear: u64) -> [u32; 3] {
        let x = self.grid[0] as u64;
        let y = self.grid[1] as u64;
        [(linear % x) as u32, ((linear / x) % y) as u32, (linear / (x * y)) as u32]
    }
}

/// Run one program instance and return its stores.
pub fn run_program(
    kernel: &Kernel,
    args: &[Imm],
    geometry: Geometry,
    pid: [u32; 3],
    memory: &MemoryView<'_>,
) -> Result<Vec<Write>, String> {
    let mut values: Vec<Value> = Vec::with_capacity(kernel.nodes.len());
    let mut writes = Vec::new();

    for node in &kernel.nodes {
        let ty = node.ty;
        let dtype = ty.map_or(ScalarDType::Bool, |ty| element_dtype(ty.dtype));
        let lanes = ty.map_or(1, |ty| ty.shape.len() as usize);
        let block = ty.is_some_and(|ty| ty.shape.is_block());
        let operand_dtype = |v: u32| kernel.ty(v).map_or(ScalarDType::Bool, |ty| element_dtype(ty.dtype));
        let make = |f: &mut dyn FnMut(usize) -> Result<Imm, String>| -> Result<Value, String> {
            if block { (0..lanes).map(f).collect::<Result<Vec<_>, _>>().map(Value::Block) } else { f(0).map(Value::Scalar) }
        };
        let get = |v: u32| &values[v as usize];

        let value = match &node.inst {
            Inst::Param(index) => {
                let arg = args.get(*index as usize).copied();
                Value::Scalar(arg.ok_or_else(|| format!("missing argument {index}"))?)
            }
            Inst::Const(imm) => Value::Scalar(eval::normalize(dtype, *imm)),
            Inst::ProgramId(axis) => Value::Scalar(Imm::Int(pid[*axis as usize % 3] as i64)),
            Inst::NumPrograms(axis) => Value::Scalar(Imm::Int(geometry.grid[*axis as usize % 3] as i64)),
            Inst::Arange(start) => Value::Block((0..lanes as i64).map(|i| Imm::Int(start + i)).collect()),
            Inst::Splat(a) => Value::Block(vec![get(*a).lane(0); lanes]),
            Inst::Binary(op, a, b) => {
                let operand = operand_dtype(*a);
                let (a, b) = (get(*a), get(*b));
                make(&mut |i| Ok(eval::binary_op(*op, operand, a.lane(i), b.lane(i))))?
            }
            Inst::Unary(op, a) => {
                let a = get(*a);
                make(&mut |i| Ok(eval::unary_op(*op, dtype, a.lane(i))))?
            }
            Inst::Select(c, a, b) => {
                let (c, a, b) = (get(*c), get(*a), get(*b));
                make(&mut |i| Ok(if c.lane(i).as_i64() != 0 { a.lane(i) } else { b.lane(i) }))?
            }
            Inst::Cast(a) => {
                let from = operand_dtype(*a);
                let a = get(*a);
                make(&mut |i| Ok(eval::cast(from, dtype, a.lane(i))))?
            }
            Inst::PtrAdd(p, offset) => {
                let elem = ty.map_or(1, |ty| ty.dtype.base().bytes()) as i64;
                let unsigned = operand_dtype(*offset).is_unsigned();
                let (p, offset) = (get(*p), get(*offset));
                make(&mut |i| {
                    let off = offset.lane(i).as_i64();
                    let scaled = if unsigned { (off as u64).wrapping_mul(elem as u64) as i64 } else { off.wrapping_mul(elem) };
                    Ok(Imm::Int(p.lane(i).as_i64().wrapping_add(scaled)))
                })?
            }
            Inst::Load { ptr, mask, other, .. } => {
                let (ptr, mask, other) = (get(*ptr), mask.map(get), other.map(get));
                let bytes = dtype.bytes();
                make(&mut |i| {
                    if mask.is_some_and(|m| m.lane(i).as_i64() == 0) {
                        return Ok(other.map_or(eval::normalize(dtype, Imm::Int(0)), |o| o.lane(i)));
                    }
                    let address = ptr.lane(i).as_i64() as u64;
                    memory.load(address, bytes).map(|raw| decode(dtype, raw))
                })?
            }
            Inst::Store { ptr, value, mask, .. } => {
                let store_dtype = operand_dtype(*value);
                let (ptr, value, mask) = (get(*ptr), get(*value), mask.map(get));
                for i in 0..ptr.lanes().max(value.lanes()) {
                    if mask.is_some_and(|m| m.lane(i).as_i64() == 0) {
                        continue;
                    }
                    let address = ptr.lane(i).as_i64() as u64;
                    let (bytes, len) = encode(store_dtype, value.lane(i));
                    memory.check(address, len as usize)?;
                    writes.push(Write { address, bytes, len });
                }
                Value::Unit
            }
            Inst::Reduce(op, a) => {
                let operand = operand_dtype(*a);
                let a = get(*a);
                let folded = (0..a.lanes())
                    .fold(eval::reduce_identity(*op, operand), |acc, i| eval::reduce_step(*op, operand, acc, a.lane(i)));
                Value::Scalar(folded)
            }
        };
        values.push(value);
    }
    Ok(writes)
}

/// Run every program instance of the grid in parallel.
///
/// Stores are returned in program order, so overlapping writes resolve the same
/// way on every run.
pub fn run_grid(kernel: &Kernel, args: &[Imm], geometry: Geometry, memory: &MemoryView<'_>) -> Result<Vec<Write>, String> {
    let per_program = (0..geometry.programs())
        .into_par_iter()
        .map(|linear| run_program(kernel, args, geometry, geometry.program_id(linear), memory))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(per_program.into_iter().flatten().collect())
}
