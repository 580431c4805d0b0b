//! Scalar semantics of the kernel IR.
//!
//! Shared by constant folding and by anything that executes kernels, so that a
//! folded expression and an executed one always agree. Integer results wrap to the
//! width of their type; floats round to the precision of theirs. Integer division
//! by zero yields all ones, as GPU hardware does.

use half::{bf16, f16};
use kiln_dtype::ScalarDType;

use crate::kir::{BinaryOp, Imm, ReduceOp, UnaryOp};

/// Bring `value` into the canonical representation of `dtype`.
pub fn normalize(dtype: ScalarDType, value: Imm) -> Imm {
    use ScalarDType::*;
    match dtype {
        Bool => Imm::Int((value.as_i64() != 0 || matches!(value, Imm::Float(f) if f != 0.0)) as i64),
        Int8 => Imm::Int(value.as_i64() as i8 as i64),
        UInt8 => Imm::Int(value.as_i64() as u8 as i64),
        Int16 => Imm::Int(value.as_i64() as i16 as i64),
        UInt16 => Imm::Int(value.as_i64() as u16 as i64),
        Int32 => Imm::Int(value.as_i64() as i32 as i64),
        UInt32 => Imm::Int(value.as_i64() as u32 as i64),
        Int64 | UInt64 => Imm::Int(value.as_i64()),
        Float16 => Imm::Float(f16::from_f64(value.as_f64()).to_f64()),
        BFloat16 => Imm::Float(bf16::from_f64(value.as_f64()).to_f64()),
        Float32 => Imm::Float(value.as_f64() as f32 as f64),
        Float64 => Imm::Float(value.as_f64()),
    }
}

/// Neutral element of a reduction.
pub fn reduce_identity(op: ReduceOp, dtype: ScalarDType) -> Imm {
    match (op, dtype.is_float()) {
        (ReduceOp::Sum, true) => Imm::Float(0.0),
        (ReduceOp::Sum, false) => Imm::Int(0),
        (ReduceOp::Max, true) => Imm::Float(f64::NEG_INFINITY),
        (ReduceOp::Min, true) => Imm::Float(f64::INFINITY),
        (ReduceOp::Max, false) => Imm::Int(dtype.int_range().map_or(0, |(lo, _)| lo as i64)),
        (ReduceOp::Min, false) => normalize(dtype, Imm::Int(dtype.int_range().map_or(0, |(_, hi)| hi as i64))),
    }
}

pub fn reduce_step(op: ReduceOp, dtype: ScalarDType, acc: Imm, value: Imm) -> Imm {
    let binary = match op {
        ReduceOp::Sum => BinaryOp::Add,
        ReduceOp::Max => BinaryOp::Max,
        ReduceOp::Min => BinaryOp::Min,
    };
    binary_op(binary, dtype, acc, value)
}

fn int_cmp(dtype: ScalarDType, a: i64, b: i64) -> std::cmp::Ordering {
    if dtype.is_unsigned() { (a as u64).cmp(&(b as u64)) } else { a.cmp(&b) }
}

/// Evaluate `a op b` where both operands have type `dtype`.
///
/// Comparisons return a predicate (`Imm::Int(0 | 1)`).
pub fn binary_op(op: BinaryOp, dtype: ScalarDType, a: Imm, b: Imm) -> Imm {
    use BinaryOp::*;

    if dtype.is_float() {
        let (x, y) = (a.as_f64(), b.as_f64());
        let result = match op {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => x / y,
            Rem => x % y,
            Min => x.min(y),
            Max => x.max(y),
            Lt => return Imm::Int((x < y) as i64),
            Le => return Imm::Int((x <= y) as i64),
            Gt => return Imm::Int((x > y) as i64),
            Ge => return Imm::Int((x >= y) as i64),
            Eq => return Imm::Int((x == y) as i64),
            Ne => return Imm::Int((x != y) as i64),
            // Rejected when lowering.
            And | Or | Xor | Shl | Shr => f64::NAN,
        };
        return normalize(dtype, Imm::Float(result));
    }

    let (x, y) = (a.as_i64(), b.as_i64());
    let bits = dtype.bits();
    let ordering = int_cmp(dtype, x, y);
    let result = match op {
        Add => x.wrapping_add(y),
        Sub => x.wrapping_sub(y),
        Mul => x.wrapping_mul(y),
        Div if y == 0 => -1,
        Rem if y == 0 => x,
        Div if dtype.is_unsigned() => ((x as u64) / (y as u64)) as i64,
        Rem if dtype.is_unsigned() => ((x as u64) % (y as u64)) as i64,
        Div => x.wrapping_div(y),
        Rem => x.wrapping_rem(y),
        Min => if ordering.is_le() { x } else { y },
        Max => if ordering.is_ge() { x } else { y },
        And => x & y,
        Or => x | y,
        Xor => x ^ y,
        Shl if y < 0 || y as u64 >= bits as u64 => 0,
        Shl => x.wrapping_shl(y as u32),
        Shr if dtype.is_unsigned() || dtype.is_bool() => {
            if y < 0 || y as u64 >= bits as u64 { 0 } else { ((x as u64) >> y) as i64 }
        }
        Shr => x >> (y.clamp(0, 63) as u32),
        Lt => return Imm::Int(ordering.is_lt() as i64),
        Le => return Imm::Int(ordering.is_le() as i64),
        Gt => return Imm::Int(ordering.is_gt() as i64),
        Ge => return Imm::Int(ordering.is_ge() as i64),
        Eq => return Imm::Int((x == y) as i64),
        Ne => return Imm::Int((x != y) as i64),
    };
    normalize(dtype, Imm::Int(result))
}

pub fn unary_op(op: UnaryOp, dtype: ScalarDType, a: Imm) -> Imm {
    if dtype.is_float() {
        let x = a.as_f64();
        let result = match op {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Not => f64::NAN,
        };
        return normalize(dtype, Imm::Float(result));
    }
    let x = a.as_i64();
    let result = match op {
        UnaryOp::Not if dtype.is_bool() => (x == 0) as i64,
        UnaryOp::Not => !x,
        UnaryOp::Neg => x.wrapping_neg(),
        UnaryOp::Abs if dtype.is_unsigned() => x,
        UnaryOp::Abs => x.wrapping_abs(),
        UnaryOp::Exp => (x as f64).exp() as i64,
        UnaryOp::Log => (x as f64).ln() as i64,
        UnaryOp::Sqrt => (x as f64).sqrt() as i64,
    };
    normalize(dtype, Imm::Int(result))
}

/// Convert `value` of type `from` to type `to`.
///
/// Float to integer conversion truncates toward zero and saturates; NaN becomes 0.
pub fn cast(from: ScalarDType, to: ScalarDType, value: Imm) -> Imm {
    if to.is_bool() {
        return normalize(to, value);
    }
    match (from.is_float(), to.is_float()) {
        (true, false) => {
            let x = value.as_f64();
            let (lo, hi) = to.int_range().unwrap_or((i64::MIN as i128, i64::MAX as i128));
            let clamped = if x.is_nan() { 0 } else { (x.trunc() as i128).clamp(lo, hi) };
            normalize(to, Imm::Int(clamped as i64))
        }
        (false, true) => {
            let x = value.as_i64();
            let as_float = if from.is_unsigned() { x as u64 as f64 } else { x as f64 };
            normalize(to, Imm::Float(as_float))
        }
        _ => normalize(to, value),
    }
}
