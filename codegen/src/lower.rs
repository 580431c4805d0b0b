//! Lowering from a concrete body to typed kernel IR.
//!
//! Literals are weakly typed: they take the type of the value they meet, and only
//! fall back to `i32`/`i64`, `fp32` or `i1` when both sides are literals. Scalars are
//! broadcast to blocks implicitly. Pointer arithmetic is limited to adding or
//! subtracting an integer offset.

use std::collections::HashMap;
use std::str::FromStr;

use kiln_dtype::{DType, ScalarDType};
use kiln_ir::{Arg, ConcreteBody, ConstValue, Operand, Span, Stmt};
use snafu::OptionExt;
use tracing::trace;

use crate::error::{CompilationSnafu, Result};
use crate::kir::{BinaryOp, CacheModifier, Imm, Inst, Kernel, Node, ParamInfo, ReduceOp, Shape, Ty, UnaryOp, ValueId};

/// Largest block a single value may span.
pub const MAX_BLOCK: u32 = 1 << 20;

#[derive(Debug, Clone)]
enum Val {
    Typed(ValueId),
    Weak(ConstValue),
}

pub fn lower(body: &ConcreteBody) -> Result<Kernel> {
    let mut lowerer = Lowerer { body, nodes: Vec::new(), values: HashMap::new(), params: HashMap::new() };
    for stmt in &body.stmts {
        lowerer.statement(stmt)?;
    }
    let params = body
        .params
        .iter()
        .map(|p| ParamInfo { name: p.name.clone(), dtype: p.dtype, divisible_by: p.divisible_by })
        .collect();
    trace!(kernel = %body.name, nodes = lowerer.nodes.len(), "lowered");
    Ok(Kernel { name: body.name.clone(), params, nodes: lowerer.nodes })
}

fn stmt_error<T>(stmt: &Stmt, reason: impl Into<String>) -> Result<T> {
    CompilationSnafu { construct: stmt.to_string(), line: stmt.span.line, col: stmt.span.col, reason }.fail()
}

fn arg_error<T>(arg: &Arg, reason: impl Into<String>) -> Result<T> {
    CompilationSnafu { construct: arg.operand.to_string(), line: arg.span.line, col: arg.span.col, reason }.fail()
}

/// Type a literal gets when nothing else decides.
fn default_dtype(lit: &ConstValue) -> Option<ScalarDType> {
    match lit {
        ConstValue::Int(v) if i32::try_from(*v).is_ok() => Some(ScalarDType::Int32),
        ConstValue::Int(_) => Some(ScalarDType::Int64),
        ConstValue::Float(_) => Some(ScalarDType::Float32),
        ConstValue::Bool(_) => Some(ScalarDType::Bool),
        ConstValue::Symbol(_) => None,
    }
}

struct Lowerer<'a> {
    body: &'a ConcreteBody,
    nodes: Vec<Node>,
    values: HashMap<&'a str, ValueId>,
    params: HashMap<u32, ValueId>,
}

impl<'a> Lowerer<'a> {
    fn push(&mut self, inst: Inst, ty: Option<Ty>, span: Span) -> ValueId {
        self.nodes.push(Node { inst, ty, span });
        (self.nodes.len() - 1) as ValueId
    }

    fn ty(&self, id: ValueId) -> Ty {
        // Every value-producing node carries a type; stores are never looked up.
        self.nodes[id as usize].ty.unwrap_or(Ty::scalar(DType::Bool))
    }

    fn operand(&mut self, arg: &'a Arg) -> Result<Val> {
        match &arg.operand {
            Operand::Value(name) => {
                let id = self.values.get(name.as_str()).copied();
                id.map(Val::Typed).context(CompilationSnafu {
                    construct: arg.operand.to_string(),
                    line: arg.span.line,
                    col: arg.span.col,
                    reason: "value is not defined by a value-producing statement",
                })
            }
            Operand::Param(name) => {
                let Some(index) = self.body.param_index(name) else {
                    return arg_error(arg, "not a runtime parameter");
                };
                let index = index as u32;
                if let Some(id) = self.params.get(&index) {
                    return Ok(Val::Typed(*id));
                }
                let ty = Ty::scalar(self.body.params[index as usize].dtype);
                let id = self.push(Inst::Param(index), Some(ty), arg.span);
                self.params.insert(index, id);
                Ok(Val::Typed(id))
            }
            Operand::Lit(ConstValue::Symbol(_)) => arg_error(arg, "symbols are only valid as the `cache` option"),
            Operand::Lit(lit) => Ok(Val::Weak(lit.clone())),
        }
    }

    fn typed_operand(&mut self, arg: &'a Arg) -> Result<ValueId> {
        match self.operand(arg)? {
            Val::Typed(id) => Ok(id),
            Val::Weak(lit) => self.materialize_default(&lit, arg),
        }
    }

    fn materialize_default(&mut self, lit: &ConstValue, arg: &Arg) -> Result<ValueId> {
        let Some(dtype) = default_dtype(lit) else {
            return arg_error(arg, "literal has no numeric type");
        };
        self.materialize(lit, dtype, arg)
    }

    fn materialize(&mut self, lit: &ConstValue, dtype: ScalarDType, arg: &Arg) -> Result<ValueId> {
        let imm = match (lit, dtype) {
            (ConstValue::Int(v), d) if d.is_float() => Imm::Float(*v as f64),
            (ConstValue::Int(v), d) => {
                let fits = d.int_range().is_some_and(|(lo, hi)| (lo..=hi).contains(&(*v as i128)));
                if !fits {
                    return arg_error(arg, format!("literal does not fit `{d}`"));
                }
                Imm::Int(*v)
            }
            (ConstValue::Float(v), d) if d.is_float() => Imm::Float(*v),
            (ConstValue::Float(_), d) => return arg_error(arg, format!("float literal used as `{d}`")),
            (ConstValue::Bool(v), d) if d.is_float() => Imm::Float(*v as u8 as f64),
            (ConstValue::Bool(v), _) => Imm::Int(*v as i64),
            (ConstValue::Symbol(_), _) => return arg_error(arg, "symbols are only valid as the `cache` option"),
        };
        Ok(self.push(Inst::Const(imm), Some(Ty::scalar(DType::Scalar(dtype))), arg.span))
    }

    fn cast(&mut self, id: ValueId, dtype: DType, span: Span) -> ValueId {
        let ty = self.ty(id);
        if ty.dtype == dtype {
            return id;
        }
        self.push(Inst::Cast(id), Some(ty.with_dtype(dtype)), span)
    }

    fn broadcast(&mut self, id: ValueId, shape: Shape, stmt: &Stmt) -> Result<ValueId> {
        let ty = self.ty(id);
        match (ty.shape, shape) {
            (a, b) if a == b => Ok(id),
            (Shape::Scalar, Shape::Block(_)) => Ok(self.push(Inst::Splat(id), Some(Ty { dtype: ty.dtype, shape }), stmt.span)),
            (a, b) => stmt_error(stmt, format!("shape mismatch: {a:?} vs {b:?}")),
        }
    }

    fn common_shape(&self, ids: &[ValueId], stmt: &Stmt) -> Result<Shape> {
        let mut shape = Shape::Scalar;
        for id in ids {
            match (shape, self.ty(*id).shape) {
                (_, Shape::Scalar) => {}
                (Shape::Scalar, block) => shape = block,
                (a, b) if a == b => {}
                (a, b) => return stmt_error(stmt, format!("shape mismatch: {a:?} vs {b:?}")),
            }
        }
        Ok(shape)
    }

    fn int_immediate(&self, arg: &Arg, what: &str) -> Result<i64> {
        match &arg.operand {
            Operand::Lit(ConstValue::Int(v)) => Ok(*v),
            _ => arg_error(arg, format!("{what} must be an integer immediate")),
        }
    }

    fn block_len(&self, arg: &Arg, len: i64) -> Result<u32> {
        let len = u32::try_from(len).ok().filter(|n| n.is_power_of_two() && *n <= MAX_BLOCK);
        len.context(CompilationSnafu {
            construct: arg.operand.to_string(),
            line: arg.span.line,
            col: arg.span.col,
            reason: format!("block length must be a power of two no larger than {MAX_BLOCK}"),
        })
    }

    /// Element type two operands are computed in.
    fn resolve(&self, a: &Val, b: &Val) -> Option<ScalarDType> {
        let weak_with = |typed: ScalarDType, lit: &ConstValue| -> Option<ScalarDType> {
            match lit {
                ConstValue::Float(_) if !typed.is_float() => Some(ScalarDType::Float32),
                ConstValue::Int(v) if typed.is_int() => {
                    let fits = typed.int_range().is_some_and(|(lo, hi)| (lo..=hi).contains(&(*v as i128)));
                    if fits { Some(typed) } else { ScalarDType::least_upper(&[typed, default_dtype(lit)?]) }
                }
                ConstValue::Int(_) if typed.is_bool() => default_dtype(lit),
                ConstValue::Symbol(_) => None,
                _ => Some(typed),
            }
        };
        match (a, b) {
            (Val::Typed(x), Val::Typed(y)) => {
                ScalarDType::least_upper(&[self.ty(*x).dtype.scalar()?, self.ty(*y).dtype.scalar()?])
            }
            (Val::Typed(x), Val::Weak(lit)) | (Val::Weak(lit), Val::Typed(x)) => weak_with(self.ty(*x).dtype.scalar()?, lit),
            (Val::Weak(x), Val::Weak(y)) => ScalarDType::least_upper(&[default_dtype(x)?, default_dtype(y)?]),
        }
    }

    fn coerce(&mut self, val: Val, dtype: ScalarDType, arg: &Arg) -> Result<ValueId> {
        match val {
            Val::Typed(id) => Ok(self.cast(id, DType::Scalar(dtype), arg.span)),
            Val::Weak(lit) => self.materialize(&lit, dtype, arg),
        }
    }

    fn is_ptr(&self, val: &Val) -> bool {
        matches!(val, Val::Typed(id) if self.ty(*id).dtype.is_ptr())
    }

    fn expect_arity(&self, stmt: &Stmt, arity: usize, options: &[&str]) -> Result<()> {
        if stmt.args.len() != arity {
            return stmt_error(stmt, format!("`{}` takes {arity} operand(s), found {}", stmt.mnemonic, stmt.args.len()));
        }
        if let Some((key, arg)) = stmt.options.iter().find(|(key, _)| !options.contains(&key.as_str())) {
            return arg_error(arg, format!("unknown option `{key}` for `{}`", stmt.mnemonic));
        }
        if stmt.ty.is_some() && stmt.mnemonic != "cast" {
            return stmt_error(stmt, "only `cast` takes a `to` type");
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &'a Stmt) -> Result<()> {
        let produced = match stmt.mnemonic.as_str() {
            "pass" => {
                self.expect_arity(stmt, 0, &[])?;
                None
            }
            "program_id" | "num_programs" => {
                self.expect_arity(stmt, 1, &[])?;
                let axis = self.int_immediate(&stmt.args[0], "axis")?;
                let Ok(axis @ 0..=2) = u8::try_from(axis) else {
                    return arg_error(&stmt.args[0], "axis must be 0, 1 or 2");
                };
                let inst = if stmt.mnemonic == "program_id" { Inst::ProgramId(axis) } else { Inst::NumPrograms(axis) };
                Some(self.push(inst, Some(Ty::scalar(DType::Int32)), stmt.span))
            }
            "arange" => {
                self.expect_arity(stmt, 2, &[])?;
                let start = self.int_immediate(&stmt.args[0], "arange start")?;
                let end = self.int_immediate(&stmt.args[1], "arange end")?;
                let len = self.block_len(&stmt.args[1], end.saturating_sub(start))?;
                if i32::try_from(end).is_err() || i32::try_from(start).is_err() {
                    return stmt_error(stmt, "arange bounds must fit i32");
                }
                Some(self.push(Inst::Arange(start), Some(Ty::block(DType::Int32, len)), stmt.span))
            }
            "splat" => {
                self.expect_arity(stmt, 2, &[])?;
                let value = self.typed_operand(&stmt.args[0])?;
                let len = self.int_immediate(&stmt.args[1], "splat length")?;
                let len = self.block_len(&stmt.args[1], len)?;
                let ty = self.ty(value);
                if ty.shape.is_block() {
                    return arg_error(&stmt.args[0], "splat of a block");
                }
                Some(self.push(Inst::Splat(value), Some(Ty::block(ty.dtype, len)), stmt.span))
            }
            "cast" => {
                self.expect_arity(stmt, 1, &[])?;
                let Some(target) = stmt.ty else {
                    return stmt_error(stmt, "cast needs a `to` type");
                };
                let Some(scalar) = target.scalar() else {
                    return stmt_error(stmt, "casts to pointer types are not supported");
                };
                let value = match self.operand(&stmt.args[0])? {
                    Val::Weak(lit) => self.materialize_default(&lit, &stmt.args[0])?,
                    Val::Typed(id) => id,
                };
                if self.ty(value).dtype.is_ptr() {
                    return arg_error(&stmt.args[0], "casts from pointer types are not supported");
                }
                Some(self.cast(value, DType::Scalar(scalar), stmt.span))
            }
            "select" => {
                self.expect_arity(stmt, 3, &[])?;
                Some(self.select(stmt)?)
            }
            "load" => {
                self.expect_arity(stmt, 1, &["mask", "other", "cache"])?;
                Some(self.load(stmt)?)
            }
            "store" => {
                self.expect_arity(stmt, 2, &["mask", "cache"])?;
                self.store(stmt)?;
                None
            }
            "reduce_sum" | "reduce_max" | "reduce_min" => {
                self.expect_arity(stmt, 1, &["axis"])?;
                if let Some(axis) = stmt.option("axis")
                    && self.int_immediate(axis, "reduction axis")? != 0
                {
                    return arg_error(axis, "blocks are one-dimensional, only axis 0 exists");
                }
                let op = match stmt.mnemonic.as_str() {
                    "reduce_sum" => ReduceOp::Sum,
                    "reduce_max" => ReduceOp::Max,
                    _ => ReduceOp::Min,
                };
                Some(self.reduce(op, stmt)?)
            }
            mnemonic => {
                if let Ok(op) = UnaryOp::from_str(mnemonic) {
                    self.expect_arity(stmt, 1, &[])?;
                    Some(self.unary(op, stmt)?)
                } else if let Ok(op) = BinaryOp::from_str(mnemonic) {
                    self.expect_arity(stmt, 2, &[])?;
                    Some(self.binary(op, stmt)?)
                } else {
                    return stmt_error(stmt, format!("unsupported operation `{mnemonic}`"));
                }
            }
        };

        match (&stmt.result, produced) {
            (Some(name), Some(id)) => {
                self.values.insert(name.as_str(), id);
            }
            (Some(_), None) => return stmt_error(stmt, format!("`{}` produces no value", stmt.mnemonic)),
            (None, _) => {}
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, stmt: &'a Stmt) -> Result<ValueId> {
        let (lhs_arg, rhs_arg) = (&stmt.args[0], &stmt.args[1]);
        let lhs = self.operand(lhs_arg)?;
        let rhs = self.operand(rhs_arg)?;

        if self.is_ptr(&lhs) || self.is_ptr(&rhs) {
            return self.pointer_arith(op, lhs, rhs, stmt);
        }

        let Some(mut dtype) = self.resolve(&lhs, &rhs) else {
            return stmt_error(stmt, "operands have no common type");
        };
        if op.is_bitwise() && dtype.is_float() {
            return stmt_error(stmt, format!("`{op}` is not defined on `{dtype}`"));
        }
        if matches!(op, BinaryOp::Shl | BinaryOp::Shr) && dtype.is_bool() {
            return stmt_error(stmt, "shift of a predicate");
        }
        if dtype.is_bool() && !op.is_bitwise() && !op.is_comparison() {
            dtype = ScalarDType::Int32;
        }

        let a = self.coerce(lhs, dtype, lhs_arg)?;
        let b = self.coerce(rhs, dtype, rhs_arg)?;
        let shape = self.common_shape(&[a, b], stmt)?;
        let a = self.broadcast(a, shape, stmt)?;
        let b = self.broadcast(b, shape, stmt)?;
        let result = if op.is_comparison() { DType::Bool } else { DType::Scalar(dtype) };
        Ok(self.push(Inst::Binary(op, a, b), Some(Ty { dtype: result, shape }), stmt.span))
    }

    fn pointer_arith(&mut self, op: BinaryOp, lhs: Val, rhs: Val, stmt: &'a Stmt) -> Result<ValueId> {
        let (ptr, offset, offset_arg) = match (op, self.is_ptr(&lhs), self.is_ptr(&rhs)) {
            (BinaryOp::Add | BinaryOp::Sub, true, false) => (lhs, rhs, &stmt.args[1]),
            (BinaryOp::Add, false, true) => (rhs, lhs, &stmt.args[0]),
            _ => return stmt_error(stmt, format!("unsupported pointer arithmetic `{op}`")),
        };
        let Val::Typed(ptr) = ptr else {
            return stmt_error(stmt, "unsupported pointer arithmetic");
        };
        let offset = match offset {
            Val::Weak(lit @ ConstValue::Int(_)) => self.materialize_default(&lit, offset_arg)?,
            Val::Typed(id) if self.ty(id).dtype.is_int() => id,
            _ => return arg_error(offset_arg, "pointer offsets must be integers"),
        };
        let offset = if op == BinaryOp::Sub {
            let ty = self.ty(offset);
            self.push(Inst::Unary(UnaryOp::Neg, offset), Some(ty), stmt.span)
        } else {
            offset
        };
        let shape = self.common_shape(&[ptr, offset], stmt)?;
        let ptr_dtype = self.ty(ptr).dtype;
        let ptr = self.broadcast(ptr, shape, stmt)?;
        let offset = self.broadcast(offset, shape, stmt)?;
        Ok(self.push(Inst::PtrAdd(ptr, offset), Some(Ty { dtype: ptr_dtype, shape }), stmt.span))
    }

    fn unary(&mut self, op: UnaryOp, stmt: &'a Stmt) -> Result<ValueId> {
        let value = self.typed_operand(&stmt.args[0])?;
        let ty = self.ty(value);
        let Some(dtype) = ty.dtype.scalar() else {
            return stmt_error(stmt, format!("`{op}` on a pointer"));
        };
        let value = match op {
            UnaryOp::Neg | UnaryOp::Abs if dtype.is_bool() => return stmt_error(stmt, format!("`{op}` on a predicate")),
            UnaryOp::Not if dtype.is_float() => return stmt_error(stmt, format!("`{op}` is not defined on `{dtype}`")),
            op if op.is_transcendental() && !dtype.is_float() => self.cast(value, DType::Float32, stmt.span),
            _ => value,
        };
        let ty = self.ty(value);
        Ok(self.push(Inst::Unary(op, value), Some(ty), stmt.span))
    }

    fn select(&mut self, stmt: &'a Stmt) -> Result<ValueId> {
        let cond = match self.operand(&stmt.args[0])? {
            Val::Weak(lit @ ConstValue::Bool(_)) => self.materialize(&lit, ScalarDType::Bool, &stmt.args[0])?,
            Val::Typed(id) if self.ty(id).dtype.is_bool() => id,
            _ => return arg_error(&stmt.args[0], "select condition must be `i1`"),
        };
        let a = self.operand(&stmt.args[1])?;
        let b = self.operand(&stmt.args[2])?;

        let (a, b) = if self.is_ptr(&a) || self.is_ptr(&b) {
            match (a, b) {
                (Val::Typed(x), Val::Typed(y)) if self.ty(x).dtype == self.ty(y).dtype => (x, y),
                _ => return stmt_error(stmt, "select between different pointer types"),
            }
        } else {
            let Some(dtype) = self.resolve(&a, &b) else {
                return stmt_error(stmt, "operands have no common type");
            };
            (self.coerce(a, dtype, &stmt.args[1])?, self.coerce(b, dtype, &stmt.args[2])?)
        };

        let shape = self.common_shape(&[cond, a, b], stmt)?;
        let cond = self.broadcast(cond, shape, stmt)?;
        let a = self.broadcast(a, shape, stmt)?;
        let b = self.broadcast(b, shape, stmt)?;
        let dtype = self.ty(a).dtype;
        Ok(self.push(Inst::Select(cond, a, b), Some(Ty { dtype, shape }), stmt.span))
    }

    fn mask(&mut self, stmt: &'a Stmt, shape: Shape) -> Result<Option<ValueId>> {
        let Some(arg) = stmt.option("mask") else {
            return Ok(None);
        };
        let mask = match self.operand(arg)? {
            Val::Weak(lit @ ConstValue::Bool(_)) => self.materialize(&lit, ScalarDType::Bool, arg)?,
            Val::Typed(id) if self.ty(id).dtype.is_bool() => id,
            _ => return arg_error(arg, "mask must be `i1`"),
        };
        if self.ty(mask).shape.is_block() && self.ty(mask).shape != shape {
            return arg_error(arg, "mask shape does not match the pointer");
        }
        Ok(Some(self.broadcast(mask, shape, stmt)?))
    }

    fn cache(&self, stmt: &Stmt) -> Result<CacheModifier> {
        let Some(arg) = stmt.option("cache") else {
            return Ok(CacheModifier::Default);
        };
        match &arg.operand {
            Operand::Lit(ConstValue::Symbol(s)) => match CacheModifier::from_str(s) {
                Ok(cache) => Ok(cache),
                Err(_) => arg_error(arg, format!("unknown cache modifier `{s}`")),
            },
            _ => arg_error(arg, "cache modifier must be a symbol"),
        }
    }

    fn pointer(&mut self, stmt: &'a Stmt) -> Result<(ValueId, Ty, ScalarDType)> {
        let ptr = self.typed_operand(&stmt.args[0])?;
        let ty = self.ty(ptr);
        match ty.dtype {
            DType::Ptr { base, .. } => Ok((ptr, ty, base)),
            other => arg_error(&stmt.args[0], format!("expected a pointer, found `{other}`")),
        }
    }

    fn load(&mut self, stmt: &'a Stmt) -> Result<ValueId> {
        let (ptr, ty, base) = self.pointer(stmt)?;
        let mask = self.mask(stmt, ty.shape)?;
        let other = match stmt.option("other") {
            None => None,
            Some(arg) => {
                let val = self.operand(arg)?;
                if self.is_ptr(&val) {
                    return arg_error(arg, "`other` must be a value");
                }
                let other = self.coerce(val, base, arg)?;
                if self.ty(other).shape.is_block() && self.ty(other).shape != ty.shape {
                    return arg_error(arg, "`other` shape does not match the pointer");
                }
                Some(self.broadcast(other, ty.shape, stmt)?)
            }
        };
        let cache = self.cache(stmt)?;
        let result = Ty { dtype: DType::Scalar(base), shape: ty.shape };
        Ok(self.push(Inst::Load { ptr, mask, other, cache }, Some(result), stmt.span))
    }

    fn store(&mut self, stmt: &'a Stmt) -> Result<()> {
        let (ptr, ty, base) = self.pointer(stmt)?;
        let value = self.operand(&stmt.args[1])?;
        if self.is_ptr(&value) {
            return arg_error(&stmt.args[1], "storing pointers is not supported");
        }
        let value = self.coerce(value, base, &stmt.args[1])?;
        if self.ty(value).shape.is_block() && self.ty(value).shape != ty.shape {
            return stmt_error(stmt, "stored value shape does not match the pointer");
        }
        let value = self.broadcast(value, ty.shape, stmt)?;
        let mask = self.mask(stmt, ty.shape)?;
        let cache = self.cache(stmt)?;
        self.push(Inst::Store { ptr, value, mask, cache }, None, stmt.span);
        Ok(())
    }

    fn reduce(&mut self, op: ReduceOp, stmt: &'a Stmt) -> Result<ValueId> {
        let value = self.typed_operand(&stmt.args[0])?;
        let ty = self.ty(value);
        let value = match ty.dtype {
            DType::Ptr { .. } => return stmt_error(stmt, "reduction over pointers"),
            DType::Scalar(ScalarDType::Bool) if op == ReduceOp::Sum => self.cast(value, DType::Int32, stmt.span),
            _ => value,
        };
        if !ty.shape.is_block() {
            return Ok(value);
        }
        let dtype = self.ty(value).dtype;
        Ok(self.push(Inst::Reduce(op, value), Some(Ty::scalar(dtype)), stmt.span))
    }
}
