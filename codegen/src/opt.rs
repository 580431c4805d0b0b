//! Target-independent optimizations on kernel IR.
//!
//! One forward pass does constant folding, algebraic simplification and common
//! subexpression elimination; a backward pass then drops everything that does not
//! feed a store. Both passes are deterministic and preserve node order.

use std::collections::HashMap;

use tracing::debug;

use crate::eval;
use crate::kir::{BinaryOp, Imm, Inst, Kernel, Node, Shape, Ty, ValueId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptStats {
    pub folded: usize,
    pub simplified: usize,
    pub deduplicated: usize,
    pub eliminated: usize,
}

pub fn optimize(kernel: &mut Kernel) -> OptStats {
    let mut stats = OptStats::default();
    simplify(kernel, &mut stats);
    eliminate_dead(kernel, &mut stats);
    debug!(kernel = %kernel.name, ?stats, nodes = kernel.nodes.len(), "optimized");
    stats
}

enum Rewrite {
    Keep(Inst),
    Forward(ValueId),
    Drop,
}

/// Immediate value of `id`, looking through splats.
fn constant(nodes: &[Node], id: ValueId) -> Option<Imm> {
    match &nodes.get(id as usize)?.inst {
        Inst::Const(imm) => Some(*imm),
        Inst::Splat(inner) => constant(nodes, *inner),
        _ => None,
    }
}

fn is_value(imm: Option<Imm>, expected: i64) -> bool {
    match imm {
        Some(Imm::Int(v)) => v == expected,
        Some(Imm::Float(v)) => v == expected as f64,
        None => false,
    }
}

fn scalar_ty(nodes: &[Node], id: ValueId) -> Option<Ty> {
    nodes.get(id as usize).and_then(|n| n.ty).filter(|ty| ty.shape == Shape::Scalar)
}

fn rewrite(nodes: &[Node], inst: Inst, ty: Option<Ty>, stats: &mut OptStats) -> Rewrite {
    let scalar_dtype = |id: ValueId| scalar_ty(nodes, id).and_then(|ty| ty.dtype.scalar());

    match inst {
        Inst::Binary(op, a, b) => {
            if let (Some(dtype), Some(x), Some(y)) = (scalar_dtype(a), constant(nodes, a), constant(nodes, b))
                && scalar_ty(nodes, b).is_some()
            {
                stats.folded += 1;
                return Rewrite::Keep(Inst::Const(eval::binary_op(op, dtype, x, y)));
            }
            let (ca, cb) = (constant(nodes, a), constant(nodes, b));
            let forward = match op {
                BinaryOp::Add if is_value(cb, 0) => Some(a),
                BinaryOp::Add if is_value(ca, 0) => Some(b),
                BinaryOp::Sub if is_value(cb, 0) => Some(a),
                BinaryOp::Mul | BinaryOp::Div if is_value(cb, 1) => Some(a),
                BinaryOp::Mul if is_value(ca, 1) => Some(b),
                BinaryOp::And | BinaryOp::Or | BinaryOp::Min | BinaryOp::Max if a == b => Some(a),
                _ => None,
            };
            match forward {
                Some(id) => {
                    stats.simplified += 1;
                    Rewrite::Forward(id)
                }
                None => Rewrite::Keep(inst),
            }
        }
        Inst::Unary(op, a) => match (scalar_dtype(a), constant(nodes, a)) {
            (Some(dtype), Some(x)) => {
                stats.folded += 1;
                Rewrite::Keep(Inst::Const(eval::unary_op(op, dtype, x)))
            }
            _ => Rewrite::Keep(inst),
        },
        Inst::Cast(a) => {
            let to = ty.and_then(|ty| ty.dtype.scalar());
            match (scalar_dtype(a), to, constant(nodes, a)) {
                (Some(from), Some(to), Some(x)) => {
                    stats.folded += 1;
                    Rewrite::Keep(Inst::Const(eval::cast(from, to, x)))
                }
                _ => Rewrite::Keep(inst),
            }
        }
        Inst::Select(c, a, b) => match constant(nodes, c) {
            Some(imm) => {
                stats.simplified += 1;
                Rewrite::Forward(if imm.as_i64() != 0 { a } else { b })
            }
            None => Rewrite::Keep(inst),
        },
        Inst::PtrAdd(p, offset) if is_value(constant(nodes, offset), 0) && nodes[p as usize].ty == ty => {
            stats.simplified += 1;
            Rewrite::Forward(p)
        }
        Inst::Load { ptr, mask: Some(mask), cache, .. } if is_value(constant(nodes, mask), 1) => {
            stats.simplified += 1;
            Rewrite::Keep(Inst::Load { ptr, mask: None, other: None, cache })
        }
        Inst::Store { ptr, value, mask: Some(mask), cache } => match constant(nodes, mask) {
            Some(imm) if imm.as_i64() == 0 => {
                stats.simplified += 1;
                Rewrite::Drop
            }
            Some(_) => {
                stats.simplified += 1;
                Rewrite::Keep(Inst::Store { ptr, value, mask: None, cache })
            }
            None => Rewrite::Keep(inst),
        },
        other => Rewrite::Keep(other),
    }
}

fn simplify(kernel: &mut Kernel, stats: &mut OptStats) {
    let mut out: Vec<Node> = Vec::with_capacity(kernel.nodes.len());
    let mut remap: Vec<ValueId> = Vec::with_capacity(kernel.nodes.len());
    let mut seen: HashMap<(Inst, Option<Ty>), ValueId> = HashMap::new();

    for node in kernel.nodes.drain(..) {
        let mut inst = node.inst;
        inst.map_operands(|v| remap[v as usize]);

        let inst = match rewrite(&out, inst, node.ty, stats) {
            Rewrite::Keep(inst) => inst,
            Rewrite::Forward(id) => {
                remap.push(id);
                continue;
            }
            Rewrite::Drop => {
                // Nothing refers to a store's result.
                remap.push(ValueId::MAX);
                continue;
            }
        };

        let pure = !matches!(inst, Inst::Load { .. } | Inst::Store { .. });
        if pure && let Some(&existing) = seen.get(&(inst.clone(), node.ty)) {
            stats.deduplicated += 1;
            remap.push(existing);
            continue;
        }

        let id = out.len() as ValueId;
        if pure {
            seen.insert((inst.clone(), node.ty), id);
        }
        out.push(Node { inst, ty: node.ty, span: node.span });
        remap.push(id);
    }

    kernel.nodes = out;
}

fn eliminate_dead(kernel: &mut Kernel, stats: &mut OptStats) {
    let mut live = vec![false; kernel.nodes.len()];
    for (id, node) in kernel.nodes.iter().enumerate().rev() {
        if node.inst.has_side_effects() {
            live[id] = true;
        }
        if live[id] {
            for operand in node.inst.operands() {
                live[operand as usize] = true;
            }
        }
    }

    let mut remap = vec![ValueId::MAX; kernel.nodes.len()];
    let mut out = Vec::with_capacity(kernel.nodes.len());
    for (id, node) in kernel.nodes.drain(..).enumerate() {
        if !live[id] {
            stats.eliminated += 1;
            continue;
        }
        let mut node = node;
        node.inst.map_operands(|v| remap[v as usize]);
        remap[id] = out.len() as ValueId;
        out.push(node);
    }
    kernel.nodes = out;
}
