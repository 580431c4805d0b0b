//! Typed kernel IR.
//!
//! A flat SSA list: every node may only refer to earlier nodes. Values are either
//! scalars or one-dimensional blocks whose length is a power of two. Scalar to
//! block broadcasts are explicit ([`Inst::Splat`]), so every elementwise node has
//! operands of identical shape.

use std::fmt;
use std::hash::{Hash, Hasher};

use kiln_dtype::DType;
use kiln_ir::Span;

pub type ValueId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Shape {
    Scalar,
    Block(u32),
}

impl Shape {
    /// Number of lanes.
    pub const fn len(&self) -> u32 {
        match self {
            Self::Scalar => 1,
            Self::Block(n) => *n,
        }
    }

    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ty {
    pub dtype: DType,
    pub shape: Shape,
}

impl Ty {
    pub const fn scalar(dtype: DType) -> Self {
        Self { dtype, shape: Shape::Scalar }
    }

    pub const fn block(dtype: DType, len: u32) -> Self {
        Self { dtype, shape: Shape::Block(len) }
    }

    pub const fn with_dtype(self, dtype: DType) -> Self {
        Self { dtype, shape: self.shape }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            Shape::Scalar => write!(f, "{}", self.dtype),
            Shape::Block(n) => write!(f, "<{n} x {}>", self.dtype),
        }
    }
}

/// Scalar immediate. Integers (any width, signed or not) and predicates are kept as
/// 64-bit two's complement; floats as `f64`.
#[derive(Debug, Clone, Copy)]
pub enum Imm {
    Int(i64),
    Float(f64),
}

impl Imm {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::Float(v) => v as i64,
        }
    }
}

impl PartialEq for Imm {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Imm {}

impl Hash for Imm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Int(v) => (0u8, *v).hash(state),
            Self::Float(v) => (1u8, v.to_bits()).hash(state),
        }
    }
}

impl fmt::Display for Imm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Min,
    Max,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    pub const fn is_comparison(&self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne)
    }

    pub const fn is_bitwise(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Xor | Self::Shl | Self::Shr)
    }

    pub const fn is_commutative(&self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Min | Self::Max | Self::And | Self::Or | Self::Xor | Self::Eq | Self::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Exp,
    Log,
    Sqrt,
}

impl UnaryOp {
    pub const fn is_transcendental(&self) -> bool {
        matches!(self, Self::Exp | Self::Log | Self::Sqrt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

/// Cache policy attached to global memory accesses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::FromRepr)]
#[repr(u8)]
pub enum CacheModifier {
    #[default]
    #[strum(to_string = "")]
    Default,
    /// Cache at all levels.
    #[strum(to_string = "ca", serialize = ".ca")]
    CacheAll,
    /// Cache in L2 only.
    #[strum(to_string = "cg", serialize = ".cg")]
    CacheGlobal,
    /// Streaming, likely accessed once.
    #[strum(to_string = "cs", serialize = ".cs")]
    Streaming,
    #[strum(serialize = "evict_first")]
    EvictFirst,
    #[strum(serialize = "evict_last")]
    EvictLast,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Inst {
    /// Runtime parameter by position.
    Param(u32),
    Const(Imm),
    ProgramId(u8),
    NumPrograms(u8),
    /// `start, start + 1, ...` over the block length of the node type.
    Arange(i64),
    Splat(ValueId),
    Binary(BinaryOp, ValueId, ValueId),
    Unary(UnaryOp, ValueId),
    Select(ValueId, ValueId, ValueId),
    Cast(ValueId),
    /// Pointer plus element offset.
    PtrAdd(ValueId, ValueId),
    Load { ptr: ValueId, mask: Option<ValueId>, other: Option<ValueId>, cache: CacheModifier },
    Store { ptr: ValueId, value: ValueId, mask: Option<ValueId>, cache: CacheModifier },
    Reduce(ReduceOp, ValueId),
}

impl Inst {
    /// Values this instruction reads.
    pub fn operands(&self) -> smallvec::SmallVec<[ValueId; 3]> {
        use smallvec::smallvec;
        match self {
            Self::Param(_) | Self::Const(_) | Self::ProgramId(_) | Self::NumPrograms(_) | Self::Arange(_) => smallvec![],
            Self::Splat(a) | Self::Unary(_, a) | Self::Cast(a) | Self::Reduce(_, a) => smallvec![*a],
            Self::Binary(_, a, b) | Self::PtrAdd(a, b) => smallvec![*a, *b],
            Self::Select(c, a, b) => smallvec![*c, *a, *b],
            Self::Load { ptr, mask, other, .. } => {
                let mut ops = smallvec![*ptr];
                ops.extend(mask.iter().chain(other.iter()).copied());
                ops
            }
            Self::Store { ptr, value, mask, .. } => {
                let mut ops = smallvec![*ptr, *value];
                ops.extend(mask.iter().copied());
                ops
            }
        }
    }

    /// Rewrite every operand through `f`.
    pub fn map_operands(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            Self::Param(_) | Self::Const(_) | Self::ProgramId(_) | Self::NumPrograms(_) | Self::Arange(_) => {}
            Self::Splat(a) | Self::Unary(_, a) | Self::Cast(a) | Self::Reduce(_, a) => *a = f(*a),
            Self::Binary(_, a, b) | Self::PtrAdd(a, b) => {
                *a = f(*a);
                *b = f(*b);
            }
            Self::Select(c, a, b) => {
                *c = f(*c);
                *a = f(*a);
                *b = f(*b);
            }
            Self::Load { ptr, mask, other, .. } => {
                *ptr = f(*ptr);
                if let Some(m) = mask {
                    *m = f(*m);
                }
                if let Some(o) = other {
                    *o = f(*o);
                }
            }
            Self::Store { ptr, value, mask, .. } => {
                *ptr = f(*ptr);
                *value = f(*value);
                if let Some(m) = mask {
                    *m = f(*m);
                }
            }
        }
    }

    pub const fn has_side_effects(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub inst: Inst,
    /// `None` for stores.
    pub ty: Option<Ty>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub dtype: DType,
    pub divisible_by: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Kernel {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub nodes: Vec<Node>,
}

impl Kernel {
    pub fn ty(&self, id: ValueId) -> Option<Ty> {
        self.nodes.get(id as usize).and_then(|n| n.ty)
    }

    /// Number of `Store` nodes, the kernel's only observable effects.
    pub fn store_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.inst.has_side_effects()).count()
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kernel {}", self.name)?;
        for (id, node) in self.nodes.iter().enumerate() {
            match node.ty {
                Some(ty) => writeln!(f, "  v{id}: {ty} = {:?}", node.inst)?,
                None => writeln!(f, "  {:?}", node.inst)?,
            }
        }
        Ok(())
    }
}
