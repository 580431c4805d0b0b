//! Literal values.
//!
//! [`ConstValue`] is what appears in a kernel body; [`ConstexprValue`] is what a
//! caller may bind to a constexpr parameter. Specialization turns the latter into
//! the former.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::discriminant;

/// Literal operand of a body statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Quoted symbol (`'evict_last'`), also the substitution of enum constexprs.
    Symbol(String),
}

impl ConstValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

// Floats compare and hash by bit pattern so that bodies can be keys.
impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        discriminant(self).hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Bool(v) => v.hash(state),
            Self::Symbol(s) => s.hash(state),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            // `{:?}` keeps the decimal point so the literal re-parses as a float.
            Self::Float(v) if v.is_finite() => write!(f, "{v:?}"),
            Self::Float(v) if v.is_nan() => f.write_str("nan"),
            Self::Float(v) if *v > 0.0 => f.write_str("inf"),
            Self::Float(_) => f.write_str("-inf"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Symbol(s) => write!(f, "'{s}'"),
        }
    }
}

/// Value bound to a constexpr parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstexprValue {
    Int(i64),
    Bool(bool),
    /// Member of a small enumeration, identified by name.
    Enum(String),
}

impl ConstexprValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Body literal this binding is substituted with.
    pub fn to_literal(&self) -> ConstValue {
        match self {
            Self::Int(v) => ConstValue::Int(*v),
            Self::Bool(v) => ConstValue::Bool(*v),
            Self::Enum(s) => ConstValue::Symbol(s.clone()),
        }
    }
}

impl fmt::Display for ConstexprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Enum(s) => write!(f, "'{s}'"),
        }
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ConstexprValue {
            fn from(v: $ty) -> Self {
                Self::Int(v as i64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for ConstexprValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ConstexprValue {
    fn from(v: &str) -> Self {
        Self::Enum(v.to_string())
    }
}

impl From<String> for ConstexprValue {
    fn from(v: String) -> Self {
        Self::Enum(v)
    }
}
