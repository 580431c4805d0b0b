//! Launch grids and the META view handed to grid functions.
//!
//! `meta["BLOCK"]` panics when the entry is missing, like map indexing. Grid
//! functions that may see optional names should use [`Meta::int`] or
//! [`Meta::get`], which return `None` instead.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use kiln_ir::{ConstexprValue, Constants};
use snafu::ensure;

use crate::error::{LaunchSnafu, Result};

/// `ceil(a / b)` for non-negative `a` and positive `b`; `0` when `b` is not positive.
pub fn cdiv(a: i64, b: i64) -> u64 {
    if b <= 0 || a <= 0 {
        return 0;
    }
    (a as u64).div_ceil(b as u64)
}

/// Number of program instances along 1 to 3 axes.
///
/// Dimensions are unsigned, so a negative extent cannot be expressed. A zero
/// extent is valid and describes a launch with nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Grid {
    dims: [u64; 3],
    rank: u8,
}

impl Grid {
    /// A grid from 1 to 3 extents.
    pub fn new(extents: &[u64]) -> Result<Self> {
        ensure!(
            (1..=3).contains(&extents.len()),
            LaunchSnafu { reason: format!("grid must have 1 to 3 dimensions, got {}", extents.len()) }
        );
        let mut dims = [1; 3];
        dims[..extents.len()].copy_from_slice(extents);
        Ok(Self { dims, rank: extents.len() as u8 })
    }

    pub const fn x(x: u64) -> Self {
        Self { dims: [x, 1, 1], rank: 1 }
    }

    pub const fn xy(x: u64, y: u64) -> Self {
        Self { dims: [x, y, 1], rank: 2 }
    }

    pub const fn xyz(x: u64, y: u64, z: u64) -> Self {
        Self { dims: [x, y, z], rank: 3 }
    }

    /// Extents padded to three axes with 1.
    pub const fn dims(&self) -> [u64; 3] {
        self.dims
    }

    pub fn rank(&self) -> usize {
        self.rank as usize
    }

    pub fn extents(&self) -> &[u64] {
        &self.dims[..self.rank()]
    }

    /// Any axis of extent zero.
    pub fn is_empty(&self) -> bool {
        self.dims.contains(&0)
    }

    pub fn programs(&self) -> u128 {
        self.dims.iter().map(|d| *d as u128).product()
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.extents())
    }
}

impl From<u64> for Grid {
    fn from(x: u64) -> Self {
        Self::x(x)
    }
}

impl From<(u64,)> for Grid {
    fn from((x,): (u64,)) -> Self {
        Self::x(x)
    }
}

impl From<(u64, u64)> for Grid {
    fn from((x, y): (u64, u64)) -> Self {
        Self::xy(x, y)
    }
}

impl From<(u64, u64, u64)> for Grid {
    fn from((x, y, z): (u64, u64, u64)) -> Self {
        Self::xyz(x, y, z)
    }
}

impl From<[u64; 1]> for Grid {
    fn from([x]: [u64; 1]) -> Self {
        Self::x(x)
    }
}

impl From<[u64; 2]> for Grid {
    fn from([x, y]: [u64; 2]) -> Self {
        Self::xy(x, y)
    }
}

impl From<[u64; 3]> for Grid {
    fn from([x, y, z]: [u64; 3]) -> Self {
        Self::xyz(x, y, z)
    }
}

impl TryFrom<Vec<u64>> for Grid {
    type Error = crate::Error;

    fn try_from(extents: Vec<u64>) -> Result<Self> {
        Self::new(&extents)
    }
}

/// Value visible through [`Meta`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Enum(String),
}

/// By-name view of the constexpr bindings and scalar runtime arguments of a launch.
///
/// Integer and boolean values can be indexed directly: `meta["BLOCK"]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    values: BTreeMap<String, MetaValue>,
    ints: BTreeMap<String, i64>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_constants(constants: &Constants) -> Self {
        let mut meta = Self::new();
        for (name, value) in constants.iter() {
            let value = match value {
                ConstexprValue::Int(v) => MetaValue::Int(*v),
                ConstexprValue::Bool(v) => MetaValue::Bool(*v),
                ConstexprValue::Enum(s) => MetaValue::Enum(s.clone()),
            };
            meta.insert(name, value);
        }
        meta
    }

    pub fn insert(&mut self, name: impl Into<String>, value: MetaValue) {
        let name = name.into();
        match value {
            MetaValue::Int(v) => {
                self.ints.insert(name.clone(), v);
            }
            MetaValue::Bool(v) => {
                self.ints.insert(name.clone(), v as i64);
            }
            _ => {
                self.ints.remove(&name);
            }
        }
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&MetaValue> {
        self.values.get(name)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.ints.get(name).copied()
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            MetaValue::Int(v) => Some(*v as f64),
            MetaValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl Index<&str> for Meta {
    type Output = i64;

    /// Panics if `name` is not an integer or boolean entry, like map indexing.
    fn index(&self, name: &str) -> &i64 {
        match self.ints.get(name) {
            Some(value) => value,
            None => panic!("META has no integer entry `{name}`"),
        }
    }
}
