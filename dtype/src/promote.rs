//! Implicit widening of mixed operand types in kernel bodies.

use enumset::EnumSet;

use crate::ScalarDType;

impl ScalarDType {
    /// Types reachable from `self` in one widening step.
    const fn widens_to(self) -> &'static [Self] {
        use ScalarDType::*;
        match self {
            Bool => &[Int8, UInt8],
            Int8 => &[Int16],
            UInt8 => &[Int16, UInt16],
            Int16 => &[Int32],
            UInt16 => &[Int32, UInt32],
            Int32 => &[Int64],
            UInt32 => &[Int64, UInt64],
            Int64 | UInt64 => &[Float16, BFloat16],
            Float16 | BFloat16 => &[Float32],
            Float32 => &[Float64],
            Float64 => &[],
        }
    }

    /// `self` and every type it widens to.
    pub fn widenings(self) -> EnumSet<Self> {
        let mut reached = EnumSet::only(self);
        let mut pending = vec![self];
        while let Some(dtype) = pending.pop() {
            for &next in dtype.widens_to() {
                if reached.insert(next) {
                    pending.push(next);
                }
            }
        }
        reached
    }

    /// Narrowest type all of `dtypes` widen to, `None` for an empty slice.
    ///
    /// Declaration order ranks candidates: earlier variants are narrower.
    pub fn least_upper(dtypes: &[Self]) -> Option<Self> {
        let (first, rest) = dtypes.split_first()?;
        rest.iter().fold(first.widenings(), |common, dtype| common & dtype.widenings()).iter().next()
    }

    pub fn widens_into(self, to: Self) -> bool {
        self.widenings().contains(to)
    }
}
