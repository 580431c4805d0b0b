use std::fmt;
use std::str::FromStr;

use kiln_dtype::DType;
use smallvec::SmallVec;
use snafu::ResultExt;

use crate::error::{Error, InvalidSignatureSnafu, Result};

/// Concrete types for a kernel's parameters, e.g. `"*fp32,i32,i32"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(SmallVec<[DType; 8]>);

impl Signature {
    pub fn new(types: impl IntoIterator<Item = DType>) -> Self {
        Self(types.into_iter().collect())
    }

    pub fn types(&self) -> &[DType] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<DType> for Signature {
    fn from_iter<I: IntoIterator<Item = DType>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        s.split(',')
            .map(|token| token.parse::<DType>())
            .collect::<Result<_, _>>()
            .context(InvalidSignatureSnafu { signature: s })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, dtype) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dtype}")?;
        }
        Ok(())
    }
}
