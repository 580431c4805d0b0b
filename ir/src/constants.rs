use std::collections::BTreeMap;
use std::fmt;

use snafu::ensure;

use crate::error::{DuplicateConstantSnafu, Result};
use crate::types::ConstexprValue;

/// Constexpr bindings, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constants(BTreeMap<String, ConstexprValue>);

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`; a name may only be bound once.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ConstexprValue>) -> Result<()> {
        let name = name.into();
        ensure!(!self.0.contains_key(&name), DuplicateConstantSnafu { name });
        self.0.insert(name, value.into());
        Ok(())
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ConstexprValue>) -> Result<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<ConstexprValue>,
    {
        let mut constants = Self::new();
        for (name, value) in pairs {
            constants.insert(name, value)?;
        }
        Ok(constants)
    }

    pub fn get(&self, name: &str) -> Option<&ConstexprValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConstexprValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Constants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}
