//! Aliasing targets and tracked fields

use crate::smt::{FormulaManager, Term};
use crate::types::CType;
use std::fmt;

/// One location a pointer of some type may currently point to
///
/// The address is `base_address(base) + container_offset + proper_offset`:
/// `container_offset` is the offset of the innermost enclosing array or
/// composite inside the base, `proper_offset` the offset inside that container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerTarget {
    /// Base the target lives in
    pub base: String,
    /// Innermost enclosing array or composite, `None` for a scalar base
    pub container_type: Option<CType>,
    /// Offset inside the container
    pub proper_offset: u64,
    /// Offset of the container inside the base
    pub container_offset: u64,
}

impl PointerTarget {
    /// Creates a target
    pub fn new(
        base: impl Into<String>,
        container_type: Option<CType>,
        proper_offset: u64,
        container_offset: u64,
    ) -> Self {
        Self {
            base: base.into(),
            container_type,
            proper_offset,
            container_offset,
        }
    }

    /// Byte offset from the base address
    pub fn offset(&self) -> u64 {
        self.container_offset + self.proper_offset
    }

    /// Address term of the target
    pub fn address(&self, fm: &FormulaManager) -> Term {
        Term::add(
            fm.base_address(&self.base),
            Term::int(i128::from(self.offset())),
        )
    }
}

impl fmt::Display for PointerTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.container_type {
            Some(container) => write!(
                f,
                "({} + {} + {} in {})",
                self.base, self.container_offset, self.proper_offset, container
            ),
            None => write!(f, "({} + {})", self.base, self.offset()),
        }
    }
}

/// A `(composite, field)` pair whose targets are tracked
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeField {
    /// Canonical name of the composite (`struct s`)
    pub composite: String,
    /// Member name
    pub field: String,
}

impl CompositeField {
    /// Creates a field key
    pub fn new(composite: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            composite: composite.into(),
            field: field.into(),
        }
    }

    /// Field key for member `field` of composite type `ty`
    pub fn of(ty: &CType, field: &str) -> Self {
        Self::new(ty.access_name(), field)
    }
}

impl fmt::Display for CompositeField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.composite, self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_address() {
        let fm = FormulaManager::default();
        let target = PointerTarget::new("s", Some(CType::array_of(CType::int(), 4)), 8, 16);
        assert_eq!(target.offset(), 24);
        assert_eq!(target.address(&fm).to_string(), "(+ __ADDRESS_OF_s 24)");

        let scalar = PointerTarget::new("x", None, 0, 0);
        assert_eq!(scalar.address(&fm).to_string(), "__ADDRESS_OF_x");
    }
}
