//! Immutable memory-model snapshot

use super::deferred::DeferredAllocationPool;
use super::target::{CompositeField, PointerTarget};
use crate::types::CType;
use imbl::{OrdMap, OrdSet, Vector};
use lazy_static::lazy_static;
use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref EMPTY: PointerTargetSet = PointerTargetSet {
        bases: OrdMap::new(),
        last_base: None,
        fields: OrdSet::new(),
        targets: OrdMap::new(),
        deferred_allocations: OrdMap::new(),
    };
}

/// Placeholder type of a base whose targets are not materialized: an array of
/// `size` bytes of `void`
pub fn fake_base_type(size: u64) -> CType {
    CType::Array {
        element: Box::new(CType::Void),
        length: Some(size),
    }
}

/// Returns true for placeholder base types
pub fn is_fake_base_type(ty: &CType) -> bool {
    matches!(ty, CType::Array { element, .. } if **element == CType::Void)
}

/// Known bases, tracked fields, aliasing targets and deferred allocations
/// at one point of a path
///
/// Snapshots are immutable and share structure with their predecessors, so
/// cloning is cheap and snapshots can be held by many paths at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerTargetSet {
    pub(crate) bases: OrdMap<String, CType>,
    pub(crate) last_base: Option<String>,
    pub(crate) fields: OrdSet<CompositeField>,
    pub(crate) targets: OrdMap<String, Vector<PointerTarget>>,
    pub(crate) deferred_allocations: OrdMap<String, Arc<DeferredAllocationPool>>,
}

impl PointerTargetSet {
    /// The snapshot tracking nothing
    pub fn empty() -> PointerTargetSet {
        EMPTY.clone()
    }

    /// Returns true if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty() && self.fields.is_empty() && self.deferred_allocations.is_empty()
    }

    /// All bases with their types (placeholders included)
    pub fn bases(&self) -> &OrdMap<String, CType> {
        &self.bases
    }

    /// Returns true if `name` is a base, prepared or materialized
    pub fn is_base(&self, name: &str) -> bool {
        self.bases.contains_key(name)
    }

    /// Returns true if `name` is a base with materialized targets
    pub fn is_actual_base(&self, name: &str) -> bool {
        self.bases
            .get(name)
            .is_some_and(|ty| !is_fake_base_type(ty))
    }

    /// Returns true if `name` is only prepared
    pub fn is_prepared_base(&self, name: &str) -> bool {
        self.bases.get(name).is_some_and(is_fake_base_type)
    }

    /// Type of base `name`
    pub fn base_type(&self, name: &str) -> Option<&CType> {
        self.bases.get(name)
    }

    /// Most recently registered base
    pub fn last_base(&self) -> Option<&str> {
        self.last_base.as_deref()
    }

    /// Tracked fields
    pub fn fields(&self) -> &OrdSet<CompositeField> {
        &self.fields
    }

    /// Returns true if `field` is tracked
    pub fn tracks_field(&self, field: &CompositeField) -> bool {
        self.fields.contains(field)
    }

    /// Targets of values of the type named `type_name`
    pub fn targets(&self, type_name: &str) -> Vector<PointerTarget> {
        self.targets.get(type_name).cloned().unwrap_or_default()
    }

    /// All targets grouped by type name
    pub fn all_targets(&self) -> &OrdMap<String, Vector<PointerTarget>> {
        &self.targets
    }

    /// Total number of targets
    pub fn target_count(&self) -> usize {
        self.targets.values().map(Vector::len).sum()
    }

    /// Pool of the deferred allocation `pointer` refers to
    pub fn deferred_allocation(&self, pointer: &str) -> Option<&Arc<DeferredAllocationPool>> {
        self.deferred_allocations.get(pointer)
    }

    /// Pointer variables referring to deferred allocations
    pub fn deferred_pointers(&self) -> impl Iterator<Item = &String> {
        self.deferred_allocations.keys()
    }
}

impl Default for PointerTargetSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for PointerTargetSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "bases:")?;
        for (name, ty) in self.bases.iter() {
            let marker = if self.last_base.as_deref() == Some(name.as_str()) {
                " (last)"
            } else {
                ""
            };
            writeln!(f, "  {}: {}{}", name, ty, marker)?;
        }
        let fields: Vec<String> = self.fields.iter().map(|field| field.to_string()).collect();
        writeln!(f, "fields: {}", fields.join(", "))?;
        writeln!(f, "targets:")?;
        for (ty, targets) in self.targets.iter() {
            let rendered: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
            writeln!(f, "  {}: {}", ty, rendered.join(" "))?;
        }
        if !self.deferred_allocations.is_empty() {
            writeln!(f, "deferred:")?;
            for (pointer, pool) in self.deferred_allocations.iter() {
                writeln!(f, "  {}: {}", pointer, pool)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let pts = PointerTargetSet::empty();
        assert!(pts.is_empty());
        assert_eq!(pts.target_count(), 0);
        assert!(pts.targets("int").is_empty());
        assert_eq!(pts, PointerTargetSet::default());
    }

    #[test]
    fn test_fake_base_types() {
        assert!(is_fake_base_type(&fake_base_type(0)));
        assert!(!is_fake_base_type(&CType::array_of(CType::char(), 4)));
    }
}
