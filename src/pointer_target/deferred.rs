//! Pools of untyped allocations awaiting their type

use imbl::OrdSet;
use std::fmt;

/// An allocation whose C type is not known yet, with the pointer variables
/// currently aliasing it
///
/// Pools are values: every update returns a new pool. More than one base name
/// only appears after two pools were coalesced at a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredAllocationPool {
    pointer_variables: OrdSet<String>,
    bases: OrdSet<String>,
    size: Option<u64>,
    is_zeroing: bool,
}

impl DeferredAllocationPool {
    /// Pool for a fresh allocation `base` held by `pointer`
    pub fn new(
        pointer: impl Into<String>,
        base: impl Into<String>,
        size: Option<u64>,
        is_zeroing: bool,
    ) -> Self {
        Self {
            pointer_variables: OrdSet::unit(pointer.into()),
            bases: OrdSet::unit(base.into()),
            size,
            is_zeroing,
        }
    }

    /// Pointer variables aliasing the allocation
    pub fn pointer_variables(&self) -> &OrdSet<String> {
        &self.pointer_variables
    }

    /// Base names the pool stands for
    pub fn bases(&self) -> &OrdSet<String> {
        &self.bases
    }

    /// Allocation size in bytes, if it was a literal
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Returns true if the memory was allocated zeroed
    pub fn is_zeroing(&self) -> bool {
        self.is_zeroing
    }

    /// Pool with one more alias
    pub fn add_pointer_variable(&self, pointer: impl Into<String>) -> Self {
        let mut pool = self.clone();
        pool.pointer_variables.insert(pointer.into());
        pool
    }

    /// Pool without the alias `pointer`
    pub fn remove_pointer_variable(&self, pointer: &str) -> Self {
        let mut pool = self.clone();
        pool.pointer_variables.remove(pointer);
        pool
    }

    /// Returns true if no pointer variable refers to the allocation any more
    pub fn is_orphaned(&self) -> bool {
        self.pointer_variables.is_empty()
    }

    /// Coalesces two pools: aliases and bases are united, the size survives
    /// only if both agree, and the memory is zeroed only if both allocations were
    pub fn merge_with(&self, other: &DeferredAllocationPool) -> Self {
        Self {
            pointer_variables: self
                .pointer_variables
                .clone()
                .union(other.pointer_variables.clone()),
            bases: self.bases.clone().union(other.bases.clone()),
            size: if self.size == other.size {
                self.size
            } else {
                None
            },
            is_zeroing: self.is_zeroing && other.is_zeroing,
        }
    }

    /// Returns true if the pools share an alias or a base
    pub fn overlaps(&self, other: &DeferredAllocationPool) -> bool {
        self.pointer_variables
            .iter()
            .any(|p| other.pointer_variables.contains(p))
            || self.bases.iter().any(|b| other.bases.contains(b))
    }
}

impl fmt::Display for DeferredAllocationPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bases: Vec<&str> = self.bases.iter().map(String::as_str).collect();
        let pointers: Vec<&str> = self.pointer_variables.iter().map(String::as_str).collect();
        write!(f, "[{}] <- {{{}}}", bases.join(", "), pointers.join(", "))?;
        if let Some(size) = self.size {
            write!(f, " size {}", size)?;
        }
        if self.is_zeroing {
            write!(f, " zeroed")?;
        }
        Ok(())
    }
}
