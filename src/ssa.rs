//! SSA index service
//!
//! Every plain variable and every memory array carries a version counter.
//! Writes take a fresh index, reads use the current one. An [`SsaMap`] is a
//! persistent snapshot travelling with a path formula; an [`SsaMapBuilder`] is
//! the mutable view used while one edge is encoded.

use crate::smt::{FormulaManager, Term};
use crate::types::CType;
use imbl::OrdMap;
use std::fmt;

/// Index of a variable before its first write
pub const INITIAL_INDEX: u32 = 1;

/// Persistent map from names to `(index, type)`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SsaMap {
    entries: OrdMap<String, (u32, CType)>,
}

impl SsaMap {
    /// Empty map
    pub fn empty() -> Self {
        Self::default()
    }

    /// Current index of `name`
    pub fn get_index(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|(index, _)| *index)
    }

    /// Type recorded for `name`
    pub fn get_type(&self, name: &str) -> Option<&CType> {
        self.entries.get(name).map(|(_, ty)| ty)
    }

    /// Returns true if `name` has been versioned
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All versioned names in order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Number of versioned names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is versioned
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts a builder on top of this map
    pub fn builder(&self) -> SsaMapBuilder {
        SsaMapBuilder {
            entries: self.entries.clone(),
        }
    }

    /// Merges two maps at a join.
    ///
    /// The result holds the larger index of every name. For a name versioned on
    /// both sides with different indices, the side with the smaller index gets
    /// an equality lifting its instance to the merged one; `void`-typed
    /// counters are only advanced. The two returned
    /// formulas belong to the first and the second branch respectively.
    pub fn merge(first: &SsaMap, second: &SsaMap, fm: &FormulaManager) -> (SsaMap, Term, Term) {
        Self::merge_with(first, second, fm, |name, to, from| {
            fm.memory_equality(name, to, from)
        })
    }

    /// [`merge`](SsaMap::merge) with memory instances equated by `lift_memory`
    pub fn merge_with(
        first: &SsaMap,
        second: &SsaMap,
        fm: &FormulaManager,
        lift_memory: impl Fn(&str, u32, u32) -> Term,
    ) -> (SsaMap, Term, Term) {
        let lift = |name: &str, to: u32, from: u32| {
            if name.starts_with('*') {
                lift_memory(name, to, from)
            } else {
                Term::eq(fm.variable(name, to), fm.variable(name, from))
            }
        };
        let mut merged = first.entries.clone();
        let mut first_eqs = Vec::new();
        let mut second_eqs = Vec::new();

        for (name, (index2, ty2)) in second.entries.iter() {
            match first.entries.get(name) {
                None => {
                    merged.insert(name.clone(), (*index2, ty2.clone()));
                }
                Some((index1, ty1)) if ty1.is_void() => {
                    // Counters (allocation sites) carry no value to equate
                    merged.insert(name.clone(), (*index1.max(index2), ty1.clone()));
                }
                Some((index1, ty1)) => {
                    if index1 < index2 {
                        first_eqs.push(lift(name, *index2, *index1));
                        merged.insert(name.clone(), (*index2, ty1.clone()));
                    } else if index2 < index1 {
                        second_eqs.push(lift(name, *index1, *index2));
                    }
                }
            }
        }

        (
            SsaMap { entries: merged },
            Term::and(first_eqs),
            Term::and(second_eqs),
        )
    }
}

impl fmt::Display for SsaMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, (index, _))) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}@{}", name, index)?;
        }
        write!(f, "}}")
    }
}

/// Mutable SSA view for one edge
#[derive(Debug, Clone)]
pub struct SsaMapBuilder {
    entries: OrdMap<String, (u32, CType)>,
}

impl SsaMapBuilder {
    /// Current index of `name`; an unseen name is registered with the initial index
    pub fn get_index(&mut self, name: &str, ty: &CType) -> u32 {
        match self.entries.get(name) {
            Some((index, _)) => *index,
            None => {
                self.entries
                    .insert(name.to_string(), (INITIAL_INDEX, ty.clone()));
                INITIAL_INDEX
            }
        }
    }

    /// Current index without registering
    pub fn peek_index(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|(index, _)| *index)
    }

    /// Index the next write to `name` will use
    pub fn get_fresh_index(&self, name: &str) -> u32 {
        self.peek_index(name)
            .map(|index| index + 1)
            .unwrap_or(INITIAL_INDEX)
    }

    /// Advances `name` to a fresh index and returns it
    pub fn make_fresh_index(&mut self, name: &str, ty: &CType) -> u32 {
        let index = self.get_fresh_index(name);
        self.set_index(name, ty, index);
        index
    }

    /// Sets the index of `name`; indices never decrease
    pub fn set_index(&mut self, name: &str, ty: &CType, index: u32) {
        if let Some((current, _)) = self.entries.get(name) {
            debug_assert!(
                index >= *current,
                "SSA index of {} would decrease from {} to {}",
                name,
                current,
                index
            );
        }
        self.entries.insert(name.to_string(), (index, ty.clone()));
    }

    /// Returns true if `name` has been versioned
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Freezes the builder
    pub fn build(self) -> SsaMap {
        SsaMap {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_register_initial_index() {
        let mut ssa = SsaMap::empty().builder();
        assert_eq!(ssa.get_index("x", &CType::int()), 1);
        assert!(ssa.contains("x"));
        assert_eq!(ssa.get_fresh_index("x"), 2);
        assert_eq!(ssa.make_fresh_index("x", &CType::int()), 2);
        assert_eq!(ssa.get_fresh_index("y"), 1);
        let map = ssa.build();
        assert_eq!(map.get_index("x"), Some(2));
        assert_eq!(map.to_string(), "{x@2}");
    }

    #[test]
    fn test_merge_lifts_lagging_side() {
        let fm = FormulaManager::default();
        let mut left = SsaMap::empty().builder();
        left.set_index("x", &CType::int(), 3);
        left.set_index("*int", &CType::int(), 1);
        let mut right = SsaMap::empty().builder();
        right.set_index("x", &CType::int(), 1);
        right.set_index("*int", &CType::int(), 2);
        right.set_index("only_right", &CType::int(), 4);

        let (merged, left_eqs, right_eqs) =
            SsaMap::merge(&left.build(), &right.build(), &fm);

        assert_eq!(merged.get_index("x"), Some(3));
        assert_eq!(merged.get_index("*int"), Some(2));
        assert_eq!(merged.get_index("only_right"), Some(4));
        assert_eq!(left_eqs.to_string(), "(= *int@2 *int@1)");
        assert_eq!(right_eqs.to_string(), "(= x@3 x@1)");
    }

    #[test]
    fn test_merge_with_itself_is_trivial() {
        let fm = FormulaManager::default();
        let mut ssa = SsaMap::empty().builder();
        ssa.set_index("x", &CType::int(), 2);
        let map = ssa.build();
        let (merged, a, b) = SsaMap::merge(&map, &map, &fm);
        assert_eq!(merged, map);
        assert!(a.is_true() && b.is_true());
    }

    #[test]
    fn test_merge_advances_counters_without_equalities() {
        let fm = FormulaManager::default();
        let mut left = SsaMap::empty().builder();
        left.set_index("main::__alloc", &CType::Void, 2);
        let mut right = SsaMap::empty().builder();
        right.set_index("main::__alloc", &CType::Void, 1);
        let (merged, a, b) = SsaMap::merge(&left.build(), &right.build(), &fm);
        assert_eq!(merged.get_index("main::__alloc"), Some(2));
        assert!(a.is_true() && b.is_true());
    }
}
