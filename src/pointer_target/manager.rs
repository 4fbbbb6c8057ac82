//! Memory-model algorithms
//!
//! Stateless operations over snapshots: target enumeration for a base,
//! base-ordering inequalities, sharing constraints for variables that become
//! addressable, and the merge of two snapshots at a control-flow join.
//!
//! # Merge
//!
//! Two snapshots extended independently along two branches are combined so
//! that the result again satisfies the snapshot invariant (targets are the
//! cross product of materialized bases and tracked fields):
//!
//! 1. bases are united; a name bound to different concrete types on the two
//!    sides gets an anonymous union of both, and a placeholder type always
//!    loses against a concrete one
//! 2. fields and targets are united and the cross product is completed for
//!    bases whose field set changed
//! 3. deferred allocation pools are coalesced when they share aliases
//! 4. the last base is kept if both sides agree, taken from the side whose
//!    bases are a superset of the other's, or replaced by a fresh zero-sized
//!    placeholder ordered after both
//! 5. a base known to one side only is imported into the other side's formula
//!    by equating its plain variables with the memory at its address

use super::deferred::DeferredAllocationPool;
use super::set::{fake_base_type, is_fake_base_type, PointerTargetSet};
use super::target::{CompositeField, PointerTarget};
use crate::config::EncoderOptions;
use crate::shutdown::ShutdownNotifier;
use crate::smt::{FormulaManager, Term};
use crate::ssa::{SsaMap, SsaMapBuilder};
use crate::types::{CType, CompositeKind, CompositeType, Member, TypeService};
use crate::{Error, Result};
use imbl::{OrdMap, OrdSet, Vector};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Prefix of placeholder bases synthesized at merges
pub const FAKE_BASE_PREFIX: &str = "__fake_base_";

/// Prefix of anonymous unions synthesized for conflicting base types
pub const ANONYMOUS_UNION_PREFIX: &str = "__anon_union_";

/// Separator between an unaliased composite variable and its member
pub const FIELD_SEPARATOR: char = '$';

/// Result of merging two snapshots
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Merged snapshot
    pub pts: PointerTargetSet,
    /// SSA map after merging (reads performed by imports are registered)
    pub ssa: SsaMap,
    /// Import constraints to conjoin with the first branch
    pub import_first: Term,
    /// Import constraints to conjoin with the second branch
    pub import_second: Term,
    /// Constraints valid after the join
    pub merge_formula: Term,
}

/// Target map under construction
pub type TargetMap = OrdMap<String, Vector<PointerTarget>>;

/// Memory-model algorithms bound to one encoder configuration
#[derive(Debug)]
pub struct PointerTargetSetManager {
    types: Arc<dyn TypeService>,
    fm: Arc<FormulaManager>,
    options: Arc<EncoderOptions>,
    shutdown: ShutdownNotifier,
    fake_bases: AtomicU64,
}

impl PointerTargetSetManager {
    /// Creates a manager
    pub fn new(
        types: Arc<dyn TypeService>,
        fm: Arc<FormulaManager>,
        options: Arc<EncoderOptions>,
        shutdown: ShutdownNotifier,
    ) -> Self {
        Self {
            types,
            fm,
            options,
            shutdown,
            fake_bases: AtomicU64::new(0),
        }
    }

    /// Type service
    pub fn types(&self) -> &dyn TypeService {
        self.types.as_ref()
    }

    /// Term factory
    pub fn fm(&self) -> &FormulaManager {
        &self.fm
    }

    /// Options
    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Cancellation flag
    pub fn shutdown(&self) -> &ShutdownNotifier {
        &self.shutdown
    }

    /// Number of elements expanded for an array of the given static length
    pub fn array_length(&self, length: Option<u64>) -> u64 {
        length
            .unwrap_or(self.options.default_array_length)
            .min(self.options.max_array_length)
    }

    /// Bytes occupied by a base of type `ty`
    ///
    /// Arrays of unknown length count with the default length; incomplete
    /// types occupy nothing.
    pub fn base_size(&self, ty: &CType) -> Result<u64> {
        if is_fake_base_type(ty) {
            return Ok(ty.array_length().unwrap_or(0));
        }
        match self.types.simplify(ty) {
            CType::Array {
                element,
                length: None,
            } => self
                .array_length(None)
                .checked_mul(self.types.size_of(&element)?)
                .ok_or_else(|| {
                    Error::TypeError(format!("size of {} exceeds the address space", ty))
                }),
            other if !self.types.is_complete(&other) => Ok(0),
            other => self.types.size_of(&other),
        }
    }

    /// Enumerates the targets of `base` reachable through tracked fields and
    /// appends them to `targets`; returns the number of targets added
    #[allow(clippy::too_many_arguments)]
    pub fn add_targets(
        &self,
        base: &str,
        ty: &CType,
        container: Option<&CType>,
        proper_offset: u64,
        container_offset: u64,
        targets: &mut TargetMap,
        fields: &OrdSet<CompositeField>,
    ) -> Result<usize> {
        let ty = self.types.simplify(ty);
        match &ty {
            CType::Array { element, length } => {
                self.shutdown.check()?;
                let element_size = self.types.size_of(element)?;
                let mut added = 0;
                for i in 0..self.array_length(*length) {
                    added += self.add_targets(
                        base,
                        element,
                        Some(&ty),
                        i * element_size,
                        container_offset + proper_offset,
                        targets,
                        fields,
                    )?;
                }
                Ok(added)
            }
            CType::Composite(def) => {
                let mut added = 0;
                for (member, offset) in self.types.member_offsets(def)? {
                    if fields.contains(&CompositeField::of(&ty, &member.name)) {
                        added += self.add_targets(
                            base,
                            &member.ty,
                            Some(&ty),
                            offset,
                            container_offset + proper_offset,
                            targets,
                            fields,
                        )?;
                    }
                }
                Ok(added)
            }
            scalar if scalar.is_scalar() => {
                let target = PointerTarget::new(
                    base,
                    container.cloned(),
                    proper_offset,
                    container_offset,
                );
                targets
                    .entry(scalar.access_name())
                    .or_default()
                    .push_back(target);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    /// Targets of `base` that become reachable once `field` is tracked
    /// (`fields` must already contain it); returns the number added
    #[allow(clippy::too_many_arguments)]
    pub fn add_field_targets(
        &self,
        base: &str,
        ty: &CType,
        proper_offset: u64,
        container_offset: u64,
        targets: &mut TargetMap,
        fields: &OrdSet<CompositeField>,
        field: &CompositeField,
    ) -> Result<usize> {
        let ty = self.types.simplify(ty);
        match &ty {
            CType::Array { element, length } => {
                self.shutdown.check()?;
                let element_size = self.types.size_of(element)?;
                let mut added = 0;
                for i in 0..self.array_length(*length) {
                    added += self.add_field_targets(
                        base,
                        element,
                        i * element_size,
                        container_offset + proper_offset,
                        targets,
                        fields,
                        field,
                    )?;
                }
                Ok(added)
            }
            CType::Composite(def) => {
                let mut added = 0;
                for (member, offset) in self.types.member_offsets(def)? {
                    let key = CompositeField::of(&ty, &member.name);
                    if &key == field {
                        added += self.add_targets(
                            base,
                            &member.ty,
                            Some(&ty),
                            offset,
                            container_offset + proper_offset,
                            targets,
                            fields,
                        )?;
                    } else if fields.contains(&key) {
                        added += self.add_field_targets(
                            base,
                            &member.ty,
                            offset,
                            container_offset + proper_offset,
                            targets,
                            fields,
                            field,
                        )?;
                    }
                }
                Ok(added)
            }
            _ => Ok(0),
        }
    }

    /// Ordering constraint placing `new_base` after the last registered base:
    /// `new > 0` for the first base, `new >= last + size(last)` otherwise
    pub fn next_base_address_inequality(
        &self,
        new_base: &str,
        bases: &OrdMap<String, CType>,
        last_base: Option<&str>,
    ) -> Result<Term> {
        let new_address = self.fm.base_address(new_base);
        let last = last_base.and_then(|name| bases.get(name).map(|ty| (name, ty)));
        match last {
            None => Ok(Term::gt(new_address, Term::int(0))),
            Some((name, ty)) => {
                let size = self.base_size(ty)?;
                Ok(Term::ge(
                    new_address,
                    Term::add(self.fm.base_address(name), Term::int(i128::from(size))),
                ))
            }
        }
    }

    /// Constraints copying the current plain values of `variable` (and of its
    /// members `variable$field`) into memory at `address`
    pub fn sharing_constraints(
        &self,
        address: Term,
        variable: &str,
        ty: &CType,
        ssa: &mut SsaMapBuilder,
    ) -> Result<Term> {
        let mut parts = Vec::new();
        self.collect_sharing(address, variable, ty, ssa, &mut parts)?;
        Ok(Term::and(parts))
    }

    fn collect_sharing(
        &self,
        address: Term,
        variable: &str,
        ty: &CType,
        ssa: &mut SsaMapBuilder,
        parts: &mut Vec<Term>,
    ) -> Result<()> {
        let ty = self.types.simplify(ty);
        match &ty {
            CType::Composite(def) => {
                for (member, offset) in self.types.member_offsets(def)? {
                    let member_variable = format!("{}{}{}", variable, FIELD_SEPARATOR, member.name);
                    let member_address = Term::add(address.clone(), Term::int(i128::from(offset)));
                    self.collect_sharing(member_address, &member_variable, &member.ty, ssa, parts)?;
                }
            }
            scalar if scalar.is_scalar() => {
                if let Some(index) = ssa.peek_index(variable) {
                    let memory = self.fm.memory_name(scalar);
                    let memory_index = ssa.get_index(&memory, scalar);
                    parts.push(Term::eq(
                        self.fm.dereference(&memory, memory_index, address),
                        self.fm.variable(variable, index),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Recomputes the full target map of a snapshot's bases and fields
    pub fn compute_targets(
        &self,
        bases: &OrdMap<String, CType>,
        fields: &OrdSet<CompositeField>,
    ) -> Result<TargetMap> {
        let mut targets = TargetMap::new();
        for (name, ty) in bases.iter() {
            if !is_fake_base_type(ty) {
                self.add_targets(name, ty, None, 0, 0, &mut targets, fields)?;
            }
        }
        Ok(targets)
    }

    /// Returns true if `targets` is exactly the cross product of `bases` and `fields`
    pub fn targets_consistent(
        &self,
        bases: &OrdMap<String, CType>,
        fields: &OrdSet<CompositeField>,
        targets: &TargetMap,
    ) -> Result<bool> {
        let expected = self.compute_targets(bases, fields)?;
        Ok(as_sets(&expected) == as_sets(targets))
    }

    fn fresh_fake_base(&self) -> String {
        let k = self.fake_bases.fetch_add(1, Ordering::SeqCst);
        format!("{}{}", FAKE_BASE_PREFIX, k)
    }

    /// Merges two snapshots; `ssa` is the already merged SSA map of both branches
    pub fn merge(
        &self,
        first: &PointerTargetSet,
        second: &PointerTargetSet,
        ssa: &SsaMap,
    ) -> Result<MergeResult> {
        if first == second {
            return Ok(MergeResult {
                pts: first.clone(),
                ssa: ssa.clone(),
                import_first: Term::tt(),
                import_second: Term::tt(),
                merge_formula: Term::tt(),
            });
        }
        self.shutdown.check()?;

        let mut ssa = ssa.builder();

        // Bases
        let mut bases = first.bases.clone();
        let mut only_first = Vec::new();
        let mut only_second = Vec::new();
        let mut conflicts = Vec::new();
        let mut fields = first.fields.clone().union(second.fields.clone());
        for name in first.bases.keys() {
            if !second.bases.contains_key(name) {
                only_first.push(name.clone());
            }
        }
        for (name, ty2) in second.bases.iter() {
            self.shutdown.check()?;
            match first.bases.get(name) {
                None => {
                    only_second.push(name.clone());
                    bases.insert(name.clone(), ty2.clone());
                }
                Some(ty1) if ty1 == ty2 => {}
                Some(ty1) => {
                    let merged = match (is_fake_base_type(ty1), is_fake_base_type(ty2)) {
                        (true, false) => ty2.clone(),
                        (false, true) => ty1.clone(),
                        (true, true) => {
                            if self.base_size(ty1)? >= self.base_size(ty2)? {
                                ty1.clone()
                            } else {
                                ty2.clone()
                            }
                        }
                        (false, false) => {
                            let union = anonymous_union(name, ty1, ty2);
                            for member in ["__1", "__2"] {
                                fields.insert(CompositeField::of(&union, member));
                            }
                            debug!(base = %name, "conflicting base types {} and {} merged into {}", ty1, ty2, union);
                            union
                        }
                    };
                    bases.insert(name.clone(), merged);
                    conflicts.push(name.clone());
                }
            }
        }

        // Targets: union, then complete the cross product
        let mut regenerate: BTreeSet<String> = conflicts.iter().cloned().collect();
        regenerate.extend(only_first.iter().cloned());
        regenerate.extend(only_second.iter().cloned());
        if first.fields != second.fields {
            regenerate.extend(
                first
                    .bases
                    .keys()
                    .filter(|name| second.bases.contains_key(*name))
                    .cloned(),
            );
        }
        let conflicting: HashSet<&String> = conflicts.iter().collect();
        let mut targets = TargetMap::new();
        let mut seen: HashSet<(String, PointerTarget)> = HashSet::new();
        for side in [&first.targets, &second.targets] {
            for (type_name, list) in side.iter() {
                self.shutdown.check()?;
                for target in list.iter() {
                    if conflicting.contains(&target.base) {
                        continue;
                    }
                    if seen.insert((type_name.clone(), target.clone())) {
                        targets
                            .entry(type_name.clone())
                            .or_default()
                            .push_back(target.clone());
                    }
                }
            }
        }
        for name in &regenerate {
            self.shutdown.check()?;
            let Some(ty) = bases.get(name) else { continue };
            if is_fake_base_type(ty) {
                continue;
            }
            let mut fresh = TargetMap::new();
            self.add_targets(name, ty, None, 0, 0, &mut fresh, &fields)?;
            for (type_name, list) in fresh.into_iter() {
                for target in list {
                    if seen.insert((type_name.clone(), target.clone())) {
                        targets
                            .entry(type_name.clone())
                            .or_default()
                            .push_back(target);
                    }
                }
            }
        }

        // Deferred allocations
        let deferred_allocations =
            merge_deferred(&first.deferred_allocations, &second.deferred_allocations);

        // Last base
        let mut merge_parts = Vec::new();
        let last_base = if first.last_base == second.last_base {
            first.last_base.clone()
        } else if second.bases.keys().all(|name| first.bases.contains_key(name)) {
            first.last_base.clone()
        } else if first.bases.keys().all(|name| second.bases.contains_key(name)) {
            second.last_base.clone()
        } else {
            let fake = self.fresh_fake_base();
            for side in [first, second] {
                merge_parts.push(self.next_base_address_inequality(
                    &fake,
                    &side.bases,
                    side.last_base(),
                )?);
            }
            debug!(base = %fake, "divergent allocation histories, ordering after both last bases");
            bases.insert(fake.clone(), fake_base_type(0));
            Some(fake)
        };

        // Imports
        let mut import_first = Vec::new();
        let mut import_second = Vec::new();
        for (names, imports) in [(&only_first, &mut import_second), (&only_second, &mut import_first)] {
            for name in names {
                self.shutdown.check()?;
                let Some(ty) = bases.get(name) else { continue };
                if is_fake_base_type(ty) {
                    continue;
                }
                let import = self.sharing_constraints(
                    self.fm.base_address(name),
                    name,
                    ty,
                    &mut ssa,
                )?;
                if !import.is_true() {
                    trace!(base = %name, "importing plain variable into memory");
                    imports.push(import);
                }
            }
        }

        let pts = PointerTargetSet {
            bases,
            last_base,
            fields,
            targets,
            deferred_allocations,
        };
        debug_assert!(
            matches!(
                self.targets_consistent(&pts.bases, &pts.fields, &pts.targets),
                Ok(true) | Err(Error::Cancelled { .. })
            ),
            "merged targets are not the cross product of bases and fields"
        );

        Ok(MergeResult {
            pts,
            ssa: ssa.build(),
            import_first: Term::and(import_first),
            import_second: Term::and(import_second),
            merge_formula: Term::and(merge_parts),
        })
    }
}

fn as_sets(targets: &TargetMap) -> BTreeSet<(String, PointerTarget)> {
    targets
        .iter()
        .flat_map(|(ty, list)| list.iter().map(move |t| (ty.clone(), t.clone())))
        .collect()
}

/// Union of the two conflicting types of `base`, named after the base and
/// both member types
fn anonymous_union(base: &str, first: &CType, second: &CType) -> CType {
    CType::composite(CompositeType::new(
        CompositeKind::Union,
        format!("{}{}<{}, {}>", ANONYMOUS_UNION_PREFIX, base, first, second),
        vec![
            Member::new("__1", first.clone()),
            Member::new("__2", second.clone()),
        ],
    ))
}

type PoolMap = OrdMap<String, Arc<DeferredAllocationPool>>;

/// Unites the pools of both sides, coalescing pools that share an alias or a base
fn merge_deferred(first: &PoolMap, second: &PoolMap) -> PoolMap {
    if first == second {
        return first.clone();
    }
    let mut components: Vec<DeferredAllocationPool> = Vec::new();
    for pool in first.values().chain(second.values()) {
        let mut merged = (**pool).clone();
        let mut i = 0;
        while i < components.len() {
            if components[i].overlaps(&merged) || components[i] == merged {
                merged = components.swap_remove(i).merge_with(&merged);
                i = 0;
            } else {
                i += 1;
            }
        }
        components.push(merged);
    }

    let mut result = PoolMap::new();
    for pool in components {
        let pool = Arc::new(pool);
        for pointer in pool.pointer_variables().iter() {
            result.insert(pointer.clone(), pool.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeTable;

    fn manager() -> PointerTargetSetManager {
        PointerTargetSetManager::new(
            Arc::new(TypeTable::lp64()),
            Arc::new(FormulaManager::default()),
            Arc::new(EncoderOptions::default()),
            ShutdownNotifier::new(),
        )
    }

    #[test]
    fn test_array_targets_expand_elements() {
        let mgr = manager();
        let mut targets = TargetMap::new();
        let added = mgr
            .add_targets(
                "a",
                &CType::array_of(CType::int(), 3),
                None,
                0,
                0,
                &mut targets,
                &OrdSet::new(),
            )
            .unwrap();
        assert_eq!(added, 3);
        let offsets: Vec<u64> = targets["int"].iter().map(|t| t.offset()).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[test]
    fn test_untracked_fields_have_no_targets() {
        let mut table = TypeTable::lp64();
        let s = table.define(CompositeType::new(
            CompositeKind::Struct,
            "s",
            vec![Member::new("a", CType::int()), Member::new("b", CType::long())],
        ));
        let mgr = PointerTargetSetManager::new(
            Arc::new(table),
            Arc::new(FormulaManager::default()),
            Arc::new(EncoderOptions::default()),
            ShutdownNotifier::new(),
        );
        let mut targets = TargetMap::new();
        let mut fields = OrdSet::new();
        assert_eq!(
            mgr.add_targets("x", &s, None, 0, 0, &mut targets, &fields)
                .unwrap(),
            0
        );

        let field = CompositeField::new("struct s", "b");
        fields.insert(field.clone());
        let added = mgr
            .add_field_targets("x", &s, 0, 0, &mut targets, &fields, &field)
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(targets["long"][0].offset(), 8);
        assert!(!targets.contains_key("int"));
    }

    #[test]
    fn test_first_base_is_positive() {
        let mgr = manager();
        let ineq = mgr
            .next_base_address_inequality("a", &OrdMap::new(), None)
            .unwrap();
        assert_eq!(ineq.to_string(), "(< 0 __ADDRESS_OF_a)");

        let mut bases = OrdMap::new();
        bases.insert("a".to_string(), CType::array_of(CType::int(), 3));
        let ineq = mgr
            .next_base_address_inequality("b", &bases, Some("a"))
            .unwrap();
        assert_eq!(
            ineq.to_string(),
            "(<= (+ __ADDRESS_OF_a 12) __ADDRESS_OF_b)"
        );
    }

    #[test]
    fn test_cancelled_enumeration() {
        let mgr = manager();
        mgr.shutdown().request_shutdown("stop");
        let mut targets = TargetMap::new();
        let err = mgr
            .add_targets(
                "a",
                &CType::array_of(CType::int(), 3),
                None,
                0,
                0,
                &mut targets,
                &OrdSet::new(),
            )
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_pools_coalesce_through_shared_aliases() {
        let mut first = PoolMap::new();
        first.insert(
            "p".to_string(),
            Arc::new(DeferredAllocationPool::new("p", "f::__alloc#1", Some(4), false)),
        );
        let mut second = PoolMap::new();
        let shared = Arc::new(
            DeferredAllocationPool::new("p", "f::__alloc#2", Some(4), false)
                .add_pointer_variable("q"),
        );
        second.insert("p".to_string(), shared.clone());
        second.insert("q".to_string(), shared);

        let merged = merge_deferred(&first, &second);
        assert_eq!(merged.len(), 2);
        assert!(Arc::ptr_eq(&merged["p"], &merged["q"]));
        assert_eq!(merged["p"].bases().len(), 2);
        assert_eq!(merged["p"].size(), Some(4));
    }
}
