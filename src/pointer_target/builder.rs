//! Mutable staging view over one snapshot
//!
//! A [`PointerTargetSetBuilder`] is owned by the edge being encoded. It starts
//! from the predecessor snapshot, grows it on demand and is frozen with
//! [`PointerTargetSetBuilder::build`].

use super::deferred::DeferredAllocationPool;
use super::manager::{PointerTargetSetManager, TargetMap};
use super::set::{fake_base_type, is_fake_base_type, PointerTargetSet};
use super::target::{CompositeField, PointerTarget};
use crate::ssa::SsaMapBuilder;
use crate::smt::Term;
use crate::types::CType;
use crate::{Error, Result};
use imbl::{OrdMap, OrdSet, Vector};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Staging view of a [`PointerTargetSet`]
#[derive(Debug, Clone)]
pub struct PointerTargetSetBuilder<'a> {
    manager: &'a PointerTargetSetManager,
    bases: OrdMap<String, CType>,
    last_base: Option<String>,
    fields: OrdSet<CompositeField>,
    targets: TargetMap,
    deferred_allocations: OrdMap<String, Arc<DeferredAllocationPool>>,
}

impl<'a> PointerTargetSetBuilder<'a> {
    /// Starts a builder on top of `pts`
    pub fn new(pts: &PointerTargetSet, manager: &'a PointerTargetSetManager) -> Self {
        Self {
            manager,
            bases: pts.bases.clone(),
            last_base: pts.last_base.clone(),
            fields: pts.fields.clone(),
            targets: pts.targets.clone(),
            deferred_allocations: pts.deferred_allocations.clone(),
        }
    }

    /// Algorithms this builder delegates to
    pub fn manager(&self) -> &'a PointerTargetSetManager {
        self.manager
    }

    // Read queries

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

    /// Names of all bases
    pub fn base_names(&self) -> impl Iterator<Item = &String> {
        self.bases.keys()
    }

    /// Most recently registered base
    pub fn last_base(&self) -> Option<&str> {
        self.last_base.as_deref()
    }

    /// Returns true if `field` is tracked
    pub fn tracks_field(&self, field: &CompositeField) -> bool {
        self.fields.contains(field)
    }

    /// Targets of values of the type named `type_name`
    pub fn targets(&self, type_name: &str) -> Vector<PointerTarget> {
        self.targets.get(type_name).cloned().unwrap_or_default()
    }

    /// Total number of targets
    pub fn target_count(&self) -> usize {
        self.targets.values().map(Vector::len).sum()
    }

    // Bases

    /// Registers `name` as a base of type `ty` and materializes its targets.
    ///
    /// Returns the ordering constraint for the new base address (`true` if the
    /// base was already known). A prepared base is shared instead.
    pub fn add_base(&mut self, name: &str, ty: &CType) -> Result<Term> {
        if self.is_actual_base(name) {
            return Ok(Term::tt());
        }
        if self.is_prepared_base(name) {
            return self.share_base(name, ty);
        }
        let inequality = self.manager.next_base_address_inequality(
            name,
            &self.bases,
            self.last_base.as_deref(),
        )?;
        self.prefill_fields(ty)?;
        self.bases.insert(name.to_string(), ty.clone());
        self.last_base = Some(name.to_string());
        self.manager.add_targets(
            name,
            ty,
            None,
            0,
            0,
            &mut self.targets,
            &self.fields,
        )?;
        trace!(base = %name, ty = %ty, "added base");
        Ok(inequality)
    }

    /// Orders `name` after the last base without materializing targets.
    ///
    /// The base holds a placeholder of the right size until [`share_base`]
    /// installs its real type.
    ///
    /// [`share_base`]: PointerTargetSetBuilder::share_base
    pub fn prepare_base(&mut self, name: &str, ty: &CType) -> Result<Term> {
        if self.is_base(name) {
            return Ok(Term::tt());
        }
        let inequality = self.manager.next_base_address_inequality(
            name,
            &self.bases,
            self.last_base.as_deref(),
        )?;
        let size = self.manager.base_size(ty)?;
        self.bases.insert(name.to_string(), fake_base_type(size));
        self.last_base = Some(name.to_string());
        trace!(base = %name, size, "prepared base");
        Ok(inequality)
    }

    /// Installs the real type of a prepared base and materializes its targets.
    ///
    /// A name that was never prepared is registered as a new base and its
    /// ordering constraint returned; otherwise the result is `true`.
    pub fn share_base(&mut self, name: &str, ty: &CType) -> Result<Term> {
        if !self.is_base(name) {
            return self.add_base(name, ty);
        }
        debug_assert!(
            self.is_prepared_base(name),
            "base {} is shared twice",
            name
        );
        self.prefill_fields(ty)?;
        self.bases.insert(name.to_string(), ty.clone());
        self.manager.add_targets(
            name,
            ty,
            None,
            0,
            0,
            &mut self.targets,
            &self.fields,
        )?;
        trace!(base = %name, ty = %ty, "shared base");
        Ok(Term::tt())
    }

    fn prefill_fields(&mut self, ty: &CType) -> Result<()> {
        let threshold = self.manager.options().max_prefilled_allocation_size;
        if threshold == 0 || !self.manager.types().is_complete(ty) {
            return Ok(());
        }
        if self.manager.types().size_of(ty)? <= threshold {
            self.add_all_fields(ty)?;
        }
        Ok(())
    }

    // Fields

    /// Starts tracking `field` and materializes its targets in every existing
    /// base. Returns true if a target was added; otherwise the field is not
    /// kept.
    pub fn add_field(&mut self, field: &CompositeField) -> Result<bool> {
        if self.fields.contains(field) {
            return Ok(true);
        }
        let saved_fields = self.fields.clone();
        let saved_targets = self.targets.clone();
        self.fields.insert(field.clone());
        let added = match self.add_field_to_bases(field) {
            Ok(added) => added,
            Err(e) => {
                self.fields = saved_fields;
                self.targets = saved_targets;
                return Err(e);
            }
        };
        if added == 0 {
            self.fields = saved_fields;
            self.targets = saved_targets;
            return Ok(false);
        }
        trace!(field = %field, added, "tracking field");
        Ok(true)
    }

    fn add_field_to_bases(&mut self, field: &CompositeField) -> Result<usize> {
        let mut added = 0;
        for (name, ty) in self.bases.iter() {
            if is_fake_base_type(ty) {
                continue;
            }
            added += self.manager.add_field_targets(
                name,
                ty,
                0,
                0,
                &mut self.targets,
                &self.fields,
                field,
            )?;
        }
        Ok(added)
    }

    /// Starts tracking a batch of fields.
    ///
    /// A field whose member type is a composite links to the requested fields
    /// of that composite; every connected group of requests (for `o.i.f`, the
    /// fields `outer.i` and `inner.f`) is added as one transaction and kept
    /// only if it added a target. Returns the number of fields kept.
    pub fn add_essential_fields(&mut self, requests: &[(CType, String)]) -> Result<usize> {
        let mut requested: BTreeMap<CompositeField, Option<String>> = BTreeMap::new();
        for (owner, member) in requests {
            let owner = self.manager.types().simplify(owner);
            let Some(def) = self.manager.types().composite_of(&owner) else {
                continue;
            };
            let Some(declared) = def.member(member) else {
                continue;
            };
            let member_type = self.manager.types().simplify(&declared.ty);
            let inner_composite = innermost_composite_name(&member_type);
            requested.insert(CompositeField::of(&owner, member), inner_composite);
        }

        // Connected groups of requests
        let keys: Vec<CompositeField> = requested.keys().cloned().collect();
        let mut group_of: Vec<usize> = (0..keys.len()).collect();
        fn find(group_of: &mut [usize], i: usize) -> usize {
            let mut root = i;
            while group_of[root] != root {
                root = group_of[root];
            }
            group_of[i] = root;
            root
        }
        for (i, key) in keys.iter().enumerate() {
            if let Some(Some(inner)) = requested.get(key) {
                for (j, other) in keys.iter().enumerate() {
                    if &other.composite == inner {
                        let (a, b) = (find(&mut group_of, i), find(&mut group_of, j));
                        group_of[a] = b;
                    }
                }
            }
        }
        let mut groups: BTreeMap<usize, Vec<CompositeField>> = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            let root = find(&mut group_of, i);
            groups.entry(root).or_default().push(key.clone());
        }

        let mut kept = 0;
        for group in groups.into_values() {
            if group.len() == 1 {
                if self.add_field(&group[0])? {
                    kept += 1;
                }
                continue;
            }
            let saved_fields = self.fields.clone();
            let saved_targets = self.targets.clone();
            let mut added = 0;
            let mut new_fields = 0;
            for field in &group {
                if self.fields.contains(field) {
                    continue;
                }
                self.fields.insert(field.clone());
                new_fields += 1;
                match self.add_field_to_bases(field) {
                    Ok(n) => added += n,
                    Err(e) => {
                        self.fields = saved_fields;
                        self.targets = saved_targets;
                        return Err(e);
                    }
                }
            }
            if added == 0 {
                self.fields = saved_fields;
                self.targets = saved_targets;
            } else {
                debug!(fields = group.len(), added, "tracking field chain");
                kept += new_fields;
            }
        }
        Ok(kept)
    }

    /// Tracks every field of `ty`, recursively through members and array elements
    pub fn add_all_fields(&mut self, ty: &CType) -> Result<()> {
        let mut visited = BTreeSet::new();
        self.add_all_fields_rec(ty, &mut visited)
    }

    fn add_all_fields_rec(&mut self, ty: &CType, visited: &mut BTreeSet<String>) -> Result<()> {
        let ty = self.manager.types().simplify(ty);
        match &ty {
            CType::Array { element, .. } => self.add_all_fields_rec(element, visited),
            CType::Composite(def) => {
                if !visited.insert(ty.access_name()) {
                    return Ok(());
                }
                for member in &def.members {
                    let field = CompositeField::of(&ty, &member.name);
                    if !self.fields.contains(&field) {
                        self.fields.insert(field.clone());
                        self.add_field_to_bases(&field)?;
                    }
                    self.add_all_fields_rec(&member.ty, visited)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // Deferred allocations

    /// Parks the allocation `base` under the pointer variable `pointer`
    pub fn add_deferred_allocation(
        &mut self,
        pointer: &str,
        base: &str,
        size: Option<u64>,
        is_zeroing: bool,
    ) {
        self.remove_pointer(pointer);
        let pool = Arc::new(DeferredAllocationPool::new(pointer, base, size, is_zeroing));
        self.deferred_allocations.insert(pointer.to_string(), pool);
    }

    /// Makes `alias` point to the same deferred allocation as `pointer`
    pub fn add_pointer_alias(&mut self, pointer: &str, alias: &str) {
        if pointer == alias {
            return;
        }
        let Some(pool) = self.deferred_allocations.get(pointer).cloned() else {
            return;
        };
        self.remove_pointer(alias);
        let pool = Arc::new(pool.add_pointer_variable(alias));
        self.replace_pool(&pool);
    }

    /// Drops `pointer` from its pool; returns the pool if `pointer` was its
    /// last alias
    pub fn remove_pointer(&mut self, pointer: &str) -> Option<Arc<DeferredAllocationPool>> {
        let pool = self.deferred_allocations.remove(pointer)?;
        let remaining = Arc::new(pool.remove_pointer_variable(pointer));
        if remaining.is_orphaned() {
            Some(pool)
        } else {
            self.replace_pool(&remaining);
            None
        }
    }

    /// Drops a whole pool with all its aliases
    pub fn remove_pool(&mut self, pool: &DeferredAllocationPool) {
        for pointer in pool.pointer_variables().iter() {
            self.deferred_allocations.remove(pointer);
        }
    }

    /// Pool of the deferred allocation `pointer` refers to
    pub fn deferred_allocation(&self, pointer: &str) -> Option<Arc<DeferredAllocationPool>> {
        self.deferred_allocations.get(pointer).cloned()
    }

    /// Returns true if `pointer` refers to a deferred allocation
    pub fn is_deferred_pointer(&self, pointer: &str) -> bool {
        self.deferred_allocations.contains_key(pointer)
    }

    /// Pointer variables referring to deferred allocations
    pub fn deferred_pointers(&self) -> Vec<String> {
        self.deferred_allocations.keys().cloned().collect()
    }

    fn replace_pool(&mut self, pool: &Arc<DeferredAllocationPool>) {
        for pointer in pool.pointer_variables().iter() {
            self.deferred_allocations
                .insert(pointer.clone(), pool.clone());
        }
    }

    // Finalization

    /// Freezes the builder into a snapshot
    ///
    /// # Panics
    ///
    /// In debug builds, if the targets are not exactly the cross product of the
    /// materialized bases and the tracked fields.
    pub fn build(self) -> PointerTargetSet {
        debug_assert!(
            matches!(
                self.manager
                    .targets_consistent(&self.bases, &self.fields, &self.targets),
                Ok(true) | Err(Error::Cancelled { .. })
            ),
            "targets are not the cross product of bases and fields"
        );
        if self.bases.is_empty() && self.fields.is_empty() && self.deferred_allocations.is_empty()
        {
            return PointerTargetSet::empty();
        }
        PointerTargetSet {
            bases: self.bases,
            last_base: self.last_base,
            fields: self.fields,
            targets: self.targets,
            deferred_allocations: self.deferred_allocations,
        }
    }

    /// Sharing constraints for variable `name` of type `ty` placed at its base address
    pub fn sharing_constraints(
        &self,
        name: &str,
        ty: &CType,
        ssa: &mut SsaMapBuilder,
    ) -> Result<Term> {
        self.manager
            .sharing_constraints(self.manager.fm().base_address(name), name, ty, ssa)
    }
}

fn innermost_composite_name(ty: &CType) -> Option<String> {
    match ty {
        CType::Array { element, .. } => innermost_composite_name(element),
        CType::Composite(_) | CType::Elaborated { .. } => Some(ty.access_name()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderOptions;
    use crate::shutdown::ShutdownNotifier;
    use crate::smt::FormulaManager;
    use crate::types::{CompositeKind, CompositeType, Member, TypeTable};

    struct Fixture {
        manager: PointerTargetSetManager,
        inner: CType,
        outer: CType,
    }

    fn fixture(options: EncoderOptions) -> Fixture {
        let mut table = TypeTable::lp64();
        let inner = table.define(CompositeType::new(
            CompositeKind::Struct,
            "inner",
            vec![Member::new("f", CType::int()), Member::new("g", CType::char())],
        ));
        let outer = table.define(CompositeType::new(
            CompositeKind::Struct,
            "outer",
            vec![Member::new("x", CType::long()), Member::new("in", inner.clone())],
        ));
        let manager = PointerTargetSetManager::new(
            Arc::new(table),
            Arc::new(FormulaManager::default()),
            Arc::new(options),
            ShutdownNotifier::new(),
        );
        Fixture {
            manager,
            inner,
            outer,
        }
    }

    #[test]
    fn test_field_rolled_back_without_targets() {
        let fx = fixture(EncoderOptions::default());
        let mut builder = PointerTargetSetBuilder::new(&PointerTargetSet::empty(), &fx.manager);
        let field = CompositeField::new("struct inner", "f");
        assert!(!builder.add_field(&field).unwrap());
        assert!(!builder.tracks_field(&field));

        builder.add_base("s", &fx.inner).unwrap();
        assert!(builder.add_field(&field).unwrap());
        assert!(builder.tracks_field(&field));
        assert_eq!(builder.targets("int").len(), 1);
    }

    #[test]
    fn test_nested_field_chain_is_kept() {
        let fx = fixture(EncoderOptions::default());
        let mut builder = PointerTargetSetBuilder::new(&PointerTargetSet::empty(), &fx.manager);
        builder.add_base("o", &fx.outer).unwrap();

        // Adding `inner.f` alone reaches nothing while `outer.in` is untracked
        assert!(!builder
            .add_field(&CompositeField::new("struct inner", "f"))
            .unwrap());

        let kept = builder
            .add_essential_fields(&[
                (fx.outer.clone(), "in".to_string()),
                (fx.inner.clone(), "f".to_string()),
            ])
            .unwrap();
        assert_eq!(kept, 2);
        let targets = builder.targets("int");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].offset(), 8);
        assert!(builder.tracks_field(&CompositeField::new("struct outer", "in")));
    }

    #[test]
    fn test_prepared_base_has_no_targets_until_shared() {
        let fx = fixture(EncoderOptions::default());
        let mut builder = PointerTargetSetBuilder::new(&PointerTargetSet::empty(), &fx.manager);
        let first = builder.add_base("a", &CType::array_of(CType::int(), 2)).unwrap();
        assert_eq!(first.to_string(), "(< 0 __ADDRESS_OF_a)");

        let second = builder.prepare_base("x", &CType::int()).unwrap();
        assert_eq!(
            second.to_string(),
            "(<= (+ __ADDRESS_OF_a 8) __ADDRESS_OF_x)"
        );
        assert!(builder.is_prepared_base("x"));
        assert_eq!(builder.targets("int").len(), 2);

        builder.share_base("x", &CType::int()).unwrap();
        assert!(builder.is_actual_base("x"));
        assert_eq!(builder.targets("int").len(), 3);
        assert_eq!(builder.last_base(), Some("x"));
    }

    #[test]
    fn test_eager_prefill_tracks_all_fields() {
        let fx = fixture(EncoderOptions {
            max_prefilled_allocation_size: 64,
            ..EncoderOptions::default()
        });
        let mut builder = PointerTargetSetBuilder::new(&PointerTargetSet::empty(), &fx.manager);
        builder.add_base("o", &fx.outer).unwrap();
        assert_eq!(builder.targets("long").len(), 1);
        assert_eq!(builder.targets("int").len(), 1);
        assert_eq!(builder.targets("char").len(), 1);
        let pts = builder.build();
        assert_eq!(pts.fields().len(), 4);
    }

    #[test]
    fn test_deferred_alias_bookkeeping() {
        let fx = fixture(EncoderOptions::default());
        let mut builder = PointerTargetSetBuilder::new(&PointerTargetSet::empty(), &fx.manager);
        builder.add_deferred_allocation("p", "main::__alloc#1", Some(8), false);
        builder.add_pointer_alias("p", "q");
        assert!(Arc::ptr_eq(
            &builder.deferred_allocation("p").unwrap(),
            &builder.deferred_allocation("q").unwrap()
        ));

        assert!(builder.remove_pointer("p").is_none());
        assert_eq!(
            builder
                .deferred_allocation("q")
                .unwrap()
                .pointer_variables()
                .len(),
            1
        );
        let orphaned = builder.remove_pointer("q").unwrap();
        assert!(orphaned.bases().contains("main::__alloc#1"));
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_empty_builder_yields_canonical_empty() {
        let fx = fixture(EncoderOptions::default());
        let builder = PointerTargetSetBuilder::new(&PointerTargetSet::empty(), &fx.manager);
        assert_eq!(builder.build(), PointerTargetSet::empty());
    }
}
