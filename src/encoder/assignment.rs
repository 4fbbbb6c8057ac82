//! Assignment encoding
//!
//! One assignment becomes one constraint. Aggregates are assigned member by
//! member and element by element down to scalars; a scalar write either
//! rebinds a plain variable to a fresh SSA index or becomes a pending store
//! into the memory array of its type.
//!
//! # Memory writes
//!
//! All stores of a statement into one memory array are collected and committed
//! together when the statement ends:
//!
//! - array encoding: `*T@new = (store (store *T@old a1 v1) a2 v2)`
//! - function encoding: `*T@new(ai) = vi` for every write, plus retention
//!   constraints `*T@new(t) = *T@old(t)` for every known target `t` of `T`,
//!   guarded by `t != ai` when a write pattern matches `t`
//!
//! Either way every updated array gets exactly one fresh index per statement.

use super::ast::{CExpression, Declaration, Initializer};
use super::context::{EdgeEncoder, PendingWrites};
use super::evaluator::convert;
use super::expression::{Expression, Location};
use crate::pointer_target::{CompositeField, PointerTargetPattern};
use crate::smt::Term;
use crate::types::{CType, SimpleKind};
use crate::{Error, Result};
use tracing::{trace, warn};

/// Bound variable of quantified constraints
const QUANTIFIED_INDEX: &str = "__i";

impl<'a> EdgeEncoder<'a> {
    /// Encodes `lhs = rhs` where `lhs` is already evaluated to a location
    ///
    /// Returns the constraint for plain-variable writes; memory writes are kept
    /// pending until the statement is committed.
    pub fn assign(
        &mut self,
        lhs_type: &CType,
        rhs_type: &CType,
        lhs: &Location,
        rhs: &Expression,
        pattern: &PointerTargetPattern,
        is_initializer: bool,
    ) -> Result<Term> {
        let lhs_type = self.types().simplify(lhs_type);
        let rhs_type = self.types().simplify(rhs_type);
        match &lhs_type {
            CType::Array { element, length } => self.assign_array(
                &lhs_type,
                element,
                *length,
                &rhs_type,
                lhs,
                rhs,
                pattern,
                is_initializer,
            ),
            CType::Composite(_) => {
                self.assign_composite(&lhs_type, &rhs_type, lhs, rhs, pattern, is_initializer)
            }
            scalar if scalar.is_scalar() => {
                self.assign_scalar(scalar, &rhs_type, lhs, rhs, pattern)
            }
            other => Err(Error::unrecognized(
                format!("assignment to a location of type {}", other),
                lhs,
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assign_array(
        &mut self,
        lhs_type: &CType,
        element: &CType,
        length: Option<u64>,
        rhs_type: &CType,
        lhs: &Location,
        rhs: &Expression,
        pattern: &PointerTargetPattern,
        is_initializer: bool,
    ) -> Result<Term> {
        let Location::Aliased(address) = lhs else {
            return Err(Error::unrecognized("array held in a plain variable", lhs));
        };
        let element = self.types().simplify(element);
        let rhs_element = match (rhs, rhs_type) {
            (Expression::Value(_) | Expression::Nondet, _) => element.clone(),
            (Expression::AliasedLocation(_), CType::Array { element: e, .. })
                if self.types().simplify(e).access_name() == element.access_name() =>
            {
                self.types().simplify(e)
            }
            _ => return Err(Error::incompatible(lhs_type, rhs_type)),
        };
        let count = match length.or_else(|| rhs_type.array_length()) {
            Some(n) => {
                let count = self.ctx.manager().array_length(Some(n));
                if count < n {
                    warn!(ty = %lhs_type, length = n, count, "array longer than the maximum length, assigning a prefix");
                }
                count
            }
            None => {
                let default = self.ctx.manager().array_length(None);
                warn!(ty = %lhs_type, count = default, "array length unknown, assuming the default");
                default
            }
        };
        let element_size = self.types().size_of(&element)?;
        let span = count.checked_mul(element_size).ok_or_else(|| {
            Error::TypeError(format!("{} elements of {} exceed the address space", count, element))
        })?;

        if let Expression::Value(value) = rhs {
            if element.is_scalar()
                && self.options().use_quantifiers_on_arrays
                && self.fm().uses_arrays()
            {
                let value = convert(value.clone(), &CType::int(), &element);
                return self.bulk_assign(&element, address, span, value);
            }
        }

        let mut parts = Vec::new();
        for i in 0..count {
            self.ctx.shutdown().check()?;
            // i < count, so this cannot overflow
            let offset = i128::from(i * element_size);
            let lhs_i =
                Location::Aliased(Term::add(address.clone(), Term::int(offset)));
            let rhs_i = match rhs {
                Expression::AliasedLocation(r) => {
                    Expression::AliasedLocation(Term::add(r.clone(), Term::int(offset)))
                }
                broadcast => broadcast.clone(),
            };
            parts.push(self.assign(
                &element,
                &rhs_element,
                &lhs_i,
                &rhs_i,
                pattern,
                is_initializer,
            )?);
        }
        Ok(Term::and(parts))
    }

    fn assign_composite(
        &mut self,
        lhs_type: &CType,
        rhs_type: &CType,
        lhs: &Location,
        rhs: &Expression,
        pattern: &PointerTargetPattern,
        is_initializer: bool,
    ) -> Result<Term> {
        let compatible = rhs.is_broadcast()
            || (rhs.as_location().is_some() && rhs_type.access_name() == lhs_type.access_name());
        if !compatible {
            return Err(Error::incompatible(lhs_type, rhs_type));
        }
        let Some(def) = self.types().composite_of(lhs_type) else {
            return Err(Error::incompatible(lhs_type, rhs_type));
        };

        let mut parts = Vec::new();
        for (member, offset) in self.types().member_offsets(&def)? {
            let member_type = self.types().simplify(&member.ty);
            let lhs_member = lhs.member(offset, &member.name);
            let rhs_member = match rhs {
                Expression::AliasedLocation(r) => Expression::AliasedLocation(Term::add(
                    r.clone(),
                    Term::int(i128::from(offset)),
                )),
                Expression::UnaliasedLocation(name) => Location::Unaliased(name.clone())
                    .member(offset, &member.name)
                    .into(),
                broadcast => broadcast.clone(),
            };

            if lhs.is_aliased() {
                let field = CompositeField::of(lhs_type, &member.name);
                let rhs_has_value = matches!(
                    &rhs_member,
                    Expression::UnaliasedLocation(name) if self.ssa.peek_index(name).is_some()
                );
                if member_type.is_scalar()
                    && !self.pts.tracks_field(&field)
                    && !is_initializer
                    && !rhs_has_value
                {
                    trace!(field = %field, "write to untracked field skipped");
                    continue;
                }
                self.record_field(lhs_type, &member.name);
            }

            parts.push(self.assign(
                &member_type,
                &member_type,
                &lhs_member,
                &rhs_member,
                pattern,
                is_initializer,
            )?);
        }
        Ok(Term::and(parts))
    }

    fn assign_scalar(
        &mut self,
        lhs_type: &CType,
        rhs_type: &CType,
        lhs: &Location,
        rhs: &Expression,
        pattern: &PointerTargetPattern,
    ) -> Result<Term> {
        if rhs_type.is_composite() && !rhs.is_broadcast() {
            return Err(Error::incompatible(lhs_type, rhs_type));
        }
        let value = self.value_of(rhs, rhs_type)?;
        let value = convert(value, rhs_type, lhs_type);
        match lhs {
            Location::Unaliased(name) => {
                let index = self.ssa.make_fresh_index(name, lhs_type);
                Ok(Term::eq(self.fm().variable(name, index), value))
            }
            Location::Aliased(address) => {
                self.record_store(lhs_type, address.clone(), value, pattern);
                Ok(Term::tt())
            }
        }
    }

    /// `forall i. *T@new[i] = ite(start <= i < start + bytes, value, *T@old[i])`
    fn bulk_assign(
        &mut self,
        element: &CType,
        start: &Term,
        bytes: u64,
        value: Term,
    ) -> Result<Term> {
        let memory = self.fm().memory_name(element);
        self.commit_writes(Some(&memory))?;
        let old = self.ssa.get_index(&memory, element);
        let new = self.ssa.make_fresh_index(&memory, element);
        let i = Term::int_var(QUANTIFIED_INDEX);
        let in_range = Term::and2(
            Term::le(start.clone(), i.clone()),
            Term::lt(i.clone(), Term::add(start.clone(), Term::int(i128::from(bytes)))),
        );
        let fm = self.fm();
        trace!(memory = %memory, bytes, "quantified initialization");
        Ok(Term::forall(
            QUANTIFIED_INDEX,
            Term::eq(
                fm.dereference(&memory, new, i.clone()),
                Term::ite(in_range, value, fm.dereference(&memory, old, i)),
            ),
        ))
    }

    fn record_store(
        &mut self,
        ty: &CType,
        address: Term,
        value: Term,
        pattern: &PointerTargetPattern,
    ) {
        let fm = self.fm();
        let memory = fm.memory_name(ty);
        if !self.pending.contains_key(&memory) {
            let old_index = self.ssa.get_index(&memory, ty);
            let chain = fm.uses_arrays().then(|| fm.memory(&memory, old_index));
            self.pending.insert(
                memory.clone(),
                PendingWrites {
                    ty: ty.clone(),
                    old_index,
                    chain,
                    writes: Vec::new(),
                    patterns: Vec::new(),
                },
            );
        }
        if let Some(pending) = self.pending.get_mut(&memory) {
            if let Some(chain) = pending.chain.take() {
                pending.chain = Some(Term::store(chain, address.clone(), value.clone()));
            }
            pending.writes.push((address, value));
            pending.patterns.push(pattern.clone());
        }
    }

    /// Gives every memory array written in the current statement (or only
    /// `only`) its fresh SSA index and emits the update constraints
    pub(crate) fn commit_writes(&mut self, only: Option<&str>) -> Result<()> {
        let names: Vec<String> = self
            .pending
            .keys()
            .filter(|name| only.map_or(true, |o| o == name.as_str()))
            .cloned()
            .collect();
        let fm = self.fm();
        for memory in names {
            let Some(pending) = self.pending.remove(&memory) else {
                continue;
            };
            let new = self.ssa.make_fresh_index(&memory, &pending.ty);
            match &pending.chain {
                Some(chain) => {
                    self.constraints
                        .add(Term::eq(fm.memory(&memory, new), chain.clone()));
                }
                None => {
                    for (address, value) in &pending.writes {
                        self.constraints.add(Term::eq(
                            fm.dereference(&memory, new, address.clone()),
                            value.clone(),
                        ));
                    }
                    let retention = self.retention(&memory, &pending, new)?;
                    self.constraints.add(retention);
                }
            }
            trace!(memory = %memory, index = new, writes = pending.writes.len(), "memory updated");
        }
        Ok(())
    }

    fn retention(&self, memory: &str, pending: &PendingWrites, new: u32) -> Result<Term> {
        let fm = self.fm();
        let mut parts = Vec::new();
        for target in self.pts.targets(&pending.ty.access_name()).iter() {
            self.ctx.shutdown().check()?;
            let address = target.address(fm);
            let kept = Term::eq(
                fm.dereference(memory, new, address.clone()),
                fm.dereference(memory, pending.old_index, address.clone()),
            );
            if pending.patterns.iter().any(|p| p.matches(target)) {
                let untouched = Term::and(
                    pending
                        .writes
                        .iter()
                        .map(|(written, _)| Term::not(Term::eq(address.clone(), written.clone()))),
                );
                parts.push(Term::implies(untouched, kept));
            } else {
                parts.push(kept);
            }
        }
        Ok(Term::and(parts))
    }

    /// Encodes `lhs = rhs;` (or an initializer expression when `is_initializer`)
    pub fn assign_expression(
        &mut self,
        lhs: &CExpression,
        rhs: &CExpression,
        is_initializer: bool,
    ) -> Result<()> {
        self.used_deferred.clear();
        let value = self.evaluate(rhs)?;
        let location = self.lvalue(lhs)?;
        self.update_deferred_allocations(lhs, &location, rhs)?;
        let pattern = PointerTargetPattern::for_lvalue(lhs, self.types());
        let constraint = self.assign(
            lhs.ty(),
            rhs.ty(),
            &location,
            &value,
            &pattern,
            is_initializer,
        )?;
        self.constraints.add(constraint);
        Ok(())
    }

    /// Encodes a declaration with its initializer
    ///
    /// Variables that live in memory become bases: immediately when they are
    /// initialized, otherwise they are only ordered and their targets appear
    /// on first access.
    pub fn declaration(&mut self, decl: &Declaration) -> Result<()> {
        if decl.ty.is_function() {
            return Ok(());
        }
        if self.is_aliased_variable(&decl.name, &decl.ty) && !self.pts.is_base(&decl.name) {
            let inequality = if decl.initializer.is_some() || decl.is_global {
                self.pts.add_base(&decl.name, &decl.ty)?
            } else {
                self.pts.prepare_base(&decl.name, &decl.ty)?
            };
            self.constraints.add(inequality);
        }
        let variable = CExpression::id(decl.name.clone(), decl.ty.clone());

        match &decl.initializer {
            None if decl.is_global && self.options().handle_implicit_initialization => {
                let location = self.lvalue(&variable)?;
                let pattern = PointerTargetPattern::for_lvalue(&variable, self.types());
                let zero = self.assign(
                    &decl.ty,
                    &CType::int(),
                    &location,
                    &Expression::Value(Term::int(0)),
                    &pattern,
                    true,
                )?;
                self.constraints.add(zero);
                Ok(())
            }
            None => Ok(()),
            Some(Initializer::Expression(expr)) => {
                if let Some((function, args)) = self.allocation_call(expr) {
                    self.allocation(Some(&variable), function, args)
                } else if self.should_expand_string_initializer(&decl.ty, expr) {
                    self.initialize(&variable, &Initializer::Expression(expr.clone()))
                } else {
                    self.assign_expression(&variable, expr, true)
                }
            }
            Some(list) => self.initialize(&variable, list),
        }
    }

    fn initialize(&mut self, variable: &CExpression, initializer: &Initializer) -> Result<()> {
        self.used_deferred.clear();
        let location = self.lvalue(variable)?;
        let pattern = PointerTargetPattern::for_lvalue(variable, self.types());
        let constraint = self.assign_initializer(variable.ty(), &location, initializer, &pattern)?;
        self.constraints.add(constraint);
        Ok(())
    }

    fn should_expand_string_initializer(&self, ty: &CType, expr: &CExpression) -> bool {
        matches!(expr, CExpression::StringLiteral { .. })
            && self.options().handle_string_literal_initializers
            && matches!(
                self.types().simplify(ty),
                CType::Array { element, .. }
                    if matches!(*element, CType::Simple(SimpleKind::Char | SimpleKind::SignedChar | SimpleKind::UnsignedChar))
            )
    }

    /// Encodes an initializer (expression or brace list) for `lhs`
    ///
    /// Elements and members without an initializer are zero when implicit
    /// initialization is handled, unconstrained otherwise. A union initializes
    /// its first member.
    pub fn assign_initializer(
        &mut self,
        ty: &CType,
        lhs: &Location,
        initializer: &Initializer,
        pattern: &PointerTargetPattern,
    ) -> Result<Term> {
        let ty = self.types().simplify(ty);
        let items = match initializer {
            Initializer::Expression(expr @ CExpression::StringLiteral { value, .. })
                if self.should_expand_string_initializer(&ty, expr) =>
            {
                value
                    .bytes()
                    .chain(std::iter::once(0))
                    .map(|b| Initializer::Expression(CExpression::literal(i128::from(b), CType::char())))
                    .collect()
            }
            Initializer::Expression(expr) => {
                let value = self.evaluate(expr)?;
                return self.assign(&ty, expr.ty(), lhs, &value, pattern, true);
            }
            Initializer::List(items) => items.clone(),
        };

        match &ty {
            CType::Array { element, length } => {
                let Location::Aliased(address) = lhs else {
                    return Err(Error::unrecognized("array held in a plain variable", lhs));
                };
                let declared = length.unwrap_or(items.len() as u64);
                let count = self.ctx.manager().array_length(Some(declared));
                if count < declared {
                    warn!(ty = %ty, length = declared, count, "array longer than the maximum length, initializing a prefix");
                }
                if let Some(value) = self.uniform_value(&items, count) {
                    return self.assign(
                        &ty,
                        &CType::int(),
                        lhs,
                        &Expression::Value(Term::int(value)),
                        pattern,
                        true,
                    );
                }
                let element_size = self.types().size_of(element)?;
                if count.checked_mul(element_size).is_none() {
                    return Err(Error::TypeError(format!(
                        "{} elements of {} exceed the address space",
                        count, element
                    )));
                }
                let mut parts = Vec::new();
                for i in 0..count {
                    self.ctx.shutdown().check()?;
                    let element_location = Location::Aliased(Term::add(
                        address.clone(),
                        Term::int(i128::from(i * element_size)),
                    ));
                    parts.push(match items.get(i as usize) {
                        Some(item) => {
                            self.assign_initializer(element, &element_location, item, pattern)?
                        }
                        None => self.assign_implicit(element, &element_location, pattern)?,
                    });
                }
                Ok(Term::and(parts))
            }
            CType::Composite(def) => {
                let mut parts = Vec::new();
                let layout = self.types().member_offsets(def)?;
                let initialized = if def.is_union() { 1 } else { layout.len() };
                for (i, (member, offset)) in layout.into_iter().take(initialized).enumerate() {
                    let member_location = lhs.member(offset, &member.name);
                    if lhs.is_aliased() {
                        self.record_field(&ty, &member.name);
                    }
                    parts.push(match items.get(i) {
                        Some(item) => {
                            self.assign_initializer(&member.ty, &member_location, item, pattern)?
                        }
                        None => self.assign_implicit(&member.ty, &member_location, pattern)?,
                    });
                }
                Ok(Term::and(parts))
            }
            _ => match items.first() {
                Some(item) => self.assign_initializer(&ty, lhs, item, pattern),
                None => self.assign_implicit(&ty, lhs, pattern),
            },
        }
    }

    fn assign_implicit(
        &mut self,
        ty: &CType,
        lhs: &Location,
        pattern: &PointerTargetPattern,
    ) -> Result<Term> {
        let value = if self.options().handle_implicit_initialization {
            Expression::Value(Term::int(0))
        } else {
            Expression::Nondet
        };
        self.assign(ty, &CType::int(), lhs, &value, pattern, true)
    }

    /// Literal shared by every element of an array initializer list, counting
    /// implicitly zeroed trailing elements
    fn uniform_value(&self, items: &[Initializer], count: u64) -> Option<i128> {
        let mut values = items.iter().map(|item| match item {
            Initializer::Expression(expr) => expr.as_literal(),
            Initializer::List(_) => None,
        });
        let first = values.next()??;
        if !values.all(|v| v == Some(first)) {
            return None;
        }
        let complete = items.len() as u64 >= count
            || (first == 0 && self.options().handle_implicit_initialization);
        complete.then_some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderOptions;
    use crate::encoder::context::EncoderContext;
    use crate::pointer_target::PointerTargetSet;
    use crate::shutdown::ShutdownNotifier;
    use crate::ssa::SsaMap;
    use crate::types::{CompositeKind, CompositeType, Member, TypeTable};
    use std::sync::Arc;

    fn context(types: TypeTable, options: EncoderOptions) -> EncoderContext {
        EncoderContext::new(Arc::new(types), options, ShutdownNotifier::new()).unwrap()
    }

    #[test]
    fn test_stores_of_one_statement_share_an_index() {
        let ctx = context(TypeTable::lp64(), EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        enc.declaration(&Declaration {
            name: "a".to_string(),
            ty: CType::array_of(CType::int(), 2),
            initializer: Some(Initializer::List(vec![
                Initializer::Expression(CExpression::int(7)),
                Initializer::Expression(CExpression::int(8)),
            ])),
            is_global: false,
        })
        .unwrap();
        let result = enc.finish().unwrap();
        assert_eq!(result.ssa.get_index("*int"), Some(2));
        let formula = result.formula.to_string();
        assert!(formula.contains(
            "(= *int@2 (store (store *int@1 __ADDRESS_OF_a 7) (+ __ADDRESS_OF_a 4) 8))"
        ));
        assert_eq!(result.pts.targets("int").len(), 2);
    }

    #[test]
    fn test_union_members_share_offset_zero() {
        let mut types = TypeTable::lp64();
        let u = types.define(CompositeType::new(
            CompositeKind::Union,
            "u",
            vec![Member::new("i", CType::int()), Member::new("l", CType::long())],
        ));
        let ctx = context(types, EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        enc.ensure_base("v", &u).unwrap();
        let location = Location::Aliased(ctx.fm().base_address("v"));
        enc.assign(
            &u,
            &CType::int(),
            &location,
            &Expression::Value(Term::int(0)),
            &PointerTargetPattern::Base("v".to_string()),
            true,
        )
        .unwrap();
        let formula = enc.finish().unwrap().formula.to_string();
        assert!(formula.contains("(= *int@2 (store *int@1 __ADDRESS_OF_v 0))"));
        assert!(formula.contains("(= *long@2 (store *long@1 __ADDRESS_OF_v 0))"));
    }

    #[test]
    fn test_incompatible_shapes_are_rejected() {
        let mut types = TypeTable::lp64();
        let s = types.define(CompositeType::new(
            CompositeKind::Struct,
            "s",
            vec![Member::new("a", CType::int())],
        ));
        let ctx = context(types, EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        let err = enc
            .assign_expression(
                &CExpression::id("x", CType::int()),
                &CExpression::id("v", s),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::IncompatibleAssignment { .. }));
    }

    #[test]
    fn test_untracked_member_write_is_skipped() {
        let mut types = TypeTable::lp64();
        let s = types.define(CompositeType::new(
            CompositeKind::Struct,
            "s",
            vec![Member::new("a", CType::int()), Member::new("b", CType::int())],
        ));
        let ctx = context(types, EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        enc.ensure_base("v", &s).unwrap();
        enc.ensure_base("w", &s).unwrap();
        let location = Location::Aliased(ctx.fm().base_address("v"));
        let source = Expression::AliasedLocation(ctx.fm().base_address("w"));
        enc.assign(&s, &s, &location, &source, &PointerTargetPattern::Any, false)
            .unwrap();
        let result = enc.finish().unwrap();
        assert_eq!(result.ssa.get_index("*int"), None);
        assert!(result.pts.fields().is_empty());
    }

    #[test]
    fn test_quantified_zero_initialization() {
        let options = EncoderOptions {
            use_quantifiers_on_arrays: true,
            ..EncoderOptions::default()
        };
        let ctx = context(TypeTable::lp64(), options);
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        enc.declaration(&Declaration {
            name: "g".to_string(),
            ty: CType::array_of(CType::int(), 10),
            initializer: None,
            is_global: true,
        })
        .unwrap();
        let result = enc.finish().unwrap();
        assert_eq!(result.formula.count_stores(), 0);
        assert!(result.formula.to_string().contains(
            "(forall ((__i Int)) (= (select *int@2 __i) (ite (and (<= __ADDRESS_OF_g __i) (< __i (+ __ADDRESS_OF_g 40))) 0 (select *int@1 __i))))"
        ));
    }
}
