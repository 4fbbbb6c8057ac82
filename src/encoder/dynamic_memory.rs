//! Dynamic memory
//!
//! Allocation and deallocation calls, plus the lazy typing of untyped
//! allocations. `void *p = malloc(n)` does not say what the memory holds, so
//! unless the size expression or the receiving pointer reveals a type, the new
//! base is parked in a [`DeferredAllocationPool`] under `p` and its type is
//! decided by the first revealing use:
//!
//! - a cast of `p` to a concrete pointer type
//! - an assignment of `p` to a variable of concrete pointer type
//! - returning `p` from a function with a concrete pointer return type
//!
//! Uses that lose track of the pointer (storing it to memory, passing it to
//! an unknown function, returning it untyped, its last alias going out of
//! scope or being overwritten after use) make the allocation *escape*: it
//! becomes a byte array of its size.

use super::ast::{BinaryOp, CExpression};
use super::context::EdgeEncoder;
use super::expression::{Expression, Location};
use crate::pointer_target::{is_fake_base_type, DeferredAllocationPool, PointerTargetPattern};
use crate::smt::Term;
use crate::types::CType;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace, warn};

/// Per-function SSA counter of allocation sites
pub const ALLOCATION_COUNTER: &str = "__alloc";

/// Per-function variable holding the returned value
pub const RETURN_VARIABLE: &str = "__retval__";

/// What an allocation size expression says about the allocated object
#[derive(Debug, Clone, Default, PartialEq)]
struct AllocationSize {
    bytes: Option<u64>,
    revealed: Option<CType>,
}

/// Number of arguments an allocation function takes
///
/// `calloc(n, size)` multiplies its arguments; the kernel allocators take a
/// size and allocation flags.
fn allocation_arity(function: &str) -> usize {
    match function {
        "calloc" | "kmalloc" | "__kmalloc" | "kzalloc" => 2,
        _ => 1,
    }
}

fn sizeof_operand(expr: &CExpression) -> Option<&CType> {
    match expr.strip_casts() {
        CExpression::SizeofType { operand_type, .. } => Some(operand_type),
        _ => None,
    }
}

fn literal_bytes(value: Option<i128>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

impl<'a> EdgeEncoder<'a> {
    /// Function name and arguments if `expr` is (a cast of) a call to an
    /// allocation function
    pub(crate) fn allocation_call<'e>(
        &self,
        expr: &'e CExpression,
    ) -> Option<(&'e str, &'e [CExpression])> {
        match expr.strip_casts() {
            CExpression::FunctionCall { function, args, .. }
                if self.options().is_allocation_function(function) =>
            {
                Some((function.as_str(), args.as_slice()))
            }
            _ => None,
        }
    }

    fn allocation_size(&self, function: &str, args: &[CExpression]) -> Result<AllocationSize> {
        match (function, args) {
            ("calloc", [count, size]) => self.product_size(count, size),
            (_, [size, ..]) => match size.strip_casts() {
                CExpression::Binary {
                    op: BinaryOp::Mul,
                    lhs,
                    rhs,
                    ..
                } => self.product_size(lhs, rhs),
                other => self.single_size(other),
            },
            _ => Ok(AllocationSize::default()),
        }
    }

    fn single_size(&self, size: &CExpression) -> Result<AllocationSize> {
        match sizeof_operand(size) {
            Some(ty) => Ok(AllocationSize {
                bytes: self.sizeof_if_complete(ty)?,
                revealed: Some(ty.clone()),
            }),
            None => Ok(AllocationSize {
                bytes: literal_bytes(size.as_literal()),
                revealed: None,
            }),
        }
    }

    /// `n * sizeof(T)` reveals `T[n]` (`T` when `n` is one); a non-literal `n`
    /// reveals `T[]`
    fn product_size(&self, lhs: &CExpression, rhs: &CExpression) -> Result<AllocationSize> {
        let (count, element) = match (sizeof_operand(lhs), sizeof_operand(rhs)) {
            (_, Some(ty)) => (lhs, ty),
            (Some(ty), None) => (rhs, ty),
            (None, None) => {
                let bytes = lhs
                    .as_literal()
                    .zip(rhs.as_literal())
                    .and_then(|(a, b)| a.checked_mul(b));
                return Ok(AllocationSize {
                    bytes: literal_bytes(bytes),
                    revealed: None,
                });
            }
        };
        let element_size = self.sizeof_if_complete(element)?;
        match literal_bytes(count.as_literal()) {
            Some(1) => Ok(AllocationSize {
                bytes: element_size,
                revealed: Some(element.clone()),
            }),
            Some(n) => Ok(AllocationSize {
                bytes: element_size.and_then(|size| n.checked_mul(size)),
                revealed: Some(CType::array_of(element.clone(), n)),
            }),
            None => Ok(AllocationSize {
                bytes: None,
                revealed: Some(CType::unsized_array_of(element.clone())),
            }),
        }
    }

    fn sizeof_if_complete(&self, ty: &CType) -> Result<Option<u64>> {
        if self.types().is_complete(ty) {
            Ok(Some(self.types().size_of(ty)?))
        } else {
            Ok(None)
        }
    }

    /// Type of an allocation of `bytes` bytes reached through a `pointee *`
    fn allocation_type(&self, pointee: &CType, bytes: Option<u64>) -> Result<CType> {
        let default = self.options().default_allocation_size;
        if !self.types().is_complete(pointee) {
            return Ok(CType::array_of(CType::char(), bytes.unwrap_or(default)));
        }
        let size = self.types().size_of(pointee)?;
        match bytes {
            None => Ok(CType::unsized_array_of(pointee.clone())),
            Some(k) if k == size => Ok(pointee.clone()),
            Some(k) if size > 0 && k % size == 0 => Ok(CType::array_of(pointee.clone(), k / size)),
            Some(k) => {
                warn!(ty = %pointee, bytes = k, "allocation size is not a multiple of the element size, assuming a byte array");
                Ok(CType::array_of(CType::char(), k))
            }
        }
    }

    /// Encodes `[lhs =] function(args)` for an allocation function
    pub fn allocation(
        &mut self,
        lhs: Option<&CExpression>,
        function: &str,
        args: &[CExpression],
    ) -> Result<()> {
        let expected = allocation_arity(function);
        if args.len() != expected {
            return Err(Error::InvalidCallArity {
                function: function.to_string(),
                expected,
                got: args.len(),
            });
        }
        let options = self.options();
        let size = self.allocation_size(function, args)?;
        let zeroing = options.is_zeroing_allocation_function(function);

        let counter = format!("{}::{}", self.function, ALLOCATION_COUNTER);
        let site = self.ssa.make_fresh_index(&counter, &CType::Void);
        let base = format!("{}#{}", counter, site);

        let mut ty = size.revealed.clone();
        if ty.is_none() && options.reveal_allocation_type_from_lhs {
            if let Some(pointee) = lhs
                .filter(|l| l.ty().is_revealing_pointer())
                .and_then(|l| l.ty().pointee())
            {
                ty = Some(self.allocation_type(&pointee, size.bytes)?);
            }
        }

        self.used_deferred.clear();
        let location = match lhs {
            Some(lhs) => Some(self.lvalue(lhs)?),
            None => None,
        };
        let pointer_variable = match (lhs, &location) {
            (Some(lhs), Some(Location::Unaliased(name)))
                if lhs.variable_name() == Some(name.as_str()) && lhs.ty().is_pointer() =>
            {
                Some(name.clone())
            }
            _ => None,
        };
        if let Some(pointer) = &pointer_variable {
            self.release_pointer(pointer, false)?;
        }

        match (ty, &pointer_variable) {
            (Some(ty), _) => {
                debug!(base = %base, ty = %ty, "allocation");
                self.register_allocation(&base, &ty, zeroing)?;
            }
            (None, Some(pointer)) if options.defer_untyped_allocations => {
                debug!(base = %base, pointer = %pointer, bytes = ?size.bytes, "allocation deferred");
                self.pts
                    .add_deferred_allocation(pointer, &base, size.bytes, zeroing);
            }
            (None, _) => {
                let ty = CType::array_of(
                    CType::char(),
                    size.bytes.unwrap_or(options.default_allocation_size),
                );
                warn!(base = %base, ty = %ty, "allocation type unknown, assuming a byte array");
                self.register_allocation(&base, &ty, zeroing)?;
            }
        }

        let (Some(lhs), Some(location)) = (lhs, location) else {
            return Ok(());
        };
        let address = self.fm().base_address(&base);
        let value = if options.memory_allocations_always_succeed {
            address
        } else {
            let success = Term::bool_var(format!("{}_success", base));
            Term::ite(success, address, Term::int(0))
        };
        let pattern = PointerTargetPattern::for_lvalue(lhs, self.types());
        let constraint = self.assign(
            lhs.ty(),
            &CType::void_pointer(),
            &location,
            &Expression::Value(value),
            &pattern,
            false,
        )?;
        self.constraints.add(constraint);
        Ok(())
    }

    /// Registers the allocated object `base` and zeroes it for zeroing
    /// allocators
    fn register_allocation(&mut self, base: &str, ty: &CType, zeroing: bool) -> Result<()> {
        let inequality = self.pts.add_base(base, ty)?;
        self.constraints.add(inequality);
        if zeroing {
            let location = Location::Aliased(self.fm().base_address(base));
            let zero = self.assign(
                ty,
                &CType::int(),
                &location,
                &Expression::Value(Term::int(0)),
                &PointerTargetPattern::Base(base.to_string()),
                true,
            )?;
            self.constraints.add(zero);
        }
        Ok(())
    }

    fn resolve_pool(&mut self, pool: &DeferredAllocationPool, pointee: &CType) -> Result<()> {
        let ty = self.allocation_type(pointee, pool.size())?;
        debug!(pool = %pool, ty = %ty, "deferred allocation resolved");
        self.materialize_pool(pool, &ty)
    }

    fn escape(&mut self, pool: &DeferredAllocationPool, reason: &str) -> Result<()> {
        let size = pool
            .size()
            .unwrap_or(self.options().default_allocation_size);
        let ty = CType::array_of(CType::char(), size);
        warn!(pool = %pool, reason, ty = %ty, "deferred allocation escaped, assuming a byte array");
        self.materialize_pool(pool, &ty)
    }

    fn materialize_pool(&mut self, pool: &DeferredAllocationPool, ty: &CType) -> Result<()> {
        self.pts.remove_pool(pool);
        for base in pool.bases().iter() {
            self.register_allocation(base, ty, pool.is_zeroing())?;
        }
        Ok(())
    }

    /// Drops `pointer` from its pool; if it was the last alias the allocation
    /// escapes when its value was still used, and is garbage otherwise
    fn release_pointer(&mut self, pointer: &str, used: bool) -> Result<()> {
        match self.pts.remove_pointer(pointer) {
            Some(pool) if used => self.escape(&pool, "last alias overwritten"),
            Some(pool) => {
                warn!(pointer, pool = %pool, "deferred allocation lost without being used");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Deferred-allocation pointers read by `rhs`; a plain variable is only
    /// read when its value is assigned, so it is added here
    fn take_used_deferred(&mut self, rhs: &CExpression) -> BTreeMap<String, Option<CType>> {
        let mut used = std::mem::take(&mut self.used_deferred);
        if let Some(source) = rhs.variable_name() {
            if self.pts.is_deferred_pointer(source) {
                used.entry(source.to_string()).or_insert(None);
            }
        }
        used
    }

    /// Updates the deferred allocations after `lhs = rhs` was evaluated
    pub(crate) fn update_deferred_allocations(
        &mut self,
        lhs: &CExpression,
        location: &Location,
        rhs: &CExpression,
    ) -> Result<()> {
        let used = self.take_used_deferred(rhs);
        let mut flowing: Vec<DeferredAllocationPool> = Vec::new();
        for (pointer, revealed) in &used {
            let Some(pool) = self.pts.deferred_allocation(pointer) else {
                continue;
            };
            match revealed {
                Some(pointee) => {
                    trace!(pointer = %pointer, "revealed by cast");
                    self.resolve_pool(&pool, pointee)?;
                }
                None if !flowing.contains(&*pool) => flowing.push((*pool).clone()),
                None => {}
            }
        }
        flowing.retain(|pool| {
            pool.pointer_variables()
                .iter()
                .any(|p| self.pts.is_deferred_pointer(p))
        });

        let lhs_type = self.types().simplify(lhs.ty());
        if lhs_type.is_revealing_pointer() && !flowing.is_empty() {
            if flowing.len() > 1 {
                return Err(Error::AmbiguousAllocation {
                    pools: flowing.iter().map(|pool| pool.to_string()).collect(),
                    location: format!("{} = {}", lhs, rhs),
                });
            }
            if let (Some(pool), Some(pointee)) = (flowing.first(), lhs_type.pointee()) {
                self.resolve_pool(pool, &pointee)?;
            }
            return Ok(());
        }

        let lhs_variable = match location {
            Location::Unaliased(name) if lhs.variable_name() == Some(name.as_str()) => {
                Some(name.clone())
            }
            _ => None,
        };
        let rhs_variable = rhs.variable_name();

        if let Some(name) = &lhs_variable {
            if rhs_variable != Some(name.as_str()) && self.pts.is_deferred_pointer(name) {
                self.release_pointer(name, used.contains_key(name))?;
            }
        }

        match (&lhs_variable, rhs_variable) {
            (Some(name), Some(source))
                if lhs_type.is_pointer() && self.pts.is_deferred_pointer(source) =>
            {
                trace!(pointer = %name, alias_of = source, "deferred allocation aliased");
                self.pts.add_pointer_alias(source, name);
            }
            _ if location.is_aliased() => {
                for pool in &flowing {
                    self.escape(pool, "stored to memory")?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Encodes `free(args)`
    pub fn free(&mut self, function: &str, args: &[CExpression]) -> Result<()> {
        let [pointer] = args else {
            return Err(Error::InvalidCallArity {
                function: function.to_string(),
                expected: 1,
                got: args.len(),
            });
        };
        self.used_deferred.clear();
        let address = self.rvalue(pointer)?;
        self.used_deferred.clear();

        if self.options().track_memory_errors {
            let mut bases: BTreeSet<String> = self
                .pts
                .base_names()
                .filter(|name| {
                    self.pts
                        .base_type(name)
                        .map_or(false, |ty| !is_fake_base_type(ty))
                })
                .cloned()
                .collect();
            for deferred in self.pts.deferred_pointers() {
                if let Some(pool) = self.pts.deferred_allocation(&deferred) {
                    bases.extend(pool.bases().iter().cloned());
                }
            }
            let fm = self.fm();
            let valid = std::iter::once(Term::eq(address.clone(), Term::int(0))).chain(
                bases
                    .iter()
                    .map(|base| Term::eq(address.clone(), fm.base_address(base))),
            );
            self.errors.add_invalid_free(Term::not(Term::or(valid)));
        }

        if let Some(name) = pointer.variable_name() {
            if let Some(pool) = self.pts.deferred_allocation(name) {
                debug!(pool = %pool, "deferred allocation freed");
                self.pts.remove_pool(&pool);
            }
        }
        Ok(())
    }

    /// Encodes `[lhs =] function(args);`
    ///
    /// Calls other than allocation and deallocation return an unconstrained
    /// value; deferred allocations passed to them escape unless the callee is
    /// a nondet function.
    pub fn call(
        &mut self,
        lhs: Option<&CExpression>,
        function: &str,
        args: &[CExpression],
        return_type: &CType,
    ) -> Result<()> {
        let options = self.options();
        if options.is_allocation_function(function) {
            return self.allocation(lhs, function, args);
        }
        if options.is_free_function(function) {
            return self.free(function, args);
        }
        if !options.is_nondet_function(function) {
            self.escape_call_arguments(function, args)?;
        }
        let Some(lhs) = lhs else {
            return Ok(());
        };
        self.used_deferred.clear();
        let location = self.lvalue(lhs)?;
        if let Location::Unaliased(name) = &location {
            if lhs.variable_name() == Some(name.as_str()) {
                self.release_pointer(name, false)?;
            }
        }
        let pattern = PointerTargetPattern::for_lvalue(lhs, self.types());
        let constraint = self.assign(
            lhs.ty(),
            return_type,
            &location,
            &Expression::Nondet,
            &pattern,
            false,
        )?;
        self.constraints.add(constraint);
        Ok(())
    }

    /// Deferred allocations passed to `function` escape
    pub(crate) fn escape_call_arguments(
        &mut self,
        function: &str,
        args: &[CExpression],
    ) -> Result<()> {
        for arg in args {
            let Some(name) = arg.variable_name() else {
                continue;
            };
            if let Some(pool) = self.pts.deferred_allocation(name) {
                self.escape(&pool, &format!("passed to {}", function))?;
            }
        }
        Ok(())
    }

    /// Encodes `return [value];` as an assignment to the return variable
    pub fn return_statement(
        &mut self,
        value: Option<&CExpression>,
        return_type: &CType,
    ) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        self.used_deferred.clear();
        let evaluated = self.evaluate(value)?;

        let return_type = self.types().simplify(return_type);
        let revealed_by_type = return_type
            .is_revealing_pointer()
            .then(|| return_type.pointee())
            .flatten();
        for (pointer, revealed) in self.take_used_deferred(value) {
            let Some(pool) = self.pts.deferred_allocation(&pointer) else {
                continue;
            };
            match revealed.or_else(|| revealed_by_type.clone()) {
                Some(pointee) => self.resolve_pool(&pool, &pointee)?,
                None => self.escape(&pool, "returned")?,
            }
        }

        let location = Location::Unaliased(format!("{}::{}", self.function, RETURN_VARIABLE));
        let constraint = self.assign(
            &return_type,
            value.ty(),
            &location,
            &evaluated,
            &PointerTargetPattern::Any,
            false,
        )?;
        self.constraints.add(constraint);
        Ok(())
    }

    /// Local variables go out of scope; allocations only they referred to escape
    pub fn function_exit(&mut self, locals: &[String]) -> Result<()> {
        for local in locals {
            if let Some(pool) = self.pts.remove_pointer(local) {
                self.escape(&pool, "last alias went out of scope")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderOptions;
    use crate::encoder::ast::{Declaration, Initializer};
    use crate::encoder::context::EncoderContext;
    use crate::pointer_target::PointerTargetSet;
    use crate::shutdown::ShutdownNotifier;
    use crate::ssa::SsaMap;
    use crate::types::TypeTable;
    use std::sync::Arc;

    fn context(options: EncoderOptions) -> EncoderContext {
        EncoderContext::new(Arc::new(TypeTable::lp64()), options, ShutdownNotifier::new())
            .unwrap()
    }

    fn malloc(size: CExpression) -> CExpression {
        CExpression::call("malloc", vec![size], CType::void_pointer())
    }

    fn declare(name: &str, ty: CType, init: CExpression) -> Declaration {
        Declaration {
            name: name.to_string(),
            ty,
            initializer: Some(Initializer::Expression(init)),
            is_global: false,
        }
    }

    #[test]
    fn test_sizeof_reveals_the_allocated_type() {
        let ctx = context(EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        let int_ptr = CType::pointer_to(CType::int());
        enc.declaration(&declare(
            "p",
            int_ptr.clone(),
            CExpression::cast(malloc(CExpression::sizeof(CType::int())), int_ptr),
        ))
        .unwrap();
        let result = enc.finish().unwrap();
        assert_eq!(result.pts.base_type("main::__alloc#1"), Some(&CType::int()));
        assert_eq!(result.ssa.get_index("main::__alloc"), Some(1));
        assert!(result.formula.to_string().contains("main::__alloc#1_success"));
    }

    #[test]
    fn test_lhs_reveals_array_of_pointee() {
        let ctx = context(EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        enc.declaration(&declare(
            "p",
            CType::pointer_to(CType::int()),
            malloc(CExpression::int(12)),
        ))
        .unwrap();
        let result = enc.finish().unwrap();
        assert_eq!(
            result.pts.base_type("main::__alloc#1"),
            Some(&CType::array_of(CType::int(), 3))
        );
    }

    #[test]
    fn test_void_allocation_is_deferred_until_typed_alias() {
        let ctx = context(EncoderOptions::default());
        let void_ptr = CType::void_pointer();
        let int_ptr = CType::pointer_to(CType::int());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        enc.declaration(&declare("p", void_ptr.clone(), malloc(CExpression::int(8))))
            .unwrap();
        assert!(enc.pts().is_deferred_pointer("p"));
        assert!(!enc.pts().is_base("main::__alloc#1"));
        enc.declaration(&declare("q", int_ptr, CExpression::id("p", void_ptr)))
            .unwrap();
        let result = enc.finish().unwrap();
        assert_eq!(
            result.pts.base_type("main::__alloc#1"),
            Some(&CType::array_of(CType::int(), 2))
        );
        assert!(result.pts.deferred_allocation("p").is_none());
    }

    #[test]
    fn test_wrong_arity_is_rejected() {
        let ctx = context(EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        let err = enc
            .call(None, "malloc", &[], &CType::void_pointer())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidCallArity {
                expected: 1,
                got: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_free_registers_invalid_free_condition() {
        let options = EncoderOptions {
            track_memory_errors: true,
            ..EncoderOptions::default()
        };
        let ctx = context(options);
        let int_ptr = CType::pointer_to(CType::int());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        enc.declaration(&declare(
            "p",
            int_ptr.clone(),
            malloc(CExpression::sizeof(CType::int())),
        ))
        .unwrap();
        enc.call(None, "free", &[CExpression::id("p", int_ptr)], &CType::Void)
            .unwrap();
        let result = enc.finish().unwrap();
        let condition = result.errors.invalid_free().to_string();
        assert!(condition.starts_with("(not (or (= p@1 0)"));
        assert!(condition.contains("__ADDRESS_OF_main::__alloc#1"));
    }

    #[test]
    fn test_allocations_always_succeed() {
        let options = EncoderOptions {
            memory_allocations_always_succeed: true,
            ..EncoderOptions::default()
        };
        let ctx = context(options);
        let int_ptr = CType::pointer_to(CType::int());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        enc.call(
            Some(&CExpression::id("p", int_ptr)),
            "malloc",
            &[CExpression::sizeof(CType::int())],
            &CType::void_pointer(),
        )
        .unwrap();
        let formula = enc.finish().unwrap().formula.to_string();
        assert!(formula.contains("(= p@1 |__ADDRESS_OF_main::__alloc#1|)"));
    }
}
