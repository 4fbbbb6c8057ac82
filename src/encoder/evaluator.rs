//! Expression evaluation
//!
//! Turns a C expression into an [`Expression`]: a computed value, a memory
//! cell, a plain variable or an unconstrained value. Evaluation records which
//! fields are accessed through memory and which deferred-allocation pointers
//! are read, so that the edge can track those fields and resolve those
//! allocations afterwards.
//!
//! Integers are mathematical integers. Bitwise operators other than `~`
//! therefore evaluate to unconstrained values.

use super::ast::{BinaryOp, CExpression, UnaryOp};
use super::context::{EdgeEncoder, STRING_LITERAL_PREFIX};
use super::expression::{Expression, Location};
use crate::pointer_target::FIELD_SEPARATOR;
use crate::smt::Term;
use crate::types::CType;
use crate::{Error, Result};
use tracing::trace;

impl<'a> EdgeEncoder<'a> {
    /// Evaluates `expr`
    pub fn evaluate(&mut self, expr: &CExpression) -> Result<Expression> {
        match expr {
            CExpression::IntLiteral { value, .. } => Ok(Expression::Value(Term::int(*value))),

            CExpression::StringLiteral { value, ty } => self.string_literal(value, ty),

            CExpression::Id { name, ty } => {
                if ty.is_function() {
                    return Ok(self.function_designator(name));
                }
                Ok(self.variable_location(name, ty)?.into())
            }

            CExpression::ArraySubscript {
                array, index, ty, ..
            } => {
                let address = self.dereference_address(array, expr)?;
                let index = self.rvalue(index)?;
                let element_size = self.types().size_of(ty)?;
                Ok(Expression::AliasedLocation(Term::add(
                    address,
                    Term::mul(index, Term::int(i128::from(element_size))),
                )))
            }

            CExpression::FieldRef {
                owner,
                field,
                is_pointer_deref,
                ..
            } => {
                // `p->f` is `(*p).f`
                let (owner_value, owner_type) = if *is_pointer_deref {
                    let pointee = owner.ty().pointee().ok_or_else(|| {
                        Error::InvalidDereference {
                            expression: owner.to_string(),
                            ty: owner.ty().to_string(),
                        }
                    })?;
                    let address = self.dereference_address(owner, expr)?;
                    (Expression::AliasedLocation(address), pointee)
                } else {
                    (self.evaluate(owner)?, owner.ty().clone())
                };
                let owner_type = self.types().simplify(&owner_type);
                let def = self.types().composite_of(&owner_type).ok_or_else(|| {
                    Error::unrecognized(
                        format!("member access on non-composite type {}", owner_type),
                        expr,
                    )
                })?;
                match owner_value {
                    Expression::AliasedLocation(address) => {
                        let offset = self.types().member_offset(&def, field)?;
                        self.record_field(&owner_type, field);
                        Ok(Expression::AliasedLocation(Term::add(
                            address,
                            Term::int(i128::from(offset)),
                        )))
                    }
                    Expression::UnaliasedLocation(name) => Ok(Expression::UnaliasedLocation(
                        format!("{}{}{}", name, FIELD_SEPARATOR, field),
                    )),
                    Expression::Value(_) | Expression::Nondet => Err(Error::unrecognized(
                        "member access on a value that is not in memory",
                        expr,
                    )),
                }
            }

            CExpression::PointerDeref { operand, .. } => Ok(Expression::AliasedLocation(
                self.dereference_address(operand, expr)?,
            )),

            CExpression::AddressOf { operand, .. } => self.address_of(operand, expr),

            CExpression::Cast { operand, ty } => {
                let value = self.rvalue(operand)?;
                let target = self.types().simplify(ty);
                if target.is_revealing_pointer() {
                    if let Some(pointer) = operand.variable_name() {
                        if self.pts.is_deferred_pointer(pointer) {
                            trace!(pointer, ty = %target, "cast reveals allocation type");
                            self.used_deferred
                                .insert(pointer.to_string(), target.pointee());
                        }
                    }
                }
                Ok(Expression::Value(convert(value, operand.ty(), &target)))
            }

            CExpression::Unary { op, operand, .. } => match op {
                UnaryOp::Neg => Ok(Expression::Value(Term::sub(
                    Term::int(0),
                    self.rvalue(operand)?,
                ))),
                UnaryOp::Not => {
                    let condition = self.condition(operand)?;
                    Ok(Expression::Value(Term::ite(
                        condition,
                        Term::int(0),
                        Term::int(1),
                    )))
                }
                // ~x == -x - 1 in two's complement
                UnaryOp::BitNot => Ok(Expression::Value(Term::sub(
                    Term::sub(Term::int(0), self.rvalue(operand)?),
                    Term::int(1),
                ))),
            },

            CExpression::Binary { op, lhs, rhs, .. } => self.binary(*op, lhs, rhs, expr),

            CExpression::SizeofType { operand_type, .. } => Ok(Expression::Value(Term::int(
                i128::from(self.types().size_of(operand_type)?),
            ))),

            CExpression::FunctionCall { function, args, .. } => {
                let options = self.options();
                if options.is_allocation_function(function) || options.is_free_function(function) {
                    return Err(Error::unrecognized(
                        format!("call to {} nested inside an expression", function),
                        expr,
                    ));
                }
                if !options.is_nondet_function(function) {
                    self.escape_call_arguments(function, args)?;
                }
                Ok(Expression::Nondet)
            }
        }
    }

    /// Evaluates an lvalue to its location
    pub fn lvalue(&mut self, expr: &CExpression) -> Result<Location> {
        self.evaluate(expr)?
            .as_location()
            .ok_or_else(|| Error::unrecognized("assignment to a value that is not an lvalue", expr))
    }

    /// Evaluates `expr` and reads its value
    pub fn rvalue(&mut self, expr: &CExpression) -> Result<Term> {
        let evaluated = self.evaluate(expr)?;
        self.value_of(&evaluated, expr.ty())
    }

    /// Reads the value of an evaluated expression of type `ty`
    ///
    /// Memory cells are read from the current instance of the memory array of
    /// `ty`; arrays and functions decay to their address.
    pub fn value_of(&mut self, expression: &Expression, ty: &CType) -> Result<Term> {
        let ty = self.types().simplify(ty);
        match expression {
            Expression::Value(term) => Ok(term.clone()),
            Expression::Nondet => Ok(self.nondet()),
            Expression::AliasedLocation(address) => {
                if ty.is_array() || ty.is_function() {
                    return Ok(address.clone());
                }
                if !ty.is_scalar() {
                    return Err(Error::unrecognized(
                        format!("value of non-scalar type {} used", ty),
                        expression,
                    ));
                }
                let memory = self.fm().memory_name(&ty);
                let index = self.ssa.get_index(&memory, &ty);
                Ok(self.fm().dereference(&memory, index, address.clone()))
            }
            Expression::UnaliasedLocation(name) => {
                if !ty.is_scalar() {
                    return Err(Error::unrecognized(
                        format!("value of non-scalar type {} used", ty),
                        expression,
                    ));
                }
                if self.pts.is_deferred_pointer(name) {
                    self.used_deferred.entry(name.clone()).or_insert(None);
                }
                let index = self.ssa.get_index(name, &ty);
                Ok(self.fm().variable(name, index))
            }
        }
    }

    /// Truth value of a branch condition
    pub fn condition(&mut self, expr: &CExpression) -> Result<Term> {
        match expr {
            CExpression::Binary { op, lhs, rhs, .. } if op.is_relational() => match op {
                BinaryOp::And => Ok(Term::and2(self.condition(lhs)?, self.condition(rhs)?)),
                BinaryOp::Or => Ok(Term::or2(self.condition(lhs)?, self.condition(rhs)?)),
                _ => {
                    let l = self.rvalue(lhs)?;
                    let r = self.rvalue(rhs)?;
                    Ok(match op {
                        BinaryOp::Eq => Term::eq(l, r),
                        BinaryOp::NotEq => Term::not(Term::eq(l, r)),
                        BinaryOp::Lt => Term::lt(l, r),
                        BinaryOp::Gt => Term::gt(l, r),
                        BinaryOp::LtEq => Term::le(l, r),
                        _ => Term::ge(l, r),
                    })
                }
            },
            CExpression::Unary {
                op: UnaryOp::Not,
                operand,
                ..
            } => Ok(Term::not(self.condition(operand)?)),
            _ => {
                let value = self.rvalue(expr)?;
                Ok(Term::not(Term::eq(value, Term::int(0))))
            }
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &CExpression,
        rhs: &CExpression,
        expr: &CExpression,
    ) -> Result<Expression> {
        if op.is_relational() {
            let condition = self.condition(expr)?;
            return Ok(Expression::Value(Term::ite(
                condition,
                Term::int(1),
                Term::int(0),
            )));
        }
        if op.is_bitwise() {
            // Operands are still read for their side conditions
            self.rvalue(lhs)?;
            self.rvalue(rhs)?;
            trace!(expression = %expr, "bitwise operation approximated as nondet");
            return Ok(Expression::Nondet);
        }

        let l = self.rvalue(lhs)?;
        let r = self.rvalue(rhs)?;
        let lhs_type = self.types().simplify(lhs.ty());
        let rhs_type = self.types().simplify(rhs.ty());
        let lhs_is_pointer = lhs_type.is_pointer() || lhs_type.is_array();
        let rhs_is_pointer = rhs_type.is_pointer() || rhs_type.is_array();

        let value = match op {
            BinaryOp::Add if lhs_is_pointer => Term::add(l, self.scaled(r, &lhs_type)?),
            BinaryOp::Add if rhs_is_pointer => Term::add(r, self.scaled(l, &rhs_type)?),
            BinaryOp::Add => Term::add(l, r),
            BinaryOp::Sub if lhs_is_pointer && rhs_is_pointer => {
                let size = self.pointee_size(&lhs_type)?;
                Term::div(Term::sub(l, r), Term::int(i128::from(size)))
            }
            BinaryOp::Sub if lhs_is_pointer => Term::sub(l, self.scaled(r, &lhs_type)?),
            BinaryOp::Sub => Term::sub(l, r),
            BinaryOp::Mul => Term::mul(l, r),
            BinaryOp::Div => Term::div(l, r),
            BinaryOp::Mod => Term::modulo(l, r),
            _ => {
                return Err(Error::unrecognized(
                    format!("unsupported operator {}", op),
                    expr,
                ))
            }
        };
        Ok(Expression::Value(value))
    }

    fn pointee_size(&self, pointer_type: &CType) -> Result<u64> {
        match pointer_type.pointee() {
            Some(pointee) => self.types().size_of(&pointee),
            None => Ok(1),
        }
    }

    fn scaled(&self, offset: Term, pointer_type: &CType) -> Result<Term> {
        let size = self.pointee_size(pointer_type)?;
        Ok(Term::mul(offset, Term::int(i128::from(size))))
    }

    /// Address designated by `*operand` (or `operand[i]`); `operand` must be a
    /// pointer or an array
    fn dereference_address(&mut self, operand: &CExpression, expr: &CExpression) -> Result<Term> {
        let ty = self.types().simplify(operand.ty());
        if !ty.is_pointer() && !ty.is_array() {
            return Err(Error::InvalidDereference {
                expression: expr.to_string(),
                ty: ty.to_string(),
            });
        }
        let address = self.rvalue(operand)?;
        if ty.is_pointer() && self.options().track_memory_errors {
            self.errors
                .add_invalid_deref(Term::eq(address.clone(), Term::int(0)));
        }
        Ok(address)
    }

    fn function_designator(&self, name: &str) -> Expression {
        if self.options().track_function_pointers {
            Expression::Value(self.fm().base_address(name))
        } else {
            Expression::Nondet
        }
    }

    fn address_of(&mut self, operand: &CExpression, expr: &CExpression) -> Result<Expression> {
        match self.evaluate(operand)? {
            // Fields accessed through memory were recorded by the evaluation
            Expression::AliasedLocation(address) => Ok(Expression::Value(address)),
            Expression::UnaliasedLocation(_) => {
                let (root, root_type) = root_declaration(operand)
                    .ok_or_else(|| Error::unrecognized("address of a non-lvalue", expr))?;
                self.prefill_base(&root, &root_type)?;
                match self.evaluate(operand)? {
                    Expression::AliasedLocation(address) => Ok(Expression::Value(address)),
                    _ => Err(Error::unrecognized(
                        format!("{} could not be moved to memory", root),
                        expr,
                    )),
                }
            }
            designator @ (Expression::Value(_) | Expression::Nondet)
                if operand.ty().is_function() =>
            {
                Ok(designator)
            }
            Expression::Value(_) | Expression::Nondet => {
                Err(Error::unrecognized("address of a non-lvalue", expr))
            }
        }
    }

    /// Moves a plain variable into memory: orders its base and copies the
    /// current values of its leaves into the memory arrays
    fn prefill_base(&mut self, name: &str, ty: &CType) -> Result<()> {
        self.ensure_base(name, ty)?;
        let sharing = self.pts.sharing_constraints(name, ty, &mut self.ssa)?;
        trace!(base = name, "variable moved to memory");
        self.constraints.add(sharing);
        Ok(())
    }

    fn string_literal(&mut self, value: &str, ty: &CType) -> Result<Expression> {
        let base = format!("{}{}", STRING_LITERAL_PREFIX, self.ctx.next_string_literal());
        self.ensure_base(&base, ty)?;
        let address = self.fm().base_address(&base);
        let char_type = CType::char();
        let memory = self.fm().memory_name(&char_type);
        let index = self.ssa.get_index(&memory, &char_type);
        for (offset, byte) in value.bytes().chain(std::iter::once(0)).enumerate() {
            let cell = Term::add(address.clone(), Term::int(offset as i128));
            self.constraints.add(Term::eq(
                self.fm().dereference(&memory, index, cell),
                Term::int(i128::from(byte)),
            ));
        }
        Ok(Expression::AliasedLocation(address))
    }
}

/// Implicit conversion of a value from `from` to `to`
pub(crate) fn convert(value: Term, from: &CType, to: &CType) -> Term {
    if to.is_bool() && !from.is_bool() {
        Term::ite(Term::eq(value, Term::int(0)), Term::int(0), Term::int(1))
    } else {
        value
    }
}

/// Declared variable at the root of an lvalue built from `.` and array subscripts
fn root_declaration(expr: &CExpression) -> Option<(String, CType)> {
    match expr {
        CExpression::Id { name, ty } if !ty.is_function() => Some((name.clone(), ty.clone())),
        CExpression::FieldRef {
            owner,
            is_pointer_deref: false,
            ..
        } => root_declaration(owner),
        CExpression::ArraySubscript { array, .. } if array.ty().is_array() => {
            root_declaration(array)
        }
        CExpression::Cast { operand, .. } => root_declaration(operand),
        _ => None,
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
    fn test_pointer_arithmetic_is_scaled() {
        let ctx = context(TypeTable::lp64(), EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        let p = CExpression::id("p", CType::pointer_to(CType::int()));
        let sum = CExpression::binary(BinaryOp::Add, p, CExpression::int(3), CType::pointer_to(CType::int()));
        let value = enc.rvalue(&sum).unwrap();
        assert_eq!(value.to_string(), "(+ p@1 12)");
    }

    #[test]
    fn test_unaliased_struct_member_is_a_variable() {
        let mut types = TypeTable::lp64();
        let s = types.define(CompositeType::new(
            CompositeKind::Struct,
            "s",
            vec![Member::new("a", CType::int())],
        ));
        let ctx = context(types, EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        let field = CExpression::field(CExpression::id("v", s), "a", CType::int());
        assert_eq!(
            enc.evaluate(&field).unwrap(),
            Expression::UnaliasedLocation("v$a".to_string())
        );
    }

    #[test]
    fn test_dereference_of_integer_is_rejected() {
        let ctx = context(TypeTable::lp64(), EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        let err = enc
            .evaluate(&CExpression::PointerDeref {
                operand: Box::new(CExpression::id("x", CType::int())),
                ty: CType::int(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDereference { .. }));
    }

    #[test]
    fn test_address_of_moves_variable_to_memory() {
        let ctx = context(TypeTable::lp64(), EncoderOptions::default());
        let mut ssa = SsaMap::empty().builder();
        ssa.set_index("x", &CType::int(), 3);
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &ssa.build());

        let address = enc
            .evaluate(&CExpression::address_of(CExpression::id("x", CType::int())))
            .unwrap();
        assert_eq!(
            address,
            Expression::Value(Term::int_var("__ADDRESS_OF_x"))
        );
        assert!(enc.pts().is_actual_base("x"));
        let formula = enc.finish().unwrap().formula.to_string();
        assert!(formula.contains("(< 0 __ADDRESS_OF_x)"));
        assert!(formula.contains("(= (select *int@1 __ADDRESS_OF_x) x@3)"));
    }

    #[test]
    fn test_bitwise_and_is_nondet() {
        let ctx = context(TypeTable::lp64(), EncoderOptions::default());
        let mut enc = EdgeEncoder::new(&ctx, "main", &PointerTargetSet::empty(), &SsaMap::empty());
        let expr = CExpression::binary(
            BinaryOp::BitAnd,
            CExpression::id("x", CType::int()),
            CExpression::int(1),
            CType::int(),
        );
        assert_eq!(enc.evaluate(&expr).unwrap(), Expression::Nondet);
    }
}
