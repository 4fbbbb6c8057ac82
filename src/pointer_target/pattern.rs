//! Patterns over targets affected by a write
//!
//! A pattern is built from the left-hand side of an assignment and describes
//! which known targets the write may touch. Components that cannot be
//! determined statically (a pointer's base, a variable array index) are left
//! open and match anything.

use super::target::PointerTarget;
use crate::encoder::ast::CExpression;
use crate::types::{CType, TypeService};
use std::fmt;

/// Set of targets a write may affect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerTargetPattern {
    /// Any target
    Any,

    /// Any target inside one base
    Base(String),

    /// Targets matching every given component
    Exact {
        /// Base, if known
        base: Option<String>,
        /// Innermost enclosing container, if known (`None` matches anything)
        container_type: Option<CType>,
        /// Offset inside the container, if known
        proper_offset: Option<u64>,
        /// Offset of the container inside the base, if known
        container_offset: Option<u64>,
    },

    /// Targets of one base in the byte range `[start, end)`
    Range {
        /// Base
        base: String,
        /// First byte
        start: u64,
        /// One past the last byte
        end: u64,
    },
}

impl PointerTargetPattern {
    /// Returns true if a write described by this pattern may affect `target`
    pub fn matches(&self, target: &PointerTarget) -> bool {
        match self {
            PointerTargetPattern::Any => true,
            PointerTargetPattern::Base(base) => &target.base == base,
            PointerTargetPattern::Exact {
                base,
                container_type,
                proper_offset,
                container_offset,
            } => {
                base.as_ref().map_or(true, |b| b == &target.base)
                    && container_type
                        .as_ref()
                        .map_or(true, |c| target.container_type.as_ref() == Some(c))
                    && proper_offset.map_or(true, |o| o == target.proper_offset)
                    && container_offset.map_or(true, |o| o == target.container_offset)
            }
            PointerTargetPattern::Range { base, start, end } => {
                &target.base == base && (*start..*end).contains(&target.offset())
            }
        }
    }

    /// Pattern of the targets written through the lvalue `lhs`
    ///
    /// Scalar lvalues give an exact pattern; whole composites and arrays widen
    /// to the byte range they occupy (or the whole base when the range is not
    /// static).
    pub fn for_lvalue(lhs: &CExpression, types: &dyn TypeService) -> PointerTargetPattern {
        let location = locate(lhs, types);
        let ty = types.simplify(lhs.ty());
        if ty.is_scalar() {
            return match location {
                Some(located) => PointerTargetPattern::Exact {
                    base: located.base,
                    container_type: located.container_type,
                    proper_offset: located.proper_offset,
                    container_offset: located.container_offset,
                },
                None => PointerTargetPattern::Any,
            };
        }
        let Some(located) = location else {
            return PointerTargetPattern::Any;
        };
        let Some(base) = located.base else {
            return PointerTargetPattern::Any;
        };
        let start = match (located.container_offset, located.proper_offset) {
            (Some(c), Some(p)) => Some(c + p),
            _ => None,
        };
        match (start, types.size_of(&ty).ok()) {
            (Some(start), Some(size)) if size > 0 => PointerTargetPattern::Range {
                base,
                start,
                end: start + size,
            },
            _ => PointerTargetPattern::Base(base),
        }
    }
}

impl fmt::Display for PointerTargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn part<T: fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map_or_else(|| "_".to_string(), ToString::to_string)
        }
        match self {
            PointerTargetPattern::Any => write!(f, "_"),
            PointerTargetPattern::Base(base) => write!(f, "({} + _)", base),
            PointerTargetPattern::Exact {
                base,
                container_type,
                proper_offset,
                container_offset,
            } => write!(
                f,
                "({} + {} + {} in {})",
                part(base),
                part(container_offset),
                part(proper_offset),
                part(container_type)
            ),
            PointerTargetPattern::Range { base, start, end } => {
                write!(f, "({} + [{}, {}))", base, start, end)
            }
        }
    }
}

/// Statically known position of an lvalue
struct Located {
    base: Option<String>,
    container_type: Option<CType>,
    proper_offset: Option<u64>,
    container_offset: Option<u64>,
}

impl Located {
    fn start(&self) -> Option<u64> {
        Some(self.container_offset? + self.proper_offset?)
    }
}

fn locate(expr: &CExpression, types: &dyn TypeService) -> Option<Located> {
    match expr {
        CExpression::Id { name, ty } if !ty.is_function() => Some(Located {
            base: Some(name.clone()),
            container_type: None,
            proper_offset: Some(0),
            container_offset: Some(0),
        }),
        CExpression::Cast { operand, .. } => locate(operand, types),
        CExpression::FieldRef {
            owner,
            field,
            is_pointer_deref,
            ..
        } => {
            let owner_type = if *is_pointer_deref {
                types.simplify(&owner.ty().pointee()?)
            } else {
                types.simplify(owner.ty())
            };
            let def = types.composite_of(&owner_type)?;
            let offset = types.member_offset(&def, field).ok();
            let container_offset = if *is_pointer_deref {
                None
            } else {
                locate(owner, types).and_then(|o| o.start())
            };
            let base = if *is_pointer_deref {
                None
            } else {
                locate(owner, types).and_then(|o| o.base)
            };
            Some(Located {
                base,
                container_type: Some(owner_type),
                proper_offset: offset,
                container_offset,
            })
        }
        CExpression::ArraySubscript { array, index, .. } => {
            let array_type = types.simplify(array.ty());
            if !array_type.is_array() {
                // Subscript of a pointer: nothing is known about the target
                return Some(Located {
                    base: None,
                    container_type: None,
                    proper_offset: None,
                    container_offset: None,
                });
            }
            let element_size = types.size_of(&array_type.pointee()?).ok()?;
            let outer = locate(array, types);
            let proper_offset = index
                .as_literal()
                .and_then(|i| u64::try_from(i).ok())
                .map(|i| i * element_size);
            Some(Located {
                base: outer.as_ref().and_then(|o| o.base.clone()),
                container_type: Some(array_type),
                proper_offset,
                container_offset: outer.and_then(|o| o.start()),
            })
        }
        CExpression::PointerDeref { .. } => Some(Located {
            base: None,
            container_type: None,
            proper_offset: None,
            container_offset: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompositeKind, CompositeType, Member, TypeTable};

    #[test]
    fn test_constant_subscript_is_exact() {
        let types = TypeTable::lp64();
        let a_ty = CType::array_of(CType::int(), 3);
        let lhs = CExpression::subscript(CExpression::id("a", a_ty.clone()), CExpression::int(1));
        let pattern = PointerTargetPattern::for_lvalue(&lhs, &types);

        assert!(pattern.matches(&PointerTarget::new("a", Some(a_ty.clone()), 4, 0)));
        assert!(!pattern.matches(&PointerTarget::new("a", Some(a_ty.clone()), 8, 0)));
        assert!(!pattern.matches(&PointerTarget::new("b", Some(a_ty), 4, 0)));
    }

    #[test]
    fn test_dereference_matches_everything() {
        let types = TypeTable::lp64();
        let p = CExpression::id("p", CType::pointer_to(CType::int()));
        let pattern = PointerTargetPattern::for_lvalue(&CExpression::deref(p), &types);
        assert!(pattern.matches(&PointerTarget::new("x", None, 0, 0)));
        assert!(pattern.matches(&PointerTarget::new(
            "a",
            Some(CType::array_of(CType::int(), 2)),
            4,
            0
        )));
    }

    #[test]
    fn test_arrow_fixes_container_and_offset() {
        let mut types = TypeTable::lp64();
        let s = types.define(CompositeType::new(
            CompositeKind::Struct,
            "s",
            vec![Member::new("a", CType::int()), Member::new("b", CType::int())],
        ));
        let p = CExpression::id("p", CType::pointer_to(s.clone()));
        let lhs = CExpression::arrow(p, "b", CType::int());
        let pattern = PointerTargetPattern::for_lvalue(&lhs, &types);
        assert!(pattern.matches(&PointerTarget::new("m", Some(s.clone()), 4, 16)));
        assert!(!pattern.matches(&PointerTarget::new("m", Some(s), 0, 16)));
    }

    #[test]
    fn test_whole_struct_widens_to_range() {
        let mut types = TypeTable::lp64();
        let s = types.define(CompositeType::new(
            CompositeKind::Struct,
            "pair",
            vec![Member::new("a", CType::int()), Member::new("b", CType::long())],
        ));
        let pattern = PointerTargetPattern::for_lvalue(&CExpression::id("v", s), &types);
        assert_eq!(
            pattern,
            PointerTargetPattern::Range {
                base: "v".to_string(),
                start: 0,
                end: 16
            }
        );
        assert!(pattern.matches(&PointerTarget::new("v", None, 8, 0)));
        assert!(!pattern.matches(&PointerTarget::new("v", None, 16, 0)));
    }
}
