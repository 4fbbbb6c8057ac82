//! Path formula construction
//!
//! [`PointerAliasingEncoder`] extends a [`PathFormula`] edge by edge and joins
//! two path formulas at control-flow merge points.

use super::ast::{CExpression, CfaEdge, EdgeKind};
use super::constraints::ErrorConditions;
use super::context::{EdgeEncoder, EncoderContext};
use crate::config::EncoderOptions;
use crate::pointer_target::PointerTargetSet;
use crate::shutdown::ShutdownNotifier;
use crate::smt::{to_smtlib, Term};
use crate::ssa::SsaMap;
use crate::types::TypeService;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Constraint of a program path together with the state it ends in
#[derive(Debug, Clone, PartialEq)]
pub struct PathFormula {
    formula: Term,
    ssa: SsaMap,
    pts: PointerTargetSet,
    length: usize,
}

impl PathFormula {
    /// Formula of the empty path
    pub fn empty() -> Self {
        Self {
            formula: Term::tt(),
            ssa: SsaMap::empty(),
            pts: PointerTargetSet::empty(),
            length: 0,
        }
    }

    /// Path constraint
    pub fn formula(&self) -> &Term {
        &self.formula
    }

    /// Current SSA indices
    pub fn ssa(&self) -> &SsaMap {
        &self.ssa
    }

    /// Memory model at the end of the path
    pub fn pts(&self) -> &PointerTargetSet {
        &self.pts
    }

    /// Number of edges encoded
    pub fn length(&self) -> usize {
        self.length
    }

    /// The path constraint as an SMT-LIB script
    pub fn to_smtlib(&self) -> String {
        to_smtlib(std::slice::from_ref(&self.formula))
    }
}

impl Default for PathFormula {
    fn default() -> Self {
        Self::empty()
    }
}

/// Heap-aware path formula encoder
#[derive(Debug)]
pub struct PointerAliasingEncoder {
    ctx: EncoderContext,
}

impl PointerAliasingEncoder {
    /// Creates an encoder; fails on invalid options
    pub fn new(types: Arc<dyn TypeService>, options: EncoderOptions) -> Result<Self> {
        Self::with_shutdown(types, options, ShutdownNotifier::new())
    }

    /// Creates an encoder that stops when `shutdown` is triggered
    pub fn with_shutdown(
        types: Arc<dyn TypeService>,
        options: EncoderOptions,
        shutdown: ShutdownNotifier,
    ) -> Result<Self> {
        Ok(Self {
            ctx: EncoderContext::new(types, options, shutdown)?,
        })
    }

    /// Declares the variables whose address is taken somewhere in the program
    pub fn with_addressed_variables(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.ctx.set_addressed_variables(names);
        self
    }

    /// Shared services
    pub fn context(&self) -> &EncoderContext {
        &self.ctx
    }

    /// Extends `path` by `edge`
    ///
    /// Returns the extended path formula and the memory-safety conditions the
    /// edge raised.
    pub fn make_and(
        &self,
        path: &PathFormula,
        edge: &CfaEdge,
    ) -> Result<(PathFormula, ErrorConditions)> {
        self.ctx.shutdown().check()?;
        let mut encoder = EdgeEncoder::new(&self.ctx, edge.function.as_str(), &path.pts, &path.ssa);
        match &edge.kind {
            EdgeKind::Blank => {}
            EdgeKind::Declaration(decl) => encoder.declaration(decl)?,
            EdgeKind::Assignment { lhs, rhs } => match rhs.strip_casts() {
                CExpression::FunctionCall { function, args, ty } => {
                    encoder.call(Some(lhs), function, args, ty)?
                }
                _ => encoder.assign_expression(lhs, rhs, false)?,
            },
            EdgeKind::Call {
                lhs,
                function,
                args,
                return_type,
            } => encoder.call(lhs.as_ref(), function, args, return_type)?,
            EdgeKind::Assume { condition, truth } => {
                let condition = encoder.condition(condition)?;
                encoder.add_constraint(if *truth {
                    condition
                } else {
                    Term::not(condition)
                });
            }
            EdgeKind::Return { value, return_type } => {
                encoder.return_statement(value.as_ref(), return_type)?
            }
            EdgeKind::FunctionExit { locals } => encoder.function_exit(locals)?,
        }
        let encoding = encoder.finish()?;
        trace!(edge = %edge, formula = %encoding.formula, "edge encoded");
        Ok((
            PathFormula {
                formula: Term::and2(path.formula.clone(), encoding.formula),
                ssa: encoding.ssa,
                pts: encoding.pts,
                length: path.length + 1,
            },
            encoding.errors,
        ))
    }

    /// Joins two path formulas reaching the same program location
    ///
    /// The result is `(F1 ∧ I1 ∧ E1) ∨ (F2 ∧ I2 ∧ E2) ∧ M` where `I` are the
    /// imports of bases known on one side only, `E` the SSA equalities and `M`
    /// the constraints of the merged memory model.
    pub fn merge(&self, first: &PathFormula, second: &PathFormula) -> Result<PathFormula> {
        if first == second {
            return Ok(first.clone());
        }
        let fm = self.ctx.fm();
        let (ssa, lift_first, lift_second) =
            if fm.uses_arrays() || self.ctx.options().use_quantifiers_on_arrays {
                SsaMap::merge(&first.ssa, &second.ssa, fm)
            } else {
                // Quantifier-free: equate the lagging instance at every known target
                SsaMap::merge_with(&first.ssa, &second.ssa, fm, |memory, to, from| {
                    let type_name = memory.trim_start_matches('*');
                    let mut seen = HashSet::new();
                    let addresses = first
                        .pts
                        .targets(type_name)
                        .into_iter()
                        .chain(second.pts.targets(type_name))
                        .map(|target| target.address(fm))
                        .filter(|address| seen.insert(address.clone()))
                        .collect::<Vec<_>>();
                    fm.memory_equality_at(memory, to, from, addresses)
                })
            };
        let merged = self.ctx.manager().merge(&first.pts, &second.pts, &ssa)?;
        let formula = Term::and2(
            Term::or2(
                Term::and([first.formula.clone(), merged.import_first, lift_first]),
                Term::and([second.formula.clone(), merged.import_second, lift_second]),
            ),
            merged.merge_formula,
        );
        debug!(
            bases = merged.pts.bases().len(),
            targets = merged.pts.target_count(),
            "path formulas merged"
        );
        Ok(PathFormula {
            formula,
            ssa: merged.ssa,
            pts: merged.pts,
            length: first.length.max(second.length),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CType, TypeTable};

    fn encoder() -> PointerAliasingEncoder {
        PointerAliasingEncoder::new(Arc::new(TypeTable::lp64()), EncoderOptions::default())
            .unwrap()
    }

    #[test]
    fn test_edges_extend_the_path() {
        let enc = encoder();
        let x = CExpression::id("x", CType::int());
        let (path, errors) = enc
            .make_and(
                &PathFormula::empty(),
                &CfaEdge::assign("main", x.clone(), CExpression::int(3)),
            )
            .unwrap();
        assert!(errors.is_empty());
        let (path, _) = enc
            .make_and(
                &path,
                &CfaEdge::new(
                    "main",
                    EdgeKind::Assume {
                        condition: CExpression::binary(
                            crate::encoder::ast::BinaryOp::Lt,
                            x,
                            CExpression::int(5),
                            CType::int(),
                        ),
                        truth: false,
                    },
                ),
            )
            .unwrap();
        assert_eq!(path.length(), 2);
        assert_eq!(path.formula().to_string(), "(and (= x@1 3) (not (< x@1 5)))");
    }

    #[test]
    fn test_merge_of_equal_paths_is_identity() {
        let enc = encoder();
        let (path, _) = enc
            .make_and(
                &PathFormula::empty(),
                &CfaEdge::declare("main", "a", CType::array_of(CType::int(), 2), None),
            )
            .unwrap();
        assert_eq!(enc.merge(&path, &path).unwrap(), path);
    }

    #[test]
    fn test_cancelled_encoder_stops() {
        let shutdown = ShutdownNotifier::new();
        let enc = PointerAliasingEncoder::with_shutdown(
            Arc::new(TypeTable::lp64()),
            EncoderOptions::default(),
            shutdown.clone(),
        )
        .unwrap();
        shutdown.request_shutdown("timeout");
        let err = enc
            .make_and(&PathFormula::empty(), &CfaEdge::new("main", EdgeKind::Blank))
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}
