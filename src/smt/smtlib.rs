//! SMT-LIB script export
//!
//! Renders a set of assertions as a self-contained SMT-LIB 2 script (for
//! external solver invocation): logic, declarations of every free symbol,
//! assertions and `(check-sat)`.

use super::term::{symbol, Sort, Term};
use std::collections::BTreeMap;

/// Export assertions as an SMT-LIB script
pub fn to_smtlib(assertions: &[Term]) -> String {
    let mut constants: BTreeMap<String, Sort> = BTreeMap::new();
    let mut functions: BTreeMap<String, usize> = BTreeMap::new();
    let mut quantified = false;
    for assertion in assertions {
        constants.extend(assertion.free_variables());
        functions.extend(assertion.functions());
        quantified |= assertion.any(&|t| matches!(t, Term::ForAll { .. }));
    }

    let mut smt = String::new();
    smt.push_str("; heapalias pointer-aliasing encoding\n");
    if quantified {
        smt.push_str("(set-logic AUFLIA)\n\n");
    } else {
        smt.push_str("(set-logic QF_AUFLIA)\n\n");
    }

    for (name, sort) in &constants {
        smt.push_str(&format!("(declare-const {} {})\n", symbol(name), sort));
    }
    for (name, arity) in &functions {
        let params = vec!["Int"; *arity].join(" ");
        smt.push_str(&format!("(declare-fun {} ({}) Int)\n", symbol(name), params));
    }
    smt.push('\n');

    for assertion in assertions {
        if assertion.is_true() {
            continue;
        }
        smt.push_str(&format!("(assert {})\n", assertion));
    }
    smt.push_str("(check-sat)\n");
    smt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtlib_output() {
        let base = Term::int_var("__ADDRESS_OF_a");
        let write = Term::eq(
            Term::array_var("*int@2"),
            Term::store(Term::array_var("*int@1"), base.clone(), Term::int(5)),
        );
        let order = Term::gt(base, Term::int(0));
        let smt = to_smtlib(&[write, order, Term::tt()]);

        assert!(smt.contains("(set-logic QF_AUFLIA)"));
        assert!(smt.contains("(declare-const *int@1 (Array Int Int))"));
        assert!(smt.contains("(declare-const __ADDRESS_OF_a Int)"));
        assert!(smt.contains("(assert (< 0 __ADDRESS_OF_a))"));
        assert_eq!(smt.matches("(assert").count(), 2);
        assert!(smt.ends_with("(check-sat)\n"));
    }

    #[test]
    fn test_uninterpreted_heap_declarations() {
        let read = Term::eq(Term::app("*int@1", vec![Term::int(8)]), Term::int(1));
        let smt = to_smtlib(&[read]);
        assert!(smt.contains("(declare-fun *int@1 (Int) Int)"));
    }
}
