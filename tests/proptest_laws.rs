//! Property-based tests for the term layer and the encoder
//!
//! These tests use proptest to check that:
//! 1. Term simplification never changes the meaning of a formula
//! 2. Array initializers produce exactly the stores their values describe
//! 3. Merging keeps every base of both branches, regardless of order

use heapalias::encoder::{CExpression, CfaEdge, Initializer};
use heapalias::smt::{Model, Value};
use heapalias::types::{CType, TypeTable};
use heapalias::{EncoderOptions, PathFormula, PointerAliasingEncoder, Term};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

/// Boolean leaves: constants and a handful of variables
fn bool_leaf() -> impl Strategy<Value = Term> {
    prop_oneof![
        Just(Term::tt()),
        Just(Term::ff()),
        (0usize..4).prop_map(|i| Term::bool_var(format!("b{}", i))),
    ]
}

/// Nested conjunctions, disjunctions and negations
fn bool_term() -> impl Strategy<Value = Term> {
    bool_leaf().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Term::and),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Term::or),
            inner.clone().prop_map(Term::not),
            (inner.clone(), inner).prop_map(|(a, b)| Term::implies(a, b)),
        ]
    })
}

/// Truth value of `term` when `b<i>` is `assignment[i]`
fn reference(term: &Term, assignment: &[bool; 4]) -> bool {
    let mut model = Model::new();
    for (i, value) in assignment.iter().enumerate() {
        model.set_bool(format!("b{}", i), *value);
    }
    model.eval_bool(term).unwrap()
}

fn encoder() -> PointerAliasingEncoder {
    PointerAliasingEncoder::new(Arc::new(TypeTable::lp64()), EncoderOptions::default()).unwrap()
}

fn declare_initialized(name: &str, values: &[i128]) -> CfaEdge {
    CfaEdge::declare(
        "main",
        name,
        CType::array_of(CType::int(), values.len() as u64),
        Some(Initializer::List(
            values
                .iter()
                .map(|v| Initializer::Expression(CExpression::int(*v)))
                .collect(),
        )),
    )
}

// =============================================================================
// TERM LAWS
// =============================================================================

proptest! {
    #[test]
    fn test_conjunction_matches_all(
        terms in prop::collection::vec(bool_term(), 0..5),
        assignment in any::<[bool; 4]>(),
    ) {
        let expected = terms.iter().all(|t| reference(t, &assignment));
        let conjunction = Term::and(terms);
        prop_assert_eq!(reference(&conjunction, &assignment), expected);
    }

    #[test]
    fn test_disjunction_matches_any(
        terms in prop::collection::vec(bool_term(), 0..5),
        assignment in any::<[bool; 4]>(),
    ) {
        let expected = terms.iter().any(|t| reference(t, &assignment));
        let disjunction = Term::or(terms);
        prop_assert_eq!(reference(&disjunction, &assignment), expected);
    }

    #[test]
    fn test_select_over_store(
        written in -64i128..64,
        read in -64i128..64,
        value in any::<i32>(),
        background in any::<i32>(),
    ) {
        let memory = Term::array_var("m");
        let term = Term::select(
            Term::store(memory, Term::int_var("w"), Term::int(value)),
            Term::int_var("r"),
        );
        let mut model = Model::new();
        model
            .set_int("w", written)
            .set_int("r", read)
            .set_array("m", Value::constant_array(background.into()));
        let expected = if written == read { value } else { background };
        prop_assert_eq!(model.eval_int(&term).unwrap(), i128::from(expected));
    }
}

// =============================================================================
// ENCODER LAWS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_initializer_stores_every_element(
        values in prop::collection::vec(-1000i128..1000, 1..12),
        tampered in any::<prop::sample::Index>(),
    ) {
        let (path, _) = encoder()
            .make_and(&PathFormula::empty(), &declare_initialized("a", &values))
            .unwrap();
        prop_assert_eq!(path.pts().targets("int").len(), values.len());
        prop_assert_eq!(path.ssa().get_index("*int"), Some(2));

        let base = 1024i128;
        let mut entries: BTreeMap<i128, i128> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (base + 4 * i as i128, *v))
            .collect();
        let mut model = Model::new();
        model
            .set_int("__ADDRESS_OF_a", base)
            .set_array("*int@2", Value::Array { default: 0, entries: entries.clone() });
        prop_assert!(model.eval_bool(path.formula()).unwrap());

        let cell = base + 4 * tampered.index(values.len()) as i128;
        if let Some(v) = entries.get_mut(&cell) {
            *v += 1;
        }
        model.set_array("*int@2", Value::Array { default: 0, entries });
        prop_assert!(!model.eval_bool(path.formula()).unwrap());
    }

    #[test]
    fn test_merge_keeps_all_bases(
        left_len in 1u64..6,
        right_len in 1u64..6,
    ) {
        let encoder = encoder();
        let root = PathFormula::empty();
        let branch = |name: &str, len: u64| {
            let values: Vec<i128> = (0..len as i128).collect();
            encoder
                .make_and(&root, &declare_initialized(name, &values))
                .unwrap()
                .0
        };
        let left = branch("a", left_len);
        let right = branch("b", right_len);

        let forward = encoder.merge(&left, &right).unwrap();
        let backward = encoder.merge(&right, &left).unwrap();
        for merged in [&forward, &backward] {
            prop_assert!(merged.pts().is_base("a"));
            prop_assert!(merged.pts().is_base("b"));
            prop_assert_eq!(
                merged.pts().targets("int").len() as u64,
                left_len + right_len
            );
        }
        let forward_bases: Vec<_> = forward.pts().bases().keys().cloned().collect();
        let backward_bases: Vec<_> = backward.pts().bases().keys().cloned().collect();
        prop_assert_eq!(forward_bases.len(), backward_bases.len());
    }
}
