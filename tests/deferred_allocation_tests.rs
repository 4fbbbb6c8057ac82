//! Typing of allocations whose type is not known at the allocation site

use anyhow::Context;
use heapalias::encoder::{CExpression, CfaEdge, EdgeKind, Initializer};
use heapalias::types::{CType, TypeTable};
use heapalias::{EncoderOptions, PathFormula, PointerAliasingEncoder};
use std::sync::Arc;

fn encoder() -> PointerAliasingEncoder {
    PointerAliasingEncoder::new(Arc::new(TypeTable::lp64()), EncoderOptions::default()).unwrap()
}

fn run(encoder: &PointerAliasingEncoder, start: &PathFormula, edges: &[CfaEdge]) -> PathFormula {
    edges.iter().fold(start.clone(), |path, edge| {
        encoder.make_and(&path, edge).unwrap().0
    })
}

fn declare(name: &str, ty: CType, init: CExpression) -> CfaEdge {
    CfaEdge::declare("main", name, ty, Some(Initializer::Expression(init)))
}

fn malloc(bytes: i128) -> CExpression {
    CExpression::call("malloc", vec![CExpression::int(bytes)], CType::void_pointer())
}

fn void_ptr(name: &str) -> CExpression {
    CExpression::id(name, CType::void_pointer())
}

const BASE: &str = "main::__alloc#1";

// ====================
// Resolution
// ====================

#[test]
fn test_sizeof_types_the_allocation_immediately() {
    let int_ptr = CType::pointer_to(CType::int());
    let path = run(
        &encoder(),
        &PathFormula::empty(),
        &[declare(
            "p",
            int_ptr,
            CExpression::call(
                "calloc",
                vec![CExpression::int(4), CExpression::sizeof(CType::int())],
                CType::void_pointer(),
            ),
        )],
    );
    assert_eq!(path.pts().base_type(BASE), Some(&CType::array_of(CType::int(), 4)));
    assert_eq!(path.pts().deferred_pointers().count(), 0);
}

#[test]
fn test_typed_alias_resolves_the_pool() {
    let int_ptr = CType::pointer_to(CType::int());
    let path = run(
        &encoder(),
        &PathFormula::empty(),
        &[
            declare("p", CType::void_pointer(), malloc(8)),
            declare("q", int_ptr, void_ptr("p")),
        ],
    );
    assert_eq!(path.pts().base_type(BASE), Some(&CType::array_of(CType::int(), 2)));
    assert!(path.pts().deferred_allocation("p").is_none());
}

#[test]
fn test_cast_reveals_the_type() {
    let long_ptr = CType::pointer_to(CType::long());
    let path = run(
        &encoder(),
        &PathFormula::empty(),
        &[
            declare("p", CType::void_pointer(), malloc(16)),
            declare(
                "q",
                long_ptr.clone(),
                CExpression::cast(void_ptr("p"), long_ptr),
            ),
        ],
    );
    assert_eq!(path.pts().base_type(BASE), Some(&CType::array_of(CType::long(), 2)));
}

#[test]
fn test_untyped_alias_keeps_the_pool_alive() {
    let int_ptr = CType::pointer_to(CType::int());
    let encoder = encoder();
    let path = run(
        &encoder,
        &PathFormula::empty(),
        &[
            declare("p", CType::void_pointer(), malloc(4)),
            declare("r", CType::void_pointer(), void_ptr("p")),
            CfaEdge::assign("main", void_ptr("p"), CExpression::int(0)),
        ],
    );
    assert!(!path.pts().is_base(BASE));
    assert!(path.pts().deferred_allocation("p").is_none());
    let pool = path.pts().deferred_allocation("r").unwrap();
    assert!(pool.bases().contains(BASE));

    let path = run(&encoder, &path, &[declare("q", int_ptr, void_ptr("r"))]);
    assert_eq!(path.pts().base_type(BASE), Some(&CType::int()));
}

#[test]
fn test_revealing_return_type_resolves() {
    let int_ptr = CType::pointer_to(CType::int());
    let path = run(
        &encoder(),
        &PathFormula::empty(),
        &[
            declare("p", CType::void_pointer(), malloc(8)),
            CfaEdge::new(
                "main",
                EdgeKind::Return {
                    value: Some(void_ptr("p")),
                    return_type: int_ptr,
                },
            ),
        ],
    );
    assert_eq!(path.pts().base_type(BASE), Some(&CType::array_of(CType::int(), 2)));
    assert!(path.ssa().get_index("main::__retval__").is_some());
}

// ====================
// Escapes
// ====================

#[test]
fn test_unknown_callee_makes_the_pool_escape() {
    let path = run(
        &encoder(),
        &PathFormula::empty(),
        &[
            declare("p", CType::void_pointer(), malloc(16)),
            CfaEdge::call("main", None, "consume", vec![void_ptr("p")], CType::Void),
        ],
    );
    assert_eq!(path.pts().base_type(BASE), Some(&CType::array_of(CType::char(), 16)));
    assert_eq!(path.pts().targets("char").len(), 16);
}

#[test]
fn test_untyped_return_makes_the_pool_escape() {
    let path = run(
        &encoder(),
        &PathFormula::empty(),
        &[
            declare("p", CType::void_pointer(), malloc(3)),
            CfaEdge::new(
                "main",
                EdgeKind::Return {
                    value: Some(void_ptr("p")),
                    return_type: CType::void_pointer(),
                },
            ),
        ],
    );
    assert_eq!(path.pts().base_type(BASE), Some(&CType::array_of(CType::char(), 3)));
}

#[test]
fn test_arithmetic_use_escapes_at_function_exit() {
    let encoder = encoder();
    let path = run(
        &encoder,
        &PathFormula::empty(),
        &[
            declare("p", CType::void_pointer(), malloc(8)),
            declare("x", CType::long(), CExpression::cast(void_ptr("p"), CType::long())),
        ],
    );
    // Converting to an integer reveals nothing
    assert!(path.pts().deferred_allocation("p").is_some());

    let path = run(
        &encoder,
        &path,
        &[CfaEdge::new(
            "main",
            EdgeKind::FunctionExit {
                locals: vec!["p".to_string(), "x".to_string()],
            },
        )],
    );
    assert_eq!(path.pts().base_type(BASE), Some(&CType::array_of(CType::char(), 8)));
}

#[test]
fn test_overwritten_pool_is_dropped() {
    let path = run(
        &encoder(),
        &PathFormula::empty(),
        &[
            declare("p", CType::void_pointer(), malloc(8)),
            CfaEdge::assign("main", void_ptr("p"), CExpression::int(0)),
        ],
    );
    assert!(!path.pts().is_base(BASE));
    assert_eq!(path.pts().deferred_pointers().count(), 0);
    // The allocation still consumed its site index
    assert_eq!(path.ssa().get_index("main::__alloc"), Some(1));
}

// ====================
// Merging
// ====================

#[test]
fn test_pools_sharing_a_pointer_coalesce_at_merge() -> anyhow::Result<()> {
    let encoder = encoder();
    let root = run(
        &encoder,
        &PathFormula::empty(),
        &[CfaEdge::declare("main", "p", CType::void_pointer(), None)],
    );
    let left = run(
        &encoder,
        &root,
        &[
            CfaEdge::assign("main", void_ptr("p"), malloc(4)),
            CfaEdge::assign("main", void_ptr("p"), malloc(8)),
        ],
    );
    let right = run(
        &encoder,
        &root,
        &[CfaEdge::assign("main", void_ptr("p"), malloc(8))],
    );
    let left_pool = left
        .pts()
        .deferred_allocation("p")
        .context("left branch lost its pool")?;
    assert!(left_pool.bases().contains("main::__alloc#2"));

    let merged = encoder.merge(&left, &right)?;
    let pool = merged
        .pts()
        .deferred_allocation("p")
        .context("merged path lost the pool")?;
    assert_eq!(pool.bases().len(), 2);
    assert_eq!(pool.size(), Some(8));

    let int_ptr = CType::pointer_to(CType::int());
    let path = run(&encoder, &merged, &[declare("q", int_ptr, void_ptr("p"))]);
    let int_pair = CType::array_of(CType::int(), 2);
    assert_eq!(path.pts().base_type("main::__alloc#1"), Some(&int_pair));
    assert_eq!(path.pts().base_type("main::__alloc#2"), Some(&int_pair));
    Ok(())
}
