use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use heapalias::encoder::{CExpression, CfaEdge, Initializer};
use heapalias::types::{CType, TypeTable};
use heapalias::{EncoderOptions, PathFormula, PointerAliasingEncoder};
use std::sync::Arc;

fn encoder(options: EncoderOptions) -> PointerAliasingEncoder {
    PointerAliasingEncoder::new(Arc::new(TypeTable::lp64()), options).unwrap()
}

fn run(encoder: &PointerAliasingEncoder, start: &PathFormula, edges: &[CfaEdge]) -> PathFormula {
    edges.iter().fold(start.clone(), |path, edge| {
        encoder.make_and(&path, edge).unwrap().0
    })
}

/// `int <prefix>0[len] = {...}; int <prefix>1[len] = {...}; ...`
fn arrays(prefix: &str, count: usize, len: u64) -> Vec<CfaEdge> {
    (0..count)
        .map(|i| {
            CfaEdge::declare(
                "main",
                format!("{}{}", prefix, i),
                CType::array_of(CType::int(), len),
                Some(Initializer::List(
                    (0..len as i128)
                        .map(|v| Initializer::Expression(CExpression::int(v)))
                        .collect(),
                )),
            )
        })
        .collect()
}

/// Merging branches that declared disjoint sets of arrays
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_disjoint_branches");
    let encoder = encoder(EncoderOptions::default());
    let root = PathFormula::empty();

    for count in [1, 8, 32].iter() {
        let left = run(&encoder, &root, &arrays("a", *count, 4));
        let right = run(&encoder, &root, &arrays("b", *count, 4));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| black_box(encoder.merge(&left, &right).unwrap()))
        });
    }

    group.finish();
}

/// Writes through a pointer against a growing number of targets
fn bench_heap_encodings(c: &mut Criterion) {
    let mut group = c.benchmark_group("pointer_write");
    let int_ptr = CType::pointer_to(CType::int());
    let write = CfaEdge::assign(
        "main",
        CExpression::deref(CExpression::id("p", int_ptr)),
        CExpression::int(1),
    );

    for (label, use_arrays) in [("arrays", true), ("uninterpreted", false)] {
        let encoder = encoder(EncoderOptions {
            use_arrays_for_heap: use_arrays,
            ..EncoderOptions::default()
        });
        for len in [16u64, 64].iter() {
            let path = run(&encoder, &PathFormula::empty(), &arrays("a", 1, *len));
            group.bench_with_input(BenchmarkId::new(label, len), len, |b, _| {
                b.iter(|| black_box(encoder.make_and(&path, &write).unwrap()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_merge, bench_heap_encodings);
criterion_main!(benches);
