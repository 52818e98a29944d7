//! Micro-benchmarks for the share algebra and the extension marshaling path

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::thread_rng;
use spdz_runtime::{
    algebra::{FieldElement, Ring64, Share},
    ext::ExtBuffer,
    marshal::{element_words, export_shares, import_shares, ShareLayout, WORD_BYTES},
};
use std::hint::black_box;

/// Throughput of the linear share combination the processor performs per
/// affine opcode
pub fn share_linear_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("share_linear_ops");
    let mut rng = thread_rng();

    for batch in [1_000, 10_000, 100_000] {
        let lhs: Vec<Share<Ring64>> = (0..batch)
            .map(|_| Share::new(Ring64::random(&mut rng), Ring64::random(&mut rng)))
            .collect();
        let rhs = lhs.clone();
        let scalar = Ring64::random(&mut rng);

        group.throughput(Throughput::Elements(batch as u64));
        group.bench_function(BenchmarkId::from_parameter(batch), |b| {
            b.iter(|| {
                for (l, r) in lhs.iter().zip(rhs.iter()) {
                    black_box(l + r * scalar);
                }
            })
        });
    }
}

/// Round-trip cost of marshaling a share batch through an extension buffer
pub fn marshal_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal_round_trip");
    let mut rng = thread_rng();
    let layout = ShareLayout::Replicated;
    let share_bytes = layout.share_bytes(element_words::<Ring64>());

    for batch in [1_000, 10_000, 100_000] {
        let shares: Vec<Share<Ring64>> = (0..batch)
            .map(|_| Share::new(Ring64::random(&mut rng), Ring64::random(&mut rng)))
            .collect();
        let mut buf = ExtBuffer::new();
        buf.ensure_capacity(batch, share_bytes);

        group.throughput(Throughput::Bytes((batch * share_bytes) as u64));
        group.bench_function(BenchmarkId::from_parameter(batch), |b| {
            b.iter(|| {
                export_shares(&shares, &mut buf, layout).unwrap();
                black_box(import_shares::<Ring64>(&buf, Ring64(0), layout).unwrap());
            })
        });
    }
}

/// Reuse behavior of the high-water-mark buffer under shrinking batches
pub fn buffer_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_reuse");
    let word = WORD_BYTES;

    group.bench_function("alternating_batch_sizes", |b| {
        let mut buf = ExtBuffer::new();
        b.iter(|| {
            for count in [1024usize, 16, 512, 64] {
                buf.ensure_capacity(count, 2 * word);
                black_box(buf.as_mut_slice());
            }
        })
    });
}

criterion_group!(benches, share_linear_ops, marshal_round_trip, buffer_reuse);
criterion_main!(benches);
