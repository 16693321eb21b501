use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use commp_core::Engine;

#[inline]
fn det_vec(n: usize, seed: u64) -> Vec<u8> {
    // LCG keeps the fixture deterministic without pulling rand into benches.
    let mut a = 1_664_525u64.wrapping_mul(seed).wrapping_add(1_013_904_223);
    (0..n)
        .map(|i| {
            a = a.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (a ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)) as u8
        })
        .collect()
}

fn bench_commp(c: &mut Criterion) {
    let mut group = c.benchmark_group("commp_stream");
    for &mib in &[1usize, 8usize] {
        let n = mib << 20;
        let data = det_vec(n, 2024);
        group.throughput(Throughput::Bytes(n as u64));

        group.bench_function(BenchmarkId::new("sync", format!("{mib}MiB")), |b| {
            b.iter(|| {
                let mut engine = Engine::new();
                engine.append_bytes(black_box(&data)).unwrap();
                black_box(engine.finalize().unwrap())
            })
        });

        group.bench_function(BenchmarkId::new("pipelined", format!("{mib}MiB")), |b| {
            b.iter(|| {
                let mut engine = Engine::pipelined();
                engine.append_bytes(black_box(&data)).unwrap();
                black_box(engine.finalize().unwrap())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_commp);
criterion_main!(benches);
