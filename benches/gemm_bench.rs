use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};

use distlu::gemm;

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Vec<f64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..rows * cols).map(|_| rng.gen::<f64>()).collect()
}

fn bench_gemm_serial(c: &mut Criterion) {
    let mut group = c.benchmark_group("gemm_serial");
    for &n in &[64usize, 128, 256] {
        let a = random_matrix(n, n, 1);
        let b = random_matrix(n, n, 2);
        let mut out = vec![0.0; n * n];
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bencher, &n| {
            bencher.iter(|| {
                gemm::gemm(
                    n,
                    n,
                    n,
                    1.0,
                    black_box(&a),
                    n,
                    black_box(&b),
                    n,
                    0.0,
                    &mut out,
                    n,
                );
            });
        });
    }
    group.finish();
}

fn bench_gemm_parallel(c: &mut Criterion) {
    let pool = rayon::ThreadPoolBuilder::new().build().unwrap();
    let mut group = c.benchmark_group("gemm_parallel");
    for &n in &[256usize, 512] {
        let a = random_matrix(n, n, 3);
        let b = random_matrix(n, n, 4);
        let mut out = vec![0.0; n * n];
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bencher, &n| {
            bencher.iter(|| {
                gemm::gemm_parallel(
                    &pool,
                    n,
                    n,
                    n,
                    1.0,
                    black_box(&a),
                    n,
                    black_box(&b),
                    n,
                    0.0,
                    &mut out,
                    n,
                );
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gemm_serial, bench_gemm_parallel);
criterion_main!(benches);
