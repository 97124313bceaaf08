// benches/solver_benchmark.rs

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::{Array1, Array2};
use ndarray_linalg::QR;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use ojob::{CovarianceSet, Ojob, OjobConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn synthetic_two_group(n: usize, k: usize) -> CovarianceSet<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let a = Array2::random_using((n, n), Uniform::new(-1.0, 1.0), &mut rng);
    let (q, _r) = a.qr().unwrap();
    CovarianceSet::from_fn(k, &[n, n], |kappa, i, j| {
        let spectrum: Vec<f64> = (0..n)
            .map(|eta| {
                if i == j {
                    (eta + 1) as f64
                } else {
                    (n - eta) as f64 * (1.0 + 0.05 * kappa as f64)
                }
            })
            .collect();
        let d = Array2::from_diag(&Array1::from(spectrum));
        q.dot(&d).dot(&q.t())
    })
    .unwrap()
}

fn bench_fit(c: &mut Criterion) {
    let cov = synthetic_two_group(16, 8);
    let config = OjobConfig::default();
    c.bench_function("ojob_fit_m2_k8_n16", |b| {
        b.iter(|| Ojob::fit(black_box(&cov), black_box(&config)).unwrap())
    });

    let two_group = synthetic_two_group(16, 8);
    let single = CovarianceSet::from_trials(
        (0..8).map(|kappa| two_group.get(kappa, 0, 1).clone()).collect(),
    )
    .unwrap();
    c.bench_function("ojob_fit_m1_k8_n16", |b| {
        b.iter(|| Ojob::fit(black_box(&single), black_box(&config)).unwrap())
    });
}

criterion_group!(benches, bench_fit);
criterion_main!(benches);
