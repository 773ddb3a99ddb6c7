//! Shared fixtures for the module tests: small seeded synthetic datasets.

use crate::Real;
use crate::instance::Instance;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// standard normal via Box-Muller
pub fn gauss(rng: &mut StdRng) -> Real {
    let u1: Real = rng.random::<Real>().max(1e-12);
    let u2: Real = rng.random::<Real>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// `n` points spread evenly over `k` well-separated 2-D Gaussian blobs;
/// returns the rows and their ground-truth blob labels
pub fn blobs(n: usize, k: usize, seed: u64) -> (Vec<Instance>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut instances = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    for row in 0..n {
        let blob = row % k;
        let center = 10.0 * blob as Real;
        let x = center + 0.4 * gauss(&mut rng);
        let y = center + 0.4 * gauss(&mut rng);
        instances.push(Instance::new(row as u64, vec![x, y]));
        labels.push(blob);
    }
    (instances, labels)
}

/// blobs whose ground-truth label rides along as the target symbol at
/// position 0
pub fn labelled_blobs(n: usize, k: usize, seed: u64) -> Vec<Instance> {
    let (instances, labels) = blobs(n, k, seed);
    instances
        .into_iter()
        .zip(labels)
        .map(|(instance, label)| {
            Instance::with_symbols(
                instance.id(),
                instance.values().to_vec(),
                vec![format!("c{label}")],
            )
        })
        .collect()
}
