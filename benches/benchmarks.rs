use kmclust::Instance;
use kmclust::Parameters;
use kmclust::Real;
use kmclust::instance::FeatureMask;
use kmclust::metric;
use kmclust::metric::DistanceNorm;
use kmclust::params::InitMethod;
use kmclust::train;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

criterion::criterion_main!(benches);
criterion::criterion_group! {
    name = benches;
    config = criterion::Criterion::default()
        .without_plots()
        .noise_threshold(3.0)
        .significance_level(0.01)
        .sample_size(10)
        .measurement_time(std::time::Duration::from_secs(1));
    targets =
        computing_distance_l1,
        computing_distance_l2,
        computing_distance_cosine,
        computing_distance_l2_with_abort,
        training_kmeans_random,
        training_kmeans_plus_plus,
}

const ARITY: usize = 32;

fn vectors(n: usize, seed: u64) -> Vec<Vec<Real>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..ARITY).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

fn rows(n: usize, seed: u64) -> Vec<Instance> {
    vectors(n, seed)
        .into_iter()
        .enumerate()
        .map(|(i, values)| Instance::new(i as u64, values))
        .collect()
}

fn computing_distance_l1(c: &mut criterion::Criterion) {
    let mask = FeatureMask::all_active(ARITY);
    let pair = vectors(2, 42);
    c.bench_function("L1 distance over 32 features", |b| {
        b.iter(|| metric::distance(DistanceNorm::L1, &pair[0], &pair[1], &mask))
    });
}

fn computing_distance_l2(c: &mut criterion::Criterion) {
    let mask = FeatureMask::all_active(ARITY);
    let pair = vectors(2, 42);
    c.bench_function("L2 distance over 32 features", |b| {
        b.iter(|| metric::distance(DistanceNorm::L2, &pair[0], &pair[1], &mask))
    });
}

fn computing_distance_cosine(c: &mut criterion::Criterion) {
    let mask = FeatureMask::all_active(ARITY);
    let pair = vectors(2, 42);
    c.bench_function("cosine distance over 32 features", |b| {
        b.iter(|| metric::distance(DistanceNorm::Cosine, &pair[0], &pair[1], &mask))
    });
}

fn computing_distance_l2_with_abort(c: &mut criterion::Criterion) {
    let mask = FeatureMask::all_active(ARITY);
    let pair = vectors(2, 42);
    c.bench_function("L2 distance with a tight early abort", |b| {
        b.iter(|| {
            metric::distance_with_abort(DistanceNorm::L2, &pair[0], &pair[1], &mask, Some(0.01))
        })
    });
}

fn training_kmeans_random(c: &mut criterion::Criterion) {
    let instances = rows(2000, 42);
    let params = Parameters::new(8, FeatureMask::all_active(ARITY))
        .with_init_method(InitMethod::Random)
        .with_max_iterations(10);
    c.bench_function("train 2000x32 rows, K=8, random init", |b| {
        b.iter(|| train(&params, &instances, None).expect("training succeeds"))
    });
}

fn training_kmeans_plus_plus(c: &mut criterion::Criterion) {
    let instances = rows(2000, 42);
    let params = Parameters::new(8, FeatureMask::all_active(ARITY))
        .with_init_method(InitMethod::KMeansPlusPlus)
        .with_max_iterations(10);
    c.bench_function("train 2000x32 rows, K=8, kmeans++ init", |b| {
        b.iter(|| train(&params, &instances, None).expect("training succeeds"))
    });
}
