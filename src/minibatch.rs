use crate::MEMORY_CHECK_INTERVAL;
use crate::Real;
use crate::cluster::Cluster;
use crate::clustering::Clustering;
use crate::error::ClusterError;
use crate::initializer;
use crate::instance::Instance;
use crate::instance::TargetTable;
use crate::metric;
use crate::metric::DistanceNorm;
use crate::params::Parameters;
use crate::params::ReplicateChoice;
use crate::quality::FrequencyTable;
use crate::quality::QualityScorer;
use crate::runtime::RunContext;
use crate::runtime::StreamSource;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Memory-bounded K-Means over a streaming database: sequential
/// mini-batches advance the centroids online, then two full passes close
/// the statistics.
pub fn train_mini_batch(
    params: &Parameters,
    source: &mut dyn StreamSource,
    target: Option<usize>,
) -> Result<Clustering, ClusterError> {
    train_mini_batch_with(params, source, target, &RunContext::new())
}

pub fn train_mini_batch_with(
    params: &Parameters,
    source: &mut dyn StreamSource,
    target: Option<usize>,
    ctx: &RunContext,
) -> Result<Clustering, ClusterError> {
    params.check()?;
    let rows = source.row_count();
    if rows == 0 {
        return Err(ClusterError::EmptyInput);
    }
    let target = target.or(params.target_index);
    let mut rng = StdRng::seed_from_u64(params.random_seed);
    let mut clustering = Clustering::new();

    let batches = rows.div_ceil(params.mini_batch_size).max(1);
    let batch_percentage = (params.mini_batch_size as f64 / rows as f64 * 100.0).min(100.0);

    compute_streaming_global(&mut clustering, source, params, ctx, target)?;
    if clustering.global().map(Cluster::frequency).unwrap_or(0) == 0 {
        log::warn!("all database instances have at least one missing value");
        return Err(ClusterError::EmptyInput);
    }

    // batch loop: initialize on the first sub-sample, then keep assigning
    // and advancing the centroids with the harmonic learning rate
    let mut counts: Vec<u64> = Vec::new();
    for batch_index in 0..batches {
        if ctx.cancel.is_cancelled() {
            clustering.mark_not_up_to_date();
            return Err(ClusterError::Cancelled(Box::new(clustering)));
        }
        ctx.progress
            .set_progress(batch_index as f64 / batches as f64 * 100.0);

        let mut batch = read_sample(source, batch_percentage)?;
        batch.shuffle(&mut rng);
        if batch.is_empty() {
            continue;
        }

        if counts.is_empty() {
            let order: Vec<usize> = (0..batch.len()).collect();
            if !initializer::initialize(
                &mut clustering,
                &batch,
                &order,
                params,
                ctx,
                &mut rng,
                target,
            )? {
                clustering.mark_not_up_to_date();
                return Err(ClusterError::Cancelled(Box::new(clustering)));
            }
            counts = vec![0; clustering.k()];
        } else {
            crate::engine::assign_all(&mut clustering, &batch, params);
        }

        for index in 0..clustering.k() {
            let members = clustering.cluster(index).members().to_vec();
            for member in members {
                counts[index] += 1;
                let rate = 1.0 / counts[index] as Real;
                clustering
                    .cluster_mut(index)
                    .advance_centroid(&batch[member], rate, params);
            }
            clustering.cluster_mut(index).set_stats_up_to_date(true);
        }
    }
    if counts.is_empty() {
        return Err(ClusterError::EmptyInput);
    }

    finalize_streaming(&mut clustering, source, params, ctx, target)?;

    let dropped = {
        let mut dropped = 0;
        let mut index = 0;
        while index < clustering.k() {
            if clustering.cluster(index).frequency() == 0 {
                clustering.delete_cluster_at(index);
                dropped += 1;
            } else {
                index += 1;
            }
        }
        dropped
    };
    if dropped > 0 {
        clustering.add_dropped_clusters(dropped);
        log::warn!("{dropped} empty cluster(s) have been dropped during this replicate");
    }

    score_streaming(&mut clustering, params, ctx, target);
    Ok(clustering)
}

/// read one sampled pass of the database into memory
fn read_sample(
    source: &mut dyn StreamSource,
    percentage: f64,
) -> Result<Vec<Instance>, ClusterError> {
    source.set_sample_percentage(percentage);
    if !source.open_for_read() {
        return Err(ClusterError::EmptyInput);
    }
    let mut rows = Vec::new();
    while let Some(instance) = source.read_one() {
        rows.push(instance);
    }
    source.close();
    Ok(rows)
}

/// first streaming pass over the whole database: global centroid, global
/// frequency and the target-value table
fn compute_streaming_global(
    clustering: &mut Clustering,
    source: &mut dyn StreamSource,
    params: &Parameters,
    ctx: &RunContext,
    target: Option<usize>,
) -> Result<(), ClusterError> {
    source.set_sample_percentage(100.0);
    if !source.open_for_read() {
        return Err(ClusterError::EmptyInput);
    }
    let mut global = Cluster::new("global", 0);
    let mut sums = vec![0.0; params.arity()];
    let mut targets = TargetTable::default();
    let mut seen = 0usize;
    let mut missing = 0u64;

    while let Some(instance) = source.read_one() {
        seen += 1;
        if seen % MEMORY_CHECK_INTERVAL == 0 {
            if let Err(failure) = check_memory(ctx) {
                source.close();
                return Err(failure);
            }
        }
        if params.has_missing_kmeans_value(&instance) {
            missing += 1;
            continue;
        }
        global.bump_frequency();
        for i in params.mask.active() {
            sums[i] += instance.numeric(i);
        }
        if let Some(target_index) = target {
            if let Some(value) = instance.symbol(target_index) {
                targets.insert(value);
            }
        }
    }
    source.close();

    if global.frequency() > 0 {
        for i in params.mask.active() {
            sums[i] /= global.frequency() as Real;
        }
        global.set_centroid(sums);
        global.set_stats_up_to_date(true);
    }
    if !params.main_target_modality.is_empty() {
        let values = targets.values().to_vec();
        let mut ordered: Vec<String> = values;
        ordered.sort();
        if let Some(at) = ordered.iter().position(|v| *v == params.main_target_modality) {
            let main = ordered.remove(at);
            ordered.insert(0, main);
        }
        targets = TargetTable::from_values(ordered);
    }
    clustering.set_targets(targets);
    clustering.set_global(global);
    if missing > 0 {
        log::info!("instances with missing values detected during the global pass: {missing}");
    }
    Ok(())
}

/// the two closing passes: (a) frequencies, intra-inertia,
/// target probabilities and majority targets; (b) distance sums in all
/// norms, nearest instance, per-feature inertia, compactness and the
/// confusion matrix
fn finalize_streaming(
    clustering: &mut Clustering,
    source: &mut dyn StreamSource,
    params: &Parameters,
    ctx: &RunContext,
    target: Option<usize>,
) -> Result<(), ClusterError> {
    let targets = clustering.targets().clone();
    for cluster in clustering.clusters_mut() {
        cluster.clear_members();
        cluster.reset_statistics();
    }
    clustering.rebuild_distance_matrix(params);

    // pass (a)
    source.set_sample_percentage(100.0);
    if !source.open_for_read() {
        clustering.mark_not_up_to_date();
        return Err(ClusterError::EmptyInput);
    }
    ctx.progress.set_label("Mini-batch finalization: cluster statistics");
    let rows = source.row_count().max(1);
    let mut seen = 0usize;
    while let Some(instance) = source.read_one() {
        seen += 1;
        if seen % MEMORY_CHECK_INTERVAL == 0 {
            ctx.progress.set_progress(seen as f64 / rows as f64 * 100.0);
            if ctx.cancel.is_cancelled() {
                source.close();
                clustering.mark_not_up_to_date();
                return Err(ClusterError::Cancelled(Box::new(clustering.clone())));
            }
            if let Err(failure) = check_memory(ctx) {
                source.close();
                clustering.mark_not_up_to_date();
                return Err(failure);
            }
        }
        if params.has_missing_kmeans_value(&instance) {
            continue;
        }
        let nearest = nearest_centroid(clustering, &instance, params);
        let cluster = clustering.cluster_mut(nearest);
        cluster.bump_frequency();
        for norm in DistanceNorm::ALL {
            cluster.update_inertia_intra(norm, &instance, params);
        }
        if let Some(target_index) = target {
            if let Some(slot) = instance
                .symbol(target_index)
                .and_then(|value| targets.index_of(value))
            {
                cluster.update_target_count(slot, targets.len());
            }
        }
    }
    source.close();
    for cluster in clustering.clusters_mut() {
        cluster.finalize_streaming_stats(Some(&targets));
    }

    // pass (b)
    if !source.open_for_read() {
        clustering.mark_not_up_to_date();
        return Err(ClusterError::EmptyInput);
    }
    ctx.progress.set_label("Mini-batch finalization: distances and compactness");
    let j = targets.len();
    let mut confusion = FrequencyTable::new(j, j);
    let active: Vec<usize> = params.mask.active().collect();
    let mut seen = 0usize;
    let mut ordinal = 0usize;
    while let Some(instance) = source.read_one() {
        seen += 1;
        if seen % MEMORY_CHECK_INTERVAL == 0 {
            ctx.progress.set_progress(seen as f64 / rows as f64 * 100.0);
            if ctx.cancel.is_cancelled() {
                source.close();
                clustering.mark_not_up_to_date();
                return Err(ClusterError::Cancelled(Box::new(clustering.clone())));
            }
            if let Err(failure) = check_memory(ctx) {
                source.close();
                clustering.mark_not_up_to_date();
                return Err(failure);
            }
        }
        if params.has_missing_kmeans_value(&instance) {
            continue;
        }
        let nearest = nearest_centroid(clustering, &instance, params);
        let distance = metric::distance(
            params.norm,
            instance.values(),
            clustering.cluster(nearest).centroid(),
            &params.mask,
        );
        let cluster = clustering.cluster_mut(nearest);
        for norm in DistanceNorm::ALL {
            cluster.update_distance_sum(norm, &instance, params);
        }
        for &feature in &active {
            cluster.update_inertia_intra_for_feature(feature, params.norm, &instance, params);
        }
        cluster.update_nearest_member(ordinal, distance);
        if let Some(target_index) = target {
            if let Some(value) = instance.symbol(target_index) {
                cluster.update_compactness(&instance, value, params);
                if let (Some(predicted), Some(actual)) =
                    (cluster.majority_target_index(), targets.index_of(value))
                {
                    confusion.increment(predicted, actual);
                }
            }
        }
        ordinal += 1;
    }
    source.close();
    for cluster in clustering.clusters_mut() {
        cluster.finalize_secondary_streaming_stats();
    }
    if target.is_some() {
        clustering.set_confusion_matrix(confusion);
    }
    clustering.update_global_distance_sums();
    clustering.mark_up_to_date();
    Ok(())
}

/// plain nearest-centroid search; the streaming passes carry no
/// assignment table to prune against
fn nearest_centroid(clustering: &Clustering, instance: &Instance, params: &Parameters) -> usize {
    let mut best = 0usize;
    let mut minimum = metric::distance(
        params.norm,
        instance.values(),
        clustering.cluster(0).centroid(),
        &params.mask,
    );
    for index in 1..clustering.k() {
        let abort = match params.norm {
            DistanceNorm::Cosine => None,
            _ => Some(minimum),
        };
        let d = metric::distance_with_abort(
            params.norm,
            instance.values(),
            clustering.cluster(index).centroid(),
            &params.mask,
            abort,
        );
        if d < minimum {
            minimum = d;
            best = index;
        }
    }
    best
}

/// mirror of the in-memory replicate scoring, fed exclusively from the
/// streamed statistics
fn score_streaming(
    clustering: &mut Clustering,
    params: &Parameters,
    ctx: &RunContext,
    target: Option<usize>,
) {
    let choice = params.resolved_replicate_choice();
    let scorer = QualityScorer::new(params, ctx.costs);
    let mut scores = clustering.scores().clone();
    scores.mean_distance = scorer.mean_distance(clustering);
    scores.davies_bouldin = scorer.davies_bouldin(clustering);
    scores.davies_bouldin_by_feature = {
        let mut by_feature = vec![0.0; params.arity()];
        for feature in params.mask.active() {
            by_feature[feature] = scorer.davies_bouldin_for_feature(clustering, feature);
        }
        by_feature
    };
    if params.supervised && target.is_some() && !clustering.targets().is_empty() {
        let table = clustering.modality_frequencies();
        let eva = scorer.eva(&table);
        scores.ari_by_clusters = Some(scorer.ari_by_clusters(clustering));
        scores.eva = Some(eva);
        scores.predictive_clustering = Some(scorer.predictive_clustering(clustering, eva));
        match choice {
            ReplicateChoice::AriByClasses => {
                scores.ari_by_classes = Some(scorer.ari_by_classes(clustering));
            }
            ReplicateChoice::NmiByClusters => {
                scores.nmi_by_clusters = Some(scorer.nmi_by_clusters(clustering));
            }
            ReplicateChoice::NmiByClasses => {
                scores.nmi_by_classes = Some(scorer.nmi_by_classes(clustering));
            }
            ReplicateChoice::VariationOfInformation => {
                scores.variation_of_information = Some(scorer.variation_of_information(clustering));
            }
            ReplicateChoice::Leva => {
                scores.leva = Some(scorer.leva(&table));
            }
            _ => {}
        }
    }
    *clustering.scores_mut() = scores;
}

fn check_memory(ctx: &RunContext) -> Result<(), ClusterError> {
    let remaining = ctx.memory.remaining_bytes();
    if remaining < ctx.memory_headroom {
        Err(ClusterError::InsufficientMemory {
            remaining,
            headroom: ctx.memory_headroom,
        })
    } else {
        Ok(())
    }
}

/// In-memory adapter over an owned instance vector; sampling is
/// deterministic for a given seed, re-drawn on every open.
pub struct VecSource {
    rows: Vec<Instance>,
    seed: u64,
    epoch: u64,
    cursor: usize,
    percentage: f64,
    rng: StdRng,
}

impl VecSource {
    pub fn new(rows: Vec<Instance>, seed: u64) -> Self {
        Self {
            rows,
            seed,
            epoch: 0,
            cursor: 0,
            percentage: 100.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl StreamSource for VecSource {
    fn open_for_read(&mut self) -> bool {
        self.cursor = 0;
        self.epoch += 1;
        self.rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
        true
    }

    fn read_one(&mut self) -> Option<Instance> {
        while self.cursor < self.rows.len() {
            let row = self.cursor;
            self.cursor += 1;
            if self.percentage >= 100.0 || self.rng.random::<f64>() * 100.0 < self.percentage {
                return Some(self.rows[row].clone());
            }
        }
        None
    }

    fn close(&mut self) {}

    fn set_sample_percentage(&mut self, percent: f64) {
        self.percentage = percent;
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::FeatureMask;
    use crate::runtime::MemoryOracle;
    use crate::tests::blobs;

    fn params(k: usize) -> Parameters {
        let mut params = Parameters::new(k, FeatureMask::all_active(2));
        params.mini_batch_mode = true;
        params.mini_batch_size = 100;
        params
    }

    #[test]
    fn streaming_run_matches_cluster_count() {
        let (instances, _) = blobs(1000, 3, 42);
        let mut source = VecSource::new(instances, 42);
        let clustering = train_mini_batch(&params(3), &mut source, None).expect("streaming run");
        assert_eq!(clustering.k(), 3);
        assert!(clustering.is_up_to_date());
        assert_eq!(clustering.total_frequency(), 1000);
        for cluster in clustering.clusters() {
            assert!(cluster.frequency() > 0);
            assert!(cluster.stats_up_to_date());
            assert!(cluster.distance_sum(DistanceNorm::L2) >= 0.0);
        }
    }

    #[test]
    fn empty_stream_is_empty_input() {
        let mut source = VecSource::new(Vec::new(), 42);
        let result = train_mini_batch(&params(3), &mut source, None);
        assert!(matches!(result, Err(ClusterError::EmptyInput)));
    }

    struct Starved;

    impl MemoryOracle for Starved {
        fn remaining_bytes(&self) -> u64 {
            0
        }
    }

    #[test]
    fn starved_oracle_fails_with_insufficient_memory() {
        let (instances, _) = blobs(5000, 3, 42);
        let mut source = VecSource::new(instances, 42);
        let oracle = Starved;
        let ctx = RunContext::new().with_memory(&oracle, 1 << 20);
        let result = train_mini_batch_with(&params(3), &mut source, None, &ctx);
        assert!(matches!(
            result,
            Err(ClusterError::InsufficientMemory { .. })
        ));
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let (instances, _) = blobs(500, 2, 42);
        let mut a = VecSource::new(instances.clone(), 7);
        let mut b = VecSource::new(instances, 7);
        a.set_sample_percentage(20.0);
        b.set_sample_percentage(20.0);
        assert!(a.open_for_read());
        assert!(b.open_for_read());
        let rows_a: Vec<u64> = std::iter::from_fn(|| a.read_one()).map(|i| i.id()).collect();
        let rows_b: Vec<u64> = std::iter::from_fn(|| b.read_one()).map(|i| i.id()).collect();
        assert_eq!(rows_a, rows_b);
        assert!(!rows_a.is_empty());
        assert!(rows_a.len() < 500);
    }
}
