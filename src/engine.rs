use crate::Real;
use crate::cluster::Cluster;
use crate::clustering::Clustering;
use crate::error::ClusterError;
use crate::initializer;
use crate::instance::Instance;
use crate::instance::TargetTable;
use crate::metric;
use crate::metric::DistanceNorm;
use crate::params::CentroidKind;
use crate::params::Parameters;
use crate::params::PostOptimization;
use crate::params::ReplicateChoice;
use crate::quality::QualityScorer;
use crate::runtime::RunContext;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Train a clustering on already-recoded instances with the default
/// collaborators (no cancellation, unbounded memory, silent progress).
pub fn train(
    params: &Parameters,
    instances: &[Instance],
    target: Option<usize>,
) -> Result<Clustering, ClusterError> {
    train_with(params, instances, target, &RunContext::new())
}

/// Train with explicit collaborators. Runs every replicate, retains the
/// best by the replicate-choice criterion, then post-optimises it when
/// requested.
pub fn train_with(
    params: &Parameters,
    instances: &[Instance],
    target: Option<usize>,
    ctx: &RunContext,
) -> Result<Clustering, ClusterError> {
    params.check()?;
    if instances.is_empty() {
        return Err(ClusterError::EmptyInput);
    }
    let target = target.or(params.target_index);
    let choice = params.resolved_replicate_choice();

    let replicate = |index: usize| -> Result<(Clustering, bool), ClusterError> {
        let mut rng = StdRng::seed_from_u64(params.random_seed.wrapping_add(index as u64));
        let mut clustering = Clustering::new();
        let complete = compute_replicate(&mut clustering, instances, params, ctx, &mut rng, target)?;
        Ok((clustering, complete))
    };

    let outcomes: Vec<Result<(Clustering, bool), ClusterError>> = if params.parallel_mode
        && params.replicates > 1
    {
        use rayon::prelude::*;
        (0..params.replicates).into_par_iter().map(replicate).collect()
    } else {
        let mut collected = Vec::with_capacity(params.replicates);
        for index in 0..params.replicates {
            let outcome = replicate(index);
            let stop = matches!(&outcome, Ok((_, false)));
            collected.push(outcome);
            if stop {
                break;
            }
        }
        collected
    };

    let mut best: Option<Clustering> = None;
    for outcome in outcomes {
        let (clustering, complete) = outcome?;
        if !complete {
            return Err(ClusterError::Cancelled(Box::new(clustering)));
        }
        best = Some(match best.take() {
            None => clustering,
            Some(incumbent) => choose(incumbent, clustering, choice),
        });
    }
    let mut best = best.expect("at least one replicate ran");

    if params.post_optimization == PostOptimization::Fast {
        let mut rng = StdRng::seed_from_u64(params.random_seed.wrapping_add(params.replicates as u64));
        let complete = crate::postopt::post_optimize(&mut best, instances, params, ctx, &mut rng, target)?;
        if !complete {
            return Err(ClusterError::Cancelled(Box::new(best)));
        }
    }
    Ok(best)
}

/// keep the incumbent on ties so earlier replicates win
fn choose(incumbent: Clustering, challenger: Clustering, choice: ReplicateChoice) -> Clustering {
    let a = incumbent.scores().criterion(choice);
    let b = challenger.scores().criterion(choice);
    let improved = match (a, b) {
        (None, Some(_)) => true,
        (_, None) => false,
        (Some(a), Some(b)) => {
            if choice.minimizes() {
                b < a
            } else {
                b > a
            }
        }
    };
    if improved { challenger } else { incumbent }
}

/// One replicate end to end: shuffle, global statistics, target table,
/// initialisation, convergence, finalisation, scoring.
///
/// Ok(true) means the replicate completed; Ok(false) means cooperative
/// cancellation was observed and the clustering is provisional but
/// well-formed.
pub fn compute_replicate(
    clustering: &mut Clustering,
    instances: &[Instance],
    params: &Parameters,
    ctx: &RunContext,
    rng: &mut StdRng,
    target: Option<usize>,
) -> Result<bool, ClusterError> {
    if instances.is_empty() {
        return Err(ClusterError::EmptyInput);
    }
    ctx.progress.set_label("Clustering");

    let mut order: Vec<usize> = (0..instances.len()).collect();
    order.shuffle(rng);

    if clustering.global().is_none() {
        clustering.compute_global_cluster(instances, params);
    }
    if clustering.global().map(Cluster::frequency).unwrap_or(0) == 0 {
        log::warn!("all database instances have at least one missing value");
        return Err(ClusterError::EmptyInput);
    }

    if let Some(target_index) = target {
        if clustering.targets().is_empty() {
            clustering.set_targets(TargetTable::read(
                instances,
                target_index,
                &params.main_target_modality,
            ));
        }
    }

    if !initializer::initialize(clustering, instances, &order, params, ctx, rng, target)? {
        stabilize(clustering, instances, params);
        return Ok(false);
    }
    if clustering.missing_values() > 0 && params.verbose {
        log::info!(
            "instances with missing values detected during initialization: {}",
            clustering.missing_values()
        );
    }

    if params.verbose {
        log::info!("convergence:");
        log::info!(
            "{:>6} {:>10} {:>14} {:>14} {:>14} {:>12} {:>14}",
            "iter",
            "movements",
            "mean dist",
            "improvement",
            "best dist",
            "eps iter",
            "empty"
        );
    }

    if !converge(clustering, instances, &order, instances.len(), params, ctx, false) {
        stabilize(clustering, instances, params);
        return Ok(false);
    }

    // -1 keeps the init-time centroids; anything else re-assigns against
    // the converged centroids before the final statistics pass
    let recompute = params.max_iterations != -1;
    if recompute {
        assign_all(clustering, instances, params);
    }
    finalize_replicate(clustering, instances, params, recompute);
    if recompute {
        let dropped = manage_empty_clusters(clustering, instances, params, false);
        if dropped > 0 {
            clustering.rebuild_assignments_from_members(instances.len());
            clustering.rebuild_distance_matrix(params);
            clustering.update_global_distance_sums();
        }
    }

    score_replicate(clustering, instances, params, ctx, target);

    if params.verbose {
        let scores = clustering.scores();
        if let Some(ari) = scores.ari_by_clusters {
            log::info!("ARI by clusters is {ari}");
        }
        if let Some(eva) = scores.eva {
            log::info!("EVA is {eva}");
        }
        log::info!("Davies Bouldin index is {}", scores.davies_bouldin);
        log::info!("number of clusters: {}", clustering.k());
    }
    Ok(true)
}

/// The Lloyd convergence loop. Returns false when cancellation was
/// observed; the clustering is then consistent but provisional.
pub(crate) fn converge(
    clustering: &mut Clustering,
    instances: &[Instance],
    order: &[usize],
    max_instances: usize,
    params: &Parameters,
    ctx: &RunContext,
    silent: bool,
) -> bool {
    let verbose = params.verbose && !silent;
    let n = max_instances.min(order.len());
    let mut epsilon_iterations = 0usize;
    let mut iterations = 0usize;
    let mut best_snapshot: Vec<Cluster> = Vec::new();
    let mut cancelled = false;

    clustering.set_iterations_done(0);
    clustering.reset_dropped_clusters();

    // distance over the initialised partition seeds the best observed
    let mut new_distances_sum: Real = clustering
        .clusters()
        .iter()
        .map(|c| c.distance_sum(params.norm))
        .sum();
    let mut min_distance_sum = new_distances_sum;

    let mut proceed = true;
    while proceed {
        if ctx.cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let mut distances_sum: Real = 0.0;
        let mut movements = 0usize;

        if params.max_iterations != -1 {
            clustering.rebuild_distance_matrix(params);
            distances_sum = clustering
                .clusters()
                .iter()
                .map(|c| c.distance_sum(params.norm))
                .sum();

            for &position in &order[..n] {
                let Some(current) = clustering.assignment(position) else {
                    // rows with missing K-Means values never joined a cluster
                    continue;
                };
                let Some(nearest) = find_nearest_cluster(clustering, instances, position, params)
                else {
                    continue;
                };
                if nearest != current {
                    clustering.cluster_mut(current).remove(position);
                    clustering.cluster_mut(nearest).add(position);
                    clustering.assign(position, nearest);
                    movements += 1;
                }
            }
            iterations += 1;
        }

        new_distances_sum = 0.0;
        let capped = params.max_iterations > 0 && iterations as i32 > params.max_iterations;
        if params.max_iterations != -1 && !capped {
            for cluster in clustering.clusters_mut() {
                cluster.compute_iteration_stats(instances, params);
            }
            new_distances_sum = clustering
                .clusters()
                .iter()
                .map(|c| c.distance_sum(params.norm))
                .sum();
        }

        if params.max_iterations == -1 {
            // keep the centroids produced by the initialisation
            proceed = false;
        } else {
            proceed = manage_convergence(
                clustering,
                params,
                movements,
                iterations,
                distances_sum,
                new_distances_sum,
                n,
                &mut min_distance_sum,
                &mut epsilon_iterations,
                &mut best_snapshot,
            );
        }

        // leaving the loop: keep the best iteration observed, which is not
        // necessarily the last one; it may hold empty clusters
        if !proceed && !best_snapshot.is_empty() {
            clustering.restore(&best_snapshot);
            best_snapshot.clear();
        }

        let empty = manage_empty_clusters(clustering, instances, params, proceed);

        if verbose && params.max_iterations != -1 {
            log::info!(
                "{:>6} {:>10} {:>14.6} {:>14.6} {:>14.6} {:>12} {:>14}",
                iterations,
                movements,
                new_distances_sum / n as Real,
                (distances_sum - new_distances_sum) / n as Real,
                min_distance_sum / n as Real,
                epsilon_iterations,
                empty
            );
            if !proceed && empty > 0 {
                log::info!("{} empty cluster(s) dropped", empty);
            }
        }
    }

    clustering.set_iterations_done(iterations);
    !cancelled
}

/// Decide whether iterations continue; tracks the minimum distance seen
/// and snapshots the partition whenever it improves by at least epsilon.
fn manage_convergence(
    clustering: &Clustering,
    params: &Parameters,
    movements: usize,
    iterations: usize,
    distances_sum: Real,
    new_distances_sum: Real,
    instances_count: usize,
    min_distance_sum: &mut Real,
    epsilon_iterations: &mut usize,
    best_snapshot: &mut Vec<Cluster>,
) -> bool {
    debug_assert!(params.max_iterations >= 0);
    let mut proceed = true;

    if movements == 0
        || (params.max_iterations != 0 && iterations as i32 >= params.max_iterations)
    {
        proceed = false;
    }

    if movements > 0 {
        let improvement = ((distances_sum - new_distances_sum) / instances_count as Real).abs();
        if improvement >= params.epsilon && new_distances_sum < *min_distance_sum {
            *epsilon_iterations = 0;
            *min_distance_sum = new_distances_sum;
            *best_snapshot = clustering.snapshot();
        } else if params.epsilon > 0.0 {
            *epsilon_iterations += 1;
            if *epsilon_iterations >= params.epsilon_max_iterations {
                proceed = false;
            }
        }
    }
    proceed
}

/// Detect clusters emptied by an iteration. Mid-loop they are revived by
/// stealing the farthest-from-centroid instances, one per empty slot; at
/// loop exit they are dropped and counted.
pub(crate) fn manage_empty_clusters(
    clustering: &mut Clustering,
    instances: &[Instance],
    params: &Parameters,
    proceeding: bool,
) -> usize {
    let empty = clustering
        .clusters()
        .iter()
        .filter(|c| c.frequency() == 0)
        .count();
    if empty == 0 {
        return 0;
    }

    if !proceeding {
        let mut index = 0;
        while index < clustering.k() {
            if clustering.cluster(index).frequency() == 0 {
                clustering.delete_cluster_at(index);
                clustering.add_dropped_clusters(1);
            } else {
                index += 1;
            }
        }
        return empty;
    }

    // the worst-placed instances across all clusters become the seeds of
    // the empty ones
    let mut victims: Vec<(usize, usize, Real)> = Vec::new();
    for cluster in clustering.clusters() {
        for &member in cluster.members() {
            let d = metric::distance(
                params.norm,
                instances[member].values(),
                cluster.centroid(),
                &params.mask,
            );
            victims.push((member, cluster.index(), d));
        }
    }
    victims.sort_by(|a, b| b.2.partial_cmp(&a.2).expect("finite distances").then(a.0.cmp(&b.0)));

    let mut next_victim = 0;
    for index in 0..clustering.k() {
        if clustering.cluster(index).frequency() > 0 {
            continue;
        }
        let Some(&(position, old_cluster, _)) = victims.get(next_victim) else {
            break;
        };
        next_victim += 1;
        clustering.cluster_mut(old_cluster).remove(position);
        clustering.cluster_mut(index).add(position);
        clustering.assign(position, index);
    }
    for cluster in clustering.clusters_mut() {
        cluster.compute_iteration_stats(instances, params);
    }
    empty
}

/// Nearest cluster to an instance, pruned with the triangle inequality:
/// when half the distance between the current cluster and its nearest
/// sibling exceeds the instance's own distance, no other cluster can win.
/// The per-candidate distance accumulation aborts early once it exceeds
/// the best distance found so far.
pub(crate) fn find_nearest_cluster(
    clustering: &Clustering,
    instances: &[Instance],
    position: usize,
    params: &Parameters,
) -> Option<usize> {
    let k = clustering.k();
    if k == 0 {
        return None;
    }
    let norm = params.norm;
    let values = instances[position].values();
    let matrix = clustering.matrix();

    let first;
    let mut best_index;
    let mut best;
    match clustering.assignment(position) {
        None => {
            // first-ever invocation: distance to cluster 0 seeds the minimum
            first = 0;
            best_index = 0;
            best = metric::distance(norm, values, clustering.cluster(0).centroid(), &params.mask);
        }
        Some(current) => {
            first = current;
            best_index = current;
            best = metric::distance(
                norm,
                values,
                clustering.cluster(current).centroid(),
                &params.mask,
            );
            if let Some(sibling) = clustering.cluster(current).nearest_sibling() {
                if sibling != current && matrix.k() == k {
                    let between = matrix.get(sibling, current);
                    let keep = match norm {
                        DistanceNorm::L2 => 0.5 * between.sqrt() > best.sqrt(),
                        _ => 0.5 * between > best,
                    };
                    if keep {
                        return Some(current);
                    }
                }
            }
        }
    }

    for candidate in 0..k {
        if candidate == first {
            continue;
        }
        let between = matrix.get(best_index, candidate);
        let worth_computing = match norm {
            DistanceNorm::L2 => 0.5 * between.sqrt() < best.sqrt(),
            _ => 0.5 * between < best,
        };
        if !worth_computing {
            continue;
        }
        let abort = match norm {
            DistanceNorm::Cosine => None,
            _ => Some(best),
        };
        let d = metric::distance_with_abort(
            norm,
            values,
            clustering.cluster(candidate).centroid(),
            &params.mask,
            abort,
        );
        if d < best {
            best = d;
            best_index = candidate;
        }
    }
    Some(best_index)
}

/// exhaustive nearest-cluster search, the reference the pruned one must
/// agree with
#[cfg(test)]
pub(crate) fn find_nearest_exhaustive(
    clustering: &Clustering,
    instances: &[Instance],
    position: usize,
    params: &Parameters,
) -> Option<usize> {
    (0..clustering.k())
        .map(|i| {
            (
                i,
                metric::distance(
                    params.norm,
                    instances[position].values(),
                    clustering.cluster(i).centroid(),
                    &params.mask,
                ),
            )
        })
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).expect("finite distances"))
        .map(|(i, _)| i)
}

/// Re-assign every complete instance to its nearest cluster, rebuilding
/// memberships, the assignment table and the cluster frequencies against
/// the current centroids.
pub(crate) fn assign_all(clustering: &mut Clustering, instances: &[Instance], params: &Parameters) {
    clustering.rebuild_distance_matrix(params);
    for cluster in clustering.clusters_mut() {
        cluster.clear_members();
    }
    clustering.reset_assignments(instances.len());
    for (position, instance) in instances.iter().enumerate() {
        if params.has_missing_kmeans_value(instance) {
            continue;
        }
        if let Some(nearest) = find_nearest_cluster(clustering, instances, position, params) {
            clustering.cluster_mut(nearest).add(position);
            clustering.assign(position, nearest);
        }
    }
    for cluster in clustering.clusters_mut() {
        cluster.set_frequency(cluster.count() as u64);
    }
}

/// Close the statistics of every cluster at the end of a replicate:
/// centroids (unless the init-time ones are kept), distance sums in all
/// three norms, nearest real instance, intra-inertia.
pub(crate) fn finalize_replicate(
    clustering: &mut Clustering,
    instances: &[Instance],
    params: &Parameters,
    recompute_centroids: bool,
) {
    let norm = params.norm;
    for cluster in clustering.clusters_mut() {
        if recompute_centroids {
            cluster.compute_iteration_stats(instances, params);
        } else {
            cluster.compute_distance_sum(norm, instances, params);
            cluster.set_frequency(cluster.count() as u64);
            cluster.set_stats_up_to_date(true);
        }
        if cluster.frequency() == 0 {
            continue;
        }
        cluster.compute_nearest_member(norm, instances, params);
        for other in DistanceNorm::ALL {
            if other != norm {
                cluster.compute_distance_sum(other, instances, params);
            }
        }
        cluster.compute_inertia_intra(norm, instances, params);
    }

    if params.centroid == CentroidKind::RealInstance {
        for cluster in clustering.clusters_mut() {
            if let Some(member) = cluster.nearest_member() {
                cluster.set_centroid(instances[member].values().to_vec());
            }
        }
        for cluster in clustering.clusters_mut() {
            for norm in DistanceNorm::ALL {
                cluster.compute_distance_sum(norm, instances, params);
            }
            cluster.compute_inertia_intra(norm, instances, params);
        }
        clustering.rebuild_distance_matrix(params);
    }

    clustering.update_global_distance_sums();
}

/// Quality criteria for the finished replicate: the unsupervised ones
/// always, the supervised ones when a target is present, the optional ones
/// when the replicate-choice policy requests them.
pub(crate) fn score_replicate(
    clustering: &mut Clustering,
    instances: &[Instance],
    params: &Parameters,
    ctx: &RunContext,
    target: Option<usize>,
) {
    let choice = params.resolved_replicate_choice();

    if let Some(target_index) = target.filter(|_| params.supervised) {
        clustering.compute_target_probs(instances, target_index);
        clustering.compute_confusion_matrix(instances, target_index);
        for cluster in clustering.clusters_mut() {
            cluster.compute_compactness(instances, target_index, params);
        }
    }

    // per-feature inertia feeds the per-feature Davies-Bouldin variant
    let active: Vec<usize> = params.mask.active().collect();
    for cluster in clustering.clusters_mut() {
        for &feature in &active {
            cluster.compute_inertia_intra_for_feature(feature, params.norm, instances, params);
        }
    }

    let scorer = QualityScorer::new(params, ctx.costs);
    let mut scores = clustering.scores().clone();
    scores.mean_distance = scorer.mean_distance(clustering);
    scores.davies_bouldin = scorer.davies_bouldin(clustering);
    scores.davies_bouldin_by_feature = {
        let mut by_feature = vec![0.0; params.arity()];
        for &feature in &active {
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

/// After a cancellation, leave every cluster either up to date or cheaply
/// recomputed so the provisional clustering is well-formed.
fn stabilize(clustering: &mut Clustering, instances: &[Instance], params: &Parameters) {
    for cluster in clustering.clusters_mut() {
        cluster.compute_iteration_stats(instances, params);
    }
    clustering.update_global_distance_sums();
    if clustering.k() > 0 {
        clustering.rebuild_distance_matrix(params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::FeatureMask;
    use crate::tests::blobs;
    use rand::Rng;

    fn params(k: usize) -> Parameters {
        Parameters::new(k, FeatureMask::all_active(2))
    }

    /// the pruned search must agree with the exhaustive one on every
    /// instance, for all three norms
    #[test]
    fn pruned_search_matches_exhaustive() {
        let mut rng = StdRng::seed_from_u64(42);
        for norm in DistanceNorm::ALL {
            let params = params(5).with_norm(norm);
            let instances: Vec<Instance> = (0..200)
                .map(|i| {
                    Instance::new(
                        i,
                        vec![rng.random_range(-5.0..5.0), rng.random_range(-5.0..5.0)],
                    )
                })
                .collect();
            let mut clustering = Clustering::new();
            for index in 0..5 {
                let mut cluster = Cluster::new(format!("{}", index + 1), index);
                cluster.seed_centroid(&instances[index * 7]);
                clustering.push_cluster(cluster);
            }
            assign_all(&mut clustering, &instances, &params);
            clustering.rebuild_distance_matrix(&params);
            for position in 0..instances.len() {
                let pruned =
                    find_nearest_cluster(&clustering, &instances, position, &params).unwrap();
                let exhaustive =
                    find_nearest_exhaustive(&clustering, &instances, position, &params).unwrap();
                assert_eq!(
                    pruned,
                    exhaustive,
                    "norm {:?}, instance {}",
                    norm,
                    position
                );
            }
        }
    }

    #[test]
    fn equidistant_centroids_resolve_to_lower_index() {
        let params = params(2);
        let instances = vec![Instance::new(0, vec![0.0, 0.0])];
        let mut clustering = Clustering::new();
        for (index, x) in [(-1.0), 1.0].into_iter().enumerate() {
            let mut cluster = Cluster::new(format!("{}", index + 1), index);
            cluster.set_centroid(vec![x, 0.0]);
            clustering.push_cluster(cluster);
        }
        clustering.rebuild_distance_matrix(&params);
        clustering.reset_assignments(1);
        let nearest = find_nearest_cluster(&clustering, &instances, 0, &params).unwrap();
        assert_eq!(nearest, 0);
    }

    #[test]
    fn empty_cluster_steals_the_farthest_instance_mid_loop() {
        let params = params(2);
        let instances = vec![
            Instance::new(0, vec![0.0, 0.0]),
            Instance::new(1, vec![1.0, 0.0]),
            Instance::new(2, vec![10.0, 0.0]),
        ];
        let mut clustering = Clustering::new();
        let mut near = Cluster::new("1", 0);
        near.set_centroid(vec![0.0, 0.0]);
        let mut far = Cluster::new("2", 1);
        far.set_centroid(vec![50.0, 0.0]);
        clustering.push_cluster(near);
        clustering.push_cluster(far);
        assign_all(&mut clustering, &instances, &params);
        for cluster in clustering.clusters_mut() {
            cluster.compute_iteration_stats(&instances, &params);
        }
        assert_eq!(clustering.cluster(1).frequency(), 0);

        let revived = manage_empty_clusters(&mut clustering, &instances, &params, true);
        assert_eq!(revived, 1);
        assert_eq!(clustering.cluster(1).frequency(), 1);
        assert!(clustering.cluster(1).members().contains(&2));
        assert_eq!(clustering.assignment(2), Some(1));
        assert_eq!(clustering.cluster(0).frequency(), 2);
    }

    #[test]
    fn empty_clusters_are_dropped_at_termination() {
        let params = params(3);
        let instances = vec![
            Instance::new(0, vec![0.0, 0.0]),
            Instance::new(1, vec![1.0, 0.0]),
        ];
        let mut clustering = Clustering::new();
        for (index, x) in [0.0, 1.0, 99.0].into_iter().enumerate() {
            let mut cluster = Cluster::new(format!("{}", index + 1), index);
            cluster.set_centroid(vec![x, 0.0]);
            clustering.push_cluster(cluster);
        }
        assign_all(&mut clustering, &instances, &params);
        for cluster in clustering.clusters_mut() {
            cluster.compute_iteration_stats(&instances, &params);
        }
        let dropped = manage_empty_clusters(&mut clustering, &instances, &params, false);
        assert_eq!(dropped, 1);
        assert_eq!(clustering.k(), 2);
        assert_eq!(clustering.dropped_clusters(), 1);
    }

    #[test]
    fn every_complete_instance_lands_in_exactly_one_cluster() {
        let (instances, _) = blobs(90, 3, 42);
        let params = params(3);
        let clustering = {
            let mut rng = StdRng::seed_from_u64(42);
            let mut clustering = Clustering::new();
            compute_replicate(
                &mut clustering,
                &instances,
                &params,
                &RunContext::new(),
                &mut rng,
                None,
            )
            .expect("replicate runs");
            clustering
        };
        let membership_total: usize = clustering.clusters().iter().map(|c| c.count()).sum();
        assert_eq!(membership_total, instances.len());
        for (position, assigned) in clustering.assignments().iter().enumerate() {
            let cluster = assigned.expect("complete instance is assigned");
            assert!(clustering.cluster(cluster).members().contains(&position));
        }
    }

    #[test]
    fn rerunning_a_converged_clustering_is_stable() {
        let (instances, _) = blobs(90, 3, 42);
        let params = params(3).with_max_iterations(50);
        let mut rng = StdRng::seed_from_u64(42);
        let mut clustering = Clustering::new();
        compute_replicate(
            &mut clustering,
            &instances,
            &params,
            &RunContext::new(),
            &mut rng,
            None,
        )
        .expect("replicate runs");
        let centroids: Vec<Vec<Real>> = clustering
            .clusters()
            .iter()
            .map(|c| c.centroid().to_vec())
            .collect();
        let frequencies: Vec<u64> = clustering.clusters().iter().map(|c| c.frequency()).collect();

        // one more sweep against the converged centroids moves nothing
        assign_all(&mut clustering, &instances, &params);
        finalize_replicate(&mut clustering, &instances, &params, true);
        for (cluster, (centroid, frequency)) in clustering
            .clusters()
            .iter()
            .zip(centroids.iter().zip(frequencies.iter()))
        {
            assert_eq!(cluster.centroid(), centroid.as_slice());
            assert_eq!(cluster.frequency(), *frequency);
        }
    }
}
