use crate::Real;
use crate::cluster::Cluster;
use crate::clustering::Clustering;
use crate::engine;
use crate::error::ClusterError;
use crate::instance::Instance;
use crate::metric;
use crate::metric::DistanceNorm;
use crate::params::Parameters;
use crate::quality::FrequencyTable;
use crate::quality::QualityScorer;
use crate::runtime::RunContext;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::seq::SliceRandom;

/// Greedy cluster-removal post-optimisation of the best replicate, driven
/// by the EVA criterion, followed by the VNS shell when a level is set.
///
/// Supervised mode only; every cluster must enter with its
/// target-probability vector computed. Ok(false) signals cancellation;
/// the clustering is then left at its last consistent state.
pub fn post_optimize(
    clustering: &mut Clustering,
    instances: &[Instance],
    params: &Parameters,
    ctx: &RunContext,
    rng: &mut StdRng,
    target: Option<usize>,
) -> Result<bool, ClusterError> {
    if !params.supervised {
        return Err(ClusterError::InvalidParameters(
            "post-optimization requires supervised mode".to_string(),
        ));
    }
    let Some(target_index) = target else {
        return Err(ClusterError::InvalidParameters(
            "post-optimization requires a target attribute".to_string(),
        ));
    };
    debug_assert!(
        clustering.clusters().iter().all(|c| !c.target_probs().is_empty()),
        "post-optimization entered without target probabilities"
    );

    if !greedy(clustering, instances, params, ctx, target_index)? {
        return Ok(false);
    }
    if params.vns_level > 0 {
        return vns(clustering, instances, params, ctx, rng, target_index);
    }
    Ok(true)
}

/// Repeatedly remove the cluster whose removal yields the largest EVA,
/// reassigning its members to their next-nearest surviving cluster, until
/// the floor is reached or no removal improves the best EVA observed.
fn greedy(
    clustering: &mut Clustering,
    instances: &[Instance],
    params: &Parameters,
    ctx: &RunContext,
    target_index: usize,
) -> Result<bool, ClusterError> {
    let k = clustering.k();
    if k == 0 {
        return Ok(true);
    }
    ctx.progress.set_label("Clustering post-optimization");

    let scorer = QualityScorer::new(params, ctx.costs);
    let mut table = clustering.modality_frequencies();
    let total = table.total();
    let null_cost = scorer.eva_null_cost(&table);
    let mut overall_best = scorer.eva(&table);
    let start_eva = overall_best;

    // per-instance cluster lists by ascending distance, precomputed once
    let ascending = clusters_by_ascending_distance(clustering, instances, params);
    let modality = modality_of(clustering, instances, target_index);

    let mut alive = vec![true; k];
    let mut best_alive = alive.clone();
    let mut working: Vec<Option<usize>> = clustering.assignments().to_vec();
    let mut current_k = k;

    if params.verbose {
        log::info!("post-optimization for the best replicate:");
        log::info!(
            "{:>8} {:>14} {:>18} {:>14} {:>18}",
            "K",
            "best EVA",
            "cluster removed",
            "best K",
            "overall best EVA"
        );
        log::info!("{:>8} {:>14.6} {:>18} {:>14} {:>18.6}", k, overall_best, "-", k, overall_best);
    }

    while current_k > params.min_k_post_optimization {
        let first_term = scorer.eva_first_term(current_k - 1, total);
        let mut candidate: Option<Removal> = None;

        for removed in 0..k {
            if ctx.cancel.is_cancelled() {
                return Ok(false);
            }
            if !alive[removed] {
                continue;
            }
            let mut hypothetical = table.clone();
            hypothetical.clear_row(removed);
            let mut moves: Vec<(usize, usize)> = Vec::new();
            let mut feasible = true;

            for (position, &assigned) in working.iter().enumerate() {
                if assigned != Some(removed) {
                    continue;
                }
                let next = ascending[position]
                    .as_ref()
                    .and_then(|list| {
                        list.iter()
                            .copied()
                            .find(|&c| c != removed && alive[c])
                    });
                let Some(next) = next else {
                    feasible = false;
                    break;
                };
                let Some(slot) = modality[position] else {
                    feasible = false;
                    break;
                };
                hypothetical.increment(next, slot);
                moves.push((position, next));
            }
            if !feasible {
                log::warn!("nearest available cluster not found, aborting post-optimization");
                return Ok(true);
            }

            let cost = first_term
                + scorer.eva_second_term(&hypothetical)
                + scorer.eva_third_term(&hypothetical);
            let eva = if null_cost == 0.0 { 0.0 } else { 1.0 - cost / null_cost };
            if candidate.as_ref().map(|c| eva > c.eva).unwrap_or(true) {
                candidate = Some(Removal {
                    cluster: removed,
                    eva,
                    table: hypothetical,
                    moves,
                });
            }
        }

        let Some(removal) = candidate else {
            break;
        };
        if removal.eva < overall_best {
            // no removal improves the best EVA observed across the descent
            break;
        }
        table = removal.table;
        alive[removal.cluster] = false;
        for (position, next) in removal.moves {
            working[position] = Some(next);
        }
        current_k -= 1;
        overall_best = removal.eva;
        best_alive = alive.clone();

        if params.verbose {
            log::info!(
                "{:>8} {:>14.6} {:>18} {:>14} {:>18.6}",
                current_k,
                removal.eva,
                clustering.cluster(removal.cluster).label(),
                current_k,
                overall_best
            );
        }
    }

    if best_alive.iter().any(|&kept| !kept) {
        for index in (0..clustering.k()).rev() {
            if !best_alive[index] {
                clustering.delete_cluster_at(index);
            }
        }
        refresh(clustering, instances, params, ctx, target_index);
        if params.verbose {
            log::info!(
                "post-optimization done, EVA went from {:.6} to {:.6}, K is now {}",
                start_eva,
                clustering.scores().eva.unwrap_or(overall_best),
                clustering.k()
            );
        }
    } else if params.verbose {
        log::info!("post-optimization done, no removal improved EVA");
    }
    Ok(true)
}

struct Removal {
    cluster: usize,
    eva: Real,
    table: FrequencyTable,
    moves: Vec<(usize, usize)>,
}

/// Variable Neighborhood Search: perturb the optimised clustering by
/// reseeding a growing share of it from its own instances, re-run the
/// greedy descent, adopt improvements and reset the neighbourhood degree.
fn vns(
    clustering: &mut Clustering,
    instances: &[Instance],
    params: &Parameters,
    ctx: &RunContext,
    rng: &mut StdRng,
    target_index: usize,
) -> Result<bool, ClusterError> {
    let n = clustering
        .global()
        .map(Cluster::frequency)
        .unwrap_or_else(|| clustering.total_frequency());
    if n < 3 {
        return Ok(true);
    }
    let log_n = (n as Real).ln();
    let max_level = (log_n + 0.5).round() as usize;
    let level = if params.vns_level > max_level {
        log::warn!("VNS level is set too high, clamped to {max_level}");
        max_level
    } else {
        params.vns_level
    };
    let k_max_zero = (n as Real / log_n) as usize;
    let numerator = ((1usize << level) - 1) as Real;
    let denominator = ((1usize << max_level.min(62)) - 1) as Real;
    let k_max =
        ((numerator / denominator) * (n as usize - k_max_zero) as Real) as usize + k_max_zero;
    let max_degree = 1usize << level;
    let mut degree = 1usize;

    if params.verbose {
        log::info!("VNS post-optimization (KMax = {k_max}, max degree = {max_degree})");
    }

    let mut best = clustering.clone();
    let mut best_eva = clustering.scores().eva.unwrap_or(0.0);

    while degree < max_degree {
        if ctx.cancel.is_cancelled() {
            return Ok(false);
        }
        let share = degree as Real / max_degree as Real;
        let k = clustering.k();
        let challenged_count = ((share * k as Real + 0.5).round() as usize).clamp(1, k);

        let indices: Vec<usize> = (0..k).collect();
        let mut challenged: Vec<usize> = indices
            .choose_multiple(rng, challenged_count)
            .copied()
            .collect();
        challenged.sort_unstable();

        // pool the challenged members, reseed from a share of them
        let mut pool: Vec<usize> = challenged
            .iter()
            .flat_map(|&c| clustering.cluster(c).members().iter().copied())
            .collect();
        pool.shuffle(rng);
        let new_count = (((share * pool.len() as Real) + 0.5).round() as usize)
            .min(k_max)
            .max(1)
            .min(pool.len());
        if pool.is_empty() {
            degree += 1;
            continue;
        }

        for &index in challenged.iter().rev() {
            clustering.delete_cluster_at(index);
        }
        for (i, &position) in pool[..new_count].iter().enumerate() {
            let mut cluster = Cluster::new(
                format!("VNS_degree_{}_number_{}", degree, i + 1),
                clustering.k(),
            );
            cluster.seed_centroid(&instances[position]);
            cluster.freeze_initial_centroid();
            clustering.push_cluster(cluster);
        }

        refresh(clustering, instances, params, ctx, target_index);
        let initial_k = clustering.k();
        if !greedy(clustering, instances, params, ctx, target_index)? {
            return Ok(false);
        }
        let eva = clustering.scores().eva.unwrap_or(0.0);

        if params.verbose {
            log::info!(
                "VNS degree {:>3}: initial K {:>5}, final K {:>5}, EVA {:>12.6}, overall best {:>12.6}",
                degree,
                initial_k,
                clustering.k(),
                eva,
                best_eva
            );
        }

        if eva > best_eva {
            degree = 1;
            best_eva = eva;
            best = clustering.clone();
        } else {
            degree += 1;
        }
    }

    *clustering = best;
    refresh(clustering, instances, params, ctx, target_index);
    if params.verbose {
        log::info!(
            "VNS post-optimization done, EVA is {:.6}, K is {}",
            clustering.scores().eva.unwrap_or(best_eva),
            clustering.k()
        );
    }
    Ok(true)
}

/// re-assign every instance against the surviving centroids, drop any
/// cluster that came back empty, close the statistics and re-score
fn refresh(
    clustering: &mut Clustering,
    instances: &[Instance],
    params: &Parameters,
    ctx: &RunContext,
    target_index: usize,
) {
    engine::assign_all(clustering, instances, params);
    let dropped = engine::manage_empty_clusters(clustering, instances, params, false);
    if dropped > 0 {
        clustering.rebuild_assignments_from_members(instances.len());
        engine::assign_all(clustering, instances, params);
    }
    for cluster in clustering.clusters_mut() {
        for norm in DistanceNorm::ALL {
            cluster.compute_distance_sum(norm, instances, params);
        }
        cluster.set_frequency(cluster.count() as u64);
        cluster.compute_nearest_member(params.norm, instances, params);
        cluster.compute_inertia_intra(params.norm, instances, params);
        cluster.set_stats_up_to_date(true);
    }
    clustering.update_global_distance_sums();
    clustering.rebuild_distance_matrix(params);
    engine::score_replicate(clustering, instances, params, ctx, Some(target_index));
}

/// for every assigned instance, the cluster indices sorted by ascending
/// distance to the instance
fn clusters_by_ascending_distance(
    clustering: &Clustering,
    instances: &[Instance],
    params: &Parameters,
) -> Vec<Option<Vec<usize>>> {
    let k = clustering.k();
    clustering
        .assignments()
        .iter()
        .enumerate()
        .map(|(position, assigned)| {
            assigned.map(|_| {
                let mut order: Vec<usize> = (0..k).collect();
                let distances: Vec<Real> = (0..k)
                    .map(|c| {
                        metric::distance(
                            params.norm,
                            instances[position].values(),
                            clustering.cluster(c).centroid(),
                            &params.mask,
                        )
                    })
                    .collect();
                order.sort_by(|&a, &b| {
                    distances[a]
                        .partial_cmp(&distances[b])
                        .expect("finite distances")
                        .then(a.cmp(&b))
                });
                order
            })
        })
        .collect()
}

/// target-modality slot of every instance position
fn modality_of(
    clustering: &Clustering,
    instances: &[Instance],
    target_index: usize,
) -> Vec<Option<usize>> {
    instances
        .iter()
        .map(|instance| {
            instance
                .symbol(target_index)
                .and_then(|value| clustering.targets().index_of(value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::FeatureMask;
    use crate::params::PostOptimization;
    use crate::params::ReplicateChoice;
    use crate::tests::labelled_blobs;
    use rand::SeedableRng;

    fn trained(k: usize, seed: u64) -> (Vec<Instance>, Parameters, Clustering) {
        let instances = labelled_blobs(120, 3, seed);
        let params = Parameters::new(k, FeatureMask::new(vec![Some(0), Some(1)]))
            .with_target(0, "c0")
            .with_replicates(1, ReplicateChoice::Eva)
            .with_max_iterations(50)
            .with_seed(seed);
        let mut clustering = Clustering::new();
        let mut rng = StdRng::seed_from_u64(seed);
        engine::compute_replicate(
            &mut clustering,
            &instances,
            &params,
            &RunContext::new(),
            &mut rng,
            Some(0),
        )
        .expect("replicate runs");
        (instances, params, clustering)
    }

    #[test]
    fn greedy_never_decreases_best_eva() {
        // over-segmented clustering of three real groups
        let (instances, params, mut clustering) = trained(6, 42);
        let params = params.with_post_optimization(PostOptimization::Fast, 2);
        let before = clustering.scores().eva.expect("eva computed");
        let mut rng = StdRng::seed_from_u64(42);
        let complete = post_optimize(
            &mut clustering,
            &instances,
            &params,
            &RunContext::new(),
            &mut rng,
            Some(0),
        )
        .expect("post-optimization runs");
        assert!(complete);
        let after = clustering.scores().eva.expect("eva recomputed");
        assert!(
            after >= before - 1e-9,
            "EVA decreased from {before} to {after}"
        );
        assert!(clustering.k() >= 2);
        assert!(clustering.k() <= 6);
    }

    #[test]
    fn greedy_respects_the_k_floor() {
        let (instances, params, mut clustering) = trained(4, 7);
        let params = params.with_post_optimization(PostOptimization::Fast, 3);
        let mut rng = StdRng::seed_from_u64(7);
        post_optimize(
            &mut clustering,
            &instances,
            &params,
            &RunContext::new(),
            &mut rng,
            Some(0),
        )
        .expect("post-optimization runs");
        assert!(clustering.k() >= 3);
    }

    #[test]
    fn unsupervised_post_optimization_is_invalid() {
        let (instances, mut params, mut clustering) = trained(3, 42);
        params.supervised = false;
        let mut rng = StdRng::seed_from_u64(42);
        let result = post_optimize(
            &mut clustering,
            &instances,
            &params,
            &RunContext::new(),
            &mut rng,
            Some(0),
        );
        assert!(matches!(result, Err(ClusterError::InvalidParameters(_))));
    }

    #[test]
    fn vns_keeps_the_best_clustering() {
        let (instances, mut params, mut clustering) = trained(5, 42);
        params.vns_level = 2;
        params.min_k_post_optimization = 2;
        params.post_optimization = PostOptimization::Fast;
        let before = clustering.scores().eva.expect("eva computed");
        let mut rng = StdRng::seed_from_u64(42);
        let complete = post_optimize(
            &mut clustering,
            &instances,
            &params,
            &RunContext::new(),
            &mut rng,
            Some(0),
        )
        .expect("vns runs");
        assert!(complete);
        let after = clustering.scores().eva.expect("eva recomputed");
        assert!(after >= before - 0.05, "VNS lost quality: {before} -> {after}");
        assert!(clustering.is_up_to_date());
    }
}
