use crate::Real;
use crate::cluster::Cluster;
use crate::clustering::Clustering;
use crate::engine;
use crate::error::ClusterError;
use crate::instance::Instance;
use crate::instance::TargetTable;
use crate::metric;
use crate::metric::DistanceNorm;
use crate::params::ClusteringKind;
use crate::params::InitMethod;
use crate::params::Parameters;
use crate::runtime::RunContext;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

/// Seed K centroids before the iteration loop, assign every instance to
/// its nearest seed and compute the initial statistics.
///
/// Every strategy copies real instance values into fresh centroids and
/// rejects the run when fewer than K complete rows exist. Ok(false) means
/// cancellation was observed inside a nested convergence.
pub fn initialize(
    clustering: &mut Clustering,
    instances: &[Instance],
    order: &[usize],
    params: &Parameters,
    ctx: &RunContext,
    rng: &mut StdRng,
    target: Option<usize>,
) -> Result<bool, ClusterError> {
    debug_assert!(clustering.k() == 0);
    ctx.progress.set_label("Clusters initialization");
    clustering.reset_assignments(instances.len());

    let complete: Vec<usize> = (0..instances.len())
        .filter(|&p| !params.has_missing_kmeans_value(&instances[p]))
        .collect();
    if complete.len() < params.k {
        return Err(ClusterError::DegenerateInit(
            "too many missing values".to_string(),
        ));
    }
    if instances.len() - complete.len() > instances.len() / 2 {
        log::warn!("many missing values, initialization may take some time");
    }

    let method = params.resolved_init_method();
    let targets = clustering.targets().clone();
    match method {
        InitMethod::Auto => unreachable!("resolved before dispatch"),
        InitMethod::Random => {
            random_seeds(clustering, instances, &complete, params.k, rng)?;
        }
        InitMethod::Sample => {
            if !sample_seeds(clustering, instances, order, &complete, params, ctx, rng)? {
                return Ok(false);
            }
        }
        InitMethod::KMeansPlusPlus => {
            plus_plus_seeds(clustering, instances, &complete, params, rng)?;
        }
        InitMethod::KMeansPlusPlusR => {
            require_supervised(method, params.k, target)?;
            rocchio_seeds(clustering, instances, &complete, params, &targets, target)?;
            plus_plus_seeds(clustering, instances, &complete, params, rng)?;
        }
        InitMethod::RocchioThenSplit => {
            require_supervised(method, params.k, target)?;
            rocchio_then_split_seeds(clustering, instances, &complete, params, &targets, target)?;
        }
        InitMethod::Bisecting => {
            if params.k <= 1 {
                return Err(ClusterError::DegenerateInit(
                    "bisecting needs K greater than 1".to_string(),
                ));
            }
            bisecting_seeds(clustering, instances, &complete, params, rng)?;
        }
        InitMethod::MinMaxRandom => {
            min_max_seeds(clustering, instances, &complete, params, rng, false)?;
        }
        InitMethod::MinMaxDeterministic => {
            min_max_seeds(clustering, instances, &complete, params, rng, true)?;
        }
        InitMethod::VariancePartitioning => {
            variance_partitioning_seeds(clustering, instances, &complete, params)?;
        }
        InitMethod::ClassDecomposition => {
            require_supervised(method, params.k, target)?;
            class_decomposition_seeds(
                clustering, instances, &complete, params, &targets, target, rng,
            )?;
        }
    }

    if params.clustering == ClusteringKind::KMeans && clustering.k() < params.k {
        return Err(ClusterError::DegenerateInit(format!(
            "only {} cluster centroid(s) could be created with this initialization method",
            clustering.k()
        )));
    }

    for cluster in clustering.clusters_mut() {
        cluster.freeze_initial_centroid();
    }

    ctx.progress
        .set_label("Clusters initialization: assigning instances to created clusters");
    engine::assign_all(clustering, instances, params);

    // seeds that attracted nothing are dropped; K-Means treats that as a
    // failed initialization, KNN tolerates it down to its floor
    let mut dropped = 0usize;
    let mut index = 0usize;
    while index < clustering.k() {
        if clustering.cluster(index).count() == 0 {
            clustering.delete_cluster_at(index);
            dropped += 1;
        } else {
            index += 1;
        }
    }
    if dropped > 0 {
        clustering.add_dropped_clusters(dropped);
        clustering.rebuild_assignments_from_members(instances.len());
        match params.clustering {
            ClusteringKind::Knn => {
                if clustering.k() < params.min_k_post_optimization {
                    return Err(ClusterError::DegenerateInit(
                        "unable to initialize KNN clustering with the requested minimal K"
                            .to_string(),
                    ));
                }
            }
            ClusteringKind::KMeans => {
                return Err(ClusterError::DegenerateInit(format!(
                    "{dropped} empty cluster(s) have been dropped after instance re-assignment"
                )));
            }
        }
    }

    for cluster in clustering.clusters_mut() {
        if params.max_iterations != -1 {
            cluster.compute_iteration_stats(instances, params);
        } else {
            // the init-time centroids are kept; only close their statistics
            for norm in DistanceNorm::ALL {
                cluster.compute_distance_sum(norm, instances, params);
            }
            cluster.set_frequency(cluster.count() as u64);
            cluster.compute_nearest_member(params.norm, instances, params);
            cluster.compute_inertia_intra(params.norm, instances, params);
            cluster.set_stats_up_to_date(true);
        }
    }

    clustering.rebuild_distance_matrix(params);

    if method != InitMethod::Bisecting && method != InitMethod::ClassDecomposition {
        for (index, cluster) in clustering.clusters_mut().iter_mut().enumerate() {
            cluster.set_label(format!("{}", index + 1));
        }
    }
    Ok(true)
}

fn require_supervised(
    method: InitMethod,
    k: usize,
    target: Option<usize>,
) -> Result<(), ClusterError> {
    if target.is_none() {
        return Err(ClusterError::DegenerateInit(format!(
            "{} is available only in supervised mode",
            method.label()
        )));
    }
    if k <= 1 && method != InitMethod::ClassDecomposition {
        return Err(ClusterError::DegenerateInit(format!(
            "{} is possible only if K is greater than 1",
            method.label()
        )));
    }
    Ok(())
}

fn push_seed(clustering: &mut Clustering, centroid: Vec<Real>) -> usize {
    let index = clustering.k();
    let mut cluster = Cluster::new(format!("{}", index + 1), index);
    cluster.set_centroid(centroid);
    clustering.push_cluster(cluster)
}

// ----------------------------------------------------------------------
// Random and Sample

/// K distinct complete instances, uniformly without replacement
fn random_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    complete: &[usize],
    k: usize,
    rng: &mut StdRng,
) -> Result<(), ClusterError> {
    let chosen: Vec<usize> = complete.choose_multiple(rng, k).copied().collect();
    if chosen.len() < k {
        return Err(ClusterError::DegenerateInit(
            "not enough complete instances to draw K centers".to_string(),
        ));
    }
    for position in chosen {
        push_seed(clustering, instances[position].values().to_vec());
    }
    Ok(())
}

/// random seeding followed by a full convergence on a sub-sample; the
/// converged centroids seed the full-data run
fn sample_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    order: &[usize],
    complete: &[usize],
    params: &Parameters,
    ctx: &RunContext,
    rng: &mut StdRng,
) -> Result<bool, ClusterError> {
    random_seeds(clustering, instances, complete, params.k, rng)?;
    engine::assign_all(clustering, instances, params);
    for cluster in clustering.clusters_mut() {
        cluster.compute_iteration_stats(instances, params);
    }

    let x = instances.len() as Real;
    let sample_size = ((x * (1.0 / (2.0 * x).powf(0.23))) as usize).max(params.k);
    if params.verbose {
        log::info!("sample size is {sample_size} instances");
    }
    let finished = engine::converge(clustering, instances, order, sample_size, params, ctx, true);
    if params.verbose && clustering.dropped_clusters() > 0 {
        log::warn!(
            "sample convergence has {} dropped cluster(s)",
            clustering.dropped_clusters()
        );
    }
    Ok(finished)
}

// ----------------------------------------------------------------------
// KMeans++ family

/// add centers drawn with probability proportional to the squared distance
/// to the nearest already-chosen center, until K exist; the first center
/// (when none exists yet) is uniform
fn plus_plus_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    complete: &[usize],
    params: &Parameters,
    rng: &mut StdRng,
) -> Result<(), ClusterError> {
    if clustering.k() == 0 {
        let first = *complete.choose(rng).expect("complete rows exist");
        push_seed(clustering, instances[first].values().to_vec());
    }

    // nearest-center distance per candidate, maintained incrementally
    let mut nearest: Vec<Real> = complete
        .iter()
        .map(|&p| {
            (0..clustering.k())
                .map(|c| {
                    metric::distance(
                        params.norm,
                        instances[p].values(),
                        clustering.cluster(c).centroid(),
                        &params.mask,
                    )
                })
                .fold(Real::MAX, Real::min)
        })
        .collect();

    while clustering.k() < params.k {
        let weights: Vec<Real> = nearest.iter().map(|&d| d * d).collect();
        let position = match WeightedIndex::new(&weights) {
            Ok(distribution) => complete[distribution.sample(rng)],
            // all candidates sit on a chosen center already
            Err(_) => *complete.choose(rng).expect("complete rows exist"),
        };
        push_seed(clustering, instances[position].values().to_vec());
        let center = clustering.cluster(clustering.k() - 1).centroid().to_vec();
        for (slot, &p) in nearest.iter_mut().zip(complete.iter()) {
            let d = metric::distance(params.norm, instances[p].values(), &center, &params.mask);
            *slot = slot.min(d);
        }
    }
    Ok(())
}

/// one cluster per target modality, centroid at the modality mean
fn rocchio_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    complete: &[usize],
    params: &Parameters,
    targets: &TargetTable,
    target: Option<usize>,
) -> Result<(), ClusterError> {
    let target_index = target.expect("supervision checked by the caller");
    if params.k < targets.len() {
        return Err(ClusterError::DegenerateInit(format!(
            "K ({}) is smaller than the number of target values ({})",
            params.k,
            targets.len()
        )));
    }
    for modality in targets.values() {
        let members: Vec<usize> = complete
            .iter()
            .copied()
            .filter(|&p| instances[p].symbol(target_index).map(|s| s == modality) == Some(true))
            .collect();
        if members.is_empty() {
            continue;
        }
        push_seed(clustering, mean_centroid(instances, &members, params));
    }
    Ok(())
}

/// Rocchio clusters, then repeated splits of the highest-inertia cluster
/// at its two mutually-farthest members, until K centers exist
fn rocchio_then_split_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    complete: &[usize],
    params: &Parameters,
    targets: &TargetTable,
    target: Option<usize>,
) -> Result<(), ClusterError> {
    let target_index = target.expect("supervision checked by the caller");
    if params.k < targets.len() {
        return Err(ClusterError::DegenerateInit(format!(
            "K ({}) is smaller than the number of target values ({})",
            params.k,
            targets.len()
        )));
    }

    // cells of (positions, centroid) to be split in place
    let mut cells: Vec<Vec<usize>> = targets
        .values()
        .iter()
        .map(|modality| {
            complete
                .iter()
                .copied()
                .filter(|&p| {
                    instances[p].symbol(target_index).map(|s| s == modality) == Some(true)
                })
                .collect::<Vec<usize>>()
        })
        .filter(|members| !members.is_empty())
        .collect();

    while cells.len() < params.k {
        let Some(widest) = widest_cell(&cells, instances, params) else {
            return Err(ClusterError::DegenerateInit(
                "no splittable cluster left before reaching K".to_string(),
            ));
        };
        let members = cells.swap_remove(widest);
        let (a, b) = farthest_pair(&members, instances, params);
        let (left, right) = split_between(&members, a, b, instances, params);
        cells.push(left);
        cells.push(right);
    }

    for members in cells {
        push_seed(clustering, mean_centroid(instances, &members, params));
    }
    Ok(())
}

/// index of the cell with the largest mean distance to its own centroid,
/// among cells that still have two members to offer
fn widest_cell(
    cells: &[Vec<usize>],
    instances: &[Instance],
    params: &Parameters,
) -> Option<usize> {
    cells
        .iter()
        .enumerate()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(i, members)| {
            let centroid = mean_centroid(instances, members, params);
            let inertia = members
                .iter()
                .map(|&p| {
                    metric::distance(params.norm, instances[p].values(), &centroid, &params.mask)
                })
                .sum::<Real>()
                / members.len() as Real;
            (i, inertia)
        })
        .filter(|(_, inertia)| *inertia > 0.0)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).expect("finite inertia"))
        .map(|(i, _)| i)
}

/// the two members maximising their mutual distance
fn farthest_pair(members: &[usize], instances: &[Instance], params: &Parameters) -> (usize, usize) {
    let mut best = (members[0], members[1 % members.len()]);
    let mut best_distance = -1.0;
    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            let d = metric::distance(
                params.norm,
                instances[a].values(),
                instances[b].values(),
                &params.mask,
            );
            if d > best_distance {
                best_distance = d;
                best = (a, b);
            }
        }
    }
    best
}

fn split_between(
    members: &[usize],
    a: usize,
    b: usize,
    instances: &[Instance],
    params: &Parameters,
) -> (Vec<usize>, Vec<usize>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for &p in members {
        let to_a = metric::distance(
            params.norm,
            instances[p].values(),
            instances[a].values(),
            &params.mask,
        );
        let to_b = metric::distance(
            params.norm,
            instances[p].values(),
            instances[b].values(),
            &params.mask,
        );
        if to_b < to_a {
            right.push(p);
        } else {
            left.push(p);
        }
    }
    (left, right)
}

// ----------------------------------------------------------------------
// Bisecting

/// grow from one cluster by re-clustering the widest cell with a bounded
/// nested 2-means
fn bisecting_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    complete: &[usize],
    params: &Parameters,
    rng: &mut StdRng,
) -> Result<(), ClusterError> {
    let mut cells: Vec<Vec<usize>> = vec![complete.to_vec()];
    while cells.len() < params.k {
        let Some(widest) = widest_cell(&cells, instances, params) else {
            return Err(ClusterError::DegenerateInit(
                "no splittable cluster left before reaching K".to_string(),
            ));
        };
        let members = cells.swap_remove(widest);
        let centers = nested_kmeans(
            instances,
            &members,
            2,
            params,
            rng,
            params.bisecting_max_iterations,
            params.bisecting_replicates,
        )?;
        if centers.len() < 2 {
            return Err(ClusterError::DegenerateInit(
                "bisecting sub-clustering collapsed to a single center".to_string(),
            ));
        }
        let (left, right) = split_by_centers(&members, &centers[0], &centers[1], instances, params);
        if left.is_empty() || right.is_empty() {
            return Err(ClusterError::DegenerateInit(
                "bisecting split produced an empty side".to_string(),
            ));
        }
        cells.push(left);
        cells.push(right);
    }
    for (i, members) in cells.into_iter().enumerate() {
        let index = push_seed(clustering, mean_centroid(instances, &members, params));
        clustering
            .cluster_mut(index)
            .set_label(format!("bisecting_{}", i + 1));
    }
    Ok(())
}

fn split_by_centers(
    members: &[usize],
    a: &[Real],
    b: &[Real],
    instances: &[Instance],
    params: &Parameters,
) -> (Vec<usize>, Vec<usize>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for &p in members {
        let to_a = metric::distance(params.norm, instances[p].values(), a, &params.mask);
        let to_b = metric::distance(params.norm, instances[p].values(), b, &params.mask);
        if to_b < to_a {
            right.push(p);
        } else {
            left.push(p);
        }
    }
    (left, right)
}

// ----------------------------------------------------------------------
// MinMax

/// first center random (or the data centroid when deterministic), each
/// next center the instance farthest from its nearest chosen center
fn min_max_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    complete: &[usize],
    params: &Parameters,
    rng: &mut StdRng,
    deterministic: bool,
) -> Result<(), ClusterError> {
    let first_centroid = if deterministic {
        mean_centroid(instances, complete, params)
    } else {
        let position = *complete.choose(rng).expect("complete rows exist");
        instances[position].values().to_vec()
    };
    push_seed(clustering, first_centroid);

    let mut nearest: Vec<Real> = complete
        .iter()
        .map(|&p| {
            metric::distance(
                params.norm,
                instances[p].values(),
                clustering.cluster(0).centroid(),
                &params.mask,
            )
        })
        .collect();

    while clustering.k() < params.k {
        let farthest = nearest
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).expect("finite distances"))
            .map(|(i, _)| i)
            .expect("complete rows exist");
        if nearest[farthest] == 0.0 {
            return Err(ClusterError::DegenerateInit(
                "every remaining instance coincides with a chosen center".to_string(),
            ));
        }
        let position = complete[farthest];
        push_seed(clustering, instances[position].values().to_vec());
        let center = clustering.cluster(clustering.k() - 1).centroid().to_vec();
        for (slot, &p) in nearest.iter_mut().zip(complete.iter()) {
            let d = metric::distance(params.norm, instances[p].values(), &center, &params.mask);
            *slot = slot.min(d);
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// VariancePartitioning

/// iteratively split the cluster with the highest single-feature variance
/// along that feature's median
fn variance_partitioning_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    complete: &[usize],
    params: &Parameters,
) -> Result<(), ClusterError> {
    let mut cells: Vec<Vec<usize>> = vec![complete.to_vec()];
    while cells.len() < params.k {
        let mut best: Option<(usize, usize, Real)> = None;
        for (i, members) in cells.iter().enumerate() {
            if members.len() < 2 {
                continue;
            }
            for feature in params.mask.active() {
                let mean = members
                    .iter()
                    .map(|&p| instances[p].numeric(feature))
                    .sum::<Real>()
                    / members.len() as Real;
                let variance = members
                    .iter()
                    .map(|&p| {
                        let d = instances[p].numeric(feature) - mean;
                        d * d
                    })
                    .sum::<Real>()
                    / members.len() as Real;
                if variance > 0.0 && best.map(|(_, _, v)| variance > v).unwrap_or(true) {
                    best = Some((i, feature, variance));
                }
            }
        }
        let Some((cell, feature, _)) = best else {
            return Err(ClusterError::DegenerateInit(
                "no feature variance left to partition on".to_string(),
            ));
        };
        let members = cells.swap_remove(cell);
        let mut values: Vec<Real> = members.iter().map(|&p| instances[p].numeric(feature)).collect();
        values.sort_by(|a, b| a.partial_cmp(b).expect("finite feature values"));
        let median = if values.len() % 2 == 0 {
            (values[values.len() / 2 - 1] + values[values.len() / 2]) / 2.0
        } else {
            values[values.len() / 2]
        };
        let (mut left, mut right): (Vec<usize>, Vec<usize>) = members
            .iter()
            .copied()
            .partition(|&p| instances[p].numeric(feature) <= median);
        if right.is_empty() {
            // the median coincides with the maximum; split strictly below it
            (left, right) = members
                .iter()
                .copied()
                .partition(|&p| instances[p].numeric(feature) < median);
        }
        cells.push(left);
        cells.push(right);
    }
    for members in cells {
        push_seed(clustering, mean_centroid(instances, &members, params));
    }
    Ok(())
}

// ----------------------------------------------------------------------
// ClassDecomposition

/// an independent K-means inside every target modality, each granted a
/// share of K proportional to the modality frequency
fn class_decomposition_seeds(
    clustering: &mut Clustering,
    instances: &[Instance],
    complete: &[usize],
    params: &Parameters,
    targets: &TargetTable,
    target: Option<usize>,
    rng: &mut StdRng,
) -> Result<(), ClusterError> {
    let target_index = target.expect("supervision checked by the caller");
    let mut cells: Vec<(String, Vec<usize>)> = targets
        .values()
        .iter()
        .map(|modality| {
            let members = complete
                .iter()
                .copied()
                .filter(|&p| {
                    instances[p].symbol(target_index).map(|s| s == modality) == Some(true)
                })
                .collect::<Vec<usize>>();
            (modality.clone(), members)
        })
        .filter(|(_, members)| !members.is_empty())
        .collect();
    // largest modalities claim their share first
    cells.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    if cells.len() > params.k {
        return Err(ClusterError::DegenerateInit(format!(
            "K ({}) is smaller than the number of target values ({})",
            params.k,
            cells.len()
        )));
    }

    let total: usize = cells.iter().map(|(_, m)| m.len()).sum();
    let mut shares: Vec<usize> = cells
        .iter()
        .map(|(_, members)| {
            ((params.k as Real * members.len() as Real / total as Real) as usize)
                .clamp(1, members.len())
        })
        .collect();
    // largest-remainder style adjustment towards an exact total of K
    while shares.iter().sum::<usize>() > params.k {
        let widest = shares
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s > 1)
            .max_by_key(|&(_, &s)| s)
            .map(|(i, _)| i)
            .expect("shares stay above the modality count");
        shares[widest] -= 1;
    }
    while shares.iter().sum::<usize>() < params.k {
        let Some(roomiest) = shares
            .iter()
            .enumerate()
            .filter(|&(i, &s)| s < cells[i].1.len())
            .max_by_key(|(i, _)| cells[*i].1.len())
            .map(|(i, _)| i)
        else {
            break;
        };
        shares[roomiest] += 1;
    }

    for ((modality, members), share) in cells.into_iter().zip(shares) {
        let centers = nested_kmeans(
            instances,
            &members,
            share,
            params,
            rng,
            params.bisecting_max_iterations,
            params.bisecting_replicates,
        )?;
        for (i, center) in centers.into_iter().enumerate() {
            let index = push_seed(clustering, center);
            clustering
                .cluster_mut(index)
                .set_label(format!("{}_{}", modality, i + 1));
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// shared helpers

/// mean of the given rows over the active positions, zero elsewhere
fn mean_centroid(instances: &[Instance], members: &[usize], params: &Parameters) -> Vec<Real> {
    let mut centroid = vec![0.0; params.arity()];
    if members.is_empty() {
        return centroid;
    }
    for &p in members {
        for i in params.mask.active() {
            centroid[i] += instances[p].numeric(i);
        }
    }
    for i in params.mask.active() {
        centroid[i] /= members.len() as Real;
    }
    centroid
}

/// bounded self-contained Lloyd run over a subset of rows; returns the
/// non-empty centroids of the best replicate by total distance
fn nested_kmeans(
    instances: &[Instance],
    members: &[usize],
    k: usize,
    params: &Parameters,
    rng: &mut StdRng,
    max_iterations: i32,
    replicates: usize,
) -> Result<Vec<Vec<Real>>, ClusterError> {
    if members.len() < k {
        return Err(ClusterError::DegenerateInit(
            "not enough instances for a nested sub-clustering".to_string(),
        ));
    }
    let mut best: Option<(Real, Vec<Vec<Real>>, Vec<usize>)> = None;
    for _ in 0..replicates.max(1) {
        let mut centroids: Vec<Vec<Real>> = members
            .choose_multiple(rng, k)
            .map(|&p| instances[p].values().to_vec())
            .collect();
        let mut assigned = vec![0usize; members.len()];
        for _ in 0..max_iterations.max(1) {
            let mut moved = false;
            for (slot, &p) in assigned.iter_mut().zip(members.iter()) {
                let nearest = centroids
                    .iter()
                    .enumerate()
                    .map(|(j, c)| {
                        (j, metric::distance(params.norm, instances[p].values(), c, &params.mask))
                    })
                    .min_by(|(_, a), (_, b)| a.partial_cmp(b).expect("finite distances"))
                    .map(|(j, _)| j)
                    .expect("k centroids exist");
                if nearest != *slot {
                    *slot = nearest;
                    moved = true;
                }
            }
            for (j, centroid) in centroids.iter_mut().enumerate() {
                let cell: Vec<usize> = members
                    .iter()
                    .zip(assigned.iter())
                    .filter(|&(_, &a)| a == j)
                    .map(|(&p, _)| p)
                    .collect();
                if !cell.is_empty() {
                    *centroid = mean_centroid(instances, &cell, params);
                }
            }
            if !moved {
                break;
            }
        }
        let total: Real = assigned
            .iter()
            .zip(members.iter())
            .map(|(&a, &p)| {
                metric::distance(params.norm, instances[p].values(), &centroids[a], &params.mask)
            })
            .sum();
        if best.as_ref().map(|(d, _, _)| total < *d).unwrap_or(true) {
            best = Some((total, centroids, assigned));
        }
    }
    let (_, centroids, assigned) = best.expect("at least one nested replicate ran");
    Ok(centroids
        .into_iter()
        .enumerate()
        .filter(|(j, _)| assigned.iter().any(|&a| a == *j))
        .map(|(_, c)| c)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::FeatureMask;
    use crate::tests::blobs;
    use rand::SeedableRng;

    fn setup(
        k: usize,
        method: InitMethod,
        instances: &[Instance],
    ) -> Result<Clustering, ClusterError> {
        let params = Parameters::new(k, FeatureMask::all_active(2)).with_init_method(method);
        let order: Vec<usize> = (0..instances.len()).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let mut clustering = Clustering::new();
        clustering.compute_global_cluster(instances, &params);
        initialize(
            &mut clustering,
            instances,
            &order,
            &params,
            &RunContext::new(),
            &mut rng,
            None,
        )
        .map(|_| clustering)
    }

    #[test]
    fn unsupervised_strategies_seed_k_clusters() {
        let (instances, _) = blobs(120, 3, 42);
        for method in [
            InitMethod::Random,
            InitMethod::Sample,
            InitMethod::KMeansPlusPlus,
            InitMethod::Bisecting,
            InitMethod::MinMaxRandom,
            InitMethod::MinMaxDeterministic,
            InitMethod::VariancePartitioning,
        ] {
            let clustering = setup(3, method, &instances)
                .unwrap_or_else(|e| panic!("{:?} failed: {e}", method));
            assert_eq!(clustering.k(), 3, "{:?}", method);
            let members: usize = clustering.clusters().iter().map(|c| c.count()).sum();
            assert_eq!(members, instances.len(), "{:?}", method);
            for cluster in clustering.clusters() {
                assert!(cluster.frequency() > 0, "{:?}", method);
                assert!(!cluster.initial_centroid().is_empty(), "{:?}", method);
            }
        }
    }

    #[test]
    fn too_few_complete_rows_is_degenerate() {
        let instances = vec![
            Instance::new(0, vec![1.0, 1.0]),
            Instance::new(1, vec![Real::NAN, 1.0]),
            Instance::new(2, vec![1.0, Real::NAN]),
        ];
        let result = setup(2, InitMethod::Random, &instances);
        assert!(matches!(result, Err(ClusterError::DegenerateInit(_))));
    }

    #[test]
    fn identical_rows_fail_initialization() {
        let instances: Vec<Instance> = (0..100)
            .map(|i| Instance::new(i, vec![1.0, 1.0]))
            .collect();
        let result = setup(5, InitMethod::Random, &instances);
        assert!(matches!(result, Err(ClusterError::DegenerateInit(_))));
    }

    #[test]
    fn knn_mode_tolerates_dropped_seeds() {
        let instances: Vec<Instance> = (0..100)
            .map(|i| Instance::new(i, vec![1.0, 1.0]))
            .collect();
        let mut params = Parameters::new(5, FeatureMask::all_active(2))
            .with_init_method(InitMethod::Random);
        params.clustering = ClusteringKind::Knn;
        params.min_k_post_optimization = 1;
        let order: Vec<usize> = (0..instances.len()).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let mut clustering = Clustering::new();
        clustering.compute_global_cluster(&instances, &params);
        let ok = initialize(
            &mut clustering,
            &instances,
            &order,
            &params,
            &RunContext::new(),
            &mut rng,
            None,
        )
        .expect("KNN initialization tolerates drops");
        assert!(ok);
        assert_eq!(clustering.k(), 1);
        assert_eq!(clustering.dropped_clusters(), 4);
        assert_eq!(clustering.cluster(0).frequency(), 100);
    }

    #[test]
    fn supervised_strategies_honor_modalities() {
        let (instances, labels) = blobs(120, 3, 42);
        let instances: Vec<Instance> = instances
            .into_iter()
            .zip(labels.iter())
            .map(|(i, &label)| {
                Instance::with_symbols(
                    i.id(),
                    i.values().to_vec(),
                    vec![format!("c{label}")],
                )
            })
            .collect();
        for method in [
            InitMethod::KMeansPlusPlusR,
            InitMethod::RocchioThenSplit,
            InitMethod::ClassDecomposition,
        ] {
            let params = Parameters::new(4, FeatureMask::new(vec![Some(0), Some(1)]))
                .with_init_method(method)
                .with_target(0, "c0");
            let order: Vec<usize> = (0..instances.len()).collect();
            let mut rng = StdRng::seed_from_u64(42);
            let mut clustering = Clustering::new();
            clustering.compute_global_cluster(&instances, &params);
            clustering.set_targets(TargetTable::read(&instances, 0, "c0"));
            let ok = initialize(
                &mut clustering,
                &instances,
                &order,
                &params,
                &RunContext::new(),
                &mut rng,
                Some(0),
            )
            .unwrap_or_else(|e| panic!("{:?} failed: {e}", method));
            assert!(ok);
            assert_eq!(clustering.k(), 4, "{:?}", method);
        }
    }

    #[test]
    fn supervised_strategy_without_target_is_degenerate() {
        let (instances, _) = blobs(60, 2, 42);
        let result = setup(3, InitMethod::KMeansPlusPlusR, &instances);
        assert!(matches!(result, Err(ClusterError::DegenerateInit(_))));
    }

    #[test]
    fn rocchio_rejects_k_below_modality_count() {
        let instances: Vec<Instance> = (0..30)
            .map(|i| {
                Instance::with_symbols(
                    i,
                    vec![i as Real, 0.0],
                    vec![format!("c{}", i % 3)],
                )
            })
            .collect();
        let params = Parameters::new(2, FeatureMask::new(vec![Some(0), Some(1)]))
            .with_init_method(InitMethod::KMeansPlusPlusR)
            .with_target(0, "c0");
        let order: Vec<usize> = (0..instances.len()).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let mut clustering = Clustering::new();
        clustering.compute_global_cluster(&instances, &params);
        clustering.set_targets(TargetTable::read(&instances, 0, "c0"));
        let result = initialize(
            &mut clustering,
            &instances,
            &order,
            &params,
            &RunContext::new(),
            &mut rng,
            Some(0),
        );
        assert!(matches!(result, Err(ClusterError::DegenerateInit(_))));
    }
}
