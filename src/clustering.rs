use crate::Real;
use crate::Symbol;
use crate::cluster::Cluster;
use crate::instance::Instance;
use crate::instance::TargetTable;
use crate::metric;
use crate::metric::DistanceNorm;
use crate::params::Parameters;
use crate::quality::FrequencyTable;
use crate::quality::QualityScores;

/// Symmetric inter-centroid distance matrix, zero on the diagonal.
/// Single contiguous row-major buffer, rebuilt whole on refresh.
#[derive(Debug, Clone, Default)]
pub struct DistanceMatrix {
    k: usize,
    values: Vec<Real>,
}

impl DistanceMatrix {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            values: vec![0.0; k * k],
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn get(&self, i: usize, j: usize) -> Real {
        self.values[i * self.k + j]
    }

    fn set(&mut self, i: usize, j: usize, value: Real) {
        self.values[i * self.k + j] = value;
    }

    fn resize(&mut self, k: usize) {
        self.k = k;
        self.values.clear();
        self.values.resize(k * k, 0.0);
    }
}

/// A set of clusters plus everything the engine learns about them: the
/// global cluster, the inter-centroid matrix, the instance assignment
/// table, per-norm totals, the target table, the confusion matrix and the
/// quality scores of the run.
#[derive(Debug, Clone, Default)]
pub struct Clustering {
    clusters: Vec<Cluster>,
    global: Option<Cluster>,
    matrix: DistanceMatrix,
    /// instance position -> cluster index; None for rows with missing
    /// K-Means values; empty in mini-batch mode
    assignments: Vec<Option<usize>>,
    distance_sums: [Real; 3],
    targets: TargetTable,
    confusion: Option<FrequencyTable>,
    scores: QualityScores,
    iterations: usize,
    dropped: usize,
    missing_values: u64,
    up_to_date: bool,
}

impl Clustering {
    pub fn new() -> Self {
        Self {
            up_to_date: true,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // clusters

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn clusters_mut(&mut self) -> &mut [Cluster] {
        &mut self.clusters
    }

    pub fn cluster(&self, index: usize) -> &Cluster {
        &self.clusters[index]
    }

    pub fn cluster_mut(&mut self, index: usize) -> &mut Cluster {
        &mut self.clusters[index]
    }

    pub fn k(&self) -> usize {
        self.clusters.len()
    }

    pub fn push_cluster(&mut self, mut cluster: Cluster) -> usize {
        let index = self.clusters.len();
        cluster.set_index(index);
        self.clusters.push(cluster);
        index
    }

    pub fn clear_clusters(&mut self) {
        self.clusters.clear();
    }

    /// remove a cluster and compact the indices of its successors; the
    /// assignment table must be rebuilt by the caller
    pub fn delete_cluster_at(&mut self, index: usize) {
        self.clusters.remove(index);
        self.reindex();
    }

    fn reindex(&mut self) {
        for (i, cluster) in self.clusters.iter_mut().enumerate() {
            cluster.set_index(i);
        }
    }

    // ------------------------------------------------------------------
    // global cluster

    pub fn global(&self) -> Option<&Cluster> {
        self.global.as_ref()
    }

    pub fn global_mut(&mut self) -> Option<&mut Cluster> {
        self.global.as_mut()
    }

    pub fn set_global(&mut self, global: Cluster) {
        self.global = Some(global);
    }

    /// aggregate all complete instances into the global cluster and compute
    /// its statistics; rows with missing K-Means values are counted out
    pub fn compute_global_cluster(&mut self, instances: &[Instance], params: &Parameters) {
        let mut global = Cluster::new("global", 0);
        self.missing_values = 0;
        for (position, instance) in instances.iter().enumerate() {
            if params.has_missing_kmeans_value(instance) {
                self.missing_values += 1;
            } else {
                global.add(position);
            }
        }
        if global.count() > 0 {
            global.compute_iteration_stats(instances, params);
            global.compute_nearest_member(params.norm, instances, params);
            for norm in DistanceNorm::ALL {
                if norm != params.norm {
                    global.compute_distance_sum(norm, instances, params);
                }
            }
            global.compute_inertia_intra(params.norm, instances, params);
        }
        self.global = Some(global);
    }

    pub fn missing_values(&self) -> u64 {
        self.missing_values
    }

    // ------------------------------------------------------------------
    // assignments

    pub fn reset_assignments(&mut self, n: usize) {
        self.assignments.clear();
        self.assignments.resize(n, None);
    }

    pub fn assignment(&self, position: usize) -> Option<usize> {
        self.assignments.get(position).copied().flatten()
    }

    pub fn assign(&mut self, position: usize, cluster: usize) {
        self.assignments[position] = Some(cluster);
    }

    pub fn assignments(&self) -> &[Option<usize>] {
        &self.assignments
    }

    /// rebuild the assignment table from the membership lists, after
    /// cluster deletions compacted the indices
    pub fn rebuild_assignments_from_members(&mut self, n: usize) {
        self.reset_assignments(n);
        for index in 0..self.clusters.len() {
            for position in self.clusters[index].members().to_vec() {
                self.assignments[position] = Some(index);
            }
        }
    }

    // ------------------------------------------------------------------
    // inter-centroid distances

    pub fn matrix(&self) -> &DistanceMatrix {
        &self.matrix
    }

    /// rebuild the whole matrix and refresh every cluster's nearest-sibling
    /// index; also reassigns compact cluster indices
    pub fn rebuild_distance_matrix(&mut self, params: &Parameters) {
        let k = self.clusters.len();
        self.reindex();
        self.matrix.resize(k);
        for i in 0..k {
            for j in (i + 1)..k {
                let d = metric::distance(
                    params.norm,
                    self.clusters[i].centroid(),
                    self.clusters[j].centroid(),
                    &params.mask,
                );
                self.matrix.set(i, j, d);
                self.matrix.set(j, i, d);
            }
        }
        for i in 0..k {
            let mut nearest = None;
            let mut minimum = Real::MAX;
            for j in 0..k {
                if i == j && k > 1 {
                    continue;
                }
                if self.matrix.get(i, j) < minimum {
                    minimum = self.matrix.get(i, j);
                    nearest = Some(j);
                }
            }
            self.clusters[i].set_nearest_sibling(nearest);
        }
    }

    // ------------------------------------------------------------------
    // totals

    /// cumulate per-norm distance sums across clusters
    pub fn update_global_distance_sums(&mut self) {
        self.distance_sums = [0.0; 3];
        for cluster in &self.clusters {
            for norm in DistanceNorm::ALL {
                self.distance_sums[norm.index()] += cluster.distance_sum(norm);
            }
        }
    }

    pub fn distance_sum(&self, norm: DistanceNorm) -> Real {
        self.distance_sums[norm.index()]
    }

    pub fn total_frequency(&self) -> u64 {
        self.clusters.iter().map(Cluster::frequency).sum()
    }

    /// average per-instance distance to its cluster centroid
    pub fn mean_distance(&self, norm: DistanceNorm) -> Real {
        let total = self.total_frequency();
        if total == 0 {
            0.0
        } else {
            self.distance_sums[norm.index()] / total as Real
        }
    }

    // ------------------------------------------------------------------
    // supervision

    pub fn targets(&self) -> &TargetTable {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut TargetTable {
        &mut self.targets
    }

    pub fn set_targets(&mut self, targets: TargetTable) {
        self.targets = targets;
    }

    /// target probabilities and majority target for every cluster
    pub fn compute_target_probs(
        &mut self,
        instances: &[Instance],
        target_index: usize,
    ) {
        let targets = self.targets.clone();
        for cluster in &mut self.clusters {
            cluster.compute_target_probs(instances, &targets, target_index);
        }
    }

    /// confusion matrix rows = predicted (majority) target, columns =
    /// actual target
    pub fn compute_confusion_matrix(&mut self, instances: &[Instance], target_index: usize) {
        let j = self.targets.len();
        let mut table = FrequencyTable::new(j, j);
        for cluster in &self.clusters {
            let Some(predicted) = cluster.majority_target_index() else {
                continue;
            };
            for &member in cluster.members() {
                let actual = instances[member]
                    .symbol(target_index)
                    .and_then(|v| self.targets.index_of(v))
                    .expect("training target values are all registered");
                table.increment(predicted, actual);
            }
        }
        self.confusion = Some(table);
    }

    pub fn confusion_matrix(&self) -> Option<&FrequencyTable> {
        self.confusion.as_ref()
    }

    pub fn set_confusion_matrix(&mut self, table: FrequencyTable) {
        self.confusion = Some(table);
    }

    /// cluster x target contingency from the cached target probabilities
    pub fn modality_frequencies(&self) -> FrequencyTable {
        let mut table = FrequencyTable::new(self.clusters.len(), self.targets.len());
        for (row, cluster) in self.clusters.iter().enumerate() {
            for column in 0..self.targets.len() {
                let probability = cluster.target_probs().get(column).copied().unwrap_or(0.0);
                let count = (probability * cluster.frequency() as Real + 0.5) as u64;
                table.set(row, column, count);
            }
        }
        table
    }

    // ------------------------------------------------------------------
    // counters, scores, state

    pub fn scores(&self) -> &QualityScores {
        &self.scores
    }

    pub fn scores_mut(&mut self) -> &mut QualityScores {
        &mut self.scores
    }

    pub fn iterations_done(&self) -> usize {
        self.iterations
    }

    pub fn set_iterations_done(&mut self, iterations: usize) {
        self.iterations = iterations;
    }

    pub fn dropped_clusters(&self) -> usize {
        self.dropped
    }

    pub fn add_dropped_clusters(&mut self, count: usize) {
        self.dropped += count;
    }

    pub fn reset_dropped_clusters(&mut self) {
        self.dropped = 0;
    }

    /// false after a failure mid-pass; the caller must re-run or discard
    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    pub fn mark_not_up_to_date(&mut self) {
        self.up_to_date = false;
    }

    pub fn mark_up_to_date(&mut self) {
        self.up_to_date = true;
    }

    // ------------------------------------------------------------------
    // snapshots

    /// membership-free copies of every cluster, preserving indices
    pub fn snapshot(&self) -> Vec<Cluster> {
        self.clusters.iter().map(Cluster::clone_stats).collect()
    }

    /// restore a snapshot taken earlier in the same replicate
    pub fn restore(&mut self, snapshot: &[Cluster]) {
        for (cluster, saved) in self.clusters.iter_mut().zip(snapshot) {
            cluster.copy_stats_from(saved);
        }
    }

    // ------------------------------------------------------------------
    // boundary artefact

    pub fn summary(&self) -> ClusteringSummary {
        ClusteringSummary {
            k: self.clusters.len(),
            iterations: self.iterations,
            dropped_clusters: self.dropped,
            clusters: self
                .clusters
                .iter()
                .map(|c| ClusterSummary {
                    label: c.label().to_string(),
                    frequency: c.frequency(),
                    coverage: c.coverage(self.total_frequency()),
                    centroid: c.centroid().to_vec(),
                    majority_target: if c.majority_target_value().is_empty() {
                        None
                    } else {
                        Some(c.majority_target_value().clone())
                    },
                    target_probs: c.target_probs().to_vec(),
                    compactness: c.compactness(),
                })
                .collect(),
            scores: self.scores.clone(),
        }
    }
}

/// Serializable snapshot of a trained clustering, the artefact handed to
/// report writers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClusteringSummary {
    pub k: usize,
    pub iterations: usize,
    pub dropped_clusters: usize,
    pub clusters: Vec<ClusterSummary>,
    pub scores: QualityScores,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClusterSummary {
    pub label: String,
    pub frequency: u64,
    pub coverage: Real,
    pub centroid: Vec<Real>,
    pub majority_target: Option<Symbol>,
    pub target_probs: Vec<Real>,
    pub compactness: Real,
}
