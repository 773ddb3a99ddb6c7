use crate::Real;
use crate::Symbol;
use crate::instance::Instance;
use crate::instance::TargetTable;
use crate::metric;
use crate::metric::DistanceNorm;
use crate::params::Parameters;

const NORMS: usize = 3;

/// One partition cell: centroid, membership, per-cluster statistics.
///
/// Members are positions into the caller's instance slice; the membership
/// list may be discarded (snapshots, mini-batch) while `frequency` and the
/// cached statistics survive. `stats_up_to_date` is the single source of
/// truth for cache consistency: any membership mutation clears it, a
/// finalisation pass sets it.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    label: String,
    index: usize,
    centroid: Vec<Real>,
    initial_centroid: Vec<Real>,
    evaluation_centroid: Vec<Real>,
    members: Vec<usize>,
    frequency: u64,
    distance_sums: [Real; NORMS],
    inertia_intra: [Real; NORMS],
    inertia_intra_by_feature: [Vec<Real>; NORMS],
    inertia_inter: [Real; NORMS],
    /// target counts while streaming, probabilities once finalised
    target_probs: Vec<Real>,
    majority_target_index: Option<usize>,
    majority_target_value: Symbol,
    compactness: Real,
    nearest_sibling: Option<usize>,
    nearest_member: Option<usize>,
    furthest_member: Option<usize>,
    nearest_member_distance: Real,
    furthest_member_distance: Real,
    stats_up_to_date: bool,
}

impl Cluster {
    pub fn new(label: impl Into<String>, index: usize) -> Self {
        Self {
            label: label.into(),
            index,
            nearest_member_distance: Real::MAX,
            ..Self::default()
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    // ------------------------------------------------------------------
    // membership

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn add(&mut self, position: usize) {
        self.members.push(position);
        self.stats_up_to_date = false;
    }

    pub fn remove(&mut self, position: usize) {
        if let Some(at) = self.members.iter().position(|&m| m == position) {
            self.members.swap_remove(at);
            self.stats_up_to_date = false;
        }
    }

    pub fn clear_members(&mut self) {
        self.members.clear();
        self.stats_up_to_date = false;
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// member count; survives when memberships are discarded
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: u64) {
        self.frequency = frequency;
    }

    pub fn bump_frequency(&mut self) {
        self.frequency += 1;
    }

    pub fn coverage(&self, total: u64) -> Real {
        if total == 0 {
            0.0
        } else {
            self.frequency as Real / total as Real
        }
    }

    // ------------------------------------------------------------------
    // centroids

    pub fn centroid(&self) -> &[Real] {
        &self.centroid
    }

    pub fn set_centroid(&mut self, values: Vec<Real>) {
        self.centroid = values;
    }

    pub fn initial_centroid(&self) -> &[Real] {
        &self.initial_centroid
    }

    /// frozen after initialisation, for reporting
    pub fn freeze_initial_centroid(&mut self) {
        self.initial_centroid = self.centroid.clone();
    }

    pub fn evaluation_centroid(&self) -> &[Real] {
        &self.evaluation_centroid
    }

    /// written only by the evaluation collaborator
    pub fn set_evaluation_centroid(&mut self, values: Vec<Real>) {
        self.evaluation_centroid = values;
    }

    /// seed the centroid from a real instance (copied, never referenced)
    pub fn seed_centroid(&mut self, instance: &Instance) {
        self.centroid = instance.values().to_vec();
    }

    // ------------------------------------------------------------------
    // cached statistics

    pub fn stats_up_to_date(&self) -> bool {
        self.stats_up_to_date
    }

    pub fn set_stats_up_to_date(&mut self, up_to_date: bool) {
        self.stats_up_to_date = up_to_date;
    }

    pub fn distance_sum(&self, norm: DistanceNorm) -> Real {
        self.distance_sums[norm.index()]
    }

    pub fn mean_distance(&self, norm: DistanceNorm) -> Real {
        if self.frequency == 0 {
            0.0
        } else {
            self.distance_sums[norm.index()] / self.frequency as Real
        }
    }

    pub fn inertia_intra(&self, norm: DistanceNorm) -> Real {
        self.inertia_intra[norm.index()]
    }

    pub fn inertia_intra_for_feature(&self, norm: DistanceNorm, feature: usize) -> Real {
        self.inertia_intra_by_feature[norm.index()]
            .get(feature)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn inertia_inter(&self, norm: DistanceNorm) -> Real {
        self.inertia_inter[norm.index()]
    }

    pub fn compactness(&self) -> Real {
        self.compactness
    }

    pub fn target_probs(&self) -> &[Real] {
        &self.target_probs
    }

    pub fn set_target_probs(&mut self, probs: Vec<Real>) {
        self.target_probs = probs;
    }

    pub fn majority_target_index(&self) -> Option<usize> {
        self.majority_target_index
    }

    pub fn majority_target_value(&self) -> &Symbol {
        &self.majority_target_value
    }

    pub fn nearest_sibling(&self) -> Option<usize> {
        self.nearest_sibling
    }

    pub fn set_nearest_sibling(&mut self, sibling: Option<usize>) {
        self.nearest_sibling = sibling;
    }

    /// position of the real instance nearest to the centroid
    pub fn nearest_member(&self) -> Option<usize> {
        self.nearest_member
    }

    pub fn furthest_member(&self) -> Option<usize> {
        self.furthest_member
    }

    // ------------------------------------------------------------------
    // full-membership computations

    /// recompute centroid (mean, or median if so parameterised) and the
    /// distance sum in the chosen norm; the minimum refresh that keeps the
    /// Lloyd loop going
    pub fn compute_iteration_stats(&mut self, instances: &[Instance], params: &Parameters) {
        if self.stats_up_to_date {
            // snapshots are up to date by construction and hold no members;
            // recomputing would wipe their statistics
            return;
        }
        self.frequency = self.members.len() as u64;
        if self.frequency == 0 {
            self.distance_sums = [0.0; NORMS];
            self.centroid.clear();
        } else {
            if params.median_centroids {
                self.compute_median_centroid(instances, params);
            } else {
                self.compute_mean_centroid(instances, params);
            }
            self.compute_distance_sum(params.norm, instances, params);
        }
        self.stats_up_to_date = true;
    }

    fn compute_mean_centroid(&mut self, instances: &[Instance], params: &Parameters) {
        let arity = params.arity();
        if self.centroid.len() != arity {
            self.centroid = vec![0.0; arity];
        }
        let mut sums = vec![0.0; arity];
        for &member in &self.members {
            let values = instances[member].values();
            for i in params.mask.active() {
                sums[i] += values[i];
            }
        }
        let count = self.members.len() as Real;
        for i in params.mask.active() {
            self.centroid[i] = sums[i] / count;
        }
    }

    fn compute_median_centroid(&mut self, instances: &[Instance], params: &Parameters) {
        let arity = params.arity();
        if self.centroid.len() != arity {
            self.centroid = vec![0.0; arity];
        }
        let mut values = Vec::with_capacity(self.members.len());
        for i in params.mask.active() {
            values.clear();
            values.extend(self.members.iter().map(|&m| instances[m].numeric(i)));
            values.sort_by(|a, b| a.partial_cmp(b).expect("finite feature values"));
            let n = values.len();
            self.centroid[i] = if n % 2 == 0 {
                (values[n / 2 - 1] + values[n / 2]) / 2.0
            } else {
                values[n / 2]
            };
        }
    }

    pub fn compute_distance_sum(
        &mut self,
        norm: DistanceNorm,
        instances: &[Instance],
        params: &Parameters,
    ) {
        let sum = self
            .members
            .iter()
            .map(|&m| metric::distance(norm, instances[m].values(), &self.centroid, &params.mask))
            .sum();
        self.distance_sums[norm.index()] = sum;
    }

    /// mean distance of members to the centroid
    pub fn compute_inertia_intra(
        &mut self,
        norm: DistanceNorm,
        instances: &[Instance],
        params: &Parameters,
    ) -> Real {
        if self.members.is_empty() {
            return 0.0;
        }
        let sum: Real = self
            .members
            .iter()
            .map(|&m| metric::distance(norm, instances[m].values(), &self.centroid, &params.mask))
            .sum();
        let inertia = sum / self.members.len() as Real;
        self.inertia_intra[norm.index()] = inertia;
        inertia
    }

    /// mean single-feature distance of members to the centroid
    pub fn compute_inertia_intra_for_feature(
        &mut self,
        feature: usize,
        norm: DistanceNorm,
        instances: &[Instance],
        params: &Parameters,
    ) -> Real {
        if self.members.is_empty() {
            return 0.0;
        }
        let slot = &mut self.inertia_intra_by_feature[norm.index()];
        if slot.len() != params.arity() {
            slot.resize(params.arity(), 0.0);
        }
        let sum: Real = self
            .members
            .iter()
            .map(|&m| metric::feature_distance(norm, instances[m].values(), &self.centroid, feature))
            .sum();
        let inertia = sum / self.members.len() as Real;
        self.inertia_intra_by_feature[norm.index()][feature] = inertia;
        inertia
    }

    /// frequency-weighted distance of this centroid to the data centroid
    pub fn compute_inertia_inter(
        &mut self,
        norm: DistanceNorm,
        global_centroid: &[Real],
        total_frequency: u64,
        params: &Parameters,
    ) -> Real {
        if total_frequency == 0 {
            return 0.0;
        }
        let d = metric::distance(norm, &self.centroid, global_centroid, &params.mask);
        let inertia = self.frequency as Real / total_frequency as Real * d;
        self.inertia_inter[norm.index()] = inertia;
        inertia
    }

    pub fn compute_nearest_member(
        &mut self,
        norm: DistanceNorm,
        instances: &[Instance],
        params: &Parameters,
    ) {
        let nearest = self
            .members
            .iter()
            .map(|&m| {
                (
                    m,
                    metric::distance(norm, instances[m].values(), &self.centroid, &params.mask),
                )
            })
            .min_by(|(_, d1), (_, d2)| d1.partial_cmp(d2).expect("finite distances"));
        if let Some((position, distance)) = nearest {
            self.nearest_member = Some(position);
            self.nearest_member_distance = distance;
        }
    }

    pub fn compute_furthest_member(
        &mut self,
        norm: DistanceNorm,
        instances: &[Instance],
        params: &Parameters,
    ) {
        let furthest = self
            .members
            .iter()
            .map(|&m| {
                (
                    m,
                    metric::distance(norm, instances[m].values(), &self.centroid, &params.mask),
                )
            })
            .max_by(|(_, d1), (_, d2)| d1.partial_cmp(d2).expect("finite distances"));
        if let Some((position, distance)) = furthest {
            self.furthest_member = Some(position);
            self.furthest_member_distance = distance;
        }
    }

    /// distribution of actual target values among members, plus the
    /// majority target
    pub fn compute_target_probs(
        &mut self,
        instances: &[Instance],
        targets: &TargetTable,
        target_index: usize,
    ) {
        self.target_probs = vec![0.0; targets.len()];
        if self.members.is_empty() {
            return;
        }
        for &member in &self.members {
            let value = instances[member]
                .symbol(target_index)
                .expect("supervised instances carry a target symbol");
            let slot = targets
                .index_of(value)
                .expect("training target values are all registered");
            self.target_probs[slot] += 1.0;
        }
        let count = self.members.len() as Real;
        for p in &mut self.target_probs {
            *p /= count;
        }
        self.compute_majority_target(targets);
    }

    pub fn compute_majority_target(&mut self, targets: &TargetTable) {
        if self.target_probs.is_empty() {
            return;
        }
        let mut best = 0usize;
        let mut best_prob = 0.0;
        for (i, &p) in self.target_probs.iter().enumerate() {
            if p > best_prob {
                best_prob = p;
                best = i;
            }
        }
        self.majority_target_index = Some(best);
        self.majority_target_value = targets.value(best).clone();
    }

    /// mean similarity of members to the gravity center, weighted by
    /// majority-target agreement
    pub fn compute_compactness(
        &mut self,
        instances: &[Instance],
        target_index: usize,
        params: &Parameters,
    ) -> Real {
        if self.members.is_empty() || self.majority_target_index.is_none() {
            self.compactness = 0.0;
            return 0.0;
        }
        let majority = self.majority_target_value.clone();
        let sum: Real = self
            .members
            .iter()
            .map(|&m| {
                let instance = &instances[m];
                let target = instance
                    .symbol(target_index)
                    .expect("supervised instances carry a target symbol");
                metric::similarity(
                    params.norm,
                    &self.centroid,
                    instance.values(),
                    &params.mask,
                    &majority,
                    target,
                )
            })
            .sum();
        self.compactness = sum / self.members.len() as Real;
        self.compactness
    }

    // ------------------------------------------------------------------
    // incremental statistics, instance at a time (mini-batch and the
    // scoring passes that never hold memberships)

    pub fn update_distance_sum(&mut self, norm: DistanceNorm, instance: &Instance, params: &Parameters) {
        self.distance_sums[norm.index()] +=
            metric::distance(norm, instance.values(), &self.centroid, &params.mask);
    }

    /// accumulate; `finalize_streaming_stats` divides by frequency
    pub fn update_inertia_intra(&mut self, norm: DistanceNorm, instance: &Instance, params: &Parameters) {
        self.inertia_intra[norm.index()] +=
            metric::distance(norm, instance.values(), &self.centroid, &params.mask);
    }

    pub fn update_inertia_intra_for_feature(
        &mut self,
        feature: usize,
        norm: DistanceNorm,
        instance: &Instance,
        params: &Parameters,
    ) {
        let slot = &mut self.inertia_intra_by_feature[norm.index()];
        if slot.len() != params.arity() {
            slot.resize(params.arity(), 0.0);
        }
        slot[feature] += metric::feature_distance(norm, instance.values(), &self.centroid, feature);
    }

    pub fn update_target_count(&mut self, slot: usize, table_len: usize) {
        if self.target_probs.len() != table_len {
            self.target_probs.resize(table_len, 0.0);
        }
        self.target_probs[slot] += 1.0;
    }

    pub fn update_compactness(&mut self, instance: &Instance, target: &str, params: &Parameters) {
        self.compactness += metric::similarity(
            params.norm,
            &self.centroid,
            instance.values(),
            &params.mask,
            &self.majority_target_value,
            target,
        );
    }

    pub fn update_nearest_member(&mut self, position: usize, distance: Real) -> bool {
        if distance < self.nearest_member_distance {
            self.nearest_member_distance = distance;
            self.nearest_member = Some(position);
            true
        } else {
            false
        }
    }

    /// streaming centroid advance: (1 - rate) * centroid + rate * x
    pub fn advance_centroid(&mut self, instance: &Instance, rate: Real, params: &Parameters) {
        for i in params.mask.active() {
            self.centroid[i] = (1.0 - rate) * self.centroid[i] + rate * instance.numeric(i);
        }
    }

    /// close the deferred per-instance sums in a single sweep; no-op when
    /// the statistics are already consistent
    pub fn finalize_streaming_stats(&mut self, targets: Option<&TargetTable>) {
        if self.stats_up_to_date {
            return;
        }
        if self.frequency > 0 {
            let count = self.frequency as Real;
            for slot in &mut self.inertia_intra {
                *slot /= count;
            }
            for per_feature in &mut self.inertia_intra_by_feature {
                for slot in per_feature.iter_mut() {
                    *slot /= count;
                }
            }
            for p in &mut self.target_probs {
                *p /= count;
            }
            self.compactness /= count;
            if let Some(targets) = targets {
                self.compute_majority_target(targets);
            }
        }
        self.stats_up_to_date = true;
    }

    /// close the sums accumulated by the second scoring pass, which runs
    /// after the primary statistics are already finalised
    pub fn finalize_secondary_streaming_stats(&mut self) {
        if self.frequency == 0 {
            return;
        }
        let count = self.frequency as Real;
        for per_feature in &mut self.inertia_intra_by_feature {
            for slot in per_feature.iter_mut() {
                *slot /= count;
            }
        }
        self.compactness /= count;
    }

    // ------------------------------------------------------------------
    // snapshots

    /// deep copy of centroids and statistics, without the membership list;
    /// the source must be consistent
    pub fn clone_stats(&self) -> Cluster {
        debug_assert!(self.stats_up_to_date, "snapshotting a dirty cluster");
        let mut snapshot = self.clone();
        snapshot.members = Vec::new();
        snapshot
    }

    /// restore a snapshot into this cluster; the membership list is kept as
    /// is and must be rebuilt by the caller before further iteration
    pub fn copy_stats_from(&mut self, snapshot: &Cluster) {
        let members = std::mem::take(&mut self.members);
        *self = snapshot.clone();
        self.members = members;
    }

    /// reset statistics (not centroids) before a fresh accumulation
    pub fn reset_statistics(&mut self) {
        self.frequency = 0;
        self.distance_sums = [0.0; NORMS];
        self.inertia_intra = [0.0; NORMS];
        self.inertia_intra_by_feature = Default::default();
        self.inertia_inter = [0.0; NORMS];
        self.target_probs.clear();
        self.majority_target_index = None;
        self.majority_target_value.clear();
        self.compactness = 0.0;
        self.nearest_member = None;
        self.furthest_member = None;
        self.nearest_member_distance = Real::MAX;
        self.furthest_member_distance = 0.0;
        self.stats_up_to_date = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::FeatureMask;

    fn params() -> Parameters {
        Parameters::new(2, FeatureMask::all_active(2))
    }

    fn rows() -> Vec<Instance> {
        vec![
            Instance::new(0, vec![0.0, 0.0]),
            Instance::new(1, vec![2.0, 2.0]),
            Instance::new(2, vec![4.0, 4.0]),
        ]
    }

    #[test]
    fn centroid_equals_member_mean() {
        let params = params();
        let instances = rows();
        let mut cluster = Cluster::new("1", 0);
        for position in 0..instances.len() {
            cluster.add(position);
        }
        cluster.compute_iteration_stats(&instances, &params);
        assert_eq!(cluster.centroid(), &[2.0, 2.0]);
        assert_eq!(cluster.frequency(), 3);
        assert!(cluster.stats_up_to_date());
    }

    #[test]
    fn median_centroid_ignores_outliers() {
        let mut params = params();
        params.median_centroids = true;
        let instances = vec![
            Instance::new(0, vec![0.0, 0.0]),
            Instance::new(1, vec![1.0, 1.0]),
            Instance::new(2, vec![100.0, 100.0]),
        ];
        let mut cluster = Cluster::new("1", 0);
        for position in 0..instances.len() {
            cluster.add(position);
        }
        cluster.compute_iteration_stats(&instances, &params);
        assert_eq!(cluster.centroid(), &[1.0, 1.0]);
    }

    #[test]
    fn mutation_marks_stats_stale() {
        let params = params();
        let instances = rows();
        let mut cluster = Cluster::new("1", 0);
        cluster.add(0);
        cluster.compute_iteration_stats(&instances, &params);
        assert!(cluster.stats_up_to_date());
        cluster.add(1);
        assert!(!cluster.stats_up_to_date());
        cluster.remove(1);
        assert!(!cluster.stats_up_to_date());
    }

    #[test]
    fn target_probs_sum_to_one() {
        let mut params = params();
        params = params.with_target(0, "a");
        let instances = vec![
            Instance::with_symbols(0, vec![0.0, 0.0], vec!["a".into()]),
            Instance::with_symbols(1, vec![1.0, 0.0], vec!["a".into()]),
            Instance::with_symbols(2, vec![0.0, 1.0], vec!["b".into()]),
        ];
        let targets = TargetTable::read(&instances, 0, "a");
        let mut cluster = Cluster::new("1", 0);
        for position in 0..instances.len() {
            cluster.add(position);
        }
        cluster.compute_iteration_stats(&instances, &params);
        cluster.compute_target_probs(&instances, &targets, 0);
        let sum: Real = cluster.target_probs().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert_eq!(cluster.majority_target_value(), "a");
    }

    #[test]
    fn clone_then_finalize_is_a_no_op() {
        let params = params();
        let instances = rows();
        let mut cluster = Cluster::new("1", 0);
        for position in 0..instances.len() {
            cluster.add(position);
        }
        cluster.compute_iteration_stats(&instances, &params);
        cluster.compute_inertia_intra(DistanceNorm::L2, &instances, &params);
        let mut snapshot = cluster.clone_stats();
        let inertia = snapshot.inertia_intra(DistanceNorm::L2);
        snapshot.finalize_streaming_stats(None);
        assert_eq!(snapshot.inertia_intra(DistanceNorm::L2), inertia);
        assert_eq!(snapshot.frequency(), cluster.frequency());
        assert!(snapshot.members().is_empty());
    }

    #[test]
    fn swap_remove_keeps_remaining_members() {
        let mut cluster = Cluster::new("1", 0);
        cluster.add(7);
        cluster.add(8);
        cluster.add(9);
        cluster.remove(8);
        let mut members = cluster.members().to_vec();
        members.sort();
        assert_eq!(members, vec![7, 9]);
    }
}
