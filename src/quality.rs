use crate::Real;
use crate::clustering::Clustering;
use crate::metric;
use crate::params::Parameters;
use crate::params::ReplicateChoice;

/// Dense contingency table. Serves both as the cluster x target-modality
/// table driving the information-theoretic criteria and as the
/// predicted x actual confusion matrix.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrequencyTable {
    rows: usize,
    cols: usize,
    counts: Vec<u64>,
}

impl FrequencyTable {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            counts: vec![0; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.counts[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, count: u64) {
        self.counts[row * self.cols + col] = count;
    }

    pub fn increment(&mut self, row: usize, col: usize) {
        self.counts[row * self.cols + col] += 1;
    }

    pub fn row_total(&self, row: usize) -> u64 {
        (0..self.cols).map(|c| self.get(row, c)).sum()
    }

    pub fn col_total(&self, col: usize) -> u64 {
        (0..self.rows).map(|r| self.get(r, col)).sum()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// zero a row out, returning the number of instances it held
    pub fn clear_row(&mut self, row: usize) -> u64 {
        let mut removed = 0;
        for col in 0..self.cols {
            removed += self.get(row, col);
            self.set(row, col, 0);
        }
        removed
    }

    /// rows that still hold instances
    pub fn occupied_rows(&self) -> usize {
        (0..self.rows).filter(|&r| self.row_total(r) > 0).count()
    }
}

/// MODL-style description-length side-inputs. The closed forms belong to
/// the preprocessing collaborator; the engine only consumes them.
pub trait PartitionCosts: Sync {
    /// cost of discretising a numeric attribute into the table's intervals
    fn discretisation_cost(&self, table: &FrequencyTable) -> Real;

    /// cost of grouping `distinct` categorical values into the table's rows
    fn grouping_cost(&self, table: &FrequencyTable, distinct: usize) -> Real;
}

/// Default closed forms.
pub struct ModlCosts;

pub static MODL_COSTS: ModlCosts = ModlCosts;

impl PartitionCosts for ModlCosts {
    fn discretisation_cost(&self, table: &FrequencyTable) -> Real {
        let n = table.total();
        let k = table.rows() as u64;
        if n == 0 || k == 0 {
            return 0.0;
        }
        (n as Real).ln()
            + ln_binomial(n + k - 1, k - 1)
            + granularity_cost(table, table.cols())
            + data_cost(table)
    }

    fn grouping_cost(&self, table: &FrequencyTable, distinct: usize) -> Real {
        if table.total() == 0 || table.rows() == 0 {
            return 0.0;
        }
        granularity_cost(table, distinct) + data_cost(table)
    }
}

/// cost of the target distribution shape inside every row; empty rows
/// contribute nothing
fn granularity_cost(table: &FrequencyTable, distinct: usize) -> Real {
    let j = distinct.max(1) as u64;
    (0..table.rows())
        .map(|row| ln_binomial(table.row_total(row) + j - 1, j - 1))
        .sum()
}

/// multinomial cost of the actual values per row
fn data_cost(table: &FrequencyTable) -> Real {
    let mut cost = 0.0;
    for row in 0..table.rows() {
        cost += ln_factorial(table.row_total(row));
        for col in 0..table.cols() {
            cost -= ln_factorial(table.get(row, col));
        }
    }
    cost
}

// ----------------------------------------------------------------------
// log-combinatorics

/// ln Gamma via the Lanczos approximation, exact enough for description
/// lengths over count data
fn ln_gamma(x: Real) -> Real {
    const COF: [Real; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for c in COF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

pub fn ln_factorial(n: u64) -> Real {
    if n < 2 {
        0.0
    } else {
        ln_gamma(n as Real + 1.0)
    }
}

pub fn ln_binomial(n: u64, k: u64) -> Real {
    if k == 0 || k >= n {
        return 0.0;
    }
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

// ----------------------------------------------------------------------
// scores record

/// Scalar quality criteria of one clustering outcome. Supervised criteria
/// stay None in unsupervised runs.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QualityScores {
    pub mean_distance: Real,
    pub davies_bouldin: Real,
    pub davies_bouldin_by_feature: Vec<Real>,
    pub ari_by_clusters: Option<Real>,
    pub ari_by_classes: Option<Real>,
    pub nmi_by_clusters: Option<Real>,
    pub nmi_by_classes: Option<Real>,
    pub variation_of_information: Option<Real>,
    pub eva: Option<Real>,
    pub leva: Option<Real>,
    pub predictive_clustering: Option<Real>,
}

impl QualityScores {
    /// value of the criterion a replicate-choice policy compares on
    pub fn criterion(&self, choice: ReplicateChoice) -> Option<Real> {
        match choice {
            ReplicateChoice::Auto => None,
            ReplicateChoice::Distance => Some(self.mean_distance),
            ReplicateChoice::DaviesBouldin => Some(self.davies_bouldin),
            ReplicateChoice::Eva => self.eva,
            ReplicateChoice::Leva => self.leva,
            ReplicateChoice::AriByClusters => self.ari_by_clusters,
            ReplicateChoice::AriByClasses => self.ari_by_classes,
            ReplicateChoice::NmiByClusters => self.nmi_by_clusters,
            ReplicateChoice::NmiByClasses => self.nmi_by_classes,
            ReplicateChoice::VariationOfInformation => self.variation_of_information,
            ReplicateChoice::PredictiveClustering => self.predictive_clustering,
        }
    }
}

// ----------------------------------------------------------------------
// scorer

/// Computes quality criteria over a clustering snapshot. Never mutates
/// cluster state; everything is a pure function of the tables and cached
/// statistics it is given.
pub struct QualityScorer<'a> {
    params: &'a Parameters,
    costs: &'a dyn PartitionCosts,
}

impl<'a> QualityScorer<'a> {
    pub fn new(params: &'a Parameters, costs: &'a dyn PartitionCosts) -> Self {
        Self { params, costs }
    }

    /// the side-input cost functions, exposed for the clustering-level
    /// consumers owned by collaborators
    pub fn costs(&self) -> &dyn PartitionCosts {
        self.costs
    }

    pub fn mean_distance(&self, clustering: &Clustering) -> Real {
        clustering.mean_distance(self.params.norm)
    }

    // ------------------------------------------------------------------
    // partition-agreement criteria

    /// Hubert-Arabie adjusted Rand index between the clustering and the
    /// partition induced by the majority target of every cluster
    pub fn ari_by_clusters(&self, clustering: &Clustering) -> Real {
        let mut table = FrequencyTable::new(clustering.k(), clustering.targets().len());
        for (row, cluster) in clustering.clusters().iter().enumerate() {
            if let Some(majority) = cluster.majority_target_index() {
                table.set(row, majority, cluster.frequency());
            }
        }
        ari(&table)
    }

    /// ARI between the clustering and the partition induced by actual
    /// target values
    pub fn ari_by_classes(&self, clustering: &Clustering) -> Real {
        ari(&clustering.modality_frequencies())
    }

    /// I(C;T) normalised by the cluster entropy
    pub fn nmi_by_clusters(&self, clustering: &Clustering) -> Real {
        let table = clustering.modality_frequencies();
        let h = row_entropy(&table);
        if h == 0.0 {
            0.0
        } else {
            mutual_information(&table) / h
        }
    }

    /// I(C;T) normalised by the class entropy
    pub fn nmi_by_classes(&self, clustering: &Clustering) -> Real {
        let table = clustering.modality_frequencies();
        let h = col_entropy(&table);
        if h == 0.0 {
            0.0
        } else {
            mutual_information(&table) / h
        }
    }

    /// H(C) + H(T) - 2 I(C;T); smaller is better
    pub fn variation_of_information(&self, clustering: &Clustering) -> Real {
        let table = clustering.modality_frequencies();
        row_entropy(&table) + col_entropy(&table) - 2.0 * mutual_information(&table)
    }

    // ------------------------------------------------------------------
    // MODL criteria

    /// construction term of the clustering description length; depends on
    /// K and N only
    pub fn eva_first_term(&self, k: usize, n: u64) -> Real {
        if n == 0 {
            return 0.0;
        }
        (n as Real).ln() + ln_binomial(n + k as u64 - 1, k as u64 - 1)
    }

    /// partition-granularity term: cost of the target distribution shape
    /// inside every cluster; empty rows contribute nothing
    pub fn eva_second_term(&self, table: &FrequencyTable) -> Real {
        granularity_cost(table, table.cols())
    }

    /// data term: multinomial cost of the actual target values per cluster
    pub fn eva_third_term(&self, table: &FrequencyTable) -> Real {
        data_cost(table)
    }

    /// full description length of a K-cluster partition of the table,
    /// the grouping terms coming from the injected cost side-inputs
    pub fn eva_cost(&self, k: usize, table: &FrequencyTable) -> Real {
        self.eva_first_term(k, table.total()) + self.costs.grouping_cost(table, table.cols())
    }

    /// description length of the null model: every instance in one cluster
    pub fn eva_null_cost(&self, table: &FrequencyTable) -> Real {
        let n = table.total();
        if n == 0 {
            return 0.0;
        }
        let mut merged = FrequencyTable::new(1, table.cols());
        for col in 0..table.cols() {
            merged.set(0, col, table.col_total(col));
        }
        self.eva_first_term(1, n) + self.costs.grouping_cost(&merged, table.cols())
    }

    /// 1 - cost(C,T) / cost({.},T); undefined (0) with a single cluster
    pub fn eva(&self, table: &FrequencyTable) -> Real {
        let k = table.occupied_rows();
        if k <= 1 {
            return 0.0;
        }
        let null = self.eva_null_cost(table);
        if null == 0.0 {
            return 0.0;
        }
        1.0 - self.eva_cost(k, table) / null
    }

    /// per-cluster local variant of EVA: each cluster's local grouping cost
    /// against the cost of the same margin under the global target mix,
    /// aggregated as the frequency-weighted mean
    pub fn leva(&self, table: &FrequencyTable) -> Real {
        let n = table.total();
        if n == 0 || table.occupied_rows() <= 1 {
            return 0.0;
        }
        let j = table.cols();
        let mut weighted = 0.0;
        for row in 0..table.rows() {
            let n_row = table.row_total(row);
            if n_row == 0 {
                continue;
            }
            let mut local_table = FrequencyTable::new(1, j);
            let mut null_table = FrequencyTable::new(1, j);
            for col in 0..j {
                local_table.set(0, col, table.get(row, col));
                let expected =
                    (n_row as Real * table.col_total(col) as Real / n as Real + 0.5) as u64;
                null_table.set(0, col, expected);
            }
            let local = self.costs.grouping_cost(&local_table, j);
            let null = granularity_cost(&local_table, j) + data_cost(&null_table);
            let local_eva = if null == 0.0 { 0.0 } else { 1.0 - local / null };
            weighted += n_row as Real / n as Real * local_eva;
        }
        weighted
    }

    // ------------------------------------------------------------------
    // geometric criteria

    /// standard Davies-Bouldin over chosen-norm intra-inertia and centroid
    /// distances; low is good
    pub fn davies_bouldin(&self, clustering: &Clustering) -> Real {
        let norm = self.params.norm;
        let live = clustering
            .clusters()
            .iter()
            .filter(|c| c.frequency() > 0)
            .collect::<Vec<_>>();
        if live.len() < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        for a in &live {
            let mut worst: Real = 0.0;
            for b in &live {
                if a.index() == b.index() {
                    continue;
                }
                let d = metric::distance(norm, a.centroid(), b.centroid(), &self.params.mask);
                let ratio = if d == 0.0 {
                    Real::MAX
                } else {
                    (a.inertia_intra(norm) + b.inertia_intra(norm)) / d
                };
                worst = worst.max(ratio);
            }
            sum += worst;
        }
        sum / live.len() as Real
    }

    /// Davies-Bouldin with inertia and centroid distance restricted to a
    /// single active feature
    pub fn davies_bouldin_for_feature(&self, clustering: &Clustering, feature: usize) -> Real {
        let norm = self.params.norm;
        let live = clustering
            .clusters()
            .iter()
            .filter(|c| c.frequency() > 0)
            .collect::<Vec<_>>();
        if live.len() < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        for a in &live {
            let mut worst: Real = 0.0;
            for b in &live {
                if a.index() == b.index() {
                    continue;
                }
                let d = metric::feature_distance(norm, a.centroid(), b.centroid(), feature);
                let ratio = if d == 0.0 {
                    Real::MAX
                } else {
                    (a.inertia_intra_for_feature(norm, feature)
                        + b.inertia_intra_for_feature(norm, feature))
                        / d
                };
                worst = worst.max(ratio);
            }
            sum += worst;
        }
        sum / live.len() as Real
    }

    /// weighted compromise between EVA and cluster compactness
    pub fn predictive_clustering(&self, clustering: &Clustering, eva: Real) -> Real {
        let total = clustering.total_frequency();
        if total == 0 {
            return 0.0;
        }
        let compactness: Real = clustering
            .clusters()
            .iter()
            .map(|c| c.frequency() as Real / total as Real * c.compactness())
            .sum();
        (eva + (1.0 - compactness)) / 2.0
    }
}

// ----------------------------------------------------------------------
// information-theoretic helpers

fn ari(table: &FrequencyTable) -> Real {
    let n = table.total();
    if n < 2 {
        return 0.0;
    }
    let comb2 = |x: u64| {
        if x < 2 { 0.0 } else { x as Real * (x - 1) as Real / 2.0 }
    };
    let mut index = 0.0;
    for row in 0..table.rows() {
        for col in 0..table.cols() {
            index += comb2(table.get(row, col));
        }
    }
    let rows: Real = (0..table.rows()).map(|r| comb2(table.row_total(r))).sum();
    let cols: Real = (0..table.cols()).map(|c| comb2(table.col_total(c))).sum();
    let expected = rows * cols / comb2(n);
    let maximum = (rows + cols) / 2.0;
    if (maximum - expected).abs() < Real::EPSILON {
        if (index - maximum).abs() < Real::EPSILON { 1.0 } else { 0.0 }
    } else {
        (index - expected) / (maximum - expected)
    }
}

fn row_entropy(table: &FrequencyTable) -> Real {
    let n = table.total() as Real;
    if n == 0.0 {
        return 0.0;
    }
    -(0..table.rows())
        .map(|r| table.row_total(r) as Real / n)
        .filter(|&p| p > 0.0)
        .map(|p| p * p.ln())
        .sum::<Real>()
}

fn col_entropy(table: &FrequencyTable) -> Real {
    let n = table.total() as Real;
    if n == 0.0 {
        return 0.0;
    }
    -(0..table.cols())
        .map(|c| table.col_total(c) as Real / n)
        .filter(|&p| p > 0.0)
        .map(|p| p * p.ln())
        .sum::<Real>()
}

fn mutual_information(table: &FrequencyTable) -> Real {
    let n = table.total() as Real;
    if n == 0.0 {
        return 0.0;
    }
    let mut information = 0.0;
    for row in 0..table.rows() {
        let p_row = table.row_total(row) as Real / n;
        if p_row == 0.0 {
            continue;
        }
        for col in 0..table.cols() {
            let joint = table.get(row, col) as Real / n;
            if joint == 0.0 {
                continue;
            }
            let p_col = table.col_total(col) as Real / n;
            information += joint * (joint / (p_row * p_col)).ln();
        }
    }
    information
}
