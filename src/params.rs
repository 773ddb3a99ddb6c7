use crate::EPSILON_DEFAULT;
use crate::EPSILON_MAX_ITERATIONS_DEFAULT;
use crate::K_MAX;
use crate::MINI_BATCH_SIZE_DEFAULT;
use crate::REPLICATES_DEFAULT;
use crate::Real;
use crate::Symbol;
use crate::error::ClusterError;
use crate::instance::FeatureMask;
use crate::instance::Instance;
use crate::metric::DistanceNorm;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ClusteringKind {
    KMeans,
    /// dropped clusters are tolerated down to min_k_post_optimization
    Knn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CentroidKind {
    /// centroid is the virtual mean (or median) point
    Virtual,
    /// centroid snaps to the real instance nearest to the virtual center
    RealInstance,
}

/// Preprocessing applied by the caller before recoding; recorded here so
/// reports can label the run, never interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PreprocessingKind {
    Unused,
    None,
    RankNormalization,
    Normalization,
    CenterReduction,
    BasicGrouping,
    Binarization,
    HammingConditionalInfo,
    ConditionalInfoWithPriors,
    Entropy,
    EntropyWithPriors,
    Auto,
    SourceConditionalInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InitMethod {
    /// KMeans++R when supervised, KMeans++ otherwise
    Auto,
    Random,
    /// random seeding followed by a convergence on a sub-sample
    Sample,
    KMeansPlusPlus,
    KMeansPlusPlusR,
    RocchioThenSplit,
    Bisecting,
    MinMaxRandom,
    MinMaxDeterministic,
    VariancePartitioning,
    ClassDecomposition,
}

impl InitMethod {
    pub fn label(self) -> &'static str {
        match self {
            InitMethod::Auto => "Automatically computed",
            InitMethod::Random => "Random",
            InitMethod::Sample => "Sample",
            InitMethod::KMeansPlusPlus => "KMeans++",
            InitMethod::KMeansPlusPlusR => "KMeans++R",
            InitMethod::RocchioThenSplit => "Rocchio then split",
            InitMethod::Bisecting => "Bisecting",
            InitMethod::MinMaxRandom => "Min-Max (random)",
            InitMethod::MinMaxDeterministic => "Min-Max (deterministic)",
            InitMethod::VariancePartitioning => "Variance partitioning",
            InitMethod::ClassDecomposition => "Class decomposition",
        }
    }

    /// strategies meaningful only with a target attribute
    pub fn requires_supervision(self) -> bool {
        matches!(
            self,
            InitMethod::KMeansPlusPlusR | InitMethod::RocchioThenSplit | InitMethod::ClassDecomposition
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReplicateChoice {
    /// ARI by clusters when supervised, Distance otherwise
    Auto,
    Distance,
    Eva,
    AriByClusters,
    AriByClasses,
    VariationOfInformation,
    Leva,
    DaviesBouldin,
    PredictiveClustering,
    NmiByClusters,
    NmiByClasses,
}

impl ReplicateChoice {
    /// true when a smaller score is better
    pub fn minimizes(self) -> bool {
        matches!(
            self,
            ReplicateChoice::Distance
                | ReplicateChoice::VariationOfInformation
                | ReplicateChoice::DaviesBouldin
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ReplicateChoice::Auto => "Automatically computed",
            ReplicateChoice::Distance => "Distance",
            ReplicateChoice::Eva => "EVA",
            ReplicateChoice::AriByClusters => "ARI by clusters",
            ReplicateChoice::AriByClasses => "ARI by classes",
            ReplicateChoice::VariationOfInformation => "Variation of information",
            ReplicateChoice::Leva => "LEVA",
            ReplicateChoice::DaviesBouldin => "Davies-Bouldin",
            ReplicateChoice::PredictiveClustering => "Predictive clustering",
            ReplicateChoice::NmiByClusters => "NMI by clusters",
            ReplicateChoice::NmiByClasses => "NMI by classes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PostOptimization {
    None,
    Fast,
}

/// Immutable configuration of one clustering run.
///
/// Built once, checked with `check()`, then only read. Nested runs
/// (bisecting sub-clusterings, sample convergence) derive their own copies
/// instead of mutating shared state; verbosity overrides travel as explicit
/// `silent` arguments, never through this record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Parameters {
    pub clustering: ClusteringKind,
    pub k: usize,
    pub min_k_post_optimization: usize,
    pub norm: DistanceNorm,
    pub centroid: CentroidKind,
    pub continuous_preprocessing: PreprocessingKind,
    pub categorical_preprocessing: PreprocessingKind,
    pub init_method: InitMethod,
    /// -1 = keep init-time centroids, 0 = unbounded, positive = cap
    pub max_iterations: i32,
    pub bisecting_max_iterations: i32,
    pub bisecting_replicates: usize,
    /// mean-distance improvement floor
    pub epsilon: Real,
    /// consecutive sub-epsilon iterations tolerated
    pub epsilon_max_iterations: usize,
    pub replicates: usize,
    pub replicate_choice: ReplicateChoice,
    pub post_optimization: PostOptimization,
    pub vns_level: usize,
    pub mini_batch_mode: bool,
    pub mini_batch_size: usize,
    pub supervised: bool,
    pub verbose: bool,
    /// the surrounding framework may run whole replicates in parallel;
    /// within a replicate the engine stays single-threaded
    pub parallel_mode: bool,
    /// per-feature median instead of mean on centroid updates
    pub median_centroids: bool,
    pub main_target_modality: Symbol,
    /// symbol position of the target attribute
    pub target_index: Option<usize>,
    pub random_seed: u64,
    pub mask: FeatureMask,
    /// recoded attribute name -> native attribute name
    pub native_names: BTreeMap<String, String>,
}

impl Parameters {
    pub fn new(k: usize, mask: FeatureMask) -> Self {
        Self {
            clustering: ClusteringKind::KMeans,
            k,
            min_k_post_optimization: 1,
            norm: DistanceNorm::L2,
            centroid: CentroidKind::Virtual,
            continuous_preprocessing: PreprocessingKind::Unused,
            categorical_preprocessing: PreprocessingKind::Unused,
            init_method: InitMethod::Auto,
            max_iterations: 0,
            bisecting_max_iterations: 10,
            bisecting_replicates: 1,
            epsilon: EPSILON_DEFAULT,
            epsilon_max_iterations: EPSILON_MAX_ITERATIONS_DEFAULT,
            replicates: REPLICATES_DEFAULT,
            replicate_choice: ReplicateChoice::Auto,
            post_optimization: PostOptimization::None,
            vns_level: 0,
            mini_batch_mode: false,
            mini_batch_size: MINI_BATCH_SIZE_DEFAULT,
            supervised: false,
            verbose: false,
            parallel_mode: false,
            median_centroids: false,
            main_target_modality: Symbol::new(),
            target_index: None,
            random_seed: 42,
            mask,
            native_names: BTreeMap::new(),
        }
    }

    pub fn with_norm(mut self, norm: DistanceNorm) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_init_method(mut self, method: InitMethod) -> Self {
        self.init_method = method;
        self
    }

    pub fn with_max_iterations(mut self, max: i32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_replicates(mut self, n: usize, choice: ReplicateChoice) -> Self {
        self.replicates = n;
        self.replicate_choice = choice;
        self
    }

    pub fn with_target(mut self, index: usize, main_modality: &str) -> Self {
        self.supervised = true;
        self.target_index = Some(index);
        self.main_target_modality = main_modality.to_string();
        self
    }

    pub fn with_post_optimization(mut self, post: PostOptimization, min_k: usize) -> Self {
        self.post_optimization = post;
        self.min_k_post_optimization = min_k;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn arity(&self) -> usize {
        self.mask.len()
    }

    /// true when any K-Means feature of the instance is missing
    pub fn has_missing_kmeans_value(&self, instance: &Instance) -> bool {
        self.mask.has_missing(instance)
    }

    pub fn native_name<'a>(&'a self, recoded: &'a str) -> &'a str {
        self.native_names
            .get(recoded)
            .map(String::as_str)
            .unwrap_or(recoded)
    }

    pub fn resolved_init_method(&self) -> InitMethod {
        match self.init_method {
            InitMethod::Auto if self.supervised => InitMethod::KMeansPlusPlusR,
            InitMethod::Auto => InitMethod::KMeansPlusPlus,
            method => method,
        }
    }

    pub fn resolved_replicate_choice(&self) -> ReplicateChoice {
        match self.replicate_choice {
            ReplicateChoice::Auto if self.supervised => ReplicateChoice::AriByClusters,
            ReplicateChoice::Auto => ReplicateChoice::Distance,
            choice => choice,
        }
    }

    pub fn check(&self) -> Result<(), ClusterError> {
        let fail = |message: &str| Err(ClusterError::InvalidParameters(message.to_string()));
        if self.k == 0 {
            return fail("k must be at least 1");
        }
        if self.k > K_MAX {
            return fail("k exceeds the compile-time cap");
        }
        if self.min_k_post_optimization == 0 {
            return fail("min k after post-optimization must be at least 1");
        }
        if self.replicates == 0 {
            return fail("at least one replicate is required");
        }
        if self.epsilon < 0.0 {
            return fail("epsilon must be non-negative");
        }
        if self.mask.active_count() == 0 {
            return fail("the feature mask has no active position");
        }
        if self.resolved_init_method().requires_supervision() && !self.supervised {
            return fail("the chosen initialization method requires supervised mode");
        }
        if self.post_optimization != PostOptimization::None && !self.supervised {
            return fail("post-optimization requires supervised mode");
        }
        if self.supervised && self.target_index.is_none() {
            return fail("supervised mode requires a target attribute index");
        }
        if self.mini_batch_mode {
            if self.mini_batch_size == 0 {
                return fail("mini-batch size must be at least 1");
            }
            if self.target_index.is_some() && !self.supervised {
                return fail("mini-batch with a labelled stream requires supervised mode");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Parameters {
        Parameters::new(3, FeatureMask::all_active(2))
    }

    #[test]
    fn default_parameters_pass_check() {
        assert!(base().check().is_ok());
    }

    #[test]
    fn zero_k_is_rejected() {
        let params = Parameters::new(0, FeatureMask::all_active(2));
        assert!(params.check().is_err());
    }

    #[test]
    fn supervised_init_requires_target() {
        let params = base().with_init_method(InitMethod::KMeansPlusPlusR);
        assert!(params.check().is_err());
        let params = base()
            .with_init_method(InitMethod::KMeansPlusPlusR)
            .with_target(2, "yes");
        assert!(params.check().is_ok());
    }

    #[test]
    fn post_optimization_requires_supervision() {
        let params = base().with_post_optimization(PostOptimization::Fast, 2);
        assert!(params.check().is_err());
    }

    #[test]
    fn auto_init_resolves_by_supervision() {
        assert_eq!(base().resolved_init_method(), InitMethod::KMeansPlusPlus);
        let supervised = base().with_target(2, "yes");
        assert_eq!(
            supervised.resolved_init_method(),
            InitMethod::KMeansPlusPlusR
        );
    }

    #[test]
    fn auto_replicate_choice_resolves_by_supervision() {
        assert_eq!(
            base().resolved_replicate_choice(),
            ReplicateChoice::Distance
        );
        let supervised = base().with_target(2, "yes");
        assert_eq!(
            supervised.resolved_replicate_choice(),
            ReplicateChoice::AriByClusters
        );
    }

    #[test]
    fn parameters_serialize_round_trip() {
        let params = base().with_seed(7);
        let json = serde_json::to_string(&params).expect("serialize");
        let back: Parameters = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.k, params.k);
        assert_eq!(back.random_seed, 7);
    }
}
