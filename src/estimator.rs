//! Incremental cluster estimation over batched detections.
//!
//! Detections arrive in batches across repeated sensor sweeps. Refitting on
//! every batch would be wasteful and noisy, so the estimator accumulates
//! points and only fits when enough new evidence has arrived:
//!
//! ```text
//! new batch → run gate → (reject: discard batch)
//!                      → (accept: merge into history)
//!           → standardize full history
//!           → variational mixture fit (bounded components)
//!           → ownership filter → weight-drop filter → covariance filter
//!           → clusters
//! ```
//!
//! The three filters prune what the mixture's sparsity prior leaves behind:
//! components owning too few points to be credible, components whose weight
//! falls off a cliff relative to the next-heavier one, and components too
//! diffuse relative to the tightest surviving cluster.
//!
//! A run that the gate rejects, and a run whose fit fails to converge, both
//! yield `Ok(None)`; the caller cannot tell them apart from the return value
//! alone, but [`ClusterEstimator::point_count`] and
//! [`ClusterEstimator::has_run_once`] disambiguate after the fact. A rejected
//! batch is discarded, not retried. Points merged before a non-converging fit
//! stay merged.

use crate::error::{Error, Result};
use crate::geom::Point3D;
use crate::mixture::{BayesianGmm, MixtureFit, MixtureFitter};
use crate::scale::StandardScaler;

/// Default minimum acceptable ratio between consecutive weights (sorted
/// descending) before all further components are discarded. Set low to keep
/// sparse clusters; points per cluster can differ a lot.
pub const WEIGHT_DROP_THRESHOLD: f64 = 1e-4;

/// Default cap on a cluster's covariance as a multiple of the tightest
/// surviving cluster's. Cluster sizes span a large range.
pub const MAX_COVARIANCE_THRESHOLD: f64 = 100.0;

/// Guard against near-zero denominators in the weight-ratio walk.
const WEIGHT_RATIO_EPS: f64 = 1e-9;

/// A fitted cluster in original coordinate units.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Cluster center (latitude, longitude, altitude).
    pub mean: Point3D,
    /// Mixing weight: the fraction of data this cluster explains.
    pub weight: f64,
    /// Spherical (scalar) variance in normalized units.
    pub covariance: f64,
}

/// Configuration for [`ClusterEstimator`].
///
/// The five required values mirror the estimator's external contract. The
/// filter thresholds default to [`WEIGHT_DROP_THRESHOLD`] and
/// [`MAX_COVARIANCE_THRESHOLD`], the fit iteration cap to 3000; all three are
/// overridable through the builder methods.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Minimum total points before the first fit may run.
    pub min_activation_threshold: usize,
    /// Minimum pending points required for fits after the first.
    pub min_new_points_to_run: usize,
    /// Upper bound on mixture components.
    pub max_num_components: usize,
    /// Seed for fit determinism.
    pub random_state: u64,
    /// Minimum points a component must own to survive the ownership filter.
    pub min_points_per_cluster: usize,
    /// Weight-ratio floor for the weight-drop filter.
    pub weight_drop_threshold: f64,
    /// Covariance cap as a multiple of the tightest surviving cluster's.
    pub max_covariance_ratio: f64,
    /// Iteration cap handed to the mixture fitter.
    pub max_iter: usize,
}

impl EstimatorConfig {
    /// Create a configuration from the five required values.
    pub fn new(
        min_activation_threshold: usize,
        min_new_points_to_run: usize,
        max_num_components: usize,
        random_state: u64,
        min_points_per_cluster: usize,
    ) -> Self {
        Self {
            min_activation_threshold,
            min_new_points_to_run,
            max_num_components,
            random_state,
            min_points_per_cluster,
            weight_drop_threshold: WEIGHT_DROP_THRESHOLD,
            max_covariance_ratio: MAX_COVARIANCE_THRESHOLD,
            max_iter: 3000,
        }
    }

    /// Override the weight-drop threshold.
    pub fn with_weight_drop_threshold(mut self, threshold: f64) -> Self {
        self.weight_drop_threshold = threshold;
        self
    }

    /// Override the covariance-outlier ratio.
    pub fn with_max_covariance_ratio(mut self, ratio: f64) -> Self {
        self.max_covariance_ratio = ratio;
        self
    }

    /// Override the fitter's iteration cap.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
}

/// Accumulated point history plus the not-yet-committed batch.
#[derive(Debug, Default)]
struct PointStore {
    history: Vec<Point3D>,
    pending: Vec<Point3D>,
}

impl PointStore {
    fn stage(&mut self, batch: &[Point3D]) {
        self.pending.clear();
        self.pending.extend_from_slice(batch);
    }

    fn commit_pending(&mut self) {
        self.history.append(&mut self.pending);
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
    }
}

/// Incremental cluster estimator.
///
/// Owns the full point history, the run gate, and the filter pipeline.
/// Generic over the mixture-fitting capability; [`ClusterEstimator::create`]
/// wires in [`BayesianGmm`] with the standard hyperparameters.
#[derive(Debug)]
pub struct ClusterEstimator<F = BayesianGmm> {
    config: EstimatorConfig,
    store: PointStore,
    fitter: F,
    has_run_once: bool,
}

impl ClusterEstimator<BayesianGmm> {
    /// Create an estimator backed by the variational Bayesian fitter.
    ///
    /// Fails with [`Error::InvalidParameter`] when
    /// `min_activation_threshold > max_num_components` or
    /// `max_num_components < 1`.
    pub fn create(config: EstimatorConfig) -> Result<Self> {
        let fitter = BayesianGmm::new(config.max_num_components)
            .with_seed(config.random_state)
            .with_max_iter(config.max_iter)
            .with_weight_concentration_prior(1e-3)
            .with_mean_precision_prior(0.5);
        Self::with_fitter(config, fitter)
    }
}

impl<F: MixtureFitter> ClusterEstimator<F> {
    /// Create an estimator with a substitute mixture fitter.
    pub fn with_fitter(config: EstimatorConfig, fitter: F) -> Result<Self> {
        if config.max_num_components < 1 {
            return Err(Error::InvalidParameter {
                name: "max_num_components",
                message: "must be at least 1",
            });
        }
        if config.min_activation_threshold > config.max_num_components {
            return Err(Error::InvalidParameter {
                name: "min_activation_threshold",
                message: "must not exceed max_num_components",
            });
        }
        Ok(Self {
            config,
            store: PointStore::default(),
            fitter,
            has_run_once: false,
        })
    }

    /// Feed a batch of detections and, if the gate accepts, refit.
    ///
    /// Returns `Ok(None)` when the gate rejected the call or the fit did not
    /// converge; `Ok(Some(clusters))` when a converged fit passed the filter
    /// pipeline (the list may be empty if every component was pruned). The
    /// returned clusters are sorted by descending weight.
    pub fn run(
        &mut self,
        detections: &[Point3D],
        run_override: bool,
    ) -> Result<Option<Vec<Cluster>>> {
        self.store.stage(detections);
        if !self.decide_to_run(run_override) {
            return Ok(None);
        }

        let rows: Vec<Vec<f64>> = self.store.history.iter().map(|p| p.to_row()).collect();
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&rows)?;

        let fit = self.fitter.fit(&scaled)?;
        if !fit.converged {
            return Ok(None);
        }

        let assignments = self.fitter.predict(&scaled)?;
        let means = scaler.inverse_transform(&fit.means)?;

        let mut clusters = self.filter_by_ownership(&fit, &means, &assignments);
        clusters.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(core::cmp::Ordering::Equal)
        });

        if clusters.is_empty() {
            return Ok(Some(clusters));
        }

        let survivors = self.select_weight_survivors(&clusters);
        Ok(Some(self.filter_by_covariances(survivors)))
    }

    /// Number of points committed to the history.
    pub fn point_count(&self) -> usize {
        self.store.history.len()
    }

    /// All points ever committed, in insertion order.
    pub fn history(&self) -> &[Point3D] {
        &self.store.history
    }

    /// Whether any run has been accepted by the gate.
    pub fn has_run_once(&self) -> bool {
        self.has_run_once
    }

    /// Gate decision; commits the pending batch on acceptance, discards it on
    /// rejection.
    fn decide_to_run(&mut self, run_override: bool) -> bool {
        let count_all = self.store.history.len();
        let count_pending = self.store.pending.len();

        if !run_override {
            if count_all + count_pending < self.config.min_activation_threshold
                || (self.has_run_once && count_pending < self.config.min_new_points_to_run)
            {
                self.store.discard_pending();
                return false;
            }
        }
        if count_all + count_pending == 0 {
            return false;
        }

        self.store.commit_pending();
        self.has_run_once = true;
        true
    }

    /// Drop components owning fewer than `min_points_per_cluster` points.
    /// Fit index order is preserved here; sorting happens afterwards.
    fn filter_by_ownership(
        &self,
        fit: &MixtureFit,
        means: &[Vec<f64>],
        assignments: &[usize],
    ) -> Vec<Cluster> {
        let mut counts = vec![0usize; fit.weights.len()];
        for &c in assignments {
            if c < counts.len() {
                counts[c] += 1;
            }
        }

        means
            .iter()
            .enumerate()
            .filter(|(i, _)| counts[*i] >= self.config.min_points_per_cluster)
            .map(|(i, mean)| Cluster {
                mean: Point3D::from_row(mean),
                weight: fit.weights[i],
                covariance: fit.covariances[i],
            })
            .collect()
    }

    /// Keep the contiguous prefix of the weight-sorted list whose consecutive
    /// weight ratios stay above the drop threshold.
    fn select_weight_survivors(&self, sorted: &[Cluster]) -> Vec<Cluster> {
        let mut viable = vec![sorted[0].clone()];
        for pair in sorted.windows(2) {
            let ratio = pair[1].weight / (pair[0].weight + WEIGHT_RATIO_EPS);
            if ratio < self.config.weight_drop_threshold {
                break;
            }
            viable.push(pair[1].clone());
        }
        viable
    }

    /// Drop clusters whose covariance exceeds the tightest survivor's by more
    /// than the configured ratio.
    fn filter_by_covariances(&self, clusters: Vec<Cluster>) -> Vec<Cluster> {
        if clusters.is_empty() {
            return clusters;
        }
        let min_cov = clusters
            .iter()
            .map(|c| c.covariance)
            .fold(f64::MAX, f64::min);
        let threshold = min_cov * self.config.max_covariance_ratio;
        clusters
            .into_iter()
            .filter(|c| c.covariance <= threshold)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_distr::{Distribution, Normal};

    /// Fitter returning canned output, for exercising the gate and filters
    /// independently of the variational fit.
    struct StubFitter {
        fit: MixtureFit,
        assignments: Vec<usize>,
    }

    impl StubFitter {
        fn new(weights: Vec<f64>, covariances: Vec<f64>, assignments: Vec<usize>) -> Self {
            let k = weights.len();
            Self {
                fit: MixtureFit {
                    converged: true,
                    means: (0..k).map(|i| vec![i as f64, 0.0, 0.0]).collect(),
                    weights,
                    covariances,
                },
                assignments,
            }
        }

        fn not_converging(mut self) -> Self {
            self.fit.converged = false;
            self
        }
    }

    impl MixtureFitter for StubFitter {
        fn fit(&mut self, _data: &[Vec<f64>]) -> Result<MixtureFit> {
            Ok(self.fit.clone())
        }

        fn predict(&self, _data: &[Vec<f64>]) -> Result<Vec<usize>> {
            Ok(self.assignments.clone())
        }

        fn n_components(&self) -> usize {
            self.fit.weights.len()
        }
    }

    fn points(n: usize) -> Vec<Point3D> {
        (0..n)
            .map(|i| Point3D::new(10.0 + i as f64 * 0.01, 10.0 - i as f64 * 0.01, 0.0))
            .collect()
    }

    fn scatter(rng: &mut StdRng, center: (f64, f64), n: usize) -> Vec<Point3D> {
        let noise = Normal::new(0.0, 0.5).unwrap();
        (0..n)
            .map(|_| {
                Point3D::new(
                    center.0 + noise.sample(rng),
                    center.1 + noise.sample(rng),
                    0.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_create_rejects_invalid_thresholds() {
        // Activation threshold above the component bound.
        let config = EstimatorConfig::new(11, 1, 10, 42, 2);
        assert!(matches!(
            ClusterEstimator::create(config),
            Err(Error::InvalidParameter { .. })
        ));

        // Component bound below one.
        let config = EstimatorConfig::new(0, 1, 0, 42, 2);
        assert!(matches!(
            ClusterEstimator::create(config),
            Err(Error::InvalidParameter { .. })
        ));

        // Boundary case is valid.
        let config = EstimatorConfig::new(10, 1, 10, 42, 2);
        assert!(ClusterEstimator::create(config).is_ok());
    }

    #[test]
    fn test_gate_rejects_below_activation_threshold() {
        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let stub = StubFitter::new(vec![1.0], vec![0.1], vec![0; 3]);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        assert_eq!(est.run(&points(3), false).unwrap(), None);
        assert_eq!(est.point_count(), 0);
        assert!(!est.has_run_once());
    }

    #[test]
    fn test_rejected_batches_are_discarded_not_retried() {
        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let stub = StubFitter::new(vec![1.0], vec![0.1], vec![0; 5]);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        // Two rejected batches never accumulate.
        assert_eq!(est.run(&points(3), false).unwrap(), None);
        assert_eq!(est.run(&points(2), false).unwrap(), None);
        assert_eq!(est.point_count(), 0);

        // A single batch at the threshold runs.
        assert!(est.run(&points(5), false).unwrap().is_some());
        assert_eq!(est.point_count(), 5);
    }

    #[test]
    fn test_min_new_points_gate_after_first_run() {
        let config = EstimatorConfig::new(5, 3, 10, 42, 2);
        let stub = StubFitter::new(vec![1.0], vec![0.1], vec![0; 16]);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        assert!(est.run(&points(6), false).unwrap().is_some());
        assert!(est.has_run_once());
        assert_eq!(est.point_count(), 6);

        // Too few new points: rejected, discarded.
        assert_eq!(est.run(&points(2), false).unwrap(), None);
        assert_eq!(est.point_count(), 6);

        // Enough new points: accepted.
        assert!(est.run(&points(3), false).unwrap().is_some());
        assert_eq!(est.point_count(), 9);
    }

    #[test]
    fn test_run_override_forces_acceptance() {
        let config = EstimatorConfig::new(10, 5, 10, 42, 2);
        let stub = StubFitter::new(vec![1.0], vec![0.1], vec![0; 4]);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        assert!(est.run(&points(4), true).unwrap().is_some());
        assert_eq!(est.point_count(), 4);
    }

    #[test]
    fn test_empty_run_is_rejected_even_with_override() {
        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let mut est = ClusterEstimator::create(config).unwrap();

        assert_eq!(est.run(&[], false).unwrap(), None);
        assert_eq!(est.run(&[], true).unwrap(), None);
        assert_eq!(est.point_count(), 0);
        assert!(!est.has_run_once());
    }

    #[test]
    fn test_non_convergence_returns_none_but_commits_points() {
        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let stub = StubFitter::new(vec![1.0], vec![0.1], vec![0; 5]).not_converging();
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        assert_eq!(est.run(&points(5), false).unwrap(), None);
        assert_eq!(est.point_count(), 5);
        assert!(est.has_run_once());
    }

    #[test]
    fn test_tiny_iteration_cap_forces_non_convergence() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut detections = scatter(&mut rng, (10.0, 10.0), 25);
        detections.extend(scatter(&mut rng, (50.0, 50.0), 25));

        let config = EstimatorConfig::new(5, 1, 10, 42, 2).with_max_iter(1);
        let mut est = ClusterEstimator::create(config).unwrap();

        assert_eq!(est.run(&detections, false).unwrap(), None);
        // The merge survives the failed fit.
        assert_eq!(est.point_count(), 50);
        assert!(est.has_run_once());
    }

    #[test]
    fn test_ownership_filter_drops_thin_components() {
        // Component 1 owns a single point.
        let assignments = vec![0, 0, 0, 0, 0, 1, 2, 2, 2, 2];
        let stub = StubFitter::new(
            vec![0.5, 0.1, 0.4],
            vec![0.1, 0.1, 0.1],
            assignments,
        );
        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        let clusters = est.run(&points(10), false).unwrap().unwrap();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| (c.weight - 0.1).abs() > 1e-12));
    }

    #[test]
    fn test_ownership_filter_can_empty_the_result() {
        // No component owns enough points; did_run is still true.
        let stub = StubFitter::new(vec![0.6, 0.4], vec![0.1, 0.1], vec![0, 0, 1, 1, 1]);
        let config = EstimatorConfig::new(5, 1, 10, 42, 100);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        let clusters = est.run(&points(5), false).unwrap().unwrap();
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_weight_drop_keeps_contiguous_prefix() {
        let assignments = (0..20).map(|i| i % 4).collect();
        let stub = StubFitter::new(
            vec![0.3, 0.15, 1e-9, 0.5],
            vec![0.1, 0.1, 0.1, 0.1],
            assignments,
        );
        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        let clusters = est.run(&points(20), false).unwrap().unwrap();
        // Sorted 0.5, 0.3, 0.15, then the ratio collapses at 1e-9.
        assert_eq!(clusters.len(), 3);
        assert!((clusters[0].weight - 0.5).abs() < 1e-12);
        assert!((clusters[1].weight - 0.3).abs() < 1e-12);
        assert!((clusters[2].weight - 0.15).abs() < 1e-12);
        for pair in clusters.windows(2) {
            assert!(pair[1].weight / pair[0].weight >= WEIGHT_DROP_THRESHOLD);
        }
    }

    #[test]
    fn test_weight_drop_discards_everything_after_first_break() {
        // 0.0003/0.0004 is a healthy ratio, but the break at 0.0004/0.5
        // discards both: survivors are a contiguous prefix, not a sieve.
        let assignments = (0..20).map(|i| i % 3).collect();
        let stub = StubFitter::new(
            vec![0.5, 0.0004, 0.0003],
            vec![0.1, 0.1, 0.1],
            assignments,
        );
        let config = EstimatorConfig::new(5, 1, 10, 42, 2)
            .with_weight_drop_threshold(1e-2);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        let clusters = est.run(&points(20), false).unwrap().unwrap();
        assert_eq!(clusters.len(), 1);
        assert!((clusters[0].weight - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_covariance_outlier_filter() {
        let assignments = (0..30).map(|i| i % 3).collect();
        let stub = StubFitter::new(
            vec![0.4, 0.35, 0.25],
            vec![0.001, 0.0005, 0.2],
            assignments,
        );
        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let mut est = ClusterEstimator::with_fitter(config, stub).unwrap();

        let clusters = est.run(&points(30), false).unwrap().unwrap();
        // 0.2 > 0.0005 * 100, so the diffuse component is dropped.
        assert_eq!(clusters.len(), 2);
        let max_cov = clusters
            .iter()
            .map(|c| c.covariance)
            .fold(f64::MIN, f64::max);
        let min_cov = clusters
            .iter()
            .map(|c| c.covariance)
            .fold(f64::MAX, f64::min);
        assert!(max_cov <= min_cov * MAX_COVARIANCE_THRESHOLD);
    }

    #[test]
    fn test_end_to_end_two_clusters() {
        let mut rng = StdRng::seed_from_u64(1234);
        let mut detections = scatter(&mut rng, (10.0, 10.0), 50);
        detections.extend(scatter(&mut rng, (50.0, 50.0), 50));

        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let mut est = ClusterEstimator::create(config).unwrap();

        let clusters = est.run(&detections, false).unwrap().expect("gate accepts");
        assert_eq!(clusters.len(), 2, "clusters: {clusters:?}");

        // Sorted by descending weight, ratios above the drop threshold.
        for pair in clusters.windows(2) {
            assert!(pair[0].weight >= pair[1].weight);
            assert!(pair[1].weight / pair[0].weight >= WEIGHT_DROP_THRESHOLD);
        }

        // Both seed centers recovered within tolerance.
        let near = |c: &Cluster, lat: f64, lon: f64| {
            (c.mean.latitude - lat).abs() < 1.0
                && (c.mean.longitude - lon).abs() < 1.0
                && c.mean.altitude.abs() < 1e-6
        };
        assert!(
            (near(&clusters[0], 10.0, 10.0) && near(&clusters[1], 50.0, 50.0))
                || (near(&clusters[0], 50.0, 50.0) && near(&clusters[1], 10.0, 10.0)),
            "clusters: {clusters:?}"
        );

        // Each blob holds about half the mass.
        let total: f64 = clusters.iter().map(|c| c.weight).sum();
        assert!(total <= 1.0 + 1e-9);
        assert!(clusters.iter().all(|c| c.weight > 0.35));
    }

    #[test]
    fn test_incremental_sweeps_accumulate() {
        let mut rng = StdRng::seed_from_u64(77);
        let first = scatter(&mut rng, (10.0, 10.0), 30);
        let second = scatter(&mut rng, (50.0, 50.0), 30);

        let config = EstimatorConfig::new(5, 1, 10, 42, 2);
        let mut est = ClusterEstimator::create(config).unwrap();

        let clusters = est.run(&first, false).unwrap().expect("first sweep runs");
        assert_eq!(clusters.len(), 1);

        let clusters = est.run(&second, false).unwrap().expect("second sweep runs");
        assert_eq!(est.point_count(), 60);
        assert_eq!(clusters.len(), 2);
    }
}
