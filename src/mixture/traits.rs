//! Mixture-model fitting traits.

use crate::error::Result;

/// Per-component output of a bounded mixture fit.
///
/// All three vectors have length equal to the fitter's configured component
/// bound, including components the sparsity prior drove toward zero weight.
/// Downstream filtering decides which components are credible.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureFit {
    /// Whether the fit converged within its iteration budget. A fit that did
    /// not converge must be discarded whole, never partially used.
    pub converged: bool,
    /// Component means, one row per component, in the units of the input.
    pub means: Vec<Vec<f64>>,
    /// Mixing weights, non-negative, summing to at most 1.
    pub weights: Vec<f64>,
    /// Spherical (scalar) variance per component.
    pub covariances: Vec<f64>,
}

/// Trait for bounded-component mixture fitters.
///
/// The fitter is stateful: `fit` replaces any previous model and `predict`
/// answers against the most recent successful fit. Implementations must be
/// deterministic for a fixed seed, and must drive unneeded components toward
/// zero weight rather than splitting mass evenly.
pub trait MixtureFitter {
    /// Fit the mixture to `data`, replacing any prior model.
    fn fit(&mut self, data: &[Vec<f64>]) -> Result<MixtureFit>;

    /// Assign each point to its most probable component under the most
    /// recent fit.
    fn predict(&self, data: &[Vec<f64>]) -> Result<Vec<usize>>;

    /// The configured upper bound on component count.
    fn n_components(&self) -> usize;
}
