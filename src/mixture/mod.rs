//! Bounded-component Gaussian mixture fitting.
//!
//! The estimator needs a mixture model that accepts an *upper bound* on the
//! number of components and decides for itself how many are actually
//! supported by the data. A plain EM-fitted mixture cannot do this: given k
//! components it will use all k. The variational Bayesian treatment can,
//! because a sparsity-inducing prior over the mixing weights drives surplus
//! components toward zero weight.
//!
//! ## The model
//!
//! Data is assumed drawn from at most K spherical Gaussians:
//!
//! ```text
//! P(x) = Σₖ πₖ × N(x | μₖ, σₖ² I)
//! ```
//!
//! with priors over every parameter:
//!
//! - weights `π ~ Dir(α₀, …, α₀)`, a symmetric Dirichlet with small
//!   concentration `α₀` that prefers skewed weight vectors
//! - per-component precision `λₖ ~ Gamma(a₀, b₀)`
//! - per-component mean `μₖ | λₖ ~ N(m₀, (β₀ λₖ)⁻¹ I)`
//!
//! Inference alternates a variational E-step (responsibilities under
//! posterior expectations) with an M-step (closed-form posterior updates),
//! maximizing a lower bound on the marginal likelihood.
//!
//! ## Seam
//!
//! [`MixtureFitter`] is the capability boundary: the estimator only relies on
//! the contract (bounded components, convergence flag, deterministic seeding,
//! fit-consistent `predict`), so any conforming implementation can stand in
//! for [`BayesianGmm`], in tests or otherwise.

mod bayesian;
mod traits;

pub use bayesian::BayesianGmm;
pub use traits::{MixtureFit, MixtureFitter};
