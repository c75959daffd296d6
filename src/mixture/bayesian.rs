//! Variational Bayesian Gaussian mixture with spherical covariances.
//!
//! # Why variational
//!
//! EM fits exactly the k components it is given. Here k is only an *upper
//! bound*: the Dirichlet prior over mixing weights, with concentration far
//! below 1, makes skewed weight vectors cheap and even splits expensive, so
//! components the data does not support are starved of responsibility and
//! their weights decay toward zero. The caller can then prune by weight and
//! by point ownership instead of guessing k in advance.
//!
//! # The updates
//!
//! Conjugate priors (Dirichlet over weights, Gamma over each spherical
//! precision, Gaussian over each mean given its precision) give closed-form
//! coordinate updates:
//!
//! **E-step**: responsibilities under posterior expectations:
//! ```text
//! ln ρₙₖ = E[ln πₖ] + (d/2) E[ln λₖ] − (d/2) ln 2π
//!          − ½ (d/βₖ + (aₖ/bₖ) ‖xₙ − mₖ‖²)
//! ```
//! with `E[ln πₖ] = ψ(αₖ) − ψ(Σα)` and `E[ln λₖ] = ψ(aₖ) − ln bₖ`.
//!
//! **M-step**: posterior parameters from responsibility statistics
//! `Nₖ, x̄ₖ, Sₖ`:
//! ```text
//! αₖ = α₀ + Nₖ          βₖ = β₀ + Nₖ
//! mₖ = (β₀ m₀ + Nₖ x̄ₖ) / βₖ
//! aₖ = a₀ + d Nₖ / 2
//! bₖ = b₀ + ½ (d Nₖ Sₖ + (β₀ Nₖ / βₖ) ‖x̄ₖ − m₀‖²)
//! ```
//!
//! Iteration stops when the variational objective surrogate (responsibility
//! entropy plus the posterior log-normalizers) changes by less than `tol`.
//!
//! # Failure modes
//!
//! - **Not converged**: the iteration cap was hit first; the `converged` flag
//!   is false and callers must discard the fit.
//! - **Local optima**: k-means++ seeding reduces but does not eliminate them;
//!   a fixed seed makes any particular outcome reproducible.

use super::traits::{MixtureFit, MixtureFitter};
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;

const LN_2PI: f64 = 1.837877066409345;

/// Variational Bayesian Gaussian mixture fitter (spherical model).
#[derive(Debug, Clone)]
pub struct BayesianGmm {
    /// Upper bound on component count.
    n_components: usize,
    /// Maximum variational iterations.
    max_iter: usize,
    /// Convergence tolerance on the objective surrogate.
    tol: f64,
    /// Random seed for k-means++ initialization.
    seed: Option<u64>,
    /// Dirichlet concentration α₀; small values prune surplus components.
    weight_concentration_prior: f64,
    /// Prior precision β₀ on component means.
    mean_precision_prior: f64,
    /// Variance floor.
    reg_covar: f64,
    /// Posterior from the most recent fit.
    fitted: Option<Posterior>,
}

/// Posterior parameters of the fitted mixture.
#[derive(Debug, Clone)]
struct Posterior {
    /// Dirichlet concentrations αₖ.
    alpha: Array1<f64>,
    /// Mean precisions βₖ.
    beta: Array1<f64>,
    /// Component means mₖ (k × d).
    means: Array2<f64>,
    /// Gamma shapes aₖ.
    shape: Array1<f64>,
    /// Gamma rates bₖ.
    rate: Array1<f64>,
}

/// Data-derived prior hyperparameters, fixed for the duration of one fit.
struct Priors {
    alpha0: f64,
    beta0: f64,
    mean0: Array1<f64>,
    shape0: f64,
    rate0: f64,
}

impl BayesianGmm {
    /// Create a fitter with the given component bound.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            max_iter: 100,
            tol: 1e-3,
            seed: None,
            weight_concentration_prior: 1e-3,
            mean_precision_prior: 1.0,
            reg_covar: 1e-6,
            fitted: None,
        }
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the Dirichlet concentration prior. Lower accepts clusters with
    /// fewer points.
    pub fn with_weight_concentration_prior(mut self, alpha0: f64) -> Self {
        self.weight_concentration_prior = alpha0;
        self
    }

    /// Set the prior precision on component means.
    pub fn with_mean_precision_prior(mut self, beta0: f64) -> Self {
        self.mean_precision_prior = beta0;
        self
    }

    fn squared_distance(a: &ArrayView1<'_, f64>, b: &ArrayView1<'_, f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
    }

    /// Log-sum-exp for numerical stability.
    fn logsumexp(values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NEG_INFINITY;
        }
        let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if max_val.is_infinite() {
            return max_val;
        }
        max_val
            + values
                .iter()
                .map(|&v| (v - max_val).exp())
                .sum::<f64>()
                .ln()
    }

    /// Pick initial seed rows with k-means++ selection.
    fn init_seeds(&self, data: &Array2<f64>, rng: &mut impl Rng) -> Vec<usize> {
        let n = data.nrows();
        let mut seeds = Vec::with_capacity(self.n_components);
        seeds.push(rng.random_range(0..n));

        while seeds.len() < self.n_components {
            let mut distances: Vec<f64> = Vec::with_capacity(n);
            for j in 0..n {
                let point = data.row(j);
                let min_dist = seeds
                    .iter()
                    .map(|&s| Self::squared_distance(&point, &data.row(s)))
                    .fold(f64::MAX, f64::min);
                distances.push(min_dist);
            }

            // Sample proportional to squared distance.
            let total: f64 = distances.iter().sum();
            if total == 0.0 {
                seeds.push(rng.random_range(0..n));
                continue;
            }

            let threshold = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            let mut selected = 0;
            for (j, &dist) in distances.iter().enumerate() {
                cumsum += dist;
                if cumsum >= threshold {
                    selected = j;
                    break;
                }
            }
            seeds.push(selected);
        }
        seeds
    }

    /// One-hot responsibilities from nearest-seed assignment.
    fn init_resp(&self, data: &Array2<f64>, seeds: &[usize]) -> Array2<f64> {
        let n = data.nrows();
        let mut resp = Array2::zeros((n, self.n_components));
        for i in 0..n {
            let point = data.row(i);
            let mut best = 0;
            let mut best_dist = f64::MAX;
            for (c, &s) in seeds.iter().enumerate() {
                let dist = Self::squared_distance(&point, &data.row(s));
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            resp[[i, best]] = 1.0;
        }
        resp
    }

    fn compute_priors(&self, data: &Array2<f64>) -> Priors {
        let n = data.nrows() as f64;
        let d = data.ncols();

        let mut mean0 = Array1::zeros(d);
        for row in data.rows() {
            mean0 += &row;
        }
        mean0 /= n;

        let mut var0 = 0.0;
        for row in data.rows() {
            var0 += Self::squared_distance(&row, &mean0.view());
        }
        var0 = (var0 / (n * d as f64)).max(self.reg_covar);

        // Shape d/2 with rate matching the data variance puts the prior
        // expected precision at 1/var0.
        let shape0 = 0.5 * d as f64;
        Priors {
            alpha0: self.weight_concentration_prior,
            beta0: self.mean_precision_prior,
            mean0,
            shape0,
            rate0: shape0 * var0,
        }
    }

    fn m_step(&self, data: &Array2<f64>, resp: &Array2<f64>, priors: &Priors) -> Posterior {
        let n = data.nrows();
        let d = data.ncols();
        let k = self.n_components;
        let df = d as f64;

        let mut alpha = Array1::zeros(k);
        let mut beta = Array1::zeros(k);
        let mut means = Array2::zeros((k, d));
        let mut shape = Array1::zeros(k);
        let mut rate = Array1::zeros(k);

        for c in 0..k {
            let nk: f64 = resp.column(c).sum();
            // Guard against fully starved components when averaging.
            let nk_safe = nk + 1e-10;

            let mut xbar = Array1::zeros(d);
            for i in 0..n {
                let r = resp[[i, c]];
                if r > 0.0 {
                    xbar.scaled_add(r, &data.row(i));
                }
            }
            xbar /= nk_safe;

            let mut sk = 0.0;
            for i in 0..n {
                let r = resp[[i, c]];
                if r > 0.0 {
                    sk += r * Self::squared_distance(&data.row(i), &xbar.view());
                }
            }
            sk = sk / (nk_safe * df) + self.reg_covar;

            let bk = priors.beta0 + nk;
            let dev = Self::squared_distance(&xbar.view(), &priors.mean0.view());

            alpha[c] = priors.alpha0 + nk;
            beta[c] = bk;
            shape[c] = priors.shape0 + 0.5 * df * nk;
            rate[c] = priors.rate0 + 0.5 * (df * nk * sk + priors.beta0 * nk / bk * dev);
            for j in 0..d {
                means[[c, j]] = (priors.beta0 * priors.mean0[j] + nk * xbar[j]) / bk;
            }
        }

        Posterior {
            alpha,
            beta,
            means,
            shape,
            rate,
        }
    }

    /// Unnormalized log responsibilities `ln ρₙₖ` for every point.
    fn weighted_log_prob(post: &Posterior, data: &Array2<f64>) -> Array2<f64> {
        let n = data.nrows();
        let df = data.ncols() as f64;
        let k = post.alpha.len();
        let psi_alpha_sum = digamma(post.alpha.sum());

        let mut out = Array2::zeros((n, k));
        for c in 0..k {
            let ln_pi = digamma(post.alpha[c]) - psi_alpha_sum;
            let ln_lambda = digamma(post.shape[c]) - post.rate[c].ln();
            let precision = post.shape[c] / post.rate[c];
            let base = ln_pi + 0.5 * df * ln_lambda - 0.5 * df * LN_2PI - 0.5 * df / post.beta[c];
            for i in 0..n {
                let sq = Self::squared_distance(&data.row(i), &post.means.row(c));
                out[[i, c]] = base - 0.5 * precision * sq;
            }
        }
        out
    }

    /// Normalized responsibilities from the current posterior.
    fn e_step(post: &Posterior, data: &Array2<f64>) -> Array2<f64> {
        let mut log_prob = Self::weighted_log_prob(post, data);
        let k = post.alpha.len();
        for i in 0..data.nrows() {
            let row: Vec<f64> = log_prob.row(i).to_vec();
            let norm = Self::logsumexp(&row);
            for c in 0..k {
                log_prob[[i, c]] = (log_prob[[i, c]] - norm).exp();
            }
        }
        log_prob
    }

    /// Variational objective surrogate: responsibility entropy plus the
    /// posterior log-normalizers. Constant once the posterior stops moving,
    /// which is the convergence signal.
    fn objective(post: &Posterior, resp: &Array2<f64>, d: usize) -> f64 {
        let entropy: f64 = resp
            .iter()
            .map(|&r| if r > 0.0 { -r * r.ln() } else { 0.0 })
            .sum();
        let gamma_norm: f64 = post
            .shape
            .iter()
            .zip(post.rate.iter())
            .map(|(&a, &b)| ln_gamma(a) - a * b.ln())
            .sum();
        let dirichlet_norm =
            post.alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>() - ln_gamma(post.alpha.sum());
        let beta_term = -0.5 * d as f64 * post.beta.iter().map(|&b| b.ln()).sum::<f64>();
        entropy + gamma_norm + dirichlet_norm + beta_term
    }

    fn to_matrix(data: &[Vec<f64>]) -> Result<Array2<f64>> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }
        let n = data.len();
        let d = data[0].len();
        let mut flat: Vec<f64> = Vec::with_capacity(n * d);
        for point in data {
            if point.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: point.len(),
                });
            }
            flat.extend(point);
        }
        Array2::from_shape_vec((n, d), flat).map_err(|e| Error::Other(e.to_string()))
    }
}

impl MixtureFitter for BayesianGmm {
    fn fit(&mut self, data: &[Vec<f64>]) -> Result<MixtureFit> {
        if self.n_components == 0 {
            return Err(Error::InvalidParameter {
                name: "n_components",
                message: "must be > 0",
            });
        }
        let data_arr = Self::to_matrix(data)?;
        let d = data_arr.ncols();

        let mut rng: Box<dyn RngCore> = match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::rng()),
        };

        let priors = self.compute_priors(&data_arr);
        let seeds = self.init_seeds(&data_arr, &mut rng);
        let resp = self.init_resp(&data_arr, &seeds);
        let mut post = self.m_step(&data_arr, &resp, &priors);

        let mut objective = f64::NEG_INFINITY;
        let mut converged = false;
        for _iter in 0..self.max_iter {
            let resp = Self::e_step(&post, &data_arr);
            post = self.m_step(&data_arr, &resp, &priors);

            let next = Self::objective(&post, &resp, d);
            let change = next - objective;
            objective = next;
            if change.abs() < self.tol {
                converged = true;
                break;
            }
        }

        let alpha_sum = post.alpha.sum();
        let weights: Vec<f64> = post.alpha.iter().map(|&a| a / alpha_sum).collect();
        let covariances: Vec<f64> = post
            .shape
            .iter()
            .zip(post.rate.iter())
            .map(|(&a, &b)| b / a)
            .collect();
        let means: Vec<Vec<f64>> = post.means.rows().into_iter().map(|r| r.to_vec()).collect();

        self.fitted = Some(post);
        Ok(MixtureFit {
            converged,
            means,
            weights,
            covariances,
        })
    }

    fn predict(&self, data: &[Vec<f64>]) -> Result<Vec<usize>> {
        let post = self.fitted.as_ref().ok_or(Error::NotFitted)?;
        let data_arr = Self::to_matrix(data)?;
        if data_arr.ncols() != post.means.ncols() {
            return Err(Error::DimensionMismatch {
                expected: post.means.ncols(),
                found: data_arr.ncols(),
            });
        }

        let log_prob = Self::weighted_log_prob(post, &data_arr);
        Ok(log_prob
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            })
            .collect())
    }

    fn n_components(&self) -> usize {
        self.n_components
    }
}

/// Digamma function ψ(x) for x > 0.
///
/// Recurrence pushes the argument above 6, then the asymptotic series
/// applies. Accurate to roughly 1e-12 over the arguments used here.
fn digamma(mut x: f64) -> f64 {
    debug_assert!(x.is_finite() && x > 0.0, "digamma requires x > 0 and finite");
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    result + x.ln() - 0.5 * inv
        - inv2 * (1.0 / 12.0 - inv2 * (1.0 / 120.0 - inv2 / 252.0))
}

/// Natural log of the gamma function for x > 0.
///
/// Recurrence pushes the argument above 8, then Stirling's series applies.
fn ln_gamma(mut x: f64) -> f64 {
    debug_assert!(x.is_finite() && x > 0.0, "ln_gamma requires x > 0 and finite");
    let mut shift = 0.0;
    while x < 8.0 {
        shift -= x.ln();
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    shift + 0.5 * (LN_2PI - x.ln()) + x * (x.ln() - 1.0)
        + inv * (1.0 / 12.0 - inv2 * (1.0 / 360.0 - inv2 / 1260.0))
}
