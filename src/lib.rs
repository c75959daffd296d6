//! # locus
//!
//! Incremental spatial cluster estimation over batched 3D detections.
//!
//! Detections (latitude, longitude, altitude) arrive in batches across
//! repeated sensor sweeps. [`ClusterEstimator`] accumulates them, refits a
//! bounded-component variational Bayesian Gaussian mixture once enough new
//! evidence has arrived, and prunes the raw fit down to a stable set of
//! [`Cluster`]s through ownership, weight-drop, and covariance-outlier
//! filters.
//!
//! ```rust
//! use locus::{ClusterEstimator, EstimatorConfig, Point3D};
//!
//! let config = EstimatorConfig::new(5, 1, 10, 42, 2);
//! let mut estimator = ClusterEstimator::create(config).unwrap();
//!
//! let detections: Vec<Point3D> = (0..10)
//!     .map(|i| Point3D::new(49.26 + i as f64 * 1e-4, -123.25, 100.0))
//!     .collect();
//!
//! match estimator.run(&detections, false).unwrap() {
//!     Some(clusters) => {
//!         for c in &clusters {
//!             println!("{:?} weight={:.2}", c.mean, c.weight);
//!         }
//!     }
//!     None => println!("not enough evidence yet"),
//! }
//! ```

pub mod error;
pub mod estimator;
pub mod geom;
pub mod mixture;
pub mod scale;

pub use error::{Error, Result};
pub use estimator::{
    Cluster, ClusterEstimator, EstimatorConfig, MAX_COVARIANCE_THRESHOLD, WEIGHT_DROP_THRESHOLD,
};
pub use geom::{extract_kml_points, parse_coordinates, Point3D};
pub use mixture::{BayesianGmm, MixtureFit, MixtureFitter};
pub use scale::StandardScaler;
