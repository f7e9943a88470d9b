//! Statespace: exact-initial Kalman filtering for linear Gaussian models
//!
//! State estimation, smoothing, likelihood and analytic score computation for
//! linear Gaussian state-space models with possibly time-varying parameters,
//! partially missing observations, and partially diffuse initial conditions.
//!
//! # Model
//!
//! Measurement:  `y_t = Z_t alpha_t + d_t + eps_t`,  `eps_t ~ N(0, H_t)`
//!
//! State:        `alpha_{t+1} = T_{t+1} alpha_t + c_{t+1} + R_{t+1} eta_t`,
//! `eta_t ~ N(0, Q_{t+1})`
//!
//! Initial:      `alpha_init ~ N(a0, P*_0 + kappa P_inf)` with `kappa -> inf`
//! handled analytically (exact-initial / exact-diffuse treatment).
//!
//! Any parameter may be time-varying: it then stores a stack of slices plus a
//! `tau` map from time indices to slices. Missing observations are marked
//! with `NaN` and dropped from the updates; a missing entry is *not* zero.
//!
//! # Pipeline
//!
//! - [`models::StateSpace`] holds the parameters and validates shapes.
//! - The initializer partitions states into stationary and diffuse blocks
//!   and solves for the stationary covariance.
//! - The observation factorizer reduces correlated measurement noise to a
//!   diagonal one through an LDL' decomposition, so that the filter can
//!   process one scalar observation at a time.
//! - [`filters::diffuse`] runs the exact-diffuse univariate filter,
//!   [`filters::smoother`] the matching backward smoother, and [`gradient`]
//!   the closed-form score of the log-likelihood.
//!
//! # Example
//!
//! ```
//! use nalgebra::{dmatrix, dvector};
//! use statespace::prelude::*;
//!
//! // Local level model: y_t = mu_t + eps, mu_{t+1} = mu_t + eta.
//! let ss = StateSpace::time_invariant(
//!     dmatrix![1.0],
//!     dvector![0.0],
//!     dmatrix![1.0],
//!     dmatrix![1.0],
//!     dvector![0.0],
//!     dmatrix![1.0],
//!     dmatrix![1.0],
//! )
//! .unwrap();
//!
//! let y = dmatrix![1.0, 2.0, 3.0, 4.0, 5.0];
//! let out = ss.filter(&y).unwrap();
//! assert!(out.log_likelihood.is_finite());
//! assert_eq!(out.dt, 1); // the diffuse level collapses after one period
//! ```

pub mod filters;
pub mod gradient;
pub mod models;
pub mod types;
pub mod utils;

pub mod prelude {
    pub use crate::filters::decompose::SmoothedDecomposition;
    pub use crate::filters::diffuse::FilterOutput;
    pub use crate::filters::smoother::SmootherOutput;
    pub use crate::gradient::maps::GradientMaps;
    pub use crate::models::StateSpace;
    pub use crate::types::params::{SystemMatrix, SystemVector};
    pub use crate::utils::moments::SmoothedMoments;
    pub use crate::{Error, Result};
}

/// Error types for the library.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Dimensional inconsistency between parameters, tau maps, or data.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A parameter slice contains a non-finite entry.
    #[error("parameter `{0}` contains non-finite entries")]
    UnknownParameter(&'static str),
    /// The stationary block is not stable after partitioning.
    #[error("stationary block is not stable (spectral radius {0})")]
    NonStationarySection(f64),
    /// The initial-covariance Lyapunov solve is singular.
    #[error("initial-covariance Lyapunov equation could not be solved")]
    LyapunovFailure,
    /// The observation covariance has a negative LDL' pivot.
    #[error("observation covariance is not positive semi-definite")]
    NonPsdObservationCov,
    /// The diffuse block did not collapse within the sample.
    #[error("diffuse initial conditions did not collapse within the sample")]
    DegenerateDiffuseInit,
}

pub type Result<T> = std::result::Result<T, Error>;
