//! State-space model container and shape validation
//!
//! [`StateSpace`] owns the seven system parameters, checks their dimensional
//! consistency at construction, and exposes the filter, smoother, gradient
//! and decomposition entry points.

use nalgebra::{DMatrix, DVector};

use crate::filters::decompose::{self, SmoothedDecomposition};
use crate::filters::diffuse::{self, FilterOutput};
use crate::filters::smoother::{self, SmootherOutput};
use crate::gradient::maps::GradientMaps;
use crate::models::factored;
use crate::models::Initialization;
use crate::types::params::{SystemMatrix, SystemVector};
use crate::utils::moments::{self, SmoothedMoments};
use crate::{Error, Result};

// ============================================================================
// Dimensions
// ============================================================================

/// Dimensions of a state-space system.
///
/// `n` is fixed only for time-varying systems; a time-invariant system takes
/// its sample length from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemDims {
    /// Number of observed series.
    pub p: usize,
    /// State dimension.
    pub m: usize,
    /// State-shock dimension.
    pub g: usize,
    /// Number of time points, when pinned down by a tau map.
    pub n: Option<usize>,
}

// ============================================================================
// StateSpace
// ============================================================================

/// A linear Gaussian state-space model.
///
/// Measurement: `y_t = Z_t alpha_t + d_t + eps_t`, `eps_t ~ N(0, H_t)`.
/// State: `alpha_{t+1} = T_{t+1} alpha_t + c_{t+1} + R_{t+1} eta_t`,
/// `eta_t ~ N(0, Q_{t+1})`.
///
/// Parameters are immutable across a filter call. All shape checks happen in
/// [`StateSpace::new`]; numerical checks (finiteness, PSD-ness of H) happen
/// at filter entry.
#[derive(Debug, Clone)]
pub struct StateSpace {
    /// Measurement loading Z (p x m).
    pub z: SystemMatrix,
    /// Measurement intercept d (p).
    pub d: SystemVector,
    /// Observation noise covariance H (p x p).
    pub h: SystemMatrix,
    /// Transition T (m x m).
    pub t: SystemMatrix,
    /// Transition intercept c (m).
    pub c: SystemVector,
    /// State-shock selector R (m x g).
    pub r: SystemMatrix,
    /// State-shock covariance Q (g x g).
    pub q: SystemMatrix,
    dims: SystemDims,
    pub(crate) initial_mean: Option<DVector<f64>>,
    pub(crate) initial_cov: Option<DMatrix<f64>>,
}

impl StateSpace {
    /// Creates a model from possibly time-varying parameters and validates
    /// every declared shape.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] on any dimensional inconsistency:
    /// slice shapes, tau lengths (n for measurement parameters, n + 1 for
    /// transition parameters), tau ranges, or disagreeing sample lengths.
    pub fn new(
        z: SystemMatrix,
        d: SystemVector,
        h: SystemMatrix,
        t: SystemMatrix,
        c: SystemVector,
        r: SystemMatrix,
        q: SystemMatrix,
    ) -> Result<Self> {
        let p = z.nrows();
        let m = z.ncols();
        let g = r.ncols();
        if p == 0 || m == 0 {
            return Err(Error::ShapeMismatch(
                "system must have at least one series and one state".into(),
            ));
        }

        check_matrix_slices("Z", &z, p, m)?;
        check_vector_slices("d", &d, p)?;
        check_matrix_slices("H", &h, p, p)?;
        check_matrix_slices("T", &t, m, m)?;
        check_vector_slices("c", &c, m)?;
        check_matrix_slices("R", &r, m, g)?;
        check_matrix_slices("Q", &q, g, g)?;

        let n = resolve_sample_length(&z, &d, &h, &t, &c, &r, &q)?;

        let ss = Self {
            z,
            d,
            h,
            t,
            c,
            r,
            q,
            dims: SystemDims { p, m, g, n },
            initial_mean: None,
            initial_cov: None,
        };
        ss.check_tau_ranges()?;
        Ok(ss)
    }

    /// Convenience constructor for a time-invariant system.
    pub fn time_invariant(
        z: DMatrix<f64>,
        d: DVector<f64>,
        h: DMatrix<f64>,
        t: DMatrix<f64>,
        c: DVector<f64>,
        r: DMatrix<f64>,
        q: DMatrix<f64>,
    ) -> Result<Self> {
        Self::new(
            SystemMatrix::constant(z),
            SystemVector::constant(d),
            SystemMatrix::constant(h),
            SystemMatrix::constant(t),
            SystemVector::constant(c),
            SystemMatrix::constant(r),
            SystemMatrix::constant(q),
        )
    }

    /// Overrides the default initial state mean.
    pub fn with_initial_state(mut self, a0: DVector<f64>) -> Self {
        self.initial_mean = Some(a0);
        self
    }

    /// Overrides the default initial state covariance.
    ///
    /// `+inf` diagonal entries mark diffuse states; the finite block becomes
    /// the stationary covariance.
    pub fn with_initial_covariance(mut self, p0: DMatrix<f64>) -> Self {
        self.initial_cov = Some(p0);
        self
    }

    /// System dimensions.
    #[inline]
    pub fn dims(&self) -> SystemDims {
        self.dims
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Runs the exact-diffuse univariate filter.
    ///
    /// Returns the predicted state means `a` (m x (n+1)), both covariance
    /// sequences, the per-series innovations and gains, the diffuse cutoff
    /// and the exact log-likelihood.
    pub fn filter(&self, y: &DMatrix<f64>) -> Result<FilterOutput> {
        self.check_finite()?;
        let n = self.check_data(y)?;
        let init = Initialization::resolve(self)?;
        let obs = factored::factor_observations(self, y, n)?;
        diffuse::run_filter(self, &obs, &init)
    }

    /// Runs the filter and the backward smoother.
    pub fn smooth(&self, y: &DMatrix<f64>) -> Result<(SmootherOutput, FilterOutput)> {
        self.check_finite()?;
        let n = self.check_data(y)?;
        let init = Initialization::resolve(self)?;
        let obs = factored::factor_observations(self, y, n)?;
        let fout = diffuse::run_filter(self, &obs, &init)?;
        let sout = smoother::run_smoother(self, &obs, &init, &fout, y);
        Ok((sout, fout))
    }

    /// Recovers the smoothed state variances `V`, lag-one cross-covariances
    /// `J`, and observation-error precision-form matrices `D` alongside the
    /// smoother output.
    pub fn smoothed_moments(
        &self,
        y: &DMatrix<f64>,
    ) -> Result<(SmoothedMoments, SmootherOutput, FilterOutput)> {
        self.check_finite()?;
        let n = self.check_data(y)?;
        let init = Initialization::resolve(self)?;
        let obs = factored::factor_observations(self, y, n)?;
        let fout = diffuse::run_filter(self, &obs, &init)?;
        let sout = smoother::run_smoother(self, &obs, &init, &fout, y);
        let mom = moments::smoothed_moments(self, &obs, &init, &fout, &sout);
        Ok((mom, sout, fout))
    }

    /// Computes the log-likelihood and its analytic gradient with respect to
    /// the free parameter vector described by `maps`.
    ///
    /// The gradient never inspects the free vector itself: each parameter
    /// block's contribution is chained through the caller-supplied Jacobian
    /// in `maps`. During the diffuse phase the score uses the standard-part
    /// smoothing residuals, which is exact once the diffuse block has
    /// collapsed and approximate before; verify against finite differences
    /// when estimating models with long diffuse windows.
    pub fn gradient(&self, y: &DMatrix<f64>, maps: &GradientMaps) -> Result<(f64, DVector<f64>)> {
        self.check_finite()?;
        let n = self.check_data(y)?;
        maps.check_shapes(self)?;
        let init = Initialization::resolve(self)?;
        let obs = factored::factor_observations(self, y, n)?;
        let fout = diffuse::run_filter(self, &obs, &init)?;
        let sout = smoother::run_smoother(self, &obs, &init, &fout, y);
        let mom = moments::smoothed_moments(self, &obs, &init, &fout, &sout);
        crate::gradient::run_gradient(self, y, maps, &fout, &sout, &mom)
    }

    /// Decomposes the smoothed state at the requested periods into per-period
    /// data contributions plus a constant term.
    pub fn decompose_smoothed(
        &self,
        y: &DMatrix<f64>,
        periods: &[usize],
    ) -> Result<SmoothedDecomposition> {
        decompose::run_decomposition(self, y, periods)
    }

    // ------------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------------

    /// Validates the data matrix against the system and returns the sample
    /// length.
    pub fn check_data(&self, y: &DMatrix<f64>) -> Result<usize> {
        if y.nrows() != self.dims.p {
            return Err(Error::ShapeMismatch(format!(
                "data has {} rows, system has {} series",
                y.nrows(),
                self.dims.p
            )));
        }
        let n = self.dims.n.unwrap_or_else(|| y.ncols());
        if y.ncols() != n {
            return Err(Error::ShapeMismatch(format!(
                "data has {} columns, tau maps declare {} periods",
                y.ncols(),
                n
            )));
        }
        if n == 0 {
            return Err(Error::ShapeMismatch("data has no periods".into()));
        }
        Ok(n)
    }

    /// Verifies that every parameter slice is finite.
    pub fn check_finite(&self) -> Result<()> {
        let finite_mat = |p: &SystemMatrix| p.slices().iter().all(|s| s.iter().all(|v| v.is_finite()));
        let finite_vec = |p: &SystemVector| p.slices().iter().all(|s| s.iter().all(|v| v.is_finite()));
        if !finite_mat(&self.z) {
            return Err(Error::UnknownParameter("Z"));
        }
        if !finite_vec(&self.d) {
            return Err(Error::UnknownParameter("d"));
        }
        if !finite_mat(&self.h) {
            return Err(Error::UnknownParameter("H"));
        }
        if !finite_mat(&self.t) {
            return Err(Error::UnknownParameter("T"));
        }
        if !finite_vec(&self.c) {
            return Err(Error::UnknownParameter("c"));
        }
        if !finite_mat(&self.r) {
            return Err(Error::UnknownParameter("R"));
        }
        if !finite_mat(&self.q) {
            return Err(Error::UnknownParameter("Q"));
        }
        Ok(())
    }

    fn check_tau_ranges(&self) -> Result<()> {
        let check_mat = |name: &str, p: &SystemMatrix| -> Result<()> {
            if let Some(tau) = p.tau() {
                if let Some(&bad) = tau.iter().find(|&&i| i >= p.n_slices()) {
                    return Err(Error::ShapeMismatch(format!(
                        "tau for {name} references slice {bad}, only {} stored",
                        p.n_slices()
                    )));
                }
            } else if p.n_slices() > 1 {
                return Err(Error::ShapeMismatch(format!(
                    "{name} stores {} slices but has no tau map",
                    p.n_slices()
                )));
            }
            Ok(())
        };
        let check_vec = |name: &str, p: &SystemVector| -> Result<()> {
            if let Some(tau) = p.tau() {
                if let Some(&bad) = tau.iter().find(|&&i| i >= p.n_slices()) {
                    return Err(Error::ShapeMismatch(format!(
                        "tau for {name} references slice {bad}, only {} stored",
                        p.n_slices()
                    )));
                }
            } else if p.n_slices() > 1 {
                return Err(Error::ShapeMismatch(format!(
                    "{name} stores {} slices but has no tau map",
                    p.n_slices()
                )));
            }
            Ok(())
        };
        check_mat("Z", &self.z)?;
        check_vec("d", &self.d)?;
        check_mat("H", &self.h)?;
        check_mat("T", &self.t)?;
        check_vec("c", &self.c)?;
        check_mat("R", &self.r)?;
        check_mat("Q", &self.q)?;
        Ok(())
    }
}

// ============================================================================
// Validation helpers
// ============================================================================

fn check_matrix_slices(name: &str, p: &SystemMatrix, rows: usize, cols: usize) -> Result<()> {
    for (i, s) in p.slices().iter().enumerate() {
        if s.nrows() != rows || s.ncols() != cols {
            return Err(Error::ShapeMismatch(format!(
                "{name} slice {i} is {}x{}, expected {rows}x{cols}",
                s.nrows(),
                s.ncols()
            )));
        }
    }
    Ok(())
}

fn check_vector_slices(name: &str, p: &SystemVector, len: usize) -> Result<()> {
    for (i, s) in p.slices().iter().enumerate() {
        if s.len() != len {
            return Err(Error::ShapeMismatch(format!(
                "{name} slice {i} has length {}, expected {len}",
                s.len()
            )));
        }
    }
    Ok(())
}

/// Reconciles the tau maps into a single sample length.
///
/// Measurement parameters declare n, transition parameters n + 1. All
/// declared lengths must agree; a fully time-invariant system leaves n open.
fn resolve_sample_length(
    z: &SystemMatrix,
    d: &SystemVector,
    h: &SystemMatrix,
    t: &SystemMatrix,
    c: &SystemVector,
    r: &SystemMatrix,
    q: &SystemMatrix,
) -> Result<Option<usize>> {
    let mut n: Option<usize> = None;
    let mut merge = |name: &str, declared: Option<usize>| -> Result<()> {
        if let Some(len) = declared {
            match n {
                None => n = Some(len),
                Some(prev) if prev != len => {
                    return Err(Error::ShapeMismatch(format!(
                        "tau for {name} declares {len} periods, others declare {prev}"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    };

    merge("Z", z.tau().map(<[usize]>::len))?;
    merge("d", d.tau().map(<[usize]>::len))?;
    merge("H", h.tau().map(<[usize]>::len))?;
    // Transition taus have one extra entry for the initial transition.
    let trans = |tau: Option<&[usize]>| -> Result<Option<usize>> {
        match tau {
            None => Ok(None),
            Some(s) if s.is_empty() => Err(Error::ShapeMismatch(
                "transition tau must have length n + 1".into(),
            )),
            Some(s) => Ok(Some(s.len() - 1)),
        }
    };
    merge("T", trans(t.tau())?)?;
    merge("c", trans(c.tau())?)?;
    merge("R", trans(r.tau())?)?;
    merge("Q", trans(q.tau())?)?;
    Ok(n)
}
