//! Stationary/diffuse partition and initial conditions
//!
//! Splits the state vector into a stationary block, whose unconditional
//! moments are solved from the slice-0 transition, and a diffuse block,
//! which the exact-initial filter treats analytically. The partition comes
//! from the eigenstructure of T: every state loaded by an eigendirection
//! with a unit-or-larger eigenvalue is nonstationary.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::models::StateSpace;
use crate::utils::linalg;
use crate::{Error, Result};

/// Tolerance for classifying an eigenvalue as on-or-outside the unit circle
/// and for nullspace loadings.
const UNIT_ROOT_TOL: f64 = 1e-8;

// ============================================================================
// Initialization
// ============================================================================

/// Resolved initial conditions for the exact-initial filter.
///
/// Holds the initial mean `a0`, the stationary-block covariance `Q0`, and
/// the index partition from which the selector matrices `R0` (stationary)
/// and `A0` (diffuse) are built.
#[derive(Debug, Clone)]
pub struct Initialization {
    a0: DVector<f64>,
    q0: DMatrix<f64>,
    stationary: Vec<usize>,
    diffuse: Vec<usize>,
    m: usize,
}

impl Initialization {
    /// Resolves the initial conditions for a system, combining defaults with
    /// any explicit overrides stored on it.
    ///
    /// Defaults: the partition from the eigenstructure of `T` slice 0, the
    /// stationary mean from `(I - T_s) a0_s = c_s`, and the stationary
    /// covariance from the discrete Lyapunov equation. An explicit `P0`
    /// replaces the partition (`+inf` diagonal entries mark diffuse states)
    /// and the covariance; an explicit `a0` replaces the mean.
    ///
    /// # Errors
    /// - [`Error::NonStationarySection`] when a default solve is required
    ///   and the stationary block is not stable.
    /// - [`Error::LyapunovFailure`] when the covariance solve fails.
    /// - [`Error::UnknownParameter`] for non-finite overrides.
    pub fn resolve(ss: &StateSpace) -> Result<Self> {
        let m = ss.dims().m;
        let t0 = ss.t.slice(0);
        let c0 = ss.c.slice(0);

        if let Some(a0) = &ss.initial_mean {
            if a0.len() != m {
                return Err(Error::ShapeMismatch(format!(
                    "a0 has length {}, expected {m}",
                    a0.len()
                )));
            }
            if !a0.iter().all(|v| v.is_finite()) {
                return Err(Error::UnknownParameter("a0"));
            }
        }

        let (stationary, diffuse, explicit_q0) = match &ss.initial_cov {
            Some(p0) => {
                if p0.nrows() != m || p0.ncols() != m {
                    return Err(Error::ShapeMismatch(format!(
                        "P0 is {}x{}, expected {m}x{m}",
                        p0.nrows(),
                        p0.ncols()
                    )));
                }
                let diffuse: Vec<usize> =
                    (0..m).filter(|&i| p0[(i, i)] == f64::INFINITY).collect();
                let stationary: Vec<usize> =
                    (0..m).filter(|&i| p0[(i, i)] != f64::INFINITY).collect();
                let q0 = linalg::select(p0, &stationary, &stationary);
                if !q0.iter().all(|v| v.is_finite()) {
                    return Err(Error::UnknownParameter("P0"));
                }
                (stationary, diffuse, Some(q0))
            }
            None => {
                let mask = diffuse_mask(t0);
                let diffuse: Vec<usize> = (0..m).filter(|&i| mask[i]).collect();
                let stationary: Vec<usize> = (0..m).filter(|&i| !mask[i]).collect();
                (stationary, diffuse, None)
            }
        };

        debug!(
            "initial partition: {} stationary, {} diffuse states",
            stationary.len(),
            diffuse.len()
        );

        let t_ss = linalg::select(t0, &stationary, &stationary);
        let need_default_a0 = ss.initial_mean.is_none();
        let need_default_q0 = explicit_q0.is_none();

        if (need_default_a0 || need_default_q0) && !stationary.is_empty() {
            let rho = linalg::spectral_radius(&t_ss);
            if !(rho < 1.0 - UNIT_ROOT_TOL) {
                return Err(Error::NonStationarySection(rho));
            }
        }

        let q0 = match explicit_q0 {
            Some(q0) => q0,
            None => {
                // Q0 - T_s Q0 T_s' = (R Q R')[s, s] on the stationary block.
                let rqr = ss.r.slice(0) * ss.q.slice(0) * ss.r.slice(0).transpose();
                let sigma = linalg::select(&rqr, &stationary, &stationary);
                linalg::solve_discrete_lyapunov(&t_ss, &sigma)?
            }
        };

        let a0 = match &ss.initial_mean {
            Some(a0) => a0.clone(),
            None => {
                // Zero on the diffuse block, unconditional mean on the rest.
                let mut a0 = DVector::zeros(m);
                if !stationary.is_empty() {
                    let c_s = linalg::select_entries(c0, &stationary);
                    let lhs = DMatrix::identity(stationary.len(), stationary.len()) - &t_ss;
                    let a0_s = lhs
                        .lu()
                        .solve(&c_s)
                        .ok_or(Error::NonStationarySection(1.0))?;
                    for (k, &i) in stationary.iter().enumerate() {
                        a0[i] = a0_s[k];
                    }
                }
                a0
            }
        };

        Ok(Self {
            a0,
            q0,
            stationary,
            diffuse,
            m,
        })
    }

    /// Initial state mean.
    #[inline]
    pub fn a0(&self) -> &DVector<f64> {
        &self.a0
    }

    /// Stationary-block covariance (s x s).
    #[inline]
    pub fn q0(&self) -> &DMatrix<f64> {
        &self.q0
    }

    /// Indices of the stationary states.
    #[inline]
    pub fn stationary_states(&self) -> &[usize] {
        &self.stationary
    }

    /// Indices of the diffuse states.
    #[inline]
    pub fn diffuse_states(&self) -> &[usize] {
        &self.diffuse
    }

    /// Number of diffuse states.
    #[inline]
    pub fn diffuse_dim(&self) -> usize {
        self.diffuse.len()
    }

    /// Stationary selector `R0` (m x s): standard-basis columns.
    pub fn selector_stationary(&self) -> DMatrix<f64> {
        selector(self.m, &self.stationary)
    }

    /// Diffuse selector `A0` (m x (m - s)): standard-basis columns.
    pub fn selector_diffuse(&self) -> DMatrix<f64> {
        selector(self.m, &self.diffuse)
    }

    /// Finite part of the initial covariance, `P*_0 = R0 Q0 R0'`.
    pub fn p_star0(&self) -> DMatrix<f64> {
        let r0 = self.selector_stationary();
        &r0 * &self.q0 * r0.transpose()
    }

    /// Diffuse part of the initial covariance, `P_inf = A0 A0'`.
    pub fn p_inf0(&self) -> DMatrix<f64> {
        let a0 = self.selector_diffuse();
        &a0 * a0.transpose()
    }
}

fn selector(m: usize, idx: &[usize]) -> DMatrix<f64> {
    let mut s = DMatrix::zeros(m, idx.len());
    for (j, &i) in idx.iter().enumerate() {
        s[(i, j)] = 1.0;
    }
    s
}

// ============================================================================
// Partition
// ============================================================================

/// Marks every state loaded by an eigendirection with a unit-or-larger
/// eigenvalue.
///
/// For each such eigenvalue the nullspace of `T - lambda I` (real) or of the
/// real quadratic `T^2 - 2 Re(lambda) T + |lambda|^2 I` (complex pair) is
/// probed through an SVD; states with a loading above tolerance on any
/// nullspace direction are nonstationary.
fn diffuse_mask(t: &DMatrix<f64>) -> Vec<bool> {
    let m = t.nrows();
    let mut mask = vec![false; m];
    let eigs = t.complex_eigenvalues();

    for lam in eigs.iter() {
        if lam.norm() < 1.0 - UNIT_ROOT_TOL {
            continue;
        }
        if lam.im < -UNIT_ROOT_TOL {
            // Conjugate partner covers this pair.
            continue;
        }
        let probe = if lam.im.abs() <= UNIT_ROOT_TOL {
            t - DMatrix::identity(m, m) * lam.re
        } else {
            t * t - t * (2.0 * lam.re) + DMatrix::identity(m, m) * lam.norm_sqr()
        };
        let svd = probe.svd(false, true);
        let v_t = match &svd.v_t {
            Some(v_t) => v_t,
            None => continue,
        };
        let smax = svd.singular_values.iter().fold(0.0_f64, |a, s| a.max(*s));
        let tol = UNIT_ROOT_TOL * smax.max(1.0);
        for (k, sv) in svd.singular_values.iter().enumerate() {
            if *sv > tol {
                continue;
            }
            for i in 0..m {
                if v_t[(k, i)].abs() > UNIT_ROOT_TOL {
                    mask[i] = true;
                }
            }
        }
    }
    mask
}
