//! Univariate state smoother with exact-initial phase
//!
//! Backward pass over the filter's retained quantities. Series within a
//! period are traversed in reverse index order, mirroring the filter's
//! forward order. The standard phase accumulates the smoothing residuals
//! `r` and `N`; the exact-initial phase additionally tracks the diffuse
//! residual `r1` until the sample start.

use nalgebra::{DMatrix, DVector};

use crate::filters::diffuse::FilterOutput;
use crate::models::factored::FactoredObservations;
use crate::models::{Initialization, StateSpace};

// ============================================================================
// Smoother output
// ============================================================================

/// Output of the backward smoother.
///
/// `r` and `n` hold the smoothing residuals recorded at each period after
/// its series updates and before the backward transition propagation, so
/// `alpha[:,t] = a[:,t] + P[t] r[:,t]`.
#[derive(Debug, Clone)]
pub struct SmootherOutput {
    /// Smoothed state means, m x n.
    pub alpha: DMatrix<f64>,
    /// Smoothed state disturbances arriving at each period, g x n.
    pub eta: DMatrix<f64>,
    /// Smoothed observation errors against the original measurement block,
    /// p x n; entries for missing observations are NaN.
    pub epsilon: DMatrix<f64>,
    /// Smoothing residuals r, m x n.
    pub r: DMatrix<f64>,
    /// Smoothing residual variances N, n entries of m x m.
    pub n: Vec<DMatrix<f64>>,
    /// Smoothed initial state.
    pub a0tilde: DVector<f64>,
    /// Log-likelihood carried over from the filter.
    pub log_likelihood: f64,
}

// ============================================================================
// Smoother recursion
// ============================================================================

/// Runs the backward smoother. `y` is the original (untransformed) data,
/// used only to recover the observation errors.
pub(crate) fn run_smoother(
    ss: &StateSpace,
    obs: &FactoredObservations,
    init: &Initialization,
    fout: &FilterOutput,
    y: &DMatrix<f64>,
) -> SmootherOutput {
    let dims = ss.dims();
    let (p, m, g) = (dims.p, dims.m, dims.g);
    let n = obs.n;
    let dt = fout.dt;
    let eye = DMatrix::identity(m, m);

    let mut alpha = DMatrix::zeros(m, n);
    let mut eta = DMatrix::zeros(g, n);
    let mut r_store = DMatrix::zeros(m, n);
    let mut n_store: Vec<DMatrix<f64>> = vec![DMatrix::zeros(m, m); n];

    let mut rti = DVector::zeros(m);
    let mut nti = DMatrix::zeros(m, m);

    // Standard phase: t = n-1 down to dt.
    for t in (dt..n).rev() {
        let z = obs.z.slice(t);
        for j in (0..p).rev() {
            if !obs.y[(j, t)].is_finite() {
                continue;
            }
            let f_jt = fout.f[(j, t)];
            if f_jt <= 0.0 {
                continue;
            }
            let zj = z.row(j).transpose();
            let k_j = fout.k[t].column(j).clone_owned();
            // L = I - K Z / F
            let l = &eye - &k_j * zj.transpose() / f_jt;
            rti = &zj * (fout.v[(j, t)] / f_jt) + l.tr_mul(&rti);
            nti = &zj * zj.transpose() / f_jt + l.transpose() * &nti * &l;
        }
        r_store.set_column(t, &rti);
        n_store[t] = nti.clone();
        alpha.set_column(t, &(fout.a.column(t) + &fout.p[t] * &rti));
        // Disturbance arriving at t uses the slices governing the
        // transition into t.
        eta.set_column(t, &(ss.q.slice(t) * ss.r.slice(t).tr_mul(&rti)));

        let tt = ss.t.slice(t);
        rti = tt.tr_mul(&rti);
        nti = tt.transpose() * &nti * tt;
    }

    // Exact-initial phase: t = dt-1 down to 0, with the residual split into
    // a finite part r0 and a diffuse part r1.
    let mut r0 = rti.clone();
    let mut r1 = DVector::zeros(m);
    let mut n0 = nti.clone();

    for t in (0..dt).rev() {
        let z = obs.z.slice(t);
        for j in (0..p).rev() {
            if !obs.y[(j, t)].is_finite() {
                continue;
            }
            let fd_jt = fout.fd[(j, t)];
            let f_jt = fout.f[(j, t)];
            let zj = z.row(j).transpose();
            if fd_jt != 0.0 {
                let kd_j = fout.kd[t].column(j).clone_owned();
                let k_j = fout.k[t].column(j).clone_owned();
                let ld = &eye - &kd_j * zj.transpose() / fd_jt;
                let l0 = (&kd_j * (f_jt / fd_jt) - &k_j) * zj.transpose() / fd_jt;
                // r1 reads the pre-update r0.
                let r1_new = &zj * (fout.v[(j, t)] / fd_jt) + l0.tr_mul(&r0) + ld.tr_mul(&r1);
                r0 = ld.tr_mul(&r0);
                r1 = r1_new;
                n0 = ld.transpose() * &n0 * &ld;
            } else if f_jt > 0.0 {
                let k_j = fout.k[t].column(j).clone_owned();
                let l = &eye - &k_j * zj.transpose() / f_jt;
                r0 = &zj * (fout.v[(j, t)] / f_jt) + l.tr_mul(&r0);
                n0 = &zj * zj.transpose() / f_jt + l.transpose() * &n0 * &l;
            }
        }
        r_store.set_column(t, &r0);
        n_store[t] = n0.clone();
        alpha.set_column(t, &(fout.a.column(t) + &fout.p[t] * &r0 + &fout.pd[t] * &r1));
        eta.set_column(t, &(ss.q.slice(t) * ss.r.slice(t).tr_mul(&r0)));

        let tt = ss.t.slice(t);
        r0 = tt.tr_mul(&r0);
        r1 = tt.tr_mul(&r1);
        n0 = tt.transpose() * &n0 * tt;
    }

    // Initial-state smoother; r1 stays zero when no diffuse phase ran.
    let a0tilde = init.a0() + init.p_star0() * &r0 + init.p_inf0() * &r1;

    // Observation errors against the original measurement block.
    let mut epsilon = DMatrix::zeros(p, n);
    for t in 0..n {
        let z = ss.z.slice(t);
        let dv = ss.d.slice(t);
        for j in 0..p {
            epsilon[(j, t)] = if y[(j, t)].is_finite() {
                y[(j, t)] - (z.row(j) * alpha.column(t))[(0, 0)] - dv[j]
            } else {
                f64::NAN
            };
        }
    }

    SmootherOutput {
        alpha,
        eta,
        epsilon,
        r: r_store,
        n: n_store,
        a0tilde,
        log_likelihood: fout.log_likelihood,
    }
}
