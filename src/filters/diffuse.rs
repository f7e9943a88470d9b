//! Exact-diffuse univariate Kalman filter
//!
//! Forward recursion over a diagonal-noise measurement block, processing one
//! scalar observation at a time. During the diffuse phase two covariances
//! are tracked: the finite part `P*` and the diffuse part `Pd`; once the
//! data has collapsed `Pd` to zero the recursion continues with the standard
//! single-covariance update.
//!
//! Within a period, series are updated in natural index order. The updates
//! are not commutative in intermediate quantities but their composition is;
//! the deterministic ordering keeps the recorded gains aligned with the
//! smoother's reverse traversal.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::models::factored::FactoredObservations;
use crate::models::{Initialization, StateSpace};
use crate::utils::linalg;
use crate::{Error, Result};

/// Relative tolerance for classifying `Pd` and `F_d` as zero, anchored at
/// the initial diffuse magnitude. A sub-tolerance `F_d` is recorded as
/// exactly 0.0 so the smoother replays the same branch; anything above it is
/// used as-is, without regularization.
const DIFFUSE_TOL: f64 = 1e-10;

// ============================================================================
// Filter output
// ============================================================================

/// Retained per-time output of the exact-diffuse filter.
///
/// Column `t` of `a` is the one-step-ahead prediction `E[alpha_t | y_{<t}]`;
/// the final column is the beyond-sample prediction. `p` and `pd` follow the
/// same indexing. Innovations and gains are per scalar series; entries for
/// missing observations stay zero.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    /// Predicted state means, m x (n+1).
    pub a: DMatrix<f64>,
    /// Finite-part predicted covariances `P*`, n+1 entries.
    pub p: Vec<DMatrix<f64>>,
    /// Diffuse-part predicted covariances `Pd`, n+1 entries (zero after the
    /// cutoff).
    pub pd: Vec<DMatrix<f64>>,
    /// Scalar innovations, p x n.
    pub v: DMatrix<f64>,
    /// Scalar innovation variances `F*`, p x n.
    pub f: DMatrix<f64>,
    /// Scalar diffuse innovation variances `F_d`, p x n.
    pub fd: DMatrix<f64>,
    /// Finite-part gains `K*`, n entries of m x p.
    pub k: Vec<DMatrix<f64>>,
    /// Diffuse-part gains `K_d`, n entries of m x p.
    pub kd: Vec<DMatrix<f64>>,
    /// Diffuse cutoff: number of initial periods processed by the diffuse
    /// recursion.
    pub dt: usize,
    /// Exact log-likelihood of the observed entries.
    pub log_likelihood: f64,
}

// ============================================================================
// Filter recursion
// ============================================================================

/// Runs the exact-diffuse univariate filter on a factored measurement block.
///
/// # Errors
/// Returns [`Error::DegenerateDiffuseInit`] when the diffuse block has not
/// collapsed by the end of the sample.
pub(crate) fn run_filter(
    ss: &StateSpace,
    obs: &FactoredObservations,
    init: &Initialization,
) -> Result<FilterOutput> {
    let dims = ss.dims();
    let (p, m) = (dims.p, dims.m);
    let n = obs.n;

    let mut a = DMatrix::zeros(m, n + 1);
    let mut p_star: Vec<DMatrix<f64>> = Vec::with_capacity(n + 1);
    let mut p_diff: Vec<DMatrix<f64>> = Vec::with_capacity(n + 1);
    let mut v = DMatrix::zeros(p, n);
    let mut f = DMatrix::zeros(p, n);
    let mut fd = DMatrix::zeros(p, n);
    let mut k: Vec<DMatrix<f64>> = vec![DMatrix::zeros(m, p); n];
    let mut kd: Vec<DMatrix<f64>> = vec![DMatrix::zeros(m, p); n];

    // Initial prediction into period 0:
    // a_0 = T a0 + c,  P*_0 = T P*0 T' + R Q R',  Pd_0 = T Pinf T'.
    let t0 = ss.t.slice(0);
    let rqr0 = ss.r.slice(0) * ss.q.slice(0) * ss.r.slice(0).transpose();
    a.set_column(0, &(t0 * init.a0() + ss.c.slice(0)));
    p_star.push(t0 * init.p_star0() * t0.transpose() + rqr0);
    p_diff.push(t0 * init.p_inf0() * t0.transpose());

    let pd_tol = DIFFUSE_TOL * (1.0 + linalg::max_abs(&p_diff[0]));

    let mut sum_contrib = 0.0;
    // Only standard Gaussian updates carry the 2*pi normalizing constant.
    // The kappa -> inf renormalization behind the diffuse likelihood cancels
    // it for every observation that collapses a diffuse dimension, and a
    // deterministic F = 0 observation carries no constant at all.
    let mut n_gaussian = 0usize;

    // Diffuse phase: proceed while Pd has not collapsed.
    let mut t = 0usize;
    while t < n && linalg::max_abs(&p_diff[t]) > pd_tol {
        let mut ati = a.column(t).clone_owned();
        let mut pstar_t = p_star[t].clone();
        let mut pd_t = p_diff[t].clone();
        let z = obs.z.slice(t);
        let dv = obs.d.slice(t);
        let h = obs.h.slice(t);

        for j in 0..p {
            let yjt = obs.y[(j, t)];
            if !yjt.is_finite() {
                continue;
            }
            let zj = z.row(j).transpose();
            let vjt = yjt - zj.dot(&ati) - dv[j];
            let kd_j = &pd_t * &zj;
            let k_j = &pstar_t * &zj;
            let f_jt = k_j.dot(&zj) + h[(j, j)];
            let fd_raw = kd_j.dot(&zj);
            let fd_tol =
                DIFFUSE_TOL * (1.0 + linalg::max_abs(&pd_t)) * zj.norm_squared().max(1.0);
            let fd_jt = if fd_raw.abs() <= fd_tol { 0.0 } else { fd_raw };

            v[(j, t)] = vjt;
            f[(j, t)] = f_jt;
            fd[(j, t)] = fd_jt;
            k[t].set_column(j, &k_j);
            kd[t].set_column(j, &kd_j);

            if fd_jt != 0.0 {
                // Diffuse-nonsingular update.
                ati += &kd_j * (vjt / fd_jt);
                let kdkd = &kd_j * kd_j.transpose();
                let cross = &k_j * kd_j.transpose() + &kd_j * k_j.transpose();
                pstar_t += &kdkd * (f_jt / (fd_jt * fd_jt)) - cross / fd_jt;
                pd_t -= kdkd / fd_jt;
                sum_contrib += fd_jt.ln();
            } else if f_jt > 0.0 {
                // Diffuse-zero update: standard scalar step.
                ati += &k_j * (vjt / f_jt);
                pstar_t -= &k_j * k_j.transpose() / f_jt;
                sum_contrib += f_jt.ln() + vjt * vjt / f_jt;
                n_gaussian += 1;
            }
            // F = 0: zero loading on a zero-variance observation is
            // deterministic; no update, no contribution, no normalizing
            // constant.
        }

        predict(
            ss,
            t + 1,
            &ati,
            &pstar_t,
            Some(&pd_t),
            &mut a,
            &mut p_star,
            &mut p_diff,
            pd_tol,
        );
        t += 1;
    }

    let dt = t;
    if dt == n && linalg::max_abs(&p_diff[n]) > pd_tol {
        return Err(Error::DegenerateDiffuseInit);
    }
    if dt > 0 {
        debug!("diffuse block collapsed after {dt} periods");
    }

    // Standard phase.
    for t in dt..n {
        let mut ati = a.column(t).clone_owned();
        let mut p_t = p_star[t].clone();
        let z = obs.z.slice(t);
        let dv = obs.d.slice(t);
        let h = obs.h.slice(t);

        for j in 0..p {
            let yjt = obs.y[(j, t)];
            if !yjt.is_finite() {
                continue;
            }
            let zj = z.row(j).transpose();
            let vjt = yjt - zj.dot(&ati) - dv[j];
            let k_j = &p_t * &zj;
            let f_jt = k_j.dot(&zj) + h[(j, j)];

            v[(j, t)] = vjt;
            f[(j, t)] = f_jt;
            k[t].set_column(j, &k_j);

            if f_jt > 0.0 {
                ati += &k_j * (vjt / f_jt);
                p_t -= &k_j * k_j.transpose() / f_jt;
                sum_contrib += f_jt.ln() + vjt * vjt / f_jt;
                n_gaussian += 1;
            }
        }

        predict(
            ss,
            t + 1,
            &ati,
            &p_t,
            None,
            &mut a,
            &mut p_star,
            &mut p_diff,
            pd_tol,
        );
    }

    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let log_likelihood = -0.5 * (n_gaussian as f64) * ln_2pi - 0.5 * sum_contrib;

    Ok(FilterOutput {
        a,
        p: p_star,
        pd: p_diff,
        v,
        f,
        fd,
        k,
        kd,
        dt,
        log_likelihood,
    })
}

/// Prediction step into period `t`: propagates the updated within-period
/// state through the transition governing the arrival at `t`.
#[allow(clippy::too_many_arguments)]
fn predict(
    ss: &StateSpace,
    t: usize,
    ati: &DVector<f64>,
    pstar_t: &DMatrix<f64>,
    pd_t: Option<&DMatrix<f64>>,
    a: &mut DMatrix<f64>,
    p_star: &mut Vec<DMatrix<f64>>,
    p_diff: &mut Vec<DMatrix<f64>>,
    pd_tol: f64,
) {
    let tt = ss.t.slice(t);
    let cc = ss.c.slice(t);
    let rqr = ss.r.slice(t) * ss.q.slice(t) * ss.r.slice(t).transpose();

    a.set_column(t, &(tt * ati + cc));
    let pstar_next = tt * pstar_t * tt.transpose() + rqr;
    // The exact covariance is symmetric; strip roundoff skew each period.
    p_star.push((&pstar_next + pstar_next.transpose()) * 0.5);

    match pd_t {
        Some(pd_t) => {
            let mut pd_next = tt * pd_t * tt.transpose();
            if linalg::max_abs(&pd_next) <= pd_tol {
                pd_next.fill(0.0);
            }
            p_diff.push(pd_next);
        }
        None => {
            let m = ati.len();
            p_diff.push(DMatrix::zeros(m, m));
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{dmatrix, dvector};

    use crate::models::StateSpace;
    use crate::Error;

    #[test]
    fn test_local_level_diffuse_cutoff() {
        let ss = StateSpace::time_invariant(
            dmatrix![1.0],
            dvector![0.0],
            dmatrix![1.0],
            dmatrix![1.0],
            dvector![0.0],
            dmatrix![1.0],
            dmatrix![1.0],
        )
        .unwrap();
        let y = dmatrix![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = ss.filter(&y).unwrap();

        assert_eq!(out.dt, 1);
        assert!(out.log_likelihood.is_finite());
        // First prediction is the diffuse a_0 = T a0 = 0; after observing
        // y_0 = 1 the diffuse level collapses onto it exactly.
        assert_eq!(out.a[(0, 0)], 0.0);
        assert!((out.a[(0, 1)] - 1.0).abs() < 1e-12);
        // After the collapse the filtered variance is finite: P*_1 = 1 + 1.
        assert!((out.p[1][(0, 0)] - 2.0).abs() < 1e-12);
        assert_eq!(out.pd[1][(0, 0)], 0.0);
        // Diffuse contribution at t = 0: log Fd = log 1 = 0.
        assert_eq!(out.fd[(0, 0)], 1.0);
    }

    #[test]
    fn test_single_diffuse_observation_has_zero_loglik() {
        // One diffuse level observed once: the only contribution is
        // log Fd = log 1 = 0, with no 2*pi remainder, whatever the data
        // value and the noise variances.
        let ss = StateSpace::time_invariant(
            dmatrix![1.0],
            dvector![0.0],
            dmatrix![2.0],
            dmatrix![1.0],
            dvector![0.0],
            dmatrix![1.0],
            dmatrix![0.7],
        )
        .unwrap();
        let y = dmatrix![5.0];
        let out = ss.filter(&y).unwrap();
        assert_eq!(out.dt, 1);
        assert!(
            out.log_likelihood.abs() < 1e-12,
            "logL = {}",
            out.log_likelihood
        );
    }

    #[test]
    fn test_degenerate_diffuse_errors() {
        // T = I with zero loadings: nothing can collapse the diffuse block.
        let ss = StateSpace::time_invariant(
            dmatrix![0.0, 0.0],
            dvector![0.0],
            dmatrix![0.0],
            dmatrix![1.0, 0.0; 0.0, 1.0],
            dvector![0.0, 0.0],
            dmatrix![0.0; 0.0],
            dmatrix![0.0],
        )
        .unwrap();
        let y = dmatrix![0.0, 0.0, 0.0];
        assert_eq!(ss.filter(&y).unwrap_err(), Error::DegenerateDiffuseInit);
    }

    #[test]
    fn test_fully_missing_period_is_prediction_only() {
        let ss = StateSpace::time_invariant(
            dmatrix![1.0],
            dvector![0.0],
            dmatrix![0.5],
            dmatrix![0.8],
            dvector![0.0],
            dmatrix![1.0],
            dmatrix![1.0],
        )
        .unwrap();
        let y_full = dmatrix![1.0, f64::NAN, 2.0];
        let out = ss.filter(&y_full).unwrap();
        // Period 1 contributes nothing: a_2 = T a_1, P_2 = T P_1 T' + Q.
        assert!((out.a[(0, 2)] - 0.8 * out.a[(0, 1)]).abs() < 1e-12);
        assert!((out.p[2][(0, 0)] - (0.64 * out.p[1][(0, 0)] + 1.0)).abs() < 1e-12);
        assert_eq!(out.f[(0, 1)], 0.0);
        assert_eq!(out.k[1][(0, 0)], 0.0);
    }
}
