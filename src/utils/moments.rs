//! Smoothed error and variance recovery
//!
//! Turns the filter/smoother output into the smoothed second moments the
//! score computation consumes:
//!
//! - `V_t = P_t - P_t N_t P_t`, the smoothed state variance;
//! - `J_t = (I - P_t N_t) T_t W_{t-1} P_{t-1}`, the lag-one cross-covariance
//!   `Cov(alpha_t, alpha_{t-1} | Y)` with `W` the within-period downdate
//!   product replaying the filter's scalar updates;
//! - `D_t = H+ (H - Z V_t Z') H+` on the observed rows, the precision-form
//!   variance of the smoothed observation error;
//! - the initial-state residuals `r~ = T_0' r_0`, `N~ = T_0' N_0 T_0` and
//!   variance `V_init = P*_0 - P*_0 N~ P*_0`.
//!
//! During the diffuse phase the standard-part quantities stand in for the
//! exact ones; see the gradient documentation.

use nalgebra::{DMatrix, DVector};

use crate::filters::diffuse::FilterOutput;
use crate::filters::smoother::SmootherOutput;
use crate::models::factored::FactoredObservations;
use crate::models::{Initialization, StateSpace};
use crate::utils::linalg;

// ============================================================================
// SmoothedMoments
// ============================================================================

/// Smoothed second moments derived from filter and smoother output.
#[derive(Debug, Clone)]
pub struct SmoothedMoments {
    /// Smoothed state variances `V_t`, n entries of m x m.
    pub v: Vec<DMatrix<f64>>,
    /// Lag-one cross-covariances `Cov(alpha_t, alpha_{t-1} | Y)`, n entries;
    /// entry 0 is taken against the initial state.
    pub lag_cov: Vec<DMatrix<f64>>,
    /// Precision-form observation-error variances `D_t`, n entries of p x p;
    /// rows and columns of missing observations are zero.
    pub d: Vec<DMatrix<f64>>,
    /// Smoothed variance of the initial state.
    pub v_init: DMatrix<f64>,
    /// Smoothing residual propagated to the initial state.
    pub r_init: DVector<f64>,
    /// Smoothing residual variance propagated to the initial state.
    pub n_init: DMatrix<f64>,
}

/// Recovers the smoothed second moments.
pub(crate) fn smoothed_moments(
    ss: &StateSpace,
    obs: &FactoredObservations,
    init: &Initialization,
    fout: &FilterOutput,
    sout: &SmootherOutput,
) -> SmoothedMoments {
    let dims = ss.dims();
    let (p, m) = (dims.p, dims.m);
    let n = obs.n;
    let eye = DMatrix::identity(m, m);

    // V_t = P_t - P_t N_t P_t, symmetrized against roundoff.
    let mut v: Vec<DMatrix<f64>> = Vec::with_capacity(n);
    for t in 0..n {
        let vt = &fout.p[t] - &fout.p[t] * &sout.n[t] * &fout.p[t];
        v.push((&vt + vt.transpose()) * 0.5);
    }

    // D_t on the observed submatrix, against the original measurement block.
    let mut d: Vec<DMatrix<f64>> = Vec::with_capacity(n);
    for t in 0..n {
        let observed: Vec<usize> = (0..p).filter(|&j| obs.y[(j, t)].is_finite()).collect();
        let mut d_full = DMatrix::zeros(p, p);
        if !observed.is_empty() {
            let all_cols: Vec<usize> = (0..m).collect();
            let h_sub = linalg::select(ss.h.slice(t), &observed, &observed);
            let z_sub = linalg::select(ss.z.slice(t), &observed, &all_cols);
            let hinv = linalg::pseudo_inverse(&h_sub);
            let d_sub = &hinv * (&h_sub - &z_sub * &v[t] * z_sub.transpose()) * &hinv;
            for (k1, &j1) in observed.iter().enumerate() {
                for (k2, &j2) in observed.iter().enumerate() {
                    d_full[(j1, j2)] = d_sub[(k1, k2)];
                }
            }
        }
        d.push(d_full);
    }

    // Lag-one covariances through the within-period downdate products.
    let mut lag_cov: Vec<DMatrix<f64>> = Vec::with_capacity(n);
    lag_cov.push((&eye - &fout.p[0] * &sout.n[0]) * ss.t.slice(0) * init.p_star0());
    for t in 1..n {
        let w = downdate_product(obs, fout, t - 1, m);
        lag_cov
            .push((&eye - &fout.p[t] * &sout.n[t]) * ss.t.slice(t) * w * &fout.p[t - 1]);
    }

    // Initial-state quantities: propagate the period-0 residuals through the
    // initial transition.
    let t0 = ss.t.slice(0);
    let r_init = t0.tr_mul(&sout.r.column(0).clone_owned());
    let n_init = t0.transpose() * &sout.n[0] * t0;
    let p_star0 = init.p_star0();
    let v_init_raw = &p_star0 - &p_star0 * &n_init * &p_star0;
    let v_init = (&v_init_raw + v_init_raw.transpose()) * 0.5;

    SmoothedMoments {
        v,
        lag_cov,
        d,
        v_init,
        r_init,
        n_init,
    }
}

/// Product of the scalar-update downdates of one period, in application
/// order: the predicted-state error maps as `e <- W e` across the period's
/// observed series.
fn downdate_product(obs: &FactoredObservations, fout: &FilterOutput, t: usize, m: usize) -> DMatrix<f64> {
    let eye = DMatrix::identity(m, m);
    let mut w = eye.clone();
    let z = obs.z.slice(t);
    for j in 0..obs.y.nrows() {
        if !obs.y[(j, t)].is_finite() {
            continue;
        }
        let zj = z.row(j).transpose();
        let fd_jt = fout.fd[(j, t)];
        let f_jt = fout.f[(j, t)];
        let l = if fd_jt != 0.0 {
            let kd_j = fout.kd[t].column(j).clone_owned();
            &eye - &kd_j * zj.transpose() / fd_jt
        } else if f_jt > 0.0 {
            let k_j = fout.k[t].column(j).clone_owned();
            &eye - &k_j * zj.transpose() / f_jt
        } else {
            continue;
        };
        w = l * w;
    }
    w
}
