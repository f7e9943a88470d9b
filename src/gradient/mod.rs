//! Analytic score of the log-likelihood
//!
//! Closed-form gradient through the Fisher identity: the score of the
//! observed-data log-likelihood equals the smoothed expectation of the
//! complete-data score, so every parameter block reduces to sums of
//! smoothed first and second moments over time.
//!
//! Per period, with `V` the smoothed state variance, `J` the lag-one
//! cross-covariance, `u = H+ eps` and `D` the precision-form observation
//! variance:
//!
//! - `dl/dZ += H+ ((y - d) alpha' - Z (alpha alpha' + V))`
//! - `dl/dd += u`
//! - `dl/dH += (u u' - D) / 2`
//! - `dl/dT += Phi ((alpha_t prev' + J) - T (prev prev' + V_prev) - c prev')`
//! - `dl/dc += Phi (alpha_t - T prev - c)`
//! - `dl/d(RQR') += (r r' - N) / 2`, pushed to R and Q through the
//!   vec-commutation machinery `N_m = I + K_{m,m}`
//!
//! with `Phi = R+' Q^{-1} R+`, `R+ = (R'R)^{-1} R'`, and the transition
//! chain anchored at the smoothed initial state. Pseudo-inverses (tolerance
//! 1e-12) replace inverses wherever H, Q or R'R is singular.

pub mod maps;

use nalgebra::{DMatrix, DVector};

use crate::filters::diffuse::FilterOutput;
use crate::filters::smoother::SmootherOutput;
use crate::models::StateSpace;
use crate::utils::linalg;
use crate::utils::moments::SmoothedMoments;
use crate::Result;

use maps::GradientMaps;

/// Accumulates the per-block scores and chains them through the maps.
pub(crate) fn run_gradient(
    ss: &StateSpace,
    y: &DMatrix<f64>,
    maps: &GradientMaps,
    fout: &FilterOutput,
    sout: &SmootherOutput,
    mom: &SmoothedMoments,
) -> Result<(f64, DVector<f64>)> {
    let dims = ss.dims();
    let (p, m, g) = (dims.p, dims.m, dims.g);
    let n = y.ncols();
    let eye_m = DMatrix::identity(m, m);
    let sym_m = linalg::symmetrizer(m);

    let mut dz: Vec<DMatrix<f64>> = zeros_like_mats(ss.z.slices());
    let mut dd: Vec<DVector<f64>> = ss.d.slices().iter().map(|s| DVector::zeros(s.len())).collect();
    let mut dh: Vec<DMatrix<f64>> = zeros_like_mats(ss.h.slices());
    let mut dt: Vec<DMatrix<f64>> = zeros_like_mats(ss.t.slices());
    let mut dc: Vec<DVector<f64>> = ss.c.slices().iter().map(|s| DVector::zeros(s.len())).collect();
    let mut dr: Vec<DMatrix<f64>> = zeros_like_mats(ss.r.slices());
    let mut dq: Vec<DMatrix<f64>> = zeros_like_mats(ss.q.slices());

    // Measurement contributions.
    let all_state_cols: Vec<usize> = (0..m).collect();
    for t in 0..n {
        let observed: Vec<usize> = (0..p).filter(|&j| y[(j, t)].is_finite()).collect();
        if observed.is_empty() {
            continue;
        }
        let iz = ss.z.slice_index(t);
        let id = ss.d.slice_index(t);
        let ih = ss.h.slice_index(t);

        let alpha_t = sout.alpha.column(t).clone_owned();
        let z_sub = linalg::select(ss.z.slice(t), &observed, &all_state_cols);
        let h_sub = linalg::select(ss.h.slice(t), &observed, &observed);
        let y_col = y.column(t).clone_owned();
        let y_sub = linalg::select_entries(&y_col, &observed);
        let d_sub = linalg::select_entries(ss.d.slice(t), &observed);

        let hinv = linalg::pseudo_inverse(&h_sub);
        let eps_sub = &y_sub - &z_sub * &alpha_t - &d_sub;
        let u = &hinv * &eps_sub;
        let vt = &mom.v[t];

        let gz = &hinv
            * ((&y_sub - &d_sub) * alpha_t.transpose()
                - &z_sub * (&alpha_t * alpha_t.transpose() + vt));
        for (k, &j) in observed.iter().enumerate() {
            for col in 0..m {
                dz[iz][(j, col)] += gz[(k, col)];
            }
            dd[id][j] += u[k];
        }

        let d_sub_mat = &hinv * (&h_sub - &z_sub * vt * z_sub.transpose()) * &hinv;
        let gh = (&u * u.transpose() - d_sub_mat) * 0.5;
        for (k1, &j1) in observed.iter().enumerate() {
            for (k2, &j2) in observed.iter().enumerate() {
                dh[ih][(j1, j2)] += gh[(k1, k2)];
            }
        }
    }

    // Transition contributions; the chain starts at the smoothed initial
    // state.
    for t in 0..n {
        let it = ss.t.slice_index(t);
        let ic = ss.c.slice_index(t);
        let ir = ss.r.slice_index(t);
        let iq = ss.q.slice_index(t);

        let tt = ss.t.slice(t);
        let ct = ss.c.slice(t);
        let rt = ss.r.slice(t);
        let qt = ss.q.slice(t);

        let (prev_mean, prev_var, cross) = if t == 0 {
            (sout.a0tilde.clone(), mom.v_init.clone(), mom.lag_cov[0].clone())
        } else {
            (
                sout.alpha.column(t - 1).clone_owned(),
                mom.v[t - 1].clone(),
                mom.lag_cov[t].clone(),
            )
        };
        let alpha_t = sout.alpha.column(t).clone_owned();

        let rplus = linalg::pseudo_inverse(&rt.tr_mul(rt)) * rt.transpose();
        let qinv = linalg::pseudo_inverse(qt);
        let phi = rplus.transpose() * &qinv * &rplus;

        let e_cross = &alpha_t * prev_mean.transpose() + &cross;
        let e_self = &prev_mean * prev_mean.transpose() + &prev_var;
        dt[it] += &phi * (&e_cross - tt * &e_self - ct * prev_mean.transpose());
        dc[ic] += &phi * (&alpha_t - tt * &prev_mean - ct);

        // Score of the period's state-shock covariance RQR'.
        let r_res = sout.r.column(t).clone_owned();
        let s = (&r_res * r_res.transpose() - &sout.n[t]) * 0.5;
        let qrt = qt * rt.transpose();
        let vr = qrt.kronecker(&eye_m) * (&sym_m * linalg::vec(&s));
        dr[ir] += linalg::unvec(&vr, m, g);
        let rtrans = rt.transpose();
        let vq = rtrans.kronecker(&rtrans) * linalg::vec(&s);
        dq[iq] += linalg::unvec(&vq, g, g);
    }

    // Initial-condition blocks.
    let da0 = mom.r_init.clone();
    let dp0 = (&mom.r_init * mom.r_init.transpose() - &mom.n_init) * 0.5;

    // Chain through the supplied Jacobians.
    let mut grad = DVector::zeros(maps.n_theta());
    grad += &maps.z * stack_mats(&dz);
    grad += &maps.d * stack_vecs(&dd);
    grad += &maps.h * stack_mats(&dh);
    grad += &maps.t * stack_mats(&dt);
    grad += &maps.c * stack_vecs(&dc);
    grad += &maps.r * stack_mats(&dr);
    grad += &maps.q * stack_mats(&dq);
    grad += &maps.a0 * da0;
    grad += &maps.p0 * linalg::vec(&dp0);

    Ok((fout.log_likelihood, grad))
}

fn zeros_like_mats(slices: &[DMatrix<f64>]) -> Vec<DMatrix<f64>> {
    slices
        .iter()
        .map(|s| DMatrix::zeros(s.nrows(), s.ncols()))
        .collect()
}

/// Stacks the column-major vectorizations of all slices.
fn stack_mats(slices: &[DMatrix<f64>]) -> DVector<f64> {
    let total: usize = slices.iter().map(|s| s.len()).sum();
    let mut out = DVector::zeros(total);
    let mut offset = 0;
    for s in slices {
        for (k, val) in s.iter().enumerate() {
            out[offset + k] = *val;
        }
        offset += s.len();
    }
    out
}

fn stack_vecs(slices: &[DVector<f64>]) -> DVector<f64> {
    let total: usize = slices.iter().map(|s| s.len()).sum();
    let mut out = DVector::zeros(total);
    let mut offset = 0;
    for s in slices {
        for (k, val) in s.iter().enumerate() {
            out[offset + k] = *val;
        }
        offset += s.len();
    }
    out
}
