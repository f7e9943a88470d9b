//! Common helpers for the integration suites

#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statespace::prelude::*;
use statespace::utils::linalg;

/// Annual Nile flow at Aswan, 1871-1970.
pub const NILE: [f64; 100] = [
    1120.0, 1160.0, 963.0, 1210.0, 1160.0, 1160.0, 813.0, 1230.0, 1370.0, 1140.0, 995.0, 935.0,
    1110.0, 994.0, 1020.0, 960.0, 1180.0, 799.0, 958.0, 1140.0, 1100.0, 1210.0, 1150.0, 1250.0,
    1260.0, 1220.0, 1030.0, 1100.0, 774.0, 840.0, 874.0, 694.0, 940.0, 833.0, 701.0, 916.0, 692.0,
    1020.0, 1050.0, 969.0, 831.0, 726.0, 456.0, 824.0, 702.0, 1120.0, 1100.0, 832.0, 764.0, 821.0,
    768.0, 845.0, 864.0, 862.0, 698.0, 845.0, 744.0, 796.0, 1040.0, 759.0, 781.0, 865.0, 845.0,
    944.0, 984.0, 897.0, 822.0, 1010.0, 771.0, 676.0, 649.0, 846.0, 812.0, 742.0, 801.0, 1040.0,
    860.0, 874.0, 848.0, 890.0, 744.0, 749.0, 838.0, 1050.0, 918.0, 986.0, 797.0, 923.0, 975.0,
    815.0, 1020.0, 906.0, 901.0, 1170.0, 912.0, 746.0, 919.0, 718.0, 714.0, 740.0,
];

/// Local level model with observation variance h and level-shock variance q.
pub fn local_level(h: f64, q: f64) -> StateSpace {
    StateSpace::time_invariant(
        DMatrix::from_element(1, 1, 1.0),
        DVector::zeros(1),
        DMatrix::from_element(1, 1, h),
        DMatrix::from_element(1, 1, 1.0),
        DVector::zeros(1),
        DMatrix::from_element(1, 1, 1.0),
        DMatrix::from_element(1, 1, q),
    )
    .unwrap()
}

/// Scalar AR(1) observed with noise variance h.
pub fn ar1(phi: f64, q: f64, h: f64) -> StateSpace {
    StateSpace::time_invariant(
        DMatrix::from_element(1, 1, 1.0),
        DVector::zeros(1),
        DMatrix::from_element(1, 1, h),
        DMatrix::from_element(1, 1, phi),
        DVector::zeros(1),
        DMatrix::from_element(1, 1, 1.0),
        DMatrix::from_element(1, 1, q),
    )
    .unwrap()
}

/// Uniformly drawn data matrix, for likelihood and gradient probing.
pub fn random_data(p: usize, n: usize, seed: u64) -> DMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    DMatrix::from_fn(p, n, |_, _| rng.gen_range(-2.0..2.0))
}

/// Draws a stable bivariate VAR(2) coefficient pair, rescaling until the
/// companion matrix is comfortably inside the unit circle.
pub fn stable_var2_coefficients(seed: u64) -> (DMatrix<f64>, DMatrix<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut phi1 = DMatrix::from_fn(2, 2, |_, _| rng.gen_range(-0.5..0.5));
    let mut phi2 = DMatrix::from_fn(2, 2, |_, _| rng.gen_range(-0.25..0.25));
    loop {
        let companion = var2_companion(&phi1, &phi2);
        if linalg::spectral_radius(&companion) < 0.9 {
            return (phi1, phi2);
        }
        phi1 *= 0.8;
        phi2 *= 0.8;
    }
}

/// Companion transition for a bivariate VAR(2).
pub fn var2_companion(phi1: &DMatrix<f64>, phi2: &DMatrix<f64>) -> DMatrix<f64> {
    let mut t = DMatrix::zeros(4, 4);
    t.view_mut((0, 0), (2, 2)).copy_from(phi1);
    t.view_mut((0, 2), (2, 2)).copy_from(phi2);
    t.view_mut((2, 0), (2, 2))
        .copy_from(&DMatrix::identity(2, 2));
    t
}

// ============================================================================
// Reference multivariate filter
// ============================================================================

/// Output of the straightforward multivariate reference filter.
pub struct RefFilter {
    /// Predicted means, m x (n+1).
    pub a: DMatrix<f64>,
    /// Predicted covariances, n+1 entries.
    pub p: Vec<DMatrix<f64>>,
    /// Gaussian log-likelihood of the observed entries.
    pub logl: f64,
}

/// Plain multivariate Kalman filter for a time-invariant system with a
/// proper (finite) initial distribution. Missing entries are dropped
/// row-wise per period. Serves as the independent reference the univariate
/// engine is checked against.
#[allow(clippy::too_many_arguments)]
pub fn multivariate_filter(
    z: &DMatrix<f64>,
    d: &DVector<f64>,
    h: &DMatrix<f64>,
    t: &DMatrix<f64>,
    c: &DVector<f64>,
    rqr: &DMatrix<f64>,
    a0: &DVector<f64>,
    p0: &DMatrix<f64>,
    y: &DMatrix<f64>,
) -> RefFilter {
    let n = y.ncols();
    let m = t.nrows();
    let mut a_store = DMatrix::zeros(m, n + 1);
    let mut p_store: Vec<DMatrix<f64>> = Vec::with_capacity(n + 1);

    let mut a = t * a0 + c;
    let mut p = t * p0 * t.transpose() + rqr;
    let mut acc = 0.0;
    let mut n_observed = 0usize;

    for s in 0..n {
        a_store.set_column(s, &a);
        p_store.push(p.clone());

        let observed: Vec<usize> = (0..y.nrows()).filter(|&j| y[(j, s)].is_finite()).collect();
        let (mut a_upd, mut p_upd) = (a.clone(), p.clone());
        if !observed.is_empty() {
            n_observed += observed.len();
            let all_cols: Vec<usize> = (0..m).collect();
            let z_o = linalg::select(z, &observed, &all_cols);
            let h_oo = linalg::select(h, &observed, &observed);
            let y_col = y.column(s).clone_owned();
            let y_o = linalg::select_entries(&y_col, &observed);
            let d_o = linalg::select_entries(d, &observed);

            let v = &y_o - &z_o * &a - &d_o;
            let f = &z_o * &p * z_o.transpose() + &h_oo;
            let lu = f.clone().lu();
            let finv_v = lu.solve(&v).expect("reference F must be invertible");
            let finv_zp = lu
                .solve(&(&z_o * &p))
                .expect("reference F must be invertible");
            acc += lu.determinant().ln() + v.dot(&finv_v);

            a_upd = &a + &p * z_o.transpose() * &finv_v;
            p_upd = &p - &p * z_o.transpose() * &finv_zp;
        }

        a = t * &a_upd + c;
        p = t * &p_upd * t.transpose() + rqr;
    }
    a_store.set_column(n, &a);
    p_store.push(p);

    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    RefFilter {
        a: a_store,
        p: p_store,
        logl: -0.5 * (n_observed as f64) * ln_2pi - 0.5 * acc,
    }
}

// ============================================================================
// Finite differences
// ============================================================================

/// Central finite-difference gradient of a scalar function.
pub fn numerical_gradient<F: Fn(&DVector<f64>) -> f64>(f: F, theta: &DVector<f64>) -> DVector<f64> {
    let mut g = DVector::zeros(theta.len());
    for i in 0..theta.len() {
        let step = 1e-5 * theta[i].abs().max(1.0);
        let mut up = theta.clone();
        up[i] += step;
        let mut down = theta.clone();
        down[i] -= step;
        g[i] = (f(&up) - f(&down)) / (2.0 * step);
    }
    g
}

/// Asserts two gradients agree to a relative tolerance.
pub fn assert_gradients_match(analytic: &DVector<f64>, numeric: &DVector<f64>, rel_tol: f64) {
    assert_eq!(analytic.len(), numeric.len());
    for i in 0..analytic.len() {
        let scale = numeric[i].abs().max(1.0);
        assert!(
            (analytic[i] - numeric[i]).abs() <= rel_tol * scale,
            "gradient component {i}: analytic {} vs numeric {}",
            analytic[i],
            numeric[i]
        );
    }
}
