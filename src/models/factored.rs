//! LDL' diagonalization of the measurement block
//!
//! The univariate filter is exact only when the observation noise is
//! diagonal. For every distinct combination of measurement slices and
//! missingness pattern this module factors the observed submatrix of H as
//! `C D C'` (C unit-lower-triangular, D diagonal) and replaces the observed
//! rows of y, Z and d by their `C^{-1}`-transformed versions; H becomes D.
//! The transformed system has re-keyed slice indices, one per pattern.
//! Transition parameters are untouched. When every H slice is already
//! diagonal the factorizer is a no-op.

use std::collections::HashMap;

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::models::StateSpace;
use crate::types::params::{SystemMatrix, SystemVector};
use crate::utils::linalg;
use crate::Result;

/// A measurement block transformed to diagonal observation noise.
#[derive(Debug, Clone)]
pub(crate) struct FactoredObservations {
    /// Transformed data (missing entries stay NaN).
    pub y: DMatrix<f64>,
    /// Transformed measurement loading.
    pub z: SystemMatrix,
    /// Transformed measurement intercept.
    pub d: SystemVector,
    /// Diagonalized observation noise.
    pub h: SystemMatrix,
    /// Sample length.
    pub n: usize,
}

/// Builds the diagonal-noise representation of the measurement block.
///
/// # Errors
/// Returns [`crate::Error::NonPsdObservationCov`] when an observed submatrix
/// of H has a negative LDL' pivot.
pub(crate) fn factor_observations(
    ss: &StateSpace,
    y: &DMatrix<f64>,
    n: usize,
) -> Result<FactoredObservations> {
    if ss.h.slices().iter().all(linalg::is_diagonal) {
        return Ok(FactoredObservations {
            y: y.clone(),
            z: ss.z.clone(),
            d: ss.d.clone(),
            h: ss.h.clone(),
            n,
        });
    }

    let p = ss.dims().p;
    let m = ss.dims().m;

    let mut patterns: HashMap<(usize, usize, usize, Vec<bool>), usize> = HashMap::new();
    let mut z_slices: Vec<DMatrix<f64>> = Vec::new();
    let mut d_slices: Vec<DVector<f64>> = Vec::new();
    let mut h_slices: Vec<DMatrix<f64>> = Vec::new();
    let mut transforms: Vec<(DMatrix<f64>, Vec<usize>)> = Vec::new();
    let mut tau: Vec<usize> = Vec::with_capacity(n);
    let mut y_out = y.clone();

    for t in 0..n {
        let mask: Vec<bool> = (0..p).map(|j| y[(j, t)].is_finite()).collect();
        let key = (
            ss.z.slice_index(t),
            ss.d.slice_index(t),
            ss.h.slice_index(t),
            mask,
        );
        let idx = match patterns.get(&key) {
            Some(&i) => i,
            None => {
                let observed: Vec<usize> = key
                    .3
                    .iter()
                    .enumerate()
                    .filter(|(_, &o)| o)
                    .map(|(j, _)| j)
                    .collect();
                let h = ss.h.slice(t);
                let h_sub = linalg::select(h, &observed, &observed);
                let (l, diag) = linalg::ldl(&h_sub)?;

                let z_slice = ss.z.slice(t);
                let all_cols: Vec<usize> = (0..m).collect();
                let z_obs = linalg::select(z_slice, &observed, &all_cols);
                let z_rows = linalg::unit_lower_solve(&l, &z_obs);
                let mut z_new = z_slice.clone();
                for (k, &j) in observed.iter().enumerate() {
                    for col in 0..m {
                        z_new[(j, col)] = z_rows[(k, col)];
                    }
                }

                let d_slice = ss.d.slice(t);
                let d_obs = DMatrix::from_fn(observed.len(), 1, |i, _| d_slice[observed[i]]);
                let d_rows = linalg::unit_lower_solve(&l, &d_obs);
                let mut d_new = d_slice.clone();
                for (k, &j) in observed.iter().enumerate() {
                    d_new[j] = d_rows[(k, 0)];
                }

                // Missing rows keep their original variance; the filter never
                // reads them.
                let mut h_new = DMatrix::zeros(p, p);
                for j in 0..p {
                    h_new[(j, j)] = h[(j, j)];
                }
                for (k, &j) in observed.iter().enumerate() {
                    h_new[(j, j)] = diag[k];
                }

                z_slices.push(z_new);
                d_slices.push(d_new);
                h_slices.push(h_new);
                transforms.push((l, observed));
                let i = z_slices.len() - 1;
                patterns.insert(key, i);
                i
            }
        };
        tau.push(idx);

        let (l, observed) = &transforms[idx];
        if !observed.is_empty() {
            let y_obs = DMatrix::from_fn(observed.len(), 1, |i, _| y[(observed[i], t)]);
            let y_new = linalg::unit_lower_solve(l, &y_obs);
            for (k, &j) in observed.iter().enumerate() {
                y_out[(j, t)] = y_new[(k, 0)];
            }
        }
    }

    debug!("observation factorizer built {} patterns", z_slices.len());

    Ok(FactoredObservations {
        y: y_out,
        z: SystemMatrix::varying(z_slices, tau.clone()),
        d: SystemVector::varying(d_slices, tau.clone()),
        h: SystemMatrix::varying(h_slices, tau),
        n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use nalgebra::{dmatrix, dvector};

    fn correlated_system() -> StateSpace {
        StateSpace::time_invariant(
            dmatrix![1.0, 0.0; 0.0, 1.0],
            dvector![0.1, -0.2],
            dmatrix![2.0, 0.8; 0.8, 1.5],
            dmatrix![0.9, 0.0; 0.0, 0.7],
            dvector![0.0, 0.0],
            dmatrix![1.0, 0.0; 0.0, 1.0],
            dmatrix![1.0, 0.0; 0.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_diagonal_h_is_noop() {
        let ss = StateSpace::time_invariant(
            dmatrix![1.0; 1.0],
            dvector![0.0, 0.0],
            dmatrix![1.0, 0.0; 0.0, 2.0],
            dmatrix![0.5],
            dvector![0.0],
            dmatrix![1.0],
            dmatrix![1.0],
        )
        .unwrap();
        let y = dmatrix![1.0, 2.0; 3.0, 4.0];
        let fac = factor_observations(&ss, &y, 2).unwrap();
        assert!(!fac.z.is_varying());
        assert_eq!(fac.y, y);
    }

    #[test]
    fn test_factorization_diagonalizes_h() {
        let ss = correlated_system();
        let y = dmatrix![1.0, 2.0, 3.0; 0.5, 1.5, 2.5];
        let fac = factor_observations(&ss, &y, 3).unwrap();
        let h_new = fac.h.slice(0);
        assert_eq!(h_new[(0, 1)], 0.0);
        assert_eq!(h_new[(1, 0)], 0.0);
        // C D C' must rebuild H: with C = L from H = L D L',
        // checking the transformed loadings satisfy Z = C Z'.
        let (l, diag) = linalg::ldl(&dmatrix![2.0, 0.8; 0.8, 1.5]).unwrap();
        let rebuilt = &l * DMatrix::from_diagonal(&diag) * l.transpose();
        assert!(linalg::max_abs(&(rebuilt - dmatrix![2.0, 0.8; 0.8, 1.5])) < 1e-12);
        let z_back = &l * fac.z.slice(0);
        assert!(linalg::max_abs(&(z_back - ss.z.slice(0))) < 1e-12);
        // Data transformed the same way.
        let y_back = &l * fac.y.column(0);
        assert!((y_back - y.column(0)).amax() < 1e-12);
    }

    #[test]
    fn test_one_pattern_per_missingness() {
        let ss = correlated_system();
        let y = dmatrix![1.0, f64::NAN, 3.0; 0.5, 1.5, 2.5];
        let fac = factor_observations(&ss, &y, 3).unwrap();
        // Two patterns: fully observed and series 0 missing.
        assert_eq!(fac.z.n_slices(), 2);
        assert_eq!(fac.z.tau().unwrap(), &[0, 1, 0]);
        // The missing entry survives as NaN.
        assert!(fac.y[(0, 1)].is_nan());
        // With only series 1 observed, its noise variance is untouched.
        assert_eq!(fac.h.slice(1)[(1, 1)], 1.5);
    }

    #[test]
    fn test_indefinite_h_is_rejected() {
        let mut ss = correlated_system();
        ss.h = SystemMatrix::constant(dmatrix![1.0, 3.0; 3.0, 1.0]);
        let y = dmatrix![1.0; 0.5];
        assert_eq!(
            factor_observations(&ss, &y, 1).unwrap_err(),
            Error::NonPsdObservationCov
        );
    }
}
