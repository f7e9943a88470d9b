//! Linear decomposition of the smoothed state
//!
//! The smoother is an affine function of the observed entries of y: the
//! gains, innovation variances, covariances and the diffuse cutoff depend
//! only on the system, never on the data. The decomposition therefore
//! probes that affine map directly: one smoother pass over zeroed
//! observations yields the constant term, and one pass per observed entry
//! with a unit impulse yields its weight matrix. Missing entries keep zero
//! weight.

use nalgebra::{DMatrix, DVector};

use crate::models::StateSpace;
use crate::{Error, Result};

/// Linear decomposition `alpha[:,t] = sum_s W(s,t) y(:,s) + const(t)` of the
/// smoothed state at the requested effect periods.
#[derive(Debug, Clone)]
pub struct SmoothedDecomposition {
    /// The requested effect periods, in the caller's order.
    pub periods: Vec<usize>,
    /// `weights[k][s]` is the m x p weight of observation period s on the
    /// smoothed state at effect period `periods[k]`.
    pub weights: Vec<Vec<DMatrix<f64>>>,
    /// Constant contribution per effect period, m x |periods|.
    pub constant: DMatrix<f64>,
}

impl SmoothedDecomposition {
    /// Rebuilds the smoothed state at effect period `periods[k]` from the
    /// weights and the data; missing entries are skipped.
    pub fn reconstruct(&self, y: &DMatrix<f64>, k: usize) -> DVector<f64> {
        let mut out = self.constant.column(k).clone_owned();
        for s in 0..y.ncols() {
            for j in 0..y.nrows() {
                let yjs = y[(j, s)];
                if yjs.is_finite() {
                    out += self.weights[k][s].column(j) * yjs;
                }
            }
        }
        out
    }
}

/// Probes the smoother's affine map at the requested effect periods.
pub(crate) fn run_decomposition(
    ss: &StateSpace,
    y: &DMatrix<f64>,
    periods: &[usize],
) -> Result<SmoothedDecomposition> {
    let n = ss.check_data(y)?;
    let dims = ss.dims();
    let (p, m) = (dims.p, dims.m);
    if let Some(&bad) = periods.iter().find(|&&t| t >= n) {
        return Err(Error::ShapeMismatch(format!(
            "effect period {bad} outside the sample of length {n}"
        )));
    }

    // Baseline: observed entries zeroed, missingness pattern preserved.
    let base_y = y.map(|v| if v.is_finite() { 0.0 } else { f64::NAN });
    let (base, _) = ss.smooth(&base_y)?;

    let mut constant = DMatrix::zeros(m, periods.len());
    for (k, &tk) in periods.iter().enumerate() {
        constant.set_column(k, &base.alpha.column(tk));
    }

    let mut weights: Vec<Vec<DMatrix<f64>>> = periods
        .iter()
        .map(|_| (0..n).map(|_| DMatrix::zeros(m, p)).collect())
        .collect();

    for s in 0..n {
        for j in 0..p {
            if !y[(j, s)].is_finite() {
                continue;
            }
            let mut probe = base_y.clone();
            probe[(j, s)] = 1.0;
            let (impulse, _) = ss.smooth(&probe)?;
            for (k, &tk) in periods.iter().enumerate() {
                weights[k][s]
                    .set_column(j, &(impulse.alpha.column(tk) - base.alpha.column(tk)));
            }
        }
    }

    Ok(SmoothedDecomposition {
        periods: periods.to_vec(),
        weights,
        constant,
    })
}

#[cfg(test)]
mod tests {
    use nalgebra::{dmatrix, dvector};

    use crate::models::StateSpace;

    #[test]
    fn test_decomposition_rebuilds_smoothed_state() {
        let ss = StateSpace::time_invariant(
            dmatrix![1.0],
            dvector![0.2],
            dmatrix![0.5],
            dmatrix![0.8],
            dvector![0.1],
            dmatrix![1.0],
            dmatrix![1.0],
        )
        .unwrap();
        let y = dmatrix![1.0, -0.5, 2.0, 0.7];
        let periods = [0, 2, 3];
        let (sout, _) = ss.smooth(&y).unwrap();
        let dec = ss.decompose_smoothed(&y, &periods).unwrap();

        for (k, &tk) in periods.iter().enumerate() {
            let rebuilt = dec.reconstruct(&y, k);
            assert!(
                (rebuilt[0] - sout.alpha[(0, tk)]).abs() < 1e-10,
                "period {tk}: {} vs {}",
                rebuilt[0],
                sout.alpha[(0, tk)]
            );
        }
    }

    #[test]
    fn test_missing_entries_have_zero_weight() {
        let ss = StateSpace::time_invariant(
            dmatrix![1.0; 1.0],
            dvector![0.0, 0.0],
            dmatrix![0.5, 0.0; 0.0, 0.5],
            dmatrix![0.8],
            dvector![0.0],
            dmatrix![1.0],
            dmatrix![1.0],
        )
        .unwrap();
        let y = dmatrix![1.0, f64::NAN, 2.0; 0.5, 1.0, f64::NAN];
        let dec = ss.decompose_smoothed(&y, &[1]).unwrap();
        assert_eq!(dec.weights[0][1].column(0).amax(), 0.0);
        assert_eq!(dec.weights[0][2].column(1).amax(), 0.0);
    }
}
