//! Small dense linear-algebra kernels
//!
//! LDL' factorization, pseudo-inversion, vec/commutation machinery and the
//! discrete Lyapunov solvers used by the initializer. Everything here is
//! plain dense `f64` arithmetic on nalgebra matrices.

use nalgebra::{DMatrix, DVector};

use crate::{Error, Result};

/// Relative tolerance for pseudo-inverse singular-value truncation.
pub const PINV_TOL: f64 = 1e-12;

/// Relative tolerance for classifying an LDL' pivot as zero.
const LDL_PIVOT_TOL: f64 = 1e-12;

/// Side length above which the dense Kronecker Lyapunov solve is skipped in
/// favor of the squaring iteration.
const LYAPUNOV_DENSE_LIMIT: usize = 64;

/// Iteration cap for the squaring Lyapunov fallback.
const LYAPUNOV_MAX_ITER: usize = 128;

// ============================================================================
// Elementary helpers
// ============================================================================

/// Largest absolute entry, zero for an empty matrix.
#[inline]
pub fn max_abs(a: &DMatrix<f64>) -> f64 {
    a.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// True when every off-diagonal entry is exactly zero.
pub fn is_diagonal(a: &DMatrix<f64>) -> bool {
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            if i != j && a[(i, j)] != 0.0 {
                return false;
            }
        }
    }
    true
}

/// Spectral radius via the complex eigenvalues, zero for an empty matrix.
pub fn spectral_radius(a: &DMatrix<f64>) -> f64 {
    if a.nrows() == 0 {
        return 0.0;
    }
    a.complex_eigenvalues()
        .iter()
        .fold(0.0_f64, |acc, lam| acc.max(lam.norm()))
}

/// Gathers the submatrix with the given row and column indices.
pub fn select(a: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| a[(rows[i], cols[j])])
}

/// Gathers the subvector with the given indices.
pub fn select_entries(v: &DVector<f64>, idx: &[usize]) -> DVector<f64> {
    DVector::from_fn(idx.len(), |i, _| v[idx[i]])
}

/// Column-major vectorization.
#[inline]
pub fn vec(a: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_column_slice(a.as_slice())
}

/// Inverse of [`vec`]: reshapes a vector into an `nrows x ncols` matrix.
#[inline]
pub fn unvec(v: &DVector<f64>, nrows: usize, ncols: usize) -> DMatrix<f64> {
    DMatrix::from_column_slice(nrows, ncols, v.as_slice())
}

/// Moore-Penrose pseudo-inverse with the crate-wide truncation tolerance.
pub fn pseudo_inverse(a: &DMatrix<f64>) -> DMatrix<f64> {
    a.clone()
        .pseudo_inverse(PINV_TOL)
        .unwrap_or_else(|_| DMatrix::zeros(a.ncols(), a.nrows()))
}

// ============================================================================
// Commutation machinery
// ============================================================================

/// The vec-commutation matrix `K_{m,n}` with `K vec(A) = vec(A')` for any
/// m x n matrix A.
pub fn commutation_matrix(m: usize, n: usize) -> DMatrix<f64> {
    let mut k = DMatrix::zeros(m * n, m * n);
    for j in 0..n {
        for i in 0..m {
            k[(j + i * n, i + j * m)] = 1.0;
        }
    }
    k
}

/// The symmetrization operator `N_m = I + K_{m,m}`.
pub fn symmetrizer(m: usize) -> DMatrix<f64> {
    DMatrix::identity(m * m, m * m) + commutation_matrix(m, m)
}

// ============================================================================
// LDL' factorization
// ============================================================================

/// Factors a symmetric PSD matrix as `A = L D L'` with L unit-lower-triangular
/// and D diagonal.
///
/// Zero pivots are legal (A may be singular); the corresponding column of L
/// is zeroed below the diagonal, which is exact for PSD input.
///
/// # Errors
/// Returns [`Error::NonPsdObservationCov`] on a negative pivot.
pub fn ldl(a: &DMatrix<f64>) -> Result<(DMatrix<f64>, DVector<f64>)> {
    let n = a.nrows();
    let mut l = DMatrix::identity(n, n);
    let mut d = DVector::zeros(n);
    let scale = max_abs(a).max(1.0);

    for j in 0..n {
        let mut dj = a[(j, j)];
        for k in 0..j {
            dj -= l[(j, k)] * l[(j, k)] * d[k];
        }
        if dj < -LDL_PIVOT_TOL * scale || !dj.is_finite() {
            return Err(Error::NonPsdObservationCov);
        }
        if dj.abs() <= LDL_PIVOT_TOL * scale {
            // Singular direction: for PSD input the remaining column lies in
            // the span of the previous ones.
            d[j] = 0.0;
            continue;
        }
        d[j] = dj;
        for i in (j + 1)..n {
            let mut lij = a[(i, j)];
            for k in 0..j {
                lij -= l[(i, k)] * l[(j, k)] * d[k];
            }
            l[(i, j)] = lij / dj;
        }
    }
    Ok((l, d))
}

/// Solves `L X = B` for unit-lower-triangular L by forward substitution.
pub fn unit_lower_solve(l: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    let mut x = b.clone();
    for col in 0..x.ncols() {
        for i in 0..l.nrows() {
            let mut s = x[(i, col)];
            for k in 0..i {
                s -= l[(i, k)] * x[(k, col)];
            }
            x[(i, col)] = s;
        }
    }
    x
}

// ============================================================================
// Discrete Lyapunov equation
// ============================================================================

/// Solves `X - A X A' = Sigma` for a stable A.
///
/// Uses the vectorized form `vec(X) = (I - A (x) A)^{-1} vec(Sigma)` while the
/// Kronecker product stays small, and a squaring iteration
/// `X <- X + A X A', A <- A^2` beyond that threshold or when the dense solve
/// is singular.
///
/// # Errors
/// Returns [`Error::LyapunovFailure`] when both paths fail.
pub fn solve_discrete_lyapunov(a: &DMatrix<f64>, sigma: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let s = a.nrows();
    if s == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    if s <= LYAPUNOV_DENSE_LIMIT {
        let lhs = DMatrix::identity(s * s, s * s) - a.kronecker(a);
        if let Some(x) = lhs.lu().solve(&vec(sigma)) {
            if x.iter().all(|v| v.is_finite()) {
                let x = unvec(&x, s, s);
                // The exact solution is symmetric; remove roundoff skew.
                return Ok((&x + x.transpose()) * 0.5);
            }
        }
    }
    solve_lyapunov_squaring(a, sigma)
}

/// Squaring iteration for the discrete Lyapunov equation.
fn solve_lyapunov_squaring(a: &DMatrix<f64>, sigma: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let mut x = sigma.clone();
    let mut apow = a.clone();
    for _ in 0..LYAPUNOV_MAX_ITER {
        let update = &apow * &x * apow.transpose();
        x += &update;
        if !x.iter().all(|v| v.is_finite()) {
            return Err(Error::LyapunovFailure);
        }
        if max_abs(&update) <= 1e-14 * max_abs(&x).max(1.0) {
            return Ok((&x + x.transpose()) * 0.5);
        }
        apow = &apow * &apow;
    }
    Err(Error::LyapunovFailure)
}
