//! Jacobian maps from parameter blocks to the free parameter vector
//!
//! The score engine never inspects the free vector itself: the caller
//! supplies, per parameter block, the Jacobian of that block's stacked
//! slices with respect to the free vector. The chained gradient is
//! `sum over blocks of G_block * vec(dl/d block)`.

use nalgebra::DMatrix;

use crate::models::StateSpace;
use crate::{Error, Result};

/// Per-block Jacobians with respect to the free parameter vector.
///
/// Each map has `n_theta` rows. The column count of a block map is the
/// slice length times the number of stored slices, with slices stacked in
/// storage order and each slice vectorized column-major. `a0` maps the
/// initial mean (m columns) and `p0` the initial covariance (m^2 columns).
#[derive(Debug, Clone)]
pub struct GradientMaps {
    /// Jacobian of vec(Z) slices.
    pub z: DMatrix<f64>,
    /// Jacobian of the d slices.
    pub d: DMatrix<f64>,
    /// Jacobian of vec(H) slices.
    pub h: DMatrix<f64>,
    /// Jacobian of vec(T) slices.
    pub t: DMatrix<f64>,
    /// Jacobian of the c slices.
    pub c: DMatrix<f64>,
    /// Jacobian of vec(R) slices.
    pub r: DMatrix<f64>,
    /// Jacobian of vec(Q) slices.
    pub q: DMatrix<f64>,
    /// Jacobian of a0.
    pub a0: DMatrix<f64>,
    /// Jacobian of vec(P0).
    pub p0: DMatrix<f64>,
}

impl GradientMaps {
    /// All-zero maps of the right shapes for a system: a convenient starting
    /// point when only a few blocks are free.
    pub fn zeros(n_theta: usize, ss: &StateSpace) -> Self {
        let dims = ss.dims();
        let (p, m, g) = (dims.p, dims.m, dims.g);
        Self {
            z: DMatrix::zeros(n_theta, p * m * ss.z.n_slices()),
            d: DMatrix::zeros(n_theta, p * ss.d.n_slices()),
            h: DMatrix::zeros(n_theta, p * p * ss.h.n_slices()),
            t: DMatrix::zeros(n_theta, m * m * ss.t.n_slices()),
            c: DMatrix::zeros(n_theta, m * ss.c.n_slices()),
            r: DMatrix::zeros(n_theta, m * g * ss.r.n_slices()),
            q: DMatrix::zeros(n_theta, g * g * ss.q.n_slices()),
            a0: DMatrix::zeros(n_theta, m),
            p0: DMatrix::zeros(n_theta, m * m),
        }
    }

    /// Number of free parameters.
    #[inline]
    pub fn n_theta(&self) -> usize {
        self.z.nrows()
    }

    /// Validates the map shapes against a system.
    pub(crate) fn check_shapes(&self, ss: &StateSpace) -> Result<()> {
        let dims = ss.dims();
        let (p, m, g) = (dims.p, dims.m, dims.g);
        let nt = self.z.nrows();
        let expect = [
            ("G.Z", &self.z, p * m * ss.z.n_slices()),
            ("G.d", &self.d, p * ss.d.n_slices()),
            ("G.H", &self.h, p * p * ss.h.n_slices()),
            ("G.T", &self.t, m * m * ss.t.n_slices()),
            ("G.c", &self.c, m * ss.c.n_slices()),
            ("G.R", &self.r, m * g * ss.r.n_slices()),
            ("G.Q", &self.q, g * g * ss.q.n_slices()),
            ("G.a0", &self.a0, m),
            ("G.P0", &self.p0, m * m),
        ];
        for (name, map, cols) in expect {
            if map.nrows() != nt {
                return Err(Error::ShapeMismatch(format!(
                    "{name} has {} rows, expected {nt}",
                    map.nrows()
                )));
            }
            if map.ncols() != cols {
                return Err(Error::ShapeMismatch(format!(
                    "{name} has {} columns, expected {cols}",
                    map.ncols()
                )));
            }
        }
        Ok(())
    }
}
