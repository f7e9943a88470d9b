//! Slice stores for time-varying system parameters
//!
//! Each system parameter is either a single matrix (time-invariant) or a
//! stack of slices together with a `tau` map assigning a slice to every time
//! index. Measurement parameters (Z, d, H) carry a `tau` of length n;
//! transition parameters (T, c, R, Q) carry a `tau` of length n + 1 whose
//! entry t governs the transition *into* period t, entry 0 being the
//! transition out of the initial state.

use nalgebra::{DMatrix, DVector};

// ============================================================================
// SystemMatrix
// ============================================================================

/// A possibly time-varying matrix parameter.
///
/// Slice access is O(1): a time-invariant parameter returns its single slice
/// for every t, a time-varying one indexes its slice stack through `tau`.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMatrix {
    slices: Vec<DMatrix<f64>>,
    tau: Option<Vec<usize>>,
}

impl SystemMatrix {
    /// Creates a time-invariant parameter from a single slice.
    #[inline]
    pub fn constant(slice: DMatrix<f64>) -> Self {
        Self {
            slices: vec![slice],
            tau: None,
        }
    }

    /// Creates a time-varying parameter from a slice stack and a tau map.
    ///
    /// # Panics
    /// Panics if `slices` is empty. Shape and range consistency is checked
    /// by [`crate::models::StateSpace::new`].
    #[inline]
    pub fn varying(slices: Vec<DMatrix<f64>>, tau: Vec<usize>) -> Self {
        assert!(!slices.is_empty(), "parameter must have at least one slice");
        Self {
            slices,
            tau: Some(tau),
        }
    }

    /// Returns the slice governing time index t.
    #[inline]
    pub fn slice(&self, t: usize) -> &DMatrix<f64> {
        &self.slices[self.slice_index(t)]
    }

    /// Returns the index of the slice governing time index t.
    #[inline]
    pub fn slice_index(&self, t: usize) -> usize {
        match &self.tau {
            None => 0,
            Some(tau) => tau[t],
        }
    }

    /// Returns the raw slice stack.
    #[inline]
    pub fn slices(&self) -> &[DMatrix<f64>] {
        &self.slices
    }

    /// Returns the tau map, if time-varying.
    #[inline]
    pub fn tau(&self) -> Option<&[usize]> {
        self.tau.as_deref()
    }

    /// Number of stored slices.
    #[inline]
    pub fn n_slices(&self) -> usize {
        self.slices.len()
    }

    /// True when the parameter carries a tau map.
    #[inline]
    pub fn is_varying(&self) -> bool {
        self.tau.is_some()
    }

    /// Row count of each slice.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.slices[0].nrows()
    }

    /// Column count of each slice.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.slices[0].ncols()
    }
}

// ============================================================================
// SystemVector
// ============================================================================

/// A possibly time-varying vector parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemVector {
    slices: Vec<DVector<f64>>,
    tau: Option<Vec<usize>>,
}

impl SystemVector {
    /// Creates a time-invariant parameter from a single slice.
    #[inline]
    pub fn constant(slice: DVector<f64>) -> Self {
        Self {
            slices: vec![slice],
            tau: None,
        }
    }

    /// Creates a time-varying parameter from a slice stack and a tau map.
    ///
    /// # Panics
    /// Panics if `slices` is empty.
    #[inline]
    pub fn varying(slices: Vec<DVector<f64>>, tau: Vec<usize>) -> Self {
        assert!(!slices.is_empty(), "parameter must have at least one slice");
        Self {
            slices,
            tau: Some(tau),
        }
    }

    /// Returns the slice governing time index t.
    #[inline]
    pub fn slice(&self, t: usize) -> &DVector<f64> {
        &self.slices[self.slice_index(t)]
    }

    /// Returns the index of the slice governing time index t.
    #[inline]
    pub fn slice_index(&self, t: usize) -> usize {
        match &self.tau {
            None => 0,
            Some(tau) => tau[t],
        }
    }

    /// Returns the raw slice stack.
    #[inline]
    pub fn slices(&self) -> &[DVector<f64>] {
        &self.slices
    }

    /// Returns the tau map, if time-varying.
    #[inline]
    pub fn tau(&self) -> Option<&[usize]> {
        self.tau.as_deref()
    }

    /// Number of stored slices.
    #[inline]
    pub fn n_slices(&self) -> usize {
        self.slices.len()
    }

    /// True when the parameter carries a tau map.
    #[inline]
    pub fn is_varying(&self) -> bool {
        self.tau.is_some()
    }

    /// Length of each slice.
    #[inline]
    pub fn len(&self) -> usize {
        self.slices[0].len()
    }

    /// True when each slice has length zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
