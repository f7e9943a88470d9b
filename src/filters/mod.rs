//! Filtering and smoothing recursions
//!
//! - [`diffuse`]: forward exact-diffuse univariate filter
//! - [`smoother`]: backward univariate smoother with exact-initial phase
//! - [`decompose`]: linear decomposition of the smoothed state into
//!   per-period data contributions

pub mod decompose;
pub mod diffuse;
pub mod smoother;
