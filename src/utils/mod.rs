//! Dense linear-algebra kernels and smoothed-moment post-processing

pub mod linalg;
pub mod moments;
