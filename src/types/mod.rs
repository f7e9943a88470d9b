//! Core data carriers for possibly time-varying system parameters

pub mod params;

pub use params::{SystemMatrix, SystemVector};
