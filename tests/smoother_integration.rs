//! Integration tests for the backward smoother and the smoothed-state
//! decomposition

mod common;

use approx::assert_relative_eq;
use common::{ar1, local_level, random_data, NILE};
use nalgebra::{dmatrix, dvector, DMatrix};
use statespace::prelude::*;

#[test]
fn test_noiseless_ar1_reproduces_data() {
    let ss = ar1(0.5, 1.0, 0.0);
    let y = dmatrix![1.0, -1.0, 1.0];
    let (sout, fout) = ss.smooth(&y).unwrap();
    for t in 0..3 {
        assert_relative_eq!(sout.alpha[(0, t)], y[(0, t)], max_relative = 1e-12);
    }
    assert_eq!(sout.log_likelihood, fout.log_likelihood);
}

#[test]
fn test_missing_entries_in_smoother_output() {
    let ss = StateSpace::time_invariant(
        dmatrix![1.0; 0.5],
        dvector![0.0, 0.0],
        dmatrix![1.0, 0.0; 0.0, 2.0],
        dmatrix![0.8],
        dvector![0.0],
        dmatrix![1.0],
        dmatrix![1.0],
    )
    .unwrap();
    let mut y = random_data(2, 12, 23);
    y[(0, 3)] = f64::NAN;
    y[(1, 7)] = f64::NAN;

    let (sout, _) = ss.smooth(&y).unwrap();
    // Missing observations yield undefined smoothed errors, everything else
    // stays finite.
    assert!(sout.epsilon[(0, 3)].is_nan());
    assert!(sout.epsilon[(1, 7)].is_nan());
    assert!(sout.epsilon[(1, 3)].is_finite());
    for t in 0..12 {
        assert!(sout.alpha.column(t).iter().all(|v| v.is_finite()));
        assert!(sout.eta.column(t).iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_smoothed_errors_satisfy_measurement_equation() {
    let ss = local_level(0.7, 0.4);
    let y = random_data(1, 20, 5);
    let (sout, _) = ss.smooth(&y).unwrap();
    for t in 0..20 {
        let rebuilt = sout.alpha[(0, t)] + sout.epsilon[(0, t)];
        assert_relative_eq!(rebuilt, y[(0, t)], max_relative = 1e-12);
    }
}

#[test]
fn test_nile_smoother_tracks_the_series() {
    let ss = local_level(15099.0, 1469.1);
    let y = DMatrix::from_row_slice(1, 100, &NILE);
    let (sout, fout) = ss.smooth(&y).unwrap();
    // The smoothed level stays within the data's range and close to the
    // filtered one-step predictions after the burn-in.
    let (lo, hi) = (456.0, 1370.0);
    for t in 0..100 {
        assert!(sout.alpha[(0, t)] > lo && sout.alpha[(0, t)] < hi);
    }
    for t in 10..100 {
        assert!((sout.alpha[(0, t)] - fout.a[(0, t)]).abs() < 400.0);
    }
    // The smoothed initial state agrees with the first smoothed level up to
    // one shock standard deviation.
    assert!((sout.a0tilde[0] - sout.alpha[(0, 0)]).abs() < 4.0 * 1469.1_f64.sqrt());
}

#[test]
fn test_decomposition_matches_smoother_with_mixed_init() {
    // One diffuse random walk plus one stationary AR(1), correlated noise
    // and a missing entry: the decomposition must still rebuild the
    // smoothed state.
    let ss = StateSpace::time_invariant(
        dmatrix![1.0, 1.0; 0.0, 1.0],
        dvector![0.0, 0.1],
        dmatrix![0.9, 0.3; 0.3, 0.8],
        dmatrix![1.0, 0.0; 0.0, 0.6],
        dvector![0.0, 0.0],
        dmatrix![1.0, 0.0; 0.0, 1.0],
        dmatrix![0.5, 0.0; 0.0, 0.7],
    )
    .unwrap();
    let mut y = random_data(2, 16, 41);
    y[(1, 4)] = f64::NAN;

    let (sout, fout) = ss.smooth(&y).unwrap();
    assert!(fout.dt >= 1);

    let periods = [0, 8, 15];
    let dec = ss.decompose_smoothed(&y, &periods).unwrap();
    for (k, &tk) in periods.iter().enumerate() {
        let rebuilt = dec.reconstruct(&y, k);
        for i in 0..2 {
            assert!(
                (rebuilt[i] - sout.alpha[(i, tk)]).abs() < 1e-3,
                "period {tk}, state {i}: {} vs {}",
                rebuilt[i],
                sout.alpha[(i, tk)]
            );
        }
    }
}

#[test]
fn test_eta_is_zero_when_state_noise_is_zero() {
    // Q = 0 pins the state to its deterministic path; the smoothed
    // disturbances must vanish.
    let ss = StateSpace::time_invariant(
        dmatrix![1.0],
        dvector![0.0],
        dmatrix![1.0],
        dmatrix![0.9],
        dvector![0.0],
        dmatrix![1.0],
        dmatrix![0.0],
    )
    .unwrap();
    let y = dmatrix![1.0, 0.8, 0.9, 0.6];
    let (sout, _) = ss.smooth(&y).unwrap();
    for t in 0..4 {
        assert_eq!(sout.eta[(0, t)], 0.0);
    }
}
