//! Helpers shared by the tests of the workspace.
use nalgebra::{DVector, SVector};

/// The largest entry-wise absolute difference between two vectors of equal length.
pub fn max_abs_difference(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    assert_eq!(a.len(), b.len(), "vectors must have the same length");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Euclidean distance between two points.
pub fn distance<const D: usize>(a: &SVector<f64, D>, b: &SVector<f64, D>) -> f64 {
    (a - b).norm()
}
