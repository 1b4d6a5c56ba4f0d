//! Quadrature rules for `D`-dimensional boxes formed as tensor products of 1D rules.

use crate::univariate::{gauss, try_gauss_lobatto};
use crate::{Error, Rule};

/// Forms the tensor product of a 1D rule with itself `D` times.
///
/// Points are enumerated with the *first* coordinate varying fastest, matching the ordering
/// of vertices in a structured grid.
pub fn tensor_product<const D: usize>(rule1d: &Rule<1>) -> Rule<D> {
    let (weights1d, points1d) = rule1d;
    let n = weights1d.len();
    let total = n.pow(D as u32);

    let mut weights = Vec::with_capacity(total);
    let mut points = Vec::with_capacity(total);
    for linear_index in 0..total {
        let mut remainder = linear_index;
        let mut w = 1.0;
        let mut x = [0.0; D];
        for x_k in x.iter_mut() {
            let i = remainder % n;
            remainder /= n;
            w *= weights1d[i];
            *x_k = points1d[i][0];
        }
        weights.push(w);
        points.push(x);
    }

    (weights, points)
}

/// A Gauss quadrature rule for the reference box `[-1, 1]^D`.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn box_gauss<const D: usize>(num_points_per_dim: usize) -> Rule<D> {
    tensor_product(&gauss(num_points_per_dim))
}

/// A Gauss-Lobatto quadrature rule for the reference box `[-1, 1]^D`.
///
/// The quadrature points of the two-point rule coincide with the vertices of the box, which
/// makes the mass matrix of multilinear elements diagonal.
pub fn box_gauss_lobatto<const D: usize>(num_points_per_dim: usize) -> Result<Rule<D>, Error> {
    try_gauss_lobatto(num_points_per_dim)
        .map(|rule| tensor_product(&rule))
        .ok_or(Error::NoRuleAvailable)
}

/// Maps a rule on `[-1, 1]^D` to the unit box `[0, 1]^D`.
pub fn to_unit_box<const D: usize>(rule: Rule<D>) -> Rule<D> {
    let (weights, points) = rule;
    let scale = 0.5f64.powi(D as i32);
    let weights = weights.into_iter().map(|w| w * scale).collect();
    let points = points
        .into_iter()
        .map(|p| p.map(|x_k| 0.5 * (x_k + 1.0)))
        .collect();
    (weights, points)
}
