//! Quadrature rules for the one-dimensional domain `[-1, 1]`.

use crate::Rule;
use std::f64::consts::PI;

/// Values of the Legendre polynomials `P_n(x)` and `P_{n-1}(x)` by the three-term recurrence.
///
/// The derivative formulas are singular at `|x| == 1`, so they may only be used in the open
/// interval `(-1, 1)`.
#[derive(Debug, Default)]
struct LegendreRecurrence {
    n: usize,
    x: f64,
    // p_n(x)
    p1: f64,
    // p_{n - 1}(x)
    p2: f64,
}

impl LegendreRecurrence {
    fn evaluate(n: usize, x: f64) -> Self {
        //  m P_m(x) = (2m - 1) x P_{m - 1}(x) - (m - 1) P_{m - 2}(x)
        let mut p1 = 1.0;
        let mut p2 = 0.0;
        for m in 1..=n {
            let m = m as f64;
            let p3 = p2;
            p2 = p1;
            p1 = ((2.0 * m - 1.0) * x * p2 - (m - 1.0) * p3) / m;
        }

        Self { n, x, p1, p2 }
    }

    fn value(&self) -> f64 {
        self.p1
    }

    fn derivative(&self) -> f64 {
        let Self { n, x, p1, p2 } = self;
        let n = *n as f64;
        // P'_n(x) = n (x P_n(x) - P_{n - 1}(x)) / (x^2 - 1)
        n * (x * p1 - p2) / (x * x - 1.0)
    }

    fn second_derivative(&self) -> f64 {
        let n = self.n as f64;
        let x = self.x;
        // Legendre's differential equation:
        // (1 - x^2) P''_n(x) = 2 x P'_n(x) - n (n + 1) P_n(x)
        (2.0 * x * self.derivative() - n * (n + 1.0) * self.value()) / (1.0 - x * x)
    }
}

/// Gauss quadrature for the reference interval [-1, 1].
///
/// Returns the [Gauss quadrature rule] with the given number of points. Given `n` points,
/// the rule integrates polynomials of order up to `2 n - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
///
/// [Gauss quadrature rule]: https://en.wikipedia.org/wiki/Gaussian_quadrature
pub fn gauss(num_points: usize) -> Rule<1> {
    let n = num_points;
    assert!(n > 0, "number of points must be positive");

    // Roots come in symmetric pairs, so only the first half is computed with Newton's method
    let m = (n + 1) / 2;

    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    for i in 0..m {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut recurrence = LegendreRecurrence::evaluate(n, x);

        loop {
            let dx = -recurrence.value() / recurrence.derivative();
            x += dx;
            recurrence = LegendreRecurrence::evaluate(n, x);
            if dx.abs() <= 1e-15 {
                break;
            }
        }

        let dp = recurrence.derivative();
        points.push([x]);
        weights.push(2.0 / ((1.0 - x * x) * dp * dp));
    }

    for i in m..n {
        let mirror_idx = n - i - 1;
        points.push([-points[mirror_idx][0]]);
        weights.push(weights[mirror_idx]);
    }

    debug_assert_eq!(points.len(), n);
    (weights, points)
}

/// Gauss-Lobatto quadrature for the reference interval [-1, 1].
///
/// The rule with `n` points contains both end points of the interval and integrates
/// polynomials of order up to `2 n - 3` exactly. Points are returned in ascending order.
/// Returns `None` if fewer than two points are requested.
pub fn try_gauss_lobatto(num_points: usize) -> Option<Rule<1>> {
    let n = num_points;
    if n < 2 {
        return None;
    }

    // Interior points are the roots of P'_{n - 1}
    let degree = n - 1;
    let end_weight = 2.0 / (n * (n - 1)) as f64;
    let mut points = vec![[0.0]; n];
    let mut weights = vec![0.0; n];
    points[0] = [-1.0];
    points[n - 1] = [1.0];
    weights[0] = end_weight;
    weights[n - 1] = end_weight;

    for i in 1..n - 1 {
        // Chebyshev-Gauss-Lobatto points are close enough for Newton's method to converge
        let mut x = -(PI * i as f64 / degree as f64).cos();
        for _ in 0..100 {
            let recurrence = LegendreRecurrence::evaluate(degree, x);
            let dx = -recurrence.derivative() / recurrence.second_derivative();
            x += dx;
            if dx.abs() <= 1e-15 {
                break;
            }
        }
        let p = LegendreRecurrence::evaluate(degree, x).value();
        points[i] = [x];
        weights[i] = end_weight / (p * p);
    }

    // Enforce exact symmetry of the rule
    for i in 0..n / 2 {
        let mirror_idx = n - i - 1;
        let x = 0.5 * (points[mirror_idx][0] - points[i][0]);
        let w = 0.5 * (weights[i] + weights[mirror_idx]);
        points[i] = [-x];
        points[mirror_idx] = [x];
        weights[i] = w;
        weights[mirror_idx] = w;
    }
    if n % 2 == 1 {
        points[n / 2] = [0.0];
    }

    Some((weights, points))
}
