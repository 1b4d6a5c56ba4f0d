//! Interpolation functions of order parameters and the double-well barrier.
use serde::{Deserialize, Serialize};

/// A smooth function `h(p)` taking an order parameter from the parent phase (`h(0) = 0`) to
/// the precipitate (`h(1) = 1`), with vanishing slope at both ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterpolationFunction {
    /// `h(p) = 3p^2 - 2p^3`
    #[default]
    Cubic,
    /// `h(p)^k` for the cubic `h`, which keeps the parent phase nearly unaffected longer.
    CubicPower { exponent: u32 },
}

impl InterpolationFunction {
    pub fn value(&self, p: f64) -> f64 {
        match *self {
            Self::Cubic => cubic(p),
            Self::CubicPower { exponent } => cubic(p).powi(exponent as i32),
        }
    }

    pub fn derivative(&self, p: f64) -> f64 {
        match *self {
            Self::Cubic => cubic_derivative(p),
            Self::CubicPower { exponent: 0 } => 0.0,
            Self::CubicPower { exponent } => {
                let k = exponent as i32;
                k as f64 * cubic(p).powi(k - 1) * cubic_derivative(p)
            }
        }
    }
}

fn cubic(p: f64) -> f64 {
    p * p * (3.0 - 2.0 * p)
}

fn cubic_derivative(p: f64) -> f64 {
    6.0 * p * (1.0 - p)
}

/// The double-well barrier `g(n) = n^2 - 2n^3 + n^4` with minima at 0 and 1.
pub fn double_well(n: f64) -> f64 {
    n * n * (1.0 - n) * (1.0 - n)
}

pub fn double_well_derivative(n: f64) -> f64 {
    2.0 * n - 6.0 * n * n + 4.0 * n * n * n
}
