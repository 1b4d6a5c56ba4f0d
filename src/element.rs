//! Multilinear basis functions of box cells, tabulated at quadrature points.
use crate::mesh::UniformGrid;
use eyre::WrapErr;
use nalgebra::{SMatrix, SVector};
use phasefield_quadrature::tensor::{box_gauss, box_gauss_lobatto, to_unit_box};
use phasefield_quadrature::{Point, Rule};
use serde::{Deserialize, Serialize};

/// Value of the multilinear basis function with the given local index at a point of the
/// reference cell `[0, 1]^D`.
pub fn multilinear_value<const D: usize>(local_index: usize, xi: &Point<D>) -> f64 {
    (0..D)
        .map(|k| factor(local_index, k, xi[k]))
        .product()
}

/// Gradient with respect to the reference coordinates.
pub fn multilinear_reference_gradient<const D: usize>(local_index: usize, xi: &Point<D>) -> SVector<f64, D> {
    SVector::from_fn(|k, _| {
        (0..D)
            .map(|m| {
                if m == k {
                    factor_derivative(local_index, m)
                } else {
                    factor(local_index, m, xi[m])
                }
            })
            .product()
    })
}

/// Second derivatives with respect to the reference coordinates.
///
/// Each factor is linear, so only mixed derivatives are non-zero.
pub fn multilinear_reference_hessian<const D: usize>(local_index: usize, xi: &Point<D>) -> SMatrix<f64, D, D> {
    SMatrix::from_fn(|k, l| {
        if k == l {
            return 0.0;
        }
        (0..D)
            .map(|m| {
                if m == k || m == l {
                    factor_derivative(local_index, m)
                } else {
                    factor(local_index, m, xi[m])
                }
            })
            .product()
    })
}

fn factor(local_index: usize, k: usize, xi_k: f64) -> f64 {
    if (local_index >> k) & 1 == 1 {
        xi_k
    } else {
        1.0 - xi_k
    }
}

fn factor_derivative(local_index: usize, k: usize) -> f64 {
    if (local_index >> k) & 1 == 1 {
        1.0
    } else {
        -1.0
    }
}

/// The family of quadrature rule used for cell integrals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuadratureKind {
    Gauss,
    /// Quadrature points include the cell vertices, which gives a diagonal mass matrix.
    GaussLobatto,
}

/// Basis function values, gradients and hessians at the quadrature points of a cell.
///
/// All cells of a uniform grid are translates of each other, so a single table serves
/// every cell. Derivatives are with respect to physical coordinates and the weights already
/// include the cell volume.
#[derive(Debug, Clone)]
pub struct BasisTable<const D: usize> {
    num_nodes: usize,
    reference_points: Vec<Point<D>>,
    jxw: Vec<f64>,
    // Indexed by q * num_nodes + local node index
    values: Vec<f64>,
    gradients: Vec<SVector<f64, D>>,
    hessians: Vec<SMatrix<f64, D, D>>,
}

impl<const D: usize> BasisTable<D> {
    /// Tabulates the basis of the cells of `grid` for a rule defined on `[0, 1]^D`.
    pub fn from_unit_box_rule(grid: &UniformGrid<D>, rule: Rule<D>) -> Self {
        let num_nodes = UniformGrid::<D>::vertices_per_cell();
        let (weights, reference_points) = rule;
        let h = grid.cell_size();
        let cell_volume = grid.cell_volume();
        let jxw = weights.iter().map(|w| w * cell_volume).collect();

        let mut values = Vec::with_capacity(reference_points.len() * num_nodes);
        let mut gradients = Vec::with_capacity(reference_points.len() * num_nodes);
        let mut hessians = Vec::with_capacity(reference_points.len() * num_nodes);
        for xi in &reference_points {
            for a in 0..num_nodes {
                values.push(multilinear_value(a, xi));
                let reference_gradient = multilinear_reference_gradient(a, xi);
                gradients.push(reference_gradient.component_div(&h));
                let reference_hessian = multilinear_reference_hessian(a, xi);
                hessians.push(SMatrix::from_fn(|k, l| reference_hessian[(k, l)] / (h[k] * h[l])));
            }
        }

        Self {
            num_nodes,
            reference_points,
            jxw,
            values,
            gradients,
            hessians,
        }
    }

    pub fn new(grid: &UniformGrid<D>, kind: QuadratureKind, num_points_per_dim: usize) -> eyre::Result<Self> {
        let rule = match kind {
            QuadratureKind::Gauss => {
                eyre::ensure!(num_points_per_dim > 0, "Gauss rules need at least one point");
                box_gauss(num_points_per_dim)
            }
            QuadratureKind::GaussLobatto => box_gauss_lobatto(num_points_per_dim)
                .wrap_err_with(|| format!("no Gauss-Lobatto rule with {num_points_per_dim} points"))?,
        };
        Ok(Self::from_unit_box_rule(grid, to_unit_box(rule)))
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.jxw.len()
    }

    /// Quadrature point in reference coordinates of the unit box.
    pub fn reference_point(&self, q: usize) -> &Point<D> {
        &self.reference_points[q]
    }

    pub fn jxw(&self, q: usize) -> f64 {
        self.jxw[q]
    }

    pub fn value(&self, q: usize, node: usize) -> f64 {
        self.values[q * self.num_nodes + node]
    }

    pub fn gradient(&self, q: usize, node: usize) -> &SVector<f64, D> {
        &self.gradients[q * self.num_nodes + node]
    }

    pub fn hessian(&self, q: usize, node: usize) -> &SMatrix<f64, D, D> {
        &self.hessians[q * self.num_nodes + node]
    }
}
