//! Evaluation of finite element fields at the quadrature points of a cell, and the reverse
//! operation of integrating quadrature point contributions into a global residual vector.
//!
//! The typical usage pattern for one cell is
//!
//! 1. [`reinit`](FieldSampler::reinit) the sampler for the cell,
//! 2. [`read_dof_values`](FieldSampler::read_dof_values) from the global solution vector,
//! 3. [`evaluate`](FieldSampler::evaluate) the requested quantities,
//! 4. query values, gradients or hessians and submit residual densities per point,
//! 5. [`integrate_and_scatter`](FieldSampler::integrate_and_scatter) the densities into a
//!    global vector.
//!
//! Submitted values are tested against the basis functions, submitted gradients against
//! their gradients, i.e. a submission `(v, g)` at each point contributes
//! `sum_q JxW_q (v_q phi_a(x_q) + g_q . grad phi_a(x_q))` to the entry of node `a`.
use crate::element::BasisTable;
use crate::mesh::UniformGrid;
use nalgebra::{DVector, SMatrix, SVector};

/// Quantities to compute in [`FieldSampler::evaluate`] or to integrate in
/// [`FieldSampler::integrate_and_scatter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationFlags {
    pub values: bool,
    pub gradients: bool,
    pub hessians: bool,
}

impl EvaluationFlags {
    pub const VALUES: Self = Self {
        values: true,
        gradients: false,
        hessians: false,
    };
    pub const GRADIENTS: Self = Self {
        values: false,
        gradients: true,
        hessians: false,
    };
    pub const VALUES_AND_GRADIENTS: Self = Self {
        values: true,
        gradients: true,
        hessians: false,
    };

    pub fn with_hessians(self) -> Self {
        Self { hessians: true, ..self }
    }
}

pub trait FieldSampler<const D: usize> {
    type Value: Copy;
    type Gradient: Copy;
    type Hessian: Copy;

    fn num_quadrature_points(&self) -> usize;

    /// Prepares the sampler for the given cell and clears all submitted contributions.
    fn reinit(&mut self, cell_index: usize);

    /// Gathers the degrees of freedom of the current cell from a global vector.
    fn read_dof_values(&mut self, global: &DVector<f64>);

    fn evaluate(&mut self, flags: EvaluationFlags);

    fn value(&self, q: usize) -> Self::Value;

    fn gradient(&self, q: usize) -> Self::Gradient;

    fn hessian(&self, q: usize) -> Self::Hessian;

    fn submit_value(&mut self, q: usize, value: Self::Value);

    fn submit_gradient(&mut self, q: usize, gradient: Self::Gradient);

    /// Integrates the submitted contributions selected by `flags` and adds them to the
    /// entries of `destination` belonging to the current cell.
    fn integrate_and_scatter(&mut self, flags: EvaluationFlags, destination: &mut DVector<f64>);

    /// Quadrature weight times the volume scaling of the current cell.
    fn jxw(&self, q: usize) -> f64;

    /// Physical position of a quadrature point of the current cell.
    fn quadrature_point(&self, q: usize) -> SVector<f64, D>;
}

/// State shared by the scalar and vector samplers.
#[derive(Debug, Clone)]
struct CellContext<'a, const D: usize> {
    grid: &'a UniformGrid<D>,
    table: &'a BasisTable<D>,
    cell_origin: SVector<f64, D>,
    nodes: Vec<usize>,
}

impl<'a, const D: usize> CellContext<'a, D> {
    fn new(grid: &'a UniformGrid<D>, table: &'a BasisTable<D>) -> Self {
        Self {
            grid,
            table,
            cell_origin: SVector::zeros(),
            nodes: vec![0; UniformGrid::<D>::vertices_per_cell()],
        }
    }

    fn reinit(&mut self, cell_index: usize) {
        self.grid.populate_cell_vertices(&mut self.nodes, cell_index);
        self.cell_origin = self.grid.cell_origin(cell_index);
    }

    fn quadrature_point(&self, q: usize) -> SVector<f64, D> {
        let xi = self.table.reference_point(q);
        let h = self.grid.cell_size();
        SVector::from_fn(|k, _| self.cell_origin[k] + xi[k] * h[k])
    }
}

/// Sampler for scalar fields with one degree of freedom per vertex.
#[derive(Debug, Clone)]
pub struct ScalarSampler<'a, const D: usize> {
    context: CellContext<'a, D>,
    dofs: Vec<f64>,
    values: Vec<f64>,
    gradients: Vec<SVector<f64, D>>,
    hessians: Vec<SMatrix<f64, D, D>>,
    submitted_values: Vec<f64>,
    submitted_gradients: Vec<SVector<f64, D>>,
}

impl<'a, const D: usize> ScalarSampler<'a, D> {
    pub fn new(grid: &'a UniformGrid<D>, table: &'a BasisTable<D>) -> Self {
        let nq = table.num_quadrature_points();
        Self {
            context: CellContext::new(grid, table),
            dofs: vec![0.0; table.num_nodes()],
            values: vec![0.0; nq],
            gradients: vec![SVector::zeros(); nq],
            hessians: vec![SMatrix::zeros(); nq],
            submitted_values: vec![0.0; nq],
            submitted_gradients: vec![SVector::zeros(); nq],
        }
    }
}

impl<'a, const D: usize> FieldSampler<D> for ScalarSampler<'a, D> {
    type Value = f64;
    type Gradient = SVector<f64, D>;
    type Hessian = SMatrix<f64, D, D>;

    fn num_quadrature_points(&self) -> usize {
        self.context.table.num_quadrature_points()
    }

    fn reinit(&mut self, cell_index: usize) {
        self.context.reinit(cell_index);
        self.submitted_values.fill(0.0);
        self.submitted_gradients.fill(SVector::zeros());
    }

    fn read_dof_values(&mut self, global: &DVector<f64>) {
        for (dof, &node) in self.dofs.iter_mut().zip(&self.context.nodes) {
            *dof = global[node];
        }
    }

    fn evaluate(&mut self, flags: EvaluationFlags) {
        let table = self.context.table;
        for q in 0..table.num_quadrature_points() {
            if flags.values {
                self.values[q] = (0..table.num_nodes())
                    .map(|a| self.dofs[a] * table.value(q, a))
                    .sum();
            }
            if flags.gradients {
                self.gradients[q] = (0..table.num_nodes())
                    .map(|a| table.gradient(q, a) * self.dofs[a])
                    .sum();
            }
            if flags.hessians {
                self.hessians[q] = (0..table.num_nodes())
                    .map(|a| table.hessian(q, a) * self.dofs[a])
                    .sum();
            }
        }
    }

    fn value(&self, q: usize) -> f64 {
        self.values[q]
    }

    fn gradient(&self, q: usize) -> SVector<f64, D> {
        self.gradients[q]
    }

    fn hessian(&self, q: usize) -> SMatrix<f64, D, D> {
        self.hessians[q]
    }

    fn submit_value(&mut self, q: usize, value: f64) {
        self.submitted_values[q] = value;
    }

    fn submit_gradient(&mut self, q: usize, gradient: SVector<f64, D>) {
        self.submitted_gradients[q] = gradient;
    }

    fn integrate_and_scatter(&mut self, flags: EvaluationFlags, destination: &mut DVector<f64>) {
        let table = self.context.table;
        for (a, &node) in self.context.nodes.iter().enumerate() {
            let mut contribution = 0.0;
            for q in 0..table.num_quadrature_points() {
                let mut density = 0.0;
                if flags.values {
                    density += self.submitted_values[q] * table.value(q, a);
                }
                if flags.gradients {
                    density += self.submitted_gradients[q].dot(table.gradient(q, a));
                }
                contribution += table.jxw(q) * density;
            }
            destination[node] += contribution;
        }
    }

    fn jxw(&self, q: usize) -> f64 {
        self.context.table.jxw(q)
    }

    fn quadrature_point(&self, q: usize) -> SVector<f64, D> {
        self.context.quadrature_point(q)
    }
}

/// Sampler for vector fields with `D` interleaved components per vertex, i.e. component `i`
/// of vertex `v` is stored at index `D * v + i`.
///
/// Gradients are matrices with entries `du_i / dx_j` at `(i, j)`, and the hessian of
/// component `i` is stored at index `i` of the returned array.
#[derive(Debug, Clone)]
pub struct VectorSampler<'a, const D: usize> {
    context: CellContext<'a, D>,
    // dofs[a] holds the components of local node a
    dofs: Vec<SVector<f64, D>>,
    values: Vec<SVector<f64, D>>,
    gradients: Vec<SMatrix<f64, D, D>>,
    hessians: Vec<[SMatrix<f64, D, D>; D]>,
    submitted_values: Vec<SVector<f64, D>>,
    submitted_gradients: Vec<SMatrix<f64, D, D>>,
}

impl<'a, const D: usize> VectorSampler<'a, D> {
    pub fn new(grid: &'a UniformGrid<D>, table: &'a BasisTable<D>) -> Self {
        let nq = table.num_quadrature_points();
        Self {
            context: CellContext::new(grid, table),
            dofs: vec![SVector::zeros(); table.num_nodes()],
            values: vec![SVector::zeros(); nq],
            gradients: vec![SMatrix::zeros(); nq],
            hessians: vec![[SMatrix::zeros(); D]; nq],
            submitted_values: vec![SVector::zeros(); nq],
            submitted_gradients: vec![SMatrix::zeros(); nq],
        }
    }
}

impl<'a, const D: usize> FieldSampler<D> for VectorSampler<'a, D> {
    type Value = SVector<f64, D>;
    type Gradient = SMatrix<f64, D, D>;
    type Hessian = [SMatrix<f64, D, D>; D];

    fn num_quadrature_points(&self) -> usize {
        self.context.table.num_quadrature_points()
    }

    fn reinit(&mut self, cell_index: usize) {
        self.context.reinit(cell_index);
        self.submitted_values.fill(SVector::zeros());
        self.submitted_gradients.fill(SMatrix::zeros());
    }

    fn read_dof_values(&mut self, global: &DVector<f64>) {
        for (dof, &node) in self.dofs.iter_mut().zip(&self.context.nodes) {
            *dof = SVector::from_fn(|i, _| global[D * node + i]);
        }
    }

    fn evaluate(&mut self, flags: EvaluationFlags) {
        let table = self.context.table;
        for q in 0..table.num_quadrature_points() {
            if flags.values {
                self.values[q] = (0..table.num_nodes())
                    .map(|a| self.dofs[a] * table.value(q, a))
                    .sum();
            }
            if flags.gradients {
                self.gradients[q] = (0..table.num_nodes())
                    .map(|a| self.dofs[a] * table.gradient(q, a).transpose())
                    .sum();
            }
            if flags.hessians {
                let mut hessian = [SMatrix::zeros(); D];
                for a in 0..table.num_nodes() {
                    for (i, h_i) in hessian.iter_mut().enumerate() {
                        *h_i += table.hessian(q, a) * self.dofs[a][i];
                    }
                }
                self.hessians[q] = hessian;
            }
        }
    }

    fn value(&self, q: usize) -> SVector<f64, D> {
        self.values[q]
    }

    fn gradient(&self, q: usize) -> SMatrix<f64, D, D> {
        self.gradients[q]
    }

    fn hessian(&self, q: usize) -> [SMatrix<f64, D, D>; D] {
        self.hessians[q]
    }

    fn submit_value(&mut self, q: usize, value: SVector<f64, D>) {
        self.submitted_values[q] = value;
    }

    fn submit_gradient(&mut self, q: usize, gradient: SMatrix<f64, D, D>) {
        self.submitted_gradients[q] = gradient;
    }

    fn integrate_and_scatter(&mut self, flags: EvaluationFlags, destination: &mut DVector<f64>) {
        let table = self.context.table;
        for (a, &node) in self.context.nodes.iter().enumerate() {
            let mut contribution = SVector::<f64, D>::zeros();
            for q in 0..table.num_quadrature_points() {
                let mut density = SVector::<f64, D>::zeros();
                if flags.values {
                    density += self.submitted_values[q] * table.value(q, a);
                }
                if flags.gradients {
                    density += self.submitted_gradients[q] * table.gradient(q, a);
                }
                contribution += density * table.jxw(q);
            }
            for i in 0..D {
                destination[D * node + i] += contribution[i];
            }
        }
    }

    fn jxw(&self, q: usize) -> f64 {
        self.context.table.jxw(q)
    }

    fn quadrature_point(&self, q: usize) -> SVector<f64, D> {
        self.context.quadrature_point(q)
    }
}
