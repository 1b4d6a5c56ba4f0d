//! Matrix-free residuals of the coupled model.
//!
//! The explicit residual advances the concentration (Cahn-Hilliard) and the order parameters
//! (Allen-Cahn) by one forward Euler step, and produces the right-hand side of the
//! mechanical equilibrium. The implicit residual is the action of the linear elasticity
//! operator, used as the matrix-free operator of the displacement solve.
//!
//! Residuals are computed in two layers. The point functions
//! [`elastic_coupling`], [`explicit_point_residual`] and [`implicit_point_stress`] act on
//! values sampled at a single quadrature point, while [`explicit_residual`] and
//! [`implicit_residual`] loop over the owned cells, sample the fields, integrate the point
//! residuals and sum them across workers.
use crate::cg::LinearOperator;
use crate::discretization::Discretization;
use crate::fields::SolutionSet;
use crate::interpolation::double_well_derivative;
use crate::model::CoupledModel;
use crate::sampler::{EvaluationFlags, FieldSampler, ScalarSampler, VectorSampler};
use itertools::izip;
use nalgebra::{DVector, SMatrix, SVector};
use phasefield_comm::Communicator;

/// Field values sampled at one quadrature point.
#[derive(Debug, Clone, Copy)]
pub struct PointState<'a, const D: usize> {
    pub concentration: f64,
    pub concentration_gradient: SVector<f64, D>,
    pub order_parameters: &'a [f64],
    pub order_parameter_gradients: &'a [SVector<f64, D>],
    /// Entry `(i, j)` holds `du_i / dx_j`.
    pub displacement_gradient: SMatrix<f64, D, D>,
    /// Entry `(j, k)` of element `i` holds `d^2 u_i / (dx_j dx_k)`. Only needed when the
    /// eigenstrain depends on the concentration. A missing hessian is treated as zero.
    pub displacement_hessian: Option<[SMatrix<f64, D, D>; D]>,
}

/// Mechanical quantities at one quadrature point that enter the phase-field equations.
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticCoupling<const D: usize> {
    /// Sum of the interpolation functions of all order parameters.
    pub interpolation_sum: f64,
    /// Total strain minus the interpolated eigenstrains.
    pub elastic_strain: SMatrix<f64, D, D>,
    pub stress: SMatrix<f64, D, D>,
    /// Per order parameter, `-hm'(n_p) S : eps0_p`.
    pub misfit: Vec<f64>,
    /// Per order parameter, `h'(n_p) S2 : E / 2` with `S2 = (C_beta - C_alpha) E`. Zero unless
    /// the stiffness is phase dependent.
    pub heterogeneous: Vec<f64>,
    /// Gradient of the elastic chemical potential `-S : sum_p hm(n_p) d eps0_p / dc`.
    pub chemical_potential_gradient: SVector<f64, D>,
}

impl<const D: usize> ElasticCoupling<D> {
    pub fn new(num_order_parameters: usize) -> Self {
        Self {
            interpolation_sum: 0.0,
            elastic_strain: SMatrix::zeros(),
            stress: SMatrix::zeros(),
            misfit: vec![0.0; num_order_parameters],
            heterogeneous: vec![0.0; num_order_parameters],
            chemical_potential_gradient: SVector::zeros(),
        }
    }

    /// The elastic energy density `E : S / 2`.
    pub fn energy_density(&self) -> f64 {
        0.5 * self.stress.dot(&self.elastic_strain)
    }
}

/// Residual densities at one quadrature point, to be tested against basis function values
/// and gradients respectively.
#[derive(Debug, Clone, PartialEq)]
pub struct PointResidual<const D: usize> {
    pub concentration_value: f64,
    pub concentration_gradient: SVector<f64, D>,
    pub order_parameter_values: Vec<f64>,
    pub order_parameter_gradients: Vec<SVector<f64, D>>,
    pub displacement_gradient: SMatrix<f64, D, D>,
}

impl<const D: usize> PointResidual<D> {
    pub fn new(num_order_parameters: usize) -> Self {
        Self {
            concentration_value: 0.0,
            concentration_gradient: SVector::zeros(),
            order_parameter_values: vec![0.0; num_order_parameters],
            order_parameter_gradients: vec![SVector::zeros(); num_order_parameters],
            displacement_gradient: SMatrix::zeros(),
        }
    }
}

fn symmetric_part<const D: usize>(a: &SMatrix<f64, D, D>) -> SMatrix<f64, D, D> {
    0.5 * (a + a.transpose())
}

/// Computes the elastic state at a quadrature point and its coupling terms to the
/// phase-field equations.
pub fn elastic_coupling<const D: usize>(
    model: &CoupledModel<D>,
    state: &PointState<D>,
    coupling: &mut ElasticCoupling<D>,
) {
    assert_eq!(state.order_parameters.len(), model.num_order_parameters());
    let c = state.concentration;

    let mut elastic_strain = symmetric_part(&state.displacement_gradient);
    for (op, &n) in izip!(&model.order_parameters, state.order_parameters) {
        elastic_strain -= op.eigenstrain.evaluate(c).value * op.misfit_interpolation.value(n);
    }

    let interpolation_sum = model.interpolation_sum(state.order_parameters);
    let stiffness = model.stiffness.at(interpolation_sum);
    let stress = stiffness.compute_stress(&elastic_strain);
    let heterogeneous_stress = model
        .stiffness
        .difference()
        .map(|difference| difference.compute_stress(&elastic_strain));

    for (p, (op, &n)) in izip!(&model.order_parameters, state.order_parameters).enumerate() {
        let eigenstrain = op.eigenstrain.evaluate(c).value;
        coupling.misfit[p] = -op.misfit_interpolation.derivative(n) * stress.dot(&eigenstrain);
        coupling.heterogeneous[p] = match &heterogeneous_stress {
            Some(s2) => 0.5 * op.interpolation.derivative(n) * s2.dot(&elastic_strain),
            None => 0.0,
        };
    }

    coupling.chemical_potential_gradient = if model.concentration_dependent_misfit {
        let hessian = state
            .displacement_hessian
            .unwrap_or([SMatrix::zeros(); D]);
        let s2 = heterogeneous_stress.as_ref();
        chemical_potential_gradient(model, state, &stiffness, &stress, s2, &hessian)
    } else {
        SVector::zeros()
    };

    coupling.interpolation_sum = interpolation_sum;
    coupling.elastic_strain = elastic_strain;
    coupling.stress = stress;
}

// With eps0c = sum_p hm_p d eps0_p / dc the chemical potential is mu = -S : eps0c, so
// d_k mu = -(C d_k E) : eps0c - (d_k C) E : eps0c - S : d_k eps0c.
fn chemical_potential_gradient<const D: usize>(
    model: &CoupledModel<D>,
    state: &PointState<D>,
    stiffness: &phasefield_solid::ElasticityTensor<f64>,
    stress: &SMatrix<f64, D, D>,
    heterogeneous_stress: Option<&SMatrix<f64, D, D>>,
    hessian: &[SMatrix<f64, D, D>; D],
) -> SVector<f64, D> {
    let c = state.concentration;
    let ops = || izip!(&model.order_parameters, state.order_parameters, state.order_parameter_gradients);

    let mut eigenstrain_c = SMatrix::<f64, D, D>::zeros();
    for (op, &n, _) in ops() {
        eigenstrain_c += op.eigenstrain.evaluate(c).concentration_derivative * op.misfit_interpolation.value(n);
    }
    let s3 = stiffness.compute_stress(&(-eigenstrain_c));
    let s2_dot_eigenstrain_c = heterogeneous_stress.map(|s2| s2.dot(&eigenstrain_c));

    SVector::from_fn(|k, _| {
        let dc = state.concentration_gradient[k];
        let displacement_gradient_k = SMatrix::<f64, D, D>::from_fn(|i, j| hessian[i][(j, k)]);
        let mut strain_k = symmetric_part(&displacement_gradient_k);
        let mut eigenstrain_c_k = SMatrix::<f64, D, D>::zeros();
        let mut stiffness_k = 0.0;
        for (op, &n, grad_n) in ops() {
            let eigenstrain = op.eigenstrain.evaluate(c);
            let hm = op.misfit_interpolation.value(n);
            let dhm = op.misfit_interpolation.derivative(n);
            strain_k -= eigenstrain.concentration_derivative * (hm * dc) + eigenstrain.value * (dhm * grad_n[k]);
            eigenstrain_c_k += eigenstrain.second_concentration_derivative * (hm * dc)
                + eigenstrain.concentration_derivative * (dhm * grad_n[k]);
            stiffness_k += op.interpolation.derivative(n) * grad_n[k];
        }
        let heterogeneous = s2_dot_eigenstrain_c.map_or(0.0, |s2_e| stiffness_k * s2_e);
        s3.dot(&strain_k) - stress.dot(&eigenstrain_c_k) - heterogeneous
    })
}

/// Computes the explicit residual densities at one quadrature point.
///
/// `coupling` is overwritten with the elastic state at the point.
pub fn explicit_point_residual<const D: usize>(
    model: &CoupledModel<D>,
    state: &PointState<D>,
    coupling: &mut ElasticCoupling<D>,
    residual: &mut PointResidual<D>,
) {
    elastic_coupling(model, state, coupling);

    let c = state.concentration;
    let dt = model.time_step;
    let (f_alpha, f_beta) = (&model.free_energy_alpha, &model.free_energy_beta);
    let h_sum = coupling.interpolation_sum;

    let mut flux = state.concentration_gradient
        * ((1.0 - h_sum) * f_alpha.second_derivative(c) + h_sum * f_beta.second_derivative(c));
    let chemical_driving_force = f_beta.value(c) - f_alpha.value(c);
    let potential_difference = f_beta.derivative(c) - f_alpha.derivative(c);

    for (p, (op, &n, grad_n)) in izip!(
        &model.order_parameters,
        state.order_parameters,
        state.order_parameter_gradients
    )
    .enumerate()
    {
        let dh = op.interpolation.derivative(n);
        flux += grad_n * (potential_difference * dh);

        let driving_force = chemical_driving_force * dh
            + op.barrier_height * double_well_derivative(n)
            + coupling.misfit[p]
            + coupling.heterogeneous[p];
        residual.order_parameter_values[p] = n - dt * op.mobility * driving_force;
        residual.order_parameter_gradients[p] = -(op.gradient_energy * grad_n) * (dt * op.mobility);
    }
    flux += coupling.chemical_potential_gradient;

    residual.concentration_value = c;
    residual.concentration_gradient = -flux * (dt * model.concentration_mobility);
    residual.displacement_gradient = -coupling.stress;
}

/// The stress `C(n) : sym(grad u)` of the linear elasticity operator at one point.
pub fn implicit_point_stress<const D: usize>(
    model: &CoupledModel<D>,
    order_parameters: &[f64],
    displacement_gradient: &SMatrix<f64, D, D>,
) -> SMatrix<f64, D, D> {
    model
        .stiffness_at(order_parameters)
        .compute_stress(&symmetric_part(displacement_gradient))
}

/// Assembled explicit residual vectors, summed over all workers.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitResidual {
    pub concentration: DVector<f64>,
    pub order_parameters: Vec<DVector<f64>>,
    /// Right-hand side of the mechanical equilibrium.
    pub displacement: DVector<f64>,
}

struct ExplicitCellState<'a, const D: usize> {
    concentration: ScalarSampler<'a, D>,
    order_parameters: Vec<ScalarSampler<'a, D>>,
    displacement: VectorSampler<'a, D>,
    values: Vec<f64>,
    gradients: Vec<SVector<f64, D>>,
    coupling: ElasticCoupling<D>,
    residual: PointResidual<D>,
}

/// Evaluates the explicit residual of the current solution.
///
/// The solution must hold the fields of `model` in the layout given by
/// [`CoupledModel::layout`].
pub fn explicit_residual<C, const D: usize>(
    discretization: &Discretization<D>,
    model: &CoupledModel<D>,
    solution: &SolutionSet<D>,
    comm: &C,
) -> eyre::Result<ExplicitResidual>
where
    C: Communicator,
{
    let layout = model.layout();
    let k = model.num_order_parameters();
    eyre::ensure!(
        solution.num_fields() == layout.num_fields(),
        "solution has {} fields, but the model needs {}",
        solution.num_fields(),
        layout.num_fields()
    );
    let grid = discretization.grid();
    let table = discretization.table();
    let nv = grid.num_vertices();

    let concentration = solution.field(layout.concentration());
    let order_parameters: Vec<&DVector<f64>> = (0..k)
        .map(|p| solution.field(layout.order_parameter(p)))
        .collect();
    let displacement = solution.field(layout.displacement());

    let mut displacement_flags = EvaluationFlags::GRADIENTS;
    if model.concentration_dependent_misfit {
        displacement_flags = displacement_flags.with_hessians();
    }

    let mut lengths = vec![nv; 1 + k];
    lengths.push(D * nv);

    let make_state = || ExplicitCellState {
        concentration: ScalarSampler::new(grid, table),
        order_parameters: (0..k).map(|_| ScalarSampler::new(grid, table)).collect(),
        displacement: VectorSampler::new(grid, table),
        values: vec![0.0; k],
        gradients: vec![SVector::zeros(); k],
        coupling: ElasticCoupling::new(k),
        residual: PointResidual::new(k),
    };

    let mut outputs = discretization.cell_loop(&lengths, make_state, |state, cell, outputs| {
        state.concentration.reinit(cell);
        state.concentration.read_dof_values(concentration);
        state.concentration.evaluate(EvaluationFlags::VALUES_AND_GRADIENTS);
        for (sampler, &field) in state.order_parameters.iter_mut().zip(&order_parameters) {
            sampler.reinit(cell);
            sampler.read_dof_values(field);
            sampler.evaluate(EvaluationFlags::VALUES_AND_GRADIENTS);
        }
        state.displacement.reinit(cell);
        state.displacement.read_dof_values(displacement);
        state.displacement.evaluate(displacement_flags);

        for q in 0..state.concentration.num_quadrature_points() {
            for (p, sampler) in state.order_parameters.iter().enumerate() {
                state.values[p] = sampler.value(q);
                state.gradients[p] = sampler.gradient(q);
            }
            let point = PointState {
                concentration: state.concentration.value(q),
                concentration_gradient: state.concentration.gradient(q),
                order_parameters: &state.values,
                order_parameter_gradients: &state.gradients,
                displacement_gradient: state.displacement.gradient(q),
                displacement_hessian: displacement_flags
                    .hessians
                    .then(|| state.displacement.hessian(q)),
            };
            explicit_point_residual(model, &point, &mut state.coupling, &mut state.residual);

            let residual = &state.residual;
            state.concentration.submit_value(q, residual.concentration_value);
            state
                .concentration
                .submit_gradient(q, residual.concentration_gradient);
            for (p, sampler) in state.order_parameters.iter_mut().enumerate() {
                sampler.submit_value(q, residual.order_parameter_values[p]);
                sampler.submit_gradient(q, residual.order_parameter_gradients[p]);
            }
            state
                .displacement
                .submit_gradient(q, residual.displacement_gradient);
        }

        let (concentration_out, rest) = outputs.split_first_mut().expect("outputs are non-empty");
        let (displacement_out, order_parameter_out) = rest.split_last_mut().expect("outputs are non-empty");
        state
            .concentration
            .integrate_and_scatter(EvaluationFlags::VALUES_AND_GRADIENTS, concentration_out);
        for (sampler, out) in state.order_parameters.iter_mut().zip(order_parameter_out) {
            sampler.integrate_and_scatter(EvaluationFlags::VALUES_AND_GRADIENTS, out);
        }
        state
            .displacement
            .integrate_and_scatter(EvaluationFlags::GRADIENTS, displacement_out);
    });
    discretization.sum_contributions(comm, &mut outputs)?;

    let displacement = outputs
        .pop()
        .ok_or_else(|| eyre::eyre!("displacement residual is missing"))?;
    let concentration = outputs.remove(0);
    Ok(ExplicitResidual {
        concentration,
        order_parameters: outputs,
        displacement,
    })
}

struct ImplicitCellState<'a, const D: usize> {
    order_parameters: Vec<ScalarSampler<'a, D>>,
    displacement: VectorSampler<'a, D>,
    values: Vec<f64>,
}

/// Applies the linear elasticity operator to `displacement`, i.e. integrates
/// `C(n) : sym(grad u)` against the gradients of the basis functions.
pub fn implicit_residual<C, const D: usize>(
    discretization: &Discretization<D>,
    model: &CoupledModel<D>,
    order_parameters: &[&DVector<f64>],
    displacement: &DVector<f64>,
    comm: &C,
) -> eyre::Result<DVector<f64>>
where
    C: Communicator,
{
    let k = model.num_order_parameters();
    eyre::ensure!(
        order_parameters.len() == k,
        "expected {k} order parameters, got {}",
        order_parameters.len()
    );
    let grid = discretization.grid();
    let table = discretization.table();
    // Uniform stiffness does not depend on the order parameters
    let needs_order_parameters = model.stiffness.difference().is_some();

    let make_state = || ImplicitCellState {
        order_parameters: (0..k).map(|_| ScalarSampler::new(grid, table)).collect(),
        displacement: VectorSampler::new(grid, table),
        values: vec![0.0; k],
    };

    let mut outputs = discretization.cell_loop(&[D * grid.num_vertices()], make_state, |state, cell, outputs| {
        if needs_order_parameters {
            for (sampler, &field) in state.order_parameters.iter_mut().zip(order_parameters) {
                sampler.reinit(cell);
                sampler.read_dof_values(field);
                sampler.evaluate(EvaluationFlags::VALUES);
            }
        }
        state.displacement.reinit(cell);
        state.displacement.read_dof_values(displacement);
        state.displacement.evaluate(EvaluationFlags::GRADIENTS);

        for q in 0..state.displacement.num_quadrature_points() {
            if needs_order_parameters {
                for (value, sampler) in state.values.iter_mut().zip(&state.order_parameters) {
                    *value = sampler.value(q);
                }
            }
            let stress = implicit_point_stress(model, &state.values, &state.displacement.gradient(q));
            state.displacement.submit_gradient(q, stress);
        }
        state
            .displacement
            .integrate_and_scatter(EvaluationFlags::GRADIENTS, &mut outputs[0]);
    });
    discretization.sum_contributions(comm, &mut outputs)?;
    Ok(outputs.swap_remove(0))
}

/// The elasticity operator for the current order parameters as a [`LinearOperator`], with
/// homogeneous constraints on the constrained degrees of freedom.
///
/// Constrained entries of the input are ignored and the identity is applied to them, so
/// the operator stays symmetric positive definite.
pub struct ImplicitElasticOperator<'a, C, const D: usize> {
    discretization: &'a Discretization<D>,
    model: &'a CoupledModel<D>,
    order_parameters: Vec<&'a DVector<f64>>,
    constrained_dofs: &'a [usize],
    comm: &'a C,
}

impl<'a, C, const D: usize> ImplicitElasticOperator<'a, C, D>
where
    C: Communicator,
{
    pub fn new(
        discretization: &'a Discretization<D>,
        model: &'a CoupledModel<D>,
        order_parameters: Vec<&'a DVector<f64>>,
        constrained_dofs: &'a [usize],
        comm: &'a C,
    ) -> Self {
        Self {
            discretization,
            model,
            order_parameters,
            constrained_dofs,
            comm,
        }
    }

    /// Zeroes the constrained entries of `vector`.
    pub fn apply_homogeneous_constraints(&self, vector: &mut DVector<f64>) {
        for &dof in self.constrained_dofs {
            vector[dof] = 0.0;
        }
    }
}

impl<'a, C, const D: usize> LinearOperator for ImplicitElasticOperator<'a, C, D>
where
    C: Communicator,
{
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> eyre::Result<()> {
        let mut x_free = x.clone();
        self.apply_homogeneous_constraints(&mut x_free);
        *y = implicit_residual(self.discretization, self.model, &self.order_parameters, &x_free, self.comm)?;
        for &dof in self.constrained_dofs {
            y[dof] = x[dof];
        }
        Ok(())
    }
}
