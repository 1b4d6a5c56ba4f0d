//! Integral quantities of a solution, most notably the free energy.
use crate::discretization::Discretization;
use crate::fields::{FieldKind, SolutionSet};
use crate::interpolation::double_well;
use crate::kernel::{elastic_coupling, ElasticCoupling, PointState};
use crate::model::CoupledModel;
use crate::sampler::{EvaluationFlags, FieldSampler, ScalarSampler, VectorSampler};
use eyre::eyre;
use itertools::izip;
use nalgebra::{DVector, SVector};
use phasefield_comm::Communicator;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Scalar fields sampled at a quadrature point, in the order the fields were requested.
#[derive(Debug, Clone, Copy)]
pub struct PointValues<'a, const D: usize> {
    pub position: SVector<f64, D>,
    pub values: &'a [f64],
    pub gradients: &'a [SVector<f64, D>],
}

/// Integrates `expression` over the whole domain.
///
/// Every worker integrates over its owned cells and the results are summed across workers,
/// so all workers obtain the same value.
pub fn integrate<C, const D: usize>(
    discretization: &Discretization<D>,
    fields: &[&DVector<f64>],
    comm: &C,
    expression: impl Fn(&PointValues<D>) -> f64 + Sync + Send,
) -> eyre::Result<f64>
where
    C: Communicator,
{
    let grid = discretization.grid();
    let table = discretization.table();
    if let Some(field) = fields.iter().find(|f| f.len() != grid.num_vertices()) {
        return Err(eyre!(
            "cannot integrate a field of length {} on a grid with {} vertices",
            field.len(),
            grid.num_vertices()
        ));
    }

    let make_samplers = || {
        let samplers: Vec<_> = fields
            .iter()
            .map(|_| ScalarSampler::new(grid, table))
            .collect();
        (samplers, vec![0.0; fields.len()], vec![SVector::<f64, D>::zeros(); fields.len()])
    };

    let local: f64 = discretization
        .partition()
        .cells
        .clone()
        .into_par_iter()
        .with_min_len(64)
        .map_init(make_samplers, |(samplers, values, gradients), cell| {
            for (sampler, field) in samplers.iter_mut().zip(fields) {
                sampler.reinit(cell);
                sampler.read_dof_values(field);
                sampler.evaluate(EvaluationFlags::VALUES_AND_GRADIENTS);
            }
            let mut integral = 0.0;
            for q in 0..table.num_quadrature_points() {
                for (sampler, value, gradient) in izip!(samplers.iter(), values.iter_mut(), gradients.iter_mut()) {
                    *value = sampler.value(q);
                    *gradient = sampler.gradient(q);
                }
                let point = PointValues {
                    position: grid.cell_origin(cell) + quadrature_offset(discretization, q),
                    values: values.as_slice(),
                    gradients: gradients.as_slice(),
                };
                integral += table.jxw(q) * expression(&point);
            }
            integral
        })
        .sum();

    Ok(comm.all_reduce_sum_scalar(local)?)
}

fn quadrature_offset<const D: usize>(discretization: &Discretization<D>, q: usize) -> SVector<f64, D> {
    let xi = discretization.table().reference_point(q);
    let h = discretization.grid().cell_size();
    SVector::from_fn(|k, _| xi[k] * h[k])
}

/// Integrates the scalar field with the given name, e.g. the total amount of solute.
pub fn integrate_field<C, const D: usize>(
    discretization: &Discretization<D>,
    solution: &SolutionSet<D>,
    name: &str,
    comm: &C,
) -> eyre::Result<f64>
where
    C: Communicator,
{
    let index = solution
        .field_index(name)
        .ok_or_else(|| eyre!("no field named {name}"))?;
    if solution.descriptor(index).kind != FieldKind::Scalar {
        return Err(eyre!("field {name} is not a scalar field"));
    }
    integrate(discretization, &[solution.field(index)], comm, |point| point.values[0])
}

/// The free energy of a solution, split into its contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FreeEnergy {
    /// Chemical energy `(1 - sum h) f_alpha(c) + sum h f_beta(c)`.
    pub homogeneous: f64,
    /// Interfacial energy `sum_p (grad n_p . K_p grad n_p / 2 + W_p g(n_p))`.
    pub gradient: f64,
    /// Strain energy `E : C : E / 2`.
    pub elastic: f64,
}

impl FreeEnergy {
    pub fn total(&self) -> f64 {
        self.homogeneous + self.gradient + self.elastic
    }
}

struct FreeEnergyState<'a, const D: usize> {
    concentration: ScalarSampler<'a, D>,
    order_parameters: Vec<ScalarSampler<'a, D>>,
    displacement: VectorSampler<'a, D>,
    values: Vec<f64>,
    gradients: Vec<SVector<f64, D>>,
    coupling: ElasticCoupling<D>,
}

pub fn free_energy<C, const D: usize>(
    discretization: &Discretization<D>,
    model: &CoupledModel<D>,
    solution: &SolutionSet<D>,
    comm: &C,
) -> eyre::Result<FreeEnergy>
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
    let concentration = solution.field(layout.concentration());
    let order_parameters: Vec<&DVector<f64>> = (0..k)
        .map(|p| solution.field(layout.order_parameter(p)))
        .collect();
    let displacement = solution.field(layout.displacement());

    let make_state = || FreeEnergyState {
        concentration: ScalarSampler::new(grid, table),
        order_parameters: (0..k).map(|_| ScalarSampler::new(grid, table)).collect(),
        displacement: VectorSampler::new(grid, table),
        values: vec![0.0; k],
        gradients: vec![SVector::zeros(); k],
        coupling: ElasticCoupling::new(k),
    };

    let local = discretization
        .partition()
        .cells
        .clone()
        .into_par_iter()
        .with_min_len(64)
        .map_init(make_state, |state, cell| {
            state.concentration.reinit(cell);
            state.concentration.read_dof_values(concentration);
            state.concentration.evaluate(EvaluationFlags::VALUES);
            for (sampler, &field) in state.order_parameters.iter_mut().zip(&order_parameters) {
                sampler.reinit(cell);
                sampler.read_dof_values(field);
                sampler.evaluate(EvaluationFlags::VALUES_AND_GRADIENTS);
            }
            state.displacement.reinit(cell);
            state.displacement.read_dof_values(displacement);
            state.displacement.evaluate(EvaluationFlags::GRADIENTS);

            let mut energy = FreeEnergy::default();
            for q in 0..table.num_quadrature_points() {
                for (p, sampler) in state.order_parameters.iter().enumerate() {
                    state.values[p] = sampler.value(q);
                    state.gradients[p] = sampler.gradient(q);
                }
                let c = state.concentration.value(q);
                let point = PointState {
                    concentration: c,
                    concentration_gradient: SVector::zeros(),
                    order_parameters: &state.values,
                    order_parameter_gradients: &state.gradients,
                    displacement_gradient: state.displacement.gradient(q),
                    displacement_hessian: None,
                };
                elastic_coupling(model, &point, &mut state.coupling);

                let h_sum = state.coupling.interpolation_sum;
                let homogeneous =
                    (1.0 - h_sum) * model.free_energy_alpha.value(c) + h_sum * model.free_energy_beta.value(c);
                let gradient: f64 = izip!(&model.order_parameters, &state.values, &state.gradients)
                    .map(|(op, &n, grad_n)| {
                        0.5 * grad_n.dot(&(op.gradient_energy * grad_n)) + op.barrier_height * double_well(n)
                    })
                    .sum();

                let jxw = table.jxw(q);
                energy.homogeneous += jxw * homogeneous;
                energy.gradient += jxw * gradient;
                energy.elastic += jxw * state.coupling.energy_density();
            }
            energy
        })
        .reduce(FreeEnergy::default, |a, b| FreeEnergy {
            homogeneous: a.homogeneous + b.homogeneous,
            gradient: a.gradient + b.gradient,
            elastic: a.elastic + b.elastic,
        });

    let mut sums = [local.homogeneous, local.gradient, local.elastic];
    comm.all_reduce_sum(&mut sums)?;
    let [homogeneous, gradient, elastic] = sums;
    Ok(FreeEnergy {
        homogeneous,
        gradient,
        elastic,
    })
}

/// Diagnostics of one increment of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsRecord {
    pub increment: usize,
    pub time: f64,
    pub free_energy: FreeEnergy,
    /// Integrals of all scalar fields, by field name.
    pub integrals: Vec<(String, f64)>,
}
