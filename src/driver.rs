//! Time stepping of the coupled model.
//!
//! Each increment
//!
//! 1. runs the nucleation model, if enabled, and seeds new nuclei,
//! 2. evaluates the explicit residual,
//! 3. solves the mechanical equilibrium for the displacement increment, every
//!    `implicit_interval` increments,
//! 4. updates concentration and order parameters with the inverse lumped mass,
//! 5. records diagnostics every `diagnostics_interval` increments.
//!
//! Every worker of a distributed run owns a [`Simulation`] and all of them must call the
//! same methods in the same order.
use crate::cg::{CgWorkspace, ConjugateGradient, ResidualCriterion};
use crate::config::{DisplacementConstraint, DriverSettings, ModelParameters, SimulationConfig};
use crate::diagnostics::{free_energy, integrate_field, DiagnosticsRecord};
use crate::discretization::Discretization;
use crate::fields::{FieldKind, SolutionSet};
use crate::kernel::{explicit_residual, ImplicitElasticOperator};
use crate::mesh::UniformGrid;
use crate::model::CoupledModel;
use crate::nucleation::{NucleationCoordinator, NucleationReport};
use crate::sampler::{EvaluationFlags, FieldSampler, ScalarSampler};
use eyre::{eyre, WrapErr};
use log::{debug, info};
use nalgebra::DVector;
use phasefield_comm::Communicator;

/// The diagonal of the lumped mass matrix, i.e. the integrals of the basis functions.
pub fn lumped_mass<C, const D: usize>(discretization: &Discretization<D>, comm: &C) -> eyre::Result<DVector<f64>>
where
    C: Communicator,
{
    let grid = discretization.grid();
    let table = discretization.table();
    let make_sampler = || ScalarSampler::new(grid, table);
    let mut outputs = discretization.cell_loop(&[grid.num_vertices()], make_sampler, |sampler, cell, outputs| {
        sampler.reinit(cell);
        for q in 0..sampler.num_quadrature_points() {
            sampler.submit_value(q, 1.0);
        }
        sampler.integrate_and_scatter(EvaluationFlags::VALUES, &mut outputs[0]);
    });
    discretization.sum_contributions(comm, &mut outputs)?;
    Ok(outputs.swap_remove(0))
}

/// Degrees of freedom of the displacement that are fixed to zero.
pub fn constrained_displacement_dofs<const D: usize>(
    grid: &UniformGrid<D>,
    constraint: DisplacementConstraint,
) -> Vec<usize> {
    match constraint {
        DisplacementConstraint::Free => Vec::new(),
        DisplacementConstraint::ClampedBoundary => (0..grid.num_vertices())
            .filter(|&v| grid.is_boundary_vertex(v))
            .flat_map(|v| (0..D).map(move |i| D * v + i))
            .collect(),
    }
}

/// Summary of one increment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    pub increment: usize,
    pub time: f64,
    pub nucleation: NucleationReport,
    /// Number of CG iterations, if the displacement was solved for.
    pub solver_iterations: Option<usize>,
}

pub struct Simulation<C, const D: usize> {
    discretization: Discretization<D>,
    model: CoupledModel<D>,
    solution: SolutionSet<D>,
    inverse_lumped_mass: DVector<f64>,
    constrained_dofs: Vec<usize>,
    nucleation: Option<NucleationCoordinator<D>>,
    settings: DriverSettings,
    cg_workspace: CgWorkspace,
    comm: C,
    increment: usize,
    time: f64,
    diagnostics: Vec<DiagnosticsRecord>,
}

impl<C, const D: usize> Simulation<C, D>
where
    C: Communicator,
{
    pub fn new(
        grid: UniformGrid<D>,
        parameters: &ModelParameters,
        settings: DriverSettings,
        comm: C,
    ) -> eyre::Result<Self> {
        eyre::ensure!(settings.implicit_interval > 0, "implicit interval must be positive");
        eyre::ensure!(settings.diagnostics_interval > 0, "diagnostics interval must be positive");
        let model = CoupledModel::new(parameters).wrap_err("invalid model parameters")?;

        let partition = grid.partition(comm.size(), comm.rank());
        debug!(
            "Worker {} owns cells {:?} and vertices {:?}",
            comm.rank(),
            partition.cells,
            partition.vertices
        );
        let discretization = Discretization::new(grid, settings.quadrature, settings.quadrature_points, partition)?;
        let grid = discretization.grid();

        let solution = SolutionSet::for_model(grid.num_vertices(), &model.order_parameter_names())?;
        let mass = lumped_mass(&discretization, &comm)?;
        if let Some(v) = mass.iter().position(|&m| m <= 0.0) {
            return Err(eyre!(
                "lumped mass of vertex {v} is not positive, use a quadrature rule with positive weights"
            ));
        }
        let inverse_lumped_mass = mass.map(|m| 1.0 / m);
        let constrained_dofs = constrained_displacement_dofs(grid, settings.displacement_constraint);
        let nucleation = parameters
            .nucleation
            .clone()
            .map(|params| NucleationCoordinator::new(params, model.time_step, comm.rank()));

        info!(
            "Set up simulation with {} cells, {} vertices and {} worker(s)",
            grid.num_cells(),
            grid.num_vertices(),
            comm.size()
        );
        Ok(Self {
            discretization,
            model,
            solution,
            inverse_lumped_mass,
            constrained_dofs,
            nucleation,
            settings,
            cg_workspace: CgWorkspace::default(),
            comm,
            increment: 0,
            time: 0.0,
            diagnostics: Vec::new(),
        })
    }

    pub fn from_config(config: &SimulationConfig, comm: C) -> eyre::Result<Self> {
        config.validate(D)?;
        let grid = config.grid.build::<D>()?;
        Self::new(grid, &config.model, config.driver.clone(), comm)
    }

    pub fn discretization(&self) -> &Discretization<D> {
        &self.discretization
    }

    pub fn model(&self) -> &CoupledModel<D> {
        &self.model
    }

    pub fn solution(&self) -> &SolutionSet<D> {
        &self.solution
    }

    /// Mutable access to the solution, e.g. to set initial conditions.
    ///
    /// Every worker must make the same modifications.
    pub fn solution_mut(&mut self) -> &mut SolutionSet<D> {
        &mut self.solution
    }

    pub fn inverse_lumped_mass(&self) -> &DVector<f64> {
        &self.inverse_lumped_mass
    }

    pub fn constrained_dofs(&self) -> &[usize] {
        &self.constrained_dofs
    }

    pub fn nucleation(&self) -> Option<&NucleationCoordinator<D>> {
        self.nucleation.as_ref()
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn increment(&self) -> usize {
        self.increment
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn diagnostics(&self) -> &[DiagnosticsRecord] {
        &self.diagnostics
    }

    /// Advances the solution by one increment.
    pub fn step(&mut self) -> eyre::Result<StepReport> {
        self.increment += 1;
        self.time += self.model.time_step;
        let layout = self.model.layout();

        let nucleation = self.nucleate()?;

        let residual = explicit_residual(&self.discretization, &self.model, &self.solution, &self.comm)
            .wrap_err_with(|| format!("failed to evaluate the residual in increment {}", self.increment))?;

        let solver_iterations = if self.increment % self.settings.implicit_interval == 0 {
            Some(self.solve_displacement(residual.displacement)?)
        } else {
            None
        };

        *self.solution.field_mut(layout.concentration()) =
            residual.concentration.component_mul(&self.inverse_lumped_mass);
        for (p, r) in residual.order_parameters.iter().enumerate() {
            *self.solution.field_mut(layout.order_parameter(p)) = r.component_mul(&self.inverse_lumped_mass);
        }

        if self.increment % self.settings.diagnostics_interval == 0 {
            self.record_diagnostics()?;
        }

        Ok(StepReport {
            increment: self.increment,
            time: self.time,
            nucleation,
            solver_iterations,
        })
    }

    /// Performs the given number of increments.
    pub fn run(&mut self, num_increments: usize) -> eyre::Result<()> {
        for _ in 0..num_increments {
            let report = self.step()?;
            debug!("Finished increment {} (t = {})", report.increment, report.time);
        }
        Ok(())
    }

    /// Solves the mechanical equilibrium for the current concentration and order parameters.
    /// Returns the number of CG iterations.
    pub fn equilibrate(&mut self) -> eyre::Result<usize> {
        let residual = explicit_residual(&self.discretization, &self.model, &self.solution, &self.comm)?;
        self.solve_displacement(residual.displacement)
    }

    fn nucleate(&mut self) -> eyre::Result<NucleationReport> {
        let Some(coordinator) = self.nucleation.as_mut() else {
            return Ok(NucleationReport::default());
        };
        let layout = self.model.layout();
        let concentration = self.solution.field(layout.concentration()).clone();
        let grid = self.discretization.grid();
        let partition = self.discretization.partition();
        let report = coordinator
            .step(
                &self.comm,
                grid,
                partition,
                self.increment,
                self.time,
                &concentration,
                self.solution.fields_mut(layout.order_parameters()),
            )
            .wrap_err_with(|| format!("nucleation failed in increment {}", self.increment))?;

        let target = layout.order_parameter(coordinator.parameters().order_parameter);
        self.discretization
            .synchronize_owned(&self.comm, self.solution.field_mut(target), 1)?;
        Ok(report)
    }

    fn solve_displacement(&mut self, mut rhs: DVector<f64>) -> eyre::Result<usize> {
        let layout = self.model.layout();
        for &dof in &self.constrained_dofs {
            rhs[dof] = 0.0;
        }

        let mut increment = DVector::zeros(rhs.len());
        let output = {
            let order_parameters = (0..self.model.num_order_parameters())
                .map(|p| self.solution.field(layout.order_parameter(p)))
                .collect();
            let operator = ImplicitElasticOperator::new(
                &self.discretization,
                &self.model,
                order_parameters,
                &self.constrained_dofs,
                &self.comm,
            );
            let solver = &self.settings.solver;
            ConjugateGradient::with_workspace(&mut self.cg_workspace)
                .with_operator(&operator)
                .with_stopping_criterion(ResidualCriterion::new(
                    solver.relative_tolerance,
                    solver.absolute_tolerance,
                ))
                .with_max_iter(solver.max_iterations)
                .solve_with_guess(&rhs, &mut increment)
                .wrap_err_with(|| format!("displacement solve failed in increment {}", self.increment))?
        };

        *self.solution.field_mut(layout.displacement()) += increment;
        debug!(
            "Displacement solve converged in {} iterations (residual norm {:e})",
            output.num_iterations, output.residual_norm
        );
        Ok(output.num_iterations)
    }

    /// Computes the free energy and the integrals of all scalar fields, and appends them to
    /// the diagnostics.
    pub fn record_diagnostics(&mut self) -> eyre::Result<&DiagnosticsRecord> {
        let free_energy = free_energy(&self.discretization, &self.model, &self.solution, &self.comm)?;
        let mut integrals = Vec::new();
        for index in 0..self.solution.num_fields() {
            let descriptor = self.solution.descriptor(index);
            if descriptor.kind == FieldKind::Scalar {
                let integral = integrate_field(&self.discretization, &self.solution, &descriptor.name, &self.comm)?;
                integrals.push((descriptor.name.clone(), integral));
            }
        }

        if self.comm.is_root() {
            info!(
                "Increment {} (t = {}): free energy {:.6e} (homogeneous {:.6e}, gradient {:.6e}, elastic {:.6e})",
                self.increment,
                self.time,
                free_energy.total(),
                free_energy.homogeneous,
                free_energy.gradient,
                free_energy.elastic
            );
            for (name, integral) in &integrals {
                info!("  integral of {name}: {integral:.10e}");
            }
        }

        self.diagnostics.push(DiagnosticsRecord {
            increment: self.increment,
            time: self.time,
            free_energy,
            integrals,
        });
        self.diagnostics
            .last()
            .ok_or_else(|| eyre!("diagnostics record was not stored"))
    }
}
