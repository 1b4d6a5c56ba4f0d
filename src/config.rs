//! Configuration of the coupled model and of simulation runs.
//!
//! Configurations are plain `serde` data structures. [`SimulationConfig`] is usually read from
//! a JSON file with [`SimulationConfig::from_json_file`]. Tensors are always given as 3x3
//! arrays, of which only the leading `D x D` block is used in `D` dimensions.
use crate::element::QuadratureKind;
use crate::interpolation::InterpolationFunction;
use crate::mesh::UniformGrid;
use crate::nucleation::NucleationParameters;
use crate::polynomial::Polynomial;
use eyre::{eyre, WrapErr};
use nalgebra::{SMatrix, SVector};
use phasefield_solid::MaterialModel;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub type Tensor3 = [[f64; 3]; 3];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderParameterParameters {
    pub name: String,
    /// Allen-Cahn mobility.
    pub mobility: f64,
    /// Gradient energy coefficient tensor.
    pub gradient_energy: Tensor3,
    /// Height of the double-well barrier.
    #[serde(default)]
    pub barrier_height: f64,
    #[serde(default)]
    pub interpolation: InterpolationFunction,
    /// Interpolation of the eigenstrain. Uses `interpolation` if not given.
    #[serde(default)]
    pub misfit_interpolation: Option<InterpolationFunction>,
    /// Eigenstrain used when the misfit does not depend on the concentration.
    #[serde(default)]
    pub eigenstrain: Tensor3,
    /// Slope and intercept of the eigenstrain `slope * c + intercept` used when the misfit
    /// depends on the concentration.
    #[serde(default)]
    pub eigenstrain_slope: Tensor3,
    #[serde(default)]
    pub eigenstrain_intercept: Tensor3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticityParameters {
    /// Material of the parent (matrix) phase.
    pub matrix: MaterialModel<f64>,
    /// Material of the precipitate phase. The stiffness is interpolated between the two
    /// phases if given, otherwise the matrix material is used everywhere.
    #[serde(default)]
    pub precipitate: Option<MaterialModel<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelParameters {
    pub time_step: f64,
    /// Cahn-Hilliard mobility.
    pub concentration_mobility: f64,
    pub order_parameters: Vec<OrderParameterParameters>,
    /// Chemical free energy density of the parent phase as a polynomial in the concentration.
    pub free_energy_alpha: Polynomial,
    /// Chemical free energy density of the precipitate phase.
    pub free_energy_beta: Polynomial,
    pub elasticity: ElasticityParameters,
    #[serde(default)]
    pub concentration_dependent_misfit: bool,
    #[serde(default)]
    pub nucleation: Option<NucleationParameters>,
}

impl ModelParameters {
    pub fn validate(&self, dim: usize) -> eyre::Result<()> {
        eyre::ensure!((1..=3).contains(&dim), "unsupported dimension {dim}");
        eyre::ensure!(
            self.time_step.is_finite() && self.time_step > 0.0,
            "time step must be positive, got {}",
            self.time_step
        );
        check_non_negative("concentration mobility", self.concentration_mobility)?;
        eyre::ensure!(!self.order_parameters.is_empty(), "at least one order parameter is required");
        eyre::ensure!(
            self.free_energy_alpha.is_finite() && self.free_energy_beta.is_finite(),
            "free energy coefficients must be finite"
        );

        for (p, params) in self.order_parameters.iter().enumerate() {
            let name = &params.name;
            eyre::ensure!(
                !name.is_empty() && name != "c" && name != "u",
                "order parameter {p} has the invalid name {name:?}"
            );
            eyre::ensure!(
                self.order_parameters[..p].iter().all(|other| &other.name != name),
                "order parameter name {name} is used more than once"
            );
            check_non_negative("mobility", params.mobility).wrap_err_with(|| format!("order parameter {name}"))?;
            check_non_negative("barrier height", params.barrier_height)
                .wrap_err_with(|| format!("order parameter {name}"))?;
            for interpolation in [Some(params.interpolation), params.misfit_interpolation]
                .into_iter()
                .flatten()
            {
                if let InterpolationFunction::CubicPower { exponent: 0 } = interpolation {
                    return Err(eyre!("order parameter {name}: interpolation exponent must be positive"));
                }
            }
            let tensors = [
                ("gradient energy", &params.gradient_energy),
                ("eigenstrain", &params.eigenstrain),
                ("eigenstrain slope", &params.eigenstrain_slope),
                ("eigenstrain intercept", &params.eigenstrain_intercept),
            ];
            for (description, tensor) in tensors {
                check_symmetric_block(tensor, dim)
                    .wrap_err_with(|| format!("order parameter {name}: invalid {description} tensor"))?;
            }
        }

        if let Some(nucleation) = &self.nucleation {
            nucleation
                .validate(self.order_parameters.len())
                .wrap_err("invalid nucleation parameters")?;
        }
        Ok(())
    }

    pub fn has_phase_dependent_stiffness(&self) -> bool {
        self.elasticity.precipitate.is_some()
    }

    pub fn order_parameter_names(&self) -> Vec<&str> {
        self.order_parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// The leading `D x D` block of a 3x3 tensor.
pub fn tensor_block<const D: usize>(tensor: &Tensor3) -> SMatrix<f64, D, D> {
    SMatrix::from_fn(|i, j| tensor[i][j])
}

fn check_non_negative(description: &str, value: f64) -> eyre::Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(eyre!("{description} must be non-negative and finite, got {value}"))
    }
}

fn check_symmetric_block(tensor: &Tensor3, dim: usize) -> eyre::Result<()> {
    for i in 0..dim {
        for j in 0..dim {
            eyre::ensure!(tensor[i][j].is_finite(), "entry ({i}, {j}) is not finite");
            eyre::ensure!(
                (tensor[i][j] - tensor[j][i]).abs() <= 1e-12 * (1.0 + tensor[i][j].abs()),
                "tensor is not symmetric: entry ({i}, {j}) is {}, entry ({j}, {i}) is {}",
                tensor[i][j],
                tensor[j][i]
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridParameters {
    #[serde(default)]
    pub origin: Option<Vec<f64>>,
    pub extents: Vec<f64>,
    pub cells: Vec<usize>,
}

impl GridParameters {
    pub fn build<const D: usize>(&self) -> eyre::Result<UniformGrid<D>> {
        let extents: [f64; D] = self
            .extents
            .as_slice()
            .try_into()
            .map_err(|_| eyre!("expected {D} grid extents, got {}", self.extents.len()))?;
        let cells: [usize; D] = self
            .cells
            .as_slice()
            .try_into()
            .map_err(|_| eyre!("expected {D} cell counts, got {}", self.cells.len()))?;
        let origin = match &self.origin {
            Some(origin) => {
                let origin: [f64; D] = origin
                    .as_slice()
                    .try_into()
                    .map_err(|_| eyre!("expected {D} origin coordinates, got {}", origin.len()))?;
                SVector::from(origin)
            }
            None => SVector::zeros(),
        };
        UniformGrid::new(origin, SVector::from(extents), cells)
    }
}

/// Homogeneous constraints on the displacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplacementConstraint {
    /// No constraints. The elasticity operator is then only semi-definite.
    Free,
    /// Zero displacement on the whole boundary.
    #[default]
    ClampedBoundary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_relative_tolerance")]
    pub relative_tolerance: f64,
    #[serde(default = "default_absolute_tolerance")]
    pub absolute_tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            relative_tolerance: default_relative_tolerance(),
            absolute_tolerance: default_absolute_tolerance(),
        }
    }
}

fn default_max_iterations() -> usize {
    5000
}

fn default_relative_tolerance() -> f64 {
    1e-10
}

fn default_absolute_tolerance() -> f64 {
    1e-14
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverSettings {
    /// Solve for the displacement every this many increments.
    #[serde(default = "default_implicit_interval")]
    pub implicit_interval: usize,
    /// Record diagnostics every this many increments.
    #[serde(default = "default_diagnostics_interval")]
    pub diagnostics_interval: usize,
    #[serde(default)]
    pub displacement_constraint: DisplacementConstraint,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default = "default_quadrature_kind")]
    pub quadrature: QuadratureKind,
    #[serde(default = "default_quadrature_points")]
    pub quadrature_points: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            implicit_interval: default_implicit_interval(),
            diagnostics_interval: default_diagnostics_interval(),
            displacement_constraint: DisplacementConstraint::default(),
            solver: SolverSettings::default(),
            quadrature: default_quadrature_kind(),
            quadrature_points: default_quadrature_points(),
        }
    }
}

fn default_implicit_interval() -> usize {
    1
}

fn default_diagnostics_interval() -> usize {
    100
}

fn default_quadrature_kind() -> QuadratureKind {
    QuadratureKind::GaussLobatto
}

fn default_quadrature_points() -> usize {
    2
}

/// Everything needed to set up a [`Simulation`](crate::driver::Simulation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    pub grid: GridParameters,
    pub model: ModelParameters,
    #[serde(default)]
    pub driver: DriverSettings,
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> eyre::Result<Self> {
        serde_json::from_str(json).wrap_err("failed to parse simulation configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read configuration file {}", path.display()))?;
        Self::from_json_str(&json).wrap_err_with(|| format!("in configuration file {}", path.display()))
    }

    pub fn validate(&self, dim: usize) -> eyre::Result<()> {
        eyre::ensure!(
            self.grid.extents.len() == dim && self.grid.cells.len() == dim,
            "grid must be {dim}-dimensional"
        );
        eyre::ensure!(self.driver.implicit_interval > 0, "implicit interval must be positive");
        eyre::ensure!(self.driver.diagnostics_interval > 0, "diagnostics interval must be positive");
        self.model.validate(dim)
    }
}
