//! Material data of the coupled model, prepared for evaluation at quadrature points.
use crate::config::{tensor_block, ModelParameters};
use crate::fields::FieldLayout;
use crate::interpolation::InterpolationFunction;
use crate::polynomial::Polynomial;
use eyre::WrapErr;
use log::debug;
use nalgebra::SMatrix;
use phasefield_solid::ElasticityTensor;

/// Eigenstrain and its derivatives with respect to the concentration at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eigenstrain<const D: usize> {
    pub value: SMatrix<f64, D, D>,
    pub concentration_derivative: SMatrix<f64, D, D>,
    pub second_concentration_derivative: SMatrix<f64, D, D>,
}

/// Dependence of the stress-free transformation strain on the concentration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EigenstrainLaw<const D: usize> {
    Constant(SMatrix<f64, D, D>),
    /// `slope * c + intercept`
    Affine {
        slope: SMatrix<f64, D, D>,
        intercept: SMatrix<f64, D, D>,
    },
}

impl<const D: usize> EigenstrainLaw<D> {
    pub fn evaluate(&self, concentration: f64) -> Eigenstrain<D> {
        match self {
            Self::Constant(value) => Eigenstrain {
                value: *value,
                concentration_derivative: SMatrix::zeros(),
                second_concentration_derivative: SMatrix::zeros(),
            },
            Self::Affine { slope, intercept } => Eigenstrain {
                value: slope * concentration + intercept,
                concentration_derivative: *slope,
                second_concentration_derivative: SMatrix::zeros(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderParameter<const D: usize> {
    pub name: String,
    pub mobility: f64,
    pub gradient_energy: SMatrix<f64, D, D>,
    pub barrier_height: f64,
    pub interpolation: InterpolationFunction,
    pub misfit_interpolation: InterpolationFunction,
    pub eigenstrain: EigenstrainLaw<D>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stiffness {
    Uniform(ElasticityTensor<f64>),
    /// Stiffness interpolated between the parent phase `alpha` and the precipitate `beta`.
    PhaseDependent {
        alpha: ElasticityTensor<f64>,
        beta: ElasticityTensor<f64>,
        difference: ElasticityTensor<f64>,
    },
}

impl Stiffness {
    /// The stiffness for the given sum of interpolation functions.
    pub fn at(&self, interpolation_sum: f64) -> ElasticityTensor<f64> {
        match self {
            Self::Uniform(c) => *c,
            Self::PhaseDependent { alpha, beta, .. } => ElasticityTensor::interpolate(alpha, beta, interpolation_sum),
        }
    }

    /// `C_beta - C_alpha` if the stiffness is phase dependent.
    pub fn difference(&self) -> Option<&ElasticityTensor<f64>> {
        match self {
            Self::Uniform(_) => None,
            Self::PhaseDependent { difference, .. } => Some(difference),
        }
    }
}

/// Coefficients of the coupled Cahn-Hilliard, Allen-Cahn and elasticity model in `D`
/// dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct CoupledModel<const D: usize> {
    pub time_step: f64,
    pub concentration_mobility: f64,
    pub order_parameters: Vec<OrderParameter<D>>,
    pub free_energy_alpha: Polynomial,
    pub free_energy_beta: Polynomial,
    pub stiffness: Stiffness,
    pub concentration_dependent_misfit: bool,
}

impl<const D: usize> CoupledModel<D> {
    /// Validates the parameters and prepares the model.
    pub fn new(parameters: &ModelParameters) -> eyre::Result<Self> {
        parameters.validate(D)?;

        let alpha = ElasticityTensor::from_model(D, &parameters.elasticity.matrix)
            .wrap_err("invalid elastic constants of the matrix phase")?;
        let stiffness = match &parameters.elasticity.precipitate {
            Some(model) => {
                let beta =
                    ElasticityTensor::from_model(D, model).wrap_err("invalid elastic constants of the precipitate")?;
                Stiffness::PhaseDependent {
                    alpha,
                    beta,
                    difference: ElasticityTensor::difference(&beta, &alpha),
                }
            }
            None => Stiffness::Uniform(alpha),
        };

        let order_parameters = parameters
            .order_parameters
            .iter()
            .map(|params| {
                let eigenstrain = if parameters.concentration_dependent_misfit {
                    EigenstrainLaw::Affine {
                        slope: tensor_block(&params.eigenstrain_slope),
                        intercept: tensor_block(&params.eigenstrain_intercept),
                    }
                } else {
                    EigenstrainLaw::Constant(tensor_block(&params.eigenstrain))
                };
                OrderParameter {
                    name: params.name.clone(),
                    mobility: params.mobility,
                    gradient_energy: tensor_block(&params.gradient_energy),
                    barrier_height: params.barrier_height,
                    interpolation: params.interpolation,
                    misfit_interpolation: params.misfit_interpolation.unwrap_or(params.interpolation),
                    eigenstrain,
                }
            })
            .collect();

        let model = Self {
            time_step: parameters.time_step,
            concentration_mobility: parameters.concentration_mobility,
            order_parameters,
            free_energy_alpha: parameters.free_energy_alpha.clone(),
            free_energy_beta: parameters.free_energy_beta.clone(),
            stiffness,
            concentration_dependent_misfit: parameters.concentration_dependent_misfit,
        };
        debug!(
            "Initialized {D}-dimensional model with {} order parameter(s), phase dependent stiffness: {}",
            model.num_order_parameters(),
            model.stiffness.difference().is_some()
        );
        Ok(model)
    }

    pub fn num_order_parameters(&self) -> usize {
        self.order_parameters.len()
    }

    pub fn layout(&self) -> FieldLayout {
        FieldLayout {
            num_order_parameters: self.num_order_parameters(),
        }
    }

    pub fn order_parameter_names(&self) -> Vec<&str> {
        self.order_parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }

    /// The sum of the interpolation functions of all order parameters.
    pub fn interpolation_sum(&self, order_parameters: &[f64]) -> f64 {
        self.order_parameters
            .iter()
            .zip(order_parameters)
            .map(|(p, &n)| p.interpolation.value(n))
            .sum()
    }

    /// The (possibly phase interpolated) stiffness for the given order parameter values.
    pub fn stiffness_at(&self, order_parameters: &[f64]) -> ElasticityTensor<f64> {
        match self.stiffness {
            Stiffness::Uniform(c) => c,
            Stiffness::PhaseDependent { .. } => self.stiffness.at(self.interpolation_sum(order_parameters)),
        }
    }
}
