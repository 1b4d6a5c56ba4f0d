//! Linear elastic constitutive kernels for `phasefield`.
//!
//! Elasticity tensors are stored in Voigt notation (see [`voigt`]) and may be built from
//! the constants of a [`MaterialModel`] for several material symmetry classes. When the
//! stiffness depends on the phase, the tensors of the two phases are interpolated pointwise
//! with [`ElasticityTensor::interpolate`].
pub mod materials;
pub mod voigt;

pub use materials::{
    compute_stress, ElasticityTensor, LameParameters, MaterialError, MaterialModel, MaterialSymmetry,
    YoungPoisson,
};
