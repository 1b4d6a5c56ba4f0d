//! Matrix-free finite element kernels for a coupled Cahn-Hilliard, Allen-Cahn and linear
//! elasticity model of precipitate growth, with stochastic nucleation coordinated across
//! workers.
pub mod cg;
pub mod config;
pub mod diagnostics;
pub mod discretization;
pub mod driver;
pub mod element;
pub mod fields;
pub mod interpolation;
pub mod kernel;
pub mod mesh;
pub mod model;
pub mod nucleation;
pub mod polynomial;
pub mod sampler;

pub mod quadrature {
    pub use phasefield_quadrature::*;
}

pub mod solid {
    pub use phasefield_solid::*;
}

pub mod comm {
    pub use phasefield_comm::*;
}

pub extern crate nalgebra;
