use crate::voigt::{strain_to_voigt, stress_from_voigt, voigt_index_pairs, voigt_size};
use nalgebra::{Matrix6, RealField, SMatrix};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LameParameters<T> {
    pub mu: T,
    pub lambda: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoungPoisson<T> {
    pub young: T,
    pub poisson: T,
}

impl<T> From<YoungPoisson<T>> for LameParameters<T>
where
    T: RealField + Copy,
{
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn from(params: YoungPoisson<T>) -> Self {
        let YoungPoisson { young, poisson } = params;
        let mu = 0.5 * young / (1.0 + poisson);
        let lambda = 2.0 * mu * poisson / (1.0 - 2.0 * poisson);
        Self { mu, lambda }
    }
}

/// Symmetry class of a material, which determines how its elastic constants are interpreted.
///
/// The expected constants are, with 1-based Voigt indices:
///
/// - `Isotropic`: `[E, nu]` (Young's modulus and Poisson's ratio). In 2D the tensor corresponds
///   to plane strain, in 1D only `E` enters the tensor.
/// - `Transverse` (3D): `[C11, C33, C44, C12, C13]`, transversely isotropic about the z-axis.
/// - `Orthotropic` (3D): `[C11, C22, C33, C44, C55, C66, C12, C13, C23]`.
/// - `Anisotropic`: in 2D `[C11, C22, C33, C12, C13, C23]`, in 3D the 21 upper triangular
///   constants `[C11, C22, C33, C44, C55, C66, C12, C13, C14, C15, C16, C23, C24, C25, C26,
///   C34, C35, C36, C45, C46, C56]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialSymmetry {
    Isotropic,
    Transverse,
    Orthotropic,
    Anisotropic,
}

/// Elastic constants of a material together with their symmetry class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialModel<T> {
    pub symmetry: MaterialSymmetry,
    pub constants: Vec<T>,
}

impl<T> MaterialModel<T> {
    pub fn isotropic(young: T, poisson: T) -> Self {
        Self {
            symmetry: MaterialSymmetry::Isotropic,
            constants: vec![young, poisson],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MaterialError {
    UnsupportedDimension {
        dim: usize,
    },
    UnsupportedSymmetry {
        symmetry: MaterialSymmetry,
        dim: usize,
    },
    WrongNumberOfConstants {
        symmetry: MaterialSymmetry,
        dim: usize,
        expected: usize,
        actual: usize,
    },
    NonFiniteConstant {
        index: usize,
    },
}

impl Display for MaterialError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedDimension { dim } => {
                write!(f, "elasticity tensors are only available in 1, 2 and 3 dimensions, got {dim}")
            }
            Self::UnsupportedSymmetry { symmetry, dim } => {
                write!(f, "material symmetry {symmetry:?} is not supported in {dim} dimension(s)")
            }
            Self::WrongNumberOfConstants {
                symmetry,
                dim,
                expected,
                actual,
            } => write!(
                f,
                "material symmetry {symmetry:?} in {dim} dimension(s) requires {expected} constants, got {actual}"
            ),
            Self::NonFiniteConstant { index } => write!(f, "elastic constant {index} is not finite"),
        }
    }
}

impl std::error::Error for MaterialError {}

// Voigt index pairs (0-based) of the 3D anisotropic constants in input order
const ANISOTROPIC_3D_ORDER: [(usize, usize); 21] = [
    (0, 0),
    (1, 1),
    (2, 2),
    (3, 3),
    (4, 4),
    (5, 5),
    (0, 1),
    (0, 2),
    (0, 3),
    (0, 4),
    (0, 5),
    (1, 2),
    (1, 3),
    (1, 4),
    (1, 5),
    (2, 3),
    (2, 4),
    (2, 5),
    (3, 4),
    (3, 5),
    (4, 5),
];

const ANISOTROPIC_2D_ORDER: [(usize, usize); 6] = [(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 2)];

const ORTHOTROPIC_ORDER: [(usize, usize); 9] = [
    (0, 0),
    (1, 1),
    (2, 2),
    (3, 3),
    (4, 4),
    (5, 5),
    (0, 1),
    (0, 2),
    (1, 2),
];

/// A linear elasticity tensor stored as a symmetric matrix in Voigt notation.
///
/// The matrix is always stored as a 6x6 matrix. For dimensions below 3 only the leading
/// `voigt_size(dim)` rows and columns are non-zero.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ElasticityTensor<T: RealField + Copy> {
    dim: usize,
    voigt: Matrix6<T>,
}

impl<T> ElasticityTensor<T>
where
    T: RealField + Copy,
{
    /// Constructs a tensor directly from its Voigt matrix.
    ///
    /// Entries outside the leading `voigt_size(dim)` block are ignored.
    pub fn from_voigt_matrix(dim: usize, matrix: Matrix6<T>) -> Result<Self, MaterialError> {
        check_dimension(dim)?;
        let n = voigt_size(dim);
        let mut voigt = Matrix6::zeros();
        voigt
            .view_mut((0, 0), (n, n))
            .copy_from(&matrix.view((0, 0), (n, n)));
        Ok(Self { dim, voigt })
    }

    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn from_lame(dim: usize, lame: LameParameters<T>) -> Result<Self, MaterialError> {
        check_dimension(dim)?;
        let LameParameters { mu, lambda } = lame;
        let mut voigt = Matrix6::zeros();
        if dim == 1 {
            // The uniaxial modulus, E = mu (3 lambda + 2 mu) / (lambda + mu)
            voigt[(0, 0)] = mu * (3.0 * lambda + 2.0 * mu) / (lambda + mu);
        } else {
            for i in 0..dim {
                for j in 0..dim {
                    voigt[(i, j)] = lambda;
                }
                voigt[(i, i)] = lambda + 2.0 * mu;
            }
            for k in dim..voigt_size(dim) {
                voigt[(k, k)] = mu;
            }
        }
        Ok(Self { dim, voigt })
    }

    /// Builds the elasticity tensor described by the given material model.
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn from_model(dim: usize, model: &MaterialModel<T>) -> Result<Self, MaterialError> {
        use MaterialSymmetry::*;
        check_dimension(dim)?;
        let symmetry = model.symmetry;
        let c = &model.constants;

        let expected = match (symmetry, dim) {
            (Isotropic, _) => 2,
            (Transverse, 3) => 5,
            (Orthotropic, 3) => 9,
            (Anisotropic, 2) => 6,
            (Anisotropic, 3) => 21,
            _ => return Err(MaterialError::UnsupportedSymmetry { symmetry, dim }),
        };
        if c.len() != expected {
            return Err(MaterialError::WrongNumberOfConstants {
                symmetry,
                dim,
                expected,
                actual: c.len(),
            });
        }
        if let Some(index) = c.iter().position(|c_i| !c_i.is_finite()) {
            return Err(MaterialError::NonFiniteConstant { index });
        }

        let mut voigt = Matrix6::zeros();
        let mut set = |i: usize, j: usize, value: T| {
            voigt[(i, j)] = value;
            voigt[(j, i)] = value;
        };

        match (symmetry, dim) {
            (Isotropic, 1) => set(0, 0, c[0]),
            (Isotropic, _) => {
                let lame = LameParameters::from(YoungPoisson {
                    young: c[0],
                    poisson: c[1],
                });
                return Self::from_lame(dim, lame);
            }
            (Transverse, _) => {
                let [c11, c33, c44, c12, c13] = [c[0], c[1], c[2], c[3], c[4]];
                set(0, 0, c11);
                set(1, 1, c11);
                set(2, 2, c33);
                set(3, 3, c44);
                set(4, 4, c44);
                set(5, 5, 0.5 * (c11 - c12));
                set(0, 1, c12);
                set(0, 2, c13);
                set(1, 2, c13);
            }
            (Orthotropic, _) => {
                for (&(i, j), &value) in ORTHOTROPIC_ORDER.iter().zip(c) {
                    set(i, j, value);
                }
            }
            (Anisotropic, 2) => {
                for (&(i, j), &value) in ANISOTROPIC_2D_ORDER.iter().zip(c) {
                    set(i, j, value);
                }
            }
            (Anisotropic, _) => {
                for (&(i, j), &value) in ANISOTROPIC_3D_ORDER.iter().zip(c) {
                    set(i, j, value);
                }
            }
        }

        Ok(Self { dim, voigt })
    }

    /// The phase-interpolated tensor `C_alpha (1 - h) + C_beta h`.
    ///
    /// Here `h` is the sum of the interpolation functions of all order parameters.
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn interpolate(alpha: &Self, beta: &Self, h: T) -> Self {
        assert_eq!(alpha.dim, beta.dim, "tensors must have the same dimension");
        Self {
            dim: alpha.dim,
            voigt: alpha.voigt * (1.0 - h) + beta.voigt * h,
        }
    }

    /// The difference `beta - alpha` between two tensors.
    pub fn difference(beta: &Self, alpha: &Self) -> Self {
        assert_eq!(alpha.dim, beta.dim, "tensors must have the same dimension");
        Self {
            dim: alpha.dim,
            voigt: beta.voigt - alpha.voigt,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn voigt_size(&self) -> usize {
        voigt_size(self.dim)
    }

    pub fn voigt_matrix(&self) -> &Matrix6<T> {
        &self.voigt
    }

    /// Entry of the tensor at the given Voigt indices.
    pub fn voigt_entry(&self, i: usize, j: usize) -> T {
        self.voigt[(i, j)]
    }

    pub fn is_symmetric(&self, tol: T) -> bool {
        let n = self.voigt_size();
        (0..n).all(|i| (0..n).all(|j| (self.voigt[(i, j)] - self.voigt[(j, i)]).abs() <= tol))
    }

    /// Computes the stress `S = C : E` for the given (symmetric) strain tensor.
    ///
    /// # Panics
    ///
    /// Panics if `D` differs from the dimension of the tensor.
    pub fn compute_stress<const D: usize>(&self, strain: &SMatrix<T, D, D>) -> SMatrix<T, D, D> {
        assert_eq!(D, self.dim, "strain dimension must match the dimension of the elasticity tensor");
        let strain_voigt = strain_to_voigt(strain);
        stress_from_voigt(&(self.voigt * strain_voigt))
    }

    /// The strain energy density `E : C : E / 2`.
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    pub fn energy_density<const D: usize>(&self, strain: &SMatrix<T, D, D>) -> T {
        0.5 * self.compute_stress(strain).dot(strain)
    }
}

/// Computes the stress `S = C : E` for the given (symmetric) strain tensor.
pub fn compute_stress<T, const D: usize>(
    elasticity: &ElasticityTensor<T>,
    strain: &SMatrix<T, D, D>,
) -> SMatrix<T, D, D>
where
    T: RealField + Copy,
{
    elasticity.compute_stress(strain)
}

fn check_dimension(dim: usize) -> Result<(), MaterialError> {
    if (1..=3).contains(&dim) {
        debug_assert_eq!(voigt_index_pairs(dim).len(), voigt_size(dim));
        Ok(())
    } else {
        Err(MaterialError::UnsupportedDimension { dim })
    }
}
