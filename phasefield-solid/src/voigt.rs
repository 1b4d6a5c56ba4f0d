//! Conversion between symmetric tensors and their Voigt vectors.
//!
//! Normal components come first, followed by the shear components. In 2D the ordering is
//! `(xx, yy, xy)` and in 3D it is `(xx, yy, zz, yz, xz, xy)`. Strains are stored with
//! *engineering* shear components `e_ij + e_ji`, stresses with the plain components `s_ij`.
//! Voigt vectors are stored in fixed-size 6-vectors whose trailing entries are unused for
//! dimensions below 3.

use nalgebra::{RealField, SMatrix, Vector6};

/// The number of independent components of a symmetric `dim x dim` tensor.
pub const fn voigt_size(dim: usize) -> usize {
    2 * dim - 1 + dim / 3
}

/// Tensor index pairs corresponding to each Voigt component.
///
/// # Panics
///
/// Panics if `dim` is not 1, 2 or 3.
pub fn voigt_index_pairs(dim: usize) -> &'static [(usize, usize)] {
    match dim {
        1 => &[(0, 0)],
        2 => &[(0, 0), (1, 1), (0, 1)],
        3 => &[(0, 0), (1, 1), (2, 2), (1, 2), (0, 2), (0, 1)],
        _ => panic!("Voigt notation is only supported for dimensions 1, 2 and 3, got {dim}"),
    }
}

/// Voigt vector of a strain tensor, using engineering shear strains.
pub fn strain_to_voigt<T, const D: usize>(strain: &SMatrix<T, D, D>) -> Vector6<T>
where
    T: RealField + Copy,
{
    let mut voigt = Vector6::zeros();
    for (k, &(i, j)) in voigt_index_pairs(D).iter().enumerate() {
        voigt[k] = if i == j {
            strain[(i, i)]
        } else {
            strain[(i, j)] + strain[(j, i)]
        };
    }
    voigt
}

/// Symmetric stress tensor from its Voigt vector.
pub fn stress_from_voigt<T, const D: usize>(voigt: &Vector6<T>) -> SMatrix<T, D, D>
where
    T: RealField + Copy,
{
    let mut stress = SMatrix::zeros();
    for (k, &(i, j)) in voigt_index_pairs(D).iter().enumerate() {
        stress[(i, j)] = voigt[k];
        stress[(j, i)] = voigt[k];
    }
    stress
}
