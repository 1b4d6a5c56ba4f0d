use super::{strain_2d, strain_3d};
use nalgebra::{matrix, vector, Matrix2, Vector6};
use phasefield_solid::voigt::{stress_from_voigt, strain_to_voigt, voigt_index_pairs, voigt_size};

#[test]
fn voigt_sizes() {
    assert_eq!(voigt_size(1), 1);
    assert_eq!(voigt_size(2), 3);
    assert_eq!(voigt_size(3), 6);
    for dim in 1..=3 {
        assert_eq!(voigt_index_pairs(dim).len(), voigt_size(dim));
    }
}

#[test]
#[should_panic]
fn voigt_index_pairs_reject_four_dimensions() {
    voigt_index_pairs(4);
}

#[test]
fn strain_voigt_uses_engineering_shear() {
    let voigt = strain_to_voigt(&strain_2d());
    assert_eq!(voigt, vector![1.0e-3, -4.0e-3, 4.0e-3, 0.0, 0.0, 0.0]);

    let voigt = strain_to_voigt(&strain_3d());
    assert_eq!(voigt, vector![1.0e-3, 5.0e-3, -3.0e-3, 1.0e-3, -3.0e-3, 4.0e-3]);
}

#[test]
fn strain_voigt_symmetrizes_non_symmetric_input() {
    let gradient: Matrix2<f64> = matrix![1.0, 2.0;
                                         4.0, 3.0];
    let voigt = strain_to_voigt(&gradient);
    assert_eq!(voigt.fixed_rows::<3>(0).clone_owned(), vector![1.0, 3.0, 6.0]);
}

#[test]
fn stress_from_voigt_is_symmetric() {
    let voigt = Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
    let stress = stress_from_voigt::<f64, 3>(&voigt);
    assert_eq!(
        stress,
        matrix![1.0, 6.0, 5.0;
                6.0, 2.0, 4.0;
                5.0, 4.0, 3.0]
    );

    let stress = stress_from_voigt::<f64, 2>(&voigt);
    assert_eq!(
        stress,
        matrix![1.0, 3.0;
                3.0, 2.0]
    );
}
