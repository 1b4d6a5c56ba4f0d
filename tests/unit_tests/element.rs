use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{SMatrix, SVector};
use phasefield::element::{
    multilinear_reference_gradient, multilinear_reference_hessian, multilinear_value, BasisTable, QuadratureKind,
};
use phasefield::mesh::UniformGrid;
use proptest::prelude::*;

#[test]
fn multilinear_basis_is_nodal() {
    // Vertices of the reference cell in local numbering
    let vertices = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
    for (a, _) in vertices.iter().enumerate() {
        for (b, xi) in vertices.iter().enumerate() {
            let expected = if a == b { 1.0 } else { 0.0 };
            assert_eq!(multilinear_value(a, xi), expected);
        }
    }
}

#[test]
fn multilinear_hessian_has_only_mixed_derivatives() {
    let xi = [0.3, 0.8, 0.1];
    let hessian = multilinear_reference_hessian::<3>(7, &xi);
    assert_eq!(hessian[(0, 0)], 0.0);
    assert_scalar_eq!(hessian[(0, 1)], 0.1, comp = abs, tol = 1e-14);
    assert_scalar_eq!(hessian[(1, 2)], 0.3, comp = abs, tol = 1e-14);
    assert_matrix_eq!(hessian, hessian.transpose());
}

#[test]
fn lobatto_table_has_diagonal_mass() {
    let grid = UniformGrid::from_extents([4.0, 3.0], [2, 3]).unwrap();
    let table = BasisTable::new(&grid, QuadratureKind::GaussLobatto, 2).unwrap();
    assert_eq!(table.num_quadrature_points(), 4);
    assert_eq!(table.num_nodes(), 4);

    for q in 0..4 {
        let nonzero: Vec<_> = (0..4)
            .filter(|&a| table.value(q, a).abs() > 1e-14)
            .collect();
        assert_eq!(nonzero.len(), 1);
        assert_scalar_eq!(table.jxw(q), 0.5, comp = abs, tol = 1e-14);
    }
}

#[test]
fn gradients_are_scaled_by_cell_size() {
    let grid = UniformGrid::from_extents([2.0, 6.0], [1, 2]).unwrap();
    let table = BasisTable::new(&grid, QuadratureKind::Gauss, 1).unwrap();
    // Single point at the cell center, cell size (2, 3)
    assert_eq!(table.reference_point(0), &[0.5, 0.5]);
    assert_scalar_eq!(table.jxw(0), 6.0, comp = abs, tol = 1e-13);
    let expected = SVector::<f64, 2>::new(-0.5 / 2.0, -0.5 / 3.0);
    assert_matrix_eq!(*table.gradient(0, 0), expected, comp = abs, tol = 1e-14);
    let expected_hessian = SMatrix::<f64, 2, 2>::new(0.0, 1.0 / 6.0, 1.0 / 6.0, 0.0);
    assert_matrix_eq!(*table.hessian(0, 0), expected_hessian, comp = abs, tol = 1e-14);
}

#[test]
fn lobatto_with_one_point_is_rejected() {
    let grid = UniformGrid::from_extents([1.0], [1]).unwrap();
    assert!(BasisTable::new(&grid, QuadratureKind::GaussLobatto, 1).is_err());
    assert!(BasisTable::new(&grid, QuadratureKind::Gauss, 0).is_err());
}

proptest! {
    #[test]
    fn partition_of_unity(x in 0.0..=1.0, y in 0.0..=1.0, z in 0.0..=1.0) {
        let xi = [x, y, z];
        let sum: f64 = (0..8).map(|a| multilinear_value(a, &xi)).sum();
        let gradient_sum: SVector<f64, 3> = (0..8).map(|a| multilinear_reference_gradient(a, &xi)).sum();
        prop_assert!((sum - 1.0).abs() < 1e-13);
        prop_assert!(gradient_sum.norm() < 1e-13);
    }

    #[test]
    fn weights_sum_to_cell_volume(n in 1..5usize, lobatto in any::<bool>()) {
        let grid = UniformGrid::from_extents([1.5, 0.5, 2.0], [3, 1, 4]).unwrap();
        let (kind, n) = if lobatto { (QuadratureKind::GaussLobatto, n + 1) } else { (QuadratureKind::Gauss, n) };
        let table = BasisTable::new(&grid, kind, n).unwrap();
        let total: f64 = (0..table.num_quadrature_points()).map(|q| table.jxw(q)).sum();
        prop_assert!((total - grid.cell_volume()).abs() < 1e-12);
    }
}
