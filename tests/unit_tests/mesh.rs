use nalgebra::{Vector2, Vector3};
use phasefield::mesh::{block_range, Partition, UniformGrid};
use proptest::prelude::*;

#[test]
fn grid_sizes_2d() {
    let grid = UniformGrid::from_extents([4.0, 3.0], [4, 2]).unwrap();
    assert_eq!(grid.num_cells(), 8);
    assert_eq!(grid.num_vertices(), 15);
    assert_eq!(grid.vertices_per_dim(), [5, 3]);
    assert_eq!(UniformGrid::<2>::vertices_per_cell(), 4);
    assert_eq!(grid.cell_size(), Vector2::new(1.0, 1.5));
    assert_eq!(grid.cell_volume(), 1.5);
    assert_eq!(grid.domain_volume(), 12.0);
}

#[test]
fn vertex_numbering_is_lexicographic() {
    let grid = UniformGrid::new(Vector2::new(-1.0, 2.0), Vector2::new(2.0, 2.0), [2, 2]).unwrap();
    assert_eq!(grid.vertex_multi_index(0), [0, 0]);
    assert_eq!(grid.vertex_multi_index(1), [1, 0]);
    assert_eq!(grid.vertex_multi_index(3), [0, 1]);
    assert_eq!(grid.vertex_index([2, 2]), 8);
    assert_eq!(grid.vertex_position(0), Vector2::new(-1.0, 2.0));
    assert_eq!(grid.vertex_position(5), Vector2::new(1.0, 3.0));
}

#[test]
fn cell_vertices_2d() {
    let grid = UniformGrid::from_extents([3.0, 2.0], [3, 2]).unwrap();
    let mut vertices = [0; 4];

    grid.populate_cell_vertices(&mut vertices, 0);
    assert_eq!(vertices, [0, 1, 4, 5]);

    // Cell (2, 1)
    grid.populate_cell_vertices(&mut vertices, 5);
    assert_eq!(vertices, [6, 7, 10, 11]);
    assert_eq!(grid.cell_origin(5), Vector2::new(2.0, 1.0));
}

#[test]
fn cell_vertices_3d() {
    let grid = UniformGrid::from_extents([1.0, 1.0, 1.0], [1, 1, 1]).unwrap();
    let mut vertices = [0; 8];
    grid.populate_cell_vertices(&mut vertices, 0);
    assert_eq!(vertices, [0, 1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(grid.vertex_position(6), Vector3::new(0.0, 1.0, 1.0));
}

#[test]
fn boundary_vertices() {
    let grid = UniformGrid::from_extents([2.0, 2.0], [2, 2]).unwrap();
    let boundary: Vec<_> = (0..grid.num_vertices())
        .filter(|&v| grid.is_boundary_vertex(v))
        .collect();
    assert_eq!(boundary, [0, 1, 2, 3, 5, 6, 7, 8]);
}

#[test]
fn invalid_grids_are_rejected() {
    assert!(UniformGrid::from_extents([1.0, 0.0], [1, 1]).is_err());
    assert!(UniformGrid::from_extents([1.0, f64::NAN], [1, 1]).is_err());
    assert!(UniformGrid::from_extents([1.0, 1.0], [0, 1]).is_err());
    assert!(UniformGrid::<4>::from_extents([1.0; 4], [1; 4]).is_err());
}

#[test]
fn serial_partition_owns_everything() {
    let grid = UniformGrid::from_extents([2.0, 2.0], [2, 3]).unwrap();
    let partition = Partition::serial(&grid);
    assert_eq!(partition.cells, 0..6);
    assert_eq!(partition.vertices, 0..12);
    assert!(partition.owns_vertex(11));
    assert!(!partition.owns_vertex(12));
}

#[test]
fn block_range_distributes_remainder_first() {
    assert_eq!(block_range(10, 3, 0), 0..4);
    assert_eq!(block_range(10, 3, 1), 4..7);
    assert_eq!(block_range(10, 3, 2), 7..10);
    assert_eq!(block_range(2, 4, 3), 2..2);
}

proptest! {
    #[test]
    fn block_ranges_cover_without_overlap(total in 0..200usize, parts in 1..12usize) {
        let mut next = 0;
        for part in 0..parts {
            let range = block_range(total, parts, part);
            prop_assert_eq!(range.start, next);
            prop_assert!(range.len() <= total / parts + 1);
            next = range.end;
        }
        prop_assert_eq!(next, total);
    }

    #[test]
    fn vertex_index_roundtrip(nx in 1..10usize, ny in 1..10usize, nz in 1..10usize, seed in 0..10000usize) {
        let grid = UniformGrid::from_extents([1.0, 2.0, 3.0], [nx, ny, nz]).unwrap();
        let v = seed % grid.num_vertices();
        prop_assert_eq!(grid.vertex_index(grid.vertex_multi_index(v)), v);
    }
}
