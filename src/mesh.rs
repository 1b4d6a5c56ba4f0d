//! Structured grids of axis-aligned box cells and their partitioning across workers.
//!
//! Vertices and cells are numbered lexicographically with the first coordinate varying
//! fastest. The local vertices of a cell are numbered in the same fashion: bit `k` of the
//! local index tells whether the vertex lies on the upper (1) or lower (0) face of the cell
//! in direction `k`.
use eyre::eyre;
use nalgebra::SVector;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub struct UniformGrid<const D: usize> {
    origin: SVector<f64, D>,
    extents: SVector<f64, D>,
    cells_per_dim: [usize; D],
}

impl<const D: usize> UniformGrid<D> {
    pub fn new(origin: SVector<f64, D>, extents: SVector<f64, D>, cells_per_dim: [usize; D]) -> eyre::Result<Self> {
        if !(1..=3).contains(&D) {
            return Err(eyre!("grids are only supported in 1, 2 and 3 dimensions, got {D}"));
        }
        if let Some(extent) = extents.iter().find(|e| !(e.is_finite() && **e > 0.0)) {
            return Err(eyre!("grid extents must be positive and finite, got {extent}"));
        }
        if !origin.iter().all(|x| x.is_finite()) {
            return Err(eyre!("grid origin must be finite"));
        }
        if cells_per_dim.iter().any(|&n| n == 0) {
            return Err(eyre!("grid needs at least one cell in each direction, got {cells_per_dim:?}"));
        }
        Ok(Self {
            origin,
            extents,
            cells_per_dim,
        })
    }

    /// A grid covering `[0, extents[0]] x ... x [0, extents[D - 1]]`.
    pub fn from_extents(extents: [f64; D], cells_per_dim: [usize; D]) -> eyre::Result<Self> {
        Self::new(SVector::zeros(), SVector::from(extents), cells_per_dim)
    }

    pub fn origin(&self) -> &SVector<f64, D> {
        &self.origin
    }

    pub fn extents(&self) -> &SVector<f64, D> {
        &self.extents
    }

    pub fn cells_per_dim(&self) -> [usize; D] {
        self.cells_per_dim
    }

    pub fn vertices_per_dim(&self) -> [usize; D] {
        self.cells_per_dim.map(|n| n + 1)
    }

    pub fn num_cells(&self) -> usize {
        self.cells_per_dim.iter().product()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices_per_dim().iter().product()
    }

    pub const fn vertices_per_cell() -> usize {
        1 << D
    }

    pub fn cell_size(&self) -> SVector<f64, D> {
        SVector::from_fn(|k, _| self.extents[k] / self.cells_per_dim[k] as f64)
    }

    pub fn cell_volume(&self) -> f64 {
        self.cell_size().product()
    }

    pub fn domain_volume(&self) -> f64 {
        self.extents.product()
    }

    pub fn vertex_multi_index(&self, vertex_index: usize) -> [usize; D] {
        unravel(vertex_index, self.vertices_per_dim())
    }

    pub fn vertex_index(&self, multi_index: [usize; D]) -> usize {
        ravel(multi_index, self.vertices_per_dim())
    }

    pub fn vertex_position(&self, vertex_index: usize) -> SVector<f64, D> {
        let multi_index = self.vertex_multi_index(vertex_index);
        let h = self.cell_size();
        SVector::from_fn(|k, _| self.origin[k] + multi_index[k] as f64 * h[k])
    }

    pub fn cell_multi_index(&self, cell_index: usize) -> [usize; D] {
        unravel(cell_index, self.cells_per_dim)
    }

    /// Position of the lower corner of the given cell.
    pub fn cell_origin(&self, cell_index: usize) -> SVector<f64, D> {
        let multi_index = self.cell_multi_index(cell_index);
        let h = self.cell_size();
        SVector::from_fn(|k, _| self.origin[k] + multi_index[k] as f64 * h[k])
    }

    /// Writes the global indices of the vertices of a cell into `output`.
    ///
    /// # Panics
    ///
    /// Panics if `output` does not have exactly `2^D` entries.
    pub fn populate_cell_vertices(&self, output: &mut [usize], cell_index: usize) {
        assert_eq!(output.len(), Self::vertices_per_cell());
        let cell = self.cell_multi_index(cell_index);
        for (local_index, global_index) in output.iter_mut().enumerate() {
            let mut vertex = cell;
            for (k, v_k) in vertex.iter_mut().enumerate() {
                *v_k += (local_index >> k) & 1;
            }
            *global_index = self.vertex_index(vertex);
        }
    }

    pub fn is_boundary_vertex(&self, vertex_index: usize) -> bool {
        self.vertex_multi_index(vertex_index)
            .iter()
            .zip(&self.cells_per_dim)
            .any(|(&i, &n)| i == 0 || i == n)
    }

    /// The cells and vertices owned by worker `rank` out of `num_workers`.
    ///
    /// Both cells and vertices are split into contiguous blocks of nearly equal size.
    pub fn partition(&self, num_workers: usize, rank: usize) -> Partition {
        assert!(rank < num_workers, "rank {rank} out of bounds for {num_workers} workers");
        Partition {
            rank,
            num_workers,
            cells: block_range(self.num_cells(), num_workers, rank),
            vertices: block_range(self.num_vertices(), num_workers, rank),
        }
    }
}

/// Ownership of cells and vertices of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub rank: usize,
    pub num_workers: usize,
    pub cells: Range<usize>,
    pub vertices: Range<usize>,
}

impl Partition {
    /// The partition of a run with a single worker.
    pub fn serial<const D: usize>(grid: &UniformGrid<D>) -> Self {
        grid.partition(1, 0)
    }

    pub fn owns_vertex(&self, vertex_index: usize) -> bool {
        self.vertices.contains(&vertex_index)
    }

    pub fn owns_cell(&self, cell_index: usize) -> bool {
        self.cells.contains(&cell_index)
    }
}

/// Splits `0 .. total` into `num_parts` contiguous ranges and returns range number `part`.
///
/// The first `total % num_parts` ranges receive one extra item.
pub fn block_range(total: usize, num_parts: usize, part: usize) -> Range<usize> {
    assert!(num_parts > 0, "need at least one part");
    let base = total / num_parts;
    let remainder = total % num_parts;
    let begin = part * base + part.min(remainder);
    let len = base + usize::from(part < remainder);
    begin..(begin + len).min(total)
}

fn unravel<const D: usize>(mut index: usize, dims: [usize; D]) -> [usize; D] {
    let mut multi_index = [0; D];
    for (i, n) in multi_index.iter_mut().zip(dims) {
        *i = index % n;
        index /= n;
    }
    multi_index
}

fn ravel<const D: usize>(multi_index: [usize; D], dims: [usize; D]) -> usize {
    multi_index
        .iter()
        .zip(dims)
        .rev()
        .fold(0, |index, (&i, n)| index * n + i)
}
