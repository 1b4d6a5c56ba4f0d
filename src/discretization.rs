//! The grid, basis table and ownership information of one worker, and the parallel loop
//! over owned cells.
use crate::element::{BasisTable, QuadratureKind};
use crate::mesh::{Partition, UniformGrid};
use nalgebra::DVector;
use phasefield_comm::Communicator;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct Discretization<const D: usize> {
    grid: UniformGrid<D>,
    table: BasisTable<D>,
    partition: Partition,
}

impl<const D: usize> Discretization<D> {
    pub fn new(
        grid: UniformGrid<D>,
        quadrature: QuadratureKind,
        num_points_per_dim: usize,
        partition: Partition,
    ) -> eyre::Result<Self> {
        eyre::ensure!(
            partition.cells.end <= grid.num_cells() && partition.vertices.end <= grid.num_vertices(),
            "partition {partition:?} does not fit the grid"
        );
        let table = BasisTable::new(&grid, quadrature, num_points_per_dim)?;
        Ok(Self {
            grid,
            table,
            partition,
        })
    }

    /// A discretization of the whole grid for a single worker.
    pub fn serial(grid: UniformGrid<D>, quadrature: QuadratureKind, num_points_per_dim: usize) -> eyre::Result<Self> {
        let partition = Partition::serial(&grid);
        Self::new(grid, quadrature, num_points_per_dim, partition)
    }

    pub fn grid(&self) -> &UniformGrid<D> {
        &self.grid
    }

    pub fn table(&self) -> &BasisTable<D> {
        &self.table
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Calls `f` for every owned cell in parallel and sums the contributions written to the
    /// output vectors, whose lengths are given by `output_lengths`.
    ///
    /// Each parallel task creates its own state with `make_state`, typically a set of
    /// samplers, and writes into its own output buffers. Only the contributions of this
    /// worker are returned. Combine them across workers with
    /// [`Communicator::all_reduce_sum`].
    pub fn cell_loop<S, F>(
        &self,
        output_lengths: &[usize],
        make_state: impl Fn() -> S + Sync + Send,
        f: F,
    ) -> Vec<DVector<f64>>
    where
        S: Send,
        F: Fn(&mut S, usize, &mut [DVector<f64>]) + Sync + Send,
    {
        let zeros = || -> Vec<DVector<f64>> {
            output_lengths
                .iter()
                .map(|&len| DVector::zeros(len))
                .collect()
        };

        self.partition
            .cells
            .clone()
            .into_par_iter()
            .with_min_len(64)
            .fold(
                || (make_state(), zeros()),
                |(mut state, mut outputs), cell| {
                    f(&mut state, cell, &mut outputs);
                    (state, outputs)
                },
            )
            .map(|(_, outputs)| outputs)
            .reduce(zeros, |mut a, b| {
                for (a_i, b_i) in a.iter_mut().zip(b) {
                    *a_i += b_i;
                }
                a
            })
    }

    /// Sums cell contributions of all workers.
    pub fn sum_contributions<C: Communicator>(&self, comm: &C, vectors: &mut [DVector<f64>]) -> eyre::Result<()> {
        for vector in vectors {
            comm.all_reduce_sum(vector.as_mut_slice())?;
        }
        Ok(())
    }

    /// Makes the entries of `vector` at vertices owned by this worker visible to all other
    /// workers. Entries at vertices not owned by any worker are lost, so every worker must
    /// have written its owned entries. `components` is the number of entries per vertex.
    pub fn synchronize_owned<C: Communicator>(
        &self,
        comm: &C,
        vector: &mut DVector<f64>,
        components: usize,
    ) -> eyre::Result<()> {
        if comm.size() == 1 {
            return Ok(());
        }
        let owned = self.partition.vertices.start * components..self.partition.vertices.end * components;
        let mut buffer = DVector::zeros(vector.len());
        buffer
            .rows_range_mut(owned.clone())
            .copy_from(&vector.rows_range(owned));
        comm.all_reduce_sum(buffer.as_mut_slice())?;
        *vector = buffer;
        Ok(())
    }
}
