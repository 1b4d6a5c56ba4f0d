//! Stochastic nucleation of precipitates, coordinated across workers.
//!
//! Every worker proposes candidate nuclei at the vertices it owns. The candidates of all
//! workers are collected on the root, filtered there so that no two nuclei are closer than
//! the minimum distance, and the resulting list is broadcast back to every worker. Each
//! worker then seeds the nuclei into the vertices it owns by overwriting an order parameter
//! with a smooth `tanh` profile.
use crate::mesh::{Partition, UniformGrid};
use eyre::eyre;
use log::{debug, info};
use nalgebra::{DVector, SVector};
use phasefield_comm::Communicator;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

mod filter;
mod protocol;

pub use filter::*;
pub use protocol::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NucleationParameters {
    #[serde(default = "default_radius")]
    pub radius: f64,
    /// Minimum distance between the centers of two nuclei. Defaults to four radii.
    #[serde(default)]
    pub min_distance: Option<f64>,
    /// Width of the `tanh` profile of a seeded nucleus.
    #[serde(default = "default_interface_width")]
    pub interface_width: f64,
    /// How long a nucleus keeps being seeded after its creation. Defaults to 10000 time steps.
    #[serde(default)]
    pub seeding_duration: Option<f64>,
    #[serde(default = "default_prefactor")]
    pub prefactor: f64,
    /// Concentration at which the nucleation probability equals the prefactor scaled by the
    /// relative cell volume.
    #[serde(default = "default_reference_concentration")]
    pub reference_concentration: f64,
    /// Vertices where the order parameters sum to more than this are considered transformed
    /// and do not nucleate.
    #[serde(default = "default_transformed_threshold")]
    pub transformed_threshold: f64,
    /// No candidates are generated after this time.
    #[serde(default)]
    pub cutoff_time: Option<f64>,
    /// Nucleation is only performed up to and including this increment.
    #[serde(default)]
    pub last_increment: Option<usize>,
    /// Index of the order parameter that nuclei are seeded into.
    #[serde(default)]
    pub order_parameter: usize,
    /// Seed of the random number generators. The generator of each worker is seeded with
    /// `seed + rank`. Generators are seeded from system entropy if not given.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_radius() -> f64 {
    2.5
}

fn default_interface_width() -> f64 {
    0.4
}

fn default_prefactor() -> f64 {
    0.01
}

fn default_reference_concentration() -> f64 {
    0.3
}

fn default_transformed_threshold() -> f64 {
    1e-6
}

impl Default for NucleationParameters {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            min_distance: None,
            interface_width: default_interface_width(),
            seeding_duration: None,
            prefactor: default_prefactor(),
            reference_concentration: default_reference_concentration(),
            transformed_threshold: default_transformed_threshold(),
            cutoff_time: None,
            last_increment: None,
            order_parameter: 0,
            seed: None,
        }
    }
}

impl NucleationParameters {
    pub fn validate(&self, num_order_parameters: usize) -> eyre::Result<()> {
        let positive = [
            ("radius", Some(self.radius)),
            ("minimum distance", self.min_distance),
            ("interface width", Some(self.interface_width)),
            ("seeding duration", self.seeding_duration),
            ("reference concentration", Some(self.reference_concentration)),
        ];
        for (description, value) in positive {
            if let Some(value) = value {
                eyre::ensure!(
                    value.is_finite() && value > 0.0,
                    "{description} must be positive and finite, got {value}"
                );
            }
        }
        eyre::ensure!(
            self.prefactor.is_finite() && self.prefactor >= 0.0,
            "prefactor must be non-negative and finite, got {}",
            self.prefactor
        );
        eyre::ensure!(
            self.transformed_threshold.is_finite(),
            "transformed threshold must be finite"
        );
        if self.order_parameter >= num_order_parameters {
            return Err(eyre!(
                "nuclei are seeded into order parameter {}, but the model only has {num_order_parameters}",
                self.order_parameter
            ));
        }
        Ok(())
    }

    pub fn min_distance(&self) -> f64 {
        self.min_distance.unwrap_or(4.0 * self.radius)
    }

    pub fn seeding_duration(&self, time_step: f64) -> f64 {
        self.seeding_duration.unwrap_or(10000.0 * time_step)
    }

    /// The order parameter profile of a nucleus at distance `r` from its center.
    pub fn profile(&self, r: f64) -> f64 {
        0.5 * (1.0 - ((r - self.radius) / self.interface_width).tanh())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Nucleus<const D: usize> {
    /// Position in the global list of nuclei.
    pub index: usize,
    pub center: SVector<f64, D>,
    pub radius: f64,
    pub seeded_time: f64,
    pub seeding_duration: f64,
}

impl<const D: usize> Nucleus<D> {
    /// Whether the nucleus is still being seeded at time `t`.
    pub fn is_seeding_at(&self, t: f64) -> bool {
        t > self.seeded_time && t < self.seeded_time + self.seeding_duration
    }

    pub fn distance_to(&self, point: &SVector<f64, D>) -> f64 {
        (self.center - point).norm()
    }
}

/// Summary of one nucleation increment on this worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NucleationReport {
    /// Candidates proposed on this worker that survived local deduplication.
    pub new_local_candidates: usize,
    /// Nuclei accepted globally in this increment.
    pub new_nuclei: usize,
    /// Owned vertices whose order parameter was overwritten.
    pub seeded_vertices: usize,
}

/// Per-worker state of the nucleation model.
#[derive(Debug, Clone)]
pub struct NucleationCoordinator<const D: usize> {
    parameters: NucleationParameters,
    seeding_duration: f64,
    // Every candidate this worker has ever proposed. The list is resent in full each
    // increment and therefore grows without bound over the nucleation window.
    local_candidates: Vec<Nucleus<D>>,
    nuclei: Vec<Nucleus<D>>,
    rng: ChaCha8Rng,
}

impl<const D: usize> NucleationCoordinator<D> {
    pub fn new(parameters: NucleationParameters, time_step: f64, rank: usize) -> Self {
        let rng = match parameters.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(rank as u64)),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            seeding_duration: parameters.seeding_duration(time_step),
            parameters,
            local_candidates: Vec::new(),
            nuclei: Vec::new(),
            rng,
        }
    }

    pub fn parameters(&self) -> &NucleationParameters {
        &self.parameters
    }

    /// Candidates proposed by this worker so far.
    pub fn local_candidates(&self) -> &[Nucleus<D>] {
        &self.local_candidates
    }

    /// The global list of accepted nuclei, identical on every worker after
    /// [`synchronize`](Self::synchronize).
    pub fn nuclei(&self) -> &[Nucleus<D>] {
        &self.nuclei
    }

    pub fn is_nucleation_increment(&self, increment: usize) -> bool {
        self.parameters
            .last_increment
            .map_or(true, |last| increment <= last)
    }

    /// Probability that a nucleus forms at a vertex with the given state during one increment.
    ///
    /// The probability vanishes after the cutoff time, in transformed regions and where the
    /// concentration is not positive.
    pub fn nucleation_probability(
        &self,
        grid: &UniformGrid<D>,
        time: f64,
        concentration: f64,
        order_parameter_sum: f64,
    ) -> f64 {
        let params = &self.parameters;
        let after_cutoff = params.cutoff_time.map_or(false, |cutoff| time > cutoff);
        if after_cutoff || order_parameter_sum > params.transformed_threshold || concentration <= 0.0 {
            0.0
        } else {
            params.prefactor * (concentration / params.reference_concentration) * grid.cell_volume()
                / grid.domain_volume()
        }
    }

    /// Adds a candidate to the local list unless it lies closer than the minimum distance to
    /// a candidate this worker proposed before.
    pub fn propose_local_candidate(&mut self, center: SVector<f64, D>, time: f64) -> bool {
        let min_distance = self.parameters.min_distance();
        let is_close = self
            .local_candidates
            .iter()
            .any(|candidate| candidate.distance_to(&center) < min_distance);
        if is_close {
            return false;
        }
        self.local_candidates.push(Nucleus {
            index: self.local_candidates.len(),
            center,
            radius: self.parameters.radius,
            seeded_time: time,
            seeding_duration: self.seeding_duration,
        });
        true
    }

    /// Draws candidates at the owned vertices and returns the number of new local candidates.
    pub fn generate_local_candidates(
        &mut self,
        grid: &UniformGrid<D>,
        partition: &Partition,
        time: f64,
        concentration: &DVector<f64>,
        order_parameters: &[&DVector<f64>],
    ) -> usize {
        let mut num_new = 0;
        for v in partition.vertices.clone() {
            let order_parameter_sum: f64 = order_parameters.iter().map(|n| n[v]).sum();
            let probability = self.nucleation_probability(grid, time, concentration[v], order_parameter_sum);
            if probability <= 0.0 {
                continue;
            }
            let u: f64 = self.rng.gen();
            if u < probability && self.propose_local_candidate(grid.vertex_position(v), time) {
                debug!("Worker {} proposed a nucleus at vertex {v}", partition.rank);
                num_new += 1;
            }
        }
        num_new
    }

    /// Gathers the candidates of all workers on the root, filters them there and replaces the
    /// global list on every worker. Returns the number of newly accepted nuclei.
    pub fn synchronize<C: Communicator>(&mut self, comm: &C) -> eyre::Result<usize> {
        let previous = self.nuclei.len();
        let candidates = gather_candidates(comm, &self.local_candidates)?;
        let filtered = candidates
            .map(|candidates| filter_candidates(&self.nuclei, candidates, self.parameters.min_distance()));
        self.nuclei = broadcast_nuclei(comm, filtered.as_deref())?;

        if self.nuclei.len() < previous {
            return Err(eyre!(
                "nucleus list shrank from {previous} to {} entries during synchronization",
                self.nuclei.len()
            ));
        }
        let num_new = self.nuclei.len() - previous;
        if num_new > 0 && comm.is_root() {
            for nucleus in &self.nuclei[previous..] {
                info!(
                    "Accepted nucleus {} at {:?} (t = {})",
                    nucleus.index,
                    nucleus.center.as_slice(),
                    nucleus.seeded_time
                );
            }
        }
        Ok(num_new)
    }

    /// Overwrites the target order parameter at owned vertices near active nuclei and returns
    /// the number of modified vertices.
    pub fn seed(
        &self,
        grid: &UniformGrid<D>,
        partition: &Partition,
        time: f64,
        order_parameter: &mut DVector<f64>,
    ) -> usize {
        let mut num_seeded = 0;
        for nucleus in self.nuclei.iter().filter(|n| n.is_seeding_at(time)) {
            for v in partition.vertices.clone() {
                let r = nucleus.distance_to(&grid.vertex_position(v));
                if r <= 2.0 * nucleus.radius {
                    order_parameter[v] = self.parameters.profile(r);
                    num_seeded += 1;
                }
            }
        }
        num_seeded
    }

    /// Runs a full nucleation increment: candidate generation, global synchronization and
    /// seeding. Does nothing outside the nucleation window.
    ///
    /// Only owned entries of `order_parameters[target]` are modified, the caller is
    /// responsible for making them consistent across workers.
    #[allow(clippy::too_many_arguments)]
    pub fn step<C: Communicator>(
        &mut self,
        comm: &C,
        grid: &UniformGrid<D>,
        partition: &Partition,
        increment: usize,
        time: f64,
        concentration: &DVector<f64>,
        order_parameters: &mut [DVector<f64>],
    ) -> eyre::Result<NucleationReport> {
        if !self.is_nucleation_increment(increment) {
            return Ok(NucleationReport::default());
        }
        let target = self.parameters.order_parameter;
        if target >= order_parameters.len() {
            return Err(eyre!(
                "nuclei are seeded into order parameter {target}, but only {} were given",
                order_parameters.len()
            ));
        }

        let new_local_candidates = {
            let views: Vec<&DVector<f64>> = order_parameters.iter().collect();
            self.generate_local_candidates(grid, partition, time, concentration, &views)
        };
        let new_nuclei = self.synchronize(comm)?;
        let seeded_vertices = self.seed(grid, partition, time, &mut order_parameters[target]);
        Ok(NucleationReport {
            new_local_candidates,
            new_nuclei,
            seeded_vertices,
        })
    }
}
