//! Exchange of nuclei between workers.
//!
//! Candidates are gathered in two phases: the root first collects the number of candidates
//! of every worker, and after a barrier receives the records themselves and checks that the
//! announced numbers were honored. The accepted list is broadcast the same way, count first.
use crate::nucleation::Nucleus;
use nalgebra::SVector;
use phasefield_comm::{CommError, Communicator, Tag, ROOT};
use serde::{Deserialize, Serialize};

const CANDIDATE_TAG: Tag = 16;

/// A nucleus as transferred between workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NucleusRecord {
    pub radius: f64,
    pub seeded_time: f64,
    pub seeding_duration: f64,
    pub center: Vec<f64>,
}

impl<const D: usize> From<&Nucleus<D>> for NucleusRecord {
    fn from(nucleus: &Nucleus<D>) -> Self {
        Self {
            radius: nucleus.radius,
            seeded_time: nucleus.seeded_time,
            seeding_duration: nucleus.seeding_duration,
            center: nucleus.center.as_slice().to_vec(),
        }
    }
}

impl NucleusRecord {
    /// Converts the record received from `source` back into a nucleus with the given index.
    pub fn into_nucleus<const D: usize>(self, index: usize, source: usize) -> Result<Nucleus<D>, CommError> {
        if self.center.len() != D {
            return Err(CommError::SizeMismatch {
                source,
                expected: D,
                actual: self.center.len(),
            });
        }
        Ok(Nucleus {
            index,
            center: SVector::from_column_slice(&self.center),
            radius: self.radius,
            seeded_time: self.seeded_time,
            seeding_duration: self.seeding_duration,
        })
    }
}

fn to_records<const D: usize>(nuclei: &[Nucleus<D>]) -> Vec<NucleusRecord> {
    nuclei.iter().map(NucleusRecord::from).collect()
}

/// Collects the local candidates of all workers on the root, ordered by rank.
///
/// Returns `Some` on the root and `None` on every other worker.
pub fn gather_candidates<C, const D: usize>(
    comm: &C,
    local: &[Nucleus<D>],
) -> Result<Option<Vec<Nucleus<D>>>, CommError>
where
    C: Communicator + ?Sized,
{
    let counts = comm.gather(ROOT, local.len() as u64)?;
    comm.barrier()?;

    match counts {
        Some(counts) => {
            let mut candidates = Vec::with_capacity(counts.iter().sum::<u64>() as usize);
            for (source, &count) in counts.iter().enumerate() {
                let count = count as usize;
                if source == comm.rank() {
                    candidates.extend(local.iter().cloned());
                } else if count > 0 {
                    let records: Vec<NucleusRecord> = comm.receive(source, CANDIDATE_TAG)?;
                    if records.len() != count {
                        return Err(CommError::SizeMismatch {
                            source,
                            expected: count,
                            actual: records.len(),
                        });
                    }
                    for record in records {
                        let index = candidates.len();
                        candidates.push(record.into_nucleus(index, source)?);
                    }
                }
            }
            Ok(Some(candidates))
        }
        None => {
            if !local.is_empty() {
                comm.send(ROOT, CANDIDATE_TAG, &to_records(local))?;
            }
            Ok(None)
        }
    }
}

/// Replaces every worker's view of the accepted nuclei by the list supplied on the root.
pub fn broadcast_nuclei<C, const D: usize>(
    comm: &C,
    nuclei: Option<&[Nucleus<D>]>,
) -> Result<Vec<Nucleus<D>>, CommError>
where
    C: Communicator + ?Sized,
{
    let count = comm.broadcast(ROOT, nuclei.map(|nuclei| nuclei.len() as u64))? as usize;
    let records = comm.broadcast(ROOT, nuclei.map(to_records))?;
    if records.len() != count {
        return Err(CommError::SizeMismatch {
            source: ROOT,
            expected: count,
            actual: records.len(),
        });
    }
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| record.into_nucleus(index, ROOT))
        .collect()
}
