//! Collective communication between the workers of a distributed simulation.
//!
//! Workers are identified by their *rank* in `0 .. size`. A [`Communicator`] only needs to
//! provide ordered point-to-point delivery of tagged byte messages; the collectives
//! (gather, broadcast, all-reduce and barrier) are built on top of it and serialize their
//! payloads with `bincode`. All collectives must be called by every worker in the same order.
//!
//! Two communicators are provided: [`SelfCommunicator`] for single-worker runs and
//! [`ThreadCommunicator`], which connects workers running on separate threads of the same
//! process through channels.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::fmt::{Display, Formatter};

mod single;
mod thread;

pub use single::SelfCommunicator;
pub use thread::{run_threaded, ThreadCommunicator};

/// Tag attached to every message, used to detect mismatched collectives.
pub type Tag = u32;

/// The rank that coordinates all collectives.
pub const ROOT: usize = 0;

const GATHER_TAG: Tag = 1;
const BROADCAST_TAG: Tag = 2;
const REDUCE_TAG: Tag = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommError {
    /// A message was addressed to or expected from a rank that does not exist.
    InvalidRank { rank: usize, size: usize },
    /// The peer has stopped participating.
    Disconnected { peer: usize },
    /// A message arrived from `source` with a different tag than expected.
    TagMismatch { source: usize, expected: Tag, received: Tag },
    /// The number of items received does not agree with the announced number.
    SizeMismatch { source: usize, expected: usize, actual: usize },
    /// The root of a broadcast did not supply a value.
    MissingBroadcastValue,
    Serialization(String),
}

impl Display for CommError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRank { rank, size } => {
                write!(f, "rank {rank} is not valid in a communicator of size {size}")
            }
            Self::Disconnected { peer } => write!(f, "worker {peer} disconnected"),
            Self::TagMismatch {
                source,
                expected,
                received,
            } => write!(
                f,
                "expected message with tag {expected} from worker {source}, but received tag {received}"
            ),
            Self::SizeMismatch {
                source,
                expected,
                actual,
            } => write!(
                f,
                "worker {source} announced {expected} items, but {actual} items were received"
            ),
            Self::MissingBroadcastValue => write!(f, "the root of a broadcast must supply a value"),
            Self::Serialization(msg) => write!(f, "failed to (de)serialize message: {msg}"),
        }
    }
}

impl std::error::Error for CommError {}

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Sends a tagged message to the given rank without waiting for it to be received.
    fn send_bytes(&self, destination: usize, tag: Tag, payload: Vec<u8>) -> Result<(), CommError>;

    /// Blocks until the next message from `source` arrives, and checks that it has the given tag.
    fn receive_bytes(&self, source: usize, tag: Tag) -> Result<Vec<u8>, CommError>;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    fn send<T>(&self, destination: usize, tag: Tag, value: &T) -> Result<(), CommError>
    where
        T: Serialize + ?Sized,
    {
        let payload = bincode::serialize(value).map_err(|err| CommError::Serialization(err.to_string()))?;
        self.send_bytes(destination, tag, payload)
    }

    fn receive<T>(&self, source: usize, tag: Tag) -> Result<T, CommError>
    where
        T: DeserializeOwned,
    {
        let payload = self.receive_bytes(source, tag)?;
        bincode::deserialize(&payload).map_err(|err| CommError::Serialization(err.to_string()))
    }

    /// Collects one value from every worker on `root`, ordered by rank.
    ///
    /// Returns `Some` on the root and `None` on every other worker.
    fn gather<T>(&self, root: usize, value: T) -> Result<Option<Vec<T>>, CommError>
    where
        T: Serialize + DeserializeOwned,
    {
        check_rank(root, self.size())?;
        if self.rank() == root {
            let mut gathered = Vec::with_capacity(self.size());
            let mut own = Some(value);
            for source in 0..self.size() {
                if source == root {
                    gathered.extend(own.take());
                } else {
                    gathered.push(self.receive(source, GATHER_TAG)?);
                }
            }
            Ok(Some(gathered))
        } else {
            self.send(root, GATHER_TAG, &value)?;
            Ok(None)
        }
    }

    /// Distributes the value supplied by `root` to every worker.
    ///
    /// Values supplied by other workers are ignored.
    fn broadcast<T>(&self, root: usize, value: Option<T>) -> Result<T, CommError>
    where
        T: Serialize + DeserializeOwned,
    {
        check_rank(root, self.size())?;
        if self.rank() == root {
            let value = value.ok_or(CommError::MissingBroadcastValue)?;
            for destination in (0..self.size()).filter(|&r| r != root) {
                self.send(destination, BROADCAST_TAG, &value)?;
            }
            Ok(value)
        } else {
            self.receive(root, BROADCAST_TAG)
        }
    }

    /// Replaces `values` by their element-wise sum over all workers.
    ///
    /// The sum is formed on the root in rank order, so every worker obtains bitwise
    /// identical results.
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<(), CommError> {
        if self.size() == 1 {
            return Ok(());
        }

        let summed = if self.rank() == ROOT {
            let mut sum = values.to_vec();
            for source in 1..self.size() {
                let contribution: Vec<f64> = self.receive(source, REDUCE_TAG)?;
                if contribution.len() != sum.len() {
                    return Err(CommError::SizeMismatch {
                        source,
                        expected: sum.len(),
                        actual: contribution.len(),
                    });
                }
                sum.iter_mut()
                    .zip(contribution)
                    .for_each(|(s, c)| *s += c);
            }
            Some(sum)
        } else {
            self.send(ROOT, REDUCE_TAG, &*values)?;
            None
        };

        let summed: Vec<f64> = self.broadcast(ROOT, summed)?;
        values.copy_from_slice(&summed);
        Ok(())
    }

    fn all_reduce_sum_scalar(&self, value: f64) -> Result<f64, CommError> {
        let mut values = [value];
        self.all_reduce_sum(&mut values)?;
        Ok(values[0])
    }

    /// Blocks until every worker has reached the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        self.gather(ROOT, ())?;
        self.broadcast(ROOT, Some(()))
    }
}

fn check_rank(rank: usize, size: usize) -> Result<(), CommError> {
    if rank < size {
        Ok(())
    } else {
        Err(CommError::InvalidRank { rank, size })
    }
}
