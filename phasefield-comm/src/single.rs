use crate::{CommError, Communicator, Tag};

/// Communicator for a run with a single worker.
///
/// Collectives complete immediately. Point-to-point messages are never valid, since there is
/// no other worker to exchange them with.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfCommunicator;

impl Communicator for SelfCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send_bytes(&self, destination: usize, _tag: Tag, _payload: Vec<u8>) -> Result<(), CommError> {
        Err(CommError::InvalidRank {
            rank: destination,
            size: 1,
        })
    }

    fn receive_bytes(&self, source: usize, _tag: Tag) -> Result<Vec<u8>, CommError> {
        Err(CommError::InvalidRank { rank: source, size: 1 })
    }
}
