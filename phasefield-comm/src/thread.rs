use crate::{CommError, Communicator, Tag};
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::trace;
use std::panic::resume_unwind;

#[derive(Debug)]
struct Envelope {
    tag: Tag,
    payload: Vec<u8>,
}

/// Communicator connecting workers that run on different threads of the same process.
///
/// Every ordered pair of workers shares a dedicated channel, so messages between two workers
/// are delivered in the order they were sent. A worker that drops its communicator (for
/// example because it returned early with an error) disconnects from all its peers, which
/// turns any pending receive on their side into [`CommError::Disconnected`].
#[derive(Debug)]
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    // senders[r] delivers to rank r, receivers[r] receives from rank r.
    // The entries for the own rank are unused.
    senders: Vec<Option<Sender<Envelope>>>,
    receivers: Vec<Option<Receiver<Envelope>>>,
}

impl ThreadCommunicator {
    /// Creates communicators for `size` interconnected workers, ordered by rank.
    pub fn universe(size: usize) -> Vec<Self> {
        assert!(size > 0, "a communicator needs at least one worker");
        let mut communicators: Vec<_> = (0..size)
            .map(|rank| Self {
                rank,
                size,
                senders: (0..size).map(|_| None).collect(),
                receivers: (0..size).map(|_| None).collect(),
            })
            .collect();

        for source in 0..size {
            for destination in (0..size).filter(|&d| d != source) {
                let (sender, receiver) = unbounded();
                communicators[source].senders[destination] = Some(sender);
                communicators[destination].receivers[source] = Some(receiver);
            }
        }

        communicators
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer < self.size && peer != self.rank {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank: peer,
                size: self.size,
            })
        }
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_bytes(&self, destination: usize, tag: Tag, payload: Vec<u8>) -> Result<(), CommError> {
        self.check_peer(destination)?;
        trace!("worker {} sends {} bytes (tag {tag}) to {destination}", self.rank, payload.len());
        self.senders[destination]
            .as_ref()
            .ok_or(CommError::Disconnected { peer: destination })?
            .send(Envelope { tag, payload })
            .map_err(|_| CommError::Disconnected { peer: destination })
    }

    fn receive_bytes(&self, source: usize, tag: Tag) -> Result<Vec<u8>, CommError> {
        self.check_peer(source)?;
        let envelope = self.receivers[source]
            .as_ref()
            .ok_or(CommError::Disconnected { peer: source })?
            .recv()
            .map_err(|_| CommError::Disconnected { peer: source })?;
        if envelope.tag != tag {
            return Err(CommError::TagMismatch {
                source,
                expected: tag,
                received: envelope.tag,
            });
        }
        Ok(envelope.payload)
    }
}

/// Runs `worker` on `num_workers` threads, each with its own connected communicator.
///
/// Returns the results ordered by rank. A panic in any worker is propagated to the caller.
pub fn run_threaded<R, F>(num_workers: usize, worker: F) -> Vec<R>
where
    R: Send,
    F: Fn(ThreadCommunicator) -> R + Sync,
{
    let worker = &worker;
    crossbeam::scope(|scope| {
        let handles: Vec<_> = ThreadCommunicator::universe(num_workers)
            .into_iter()
            .map(|communicator| scope.spawn(move |_| worker(communicator)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| resume_unwind(panic)))
            .collect()
    })
    .unwrap_or_else(|panic| resume_unwind(panic))
}
