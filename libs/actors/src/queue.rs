//! Single-writer single-reader FIFO used for inter-lane mailboxes.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// Non-blocking FIFO between one producing lane and one consuming lane.
///
/// The queue is unbounded, so `try_enqueue` only fails once the queue
/// has been torn down, which cannot happen while it is shared.
#[derive(Debug)]
pub struct SwsrQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> SwsrQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn try_enqueue(&self, item: T) -> bool {
        self.sender.try_send(item).is_ok()
    }

    pub fn try_dequeue(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T> Default for SwsrQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
