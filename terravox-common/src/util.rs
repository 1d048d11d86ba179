//! Cross-thread plumbing shared by the worker pools.

/// A multi-producer completion mailbox: worker tasks push finished results
/// from any thread, the owning loop drains them between frames. The
/// receiving half never leaves the owner, so completion handling stays
/// single-threaded by construction.
pub struct Completions<T> {
    tx: crossbeam_channel::Sender<T>,
    rx: crossbeam_channel::Receiver<T>,
}

impl<T> Completions<T> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// A producer handle to move into a worker task.
    pub fn sender(&self) -> crossbeam_channel::Sender<T> {
        self.tx.clone()
    }

    /// Deliver a completion from the owner's own thread (the worker-pool
    /// fallback path).
    pub fn push(&self, value: T) {
        let _ = self.tx.send(value);
    }

    /// Everything that has finished so far; never blocks.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.try_iter()
    }
}

impl<T> Default for Completions<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_send_order_across_producers() {
        let completions = Completions::new();
        let sender = completions.sender();

        completions.push(1);
        sender.send(2).unwrap();
        completions.push(3);

        assert_eq!(completions.drain().collect::<Vec<_>>(), vec![1, 2, 3]);
        // drained means gone
        assert_eq!(completions.drain().count(), 0);
    }

    #[test]
    fn drain_never_blocks_on_an_empty_mailbox() {
        let completions: Completions<u32> = Completions::new();
        assert_eq!(completions.drain().next(), None);
    }

    #[test]
    fn senders_outlive_the_frame_that_cloned_them() {
        let completions = Completions::new();
        let sender = completions.sender();

        let worker = std::thread::spawn(move || {
            for value in 0..4 {
                sender.send(value).unwrap();
            }
        });
        worker.join().unwrap();

        assert_eq!(completions.drain().count(), 4);
    }
}
