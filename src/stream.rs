use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Per-stream channel capacity. Small enough that a cancelled consumer
/// stops its producer after at most one buffered batch.
const STREAM_CAPACITY: usize = 64;

/// Cooperative cancellation token, optionally carrying a deadline.
/// Cloned into every producer thread a request spawns.
#[derive(Clone, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }
}

/// A lazy sequence backed by a bounded channel. The producer runs on its
/// own thread and closes the channel when it finishes, fails, or observes
/// cancellation; consumers just iterate.
pub struct Stream<T> {
    rx: Receiver<T>,
}

impl<T> Stream<T> {
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.iter()
    }

    /// Drain the remainder into a Vec. Test helper and small-result paths.
    pub fn collect(self) -> Vec<T> {
        self.rx.into_iter().collect()
    }
}

impl<T> IntoIterator for Stream<T> {
    type Item = T;
    type IntoIter = crossbeam_channel::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.into_iter()
    }
}

/// Emitter handed to producers. `send` returns false when the stream
/// should stop: either the consumer went away or the request was
/// cancelled. Producers must return promptly on false.
pub struct Emitter<T> {
    tx: Sender<T>,
    cancel: Cancel,
}

impl<T> Emitter<T> {
    pub fn send(&self, item: T) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(item).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Spawn a named producer thread feeding a bounded stream.
pub fn produce<T, F>(name: &str, cancel: &Cancel, f: F) -> Stream<T>
where
    T: Send + 'static,
    F: FnOnce(&Emitter<T>) + Send + 'static,
{
    let (tx, rx) = bounded(STREAM_CAPACITY);
    let emitter = Emitter {
        tx,
        cancel: cancel.clone(),
    };
    let thread_name = format!("stream-{}", name);
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            f(&emitter);
            // Emitter drops here, closing the channel.
        })
        .unwrap_or_else(|e| panic!("cannot spawn {}: {}", thread_name, e));
    Stream { rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stream_yields_in_producer_order() {
        let cancel = Cancel::new();
        let stream = produce("nums", &cancel, |out| {
            for i in 0..100 {
                if !out.send(i) {
                    return;
                }
            }
        });
        let got: Vec<i32> = stream.collect();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancel_stops_producer() {
        let cancel = Cancel::new();
        let sent = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sent2 = sent.clone();
        let stream = produce("endless", &cancel, move |out| {
            let mut i: u64 = 0;
            loop {
                if !out.send(i) {
                    return;
                }
                sent2.fetch_add(1, Ordering::SeqCst);
                i += 1;
            }
        });
        assert!(stream.recv().is_some());
        cancel.cancel();
        // Drain whatever was buffered; the producer must stop on its own.
        let drained: Vec<u64> = stream.collect();
        assert!(drained.len() <= STREAM_CAPACITY + 1);
        std::thread::sleep(Duration::from_millis(50));
        let at_stop = sent.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(sent.load(Ordering::SeqCst), at_stop, "producer kept running");
    }

    #[test]
    fn test_deadline_cancels() {
        let cancel = Cancel::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_dropped_consumer_stops_producer() {
        let cancel = Cancel::new();
        let stream = produce("dropped", &cancel, |out| {
            let mut i = 0u64;
            while out.send(i) {
                i += 1;
            }
        });
        drop(stream);
        // Nothing to assert beyond "does not hang": send fails once the
        // receiver is gone and the producer returns.
    }
}
