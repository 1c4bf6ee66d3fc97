//! Bounded multi-producer work queue drained by a fixed worker pool.
//! Producers block when the buffer is full; workers log per-item
//! failures and keep going. An item counts as done either way, so
//! progress always converges and quiescence is observable.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PAUSE_POLL: Duration = Duration::from_millis(100);
const RECV_POLL: Duration = Duration::from_millis(200);

pub struct Queue<T: Send + 'static> {
    name: &'static str,
    tx: Mutex<Option<Sender<T>>>,
    state: Arc<State>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

struct State {
    pending: AtomicUsize,
    done: AtomicUsize,
    paused: AtomicBool,
    quiescent: Mutex<()>,
    signal: Condvar,
}

impl<T: Send + 'static> Queue<T> {
    /// Start `worker_count` workers draining a buffer of `capacity`.
    pub fn start(
        name: &'static str,
        capacity: usize,
        worker_count: usize,
        worker: Arc<dyn Fn(T) + Send + Sync>,
    ) -> Arc<Queue<T>> {
        let (tx, rx) = bounded(capacity);
        let state = Arc::new(State {
            pending: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            quiescent: Mutex::new(()),
            signal: Condvar::new(),
        });
        let mut workers = Vec::new();
        for n in 0..worker_count.max(1) {
            let rx: Receiver<T> = rx.clone();
            let state = state.clone();
            let worker = worker.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-worker-{}", name, n))
                .spawn(move || run_worker(rx, state, worker))
                .unwrap_or_else(|e| panic!("cannot spawn {} worker: {}", name, e));
            workers.push(handle);
        }
        Arc::new(Queue {
            name,
            tx: Mutex::new(Some(tx)),
            state,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue one item; blocks while the buffer is full.
    pub fn append_one(&self, item: T) {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => {
                self.state.pending.fetch_add(1, Ordering::SeqCst);
                if tx.send(item).is_err() {
                    self.state.pending.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!("queue {} is closed; item dropped", self.name);
                }
            }
            None => tracing::warn!("queue {} is closed; item dropped", self.name),
        }
    }

    /// Drain a lazy stream into the queue, blocking on backpressure.
    pub fn append_items(&self, items: crate::stream::Stream<T>) {
        for item in items {
            self.append_one(item);
        }
    }

    /// Items enqueued but not yet finished.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Items finished since start, failures included.
    pub fn done(&self) -> usize {
        self.state.done.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> (usize, usize) {
        (self.done(), self.pending())
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
    }

    /// Block until the queue is quiescent (nothing pending or running).
    pub fn wait_until_done(&self) {
        let mut guard = self.state.quiescent.lock();
        while self.state.pending.load(Ordering::SeqCst) > 0 {
            self.state.signal.wait(&mut guard);
        }
    }

    /// Stop accepting input; workers finish their current item and exit.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// Close and join every worker.
    pub fn shutdown(&self) {
        self.close();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_worker<T>(rx: Receiver<T>, state: Arc<State>, worker: Arc<dyn Fn(T) + Send + Sync>) {
    loop {
        while state.paused.load(Ordering::SeqCst) {
            std::thread::sleep(PAUSE_POLL);
        }
        let item = match rx.recv_timeout(RECV_POLL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };
        worker(item);
        state.done.fetch_add(1, Ordering::SeqCst);
        if state.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = state.quiescent.lock();
            state.signal.notify_all();
        }
    }
}
