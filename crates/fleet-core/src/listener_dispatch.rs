//! Bounded worker pool that detaches listener invocation from the
//! transition call site (spec: notifications are detached so a slow
//! listener cannot stall a subsequent transition; in a systems language,
//! a bounded worker with backpressure is preferred over a thread/task per
//! notification). A fixed set of workers drains a bounded queue; a full
//! queue means the notification is dropped and logged rather than
//! blocking the caller. Each listener call runs with a timeout: if it
//! runs long, the worker stops waiting on it (logging the fact) instead
//! of stalling every notification queued behind it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

const WORKER_COUNT: usize = 4;
const QUEUE_CAPACITY: usize = 256;
const LISTENER_TIMEOUT: Duration = Duration::from_millis(500);

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ListenerDispatcher {
    sender: SyncSender<Job>,
}

impl ListenerDispatcher {
    fn new() -> Self {
        let (sender, receiver) = sync_channel::<Job>(QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));
        for _ in 0..WORKER_COUNT {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name("fleet-listener-worker".to_string())
                .spawn(move || worker_loop(&receiver))
                .expect("spawn listener worker thread");
        }
        Self { sender }
    }

    fn dispatch(&self, job: Job) {
        if self.sender.try_send(job).is_err() {
            tracing::warn!("listener queue saturated, dropping state-change notification");
        }
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        let job = {
            let receiver = receiver.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            receiver.recv()
        };
        match job {
            Ok(job) => run_with_timeout(job),
            Err(_) => return,
        }
    }
}

/// Run `job` to completion on a throwaway thread, catching a panic so it
/// cannot take down a worker. After `LISTENER_TIMEOUT`, stop waiting and
/// log, freeing the worker to pick up the next queued notification even
/// though the slow listener keeps running in the background.
fn run_with_timeout(job: Job) {
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let spawned = thread::Builder::new()
        .name("fleet-listener-call".to_string())
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = done_tx.send(());
            if result.is_err() {
                tracing::warn!("listener panicked");
            }
        });
    let Ok(handle) = spawned else {
        tracing::warn!("failed to spawn listener call thread");
        return;
    };
    if done_rx.recv_timeout(LISTENER_TIMEOUT).is_err() {
        tracing::warn!(timeout_ms = LISTENER_TIMEOUT.as_millis() as u64, "listener invocation exceeded timeout, detaching");
    }
    drop(handle);
}

fn dispatcher() -> &'static ListenerDispatcher {
    static DISPATCHER: OnceLock<ListenerDispatcher> = OnceLock::new();
    DISPATCHER.get_or_init(ListenerDispatcher::new)
}

/// Enqueue `job` for out-of-band execution on the shared listener worker
/// pool. Used by `StateMachine::transition_to` for every registered
/// listener on a successful transition.
pub(crate) fn dispatch(job: Job) {
    dispatcher().dispatch(job);
}
