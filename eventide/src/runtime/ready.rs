use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Identifier of a local task spawned on the event loop.
pub(crate) type TaskId = u64;

/// Queue of woken task identifiers.
///
/// Wakers must be `Send + Sync`, so the queue is the one piece of event loop
/// state guarded by a mutex. The loop moves woken ids into the microtask queue
/// before each microtask, and parks on the condition variable while waiting for
/// a real-clock timer.
pub(crate) struct ReadyQueue {
    /// Woken task identifiers, in wake order.
    queue: Mutex<VecDeque<TaskId>>,

    /// Signalled whenever an id is pushed.
    condvar: Condvar,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    /// Pushes a woken task and wakes a parked loop.
    pub(crate) fn push(&self, id: TaskId) {
        self.lock().push_back(id);
        self.condvar.notify_all();
    }

    /// Takes every woken task, in wake order.
    pub(crate) fn drain(&self) -> Vec<TaskId> {
        self.lock().drain(..).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Parks the loop thread for at most `timeout`, returning early on a wakeup.
    pub(crate) fn park(&self, timeout: Duration) {
        let queue = self.lock();
        if !queue.is_empty() {
            return;
        }

        let _ = self.condvar.wait_timeout(queue, timeout);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<TaskId>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
