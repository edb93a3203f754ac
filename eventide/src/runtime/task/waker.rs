use crate::runtime::ready::{ReadyQueue, TaskId};

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Wake target of a local task.
///
/// Waking pushes the task id onto the loop's ready queue, at most once
/// between two polls.
pub(crate) struct TaskWaker {
    id: TaskId,
    ready: Arc<ReadyQueue>,

    /// Set while the task sits in the ready queue.
    queued: AtomicBool,
}

impl TaskWaker {
    pub(crate) fn new(id: TaskId, ready: Arc<ReadyQueue>) -> Self {
        Self {
            id,
            ready,
            // The loop queues the first poll itself.
            queued: AtomicBool::new(true),
        }
    }

    /// Marks the task as no longer queued, right before it is polled.
    pub(crate) fn clear(&self) {
        self.queued.store(false, Ordering::Release);
    }

    fn wake(&self) {
        if !self.queued.swap(true, Ordering::AcqRel) {
            self.ready.push(self.id);
        }
    }
}

/// Returns the `RawWakerVTable` for task wakers.
///
/// The vtable defines how the loop interacts with the task when:
/// - cloning the waker,
/// - waking the task,
/// - waking by reference,
/// - dropping the waker.
fn vtable() -> &'static RawWakerVTable {
    &RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw)
}

/// Creates a [`Waker`] that requeues the task on the event loop.
///
/// # Safety
///
/// The pointer stored inside the `RawWaker` originates from `Arc::into_raw`
/// and every vtable function below keeps the reference count balanced.
pub(crate) fn make_waker(target: Arc<TaskWaker>) -> Waker {
    unsafe { Waker::from_raw(RawWaker::new(Arc::into_raw(target) as *const (), vtable())) }
}

/// Clones the raw waker, incrementing the reference count.
fn clone_raw(ptr: *const ()) -> RawWaker {
    let arc = unsafe { Arc::<TaskWaker>::from_raw(ptr as *const TaskWaker) };
    let cloned = arc.clone();
    mem::forget(arc);

    RawWaker::new(Arc::into_raw(cloned) as *const (), vtable())
}

/// Wakes the task and consumes the waker.
fn wake_raw(ptr: *const ()) {
    let arc = unsafe { Arc::<TaskWaker>::from_raw(ptr as *const TaskWaker) };
    arc.wake();
}

/// Wakes the task without consuming the waker.
fn wake_by_ref_raw(ptr: *const ()) {
    let arc = unsafe { Arc::<TaskWaker>::from_raw(ptr as *const TaskWaker) };
    arc.wake();
    mem::forget(arc);
}

/// Drops the raw waker, decrementing the reference count.
fn drop_raw(ptr: *const ()) {
    unsafe { Arc::<TaskWaker>::from_raw(ptr as *const TaskWaker) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_queues_once_until_cleared() {
        let ready = Arc::new(ReadyQueue::new());
        let target = Arc::new(TaskWaker::new(7, ready.clone()));
        let waker = make_waker(target.clone());

        waker.wake_by_ref();
        assert!(ready.is_empty(), "first poll is queued by the loop");

        target.clear();
        waker.wake_by_ref();
        waker.clone().wake();
        assert_eq!(ready.drain(), vec![7]);

        drop(waker);
        assert_eq!(Arc::strong_count(&target), 1);
    }
}
