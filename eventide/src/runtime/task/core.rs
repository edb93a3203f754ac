use super::waker::{TaskWaker, make_waker};
use crate::error::{AsyncError, catch};
use crate::future::{Completer, Future};
use crate::runtime::context::with_loop;
use crate::runtime::ready::{ReadyQueue, TaskId};
use crate::zone::Zone;

use std::cell::RefCell;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Waker};

type BoxedTask = Pin<Box<dyn StdFuture<Output = ()>>>;

/// A `std` future scheduled on the event loop.
pub(crate) struct LocalTask {
    /// `None` once the future has completed.
    future: RefCell<Option<BoxedTask>>,

    /// Zone the task was spawned in; every poll runs inside it.
    zone: Zone,

    target: Arc<TaskWaker>,
    waker: Waker,

    /// Receives a panic raised while polling. Without it the panic propagates
    /// out of the loop.
    on_panic: RefCell<Option<Box<dyn FnOnce(AsyncError)>>>,
}

impl LocalTask {
    pub(crate) fn new(
        id: TaskId,
        ready: Arc<ReadyQueue>,
        zone: Zone,
        future: BoxedTask,
        on_panic: Option<Box<dyn FnOnce(AsyncError)>>,
    ) -> Self {
        let target = Arc::new(TaskWaker::new(id, ready));
        let waker = make_waker(target.clone());

        Self {
            future: RefCell::new(Some(future)),
            zone,
            target,
            waker,
            on_panic: RefCell::new(on_panic),
        }
    }

    /// Polls the task once inside its zone. Returns `true` when it is finished.
    pub(crate) fn poll(&self) -> bool {
        self.target.clear();

        let mut slot = self.future.borrow_mut();
        let Some(future) = slot.as_mut() else {
            return true;
        };

        let mut cx = Context::from_waker(&self.waker);
        let catching = self.on_panic.borrow().is_some();

        let finished = if catching {
            match catch(|| self.zone.run(|| future.as_mut().poll(&mut cx).is_ready())) {
                Ok(ready) => ready,
                Err(error) => {
                    *slot = None;
                    drop(slot);
                    if let Some(on_panic) = self.on_panic.borrow_mut().take() {
                        on_panic(error);
                    }
                    return true;
                }
            }
        } else {
            self.zone.run(|| future.as_mut().poll(&mut cx).is_ready())
        };

        if finished {
            *slot = None;
        }

        finished
    }
}

/// Spawns a future as a task on the current runtime.
///
/// The task is bound to the current zone and first polled from a microtask.
/// The returned [`Future`] completes with the task's output, or with an error
/// if polling it panicked.
///
/// # Panics
///
/// Panics if called outside the context of a running runtime.
///
/// # Examples
///
/// ```rust,ignore
/// let doubled = task::spawn(async { Future::value(21).await.unwrap() * 2 });
/// assert_eq!(doubled.await.unwrap(), 42);
/// ```
pub fn spawn<F, T>(future: F) -> Future<T>
where
    F: StdFuture<Output = T> + 'static,
    T: Clone + 'static,
{
    let completer = Completer::<T>::sync();
    let result = completer.future();
    let on_panic = completer.clone();
    let zone = Zone::current();

    let body = Box::pin(async move {
        let value = future.await;
        completer.complete(value);
    });

    with_loop("spawn", |event_loop| {
        event_loop.spawn_task(|id, ready| {
            LocalTask::new(
                id,
                ready,
                zone,
                body,
                Some(Box::new(move |error| on_panic.complete_error(error))),
            )
        })
    });

    result
}
