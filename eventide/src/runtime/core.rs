use super::builder::{Clock, UncaughtErrorPolicy};
use super::context::enter_context;
use super::event_loop::EventLoop;
use super::task::{self, LocalTask};
use crate::error::UsageError;
use crate::future::Future;
use crate::zone::Zone;

use std::cell::RefCell;
use std::future::Future as StdFuture;
use std::rc::Rc;
use std::time::Duration;

/// The main runtime handle.
///
/// `Runtime` is responsible for:
/// - owning the event loop (microtasks, timers, local tasks),
/// - installing it as the thread's runtime context while it is driven,
/// - providing synchronous entry points via [`block_on`](Self::block_on)
///   and [`run`](Self::run).
///
/// A runtime is bound to the thread that created it. Dropping it discards
/// every pending microtask, timer, and task.
pub struct Runtime {
    event_loop: Rc<EventLoop>,
}

impl Runtime {
    pub(crate) fn new(clock: Clock, uncaught: UncaughtErrorPolicy) -> Self {
        log::debug!("runtime started (clock: {clock:?}, uncaught errors: {uncaught:?})");

        Self {
            event_loop: Rc::new(EventLoop::new(clock, uncaught)),
        }
    }

    /// Runs a future to completion on the current thread.
    ///
    /// The future is spawned as a task in the root zone and the loop is driven
    /// until it finishes. Other microtasks and timers keep running in between.
    ///
    /// # Panics
    ///
    /// Panics if the future panics, if an uncaught error is rethrown under
    /// [`UncaughtErrorPolicy::Panic`], or with [`UsageError::Stalled`] if the loop
    /// runs out of work before the future completes.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let result = runtime.block_on(async {
    ///     Future::value(42).await.unwrap()
    /// });
    /// assert_eq!(result, 42);
    /// ```
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: StdFuture + 'static,
    {
        let _guard = enter_context(self.event_loop.clone());

        let output = Rc::new(RefCell::new(None));
        let slot = output.clone();

        self.event_loop.spawn_task(|id, ready| {
            LocalTask::new(
                id,
                ready,
                Zone::root(),
                Box::pin(async move {
                    let value = future.await;
                    *slot.borrow_mut() = Some(value);
                }),
                None,
            )
        });

        let finished = self.event_loop.run_until(|| output.borrow().is_some());
        if !finished {
            UsageError::Stalled.raise();
        }

        let value = output.borrow_mut().take();
        value.unwrap_or_else(|| UsageError::Stalled.raise())
    }

    /// Runs a synchronous closure in the root zone, then drives the loop until
    /// no microtask, timer, or task is left.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let seen = Rc::new(Cell::new(0));
    /// let s = seen.clone();
    /// runtime.run(move || {
    ///     Future::value(5).then(move |v| { s.set(v); Ok(()) });
    /// });
    /// assert_eq!(seen.get(), 5);
    /// ```
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = enter_context(self.event_loop.clone());

        let result = Zone::root().run(f);
        self.event_loop.run_until(|| false);

        result
    }

    /// Spawns a task onto this runtime without driving it.
    ///
    /// The task makes progress the next time the runtime is driven.
    pub fn spawn<F, T>(&self, future: F) -> Future<T>
    where
        F: StdFuture<Output = T> + 'static,
        T: Clone + 'static,
    {
        let _guard = enter_context(self.event_loop.clone());
        Zone::root().run(|| task::spawn(future))
    }

    /// Loop time elapsed since the runtime was built.
    pub fn elapsed(&self) -> Duration {
        self.event_loop.now()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _guard = enter_context(self.event_loop.clone());
        self.event_loop.shutdown();
        log::debug!("runtime stopped");
    }
}
