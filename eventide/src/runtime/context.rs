use super::event_loop::EventLoop;
use crate::error::UsageError;

use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    /// Thread-local handle to the event loop of the runtime being driven.
    ///
    /// This is set when entering the runtime context and allows zones,
    /// timers, and tasks to reach the loop without explicit parameter passing.
    static CURRENT_LOOP: RefCell<Option<Rc<EventLoop>>> = const { RefCell::new(None) };
}

/// Restores the previously installed event loop when dropped.
pub(crate) struct ContextGuard {
    previous: Option<Rc<EventLoop>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_LOOP.with(|cell| {
            *cell.borrow_mut() = previous;
        });
    }
}

/// Enters the runtime execution context for the current thread.
///
/// The loop stays installed until the returned guard is dropped, including
/// when the caller unwinds.
pub(crate) fn enter_context(event_loop: Rc<EventLoop>) -> ContextGuard {
    let previous = CURRENT_LOOP.with(|cell| cell.borrow_mut().replace(event_loop));
    ContextGuard { previous }
}

/// Runs `f` with the current event loop.
///
/// # Panics
///
/// Panics with [`UsageError::OutsideRuntime`] if no runtime is being driven
/// on this thread.
pub(crate) fn with_loop<R>(what: &'static str, f: impl FnOnce(&Rc<EventLoop>) -> R) -> R {
    let event_loop = CURRENT_LOOP.with(|cell| cell.borrow().clone());
    match event_loop {
        Some(event_loop) => f(&event_loop),
        None => UsageError::OutsideRuntime(what).raise(),
    }
}

/// Returns the current event loop, if any.
pub(crate) fn try_current() -> Option<Rc<EventLoop>> {
    CURRENT_LOOP.with(|cell| cell.borrow().clone())
}
