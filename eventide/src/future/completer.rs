use super::Future;
use super::core::Steps;
use crate::error::{AsyncError, UsageError};
use crate::zone::Zone;

use std::fmt;

/// Produces a [`Future`] and completes it later.
///
/// An asynchronous completer ([`Completer::new`]) delivers its result to
/// listeners from a microtask; a synchronous one ([`Completer::sync`]) runs
/// the listeners before `complete` returns. Either way listeners registered
/// after completion still run asynchronously.
///
/// Clones share the same future.
///
/// # Examples
///
/// ```rust,ignore
/// let completer = Completer::new();
/// let future = completer.future();
///
/// Timer::new(Duration::from_millis(5), move || completer.complete("done"));
/// assert_eq!(future.await.unwrap(), "done");
/// ```
pub struct Completer<T> {
    future: Future<T>,
    sync: bool,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
            sync: self.sync,
        }
    }
}

impl<T: Clone + 'static> Completer<T> {
    pub fn new() -> Self {
        Self {
            future: Future::incomplete(),
            sync: false,
        }
    }

    pub fn sync() -> Self {
        Self {
            future: Future::incomplete(),
            sync: true,
        }
    }

    pub fn future(&self) -> Future<T> {
        self.future.clone()
    }

    /// Whether a result (or a future to follow) was already supplied.
    pub fn is_completed(&self) -> bool {
        !self.future.may_complete()
    }

    /// Completes the future with `value`.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::AlreadyCompleted`] if the completer was
    /// already completed.
    pub fn complete(&self, value: T) {
        self.check();
        self.finish(Ok(value));
    }

    /// Completes the future with `error`, after the current zone's error
    /// callback had a chance to replace it.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::AlreadyCompleted`] if the completer was
    /// already completed.
    pub fn complete_error(&self, error: AsyncError) {
        self.check();
        let error = Zone::current().intercept_error(error);
        self.finish(Err(error));
    }

    /// Makes the future follow `source`.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::AlreadyCompleted`] if the completer was
    /// already completed.
    pub fn complete_with(&self, source: Future<T>) {
        self.check();
        if self.sync {
            Steps::run(|steps| self.future.chain(source, steps));
        } else {
            self.future.chain_async(source);
        }
    }

    /// Like [`complete`](Self::complete), returning the usage error instead of
    /// panicking.
    pub fn try_complete(&self, value: T) -> Result<(), UsageError> {
        if self.is_completed() {
            return Err(UsageError::AlreadyCompleted);
        }
        self.finish(Ok(value));
        Ok(())
    }

    fn check(&self) {
        if self.is_completed() {
            UsageError::AlreadyCompleted.raise();
        }
    }

    fn finish(&self, result: Result<T, AsyncError>) {
        if self.sync {
            self.future.complete_now(result);
        } else {
            self.future.complete_async(result);
        }
    }
}

impl<T: Clone + 'static> Default for Completer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("future", &self.future)
            .field("sync", &self.sync)
            .finish()
    }
}
