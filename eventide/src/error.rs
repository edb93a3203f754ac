//! Error values flowing through futures and streams.
//!
//! Asynchronous computation errors are carried as [`AsyncError`]: a shared,
//! dynamically typed payload paired with a [`StackTrace`]. Synchronous misuse of the
//! API (completing twice, listening twice, adding after close, ...) is reported as a
//! [`UsageError`] panic instead.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

/// Fatal misuse of the runtime API.
///
/// These are never delivered through futures or streams; the offending call panics
/// with the error's message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("future already completed")]
    AlreadyCompleted,

    #[error("stream has already been listened to")]
    AlreadyListened,

    #[error("cannot add event after closing")]
    AddAfterClose,

    #[error("cannot add event while adding a stream")]
    AddWhileAddingStream,

    #[error("cannot fire new event: controller is already firing an event")]
    FireWhileFiring,

    #[error("already waiting for the next stream event")]
    AlreadyWaiting,

    #[error("{0} must be called within the context of a runtime")]
    OutsideRuntime(&'static str),

    #[error("zone interceptor for `{0}` did not invoke its callback")]
    CallbackNotInvoked(&'static str),

    #[error("block_on stalled: no microtask, timer, or wakeup can complete the future")]
    Stalled,
}

impl UsageError {
    /// Panics with this error's message.
    #[track_caller]
    pub(crate) fn raise(self) -> ! {
        panic!("{self}")
    }
}

/// Errors produced by stream consumers and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("no element")]
    NoElement,

    #[error("too many elements")]
    TooManyElements,

    #[error("index {index} out of range for stream of length {length}")]
    IndexOutOfRange { index: usize, length: usize },

    #[error("no stream event within {0:?}")]
    Timeout(Duration),
}

/// Error delivered by [`Future::timeout`](crate::Future::timeout) when the
/// deadline passes and no fallback was supplied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("future not completed within {0:?}")]
pub struct TimeoutError(pub Duration);

/// Error converted from a panic raised inside a user callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("callback panicked: {0}")]
pub struct PanicError(pub String);

/// A captured stack trace attached to an [`AsyncError`].
#[derive(Clone, Default)]
pub struct StackTrace(Option<Rc<str>>);

impl StackTrace {
    /// Captures the current stack if backtraces are enabled (`RUST_BACKTRACE`).
    pub fn capture() -> Self {
        let backtrace = Backtrace::capture();
        match backtrace.status() {
            BacktraceStatus::Captured => Self(Some(backtrace.to_string().into())),
            _ => Self(None),
        }
    }

    /// A stack trace carrying the given text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(Some(Rc::from(text.into())))
    }

    /// An empty stack trace.
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Debug for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(text) => f.write_str(text),
            None => f.write_str("<no stack trace>"),
        }
    }
}

struct ErrorInner {
    payload: Box<dyn Any>,
    message: String,
}

/// An asynchronous error: a shared payload plus the stack trace it was raised with.
///
/// Clones share the payload, so [`AsyncError::same`] can tell whether two errors are
/// the same error object.
#[derive(Clone)]
pub struct AsyncError {
    inner: Rc<ErrorInner>,
    stack_trace: StackTrace,
}

impl AsyncError {
    /// Wraps any displayable value as an error, capturing the current stack trace.
    pub fn new<E: fmt::Display + 'static>(error: E) -> Self {
        Self::with_stack_trace(error, StackTrace::capture())
    }

    pub fn with_stack_trace<E: fmt::Display + 'static>(error: E, stack_trace: StackTrace) -> Self {
        let message = error.to_string();
        Self {
            inner: Rc::new(ErrorInner {
                payload: Box::new(error),
                message,
            }),
            stack_trace,
        }
    }

    /// Shorthand for an error carrying a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(PanicError(message))
    }

    pub fn downcast_ref<E: 'static>(&self) -> Option<&E> {
        self.inner.payload.downcast_ref::<E>()
    }

    pub fn is<E: 'static>(&self) -> bool {
        self.inner.payload.is::<E>()
    }

    pub fn message(&self) -> &str {
        &self.inner.message
    }

    pub fn stack_trace(&self) -> &StackTrace {
        &self.stack_trace
    }

    /// Returns the same error object with a different stack trace.
    pub fn replace_stack_trace(&self, stack_trace: StackTrace) -> Self {
        Self {
            inner: self.inner.clone(),
            stack_trace,
        }
    }

    /// Whether both values refer to the same error object.
    pub fn same(&self, other: &AsyncError) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncError")
            .field("message", &self.inner.message)
            .finish()
    }
}

impl fmt::Display for AsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.message)
    }
}

/// Runs a user callback, turning a panic into an [`AsyncError`].
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R, AsyncError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(AsyncError::from_panic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_keeps_payload() {
        let err = AsyncError::new(StreamError::NoElement);
        assert_eq!(err.downcast_ref::<StreamError>(), Some(&StreamError::NoElement));
        assert_eq!(err.message(), "no element");
        assert!(!err.is::<TimeoutError>());
    }

    #[test]
    fn test_same_tracks_identity() {
        let a = AsyncError::msg("boom");
        let b = AsyncError::msg("boom");
        let a2 = a.replace_stack_trace(StackTrace::from_text("elsewhere"));

        assert!(a.same(&a2));
        assert!(!a.same(&b));
        assert_eq!(a2.stack_trace().as_str(), Some("elsewhere"));
    }

    #[test]
    fn test_catch_converts_panics() {
        let err = catch(|| -> i32 { panic!("exploded") }).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PanicError>(),
            Some(&PanicError("exploded".to_string()))
        );
        assert_eq!(catch(|| 7).unwrap(), 7);
    }
}
