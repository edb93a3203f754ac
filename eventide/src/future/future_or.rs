use super::Future;
use crate::error::AsyncError;

/// The outcome of a callback: a value, a future to wait for, or an error.
pub enum FutureOr<T> {
    Value(T),
    Future(Future<T>),
    Error(AsyncError),
}

/// Conversion of a callback's return value into a [`FutureOr`].
///
/// Callbacks passed to [`Future::then`] and friends return one of:
/// - `Result<T, AsyncError>`: `Ok` completes with the value, `Err` with the error,
/// - `Future<T>`: the result follows that future,
/// - `FutureOr<T>`: any of the above, chosen at runtime.
///
/// ```rust,ignore
/// let next = future.then(|v| Ok(v + 1));
/// let chained = future.then(|v| Future::delayed_with(Duration::from_millis(5), move || Ok(v)));
/// ```
pub trait IntoFutureOr<T> {
    fn into_future_or(self) -> FutureOr<T>;
}

impl<T> IntoFutureOr<T> for FutureOr<T> {
    fn into_future_or(self) -> FutureOr<T> {
        self
    }
}

impl<T> IntoFutureOr<T> for Result<T, AsyncError> {
    fn into_future_or(self) -> FutureOr<T> {
        match self {
            Ok(value) => FutureOr::Value(value),
            Err(error) => FutureOr::Error(error),
        }
    }
}

impl<T> IntoFutureOr<T> for Future<T> {
    fn into_future_or(self) -> FutureOr<T> {
        FutureOr::Future(self)
    }
}

impl<T> From<Future<T>> for FutureOr<T> {
    fn from(future: Future<T>) -> Self {
        FutureOr::Future(future)
    }
}

impl<T> From<Result<T, AsyncError>> for FutureOr<T> {
    fn from(result: Result<T, AsyncError>) -> Self {
        result.into_future_or()
    }
}
