//! Single-assignment asynchronous results.
//!
//! - [`Future`]: a result that completes once, observed through callbacks or
//!   `.await`,
//! - [`Completer`]: the producing side of a future,
//! - [`FutureOr`] / [`IntoFutureOr`]: what callbacks may return.
//!
//! Completion propagates through an explicit work stack rather than nested
//! calls, so arbitrarily long `then` chains use constant stack depth.

mod awaiter;
mod combinators;
mod completer;
pub(crate) mod core;
mod future_or;

pub use self::awaiter::FutureAwait;
pub use self::combinators::WaitOptions;
pub use self::completer::Completer;
pub use self::core::Future;
pub use self::future_or::{FutureOr, IntoFutureOr};
