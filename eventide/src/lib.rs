//! # Eventide
//!
//! **Eventide** is a single-threaded async runtime built around an event loop,
//! a microtask queue, and callback-driven futures and streams.
//!
//! Everything runs on one thread. Concurrency is cooperative: work is queued
//! as microtasks or timers and runs to completion, one callback at a time.
//! Every callback runs in the [`Zone`] that was current when it was handed
//! over, so error handling and instrumentation follow asynchronous work
//! across scheduling boundaries.
//!
//! Eventide provides:
//!
//! - **Zones** that intercept scheduling, timers, printing, and uncaught errors
//! - A **microtask queue** with a priority lane for error reporting
//! - **Timers**, one-shot and periodic, on a real or virtual clock
//! - **Futures** completed once, with [`Completer`] as the producing side
//! - **Streams** with pause, resume, cancel, forwarding combinators, and
//!   single-subscription or broadcast controllers
//! - **Macros** `#[eventide::main]` and `#[eventide::test]`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use eventide::{Future, Stream};
//!
//! #[eventide::main]
//! async fn main() {
//!     let doubled = Stream::from_iter([1, 2, 3])
//!         .map(|x| x * 2)
//!         .to_list()
//!         .await
//!         .unwrap();
//!
//!     let answer = Future::value(21).then(|v| Ok(v * 2)).await.unwrap();
//!     println!("{doubled:?} {answer}");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`future`]: futures, completers, and combinators
//! - [`stream`]: streams, subscriptions, controllers, and transformers
//! - [`time`]: timers, sleep, and the loop clock
//! - [`zone`]: execution contexts
//! - [`error`]: asynchronous and usage errors

mod runtime;
mod utils;

pub mod error;
pub mod future;
pub mod stream;
pub mod time;
pub mod zone;

pub use error::{AsyncError, PanicError, StackTrace, StreamError, TimeoutError, UsageError};
pub use future::{Completer, Future, FutureOr, IntoFutureOr};
pub use runtime::task;
pub use runtime::yield_now::yield_now;
pub use runtime::{Clock, Runtime, RuntimeBuilder, UncaughtErrorPolicy};
pub use stream::{BroadcastStreamController, Stream, StreamController, StreamSubscription};
pub use time::Timer;
pub use zone::{Zone, ZoneSpecification, ZoneValues, print, run_zoned, run_zoned_guarded, schedule_microtask};

pub use eventide_macros::{main, test};
