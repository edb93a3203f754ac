//! Local tasks driving `std` futures on the event loop.
//!
//! A task wraps an `async` block so it can await [`Future`](crate::Future)s
//! and stream consumers. Woken tasks are re-polled as ordinary microtasks, in
//! the zone that was current when they were spawned.

pub(crate) mod core;
pub(crate) mod waker;

pub(crate) use self::core::LocalTask;

pub use self::core::spawn;
