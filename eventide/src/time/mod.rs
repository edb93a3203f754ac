//! Time utilities.
//!
//! This module provides the timers every other primitive is built on:
//! - [`Timer`] for one-shot and periodic callbacks,
//! - [`sleep`] for awaiting a delay from `async` code,
//! - [`now`] for reading the loop clock.
//!
//! Under [`Clock::Virtual`](crate::Clock::Virtual) durations are simulated:
//! the loop jumps to the next deadline as soon as nothing else can run.

mod sleep;
mod timer;

#[doc(inline)]
pub use sleep::{Sleep, sleep};

#[doc(inline)]
pub use timer::Timer;

use crate::runtime::context::with_loop;

use std::time::Duration;

/// Loop time elapsed on the current runtime's clock.
///
/// # Panics
///
/// Panics if called outside the context of a running runtime.
pub fn now() -> Duration {
    with_loop("now", |event_loop| event_loop.now())
}
