//! Core runtime components.
//!
//! This module contains the event loop that everything else schedules onto:
//!
//! - the microtask queue with its priority lane,
//! - the timer heap, driven by a real or virtual clock,
//! - local tasks, so `async` code can await futures and streams,
//! - the thread-local runtime context used to reach the loop.
//!
//! Most users only touch [`RuntimeBuilder`], [`Runtime`], and [`task::spawn`].

mod core;
pub(crate) mod event_loop;
mod microtask;
mod ready;

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod timer;
pub(crate) mod yield_now;

pub mod task;

pub use self::core::Runtime;
pub use builder::{Clock, RuntimeBuilder, UncaughtErrorPolicy};
