//! Pausable, zone-aware event streams.
//!
//! - [`Stream`]: a source of data and error events ended by done, with
//!   forwarding combinators and consumers resolving to a [`Future`](crate::Future),
//! - [`StreamSubscription`]: the listener's handle for pause, resume and cancel,
//! - [`StreamController`] / [`BroadcastStreamController`]: the producing side,
//! - [`StreamTransformer`]: reusable stream-to-stream conversions,
//! - [`StreamIterator`]: pull-based reading.
//!
//! Events reach listeners one at a time. An event raised while a listener
//! callback is running, or while the subscription is paused, is buffered and
//! delivered from a later microtask.

mod adapters;
mod broadcast;
mod consumers;
mod controller;
mod core;
mod forwarding;
mod generate;
mod iterator;
mod pending;
mod sink;
mod subscription;
mod transformer;

pub(crate) use self::core::StreamSource;

pub use self::broadcast::{BroadcastStreamController, BroadcastStreamControllerBuilder, SourceSubscription};
pub use self::controller::{StreamController, StreamControllerBuilder};
pub use self::core::Stream;
pub use self::iterator::StreamIterator;
pub use self::sink::{EventSink, StreamConsumer};
pub use self::subscription::{StreamHandlers, StreamSubscription};
pub use self::transformer::{
    BindTransformer, HandlerTransformer, StreamTransformer, TransformSink, from_bind, from_handlers,
};
