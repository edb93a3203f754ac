use super::Stream;
use crate::error::AsyncError;
use crate::future::Future;

/// Receiver of stream events.
pub trait EventSink<T> {
    fn add(&self, data: T);
    fn add_error(&self, error: AsyncError);
    fn close(&self);
}

/// Destination for [`Stream::pipe`]: accepts whole streams.
pub trait StreamConsumer<T> {
    /// Consumes every event of `stream`; the future completes when it is done.
    fn add_stream(&self, stream: Stream<T>) -> Future<()>;

    /// Closes the consumer once no more streams will be added.
    fn close(&self) -> Future<()>;
}
