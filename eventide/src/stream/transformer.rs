use super::forwarding::Upstream;
use super::sink::EventSink;
use super::subscription::{StreamHandlers, StreamSubscription};
use super::{Stream, StreamSource};
use crate::error::{AsyncError, UsageError, catch};

use std::cell::RefCell;
use std::rc::Rc;

/// Turns one stream into another.
///
/// Use [`from_handlers`] to react to individual events, or [`from_bind`] to
/// wrap a function building the output stream. Apply a transformer with
/// [`Stream::transform`].
pub trait StreamTransformer<S, T> {
    fn bind(&self, stream: Stream<S>) -> Stream<T>;
}

/// The output of a transformed stream, handed to event handlers.
///
/// Adding to it after closing panics with [`UsageError::AddAfterClose`].
pub struct TransformSink<T: 'static> {
    output: StreamSubscription<T>,
}

impl<T: 'static> Clone for TransformSink<T> {
    fn clone(&self) -> Self {
        Self {
            output: self.output.clone(),
        }
    }
}

impl<T: 'static> EventSink<T> for TransformSink<T> {
    fn add(&self, data: T) {
        if self.output.is_closed() {
            UsageError::AddAfterClose.raise();
        }
        self.output.add(data);
    }

    fn add_error(&self, error: AsyncError) {
        if self.output.is_closed() {
            UsageError::AddAfterClose.raise();
        }
        self.output.add_error(error);
    }

    fn close(&self) {
        if self.output.is_closed() {
            UsageError::AddAfterClose.raise();
        }
        self.output.close();
    }
}

type SinkMapper<S, T> = Rc<dyn Fn(TransformSink<T>) -> Rc<dyn EventSink<S>>>;

/// A stream whose events pass through a sink built for each listener.
struct SinkTransformed<S, T: 'static> {
    source: Stream<S>,
    mapper: SinkMapper<S, T>,
}

impl<S: 'static, T: 'static> StreamSource<T> for SinkTransformed<S, T> {
    fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        let output = StreamSubscription::new(handlers);
        let upstream = Upstream::new();
        output.set_hooks(upstream.clone());

        let sink = TransformSink { output: output.clone() };
        let input = (self.mapper)(sink.clone());

        let on_data = {
            let input = input.clone();
            let sink = sink.clone();
            move |data| {
                if let Err(error) = catch(|| input.add(data)) {
                    sink.add_error(error);
                }
            }
        };
        let on_error = {
            let input = input.clone();
            let sink = sink.clone();
            move |error| {
                if let Err(failure) = catch(|| input.add_error(error)) {
                    sink.add_error(failure);
                }
            }
        };
        let on_done = move || {
            if let Err(error) = catch(|| input.close()) {
                sink.add_error(error);
            }
        };

        let subscription = self.source.listen_with(
            StreamHandlers::new()
                .on_data(on_data)
                .on_error(on_error)
                .on_done(on_done),
        );
        upstream.attach(subscription);

        output
    }

    fn is_broadcast(&self) -> bool {
        self.source.is_broadcast()
    }
}

impl<T: 'static> Stream<T> {
    /// A stream whose events are written by a sink of `source` events.
    ///
    /// For every listener, `mapper` receives the output sink and returns the
    /// sink that `source` events are fed into. A panic while feeding an
    /// event becomes an error event.
    pub fn event_transformed<S, K>(source: Stream<S>, mapper: impl Fn(TransformSink<T>) -> K + 'static) -> Stream<T>
    where
        S: 'static,
        K: EventSink<S> + 'static,
    {
        let mapper: SinkMapper<S, T> = Rc::new(move |sink| Rc::new(mapper(sink)));
        Stream::from_source(SinkTransformed { source, mapper })
    }
}

type HandleData<S, T> = Rc<dyn Fn(S, &TransformSink<T>)>;
type HandleError<T> = Rc<dyn Fn(AsyncError, &TransformSink<T>)>;
type HandleDone<T> = Rc<dyn Fn(&TransformSink<T>)>;

/// A transformer calling a handler per event. See [`from_handlers`].
pub struct HandlerTransformer<S, T: 'static> {
    handle_data: HandleData<S, T>,
    handle_error: Option<HandleError<T>>,
    handle_done: Option<HandleDone<T>>,
}

impl<S, T: 'static> Clone for HandlerTransformer<S, T> {
    fn clone(&self) -> Self {
        Self {
            handle_data: self.handle_data.clone(),
            handle_error: self.handle_error.clone(),
            handle_done: self.handle_done.clone(),
        }
    }
}

impl<S: 'static, T: 'static> HandlerTransformer<S, T> {
    /// Handles error events. By default they pass through.
    pub fn handle_error(mut self, f: impl Fn(AsyncError, &TransformSink<T>) + 'static) -> Self {
        self.handle_error = Some(Rc::new(f));
        self
    }

    /// Handles the done event. By default the output is closed.
    pub fn handle_done(mut self, f: impl Fn(&TransformSink<T>) + 'static) -> Self {
        self.handle_done = Some(Rc::new(f));
        self
    }
}

/// Builds a transformer from an event handler.
///
/// # Examples
///
/// ```rust,ignore
/// let doubled = from_handlers(|v: u32, sink: &TransformSink<u32>| {
///     sink.add(v);
///     sink.add(v);
/// });
/// let stream = Stream::from_iter([1, 2]).transform(&doubled);
/// ```
pub fn from_handlers<S: 'static, T: 'static>(
    handle_data: impl Fn(S, &TransformSink<T>) + 'static,
) -> HandlerTransformer<S, T> {
    HandlerTransformer {
        handle_data: Rc::new(handle_data),
        handle_error: None,
        handle_done: None,
    }
}

/// The input sink of a [`HandlerTransformer`] for one listener.
struct HandlerSink<S, T: 'static> {
    handlers: HandlerTransformer<S, T>,

    /// `None` once closed.
    output: RefCell<Option<TransformSink<T>>>,
}

impl<S, T: 'static> HandlerSink<S, T> {
    fn output(&self) -> TransformSink<T> {
        match &*self.output.borrow() {
            Some(output) => output.clone(),
            None => UsageError::AddAfterClose.raise(),
        }
    }
}

impl<S: 'static, T: 'static> EventSink<S> for HandlerSink<S, T> {
    fn add(&self, data: S) {
        let output = self.output();
        (self.handlers.handle_data)(data, &output);
    }

    fn add_error(&self, error: AsyncError) {
        let output = self.output();
        match &self.handlers.handle_error {
            Some(handle_error) => handle_error(error, &output),
            None => output.add_error(error),
        }
    }

    fn close(&self) {
        let Some(output) = self.output.borrow_mut().take() else {
            return;
        };
        match &self.handlers.handle_done {
            Some(handle_done) => handle_done(&output),
            None => output.close(),
        }
    }
}

impl<S: 'static, T: 'static> StreamTransformer<S, T> for HandlerTransformer<S, T> {
    fn bind(&self, stream: Stream<S>) -> Stream<T> {
        let handlers = self.clone();
        Stream::event_transformed(stream, move |output| HandlerSink {
            handlers: handlers.clone(),
            output: RefCell::new(Some(output)),
        })
    }
}

/// A transformer wrapping a function from stream to stream. See [`from_bind`].
pub struct BindTransformer<S, T> {
    bind: Rc<dyn Fn(Stream<S>) -> Stream<T>>,
}

impl<S, T> Clone for BindTransformer<S, T> {
    fn clone(&self) -> Self {
        Self {
            bind: self.bind.clone(),
        }
    }
}

/// Builds a transformer from a function producing the output stream.
pub fn from_bind<S, T>(bind: impl Fn(Stream<S>) -> Stream<T> + 'static) -> BindTransformer<S, T> {
    BindTransformer { bind: Rc::new(bind) }
}

impl<S, T> StreamTransformer<S, T> for BindTransformer<S, T> {
    fn bind(&self, stream: Stream<S>) -> Stream<T> {
        (self.bind)(stream)
    }
}
