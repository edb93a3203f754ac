use super::subscription::{StreamHandlers, StreamSubscription, SubscriptionHooks};
use super::{Stream, StreamSource};
use crate::error::{AsyncError, catch};
use crate::future::Future;
use crate::zone::Zone;

use std::cell::RefCell;
use std::rc::Rc;

/// The output side of a forwarding subscription.
pub(crate) struct ForwardSink<T: 'static> {
    output: StreamSubscription<T>,
}

impl<T: 'static> ForwardSink<T> {
    pub(crate) fn add(&self, data: T) {
        if !self.output.is_closed() {
            self.output.add(data);
        }
    }

    pub(crate) fn add_error(&self, error: AsyncError) {
        if !self.output.is_closed() {
            self.output.add_error(error);
        }
    }

    /// Reports an error raised by a user transform, letting the current zone
    /// replace it.
    pub(crate) fn add_caught(&self, error: AsyncError) {
        self.add_error(Zone::current().intercept_error(error));
    }

    pub(crate) fn close(&self) {
        self.output.close();
    }
}

/// Per-subscription event handling of a forwarding stream.
pub(crate) trait Forward<S, T: 'static> {
    fn handle_data(&mut self, data: S, sink: &ForwardSink<T>);

    fn handle_error(&mut self, error: AsyncError, sink: &ForwardSink<T>) {
        sink.add_error(error);
    }

    fn handle_done(&mut self, sink: &ForwardSink<T>) {
        sink.close();
    }

    /// The output is done before any event arrives.
    fn is_exhausted(&self) -> bool {
        false
    }
}

type ForwardFactory<S, T> = Rc<dyn Fn() -> Box<dyn Forward<S, T>>>;

/// A stream that listens to `source` and transforms its events per
/// subscription.
pub(crate) struct ForwardingStream<S, T> {
    source: Stream<S>,
    factory: ForwardFactory<S, T>,
}

impl<S: 'static, T: 'static> ForwardingStream<S, T> {
    pub(crate) fn new(source: Stream<S>, factory: impl Fn() -> Box<dyn Forward<S, T>> + 'static) -> Self {
        Self {
            source,
            factory: Rc::new(factory),
        }
    }
}

/// Relays pause, resume and cancel of the output to the upstream subscription.
pub(crate) struct Upstream<S> {
    subscription: RefCell<Option<StreamSubscription<S>>>,
}

impl<S> Upstream<S> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            subscription: RefCell::new(None),
        })
    }

    pub(crate) fn attach(&self, subscription: StreamSubscription<S>) {
        *self.subscription.borrow_mut() = Some(subscription);
    }
}

impl<S: 'static> SubscriptionHooks for Upstream<S> {
    fn on_pause(&self) {
        if let Some(subscription) = &*self.subscription.borrow() {
            subscription.pause();
        }
    }

    fn on_resume(&self) {
        if let Some(subscription) = &*self.subscription.borrow() {
            subscription.resume();
        }
    }

    fn on_cancel(&self) -> Option<Future<()>> {
        let subscription = self.subscription.borrow_mut().take()?;
        subscription.cancel_with_source()
    }
}

impl<S: 'static, T: 'static> StreamSource<T> for ForwardingStream<S, T> {
    fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        let forward = (self.factory)();
        if forward.is_exhausted() {
            self.source.listen_with(StreamHandlers::new()).cancel();
            return StreamSubscription::done(handlers);
        }

        let output = StreamSubscription::new(handlers);
        let upstream = Upstream::new();
        output.set_hooks(upstream.clone());

        let forward = Rc::new(RefCell::new(forward));
        let sink = Rc::new(ForwardSink { output });

        let on_data = {
            let forward = forward.clone();
            let sink = sink.clone();
            move |data| forward.borrow_mut().handle_data(data, &sink)
        };
        let on_error = {
            let forward = forward.clone();
            let sink = sink.clone();
            move |error| forward.borrow_mut().handle_error(error, &sink)
        };
        let on_done = {
            let sink = sink.clone();
            move || forward.borrow_mut().handle_done(&sink)
        };

        let subscription = self.source.listen_with(
            StreamHandlers::new()
                .on_data(on_data)
                .on_error(on_error)
                .on_done(on_done),
        );
        upstream.attach(subscription);

        sink.output.clone()
    }

    fn is_broadcast(&self) -> bool {
        self.source.is_broadcast()
    }
}

pub(crate) struct Map<S, T> {
    pub(crate) transform: Rc<dyn Fn(S) -> T>,
}

impl<S, T: 'static> Forward<S, T> for Map<S, T> {
    fn handle_data(&mut self, data: S, sink: &ForwardSink<T>) {
        match catch(|| (self.transform)(data)) {
            Ok(value) => sink.add(value),
            Err(error) => sink.add_caught(error),
        }
    }
}

pub(crate) struct TryMap<S, T> {
    pub(crate) transform: Rc<dyn Fn(S) -> Result<T, AsyncError>>,
}

impl<S, T: 'static> Forward<S, T> for TryMap<S, T> {
    fn handle_data(&mut self, data: S, sink: &ForwardSink<T>) {
        match catch(|| (self.transform)(data)) {
            Ok(Ok(value)) => sink.add(value),
            Ok(Err(error)) | Err(error) => sink.add_caught(error),
        }
    }
}

pub(crate) struct Filter<T> {
    pub(crate) test: Rc<dyn Fn(&T) -> bool>,
}

impl<T: 'static> Forward<T, T> for Filter<T> {
    fn handle_data(&mut self, data: T, sink: &ForwardSink<T>) {
        match catch(|| (self.test)(&data)) {
            Ok(true) => sink.add(data),
            Ok(false) => {}
            Err(error) => sink.add_caught(error),
        }
    }
}

pub(crate) struct Expand<S, T> {
    pub(crate) expand: Rc<dyn Fn(S) -> Box<dyn Iterator<Item = T>>>,
}

impl<S, T: 'static> Forward<S, T> for Expand<S, T> {
    fn handle_data(&mut self, data: S, sink: &ForwardSink<T>) {
        let outcome = catch(|| {
            for value in (self.expand)(data) {
                sink.add(value);
            }
        });
        if let Err(error) = outcome {
            sink.add_caught(error);
        }
    }
}

pub(crate) struct HandleError {
    pub(crate) on_error: Rc<dyn Fn(AsyncError)>,
    pub(crate) test: Option<Rc<dyn Fn(&AsyncError) -> bool>>,
}

impl<T: 'static> Forward<T, T> for HandleError {
    fn handle_data(&mut self, data: T, sink: &ForwardSink<T>) {
        sink.add(data);
    }

    fn handle_error(&mut self, error: AsyncError, sink: &ForwardSink<T>) {
        let matches = match &self.test {
            Some(test) => match catch(|| test(&error)) {
                Ok(matches) => matches,
                Err(failure) => {
                    sink.add_caught(failure);
                    return;
                }
            },
            None => true,
        };

        if !matches {
            sink.add_error(error);
            return;
        }

        if let Err(failure) = catch(|| (self.on_error)(error)) {
            sink.add_caught(failure);
        }
    }
}

pub(crate) struct Take {
    pub(crate) remaining: usize,
}

impl<T: 'static> Forward<T, T> for Take {
    fn handle_data(&mut self, data: T, sink: &ForwardSink<T>) {
        if self.remaining == 0 {
            return;
        }

        self.remaining -= 1;
        sink.add(data);
        if self.remaining == 0 {
            sink.close();
        }
    }

    fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

pub(crate) struct Skip {
    pub(crate) remaining: usize,
}

impl<T: 'static> Forward<T, T> for Skip {
    fn handle_data(&mut self, data: T, sink: &ForwardSink<T>) {
        if self.remaining > 0 {
            self.remaining -= 1;
            return;
        }
        sink.add(data);
    }
}

pub(crate) struct TakeWhile<T> {
    pub(crate) test: Rc<dyn Fn(&T) -> bool>,
}

impl<T: 'static> Forward<T, T> for TakeWhile<T> {
    fn handle_data(&mut self, data: T, sink: &ForwardSink<T>) {
        match catch(|| (self.test)(&data)) {
            Ok(true) => sink.add(data),
            Ok(false) => sink.close(),
            Err(error) => {
                sink.add_caught(error);
                sink.close();
            }
        }
    }
}

pub(crate) struct SkipWhile<T> {
    pub(crate) test: Rc<dyn Fn(&T) -> bool>,
    pub(crate) has_failed: bool,
}

impl<T: 'static> Forward<T, T> for SkipWhile<T> {
    fn handle_data(&mut self, data: T, sink: &ForwardSink<T>) {
        if self.has_failed {
            sink.add(data);
            return;
        }

        match catch(|| (self.test)(&data)) {
            Ok(true) => {}
            Ok(false) => {
                self.has_failed = true;
                sink.add(data);
            }
            Err(error) => {
                self.has_failed = true;
                sink.add_caught(error);
            }
        }
    }
}

pub(crate) struct Distinct<T> {
    pub(crate) equals: Rc<dyn Fn(&T, &T) -> bool>,
    pub(crate) previous: Option<T>,
}

impl<T: Clone + 'static> Forward<T, T> for Distinct<T> {
    fn handle_data(&mut self, data: T, sink: &ForwardSink<T>) {
        let Some(previous) = &self.previous else {
            self.previous = Some(data.clone());
            sink.add(data);
            return;
        };

        match catch(|| (self.equals)(previous, &data)) {
            Ok(true) => {}
            Ok(false) => {
                self.previous = Some(data.clone());
                sink.add(data);
            }
            Err(error) => sink.add_caught(error),
        }
    }
}
