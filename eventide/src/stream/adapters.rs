use super::broadcast::{BroadcastStreamController, Relay, RelayStream, SourceSubscription};
use super::controller::{AddStreamTarget, StreamController};
use super::sink::EventSink;
use super::subscription::{StreamHandlers, StreamSubscription};
use super::transformer::StreamTransformer;
use super::Stream;
use crate::error::{AsyncError, StreamError, catch};
use crate::future::{FutureOr, IntoFutureOr};
use crate::time::Timer;
use crate::zone::Zone;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// A synchronous controller of the same kind as the source stream.
enum Output<T> {
    Single(StreamController<T>),
    Broadcast(BroadcastStreamController<T>),
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        match self {
            Output::Single(controller) => Output::Single(controller.clone()),
            Output::Broadcast(controller) => Output::Broadcast(controller.clone()),
        }
    }
}

impl<T: Clone + 'static> Output<T> {
    fn like<S: 'static>(source: &Stream<S>) -> Self {
        if source.is_broadcast() {
            Output::Broadcast(BroadcastStreamController::sync())
        } else {
            Output::Single(StreamController::sync())
        }
    }

    fn stream(&self) -> Stream<T> {
        match self {
            Output::Single(controller) => controller.stream(),
            Output::Broadcast(controller) => controller.stream(),
        }
    }

    fn set_on_listen(&self, f: impl Fn() + 'static) {
        match self {
            Output::Single(controller) => controller.set_on_listen(f),
            Output::Broadcast(controller) => controller.set_on_listen(f),
        }
    }

    /// Pause and resume only exist for single-subscription outputs.
    fn set_flow_control(&self, on_pause: impl Fn() + 'static, on_resume: impl Fn() + 'static) {
        if let Output::Single(controller) = self {
            controller.set_on_pause(on_pause);
            controller.set_on_resume(on_resume);
        }
    }

    fn set_on_cancel<S: 'static>(&self, source: StreamSubscription<S>) {
        match self {
            Output::Single(controller) => controller.set_on_cancel_with(move || source.cancel()),
            Output::Broadcast(controller) => controller.set_on_cancel(move || {
                source.cancel();
            }),
        }
    }
}

impl<T: Clone + 'static> EventSink<T> for Output<T> {
    fn add(&self, data: T) {
        match self {
            Output::Single(controller) => controller.add(data),
            Output::Broadcast(controller) => controller.add(data),
        }
    }

    fn add_error(&self, error: AsyncError) {
        match self {
            Output::Single(controller) => controller.add_error(error),
            Output::Broadcast(controller) => controller.add_error(error),
        }
    }

    fn close(&self) {
        match self {
            Output::Single(controller) => {
                controller.close();
            }
            Output::Broadcast(controller) => {
                controller.close();
            }
        }
    }
}

impl<T: Clone + 'static> Output<T> {
    fn add_error_unchecked(&self, error: AsyncError) {
        match self {
            Output::Single(controller) => controller.add_error_unchecked(error),
            Output::Broadcast(controller) => controller.add_error_unchecked(error),
        }
    }
}

type OnTimeout<T> = Rc<dyn Fn(&dyn EventSink<T>)>;

/// The timer of a `timeout` stream, restarted by every event.
struct Deadline<T> {
    zone: Zone,
    limit: Duration,
    output: Output<T>,
    on_timeout: Option<OnTimeout<T>>,
    timer: RefCell<Option<Timer>>,
}

impl<T: Clone + 'static> Deadline<T> {
    fn arm(self: &Rc<Self>) {
        let deadline = self.clone();
        let timer = self.zone.create_timer(self.limit, move || deadline.expire());
        *self.timer.borrow_mut() = Some(timer);
    }

    fn disarm(&self) {
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.cancel();
        }
    }

    fn rearm(self: &Rc<Self>) {
        self.disarm();
        self.arm();
    }

    fn expire(&self) {
        match &self.on_timeout {
            Some(on_timeout) => {
                let sink: &dyn EventSink<T> = &self.output;
                self.zone.run_guarded(|| on_timeout(sink));
            }
            None => self
                .output
                .add_error(AsyncError::new(StreamError::Timeout(self.limit))),
        }
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Fails with [`StreamError::Timeout`] every time no event arrives
    /// within `limit`. The stream goes on after the error.
    pub fn timeout(&self, limit: Duration) -> Stream<T> {
        self.bounded(limit, None)
    }

    /// Calls `on_timeout` every time no event arrives within `limit`. The
    /// sink it receives adds events to the returned stream.
    pub fn timeout_with(&self, limit: Duration, on_timeout: impl Fn(&dyn EventSink<T>) + 'static) -> Stream<T> {
        self.bounded(limit, Some(Rc::new(on_timeout)))
    }

    fn bounded(&self, limit: Duration, on_timeout: Option<OnTimeout<T>>) -> Stream<T> {
        let output = Output::like(self);
        let zone = Zone::current();
        let deadline = Rc::new(Deadline {
            zone,
            limit,
            output: output.clone(),
            on_timeout,
            timer: RefCell::new(None),
        });

        let source = self.clone();
        let listening = output.clone();
        output.set_on_listen(move || {
            deadline.arm();

            let on_data = {
                let deadline = deadline.clone();
                move |data| {
                    deadline.rearm();
                    deadline.output.add(data);
                }
            };
            let on_error = {
                let deadline = deadline.clone();
                move |error| {
                    deadline.rearm();
                    deadline.output.add_error_unchecked(error);
                }
            };
            let on_done = {
                let deadline = deadline.clone();
                move || {
                    deadline.disarm();
                    deadline.output.close();
                }
            };

            let subscription = source.listen_with(
                StreamHandlers::new()
                    .on_data(on_data)
                    .on_error(on_error)
                    .on_done(on_done),
            );

            let canceled = deadline.clone();
            let upstream = subscription.clone();
            match &listening {
                Output::Single(controller) => controller.set_on_cancel_with(move || {
                    canceled.disarm();
                    upstream.cancel()
                }),
                Output::Broadcast(controller) => controller.set_on_cancel(move || {
                    canceled.disarm();
                    upstream.cancel();
                }),
            }

            let paused = deadline.clone();
            let pausing = subscription.clone();
            let resumed = deadline.clone();
            listening.set_flow_control(
                move || {
                    pausing.pause();
                    paused.disarm();
                },
                move || {
                    subscription.resume();
                    resumed.arm();
                },
            );
        });

        output.stream()
    }

    /// Like [`map`](Self::map) with a conversion that may complete later.
    ///
    /// While a returned future is pending the source is paused, so output
    /// events keep the source order.
    pub fn async_map<U, R>(&self, convert: impl Fn(T) -> R + 'static) -> Stream<U>
    where
        U: Clone + 'static,
        R: IntoFutureOr<U> + 'static,
    {
        let output = Output::<U>::like(self);
        let convert = Rc::new(convert);

        let source = self.clone();
        let listening = output.clone();
        output.set_on_listen(move || {
            let on_error = {
                let output = listening.clone();
                move |error| output.add_error_unchecked(error)
            };
            let on_done = {
                let output = listening.clone();
                move || output.close()
            };
            let subscription = source.listen_with(StreamHandlers::new().on_error(on_error).on_done(on_done));

            let converting = subscription.clone();
            let output = listening.clone();
            let convert = convert.clone();
            subscription.on_data(move |data| {
                let converted = catch(|| convert(data).into_future_or());
                match converted {
                    Ok(FutureOr::Value(value)) => output.add(value),
                    Ok(FutureOr::Error(error)) | Err(error) => output.add_error(error),
                    Ok(FutureOr::Future(pending)) => {
                        converting.pause();
                        let on_value = output.clone();
                        let on_error = output.clone();
                        let resume = converting.clone();
                        pending
                            .then_or_else(
                                move |value| {
                                    on_value.add(value);
                                    Ok(())
                                },
                                move |error| {
                                    on_error.add_error_unchecked(error);
                                    Ok(())
                                },
                            )
                            .when_complete(move || {
                                resume.resume();
                                Ok(())
                            });
                    }
                }
            });

            listening.set_on_cancel(subscription.clone());
            let pausing = subscription.clone();
            listening.set_flow_control(move || pausing.pause(), move || subscription.resume());
        });

        output.stream()
    }

    /// A broadcast stream sharing one subscription on this stream.
    ///
    /// The source is listened to when the first listener subscribes and
    /// stays subscribed, even without listeners, until it is done.
    pub fn as_broadcast_stream(&self) -> Stream<T> {
        Stream::from_source(RelayStream(Relay::new(self.clone(), None, None)))
    }

    /// Like [`as_broadcast_stream`](Self::as_broadcast_stream), with callbacks
    /// run when the listener count leaves or reaches zero. They may pause,
    /// resume or cancel the source subscription.
    pub fn as_broadcast_stream_with(
        &self,
        on_listen: impl Fn(&SourceSubscription<T>) + 'static,
        on_cancel: impl Fn(&SourceSubscription<T>) + 'static,
    ) -> Stream<T> {
        Stream::from_source(RelayStream(Relay::new(
            self.clone(),
            Some(Rc::new(on_listen)),
            Some(Rc::new(on_cancel)),
        )))
    }
}

impl<T: 'static> Stream<T> {
    /// Applies `transformer` to this stream.
    pub fn transform<U>(&self, transformer: &impl StreamTransformer<T, U>) -> Stream<U> {
        transformer.bind(self.clone())
    }
}
