use super::controller::{AddStreamTarget, StreamController};
use super::pending::PendingEvents;
use super::subscription::{StreamHandlers, StreamSubscription};
use super::{Stream, StreamSource};
use crate::error::{AsyncError, UsageError, catch};
use crate::future::Future;
use crate::future::core::Listener;
use crate::time::{self, Timer};
use crate::zone::Zone;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// A broadcast stream that is done as soon as it is listened to.
struct Empty;

impl<T: 'static> StreamSource<T> for Empty {
    fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        StreamSubscription::done(handlers)
    }

    fn is_broadcast(&self) -> bool {
        true
    }
}

/// Data pulled lazily from an iterator, one event per microtask.
struct Generated<T> {
    items: RefCell<Option<Box<dyn Iterator<Item = T>>>>,
}

impl<T: 'static> StreamSource<T> for Generated<T> {
    fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        let Some(items) = self.items.borrow_mut().take() else {
            UsageError::AlreadyListened.raise();
        };

        let subscription = StreamSubscription::new(handlers);
        subscription.set_pending_events(PendingEvents::from_source(items));
        subscription
    }
}

impl<T: 'static> Stream<T> {
    /// A stream with no events besides done.
    pub fn empty() -> Stream<T> {
        Stream::from_source(Empty)
    }

    /// A single-subscription stream of one value.
    pub fn value(value: T) -> Stream<T> {
        let controller = StreamController::new();
        controller.add_unchecked(value);
        controller.close_unchecked();
        controller.stream()
    }

    /// A single-subscription stream of one error.
    pub fn error(error: AsyncError) -> Stream<T> {
        let controller = StreamController::new();
        controller.add_error_unchecked(error);
        controller.close_unchecked();
        controller.stream()
    }

    /// The items of `items`, pulled one per microtask once listened to.
    ///
    /// A panic while iterating becomes an error event; the stream is done
    /// after it.
    pub fn from_iter<I>(items: I) -> Stream<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        Stream::from_source(Generated {
            items: RefCell::new(Some(Box::new(items.into_iter()))),
        })
    }

    /// Emits `computation(n)` every `period`, counting from zero.
    ///
    /// The timer runs only while the stream is listened to and not paused.
    /// Resuming waits for the rest of the interrupted period. A panic in
    /// `computation` becomes an error event.
    pub fn periodic(period: Duration, computation: impl FnMut(u64) -> T + 'static) -> Stream<T> {
        let controller = StreamController::sync();
        let state = Rc::new(Periodic {
            controller: controller.clone(),
            period,
            computation: RefCell::new(Box::new(computation)),
            count: Cell::new(0),
            timer: RefCell::new(None),
            watch: Cell::new(Stopwatch::default()),
        });

        let listening = state.clone();
        controller.set_on_listen(move || listening.start());
        let pausing = state.clone();
        controller.set_on_pause(move || pausing.pause());
        let resuming = state.clone();
        controller.set_on_resume(move || resuming.resume());
        controller.set_on_cancel(move || state.stop());

        controller.stream()
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// A single-subscription stream of the future's outcome, then done.
    pub fn from_future(future: Future<T>) -> Stream<T> {
        let controller = StreamController::sync();
        let output = controller.clone();
        on_outcome(&future, move |outcome| {
            match outcome {
                Ok(value) => output.add_unchecked(value),
                Err(error) => output.add_error_unchecked(error),
            }
            output.close_unchecked();
        });
        controller.stream()
    }

    /// The outcomes of `futures` in completion order; done once all have
    /// completed.
    pub fn from_futures(futures: impl IntoIterator<Item = Future<T>>) -> Stream<T> {
        let controller = StreamController::sync();
        let remaining = Rc::new(Cell::new(0usize));

        for future in futures {
            remaining.set(remaining.get() + 1);
            let output = controller.clone();
            let remaining = remaining.clone();
            on_outcome(&future, move |outcome| {
                if output.is_closed() {
                    return;
                }
                match outcome {
                    Ok(value) => output.add_unchecked(value),
                    Err(error) => output.add_error_unchecked(error),
                }
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    output.close_unchecked();
                }
            });
        }

        if remaining.get() == 0 {
            controller.close_unchecked();
        }
        controller.stream()
    }
}

impl<T: Clone + 'static> Future<T> {
    /// A stream of this future's outcome.
    pub fn as_stream(&self) -> Stream<T> {
        Stream::from_future(self.clone())
    }
}

/// Runs `on_result` in the current zone once `future` completes.
fn on_outcome<T: Clone + 'static>(future: &Future<T>, on_result: impl FnOnce(Result<T, AsyncError>) + 'static) {
    let zone = Zone::current();
    let target = zone.clone();
    future.add_listener(Listener::new(zone, move |outcome, _| {
        target.run_guarded(|| on_result(outcome));
    }));
}

/// Running time of a periodic stream's current period.
#[derive(Debug, Clone, Copy, Default)]
struct Stopwatch {
    started: Option<Duration>,
    accumulated: Duration,
}

impl Stopwatch {
    fn elapsed(&self) -> Duration {
        match self.started {
            Some(started) => self.accumulated + time::now().saturating_sub(started),
            None => self.accumulated,
        }
    }

    fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        if self.started.is_some() {
            self.started = Some(time::now());
        }
    }

    fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(time::now());
        }
    }

    fn stop(&mut self) {
        self.accumulated = self.elapsed();
        self.started = None;
    }
}

struct Periodic<T> {
    controller: StreamController<T>,
    period: Duration,
    computation: RefCell<Box<dyn FnMut(u64) -> T>>,
    count: Cell<u64>,
    timer: RefCell<Option<Timer>>,
    watch: Cell<Stopwatch>,
}

impl<T: 'static> Periodic<T> {
    fn update_watch(&self, f: impl FnOnce(&mut Stopwatch)) {
        let mut watch = self.watch.get();
        f(&mut watch);
        self.watch.set(watch);
    }

    fn send_event(&self) {
        self.update_watch(Stopwatch::reset);

        let count = self.count.get();
        self.count.set(count + 1);

        let outcome = catch(|| {
            let mut computation = self.computation.borrow_mut();
            (*computation)(count)
        });
        match outcome {
            Ok(event) => self.controller.add_unchecked(event),
            Err(error) => self.controller.add_error(error),
        }
    }

    fn arm(self: &Rc<Self>) {
        let state = self.clone();
        let timer = Timer::periodic(self.period, move |_| state.send_event());
        *self.timer.borrow_mut() = Some(timer);
    }

    fn start(self: &Rc<Self>) {
        self.update_watch(Stopwatch::start);
        self.arm();
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.cancel();
        }
    }

    fn pause(&self) {
        self.update_watch(Stopwatch::stop);
        self.cancel_timer();
    }

    fn resume(self: &Rc<Self>) {
        let elapsed = self.watch.get().elapsed();
        self.update_watch(Stopwatch::start);

        let state = self.clone();
        let timer = Timer::new(self.period.saturating_sub(elapsed), move || {
            state.arm();
            state.send_event();
        });
        *self.timer.borrow_mut() = Some(timer);
    }

    fn stop(&self) {
        self.cancel_timer();
    }
}
