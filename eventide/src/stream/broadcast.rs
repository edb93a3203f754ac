use super::controller::{AddStreamState, AddStreamTarget, Notify, run_notification};
use super::pending::{Event, PendingEvents};
use super::sink::{EventSink, StreamConsumer};
use super::subscription::{StreamHandlers, StreamSubscription, SubscriptionHooks};
use super::{Stream, StreamSource};
use crate::error::{AsyncError, UsageError};
use crate::future::Future;
use crate::utils::LinkedSlab;
use crate::zone::Zone;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Events reach every listener from inside `add`.
    Sync,

    /// Events are queued on every listener.
    Async,

    /// Like `Sync`, but an event added while another is being delivered is
    /// queued and delivered right after it.
    Relay,
}

/// A listener of a broadcast controller.
struct Listener<T> {
    subscription: StreamSubscription<T>,

    /// The controller's event id this listener expects next. Listeners added
    /// while an event is being delivered expect the following one.
    event_id: Cell<bool>,
    firing: Cell<bool>,
    remove_after_firing: Cell<bool>,
}

pub(crate) struct Broadcast<T> {
    mode: Mode,
    listeners: RefCell<LinkedSlab<Rc<Listener<T>>>>,
    event_id: Cell<bool>,
    firing: Cell<bool>,
    closed: Cell<bool>,
    adding: RefCell<Option<AddStreamState<T>>>,
    done: RefCell<Option<Future<()>>>,
    on_listen: RefCell<Option<Notify>>,
    on_cancel: RefCell<Option<Notify>>,

    /// Events added during a delivery, in `Relay` mode.
    pending: RefCell<PendingEvents<T>>,
}

/// The producing side of a broadcast stream.
///
/// Any number of listeners may subscribe; each event goes to every listener
/// subscribed when it is added, in subscription order. Listeners that
/// subscribe while an event is being delivered only see later events.
/// Nothing is buffered while there are no listeners.
///
/// `on_listen` runs when the first listener subscribes and `on_cancel` when
/// the last one leaves, every time that happens.
///
/// A [`sync`](BroadcastStreamController::sync) controller delivers from
/// inside `add` and panics with [`UsageError::FireWhileFiring`] when a
/// listener adds an event while receiving one.
///
/// # Examples
///
/// ```rust,ignore
/// let controller = BroadcastStreamController::new();
/// let first = controller.stream().to_list();
/// let second = controller.stream().to_list();
///
/// controller.add(1);
/// controller.close();
/// ```
pub struct BroadcastStreamController<T>(Rc<Broadcast<T>>);

impl<T> Clone for BroadcastStreamController<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + 'static> BroadcastStreamController<T> {
    pub fn new() -> Self {
        Self::with_mode(Mode::Async)
    }

    pub fn sync() -> Self {
        Self::with_mode(Mode::Sync)
    }

    pub fn builder() -> BroadcastStreamControllerBuilder<T> {
        BroadcastStreamControllerBuilder::new()
    }

    pub(crate) fn with_mode(mode: Mode) -> Self {
        Self(Rc::new(Broadcast {
            mode,
            listeners: RefCell::new(LinkedSlab::new()),
            event_id: Cell::new(false),
            firing: Cell::new(false),
            closed: Cell::new(false),
            adding: RefCell::new(None),
            done: RefCell::new(None),
            on_listen: RefCell::new(None),
            on_cancel: RefCell::new(None),
            pending: RefCell::new(PendingEvents::new()),
        }))
    }

    pub fn stream(&self) -> Stream<T> {
        Stream::from_source(BroadcastStream {
            controller: self.clone(),
        })
    }

    /// Runs when the first listener subscribes.
    pub fn set_on_listen(&self, f: impl Fn() + 'static) {
        *self.0.on_listen.borrow_mut() = Some(Rc::new(f));
    }

    /// Runs when the last listener leaves.
    pub fn set_on_cancel(&self, f: impl Fn() + 'static) {
        *self.0.on_cancel.borrow_mut() = Some(Rc::new(f));
    }

    pub fn has_listener(&self) -> bool {
        !self.0.listeners.borrow().is_empty()
    }

    fn has_one_listener(&self) -> bool {
        self.0.listeners.borrow().len() == 1
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.get()
    }

    /// Broadcast streams never pause their source.
    pub fn is_paused(&self) -> bool {
        false
    }

    fn is_adding_stream(&self) -> bool {
        self.0.adding.borrow().is_some()
    }

    fn firing_forbidden(&self) -> bool {
        self.0.mode != Mode::Async && self.0.firing.get()
    }

    #[track_caller]
    fn check_may_add(&self) {
        if self.firing_forbidden() {
            UsageError::FireWhileFiring.raise();
        }
        if self.is_closed() {
            UsageError::AddAfterClose.raise();
        }
        if self.is_adding_stream() {
            UsageError::AddWhileAddingStream.raise();
        }
    }

    /// Whether a relay controller must queue events added now.
    fn must_queue(&self) -> bool {
        self.0.mode == Mode::Relay && !self.is_closed() && self.0.firing.get()
    }

    /// Sends a data event to every current listener.
    ///
    /// # Panics
    ///
    /// Panics if the controller is closed, a stream is being added, or (for a
    /// sync controller) an event is being delivered.
    #[track_caller]
    pub fn add(&self, value: T) {
        if self.must_queue() {
            self.0.pending.borrow_mut().push(Event::Data(value));
            return;
        }

        self.check_may_add();
        self.send_data(value);
        self.flush_pending();
    }

    #[track_caller]
    pub fn add_error(&self, error: AsyncError) {
        if self.must_queue() {
            self.0.pending.borrow_mut().push(Event::Error(error));
            return;
        }

        self.check_may_add();
        let error = Zone::current().intercept_error(error);
        self.send_error(error);
        self.flush_pending();
    }

    /// Closes the stream, sending the done event to every listener.
    ///
    /// Returns the [`done`](Self::done) future.
    #[track_caller]
    pub fn close(&self) -> Future<()> {
        if self.is_closed() {
            return self.done();
        }

        if self.must_queue() {
            self.0.pending.borrow_mut().push(Event::Done);
            self.0.closed.set(true);
            return self.done();
        }

        self.check_may_add();
        self.0.closed.set(true);
        let done = self.done();
        self.send_done();
        done
    }

    /// Completes once the controller is closed and every listener is gone.
    pub fn done(&self) -> Future<()> {
        self.0.done.borrow_mut().get_or_insert_with(Future::incomplete).clone()
    }

    /// Forwards every event of `source` to the listeners until it is done.
    #[track_caller]
    pub fn add_stream(&self, source: Stream<T>, cancel_on_error: bool) -> Future<()> {
        self.check_may_add();
        let state = AddStreamState::start(self, &source, cancel_on_error);
        let done = state.done();
        *self.0.adding.borrow_mut() = Some(state);
        done
    }

    fn flush_pending(&self) {
        loop {
            let event = self.0.pending.borrow_mut().pop_queued();
            match event {
                Some(Event::Data(data)) => self.send_data(data),
                Some(Event::Error(error)) => self.send_error(error),
                Some(Event::Done) => self.send_done(),
                None => return,
            }
        }
    }

    fn first_listener(&self) -> Option<Rc<Listener<T>>> {
        let listeners = self.0.listeners.borrow();
        listeners.first().and_then(|key| listeners.get(key).cloned())
    }

    fn snapshot(&self) -> Vec<Rc<Listener<T>>> {
        self.0.listeners.borrow().values().cloned().collect()
    }

    fn send_data(&self, data: T) {
        match self.0.mode {
            Mode::Async => {
                for listener in self.snapshot() {
                    listener.subscription.add_pending(Event::Data(data.clone()));
                }
            }
            Mode::Sync | Mode::Relay => {
                if !self.has_listener() {
                    return;
                }

                if self.has_one_listener() {
                    self.0.firing.set(true);
                    if let Some(listener) = self.first_listener() {
                        listener.subscription.add(data);
                    }
                    self.0.firing.set(false);

                    if !self.has_listener() {
                        self.call_on_cancel();
                    }
                    return;
                }

                self.for_each_listener(|subscription| subscription.add(data.clone()));
            }
        }
    }

    fn send_error(&self, error: AsyncError) {
        match self.0.mode {
            Mode::Async => {
                for listener in self.snapshot() {
                    listener.subscription.add_pending(Event::Error(error.clone()));
                }
            }
            Mode::Sync | Mode::Relay => {
                if self.has_listener() {
                    self.for_each_listener(|subscription| subscription.add_error(error.clone()));
                }
            }
        }
    }

    fn send_done(&self) {
        if !self.has_listener() {
            let done = self.done();
            if done.may_complete() {
                done.complete_async(Ok(()));
            }
            return;
        }

        match self.0.mode {
            Mode::Async => {
                for listener in self.snapshot() {
                    listener.subscription.add_pending(Event::Done);
                }
            }
            Mode::Sync | Mode::Relay => self.for_each_listener(|subscription| subscription.close()),
        }
    }

    /// Delivers one event to every listener subscribed before it started.
    fn for_each_listener(&self, action: impl Fn(&StreamSubscription<T>)) {
        if self.0.firing.get() {
            UsageError::FireWhileFiring.raise();
        }
        if !self.has_listener() {
            return;
        }

        let id = self.0.event_id.get();
        self.0.event_id.set(!id);
        self.0.firing.set(true);

        let mut cursor = self.0.listeners.borrow().first();
        while let Some(key) = cursor {
            let listener = self.0.listeners.borrow().get(key).cloned();
            let Some(listener) = listener else {
                break;
            };

            if listener.event_id.get() != id {
                cursor = self.0.listeners.borrow().next(key);
                continue;
            }

            listener.firing.set(true);
            action(&listener.subscription);
            listener.event_id.set(!id);

            cursor = self.0.listeners.borrow().next(key);
            if listener.remove_after_firing.get() {
                self.0.listeners.borrow_mut().remove(key);
            }
            listener.firing.set(false);
        }

        self.0.firing.set(false);
        if !self.has_listener() {
            self.call_on_cancel();
        }
    }

    fn call_on_cancel(&self) {
        *self.0.pending.borrow_mut() = PendingEvents::new();

        if self.is_closed() {
            let done = self.done();
            if done.may_complete() {
                done.complete_async(Ok(()));
            }
        }

        let on_cancel = self.0.on_cancel.borrow().clone();
        run_notification(on_cancel);

        if self.is_closed() {
            // A closed controller never gets another listener.
            self.0.on_listen.borrow_mut().take();
            self.0.on_cancel.borrow_mut().take();
        }
    }

    fn subscribe(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        if self.is_closed() {
            return StreamSubscription::done(handlers);
        }

        let subscription = StreamSubscription::new(handlers);
        let listener = Rc::new(Listener {
            subscription: subscription.clone(),
            event_id: Cell::new(self.0.event_id.get()),
            firing: Cell::new(false),
            remove_after_firing: Cell::new(false),
        });

        let key = self.0.listeners.borrow_mut().push_back(listener.clone());
        subscription.set_hooks(Rc::new(BroadcastHooks {
            controller: self.clone(),
            key,
            listener,
        }));

        if self.has_one_listener() {
            let on_listen = self.0.on_listen.borrow().clone();
            run_notification(on_listen);
        }
        subscription
    }

    fn record_cancel(&self, key: usize, listener: &Rc<Listener<T>>) {
        let registered = self
            .0
            .listeners
            .borrow()
            .get(key)
            .is_some_and(|current| Rc::ptr_eq(current, listener));
        if !registered {
            return;
        }

        if listener.firing.get() {
            listener.remove_after_firing.set(true);
            return;
        }

        self.0.listeners.borrow_mut().remove(key);
        if !self.0.firing.get() && !self.has_listener() {
            self.call_on_cancel();
        }
    }
}

impl<T: Clone + 'static> AddStreamTarget<T> for BroadcastStreamController<T> {
    fn add_unchecked(&self, data: T) {
        self.send_data(data);
    }

    fn add_error_unchecked(&self, error: AsyncError) {
        self.send_error(error);
    }

    fn finish_add_stream(&self) {
        let adding = self.0.adding.borrow_mut().take();
        if let Some(adding) = adding {
            adding.complete();
        }
    }
}

impl<T: Clone + 'static> Default for BroadcastStreamController<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> EventSink<T> for BroadcastStreamController<T> {
    fn add(&self, data: T) {
        BroadcastStreamController::add(self, data);
    }

    fn add_error(&self, error: AsyncError) {
        BroadcastStreamController::add_error(self, error);
    }

    fn close(&self) {
        BroadcastStreamController::close(self);
    }
}

impl<T: Clone + 'static> StreamConsumer<T> for BroadcastStreamController<T> {
    fn add_stream(&self, stream: Stream<T>) -> Future<()> {
        BroadcastStreamController::add_stream(self, stream, false)
    }

    fn close(&self) -> Future<()> {
        BroadcastStreamController::close(self)
    }
}

impl<T> fmt::Debug for BroadcastStreamController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastStreamController")
            .field("mode", &self.0.mode)
            .field("listeners", &self.0.listeners.borrow().len())
            .field("firing", &self.0.firing.get())
            .field("closed", &self.0.closed.get())
            .finish()
    }
}

struct BroadcastHooks<T> {
    controller: BroadcastStreamController<T>,
    key: usize,
    listener: Rc<Listener<T>>,
}

impl<T: Clone + 'static> SubscriptionHooks for BroadcastHooks<T> {
    fn on_cancel(&self) -> Option<Future<()>> {
        self.controller.record_cancel(self.key, &self.listener);
        None
    }
}

struct BroadcastStream<T> {
    controller: BroadcastStreamController<T>,
}

impl<T: Clone + 'static> StreamSource<T> for BroadcastStream<T> {
    fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        self.controller.subscribe(handlers)
    }

    fn is_broadcast(&self) -> bool {
        true
    }
}

/// Builds a [`BroadcastStreamController`] with its callbacks.
pub struct BroadcastStreamControllerBuilder<T> {
    mode: Mode,
    on_listen: Option<Notify>,
    on_cancel: Option<Notify>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Clone + 'static> BroadcastStreamControllerBuilder<T> {
    pub fn new() -> Self {
        Self {
            mode: Mode::Async,
            on_listen: None,
            on_cancel: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.mode = if sync { Mode::Sync } else { Mode::Async };
        self
    }

    pub fn on_listen(mut self, f: impl Fn() + 'static) -> Self {
        self.on_listen = Some(Rc::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl Fn() + 'static) -> Self {
        self.on_cancel = Some(Rc::new(f));
        self
    }

    pub fn build(self) -> BroadcastStreamController<T> {
        let controller = BroadcastStreamController::with_mode(self.mode);
        *controller.0.on_listen.borrow_mut() = self.on_listen;
        *controller.0.on_cancel.borrow_mut() = self.on_cancel;
        controller
    }
}

impl<T: Clone + 'static> Default for BroadcastStreamControllerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The single subscription a [`Stream::as_broadcast_stream_with`] stream
/// holds on its source, as handed to its `on_listen` and `on_cancel`
/// callbacks.
pub struct SourceSubscription<T>(Rc<Relay<T>>);

impl<T: Clone + 'static> SourceSubscription<T> {
    pub fn pause(&self) {
        if let Some(subscription) = &*self.0.subscription.borrow() {
            subscription.pause();
        }
    }

    pub fn pause_until(&self, signal: Future<()>) {
        if let Some(subscription) = &*self.0.subscription.borrow() {
            subscription.pause_until(signal);
        }
    }

    pub fn resume(&self) {
        if let Some(subscription) = &*self.0.subscription.borrow() {
            subscription.resume();
        }
    }

    /// Cancels the source. The broadcast stream delivers nothing more.
    pub fn cancel(&self) {
        self.0.cancel_source();
    }

    pub fn is_paused(&self) -> bool {
        self.0
            .subscription
            .borrow()
            .as_ref()
            .is_some_and(StreamSubscription::is_paused)
    }
}

type SourceCallback<T> = Rc<dyn Fn(&SourceSubscription<T>)>;

/// Shares one subscription on a source stream between any number of
/// listeners.
pub(crate) struct Relay<T> {
    source: Stream<T>,
    zone: Zone,
    controller: RefCell<Option<BroadcastStreamController<T>>>,
    subscription: RefCell<Option<StreamSubscription<T>>>,
    on_listen: Option<SourceCallback<T>>,
    on_cancel: Option<SourceCallback<T>>,

    /// Holds the relay alive while the broadcast stream has listeners.
    active: RefCell<Option<Rc<Relay<T>>>>,
}

impl<T: Clone + 'static> Relay<T> {
    pub(crate) fn new(
        source: Stream<T>,
        on_listen: Option<SourceCallback<T>>,
        on_cancel: Option<SourceCallback<T>>,
    ) -> Rc<Self> {
        let relay = Rc::new(Self {
            source,
            zone: Zone::current(),
            controller: RefCell::new(None),
            subscription: RefCell::new(None),
            on_listen,
            on_cancel,
            active: RefCell::new(None),
        });

        let controller = BroadcastStreamController::with_mode(Mode::Relay);
        let listening = Rc::downgrade(&relay);
        controller.set_on_listen(move || {
            if let Some(relay) = listening.upgrade() {
                *relay.active.borrow_mut() = Some(relay.clone());
                relay.notify(relay.on_listen.as_ref());
            }
        });
        let canceling = Rc::downgrade(&relay);
        controller.set_on_cancel(move || {
            if let Some(relay) = canceling.upgrade() {
                relay.on_last_cancel();
            }
        });
        *relay.controller.borrow_mut() = Some(controller);

        relay
    }

    fn notify(self: &Rc<Self>, callback: Option<&SourceCallback<T>>) {
        if let Some(callback) = callback {
            let handle = SourceSubscription(self.clone());
            self.zone.run(|| callback(&handle));
        }
    }

    fn on_last_cancel(self: &Rc<Self>) {
        let shutdown = self
            .controller
            .borrow()
            .as_ref()
            .is_none_or(BroadcastStreamController::is_closed);

        self.notify(self.on_cancel.as_ref());

        if shutdown {
            let subscription = self.subscription.borrow_mut().take();
            if let Some(subscription) = subscription {
                subscription.cancel();
            }
        }

        let active = self.active.borrow_mut().take();
        drop(active);
    }

    fn cancel_source(&self) {
        let Some(subscription) = self.subscription.borrow_mut().take() else {
            return;
        };
        let controller = self.controller.borrow_mut().take();
        subscription.cancel();
        drop(controller);
    }

    pub(crate) fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        let controller = self.controller.borrow().clone();
        let Some(controller) = controller.filter(|controller| !controller.is_closed()) else {
            return StreamSubscription::done(handlers);
        };

        if self.subscription.borrow().is_none() {
            let on_data = {
                let controller = controller.clone();
                move |data| controller.add(data)
            };
            let on_error = {
                let controller = controller.clone();
                move |error| controller.add_error(error)
            };
            let on_done = {
                let controller = controller.clone();
                move || {
                    controller.close();
                }
            };

            let subscription = self.source.listen_with(
                StreamHandlers::new()
                    .on_data(on_data)
                    .on_error(on_error)
                    .on_done(on_done),
            );
            *self.subscription.borrow_mut() = Some(subscription);
        }

        controller.subscribe(handlers)
    }
}

pub(crate) struct RelayStream<T>(pub(crate) Rc<Relay<T>>);

impl<T: Clone + 'static> StreamSource<T> for RelayStream<T> {
    fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        self.0.listen(handlers)
    }

    fn is_broadcast(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeBuilder;

    #[test]
    fn test_relay_queues_events_added_during_delivery() {
        let runtime = RuntimeBuilder::new().build();
        let seen = Rc::new(RefCell::new(Vec::new()));

        runtime.run(|| {
            let controller = BroadcastStreamController::<u32>::with_mode(Mode::Relay);

            let (log, reentrant) = (seen.clone(), controller.clone());
            controller.stream().listen(move |v| {
                log.borrow_mut().push(format!("x{v}"));
                if v == 1 {
                    reentrant.add(2);
                }
            });
            let log = seen.clone();
            controller.stream().listen(move |v| log.borrow_mut().push(format!("y{v}")));

            controller.add(1);
        });

        assert_eq!(*seen.borrow(), vec!["x1", "y1", "x2", "y2"]);
    }
}
