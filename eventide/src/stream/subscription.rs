use super::pending::{Event, PendingEvents};
use crate::error::{AsyncError, catch};
use crate::future::Future;
use crate::zone::{self, Registered, Zone};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Callbacks for [`Stream::listen_with`](super::Stream::listen_with).
///
/// # Examples
///
/// ```rust,ignore
/// let subscription = stream.listen_with(
///     StreamHandlers::new()
///         .on_data(|v| println!("{v}"))
///         .on_error(|e| eprintln!("{e}"))
///         .on_done(|| println!("done"))
///         .cancel_on_error(true),
/// );
/// ```
pub struct StreamHandlers<T> {
    pub(crate) on_data: Option<Box<dyn FnMut(T)>>,
    pub(crate) on_error: Option<Box<dyn FnMut(AsyncError)>>,
    pub(crate) on_done: Option<Box<dyn FnMut()>>,
    pub(crate) cancel_on_error: bool,
}

impl<T> StreamHandlers<T> {
    pub fn new() -> Self {
        Self {
            on_data: None,
            on_error: None,
            on_done: None,
            cancel_on_error: false,
        }
    }

    pub fn on_data(mut self, f: impl FnMut(T) + 'static) -> Self {
        self.on_data = Some(Box::new(f));
        self
    }

    /// Without an error handler, errors go to the zone's uncaught error handler.
    pub fn on_error(mut self, f: impl FnMut(AsyncError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_done(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    /// Cancel the subscription on the first error, after delivering it.
    pub fn cancel_on_error(mut self, cancel: bool) -> Self {
        self.cancel_on_error = cancel;
        self
    }
}

impl<T> Default for StreamHandlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reactions of the event source to state changes of its subscription.
pub(crate) trait SubscriptionHooks {
    fn on_pause(&self) {}
    fn on_resume(&self) {}

    /// Returns a future when cleanup completes asynchronously.
    fn on_cancel(&self) -> Option<Future<()>> {
        None
    }
}

type DataHandler<T> = Rc<RefCell<Registered<Box<dyn FnMut(T)>>>>;
type ErrorHandler = Rc<RefCell<Registered<Box<dyn FnMut(AsyncError)>>>>;
type DoneHandler = Rc<RefCell<Registered<Box<dyn FnMut()>>>>;

struct Handlers<T> {
    data: Option<DataHandler<T>>,
    error: Option<ErrorHandler>,
    done: Option<DoneHandler>,
}

/// Where a subscription is in its life. `closed` records whether the done
/// event was added before the subscription stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Lifecycle {
    #[default]
    Active,

    /// No further events will be added; done is not delivered yet.
    Closed,

    /// Canceled, with an error or done event waiting for the source's cleanup.
    WaitForCancel { closed: bool },

    Canceled { closed: bool },
}

impl Lifecycle {
    fn is_canceled(self) -> bool {
        matches!(self, Lifecycle::WaitForCancel { .. } | Lifecycle::Canceled { .. })
    }

    fn is_closed(self) -> bool {
        match self {
            Lifecycle::Active => false,
            Lifecycle::Closed => true,
            Lifecycle::WaitForCancel { closed } | Lifecycle::Canceled { closed } => closed,
        }
    }

    fn is_waiting_for_cancel(self) -> bool {
        matches!(self, Lifecycle::WaitForCancel { .. })
    }

    fn close(self) -> Self {
        debug_assert_eq!(self, Lifecycle::Active, "only an active subscription closes");
        Lifecycle::Closed
    }

    /// Stops delivery. A subscription already waiting for cleanup keeps waiting.
    fn cancel(self) -> Self {
        match self {
            Lifecycle::WaitForCancel { .. } => self,
            _ => Lifecycle::Canceled { closed: self.is_closed() },
        }
    }

    fn wait_for_cancel(self) -> Self {
        Lifecycle::WaitForCancel { closed: self.is_closed() }
    }

    /// Drops an event waiting for cleanup.
    fn stop_waiting(self) -> Self {
        match self {
            Lifecycle::WaitForCancel { closed } => Lifecycle::Canceled { closed },
            _ => self,
        }
    }

    /// The done event was delivered.
    fn finish(self) -> Self {
        debug_assert!(self.is_waiting_for_cancel(), "done is delivered only after cleanup");
        Lifecycle::Canceled { closed: true }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    lifecycle: Lifecycle,
    cancel_on_error: bool,

    /// The source was asked to pause.
    input_paused: bool,
    in_callback: bool,
    has_pending: bool,
    pause_count: u32,
}

impl Flags {
    fn is_canceled(&self) -> bool {
        self.lifecycle.is_canceled()
    }

    fn is_paused(&self) -> bool {
        self.pause_count > 0
    }

    fn can_fire(&self) -> bool {
        !self.in_callback && !self.has_pending && !self.is_paused()
    }
}

struct Inner<T> {
    zone: Zone,
    flags: Cell<Flags>,
    handlers: RefCell<Handlers<T>>,
    pending: RefCell<Option<PendingEvents<T>>>,
    cancel_future: RefCell<Option<Future<()>>>,
    hooks: RefCell<Option<Rc<dyn SubscriptionHooks>>>,
}

/// A listener's handle on a stream.
///
/// Events are delivered one at a time, in the zone the subscription was
/// created in. While a callback is running, or while paused, new events are
/// buffered and delivered later, each from its own microtask.
///
/// The handle is shared: clones control the same subscription.
pub struct StreamSubscription<T>(Rc<Inner<T>>);

impl<T> Clone for StreamSubscription<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> StreamSubscription<T> {
    pub(crate) fn new(handlers: StreamHandlers<T>) -> Self {
        let zone = Zone::current();
        let subscription = Self(Rc::new(Inner {
            zone,
            flags: Cell::new(Flags {
                cancel_on_error: handlers.cancel_on_error,
                ..Flags::default()
            }),
            handlers: RefCell::new(Handlers {
                data: None,
                error: None,
                done: None,
            }),
            pending: RefCell::new(None),
            cancel_future: RefCell::new(None),
            hooks: RefCell::new(None),
        }));

        if let Some(f) = handlers.on_data {
            subscription.set_data_handler(f);
        }
        if let Some(f) = handlers.on_error {
            subscription.set_error_handler(f);
        }
        if let Some(f) = handlers.on_done {
            subscription.set_done_handler(f);
        }

        subscription
    }

    /// A subscription on a stream that is already done: it only delivers the
    /// done event, from a microtask.
    pub(crate) fn done(handlers: StreamHandlers<T>) -> Self {
        let subscription = Self::new(handlers);
        subscription.update(|flags| flags.lifecycle = flags.lifecycle.close());
        subscription.add_pending(Event::Done);
        subscription
    }

    fn flags(&self) -> Flags {
        self.0.flags.get()
    }

    fn update(&self, f: impl FnOnce(&mut Flags)) {
        let mut flags = self.0.flags.get();
        f(&mut flags);
        self.0.flags.set(flags);
    }

    pub(crate) fn zone(&self) -> &Zone {
        &self.0.zone
    }

    pub(crate) fn set_hooks(&self, hooks: Rc<dyn SubscriptionHooks>) {
        *self.0.hooks.borrow_mut() = Some(hooks);
    }

    fn hooks(&self) -> Option<Rc<dyn SubscriptionHooks>> {
        self.0.hooks.borrow().clone()
    }

    fn set_data_handler(&self, f: Box<dyn FnMut(T)>) {
        let registered = self.zone().register_unary_callback(f);
        self.0.handlers.borrow_mut().data = Some(Rc::new(RefCell::new(registered)));
    }

    fn set_error_handler(&self, f: Box<dyn FnMut(AsyncError)>) {
        let registered = self.zone().register_unary_callback(f);
        self.0.handlers.borrow_mut().error = Some(Rc::new(RefCell::new(registered)));
    }

    fn set_done_handler(&self, f: Box<dyn FnMut()>) {
        let registered = self.zone().register_callback(f);
        self.0.handlers.borrow_mut().done = Some(Rc::new(RefCell::new(registered)));
    }

    /// Drops the callbacks once no event can reach them anymore.
    fn release_handlers(&self) {
        let released = std::mem::replace(
            &mut *self.0.handlers.borrow_mut(),
            Handlers {
                data: None,
                error: None,
                done: None,
            },
        );
        drop(released);
    }

    /// Replaces the data handler.
    pub fn on_data(&self, f: impl FnMut(T) + 'static) {
        self.set_data_handler(Box::new(f));
    }

    /// Replaces the error handler.
    pub fn on_error(&self, f: impl FnMut(AsyncError) + 'static) {
        self.set_error_handler(Box::new(f));
    }

    /// Replaces the done handler.
    pub fn on_done(&self, f: impl FnMut() + 'static) {
        self.set_done_handler(Box::new(f));
    }

    pub fn is_paused(&self) -> bool {
        self.flags().is_paused()
    }

    /// Pauses delivery. Each call needs a matching [`resume`](Self::resume).
    pub fn pause(&self) {
        let flags = self.flags();
        if flags.is_canceled() {
            return;
        }

        let was_paused = flags.is_paused();
        let was_input_paused = flags.input_paused;
        self.update(|flags| {
            flags.pause_count += 1;
            flags.input_paused = true;
        });

        if !was_paused {
            if let Some(pending) = self.0.pending.borrow_mut().as_mut() {
                pending.cancel_schedule();
            }
        }

        if !was_input_paused && !flags.in_callback {
            self.guard_callback(|hooks| hooks.on_pause());
        }
    }

    /// Pauses until `signal` completes, then resumes.
    pub fn pause_until(&self, signal: Future<()>) {
        self.pause();
        let subscription = self.clone();
        signal.when_complete(move || {
            subscription.resume();
            Ok(())
        });
    }

    pub fn resume(&self) {
        let flags = self.flags();
        if flags.is_canceled() || !flags.is_paused() {
            return;
        }

        self.update(|flags| flags.pause_count -= 1);
        if self.flags().is_paused() {
            return;
        }

        let has_events = self.flags().has_pending && !self.pending_is_empty();
        if has_events {
            self.schedule_pending();
        } else {
            self.update(|flags| flags.input_paused = false);
            if !self.flags().in_callback {
                self.guard_callback(|hooks| hooks.on_resume());
            }
        }
    }

    /// Stops delivery and releases the source.
    ///
    /// Returns a future completing when the source finished its cleanup.
    /// A pending error or done event that was waiting for cleanup is dropped.
    pub fn cancel(&self) -> Future<()> {
        self.update(|flags| flags.lifecycle = flags.lifecycle.stop_waiting());
        if !self.flags().is_canceled() {
            self.cancel_source();
        }
        self.release_handlers();

        let cancel_future = self.0.cancel_future.borrow().clone();
        cancel_future.unwrap_or_else(|| Future::completed(()))
    }

    /// Replaces the done and error handlers with ones completing the
    /// returned future: with `value` when the stream is done, or with the
    /// first error after cancelling.
    pub fn as_future<E: Clone + 'static>(&self, value: E) -> Future<E> {
        let result = Future::<E>::incomplete();

        let target = result.clone();
        self.on_done(move || {
            if target.may_complete() {
                target.complete_now(Ok(value.clone()));
            }
        });

        let target = result.clone();
        let subscription = self.clone();
        self.on_error(move |error| {
            let target = target.clone();
            match subscription.cancel_with_source() {
                Some(cleanup) => {
                    cleanup.when_complete(move || {
                        target.complete_now(Err(error));
                        Ok(())
                    });
                }
                None => target.complete_now(Err(error)),
            }
        });

        result
    }

    /// Cancels and returns the source's cleanup future, if it has one.
    pub(crate) fn cancel_with_source(&self) -> Option<Future<()>> {
        self.cancel();
        self.0.cancel_future.borrow().clone()
    }

    fn pending_is_empty(&self) -> bool {
        self.0.pending.borrow().as_ref().is_none_or(PendingEvents::is_empty)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.flags().lifecycle.is_closed()
    }

    pub(crate) fn is_input_paused(&self) -> bool {
        self.flags().input_paused
    }

    /// Installs events buffered before the subscription existed.
    pub(crate) fn set_pending_events(&self, events: PendingEvents<T>) {
        if events.is_empty() {
            return;
        }

        {
            let mut pending = self.0.pending.borrow_mut();
            match pending.as_mut() {
                Some(existing) => existing.append(events),
                None => *pending = Some(events),
            }
        }

        self.update(|flags| flags.has_pending = true);
        self.schedule_pending();
    }

    /// Delivers a data event now if possible, buffers it otherwise.
    pub(crate) fn add(&self, data: T) {
        let flags = self.flags();
        if flags.is_canceled() {
            return;
        }
        if flags.can_fire() {
            self.send_data(data);
        } else {
            self.add_pending(Event::Data(data));
        }
    }

    pub(crate) fn add_error(&self, error: AsyncError) {
        let flags = self.flags();
        if flags.is_canceled() {
            return;
        }
        if flags.can_fire() {
            self.send_error(error);
        } else {
            self.add_pending(Event::Error(error));
        }
    }

    pub(crate) fn close(&self) {
        let flags = self.flags();
        if flags.is_canceled() || flags.lifecycle.is_closed() {
            return;
        }

        self.update(|flags| flags.lifecycle = flags.lifecycle.close());
        if self.flags().can_fire() {
            self.send_done();
        } else {
            self.add_pending(Event::Done);
        }
    }

    /// Buffers an event for asynchronous delivery.
    pub(crate) fn add_pending(&self, event: Event<T>) {
        self.0
            .pending
            .borrow_mut()
            .get_or_insert_with(PendingEvents::new)
            .push(event);

        let flags = self.flags();
        if !flags.has_pending {
            self.update(|flags| flags.has_pending = true);
            if !flags.is_paused() {
                self.schedule_pending();
            }
        }
    }

    fn schedule_pending(&self) {
        let needs_microtask = self
            .0
            .pending
            .borrow_mut()
            .as_mut()
            .is_some_and(PendingEvents::schedule);

        if needs_microtask {
            let subscription = self.clone();
            zone::schedule_microtask(move || subscription.deliver_scheduled());
        }
    }

    fn deliver_scheduled(&self) {
        let proceed = self
            .0
            .pending
            .borrow_mut()
            .as_mut()
            .is_some_and(PendingEvents::begin_delivery);

        if proceed {
            self.handle_next();
        }
    }

    fn handle_next(&self) {
        let queued = self.0.pending.borrow_mut().as_mut().and_then(PendingEvents::pop_queued);

        match queued {
            Some(Event::Data(data)) => self.send_data(data),
            Some(Event::Error(error)) => self.send_error(error),
            Some(Event::Done) => self.send_done(),
            None => self.pull_source(),
        }
    }

    /// Pulls the next value from a lazily generated source.
    fn pull_source(&self) {
        let source = self.0.pending.borrow_mut().as_mut().and_then(PendingEvents::take_source);
        let Some(mut source) = source else {
            return;
        };

        let restore = |source: Box<dyn Iterator<Item = T>>| {
            if let Some(pending) = self.0.pending.borrow_mut().as_mut() {
                pending.restore_source(source);
            }
        };

        match catch(|| source.next()) {
            Ok(Some(data)) => {
                restore(source);
                self.send_data(data);
            }
            Ok(None) => self.send_done(),
            Err(error) => {
                restore(Box::new(std::iter::empty()));
                self.send_error(error);
            }
        }
    }

    fn send_data(&self, data: T) {
        if self.flags().is_canceled() {
            return;
        }

        let was_input_paused = self.flags().input_paused;
        self.update(|flags| flags.in_callback = true);

        let handler = self.0.handlers.borrow().data.clone();
        if let Some(handler) = handler {
            self.zone()
                .run_unary_guarded(|data| handler.borrow_mut().invoke(|f| f(data)), data);
        }

        self.update(|flags| flags.in_callback = false);
        self.check_state(was_input_paused);
    }

    fn send_error(&self, error: AsyncError) {
        if self.flags().is_canceled() {
            return;
        }

        let was_input_paused = self.flags().input_paused;

        if self.flags().cancel_on_error {
            self.update(|flags| flags.lifecycle = flags.lifecycle.wait_for_cancel());
            self.cancel_source();

            let cancel_future = self.0.cancel_future.borrow().clone();
            match cancel_future {
                Some(cleanup) => {
                    let subscription = self.clone();
                    cleanup.when_complete(move || {
                        subscription.deliver_error(error);
                        Ok(())
                    });
                }
                None => self.deliver_error(error),
            }
        } else {
            self.deliver_error(error);
            self.check_state(was_input_paused);
        }
    }

    fn deliver_error(&self, error: AsyncError) {
        let flags = self.flags();
        if flags.is_canceled() && !flags.lifecycle.is_waiting_for_cancel() {
            return;
        }

        self.update(|flags| flags.in_callback = true);

        let handler = self.0.handlers.borrow().error.clone();
        match handler {
            Some(handler) => {
                self.zone()
                    .run_unary_guarded(|error| handler.borrow_mut().invoke(|f| f(error)), error);
            }
            None => self.zone().handle_uncaught_error(error),
        }

        self.update(|flags| flags.in_callback = false);
        if self.flags().is_canceled() {
            self.release_handlers();
        }
    }

    fn send_done(&self) {
        if self.flags().is_canceled() {
            return;
        }

        self.cancel_source();
        self.update(|flags| flags.lifecycle = flags.lifecycle.wait_for_cancel());

        let cancel_future = self.0.cancel_future.borrow().clone();
        match cancel_future {
            Some(cleanup) => {
                let subscription = self.clone();
                cleanup.when_complete(move || {
                    subscription.deliver_done();
                    Ok(())
                });
            }
            None => self.deliver_done(),
        }
    }

    fn deliver_done(&self) {
        if !self.flags().lifecycle.is_waiting_for_cancel() {
            return;
        }

        self.update(|flags| {
            flags.lifecycle = flags.lifecycle.finish();
            flags.in_callback = true;
        });

        let handler = self.0.handlers.borrow().done.clone();
        if let Some(handler) = handler {
            self.zone().run_guarded(|| handler.borrow_mut().invoke(|f| f()));
        }

        self.update(|flags| flags.in_callback = false);
        self.release_handlers();
    }

    /// Marks the subscription canceled and tells the source.
    fn cancel_source(&self) {
        self.update(|flags| flags.lifecycle = flags.lifecycle.cancel());

        let flags = self.flags();
        {
            let mut pending = self.0.pending.borrow_mut();
            if flags.has_pending {
                if let Some(pending) = pending.as_mut() {
                    pending.cancel_schedule();
                }
            }
            if !flags.in_callback {
                *pending = None;
            }
        }

        // The source is told once; it never hears from a canceled
        // subscription again.
        let hooks = self.0.hooks.borrow_mut().take();
        let cleanup = hooks.and_then(|hooks| hooks.on_cancel());
        *self.0.cancel_future.borrow_mut() = cleanup;
    }

    /// Runs a hook with the in-callback flag set, then re-checks the state.
    pub(crate) fn guard_callback(&self, f: impl FnOnce(&dyn SubscriptionHooks)) {
        let was_input_paused = self.flags().input_paused;
        self.update(|flags| flags.in_callback = true);

        if let Some(hooks) = self.hooks() {
            f(hooks.as_ref());
        }

        self.update(|flags| flags.in_callback = false);
        self.check_state(was_input_paused);
    }

    /// Like [`guard_callback`](Self::guard_callback) for code outside the hooks.
    pub(crate) fn guard(&self, f: impl FnOnce()) {
        let was_input_paused = self.flags().input_paused;
        self.update(|flags| flags.in_callback = true);
        f();
        self.update(|flags| flags.in_callback = false);
        self.check_state(was_input_paused);
    }

    /// Reconciles the source's pause state with the subscription's after a
    /// callback, notifying the source of every change.
    fn check_state(&self, mut was_input_paused: bool) {
        let flags = self.flags();
        if flags.has_pending && self.pending_is_empty() {
            self.update(|flags| flags.has_pending = false);
            let flags = self.flags();
            if flags.input_paused && !flags.is_paused() {
                self.update(|flags| flags.input_paused = false);
            }
        }

        loop {
            if self.flags().is_canceled() {
                *self.0.pending.borrow_mut() = None;
                return;
            }

            let is_input_paused = self.flags().input_paused;
            if was_input_paused == is_input_paused {
                break;
            }

            self.update(|flags| flags.in_callback = !flags.in_callback);
            if let Some(hooks) = self.hooks() {
                if is_input_paused {
                    hooks.on_pause();
                } else {
                    hooks.on_resume();
                }
            }
            self.update(|flags| flags.in_callback = false);
            was_input_paused = is_input_paused;
        }

        let flags = self.flags();
        if flags.has_pending && !flags.is_paused() {
            self.schedule_pending();
        }
    }
}

/// Completes `future` with `value` after the subscription's cleanup.
pub(crate) fn cancel_and_value<T: 'static, V: Clone + 'static>(
    subscription: &StreamSubscription<T>,
    future: &Future<V>,
    value: V,
) {
    let target = future.clone();
    match subscription.cancel_with_source() {
        Some(cleanup) => {
            cleanup.when_complete(move || {
                target.complete_now(Ok(value));
                Ok(())
            });
        }
        None => target.complete_now(Ok(value)),
    }
}

/// Completes `future` with `error` after the subscription's cleanup.
pub(crate) fn cancel_and_error<T: 'static, V: Clone + 'static>(
    subscription: &StreamSubscription<T>,
    future: &Future<V>,
    error: AsyncError,
) {
    let target = future.clone();
    match subscription.cancel_with_source() {
        Some(cleanup) => {
            cleanup.when_complete(move || {
                target.complete_now(Err(error));
                Ok(())
            });
        }
        None => target.complete_now(Err(error)),
    }
}

impl<T> fmt::Debug for StreamSubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("state", &self.0.flags.get())
            .field("zone", &self.0.zone)
            .finish()
    }
}
