use super::pending::{Event, PendingEvents};
use super::sink::{EventSink, StreamConsumer};
use super::subscription::{StreamHandlers, StreamSubscription, SubscriptionHooks};
use super::{Stream, StreamSource};
use crate::error::{AsyncError, UsageError, catch};
use crate::future::{Future, FutureOr};
use crate::zone::Zone;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// When events added to a controller reach its listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Immediately, from inside `add`. The caller must not be delivering
    /// another event of the same stream.
    Sync,

    /// From a later microtask.
    Async,
}

pub(crate) type Notify = Rc<dyn Fn()>;
pub(crate) type NotifyCancel = Rc<dyn Fn() -> Option<Future<()>>>;

/// Callbacks a controller runs on subscription state changes.
#[derive(Clone, Default)]
pub(crate) struct ControllerCallbacks {
    pub(crate) on_listen: Option<Notify>,
    pub(crate) on_pause: Option<Notify>,
    pub(crate) on_resume: Option<Notify>,
    pub(crate) on_cancel: Option<NotifyCancel>,
}

/// Runs a controller callback, reporting a panic to the current zone.
pub(crate) fn run_notification(callback: Option<Notify>) {
    if let Some(callback) = callback {
        if let Err(error) = catch(|| callback()) {
            Zone::current().handle_uncaught_error(error);
        }
    }
}

/// Runs the cancel callback. A panic becomes the error of the returned future.
pub(crate) fn run_cancel_notification(callback: &NotifyCancel) -> Option<Future<()>> {
    match catch(|| callback()) {
        Ok(cleanup) => cleanup,
        Err(error) => {
            let failed = Future::incomplete();
            failed.complete_async(Err(error));
            Some(failed)
        }
    }
}

/// Chains `callback` after an existing cleanup future.
pub(crate) fn then_cancel(cleanup: Future<()>, callback: NotifyCancel) -> Future<()> {
    cleanup.when_complete(move || match callback() {
        Some(next) => FutureOr::Future(next),
        None => FutureOr::Value(()),
    })
}

/// Receiver of the events of a stream added with `add_stream`.
pub(crate) trait AddStreamTarget<T>: Clone + 'static {
    fn add_unchecked(&self, data: T);
    fn add_error_unchecked(&self, error: AsyncError);

    /// The added stream is done.
    fn finish_add_stream(&self);
}

/// A stream being piped into a controller.
pub(crate) struct AddStreamState<T> {
    subscription: StreamSubscription<T>,
    done: Future<()>,
}

impl<T: 'static> AddStreamState<T> {
    pub(crate) fn start<C: AddStreamTarget<T>>(target: &C, source: &Stream<T>, cancel_on_error: bool) -> Self {
        let on_data = {
            let target = target.clone();
            move |data| target.add_unchecked(data)
        };
        let on_error = {
            let target = target.clone();
            move |error| {
                target.add_error_unchecked(error);
                if cancel_on_error {
                    target.finish_add_stream();
                }
            }
        };
        let on_done = {
            let target = target.clone();
            move || target.finish_add_stream()
        };

        let subscription = source.listen_with(
            StreamHandlers::new()
                .on_data(on_data)
                .on_error(on_error)
                .on_done(on_done)
                .cancel_on_error(cancel_on_error),
        );

        Self {
            subscription,
            done: Future::incomplete(),
        }
    }

    pub(crate) fn done(&self) -> Future<()> {
        self.done.clone()
    }

    pub(crate) fn pause(&self) {
        self.subscription.pause();
    }

    pub(crate) fn resume(&self) {
        self.subscription.resume();
    }

    pub(crate) fn complete(&self) {
        if self.done.may_complete() {
            self.done.complete_async(Ok(()));
        }
    }

    /// Cancels the added stream; `done` completes after its cleanup.
    pub(crate) fn cancel(&self) -> Future<()> {
        match self.subscription.cancel_with_source() {
            Some(cleanup) => {
                let done = self.done.clone();
                cleanup.when_complete(move || {
                    if done.may_complete() {
                        done.complete_async(Ok(()));
                    }
                    Ok(())
                })
            }
            None => {
                self.complete();
                Future::completed(())
            }
        }
    }
}

/// Who receives the controller's events.
enum Target<T> {
    /// Nobody listened yet; events are buffered.
    Initial(PendingEvents<T>),
    Subscribed(StreamSubscription<T>),
    Canceled,
}

pub(crate) struct Controller<T> {
    delivery: Delivery,
    target: RefCell<Target<T>>,
    closed: Cell<bool>,
    adding: RefCell<Option<AddStreamState<T>>>,
    done: RefCell<Option<Future<()>>>,
    callbacks: RefCell<ControllerCallbacks>,
}

/// The producing side of a single-subscription stream.
///
/// Events added before the stream is listened to are buffered and delivered
/// to the first (and only) listener. A second `listen` panics with
/// [`UsageError::AlreadyListened`].
///
/// The default controller delivers every event from a microtask. A
/// [`sync`](StreamController::sync) controller delivers from inside `add`,
/// which is faster but must not be used while the listener is running.
///
/// # Examples
///
/// ```rust,ignore
/// let controller = StreamController::new();
/// controller.add(1);
/// controller.add(2);
/// controller.close();
///
/// assert_eq!(controller.stream().to_list().await.unwrap(), vec![1, 2]);
/// ```
pub struct StreamController<T>(Rc<Controller<T>>);

impl<T> Clone for StreamController<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> StreamController<T> {
    pub fn new() -> Self {
        Self::with(Delivery::Async, ControllerCallbacks::default())
    }

    pub fn sync() -> Self {
        Self::with(Delivery::Sync, ControllerCallbacks::default())
    }

    pub fn builder() -> StreamControllerBuilder<T> {
        StreamControllerBuilder::new()
    }

    pub(crate) fn with(delivery: Delivery, callbacks: ControllerCallbacks) -> Self {
        Self(Rc::new(Controller {
            delivery,
            target: RefCell::new(Target::Initial(PendingEvents::new())),
            closed: Cell::new(false),
            adding: RefCell::new(None),
            done: RefCell::new(None),
            callbacks: RefCell::new(callbacks),
        }))
    }

    /// The controlled stream. Every call returns a view of the same stream.
    pub fn stream(&self) -> Stream<T> {
        Stream::from_source(ControllerStream {
            controller: self.clone(),
        })
    }

    pub fn set_on_listen(&self, f: impl Fn() + 'static) {
        self.0.callbacks.borrow_mut().on_listen = Some(Rc::new(f));
    }

    pub fn set_on_pause(&self, f: impl Fn() + 'static) {
        self.0.callbacks.borrow_mut().on_pause = Some(Rc::new(f));
    }

    pub fn set_on_resume(&self, f: impl Fn() + 'static) {
        self.0.callbacks.borrow_mut().on_resume = Some(Rc::new(f));
    }

    pub fn set_on_cancel(&self, f: impl Fn() + 'static) {
        self.0.callbacks.borrow_mut().on_cancel = Some(Rc::new(move || {
            f();
            None
        }));
    }

    /// Like [`set_on_cancel`](Self::set_on_cancel) for cleanup that
    /// completes later. `cancel()` on the subscription returns a future that
    /// waits for it.
    pub fn set_on_cancel_with(&self, f: impl Fn() -> Future<()> + 'static) {
        self.0.callbacks.borrow_mut().on_cancel = Some(Rc::new(move || Some(f())));
    }

    pub fn has_listener(&self) -> bool {
        matches!(&*self.0.target.borrow(), Target::Subscribed(_))
    }

    fn is_initial(&self) -> bool {
        matches!(&*self.0.target.borrow(), Target::Initial(_))
    }

    fn is_canceled(&self) -> bool {
        matches!(&*self.0.target.borrow(), Target::Canceled)
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.get()
    }

    fn is_adding_stream(&self) -> bool {
        self.0.adding.borrow().is_some()
    }

    /// Whether the listener asked the source to pause. Before anyone
    /// listens the stream counts as paused.
    pub fn is_paused(&self) -> bool {
        match &*self.0.target.borrow() {
            Target::Initial(_) => true,
            Target::Subscribed(subscription) => subscription.is_input_paused(),
            Target::Canceled => false,
        }
    }

    fn subscription(&self) -> Option<StreamSubscription<T>> {
        match &*self.0.target.borrow() {
            Target::Subscribed(subscription) => Some(subscription.clone()),
            _ => None,
        }
    }

    #[track_caller]
    fn check_may_add(&self) {
        if self.is_closed() {
            UsageError::AddAfterClose.raise();
        }
        if self.is_adding_stream() {
            UsageError::AddWhileAddingStream.raise();
        }
    }

    /// Sends a data event.
    ///
    /// # Panics
    ///
    /// Panics if the controller is closed or a stream is being added.
    #[track_caller]
    pub fn add(&self, value: T) {
        self.check_may_add();
        self.add_unchecked(value);
    }

    /// Sends an error event. The current zone's error callback may replace
    /// the error first.
    ///
    /// # Panics
    ///
    /// Panics if the controller is closed or a stream is being added.
    #[track_caller]
    pub fn add_error(&self, error: AsyncError) {
        self.check_may_add();
        let error = Zone::current().intercept_error(error);
        self.add_error_unchecked(error);
    }

    /// Closes the stream. Closing twice is allowed.
    ///
    /// Returns the [`done`](Self::done) future.
    ///
    /// # Panics
    ///
    /// Panics if a stream is being added.
    #[track_caller]
    pub fn close(&self) -> Future<()> {
        if self.is_closed() {
            return self.done();
        }
        self.check_may_add();
        self.close_unchecked();
        self.done()
    }

    /// Completes when the listener is canceled or has received the done
    /// event.
    pub fn done(&self) -> Future<()> {
        let mut done = self.0.done.borrow_mut();
        if let Some(done) = &*done {
            return done.clone();
        }

        let future = if self.is_canceled() {
            Future::completed(())
        } else {
            Future::incomplete()
        };
        *done = Some(future.clone());
        future
    }

    /// Forwards every event of `source` until it is done.
    ///
    /// While it runs, `add`, `add_error` and `close` panic. The returned future
    /// completes when `source` is done, or when the listener cancels.
    ///
    /// # Panics
    ///
    /// Panics if the controller is closed or a stream is already being added.
    #[track_caller]
    pub fn add_stream(&self, source: Stream<T>, cancel_on_error: bool) -> Future<()> {
        self.check_may_add();

        if self.is_canceled() {
            let done = Future::incomplete();
            done.complete_async(Ok(()));
            return done;
        }

        let state = AddStreamState::start(self, &source, cancel_on_error);
        if self.is_paused() {
            state.pause();
        }

        let done = state.done();
        *self.0.adding.borrow_mut() = Some(state);
        done
    }

    pub(crate) fn close_unchecked(&self) {
        self.0.closed.set(true);

        if let Some(subscription) = self.subscription() {
            self.send(&subscription, Event::Done);
        } else if let Target::Initial(pending) = &mut *self.0.target.borrow_mut() {
            pending.push(Event::Done);
        }
    }

    fn dispatch(&self, event: Event<T>) {
        if let Some(subscription) = self.subscription() {
            self.send(&subscription, event);
        } else if let Target::Initial(pending) = &mut *self.0.target.borrow_mut() {
            pending.push(event);
        }
    }

    fn send(&self, subscription: &StreamSubscription<T>, event: Event<T>) {
        match (self.0.delivery, event) {
            (Delivery::Sync, Event::Data(data)) => subscription.add(data),
            (Delivery::Sync, Event::Error(error)) => subscription.add_error(error),
            (Delivery::Sync, Event::Done) => subscription.close(),
            (Delivery::Async, event) => subscription.add_pending(event),
        }
    }

    fn subscribe(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        if !self.is_initial() {
            UsageError::AlreadyListened.raise();
        }

        let subscription = StreamSubscription::new(handlers);
        subscription.set_hooks(Rc::new(ControllerHooks {
            controller: self.clone(),
        }));

        let previous = std::mem::replace(
            &mut *self.0.target.borrow_mut(),
            Target::Subscribed(subscription.clone()),
        );
        if let Some(adding) = &*self.0.adding.borrow() {
            adding.resume();
        }

        if let Target::Initial(pending) = previous {
            subscription.set_pending_events(pending);
        }

        let on_listen = self.0.callbacks.borrow().on_listen.clone();
        subscription.guard(|| run_notification(on_listen));
        subscription
    }

    fn record_cancel(&self) -> Option<Future<()>> {
        let adding = self.0.adding.borrow_mut().take();
        let mut cleanup = adding.map(|adding| adding.cancel());

        *self.0.target.borrow_mut() = Target::Canceled;
        log::debug!("stream controller canceled");

        // A canceled controller never gets another listener.
        let callbacks = std::mem::take(&mut *self.0.callbacks.borrow_mut());
        if let Some(on_cancel) = callbacks.on_cancel {
            cleanup = match cleanup {
                None => run_cancel_notification(&on_cancel),
                Some(cleanup) => Some(then_cancel(cleanup, on_cancel)),
            };
        }

        let done = self.0.done.borrow().clone();
        let complete = move || {
            if let Some(done) = done {
                if done.may_complete() {
                    done.complete_async(Ok(()));
                }
            }
        };

        match cleanup {
            Some(cleanup) => Some(cleanup.when_complete(move || {
                complete();
                Ok(())
            })),
            None => {
                complete();
                None
            }
        }
    }

    fn record_pause(&self) {
        if let Some(adding) = &*self.0.adding.borrow() {
            adding.pause();
        }
        let on_pause = self.0.callbacks.borrow().on_pause.clone();
        run_notification(on_pause);
    }

    fn record_resume(&self) {
        if let Some(adding) = &*self.0.adding.borrow() {
            adding.resume();
        }
        let on_resume = self.0.callbacks.borrow().on_resume.clone();
        run_notification(on_resume);
    }
}

impl<T: 'static> AddStreamTarget<T> for StreamController<T> {
    fn add_unchecked(&self, data: T) {
        self.dispatch(Event::Data(data));
    }

    fn add_error_unchecked(&self, error: AsyncError) {
        self.dispatch(Event::Error(error));
    }

    fn finish_add_stream(&self) {
        let adding = self.0.adding.borrow_mut().take();
        if let Some(adding) = adding {
            adding.complete();
        }
    }
}

impl<T: 'static> Default for StreamController<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EventSink<T> for StreamController<T> {
    fn add(&self, data: T) {
        StreamController::add(self, data);
    }

    fn add_error(&self, error: AsyncError) {
        StreamController::add_error(self, error);
    }

    fn close(&self) {
        StreamController::close(self);
    }
}

impl<T: 'static> StreamConsumer<T> for StreamController<T> {
    fn add_stream(&self, stream: Stream<T>) -> Future<()> {
        StreamController::add_stream(self, stream, false)
    }

    fn close(&self) -> Future<()> {
        StreamController::close(self)
    }
}

impl<T> fmt::Debug for StreamController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &*self.0.target.borrow() {
            Target::Initial(_) => "initial",
            Target::Subscribed(_) => "subscribed",
            Target::Canceled => "canceled",
        };
        f.debug_struct("StreamController")
            .field("delivery", &self.0.delivery)
            .field("target", &target)
            .field("closed", &self.0.closed.get())
            .field("adding_stream", &self.0.adding.borrow().is_some())
            .finish()
    }
}

struct ControllerHooks<T> {
    controller: StreamController<T>,
}

impl<T: 'static> SubscriptionHooks for ControllerHooks<T> {
    fn on_pause(&self) {
        self.controller.record_pause();
    }

    fn on_resume(&self) {
        self.controller.record_resume();
    }

    fn on_cancel(&self) -> Option<Future<()>> {
        self.controller.record_cancel()
    }
}

struct ControllerStream<T> {
    controller: StreamController<T>,
}

impl<T: 'static> StreamSource<T> for ControllerStream<T> {
    fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        self.controller.subscribe(handlers)
    }
}

/// Builds a [`StreamController`] with its callbacks.
///
/// # Examples
///
/// ```rust,ignore
/// let controller = StreamController::<u32>::builder()
///     .on_listen(|| println!("listening"))
///     .on_cancel(|| println!("canceled"))
///     .sync(true)
///     .build();
/// ```
pub struct StreamControllerBuilder<T> {
    delivery: Delivery,
    callbacks: ControllerCallbacks,
    _marker: std::marker::PhantomData<T>,
}

impl<T: 'static> StreamControllerBuilder<T> {
    pub fn new() -> Self {
        Self {
            delivery: Delivery::Async,
            callbacks: ControllerCallbacks::default(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Deliver events synchronously from `add`.
    pub fn sync(mut self, sync: bool) -> Self {
        self.delivery = if sync { Delivery::Sync } else { Delivery::Async };
        self
    }

    /// Runs when the stream is listened to.
    pub fn on_listen(mut self, f: impl Fn() + 'static) -> Self {
        self.callbacks.on_listen = Some(Rc::new(f));
        self
    }

    pub fn on_pause(mut self, f: impl Fn() + 'static) -> Self {
        self.callbacks.on_pause = Some(Rc::new(f));
        self
    }

    pub fn on_resume(mut self, f: impl Fn() + 'static) -> Self {
        self.callbacks.on_resume = Some(Rc::new(f));
        self
    }

    /// Runs when the listener cancels or the stream is done.
    pub fn on_cancel(mut self, f: impl Fn() + 'static) -> Self {
        self.callbacks.on_cancel = Some(Rc::new(move || {
            f();
            None
        }));
        self
    }

    /// Like [`on_cancel`](Self::on_cancel) with cleanup that completes later.
    pub fn on_cancel_with(mut self, f: impl Fn() -> Future<()> + 'static) -> Self {
        self.callbacks.on_cancel = Some(Rc::new(move || Some(f())));
        self
    }

    pub fn build(self) -> StreamController<T> {
        StreamController::with(self.delivery, self.callbacks)
    }
}

impl<T: 'static> Default for StreamControllerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
