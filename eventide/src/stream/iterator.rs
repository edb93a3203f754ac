use super::subscription::{StreamHandlers, StreamSubscription};
use super::Stream;
use crate::error::{AsyncError, UsageError};
use crate::future::Future;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

enum State<T> {
    /// Not listened to yet.
    Initial(Stream<T>),

    /// Waiting for the next event.
    Moving(Future<bool>),

    /// Holding the current value; the subscription is paused.
    Value(T),

    Done,
}

impl<T> State<T> {
    fn name(&self) -> &'static str {
        match self {
            State::Initial(_) => "initial",
            State::Moving(_) => "moving",
            State::Value(_) => "value",
            State::Done => "done",
        }
    }
}

struct Inner<T> {
    state: RefCell<State<T>>,
    subscription: RefCell<Option<StreamSubscription<T>>>,
}

/// Pull-based access to a stream's data events.
///
/// The stream is listened to on the first [`move_next`](Self::move_next) and
/// paused whenever a value is held, so at most one event is read ahead.
///
/// # Examples
///
/// ```rust,ignore
/// let items = StreamIterator::new(Stream::from_iter([1, 2]));
/// while items.move_next().await? {
///     println!("{:?}", items.current());
/// }
/// ```
pub struct StreamIterator<T>(Rc<Inner<T>>);

impl<T: Clone + 'static> StreamIterator<T> {
    pub fn new(stream: Stream<T>) -> Self {
        Self(Rc::new(Inner {
            state: RefCell::new(State::Initial(stream)),
            subscription: RefCell::new(None),
        }))
    }

    /// The value read by the last successful [`move_next`](Self::move_next).
    pub fn current(&self) -> Option<T> {
        match &*self.0.state.borrow() {
            State::Value(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Waits for the next data event.
    ///
    /// Completes with `true` once a value is available through
    /// [`current`](Self::current), with `false` when the stream is done, or
    /// with the stream's first error. After an error or done event the
    /// iterator is finished and later calls complete with `false`.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::AlreadyWaiting`] if the previous call has not
    /// completed yet.
    pub fn move_next(&self) -> Future<bool> {
        let subscription = self.0.subscription.borrow().clone();
        if let Some(subscription) = subscription {
            let future = Future::incomplete();
            {
                let mut state = self.0.state.borrow_mut();
                if !matches!(*state, State::Value(_)) {
                    drop(state);
                    UsageError::AlreadyWaiting.raise();
                }
                *state = State::Moving(future.clone());
            }
            subscription.resume();
            return future;
        }

        let state = std::mem::replace(&mut *self.0.state.borrow_mut(), State::Done);
        match state {
            State::Initial(stream) => self.start(stream),
            State::Done => Future::completed(false),
            waiting => {
                *self.0.state.borrow_mut() = waiting;
                UsageError::AlreadyWaiting.raise();
            }
        }
    }

    fn start(&self, stream: Stream<T>) -> Future<bool> {
        let future = Future::incomplete();
        *self.0.state.borrow_mut() = State::Moving(future.clone());

        let on_data = {
            let inner = Rc::downgrade(&self.0);
            move |data| with_inner(&inner, |inner| inner.on_data(data))
        };
        let on_error = {
            let inner = Rc::downgrade(&self.0);
            move |error| with_inner(&inner, |inner| inner.on_error(error))
        };
        let on_done = {
            let inner = Rc::downgrade(&self.0);
            move || with_inner(&inner, Inner::on_done)
        };

        let subscription = stream.listen_with(
            StreamHandlers::new()
                .on_data(on_data)
                .on_error(on_error)
                .on_done(on_done)
                .cancel_on_error(true),
        );

        // Events may arrive while listening; the subscription only exists
        // from here on.
        match &*self.0.state.borrow() {
            State::Done => return future,
            State::Value(_) => subscription.pause(),
            _ => {}
        }
        *self.0.subscription.borrow_mut() = Some(subscription);

        future
    }

    /// Stops reading. A pending [`move_next`](Self::move_next) completes with
    /// `false`.
    pub fn cancel(&self) -> Future<()> {
        let subscription = self.0.subscription.borrow_mut().take();
        let state = std::mem::replace(&mut *self.0.state.borrow_mut(), State::Done);

        let Some(subscription) = subscription else {
            return Future::completed(());
        };
        if let State::Moving(future) = state {
            future.complete_async(Ok(false));
        }
        subscription.cancel()
    }
}

fn with_inner<T>(inner: &Weak<Inner<T>>, f: impl FnOnce(&Inner<T>)) {
    if let Some(inner) = inner.upgrade() {
        f(&inner);
    }
}

impl<T: Clone + 'static> Inner<T> {
    fn on_data(&self, data: T) {
        let future = {
            let mut state = self.state.borrow_mut();
            if !matches!(*state, State::Moving(_)) {
                return;
            }
            match std::mem::replace(&mut *state, State::Value(data)) {
                State::Moving(future) => future,
                _ => return,
            }
        };
        future.complete_now(Ok(true));

        // Listeners of the future may already have asked for the next value.
        let holding = matches!(*self.state.borrow(), State::Value(_));
        if holding {
            let subscription = self.subscription.borrow().clone();
            if let Some(subscription) = subscription {
                subscription.pause();
            }
        }
    }

    /// Finishes the iterator, completing a pending `move_next` with `result`.
    fn finish(&self, result: Result<bool, AsyncError>) {
        let subscribed = self.subscription.borrow_mut().take().is_some();
        let state = std::mem::replace(&mut *self.state.borrow_mut(), State::Done);

        let State::Moving(future) = state else {
            return;
        };
        if subscribed {
            future.complete_now(result);
        } else {
            future.complete_async(result);
        }
    }

    fn on_error(&self, error: AsyncError) {
        self.finish(Err(error));
    }

    fn on_done(&self) {
        self.finish(Ok(false));
    }
}

impl<T> fmt::Debug for StreamIterator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamIterator")
            .field("state", &self.0.state.borrow().name())
            .finish()
    }
}
