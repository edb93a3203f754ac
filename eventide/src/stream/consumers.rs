//! Stream methods that consume the whole stream into a single [`Future`].
//!
//! Every consumer listens with `cancel_on_error`: the first error event
//! completes the returned future with that error.

use super::sink::StreamConsumer;
use super::subscription::{StreamHandlers, StreamSubscription, cancel_and_error, cancel_and_value};
use super::Stream;
use crate::error::{AsyncError, StreamError, catch};
use crate::future::Future;
use crate::zone::Zone;

use std::cell::{Cell, RefCell};
use std::fmt::{Display, Write};
use std::rc::Rc;

/// Runs user code, letting the current zone replace a panic's error.
fn run_user_code<R>(f: impl FnOnce() -> R) -> Result<R, AsyncError> {
    catch(f).map_err(|error| Zone::current().intercept_error(error))
}

fn no_element() -> AsyncError {
    Zone::current().intercept_error(AsyncError::new(StreamError::NoElement))
}

fn too_many_elements() -> AsyncError {
    Zone::current().intercept_error(AsyncError::new(StreamError::TooManyElements))
}

type OrElse<T> = Option<Box<dyn FnOnce() -> T>>;

/// Completes `future` with the fallback's value, or with `NoElement`.
fn complete_or_else<T: Clone + 'static>(future: &Future<T>, or_else: OrElse<T>) {
    match or_else {
        Some(or_else) => future.complete_now(run_user_code(or_else)),
        None => future.complete_now(Err(no_element())),
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Listens with `cancel_on_error`, failing `result` with the first error.
    fn consume<V: Clone + 'static>(&self, result: &Future<V>, on_done: impl FnMut() + 'static) -> StreamSubscription<T> {
        let target = result.clone();
        self.listen_with(
            StreamHandlers::new()
                .on_error(move |error| target.complete_now(Err(error)))
                .on_done(on_done)
                .cancel_on_error(true),
        )
    }

    /// Collects every data event.
    pub fn to_list(&self) -> Future<Vec<T>> {
        let result = Future::incomplete();
        let items = Rc::new(RefCell::new(Vec::new()));

        let target = result.clone();
        let collected = items.clone();
        let target_error = result.clone();
        self.listen_with(
            StreamHandlers::new()
                .on_data(move |data| items.borrow_mut().push(data))
                .on_error(move |error| target_error.complete_now(Err(error)))
                .on_done(move || target.complete_now(Ok(collected.take())))
                .cancel_on_error(true),
        );

        result
    }

    /// The first data event. The subscription is canceled once it arrives.
    ///
    /// Fails with [`StreamError::NoElement`] on an empty stream.
    pub fn first(&self) -> Future<T> {
        let result = Future::incomplete();

        let target = result.clone();
        let subscription = self.consume(&result, move || target.complete_now(Err(no_element())));

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| cancel_and_value(&canceled, &target, data));

        result
    }

    /// The last data event.
    ///
    /// Fails with [`StreamError::NoElement`] on an empty stream.
    pub fn last(&self) -> Future<T> {
        let result = Future::incomplete();
        let last = Rc::new(RefCell::new(None));

        let target = result.clone();
        let seen = last.clone();
        let subscription = self.consume(&result, move || match seen.borrow_mut().take() {
            Some(value) => target.complete_now(Ok(value)),
            None => target.complete_now(Err(no_element())),
        });
        subscription.on_data(move |data| *last.borrow_mut() = Some(data));

        result
    }

    /// The only data event.
    ///
    /// Fails with [`StreamError::NoElement`] on an empty stream, and with
    /// [`StreamError::TooManyElements`] as soon as a second one arrives.
    pub fn single(&self) -> Future<T> {
        let result = Future::incomplete();
        let found = Rc::new(RefCell::new(None));

        let target = result.clone();
        let seen = found.clone();
        let subscription = self.consume(&result, move || match seen.borrow_mut().take() {
            Some(value) => target.complete_now(Ok(value)),
            None => target.complete_now(Err(no_element())),
        });

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| {
            let mut found = found.borrow_mut();
            if found.is_some() {
                drop(found);
                cancel_and_error(&canceled, &target, too_many_elements());
                return;
            }
            *found = Some(data);
        });

        result
    }

    /// The first data event accepted by `test`.
    ///
    /// Fails with [`StreamError::NoElement`] if none is.
    pub fn first_where(&self, test: impl Fn(&T) -> bool + 'static) -> Future<T> {
        self.first_matching(test, None)
    }

    /// Like [`first_where`](Self::first_where), completing with `or_else()`
    /// if no event matches.
    pub fn first_where_or(&self, test: impl Fn(&T) -> bool + 'static, or_else: impl FnOnce() -> T + 'static) -> Future<T> {
        self.first_matching(test, Some(Box::new(or_else)))
    }

    fn first_matching(&self, test: impl Fn(&T) -> bool + 'static, or_else: OrElse<T>) -> Future<T> {
        let result = Future::incomplete();

        let target = result.clone();
        let mut or_else = Some(or_else);
        let subscription = self.consume(&result, move || {
            complete_or_else(&target, or_else.take().flatten());
        });

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| match run_user_code(|| test(&data)) {
            Ok(true) => cancel_and_value(&canceled, &target, data),
            Ok(false) => {}
            Err(error) => cancel_and_error(&canceled, &target, error),
        });

        result
    }

    /// The last data event accepted by `test`.
    ///
    /// Fails with [`StreamError::NoElement`] if none is.
    pub fn last_where(&self, test: impl Fn(&T) -> bool + 'static) -> Future<T> {
        self.last_matching(test, None)
    }

    pub fn last_where_or(&self, test: impl Fn(&T) -> bool + 'static, or_else: impl FnOnce() -> T + 'static) -> Future<T> {
        self.last_matching(test, Some(Box::new(or_else)))
    }

    fn last_matching(&self, test: impl Fn(&T) -> bool + 'static, or_else: OrElse<T>) -> Future<T> {
        let result = Future::incomplete();
        let found = Rc::new(RefCell::new(None));

        let target = result.clone();
        let seen = found.clone();
        let mut or_else = Some(or_else);
        let subscription = self.consume(&result, move || match seen.borrow_mut().take() {
            Some(value) => target.complete_now(Ok(value)),
            None => complete_or_else(&target, or_else.take().flatten()),
        });

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| match run_user_code(|| test(&data)) {
            Ok(true) => *found.borrow_mut() = Some(data),
            Ok(false) => {}
            Err(error) => cancel_and_error(&canceled, &target, error),
        });

        result
    }

    /// The only data event accepted by `test`.
    ///
    /// Fails with [`StreamError::NoElement`] if none is, and with
    /// [`StreamError::TooManyElements`] as soon as a second one matches.
    pub fn single_where(&self, test: impl Fn(&T) -> bool + 'static) -> Future<T> {
        self.single_matching(test, None)
    }

    pub fn single_where_or(
        &self,
        test: impl Fn(&T) -> bool + 'static,
        or_else: impl FnOnce() -> T + 'static,
    ) -> Future<T> {
        self.single_matching(test, Some(Box::new(or_else)))
    }

    fn single_matching(&self, test: impl Fn(&T) -> bool + 'static, or_else: OrElse<T>) -> Future<T> {
        let result = Future::incomplete();
        let found = Rc::new(RefCell::new(None));

        let target = result.clone();
        let seen = found.clone();
        let mut or_else = Some(or_else);
        let subscription = self.consume(&result, move || match seen.borrow_mut().take() {
            Some(value) => target.complete_now(Ok(value)),
            None => complete_or_else(&target, or_else.take().flatten()),
        });

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| match run_user_code(|| test(&data)) {
            Ok(true) => {
                if found.borrow().is_some() {
                    cancel_and_error(&canceled, &target, too_many_elements());
                } else {
                    *found.borrow_mut() = Some(data);
                }
            }
            Ok(false) => {}
            Err(error) => cancel_and_error(&canceled, &target, error),
        });

        result
    }

    /// The data event at `index`, counting from zero.
    ///
    /// Fails with [`StreamError::IndexOutOfRange`] if the stream ends first.
    pub fn element_at(&self, index: usize) -> Future<T> {
        let result = Future::incomplete();
        let count = Rc::new(Cell::new(0usize));

        let target = result.clone();
        let length = count.clone();
        let subscription = self.consume(&result, move || {
            let error = AsyncError::new(StreamError::IndexOutOfRange {
                index,
                length: length.get(),
            });
            target.complete_now(Err(Zone::current().intercept_error(error)));
        });

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| {
            if count.get() == index {
                cancel_and_value(&canceled, &target, data);
                return;
            }
            count.set(count.get() + 1);
        });

        result
    }

    /// Combines every data event into an accumulated value, starting from
    /// `initial`.
    pub fn fold<A: Clone + 'static>(&self, initial: A, mut combine: impl FnMut(A, T) -> A + 'static) -> Future<A> {
        let result = Future::incomplete();
        let accumulated = Rc::new(RefCell::new(Some(initial)));

        let target = result.clone();
        let value = accumulated.clone();
        let subscription = self.consume(&result, move || {
            if let Some(value) = value.borrow_mut().take() {
                target.complete_now(Ok(value));
            }
        });

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| {
            let Some(previous) = accumulated.borrow_mut().take() else {
                return;
            };
            match run_user_code(|| combine(previous, data)) {
                Ok(next) => *accumulated.borrow_mut() = Some(next),
                Err(error) => cancel_and_error(&canceled, &target, error),
            }
        });

        result
    }

    /// Combines the data events pairwise, from the first one on.
    ///
    /// Fails with [`StreamError::NoElement`] on an empty stream.
    pub fn reduce(&self, mut combine: impl FnMut(T, T) -> T + 'static) -> Future<T> {
        let result = Future::incomplete();
        let accumulated: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let seen_first = Rc::new(Cell::new(false));

        let target = result.clone();
        let value = accumulated.clone();
        let subscription = self.consume(&result, move || match value.borrow_mut().take() {
            Some(value) => target.complete_now(Ok(value)),
            None => target.complete_now(Err(no_element())),
        });

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| {
            if !seen_first.replace(true) {
                *accumulated.borrow_mut() = Some(data);
                return;
            }
            let Some(previous) = accumulated.borrow_mut().take() else {
                return;
            };
            match run_user_code(|| combine(previous, data)) {
                Ok(next) => *accumulated.borrow_mut() = Some(next),
                Err(error) => cancel_and_error(&canceled, &target, error),
            }
        });

        result
    }

    /// Whether any data event is accepted by `test`. Stops at the first one.
    pub fn any(&self, test: impl Fn(&T) -> bool + 'static) -> Future<bool> {
        self.short_circuit(test, true)
    }

    /// Whether every data event is accepted by `test`. Stops at the first
    /// rejected one.
    pub fn every(&self, test: impl Fn(&T) -> bool + 'static) -> Future<bool> {
        self.short_circuit(move |data| !test(data), false)
    }

    /// Whether a data event equals `needle`.
    pub fn contains(&self, needle: T) -> Future<bool>
    where
        T: PartialEq,
    {
        self.short_circuit(move |data| *data == needle, true)
    }

    /// Completes with `on_match` at the first event `test` accepts, with its
    /// negation if the stream ends first.
    fn short_circuit(&self, test: impl Fn(&T) -> bool + 'static, on_match: bool) -> Future<bool> {
        let result = Future::incomplete();

        let target = result.clone();
        let subscription = self.consume(&result, move || target.complete_now(Ok(!on_match)));

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| match run_user_code(|| test(&data)) {
            Ok(true) => cancel_and_value(&canceled, &target, on_match),
            Ok(false) => {}
            Err(error) => cancel_and_error(&canceled, &target, error),
        });

        result
    }

    /// The number of data events.
    pub fn length(&self) -> Future<usize> {
        let result = Future::incomplete();
        let count = Rc::new(Cell::new(0usize));

        let target = result.clone();
        let total = count.clone();
        let subscription = self.consume(&result, move || target.complete_now(Ok(total.get())));
        subscription.on_data(move |_| count.set(count.get() + 1));

        result
    }

    /// Whether the stream ends without data. Stops at the first data event.
    pub fn is_empty(&self) -> Future<bool> {
        let result = Future::incomplete();

        let target = result.clone();
        let subscription = self.consume(&result, move || target.complete_now(Ok(true)));

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |_| cancel_and_value(&canceled, &target, false));

        result
    }

    /// Runs `action` on every data event.
    ///
    /// A panic in `action` cancels the subscription and fails the result.
    pub fn for_each(&self, mut action: impl FnMut(T) + 'static) -> Future<()> {
        let result = Future::incomplete();

        let target = result.clone();
        let subscription = self.consume(&result, move || target.complete_now(Ok(())));

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| {
            if let Err(error) = run_user_code(|| action(data)) {
                cancel_and_error(&canceled, &target, error);
            }
        });

        result
    }

    /// Discards every data event; completes with `value` once the stream is
    /// done.
    pub fn drain<E: Clone + 'static>(&self, value: E) -> Future<E> {
        self.listen_with(StreamHandlers::new().cancel_on_error(true))
            .as_future(value)
    }

    /// The data events' text, joined by `separator`.
    pub fn join(&self, separator: &str) -> Future<String>
    where
        T: Display,
    {
        let result = Future::incomplete();
        let buffer = Rc::new(RefCell::new(String::new()));
        let first = Rc::new(Cell::new(true));
        let separator = separator.to_string();

        let target = result.clone();
        let text = buffer.clone();
        let subscription = self.consume(&result, move || target.complete_now(Ok(text.take())));

        let canceled = subscription.clone();
        let target = result.clone();
        subscription.on_data(move |data| {
            let mut buffer = buffer.borrow_mut();
            if !first.replace(false) {
                buffer.push_str(&separator);
            }
            let written = run_user_code(|| {
                let _ = write!(buffer, "{data}");
            });
            if let Err(error) = written {
                drop(buffer);
                cancel_and_error(&canceled, &target, error);
            }
        });

        result
    }

    /// Feeds every event into `consumer`, then closes it.
    ///
    /// Completes with the consumer's close result.
    pub fn pipe<C>(&self, consumer: C) -> Future<()>
    where
        C: StreamConsumer<T> + 'static,
    {
        let added = consumer.add_stream(self.clone());
        added.then(move |()| consumer.close())
    }
}
