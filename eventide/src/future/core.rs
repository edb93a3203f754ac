use super::{FutureOr, IntoFutureOr};
use crate::error::{AsyncError, UsageError, catch};
use crate::time::Timer;
use crate::zone::{self, Zone};

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

pub(crate) type Step = Box<dyn FnOnce(&mut Steps)>;

/// Work left to do while propagating a completion.
///
/// Completing a future pushes one step per listener instead of calling the
/// listeners recursively, so long `then` chains complete without growing the
/// call stack. Steps run depth first: a listener's own result propagates
/// before the next sibling listener fires.
#[derive(Default)]
pub(crate) struct Steps {
    stack: Vec<Step>,
}

impl Steps {
    /// Runs `first`, then every step it schedules.
    pub(crate) fn run(first: impl FnOnce(&mut Steps)) {
        let mut steps = Steps::default();
        first(&mut steps);
        while let Some(step) = steps.stack.pop() {
            step(&mut steps);
        }
    }

    fn push(&mut self, step: Step) {
        self.stack.push(step);
    }
}

type OnResult<T> = Box<dyn FnOnce(Result<T, AsyncError>, &mut Steps)>;

/// A reaction to a future's completion.
pub(crate) struct Listener<T> {
    /// Zone of the future the listener feeds; errors never cross into another
    /// error zone.
    zone: Zone,
    on_result: OnResult<T>,
}

impl<T> Listener<T> {
    pub(crate) fn new(zone: Zone, on_result: impl FnOnce(Result<T, AsyncError>, &mut Steps) + 'static) -> Self {
        Self {
            zone,
            on_result: Box::new(on_result),
        }
    }

    fn fire(self, result: Result<T, AsyncError>, source_zone: &Zone, steps: &mut Steps) {
        if let Err(error) = &result {
            if !source_zone.in_same_error_zone(&self.zone) {
                source_zone.handle_uncaught_error(error.clone());
                return;
            }
        }

        (self.on_result)(result, steps)
    }
}

enum State<T> {
    Incomplete(Vec<Listener<T>>),

    /// Completion is scheduled; no other completion is allowed.
    PendingComplete(Vec<Listener<T>>),

    /// Completes with another future's result; listeners live on that future.
    Chained(Future<T>),

    Value(T),
    Error(AsyncError),
}

impl<T> State<T> {
    fn name(&self) -> &'static str {
        match self {
            State::Incomplete(_) => "incomplete",
            State::PendingComplete(_) => "pending",
            State::Chained(_) => "chained",
            State::Value(_) => "value",
            State::Error(_) => "error",
        }
    }
}

struct FutureCell<T> {
    /// Zone the future was created in.
    zone: Zone,
    state: RefCell<State<T>>,
}

/// The eventual result of an asynchronous computation.
///
/// A `Future` completes exactly once, with a value or an [`AsyncError`].
/// Callbacks registered with [`then`](Future::then) and friends always run
/// asynchronously, in the zone that was current when they were registered,
/// and in registration order.
///
/// `Future` is a shared handle: clones observe the same completion. It can be
/// awaited from `async` code, which yields `Result<T, AsyncError>`.
///
/// An error completion that nobody listens to is reported to the future's
/// zone as an uncaught error.
///
/// # Examples
///
/// ```rust,ignore
/// let answer = Future::value(20)
///     .then(|v| Ok(v + 1))
///     .then(|v| Ok(v * 2));
///
/// assert_eq!(answer.await.unwrap(), 42);
/// ```
pub struct Future<T>(Rc<FutureCell<T>>);

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + 'static> Future<T> {
    fn with_state(state: State<T>) -> Self {
        Self(Rc::new(FutureCell {
            zone: Zone::current(),
            state: RefCell::new(state),
        }))
    }

    pub(crate) fn incomplete() -> Self {
        Self::with_state(State::Incomplete(Vec::new()))
    }

    /// A future that already holds `value`. Listeners still run asynchronously.
    pub(crate) fn completed(value: T) -> Self {
        Self::with_state(State::Value(value))
    }

    pub(crate) fn zone(&self) -> &Zone {
        &self.0.zone
    }

    /// Follows chained futures to the one that will actually complete.
    fn chain_root(&self) -> Future<T> {
        let mut current = self.clone();
        loop {
            let next = match &*current.0.state.borrow() {
                State::Chained(source) => Some(source.clone()),
                _ => None,
            };
            match next {
                Some(source) => current = source,
                None => return current,
            }
        }
    }

    pub(crate) fn may_complete(&self) -> bool {
        matches!(&*self.0.state.borrow(), State::Incomplete(_))
    }

    pub(crate) fn is_same(&self, other: &Future<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The completion, if the future (or the future it follows) has completed.
    pub fn peek(&self) -> Option<Result<T, AsyncError>> {
        let root = self.chain_root();
        let state = root.0.state.borrow();
        match &*state {
            State::Value(value) => Some(Ok(value.clone())),
            State::Error(error) => Some(Err(error.clone())),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.peek().is_some()
    }

    pub(crate) fn add_listener(&self, listener: Listener<T>) {
        let root = self.chain_root();
        let mut state = root.0.state.borrow_mut();

        let result = match &mut *state {
            State::Incomplete(listeners) | State::PendingComplete(listeners) => {
                listeners.push(listener);
                return;
            }
            State::Value(value) => Ok(value.clone()),
            State::Error(error) => Err(error.clone()),
            State::Chained(_) => unreachable!("chain root is never chained"),
        };
        drop(state);

        let zone = root.zone().clone();
        let source_zone = zone.clone();
        zone.schedule_microtask(move || {
            Steps::run(|steps| listener.fire(result, &source_zone, steps));
        });
    }

    fn take_listeners(&self, next: State<T>) -> Vec<Listener<T>> {
        let mut state = self.0.state.borrow_mut();
        match &*state {
            State::Incomplete(_) | State::PendingComplete(_) => {}
            _ => UsageError::AlreadyCompleted.raise(),
        }

        match std::mem::replace(&mut *state, next) {
            State::Incomplete(listeners) | State::PendingComplete(listeners) => listeners,
            _ => Vec::new(),
        }
    }

    /// Stores the result and schedules the listeners.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::AlreadyCompleted`] if the future already
    /// has a result or follows another future.
    pub(crate) fn complete_result(&self, result: Result<T, AsyncError>, steps: &mut Steps) {
        let next = match &result {
            Ok(value) => State::Value(value.clone()),
            Err(error) => State::Error(error.clone()),
        };
        let listeners = self.take_listeners(next);

        if listeners.is_empty() {
            if let Err(error) = result {
                self.zone().handle_uncaught_error(error);
            }
            return;
        }

        for listener in listeners.into_iter().rev() {
            let result = result.clone();
            let source_zone = self.zone().clone();
            steps.push(Box::new(move |steps| listener.fire(result, &source_zone, steps)));
        }
    }

    /// Completes now, running listeners before returning.
    pub(crate) fn complete_now(&self, result: Result<T, AsyncError>) {
        Steps::run(|steps| self.complete_result(result, steps));
    }

    /// Makes this future follow `source`.
    pub(crate) fn chain(&self, source: Future<T>, steps: &mut Steps) {
        let source = source.chain_root();
        if source.is_same(self) {
            self.complete_result(Err(AsyncError::msg("a future cannot complete with itself")), steps);
            return;
        }

        if let Some(result) = source.peek() {
            self.complete_result(result, steps);
            return;
        }

        let listeners = self.take_listeners(State::Chained(source.clone()));
        let mut state = source.0.state.borrow_mut();
        if let State::Incomplete(existing) | State::PendingComplete(existing) = &mut *state {
            existing.splice(0..0, listeners);
        }
    }

    pub(crate) fn complete_or(&self, outcome: FutureOr<T>, steps: &mut Steps) {
        match outcome {
            FutureOr::Value(value) => self.complete_result(Ok(value), steps),
            FutureOr::Error(error) => self.complete_result(Err(error), steps),
            FutureOr::Future(source) => self.chain(source, steps),
        }
    }

    fn set_pending(&self) {
        let mut state = self.0.state.borrow_mut();
        let listeners = match &mut *state {
            State::Incomplete(listeners) => std::mem::take(listeners),
            _ => UsageError::AlreadyCompleted.raise(),
        };
        *state = State::PendingComplete(listeners);
    }

    /// Completes with `result` from a microtask in the future's zone.
    pub(crate) fn complete_async(&self, result: Result<T, AsyncError>) {
        self.set_pending();
        let target = self.clone();
        self.zone().schedule_microtask(move || target.complete_now(result));
    }

    /// Follows `source`, never completing synchronously.
    pub(crate) fn chain_async(&self, source: Future<T>) {
        if source.is_complete() {
            self.set_pending();
            let target = self.clone();
            self.zone()
                .schedule_microtask(move || Steps::run(|steps| target.chain(source, steps)));
        } else {
            Steps::run(|steps| self.chain(source, steps));
        }
    }

    /// A future completed with `value` from a microtask.
    pub fn value(value: T) -> Future<T> {
        let future = Future::incomplete();
        future.complete_async(Ok(value));
        future
    }

    /// A future completed with `error` from a microtask.
    ///
    /// The current zone's error callback may replace the error first.
    pub fn error(error: AsyncError) -> Future<T> {
        let error = Zone::current().intercept_error(error);
        let future = Future::incomplete();
        future.complete_async(Err(error));
        future
    }

    /// Wraps a [`FutureOr`]: a value or error completes from a microtask, a
    /// future is returned as is.
    pub fn from_future_or(outcome: impl IntoFutureOr<T>) -> Future<T> {
        match outcome.into_future_or() {
            FutureOr::Value(value) => Future::value(value),
            FutureOr::Error(error) => Future::error(error),
            FutureOr::Future(future) => future,
        }
    }

    /// Runs `computation` from a zero-duration timer and completes with its
    /// outcome. A panic completes the future with the panic as error.
    pub fn new<U>(computation: impl FnOnce() -> U + 'static) -> Future<T>
    where
        U: IntoFutureOr<T>,
    {
        let result = Future::incomplete();
        let target = result.clone();
        Timer::run(move || {
            let outcome = settle(catch(computation));
            Steps::run(|steps| target.complete_or(outcome, steps));
        });
        result
    }

    /// Like [`Future::new`], running `computation` from a microtask.
    pub fn microtask<U>(computation: impl FnOnce() -> U + 'static) -> Future<T>
    where
        U: IntoFutureOr<T>,
    {
        let result = Future::incomplete();
        let target = result.clone();
        zone::schedule_microtask(move || {
            let outcome = settle(catch(computation));
            Steps::run(|steps| target.complete_or(outcome, steps));
        });
        result
    }

    /// Runs `computation` immediately.
    ///
    /// A returned future is passed through; a value or error (including a
    /// panic) completes the result from a microtask.
    pub fn sync<U>(computation: impl FnOnce() -> U) -> Future<T>
    where
        U: IntoFutureOr<T>,
    {
        match settle(catch(computation)) {
            FutureOr::Future(future) => future,
            FutureOr::Value(value) => Future::value(value),
            FutureOr::Error(error) => Future::error(error),
        }
    }

    /// Runs `computation` after `duration` and completes with its outcome.
    pub fn delayed_with<U>(duration: Duration, computation: impl FnOnce() -> U + 'static) -> Future<T>
    where
        U: IntoFutureOr<T>,
    {
        let result = Future::incomplete();
        let target = result.clone();
        Timer::new(duration, move || {
            let outcome = settle(catch(computation));
            Steps::run(|steps| target.complete_or(outcome, steps));
        });
        result
    }

    /// Registers callbacks for the value and, optionally, the error.
    ///
    /// Errors from this future go to `on_error` when present and pass through
    /// to the result otherwise.
    fn listen<R, U>(
        &self,
        on_value: impl FnOnce(T) -> U + 'static,
        on_error: Option<Box<dyn FnOnce(AsyncError) -> U>>,
    ) -> Future<R>
    where
        R: Clone + 'static,
        U: IntoFutureOr<R> + 'static,
    {
        let result = Future::<R>::incomplete();
        let zone = result.zone().clone();
        let on_value = zone.register_unary_callback(on_value);
        let on_error = on_error.map(|f| zone.register_unary_callback(f));
        let target = result.clone();

        self.add_listener(Listener::new(zone.clone(), move |outcome, steps| match outcome {
            Ok(value) => {
                let outcome = settle(catch(|| zone.run_unary(|v| on_value.consume(|f| f(v)), value)));
                target.complete_or(outcome, steps);
            }
            Err(error) => match on_error {
                Some(on_error) => {
                    let outcome = settle(catch(|| zone.run_unary(|e| on_error.consume(|f| f(e)), error)));
                    target.complete_or(outcome, steps);
                }
                None => target.complete_result(Err(error), steps),
            },
        }));

        result
    }

    /// Calls `on_value` with this future's value; the result completes with
    /// the callback's outcome. Errors pass through unchanged.
    pub fn then<R, U>(&self, on_value: impl FnOnce(T) -> U + 'static) -> Future<R>
    where
        R: Clone + 'static,
        U: IntoFutureOr<R> + 'static,
    {
        self.listen(on_value, None)
    }

    /// Like [`then`](Self::then), also handling this future's error.
    pub fn then_or_else<R, U>(
        &self,
        on_value: impl FnOnce(T) -> U + 'static,
        on_error: impl FnOnce(AsyncError) -> U + 'static,
    ) -> Future<R>
    where
        R: Clone + 'static,
        U: IntoFutureOr<R> + 'static,
    {
        self.listen(on_value, Some(Box::new(on_error)))
    }

    /// Handles this future's error. Values pass through unchanged.
    pub fn catch_error<U>(&self, on_error: impl FnOnce(AsyncError) -> U + 'static) -> Future<T>
    where
        U: IntoFutureOr<T> + 'static,
    {
        self.listen(|value| FutureOr::Value(value), Some(Box::new(move |e| on_error(e).into_future_or())))
    }

    /// Handles only the errors accepted by `test`; other errors pass through.
    ///
    /// A panic in `test` completes the result with that panic.
    pub fn catch_error_where<U>(
        &self,
        on_error: impl FnOnce(AsyncError) -> U + 'static,
        test: impl FnOnce(&AsyncError) -> bool + 'static,
    ) -> Future<T>
    where
        U: IntoFutureOr<T> + 'static,
    {
        let result = Future::<T>::incomplete();
        let zone = result.zone().clone();
        let on_error = zone.register_unary_callback(on_error);
        let test = zone.register_unary_callback(test);
        let target = result.clone();

        self.add_listener(Listener::new(zone.clone(), move |outcome, steps| match outcome {
            Ok(value) => target.complete_result(Ok(value), steps),
            Err(error) => {
                let matched = catch(|| zone.run_unary(|e| test.consume(|f| f(e)), &error));
                let outcome = match matched {
                    Ok(true) => settle(catch(|| zone.run_unary(|e| on_error.consume(|f| f(e)), error))),
                    Ok(false) => FutureOr::Error(error),
                    Err(failure) => FutureOr::Error(failure),
                };
                target.complete_or(outcome, steps);
            }
        }));

        result
    }

    /// Runs `action` whatever the outcome, then completes with this future's
    /// result.
    ///
    /// If `action` fails, or returns a future that fails, the result completes
    /// with that error instead, unless it is the error this future completed
    /// with.
    pub fn when_complete<U>(&self, action: impl FnOnce() -> U + 'static) -> Future<T>
    where
        U: IntoFutureOr<()> + 'static,
    {
        let result = Future::<T>::incomplete();
        let zone = result.zone().clone();
        let action = zone.register_callback(action);
        let target = result.clone();

        self.add_listener(Listener::new(zone.clone(), move |outcome, steps| {
            match settle(catch(|| zone.run(|| action.call_once()))) {
                FutureOr::Value(()) => target.complete_result(outcome, steps),
                FutureOr::Error(error) => target.complete_result(rethrown(outcome, error), steps),
                FutureOr::Future(pending) => {
                    let inner_zone = zone.clone();
                    pending.add_listener(Listener::new(inner_zone, move |done, steps| match done {
                        Ok(()) => target.complete_result(outcome, steps),
                        Err(error) => target.complete_result(rethrown(outcome, error), steps),
                    }));
                }
            }
        }));

        result
    }

    /// Marks the future as handled: an error completion is dropped instead
    /// of being reported as uncaught.
    pub fn ignore(&self) {
        self.add_listener(Listener::new(self.zone().clone(), |_, _| {}));
    }
}

impl Future<()> {
    /// A future completing with `()` after `duration`.
    pub fn delayed(duration: Duration) -> Future<()> {
        let result = Future::incomplete();
        let target = result.clone();
        Timer::new(duration, move || target.complete_now(Ok(())));
        result
    }
}

/// The outcome after a `when_complete` action failed with `error`.
///
/// An action rethrowing the error it was completing with keeps the
/// original, stack trace included.
fn rethrown<T>(outcome: Result<T, AsyncError>, error: AsyncError) -> Result<T, AsyncError> {
    match outcome {
        Err(original) if original.same(&error) => Err(original),
        _ => Err(error),
    }
}

/// Turns a caught callback outcome into a [`FutureOr`].
pub(crate) fn settle<T, U: IntoFutureOr<T>>(outcome: Result<U, AsyncError>) -> FutureOr<T> {
    match outcome {
        Ok(value) => value.into_future_or(),
        Err(error) => FutureOr::Error(error),
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("state", &self.0.state.borrow().name())
            .field("zone", &self.0.zone)
            .finish()
    }
}
