use super::core::{Listener, Steps, settle};
use super::{Future, FutureOr, IntoFutureOr};
use crate::error::{AsyncError, TimeoutError, catch};
use crate::time::Timer;
use crate::zone::Zone;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Options for [`Future::wait_with`].
pub struct WaitOptions<T> {
    /// Complete with the first error as soon as it happens instead of waiting
    /// for every future.
    pub eager_error: bool,

    /// Receives the values of futures that succeeded when another one failed.
    pub clean_up: Option<Box<dyn Fn(T)>>,
}

impl<T> Default for WaitOptions<T> {
    fn default() -> Self {
        Self {
            eager_error: false,
            clean_up: None,
        }
    }
}

impl<T> WaitOptions<T> {
    pub fn eager_error(mut self, eager: bool) -> Self {
        self.eager_error = eager;
        self
    }

    pub fn clean_up(mut self, clean_up: impl Fn(T) + 'static) -> Self {
        self.clean_up = Some(Box::new(clean_up));
        self
    }
}

struct WaitState<T> {
    /// `None` once an error was seen.
    values: Option<Vec<Option<T>>>,
    remaining: usize,
    error: Option<AsyncError>,
    eager_error: bool,
    clean_up: Option<Box<dyn Fn(T)>>,
    /// Zone `wait` was called in.
    zone: Zone,
}

type Completion<T> = Option<Result<Vec<T>, AsyncError>>;

impl<T: Clone + 'static> WaitState<T> {
    /// Records one outcome. Returns the completion, if any, and the values
    /// that must be cleaned up.
    fn record(&mut self, position: usize, outcome: Result<T, AsyncError>) -> (Completion<T>, Vec<T>) {
        self.remaining -= 1;
        let finished = self.remaining == 0;

        match outcome {
            Ok(value) => match &mut self.values {
                Some(values) => {
                    values[position] = Some(value);
                    if !finished {
                        return (None, Vec::new());
                    }
                    let values = self.values.take().unwrap_or_default();
                    (Some(Ok(values.into_iter().flatten().collect())), Vec::new())
                }
                None => (self.late_error(finished), vec![value]),
            },
            Err(error) => match self.values.take() {
                Some(values) => {
                    let succeeded = values.into_iter().flatten().collect();
                    if finished || self.eager_error {
                        (Some(Err(error)), succeeded)
                    } else {
                        self.error = Some(error);
                        (None, succeeded)
                    }
                }
                None => (self.late_error(finished), Vec::new()),
            },
        }
    }

    /// The stored first error, once every future is done.
    fn late_error(&self, finished: bool) -> Completion<T> {
        if finished && !self.eager_error {
            self.error.clone().map(Err)
        } else {
            None
        }
    }

    /// Hands `value` to the clean-up callback inside the waiting zone. A
    /// panic there is uncaught in that zone.
    fn clean(&self, value: T) {
        if let Some(clean_up) = &self.clean_up {
            self.zone.run(|| {
                let _ = Future::<()>::sync(|| {
                    clean_up(value);
                    Ok(())
                });
            });
        }
    }
}

impl<T: Clone + 'static> Future<T> {
    /// Waits for every future and completes with their values in order.
    ///
    /// Completes with the first error once all futures are done.
    pub fn wait(futures: impl IntoIterator<Item = Future<T>>) -> Future<Vec<T>> {
        Future::wait_with(futures, WaitOptions::default())
    }

    pub fn wait_with(futures: impl IntoIterator<Item = Future<T>>, options: WaitOptions<T>) -> Future<Vec<T>> {
        let futures: Vec<_> = futures.into_iter().collect();
        if futures.is_empty() {
            return Future::value(Vec::new());
        }

        let result = Future::<Vec<T>>::incomplete();
        let zone = result.zone().clone();
        let state = Rc::new(RefCell::new(WaitState {
            values: Some(vec![None; futures.len()]),
            remaining: futures.len(),
            error: None,
            eager_error: options.eager_error,
            clean_up: options.clean_up,
            zone: zone.clone(),
        }));

        for (position, future) in futures.into_iter().enumerate() {
            let state = state.clone();
            let target = result.clone();

            future.add_listener(Listener::new(zone.clone(), move |outcome, steps| {
                let (completion, succeeded) = state.borrow_mut().record(position, outcome);

                for value in succeeded {
                    state.borrow().clean(value);
                }
                if let Some(completion) = completion {
                    target.complete_result(completion, steps);
                }
            }));
        }

        result
    }

    /// Completes with the outcome of the first future to complete.
    pub fn any(futures: impl IntoIterator<Item = Future<T>>) -> Future<T> {
        let result = Future::<T>::incomplete();
        let zone = result.zone().clone();

        for future in futures {
            let target = result.clone();
            future.add_listener(Listener::new(zone.clone(), move |outcome, steps| {
                if target.may_complete() {
                    target.complete_result(outcome, steps);
                }
            }));
        }

        result
    }

    /// Completes with the value of this future, or with a [`TimeoutError`] if
    /// it takes longer than `limit`.
    pub fn timeout(&self, limit: Duration) -> Future<T> {
        self.bounded(limit, None)
    }

    /// Completes with the value of this future, or with the outcome of
    /// `on_timeout` if it takes longer than `limit`.
    pub fn timeout_with<U>(&self, limit: Duration, on_timeout: impl FnOnce() -> U + 'static) -> Future<T>
    where
        U: IntoFutureOr<T> + 'static,
    {
        let on_timeout: Box<dyn FnOnce() -> FutureOr<T>> = Box::new(move || on_timeout().into_future_or());
        self.bounded(limit, Some(on_timeout))
    }

    fn bounded(&self, limit: Duration, on_timeout: Option<Box<dyn FnOnce() -> FutureOr<T>>>) -> Future<T> {
        if self.is_complete() {
            return self.then(|value| Ok(value));
        }

        let result = Future::<T>::incomplete();
        let zone = result.zone().clone();

        let fallback = result.clone();
        let fallback_zone = zone.clone();
        let on_timeout = on_timeout.map(|f| zone.register_callback(f));
        let timer = Timer::new(limit, move || {
            let outcome = match on_timeout {
                Some(on_timeout) => settle(catch(|| fallback_zone.run(|| on_timeout.call_once()))),
                None => FutureOr::Error(AsyncError::new(TimeoutError(limit))),
            };
            Steps::run(|steps| fallback.complete_or(outcome, steps));
        });

        let target = result.clone();
        self.add_listener(Listener::new(zone, move |outcome, steps| {
            if timer.is_active() {
                timer.cancel();
                target.complete_result(outcome, steps);
            }
        }));

        result
    }
}

impl Future<()> {
    /// Runs `action` for each item, one at a time, waiting for the futures
    /// it returns.
    ///
    /// Stops at the first error, which completes the result.
    pub fn for_each<It, U>(items: It, mut action: impl FnMut(It::Item) -> U + 'static) -> Future<()>
    where
        It: IntoIterator,
        It::IntoIter: 'static,
        U: IntoFutureOr<()> + 'static,
    {
        let mut items = items.into_iter();
        Future::do_while(move || {
            let Some(item) = items.next() else {
                return FutureOr::Value(false);
            };
            match action(item).into_future_or() {
                FutureOr::Value(()) => FutureOr::Value(true),
                FutureOr::Error(error) => FutureOr::Error(error),
                FutureOr::Future(pending) => FutureOr::Future(pending.then(|()| Ok(true))),
            }
        })
    }

    /// Runs `action` repeatedly until it yields `false`.
    ///
    /// Synchronous results loop without yielding; a returned future is
    /// awaited before the next iteration. The first error completes the
    /// result.
    pub fn do_while<U>(mut action: impl FnMut() -> U + 'static) -> Future<()>
    where
        U: IntoFutureOr<bool> + 'static,
    {
        let done = Future::<()>::incomplete();
        let zone = Zone::current();
        let looper = Rc::new(DoWhile {
            action: RefCell::new(Box::new(move || action().into_future_or())),
            done: done.clone(),
            zone,
        });

        looper.next_iteration(true);
        done
    }
}

struct DoWhile {
    action: RefCell<Box<dyn FnMut() -> FutureOr<bool>>>,
    done: Future<()>,
    zone: Zone,
}

impl DoWhile {
    fn next_iteration(self: Rc<Self>, mut keep_going: bool) {
        let zone = self.zone.clone();
        zone.run_guarded(move || {
            while keep_going {
                let outcome = catch(|| {
                    let mut action = self.action.borrow_mut();
                    (*action)()
                });
                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(error) => FutureOr::Error(error),
                };

                match outcome {
                    FutureOr::Value(next) => keep_going = next,
                    FutureOr::Error(error) => {
                        self.done.complete_async(Err(error));
                        return;
                    }
                    FutureOr::Future(pending) => {
                        let looper = self.clone();
                        pending.add_listener(Listener::new(looper.zone.clone(), move |outcome, steps| {
                            match outcome {
                                Ok(next) => looper.next_iteration(next),
                                Err(error) => looper.done.complete_result(Err(error), steps),
                            }
                        }));
                        return;
                    }
                }
            }

            self.done.complete_now(Ok(()));
        });
    }
}
