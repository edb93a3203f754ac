use super::builder::{Clock, UncaughtErrorPolicy};
use super::microtask::{Microtask, MicrotaskQueue};
use super::ready::{ReadyQueue, TaskId};
use super::task::LocalTask;
use super::timer::{TimerCallback, TimerId, TimerQueue};
use crate::error::AsyncError;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The single-threaded event loop behind a [`Runtime`](crate::Runtime).
///
/// It owns the microtask queue, the timer heap, and the local tasks spawned
/// from `std` futures. One turn of the loop drains every microtask (including
/// those scheduled while draining), then fires the earliest expired timer.
pub(crate) struct EventLoop {
    microtasks: RefCell<MicrotaskQueue>,
    timers: RefCell<TimerQueue>,
    tasks: RefCell<HashMap<TaskId, Rc<LocalTask>>>,
    next_task: Cell<TaskId>,

    /// Woken task ids, shared with wakers.
    ready: Arc<ReadyQueue>,

    clock: Clock,
    start: Instant,
    virtual_now: Cell<Duration>,

    uncaught: UncaughtErrorPolicy,

    /// Set while `run_microtasks` is on the stack.
    draining: Cell<bool>,
}

/// Resets the draining flag even if a microtask panics.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl EventLoop {
    pub(crate) fn new(clock: Clock, uncaught: UncaughtErrorPolicy) -> Self {
        Self {
            microtasks: RefCell::new(MicrotaskQueue::new()),
            timers: RefCell::new(TimerQueue::new()),
            tasks: RefCell::new(HashMap::new()),
            next_task: Cell::new(0),
            ready: Arc::new(ReadyQueue::new()),
            clock,
            start: Instant::now(),
            virtual_now: Cell::new(Duration::ZERO),
            uncaught,
            draining: Cell::new(false),
        }
    }

    /// Time elapsed since the loop was created, on the configured clock.
    pub(crate) fn now(&self) -> Duration {
        match self.clock {
            Clock::Real => self.start.elapsed(),
            Clock::Virtual => self.virtual_now.get(),
        }
    }

    pub(crate) fn schedule_microtask(&self, task: Microtask) {
        self.microtasks.borrow_mut().push(task);
    }

    pub(crate) fn schedule_priority(&self, task: Microtask) {
        self.microtasks.borrow_mut().push_priority(task);
    }

    pub(crate) fn add_timer(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let deadline = self.now() + delay;
        let id = self.timers.borrow_mut().insert_once(deadline, callback);
        log::trace!("timer {id} armed for {deadline:?}");
        id
    }

    pub(crate) fn add_periodic_timer(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerId {
        let deadline = self.now() + period;
        let id = self
            .timers
            .borrow_mut()
            .insert_periodic(deadline, period, callback);
        log::trace!("periodic timer {id} armed every {period:?}");
        id
    }

    pub(crate) fn cancel_timer(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().cancel(id)
    }

    pub(crate) fn is_timer_armed(&self, id: TimerId) -> bool {
        self.timers.borrow().is_armed(id)
    }

    /// Registers a local task and queues its first poll.
    pub(crate) fn spawn_task(&self, build: impl FnOnce(TaskId, Arc<ReadyQueue>) -> LocalTask) -> TaskId {
        let id = self.next_task.get();
        self.next_task.set(id + 1);

        let task = Rc::new(build(id, self.ready.clone()));
        self.tasks.borrow_mut().insert(id, task);
        self.ready.push(id);

        id
    }

    /// Reports an error nobody handled, according to the uncaught error policy.
    pub(crate) fn report_uncaught(&self, error: AsyncError) {
        match self.uncaught {
            UncaughtErrorPolicy::Panic => {
                self.schedule_priority(Box::new(move || {
                    panic!("Uncaught error: {error}\n{:?}", error.stack_trace())
                }));
            }
            UncaughtErrorPolicy::Log => {
                log::error!("Uncaught error: {error}");
            }
        }
    }

    /// Moves woken tasks to the end of the microtask queue.
    fn pump_ready(self: &Rc<Self>) {
        for id in self.ready.drain() {
            let event_loop = self.clone();
            self.schedule_microtask(Box::new(move || event_loop.poll_task(id)));
        }
    }

    fn poll_task(&self, id: TaskId) {
        let Some(task) = self.tasks.borrow().get(&id).cloned() else {
            return;
        };

        if task.poll() {
            self.tasks.borrow_mut().remove(&id);
        }
    }

    /// Runs microtasks until the queue is empty.
    ///
    /// Re-entrant calls return immediately; the outer drain picks up anything
    /// they would have run.
    pub(crate) fn run_microtasks(self: &Rc<Self>) {
        if self.draining.replace(true) {
            return;
        }
        let _guard = DrainGuard(&self.draining);
        let mut ran = 0usize;

        loop {
            self.pump_ready();

            let next = self.microtasks.borrow_mut().pop();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }

        if ran > 0 {
            log::trace!("drained {ran} microtasks");
        }
    }

    /// Drives the loop until `done` returns `true` or nothing is left to run.
    ///
    /// Returns whether `done` was satisfied.
    pub(crate) fn run_until(self: &Rc<Self>, mut done: impl FnMut() -> bool) -> bool {
        loop {
            self.run_microtasks();

            if done() {
                return true;
            }

            if !self.ready.is_empty() || !self.microtasks.borrow().is_empty() {
                continue;
            }

            let Some(deadline) = self.timers.borrow_mut().next_deadline() else {
                return false;
            };

            if !self.advance_to(deadline) {
                continue;
            }

            self.fire_timer();
        }
    }

    /// Moves the clock to `deadline`. Returns `false` if a task woke up first.
    fn advance_to(&self, deadline: Duration) -> bool {
        match self.clock {
            Clock::Virtual => {
                if deadline > self.virtual_now.get() {
                    self.virtual_now.set(deadline);
                }
                true
            }
            Clock::Real => loop {
                let now = self.now();
                if now >= deadline {
                    return true;
                }

                self.ready.park(deadline - now);
                if !self.ready.is_empty() {
                    return false;
                }
            },
        }
    }

    fn fire_timer(&self) {
        let now = self.now();
        let Some(expired) = self.timers.borrow_mut().pop_expired(now) else {
            return;
        };

        log::trace!("timer {} fired at {now:?}", expired.id);

        match expired.callback {
            TimerCallback::Once(callback) => callback(),
            TimerCallback::Periodic(mut callback) => {
                callback();
                self.timers
                    .borrow_mut()
                    .rearm(expired.id, TimerCallback::Periodic(callback), now);
            }
        }
    }

    /// Drops every pending microtask, timer, and task.
    pub(crate) fn shutdown(&self) {
        let microtasks = std::mem::replace(&mut *self.microtasks.borrow_mut(), MicrotaskQueue::new());
        let timers = std::mem::replace(&mut *self.timers.borrow_mut(), TimerQueue::new());
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());

        log::debug!(
            "event loop shutdown: dropping {} microtasks and {} tasks",
            microtasks.len(),
            tasks.len()
        );

        drop(microtasks);
        drop(timers);
        drop(tasks);
    }
}
