use crate::runtime::context::{try_current, with_loop};
use crate::runtime::event_loop::EventLoop;
use crate::runtime::timer::TimerId;
use crate::zone::Zone;

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

struct TimerState {
    id: Cell<Option<TimerId>>,
    tick: Cell<u64>,

    /// `None` for one-shot timers.
    period: Option<Duration>,

    /// Loop time at which the timer was armed.
    started: Duration,

    event_loop: Weak<EventLoop>,
}

/// A countdown that runs a callback once, or repeatedly for periodic timers.
///
/// Timers are created through the current zone, so the callback runs in the
/// zone that created the timer and panics go to its uncaught error handler.
///
/// # Examples
///
/// ```rust,ignore
/// let timer = Timer::periodic(Duration::from_millis(10), |timer| {
///     if timer.tick() == 3 {
///         timer.cancel();
///     }
/// });
/// ```
#[derive(Clone)]
pub struct Timer(Rc<TimerState>);

impl Timer {
    /// Runs `callback` once after `duration`.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a running runtime.
    pub fn new(duration: Duration, callback: impl FnOnce() + 'static) -> Timer {
        let zone = Zone::current();
        if zone.is_root() {
            return zone.create_timer(duration, callback);
        }

        let bound = zone.bind_callback_guarded(callback);
        zone.create_timer(duration, bound)
    }

    /// Runs `callback` as soon as possible, after pending microtasks.
    pub fn run(callback: impl FnOnce() + 'static) -> Timer {
        Timer::new(Duration::ZERO, callback)
    }

    /// Runs `callback` every `period` until the timer is cancelled.
    pub fn periodic(period: Duration, callback: impl FnMut(&Timer) + 'static) -> Timer {
        let zone = Zone::current();
        if zone.is_root() {
            return zone.create_periodic_timer(period, callback);
        }

        let mut registered = zone.register_unary_callback(callback);
        let owner = zone.clone();
        zone.create_periodic_timer(period, move |timer: &Timer| {
            owner.run_unary_guarded(|timer| registered.invoke(|f| f(timer)), timer);
        })
    }

    /// Arms a one-shot timer directly on the event loop.
    pub(crate) fn arm_once(duration: Duration, callback: Box<dyn FnOnce()>) -> Timer {
        with_loop("Timer::new", |event_loop| {
            let timer = Timer::unarmed(event_loop, None);
            let handle = timer.clone();

            let id = event_loop.add_timer(
                duration,
                Box::new(move || {
                    handle.0.tick.set(1);
                    callback();
                }),
            );

            timer.0.id.set(Some(id));
            timer
        })
    }

    /// Arms a periodic timer directly on the event loop.
    pub(crate) fn arm_periodic(period: Duration, mut callback: Box<dyn FnMut(&Timer)>) -> Timer {
        with_loop("Timer::periodic", |event_loop| {
            let timer = Timer::unarmed(event_loop, Some(period));
            let handle = timer.clone();

            let id = event_loop.add_periodic_timer(
                period,
                Box::new(move || {
                    handle.advance_tick();
                    callback(&handle);
                }),
            );

            timer.0.id.set(Some(id));
            timer
        })
    }

    fn unarmed(event_loop: &Rc<EventLoop>, period: Option<Duration>) -> Timer {
        Timer(Rc::new(TimerState {
            id: Cell::new(None),
            tick: Cell::new(0),
            period,
            started: event_loop.now(),
            event_loop: Rc::downgrade(event_loop),
        }))
    }

    /// Counts the periods elapsed since the timer started, including ticks
    /// skipped because the loop was busy.
    fn advance_tick(&self) {
        let state = &self.0;
        let next = state.tick.get() + 1;

        let elapsed_ticks = match (state.period, try_current()) {
            (Some(period), Some(event_loop)) if !period.is_zero() => {
                let elapsed = event_loop.now().saturating_sub(state.started);
                (elapsed.as_nanos() / period.as_nanos()) as u64
            }
            _ => 0,
        };

        state.tick.set(next.max(elapsed_ticks));
    }

    /// Stops the timer. Cancelling an inactive timer does nothing.
    pub fn cancel(&self) {
        let Some(id) = self.0.id.get() else {
            return;
        };
        if let Some(event_loop) = self.0.event_loop.upgrade() {
            if event_loop.cancel_timer(id) {
                log::trace!("timer {id} cancelled");
            }
        }
    }

    /// Whether the timer can still fire.
    ///
    /// A one-shot timer is inactive once its callback started; a periodic timer
    /// stays active until cancelled.
    pub fn is_active(&self) -> bool {
        match (self.0.id.get(), self.0.event_loop.upgrade()) {
            (Some(id), Some(event_loop)) => event_loop.is_timer_armed(id),
            _ => false,
        }
    }

    /// Number of periods that have elapsed when the callback last ran.
    ///
    /// Starts at 0; a one-shot timer reads 1 once it fired.
    pub fn tick(&self) -> u64 {
        self.0.tick.get()
    }

    pub fn is_periodic(&self) -> bool {
        self.0.period.is_some()
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.0.id.get())
            .field("period", &self.0.period)
            .field("tick", &self.0.tick.get())
            .finish()
    }
}
