//! Zones: execution contexts that follow asynchronous callbacks.
//!
//! Every callback handed to a future, stream, timer, or microtask is
//! registered with the zone current at that moment and later runs inside it.
//! A forked zone can intercept running, scheduling, timers, printing, and
//! uncaught errors through a [`ZoneSpecification`], and can carry values
//! visible to everything running inside it.
//!
//! Errors never cross error zones: an error raised in a zone with its own
//! uncaught error handler is reported there, not delivered to a listener
//! living in another error zone.
//!
//! # Examples
//!
//! ```rust,ignore
//! use eventide::zone::run_zoned_guarded;
//!
//! run_zoned_guarded(
//!     || {
//!         Future::<()>::error(AsyncError::msg("boom"));
//!     },
//!     |error| eprintln!("caught: {error}"),
//! );
//! ```

mod callback;
mod context;
mod core;
mod delegate;
mod root;
mod spec;

pub use self::callback::{CallbackWrapper, Registered};
pub use self::core::Zone;
pub use self::delegate::ZoneDelegate;
pub use self::spec::{
    CreatePeriodicTimerHandler, CreateTimerHandler, ErrorCallbackHandler, ForkHandler, PrintHandler, RegisterHandler,
    RunHandler, ScheduleMicrotaskHandler, UncaughtErrorHandler, ZoneSpecification, ZoneValues,
};

use crate::error::{AsyncError, catch};

use std::rc::Rc;

/// Runs `body` in a fresh child of the current zone.
pub fn run_zoned<R>(body: impl FnOnce() -> R) -> R {
    run_zoned_with(body, ZoneSpecification::new(), ZoneValues::new())
}

/// Runs `body` in a child of the current zone with the given overrides and values.
pub fn run_zoned_with<R>(body: impl FnOnce() -> R, specification: ZoneSpecification, values: ZoneValues) -> R {
    Zone::current().fork(specification, values).run(body)
}

/// Runs `body` in a new error zone.
///
/// Panics raised by `body`, and every uncaught asynchronous error raised by
/// callbacks registered inside the zone, are passed to `on_error`. Returns
/// `None` if `body` itself panicked.
///
/// If `on_error` panics, the panic is reported to the parent zone.
pub fn run_zoned_guarded<R>(body: impl FnOnce() -> R, on_error: impl Fn(AsyncError) + 'static) -> Option<R> {
    run_zoned_guarded_with(body, on_error, ZoneSpecification::new(), ZoneValues::new())
}

pub fn run_zoned_guarded_with<R>(
    body: impl FnOnce() -> R,
    on_error: impl Fn(AsyncError) + 'static,
    specification: ZoneSpecification,
    values: ZoneValues,
) -> Option<R> {
    let on_error = Rc::new(on_error);
    let specification = specification.handle_uncaught_error(move |owner, parent, zone, error| {
        let on_error = on_error.clone();
        if let Err(failure) = catch(|| owner.run(|| on_error(error))) {
            parent.handle_uncaught_error(zone, failure);
        }
    });

    Zone::current().fork(specification, values).run_guarded(body)
}

/// Schedules `task` to run as a microtask in the current zone.
///
/// Panics raised by `task` are reported to the zone's uncaught error handler.
pub fn schedule_microtask(task: impl FnOnce() + 'static) {
    let zone = Zone::current();
    if zone.is_root() {
        zone.schedule_microtask(task);
    } else {
        let bound = zone.bind_callback_guarded(task);
        zone.schedule_microtask(bound);
    }
}

/// Prints a line through the current zone's `print` hook.
pub fn print(line: &str) {
    Zone::current().print(line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn test_current_zone_is_restored_after_run() {
        let root = Zone::root();
        let child = root.fork(ZoneSpecification::new(), ZoneValues::new());

        assert_eq!(Zone::current(), root);
        let inside = child.run(Zone::current);
        assert_eq!(inside, child);
        assert_eq!(Zone::current(), root);
    }

    #[test]
    fn test_current_zone_is_restored_after_panic() {
        let child = Zone::root().fork(ZoneSpecification::new(), ZoneValues::new());
        let result = catch(|| child.run(|| panic!("inside")));

        assert!(result.is_err());
        assert!(Zone::current().is_root());
    }

    #[test]
    fn test_values_are_inherited_and_shadowed() {
        let outer = Zone::root().fork(
            ZoneSpecification::new(),
            ZoneValues::new().with("name", "outer").with("depth", 1u32),
        );
        let inner = outer.fork(ZoneSpecification::new(), ZoneValues::new().with("depth", 2u32));

        assert_eq!(inner.get::<&str>("name").as_deref(), Some(&"outer"));
        assert_eq!(inner.get::<u32>("depth").as_deref(), Some(&2));
        assert_eq!(outer.get::<u32>("depth").as_deref(), Some(&1));
        assert!(inner.get::<String>("name").is_none());
        assert!(Zone::root().get::<u32>("depth").is_none());
    }

    #[test]
    fn test_run_hooks_see_every_run() {
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let spec = ZoneSpecification::new().run(move |_, parent, zone, body| {
            counter.set(counter.get() + 1);
            parent.run(zone, body);
        });
        let zone = Zone::root().fork(spec, ZoneValues::new());

        assert_eq!(zone.run(|| 1 + 1), 2);
        zone.run(|| ());

        // Children inherit the hook.
        let child = zone.fork(ZoneSpecification::new(), ZoneValues::new());
        child.run(|| ());

        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_print_hook_chain_goes_through_parents() {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = lines.clone();
        let outer = Zone::root().fork(
            ZoneSpecification::new().print(move |_, _, _, line| sink.borrow_mut().push(line.to_string())),
            ZoneValues::new(),
        );
        let inner = outer.fork(
            ZoneSpecification::new().print(|_, parent, zone, line| parent.print(zone, &format!("[inner] {line}"))),
            ZoneValues::new(),
        );

        inner.run(|| print("hello"));
        outer.run(|| print("plain"));

        assert_eq!(*lines.borrow(), vec!["[inner] hello", "plain"]);
    }

    #[test]
    fn test_error_zones() {
        let root = Zone::root();
        let plain = root.fork(ZoneSpecification::new(), ZoneValues::new());
        let guarded = root.fork(
            ZoneSpecification::new().handle_uncaught_error(|_, _, _, _| {}),
            ZoneValues::new(),
        );
        let nested = guarded.fork(ZoneSpecification::new(), ZoneValues::new());

        assert!(plain.in_same_error_zone(&root));
        assert!(!guarded.in_same_error_zone(&root));
        assert!(nested.in_same_error_zone(&guarded));
        assert_eq!(nested.error_zone(), guarded);
    }

    #[test]
    fn test_run_zoned_guarded_catches_body_panics() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        let result = run_zoned_guarded(|| -> u32 { panic!("broken") }, move |error| {
            sink.borrow_mut().push(error.message().to_string())
        });

        assert_eq!(result, None);
        assert_eq!(*seen.borrow(), vec!["broken"]);
        assert!(Zone::current().is_root());
    }

    #[test]
    fn test_registered_callbacks_are_wrapped() {
        let wrapped = Rc::new(Cell::new(0));
        let counter = wrapped.clone();
        let spec = ZoneSpecification::new().register_callback(move |_, parent, zone, wrapper| {
            let counter = counter.clone();
            parent
                .register_callback(zone, wrapper)
                .wrap(move |body| {
                    counter.set(counter.get() + 1);
                    body();
                })
        });
        let zone = Zone::root().fork(spec, ZoneValues::new());

        let bound = zone.bind_callback(|| Zone::current());
        let ran_in = bound();

        assert_eq!(ran_in, zone);
        assert_eq!(wrapped.get(), 1);
    }

    #[test]
    fn test_error_callback_replaces_errors() {
        let zone = Zone::root().fork(
            ZoneSpecification::new().error_callback(|_, _, _, error| {
                Some(AsyncError::msg(format!("wrapped: {error}")))
            }),
            ZoneValues::new(),
        );

        let replaced = zone.intercept_error(AsyncError::msg("raw"));
        assert_eq!(replaced.message(), "wrapped: raw");

        let untouched = Zone::root().intercept_error(AsyncError::msg("raw"));
        assert_eq!(untouched.message(), "raw");
    }
}
