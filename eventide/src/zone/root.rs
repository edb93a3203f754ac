//! Default implementations installed on the root zone.
//!
//! Every hook of the root zone lands here. These are the only places where
//! zone operations reach the event loop.

use super::context::ZoneGuard;
use super::{CallbackWrapper, Zone, ZoneDelegate, ZoneSpecification, ZoneValues};
use crate::error::AsyncError;
use crate::runtime::context::{try_current, with_loop};
use crate::time::Timer;

use std::time::Duration;

pub(super) fn run(_self: &Zone, _parent: &ZoneDelegate, zone: &Zone, body: &mut dyn FnMut()) {
    if Zone::current_is(zone) {
        body();
        return;
    }

    let _guard = ZoneGuard::enter(zone);
    body();
}

pub(super) fn register(_self: &Zone, _parent: &ZoneDelegate, _zone: &Zone, wrapper: CallbackWrapper) -> CallbackWrapper {
    wrapper
}

pub(super) fn error_callback(_self: &Zone, _parent: &ZoneDelegate, _zone: &Zone, _error: &AsyncError) -> Option<AsyncError> {
    None
}

pub(super) fn schedule_microtask(_self: &Zone, _parent: &ZoneDelegate, zone: &Zone, task: Box<dyn FnOnce()>) {
    let task: Box<dyn FnOnce()> = if zone.is_root() {
        task
    } else if zone.in_same_error_zone(&Zone::root()) {
        Box::new(zone.bind_callback(task))
    } else {
        Box::new(zone.bind_callback_guarded(task))
    };

    with_loop("schedule_microtask", |event_loop| event_loop.schedule_microtask(task));
}

pub(super) fn create_timer(
    _self: &Zone,
    _parent: &ZoneDelegate,
    zone: &Zone,
    duration: Duration,
    callback: Box<dyn FnOnce()>,
) -> Timer {
    let callback: Box<dyn FnOnce()> = if zone.is_root() {
        callback
    } else {
        Box::new(zone.bind_callback(callback))
    };

    Timer::arm_once(duration, callback)
}

pub(super) fn create_periodic_timer(
    _self: &Zone,
    _parent: &ZoneDelegate,
    zone: &Zone,
    period: Duration,
    callback: Box<dyn FnMut(&Timer)>,
) -> Timer {
    let callback: Box<dyn FnMut(&Timer)> = if zone.is_root() {
        callback
    } else {
        let zone = zone.clone();
        let mut registered = zone.register_unary_callback(callback);
        Box::new(move |timer: &Timer| zone.run_unary(|timer| registered.invoke(|f| f(timer)), timer))
    };

    Timer::arm_periodic(period, callback)
}

pub(super) fn print(_self: &Zone, _parent: &ZoneDelegate, _zone: &Zone, line: &str) {
    println!("{line}");
}

pub(super) fn fork(
    _self: &Zone,
    _parent: &ZoneDelegate,
    zone: &Zone,
    specification: ZoneSpecification,
    values: ZoneValues,
) -> Zone {
    Zone::new_child(zone, specification, values)
}

pub(super) fn handle_uncaught_error(_self: &Zone, _parent: &ZoneDelegate, _zone: &Zone, error: AsyncError) {
    match try_current() {
        Some(event_loop) => event_loop.report_uncaught(error),
        None => panic!("Uncaught error: {error}"),
    }
}
