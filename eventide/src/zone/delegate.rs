use super::spec::{ZoneSpecification, ZoneValues};
use super::{CallbackWrapper, Zone};
use crate::error::AsyncError;
use crate::time::Timer;

use std::fmt;
use std::time::Duration;

/// Gives a zone handler access to its parent's implementation.
///
/// Every method takes the zone the original call was made on, which is passed
/// through unchanged to the parent's handler.
#[derive(Clone)]
pub struct ZoneDelegate {
    /// The zone whose hooks the delegate calls. The root zone delegates to itself.
    zone: Zone,
}

impl ZoneDelegate {
    pub(crate) fn new(zone: Zone) -> Self {
        Self { zone }
    }

    pub fn run(&self, zone: &Zone, body: &mut dyn FnMut()) {
        let (owner, parent, handler) = self.zone.hooks().run.resolve(&self.zone);
        handler(&owner, &parent, zone, body)
    }

    pub fn run_unary(&self, zone: &Zone, body: &mut dyn FnMut()) {
        let (owner, parent, handler) = self.zone.hooks().run_unary.resolve(&self.zone);
        handler(&owner, &parent, zone, body)
    }

    pub fn run_binary(&self, zone: &Zone, body: &mut dyn FnMut()) {
        let (owner, parent, handler) = self.zone.hooks().run_binary.resolve(&self.zone);
        handler(&owner, &parent, zone, body)
    }

    pub fn register_callback(&self, zone: &Zone, wrapper: CallbackWrapper) -> CallbackWrapper {
        let (owner, parent, handler) = self.zone.hooks().register_callback.resolve(&self.zone);
        handler(&owner, &parent, zone, wrapper)
    }

    pub fn register_unary_callback(&self, zone: &Zone, wrapper: CallbackWrapper) -> CallbackWrapper {
        let (owner, parent, handler) = self.zone.hooks().register_unary_callback.resolve(&self.zone);
        handler(&owner, &parent, zone, wrapper)
    }

    pub fn register_binary_callback(&self, zone: &Zone, wrapper: CallbackWrapper) -> CallbackWrapper {
        let (owner, parent, handler) = self.zone.hooks().register_binary_callback.resolve(&self.zone);
        handler(&owner, &parent, zone, wrapper)
    }

    pub fn error_callback(&self, zone: &Zone, error: &AsyncError) -> Option<AsyncError> {
        let (owner, parent, handler) = self.zone.hooks().error_callback.resolve(&self.zone);
        handler(&owner, &parent, zone, error)
    }

    pub fn schedule_microtask(&self, zone: &Zone, task: Box<dyn FnOnce()>) {
        let (owner, parent, handler) = self.zone.hooks().schedule_microtask.resolve(&self.zone);
        handler(&owner, &parent, zone, task)
    }

    pub fn create_timer(&self, zone: &Zone, duration: Duration, callback: Box<dyn FnOnce()>) -> Timer {
        let (owner, parent, handler) = self.zone.hooks().create_timer.resolve(&self.zone);
        handler(&owner, &parent, zone, duration, callback)
    }

    pub fn create_periodic_timer(&self, zone: &Zone, period: Duration, callback: Box<dyn FnMut(&Timer)>) -> Timer {
        let (owner, parent, handler) = self.zone.hooks().create_periodic_timer.resolve(&self.zone);
        handler(&owner, &parent, zone, period, callback)
    }

    pub fn print(&self, zone: &Zone, line: &str) {
        let (owner, parent, handler) = self.zone.hooks().print.resolve(&self.zone);
        handler(&owner, &parent, zone, line)
    }

    pub fn fork(&self, zone: &Zone, specification: ZoneSpecification, values: ZoneValues) -> Zone {
        let (owner, parent, handler) = self.zone.hooks().fork.resolve(&self.zone);
        handler(&owner, &parent, zone, specification, values)
    }

    pub fn handle_uncaught_error(&self, zone: &Zone, error: AsyncError) {
        let (owner, parent, handler) = self.zone.hooks().handle_uncaught_error.resolve(&self.zone);
        handler(&owner, &parent, zone, error)
    }
}

impl fmt::Debug for ZoneDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ZoneDelegate").field(&self.zone).finish()
    }
}
