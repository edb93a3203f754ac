use super::{CallbackWrapper, Zone, ZoneDelegate};
use crate::error::AsyncError;
use crate::time::Timer;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Intercepts `run`, `run_unary`, and `run_binary`.
///
/// Arguments are the zone defining the handler, a delegate to its parent, the
/// zone the call was made on, and the type-erased body. The handler must
/// invoke the body exactly once, usually through `parent.run(zone, body)`.
pub type RunHandler = Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, &mut dyn FnMut())>;

/// Intercepts callback registration; returns the wrapper to apply.
pub type RegisterHandler = Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, CallbackWrapper) -> CallbackWrapper>;

/// Intercepts errors about to be stored in a future or stream.
///
/// Returning `Some` replaces the error.
pub type ErrorCallbackHandler = Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, &AsyncError) -> Option<AsyncError>>;

pub type ScheduleMicrotaskHandler = Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, Box<dyn FnOnce()>)>;

pub type CreateTimerHandler = Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, Duration, Box<dyn FnOnce()>) -> Timer>;

pub type CreatePeriodicTimerHandler =
    Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, Duration, Box<dyn FnMut(&Timer)>) -> Timer>;

pub type PrintHandler = Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, &str)>;

pub type ForkHandler = Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, ZoneSpecification, ZoneValues) -> Zone>;

pub type UncaughtErrorHandler = Rc<dyn Fn(&Zone, &ZoneDelegate, &Zone, AsyncError)>;

/// The set of overrides a forked zone installs.
///
/// Every hook left unset is inherited from the parent zone.
///
/// # Examples
///
/// ```rust,ignore
/// let spec = ZoneSpecification::new().print(|_, parent, zone, line| {
///     parent.print(zone, &format!("[worker] {line}"));
/// });
/// Zone::current().fork(spec, ZoneValues::new()).run(|| eventide::print("ready"));
/// ```
#[derive(Clone, Default)]
pub struct ZoneSpecification {
    pub(crate) run: Option<RunHandler>,
    pub(crate) run_unary: Option<RunHandler>,
    pub(crate) run_binary: Option<RunHandler>,
    pub(crate) register_callback: Option<RegisterHandler>,
    pub(crate) register_unary_callback: Option<RegisterHandler>,
    pub(crate) register_binary_callback: Option<RegisterHandler>,
    pub(crate) error_callback: Option<ErrorCallbackHandler>,
    pub(crate) schedule_microtask: Option<ScheduleMicrotaskHandler>,
    pub(crate) create_timer: Option<CreateTimerHandler>,
    pub(crate) create_periodic_timer: Option<CreatePeriodicTimerHandler>,
    pub(crate) print: Option<PrintHandler>,
    pub(crate) fork: Option<ForkHandler>,
    pub(crate) handle_uncaught_error: Option<UncaughtErrorHandler>,
}

impl ZoneSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, handler: impl Fn(&Zone, &ZoneDelegate, &Zone, &mut dyn FnMut()) + 'static) -> Self {
        self.run = Some(Rc::new(handler));
        self
    }

    pub fn run_unary(mut self, handler: impl Fn(&Zone, &ZoneDelegate, &Zone, &mut dyn FnMut()) + 'static) -> Self {
        self.run_unary = Some(Rc::new(handler));
        self
    }

    pub fn run_binary(mut self, handler: impl Fn(&Zone, &ZoneDelegate, &Zone, &mut dyn FnMut()) + 'static) -> Self {
        self.run_binary = Some(Rc::new(handler));
        self
    }

    pub fn register_callback(
        mut self,
        handler: impl Fn(&Zone, &ZoneDelegate, &Zone, CallbackWrapper) -> CallbackWrapper + 'static,
    ) -> Self {
        self.register_callback = Some(Rc::new(handler));
        self
    }

    pub fn register_unary_callback(
        mut self,
        handler: impl Fn(&Zone, &ZoneDelegate, &Zone, CallbackWrapper) -> CallbackWrapper + 'static,
    ) -> Self {
        self.register_unary_callback = Some(Rc::new(handler));
        self
    }

    pub fn register_binary_callback(
        mut self,
        handler: impl Fn(&Zone, &ZoneDelegate, &Zone, CallbackWrapper) -> CallbackWrapper + 'static,
    ) -> Self {
        self.register_binary_callback = Some(Rc::new(handler));
        self
    }

    pub fn error_callback(
        mut self,
        handler: impl Fn(&Zone, &ZoneDelegate, &Zone, &AsyncError) -> Option<AsyncError> + 'static,
    ) -> Self {
        self.error_callback = Some(Rc::new(handler));
        self
    }

    pub fn schedule_microtask(
        mut self,
        handler: impl Fn(&Zone, &ZoneDelegate, &Zone, Box<dyn FnOnce()>) + 'static,
    ) -> Self {
        self.schedule_microtask = Some(Rc::new(handler));
        self
    }

    pub fn create_timer(
        mut self,
        handler: impl Fn(&Zone, &ZoneDelegate, &Zone, Duration, Box<dyn FnOnce()>) -> Timer + 'static,
    ) -> Self {
        self.create_timer = Some(Rc::new(handler));
        self
    }

    pub fn create_periodic_timer(
        mut self,
        handler: impl Fn(&Zone, &ZoneDelegate, &Zone, Duration, Box<dyn FnMut(&Timer)>) -> Timer + 'static,
    ) -> Self {
        self.create_periodic_timer = Some(Rc::new(handler));
        self
    }

    pub fn print(mut self, handler: impl Fn(&Zone, &ZoneDelegate, &Zone, &str) + 'static) -> Self {
        self.print = Some(Rc::new(handler));
        self
    }

    pub fn fork(
        mut self,
        handler: impl Fn(&Zone, &ZoneDelegate, &Zone, ZoneSpecification, ZoneValues) -> Zone + 'static,
    ) -> Self {
        self.fork = Some(Rc::new(handler));
        self
    }

    pub fn handle_uncaught_error(mut self, handler: impl Fn(&Zone, &ZoneDelegate, &Zone, AsyncError) + 'static) -> Self {
        self.handle_uncaught_error = Some(Rc::new(handler));
        self
    }
}

impl fmt::Debug for ZoneSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = Vec::new();
        let hooks = [
            ("run", self.run.is_some()),
            ("run_unary", self.run_unary.is_some()),
            ("run_binary", self.run_binary.is_some()),
            ("register_callback", self.register_callback.is_some()),
            ("register_unary_callback", self.register_unary_callback.is_some()),
            ("register_binary_callback", self.register_binary_callback.is_some()),
            ("error_callback", self.error_callback.is_some()),
            ("schedule_microtask", self.schedule_microtask.is_some()),
            ("create_timer", self.create_timer.is_some()),
            ("create_periodic_timer", self.create_periodic_timer.is_some()),
            ("print", self.print.is_some()),
            ("fork", self.fork.is_some()),
            ("handle_uncaught_error", self.handle_uncaught_error.is_some()),
        ];
        for (name, present) in hooks {
            if present {
                set.push(name);
            }
        }
        f.debug_struct("ZoneSpecification").field("overrides", &set).finish()
    }
}

/// Key/value pairs attached to a forked zone.
///
/// Lookups through [`Zone::get`] fall back to the parent chain, so a child
/// zone sees its ancestors' values unless it shadows them.
#[derive(Clone, Default)]
pub struct ZoneValues(pub(crate) HashMap<&'static str, Rc<dyn Any>>);

impl ZoneValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, replacing any previous value for the key.
    pub fn with<T: 'static>(mut self, key: &'static str, value: T) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<T: 'static>(&mut self, key: &'static str, value: T) {
        self.0.insert(key, Rc::new(value));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ZoneValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}
