use super::context;
use super::root;
use super::spec::*;
use super::{CallbackWrapper, Registered, ZoneDelegate};
use crate::error::{AsyncError, UsageError, catch};
use crate::time::Timer;

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

thread_local! {
    static ROOT: Zone = Zone::new_root();
}

/// A hook as seen from one zone: the handler and how many levels up the
/// parent chain the zone that installed it sits.
#[derive(Clone)]
pub(super) struct Hook<H> {
    depth: usize,
    handler: H,
}

impl<H: Clone> Hook<H> {
    fn own(handler: H) -> Self {
        Self { depth: 0, handler }
    }

    fn inherited(&self) -> Self {
        Self {
            depth: self.depth + 1,
            handler: self.handler.clone(),
        }
    }

    /// Returns the zone owning the hook, a delegate to its parent, and the handler.
    pub(super) fn resolve(&self, from: &Zone) -> (Zone, ZoneDelegate, H) {
        let owner = from.ancestor(self.depth);
        let parent = ZoneDelegate::new(owner.parent().unwrap_or_else(|| owner.clone()));
        (owner, parent, self.handler.clone())
    }

    fn pick(own: Option<H>, parent: &Hook<H>) -> Self {
        match own {
            Some(handler) => Self::own(handler),
            None => parent.inherited(),
        }
    }
}

pub(super) struct Hooks {
    pub(super) run: Hook<RunHandler>,
    pub(super) run_unary: Hook<RunHandler>,
    pub(super) run_binary: Hook<RunHandler>,
    pub(super) register_callback: Hook<RegisterHandler>,
    pub(super) register_unary_callback: Hook<RegisterHandler>,
    pub(super) register_binary_callback: Hook<RegisterHandler>,
    pub(super) error_callback: Hook<ErrorCallbackHandler>,
    pub(super) schedule_microtask: Hook<ScheduleMicrotaskHandler>,
    pub(super) create_timer: Hook<CreateTimerHandler>,
    pub(super) create_periodic_timer: Hook<CreatePeriodicTimerHandler>,
    pub(super) print: Hook<PrintHandler>,
    pub(super) fork: Hook<ForkHandler>,
    pub(super) handle_uncaught_error: Hook<UncaughtErrorHandler>,
}

struct ZoneInner {
    parent: Option<Zone>,
    hooks: Hooks,
    values: ZoneValues,
}

/// An execution context that asynchronous callbacks remember and re-enter.
///
/// Zones form a tree rooted at [`Zone::root`]. Futures, streams, and timers
/// capture the current zone when a callback is registered and run the
/// callback back inside it, so a zone's hooks see every asynchronous
/// continuation started from code running in it.
///
/// `Zone` is a cheap handle; clones refer to the same zone and compare equal.
#[derive(Clone)]
pub struct Zone {
    inner: Rc<ZoneInner>,
}

impl Zone {
    fn new_root() -> Self {
        let run: RunHandler = Rc::new(root::run);
        let register: RegisterHandler = Rc::new(root::register);
        let error_callback: ErrorCallbackHandler = Rc::new(root::error_callback);
        let schedule_microtask: ScheduleMicrotaskHandler = Rc::new(root::schedule_microtask);
        let create_timer: CreateTimerHandler = Rc::new(root::create_timer);
        let create_periodic_timer: CreatePeriodicTimerHandler = Rc::new(root::create_periodic_timer);
        let print: PrintHandler = Rc::new(root::print);
        let fork: ForkHandler = Rc::new(root::fork);
        let handle_uncaught_error: UncaughtErrorHandler = Rc::new(root::handle_uncaught_error);

        let hooks = Hooks {
            run: Hook::own(run.clone()),
            run_unary: Hook::own(run.clone()),
            run_binary: Hook::own(run),
            register_callback: Hook::own(register.clone()),
            register_unary_callback: Hook::own(register.clone()),
            register_binary_callback: Hook::own(register),
            error_callback: Hook::own(error_callback),
            schedule_microtask: Hook::own(schedule_microtask),
            create_timer: Hook::own(create_timer),
            create_periodic_timer: Hook::own(create_periodic_timer),
            print: Hook::own(print),
            fork: Hook::own(fork),
            handle_uncaught_error: Hook::own(handle_uncaught_error),
        };

        Self {
            inner: Rc::new(ZoneInner {
                parent: None,
                hooks,
                values: ZoneValues::new(),
            }),
        }
    }

    pub(super) fn new_child(parent: &Zone, spec: ZoneSpecification, values: ZoneValues) -> Self {
        let inherited = &parent.inner.hooks;

        let hooks = Hooks {
            run: Hook::pick(spec.run, &inherited.run),
            run_unary: Hook::pick(spec.run_unary, &inherited.run_unary),
            run_binary: Hook::pick(spec.run_binary, &inherited.run_binary),
            register_callback: Hook::pick(spec.register_callback, &inherited.register_callback),
            register_unary_callback: Hook::pick(spec.register_unary_callback, &inherited.register_unary_callback),
            register_binary_callback: Hook::pick(spec.register_binary_callback, &inherited.register_binary_callback),
            error_callback: Hook::pick(spec.error_callback, &inherited.error_callback),
            schedule_microtask: Hook::pick(spec.schedule_microtask, &inherited.schedule_microtask),
            create_timer: Hook::pick(spec.create_timer, &inherited.create_timer),
            create_periodic_timer: Hook::pick(spec.create_periodic_timer, &inherited.create_periodic_timer),
            print: Hook::pick(spec.print, &inherited.print),
            fork: Hook::pick(spec.fork, &inherited.fork),
            handle_uncaught_error: Hook::pick(spec.handle_uncaught_error, &inherited.handle_uncaught_error),
        };

        Self {
            inner: Rc::new(ZoneInner {
                parent: Some(parent.clone()),
                hooks,
                values,
            }),
        }
    }

    pub(super) fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    fn ancestor(&self, depth: usize) -> Zone {
        let mut zone = self.clone();
        for _ in 0..depth {
            match zone.inner.parent.clone() {
                Some(parent) => zone = parent,
                None => break,
            }
        }
        zone
    }

    /// The root zone of the current thread.
    pub fn root() -> Zone {
        ROOT.with(Zone::clone)
    }

    /// The zone the calling code runs in.
    pub fn current() -> Zone {
        context::current().unwrap_or_else(Zone::root)
    }

    pub(crate) fn current_is(zone: &Zone) -> bool {
        match context::current() {
            Some(current) => current == *zone,
            None => zone.is_root(),
        }
    }

    pub fn parent(&self) -> Option<Zone> {
        self.inner.parent.clone()
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// The closest zone, starting at `self`, that handles uncaught errors.
    pub fn error_zone(&self) -> Zone {
        self.ancestor(self.inner.hooks.handle_uncaught_error.depth)
    }

    /// Whether uncaught errors of both zones end up in the same handler.
    ///
    /// Errors are never delivered across error zones.
    pub fn in_same_error_zone(&self, other: &Zone) -> bool {
        self.error_zone() == other.error_zone()
    }

    /// Looks up a zone value, walking up the parent chain.
    ///
    /// Returns `None` if no zone defines `key`, or if the closest definition
    /// holds a value of another type.
    pub fn get<T: 'static>(&self, key: &str) -> Option<Rc<T>> {
        let mut zone = Some(self);
        while let Some(current) = zone {
            if let Some(value) = current.inner.values.0.get(key) {
                let value: Rc<dyn Any> = value.clone();
                return value.downcast::<T>().ok();
            }
            zone = current.inner.parent.as_ref();
        }
        None
    }

    /// Creates a child zone with the given overrides and values.
    pub fn fork(&self, specification: ZoneSpecification, values: ZoneValues) -> Zone {
        log::trace!("forking zone");
        let (owner, parent, handler) = self.inner.hooks.fork.resolve(self);
        handler(&owner, &parent, self, specification, values)
    }

    /// Runs `f` inside this zone and returns its result.
    ///
    /// # Panics
    ///
    /// Panics if a `run` hook swallows the body instead of invoking it.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut f = Some(f);
        let mut out = None;
        let (owner, parent, handler) = self.inner.hooks.run.resolve(self);
        handler(&owner, &parent, self, &mut || {
            if let Some(f) = f.take() {
                out = Some(f());
            }
        });
        out.unwrap_or_else(|| UsageError::CallbackNotInvoked("run").raise())
    }

    pub fn run_unary<A, R>(&self, f: impl FnOnce(A) -> R, arg: A) -> R {
        let mut call = Some((f, arg));
        let mut out = None;
        let (owner, parent, handler) = self.inner.hooks.run_unary.resolve(self);
        handler(&owner, &parent, self, &mut || {
            if let Some((f, arg)) = call.take() {
                out = Some(f(arg));
            }
        });
        out.unwrap_or_else(|| UsageError::CallbackNotInvoked("run_unary").raise())
    }

    pub fn run_binary<A, B, R>(&self, f: impl FnOnce(A, B) -> R, first: A, second: B) -> R {
        let mut call = Some((f, first, second));
        let mut out = None;
        let (owner, parent, handler) = self.inner.hooks.run_binary.resolve(self);
        handler(&owner, &parent, self, &mut || {
            if let Some((f, first, second)) = call.take() {
                out = Some(f(first, second));
            }
        });
        out.unwrap_or_else(|| UsageError::CallbackNotInvoked("run_binary").raise())
    }

    /// Runs `f` inside this zone; a panic is reported to the zone's uncaught
    /// error handler instead of propagating.
    pub fn run_guarded<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        match catch(|| self.run(f)) {
            Ok(value) => Some(value),
            Err(error) => {
                self.handle_uncaught_error(error);
                None
            }
        }
    }

    pub fn run_unary_guarded<A, R>(&self, f: impl FnOnce(A) -> R, arg: A) -> Option<R> {
        match catch(|| self.run_unary(f, arg)) {
            Ok(value) => Some(value),
            Err(error) => {
                self.handle_uncaught_error(error);
                None
            }
        }
    }

    pub fn run_binary_guarded<A, B, R>(&self, f: impl FnOnce(A, B) -> R, first: A, second: B) -> Option<R> {
        match catch(|| self.run_binary(f, first, second)) {
            Ok(value) => Some(value),
            Err(error) => {
                self.handle_uncaught_error(error);
                None
            }
        }
    }

    pub fn register_callback<F>(&self, f: F) -> Registered<F> {
        let (owner, parent, handler) = self.inner.hooks.register_callback.resolve(self);
        Registered::new(f, handler(&owner, &parent, self, CallbackWrapper::identity()))
    }

    pub fn register_unary_callback<F>(&self, f: F) -> Registered<F> {
        let (owner, parent, handler) = self.inner.hooks.register_unary_callback.resolve(self);
        Registered::new(f, handler(&owner, &parent, self, CallbackWrapper::identity()))
    }

    pub fn register_binary_callback<F>(&self, f: F) -> Registered<F> {
        let (owner, parent, handler) = self.inner.hooks.register_binary_callback.resolve(self);
        Registered::new(f, handler(&owner, &parent, self, CallbackWrapper::identity()))
    }

    /// Registers `f` and returns a callback that runs it inside this zone.
    pub fn bind_callback<R>(&self, f: impl FnOnce() -> R + 'static) -> impl FnOnce() -> R + 'static {
        let registered = self.register_callback(f);
        let zone = self.clone();
        move || zone.run(|| registered.call_once())
    }

    /// Like [`bind_callback`](Self::bind_callback), reporting panics to this
    /// zone's uncaught error handler.
    pub fn bind_callback_guarded(&self, f: impl FnOnce() + 'static) -> impl FnOnce() + 'static {
        let registered = self.register_callback(f);
        let zone = self.clone();
        move || {
            zone.run_guarded(|| registered.call_once());
        }
    }

    pub fn bind_unary_callback<A, R>(&self, f: impl FnMut(A) -> R + 'static) -> impl FnMut(A) -> R + 'static {
        let mut registered = self.register_unary_callback(f);
        let zone = self.clone();
        move |arg| zone.run_unary(|arg| registered.invoke(|f| f(arg)), arg)
    }

    pub fn bind_unary_callback_guarded<A>(&self, f: impl FnMut(A) + 'static) -> impl FnMut(A) + 'static {
        let mut registered = self.register_unary_callback(f);
        let zone = self.clone();
        move |arg| {
            zone.run_unary_guarded(|arg| registered.invoke(|f| f(arg)), arg);
        }
    }

    pub fn bind_binary_callback<A, B, R>(
        &self,
        f: impl FnMut(A, B) -> R + 'static,
    ) -> impl FnMut(A, B) -> R + 'static {
        let mut registered = self.register_binary_callback(f);
        let zone = self.clone();
        move |first, second| zone.run_binary(|a, b| registered.invoke(|f| f(a, b)), first, second)
    }

    pub fn bind_binary_callback_guarded<A, B>(&self, f: impl FnMut(A, B) + 'static) -> impl FnMut(A, B) + 'static {
        let mut registered = self.register_binary_callback(f);
        let zone = self.clone();
        move |first, second| {
            zone.run_binary_guarded(|a, b| registered.invoke(|f| f(a, b)), first, second);
        }
    }

    /// Asks the zone for a replacement before `error` is stored in a future
    /// or stream. `None` keeps the error as is.
    pub fn error_callback(&self, error: &AsyncError) -> Option<AsyncError> {
        let (owner, parent, handler) = self.inner.hooks.error_callback.resolve(self);
        handler(&owner, &parent, self, error)
    }

    /// Applies [`error_callback`](Self::error_callback), keeping the original
    /// error when no replacement is returned.
    pub(crate) fn intercept_error(&self, error: AsyncError) -> AsyncError {
        self.error_callback(&error).unwrap_or(error)
    }

    pub fn schedule_microtask(&self, task: impl FnOnce() + 'static) {
        let (owner, parent, handler) = self.inner.hooks.schedule_microtask.resolve(self);
        handler(&owner, &parent, self, Box::new(task))
    }

    pub fn create_timer(&self, duration: Duration, callback: impl FnOnce() + 'static) -> Timer {
        let (owner, parent, handler) = self.inner.hooks.create_timer.resolve(self);
        handler(&owner, &parent, self, duration, Box::new(callback))
    }

    pub fn create_periodic_timer(&self, period: Duration, callback: impl FnMut(&Timer) + 'static) -> Timer {
        let (owner, parent, handler) = self.inner.hooks.create_periodic_timer.resolve(self);
        handler(&owner, &parent, self, period, Box::new(callback))
    }

    pub fn print(&self, line: &str) {
        let (owner, parent, handler) = self.inner.hooks.print.resolve(self);
        handler(&owner, &parent, self, line)
    }

    /// Hands an error nobody handled to the zone's error handler.
    pub fn handle_uncaught_error(&self, error: AsyncError) {
        let (owner, parent, handler) = self.inner.hooks.handle_uncaught_error.resolve(self);
        handler(&owner, &parent, self, error)
    }
}

impl PartialEq for Zone {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Zone {}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("Zone(root)")
        } else {
            write!(f, "Zone({:p})", Rc::as_ptr(&self.inner))
        }
    }
}
