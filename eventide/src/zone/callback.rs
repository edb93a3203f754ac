use crate::error::UsageError;

use std::fmt;
use std::rc::Rc;

type Around = Rc<dyn Fn(&mut dyn FnMut())>;

/// Instrumentation a zone wraps around a registered callback.
///
/// A wrapper receives the callback invocation as a `&mut dyn FnMut()` and must
/// invoke it exactly once; it may run code before and after. The identity
/// wrapper invokes the body directly.
#[derive(Clone, Default)]
pub struct CallbackWrapper(Option<Around>);

impl CallbackWrapper {
    pub fn identity() -> Self {
        Self(None)
    }

    /// A wrapper running `around` at each invocation.
    pub fn new(around: impl Fn(&mut dyn FnMut()) + 'static) -> Self {
        Self(Some(Rc::new(around)))
    }

    /// Returns a wrapper that runs `around` outside of `self`.
    pub fn wrap(self, around: impl Fn(&mut dyn FnMut()) + 'static) -> Self {
        match self.0 {
            None => Self::new(around),
            Some(inner) => Self::new(move |body| around(&mut || inner(body))),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_none()
    }

    /// Invokes `body` through the wrapper chain.
    pub fn invoke(&self, body: &mut dyn FnMut()) {
        match &self.0 {
            None => body(),
            Some(around) => around(body),
        }
    }

    /// Invokes a one-shot computation through the wrapper chain.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::CallbackNotInvoked`] if a wrapper skipped the body.
    pub(crate) fn call<R>(&self, what: &'static str, f: impl FnOnce() -> R) -> R {
        let mut f = Some(f);
        let mut out = None;
        self.invoke(&mut || {
            if let Some(f) = f.take() {
                out = Some(f());
            }
        });
        out.unwrap_or_else(|| UsageError::CallbackNotInvoked(what).raise())
    }
}

impl fmt::Debug for CallbackWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identity() {
            f.write_str("CallbackWrapper(identity)")
        } else {
            f.write_str("CallbackWrapper(..)")
        }
    }
}

/// A callback registered with a zone, carrying the zone's instrumentation.
pub struct Registered<F> {
    f: F,
    wrapper: CallbackWrapper,
}

impl<F> Registered<F> {
    pub(crate) fn new(f: F, wrapper: CallbackWrapper) -> Self {
        Self { f, wrapper }
    }

    /// Invokes the callback through the zone's wrapper.
    pub fn invoke<R>(&mut self, call: impl FnOnce(&mut F) -> R) -> R {
        let f = &mut self.f;
        self.wrapper.call("registered callback", || call(f))
    }

    /// Consumes the callback, invoking it once through the zone's wrapper.
    pub fn consume<R>(self, call: impl FnOnce(F) -> R) -> R {
        let f = self.f;
        self.wrapper.call("registered callback", move || call(f))
    }

    pub fn wrapper(&self) -> &CallbackWrapper {
        &self.wrapper
    }
}

impl<R, F: FnOnce() -> R> Registered<F> {
    /// Invokes a one-shot callback through the zone's wrapper.
    pub fn call_once(self) -> R {
        self.consume(|f| f())
    }
}

impl<F> fmt::Debug for Registered<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registered")
            .field("wrapper", &self.wrapper)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_wrappers_nest_outside_in() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2) = (log.clone(), log.clone());

        let wrapper = CallbackWrapper::identity()
            .wrap(move |body| {
                l1.borrow_mut().push("inner");
                body();
            })
            .wrap(move |body| {
                l2.borrow_mut().push("outer");
                body();
            });

        let l3 = log.clone();
        let out = wrapper.call("test", move || {
            l3.borrow_mut().push("body");
            5
        });

        assert_eq!(out, 5);
        assert_eq!(*log.borrow(), vec!["outer", "inner", "body"]);
    }

    #[test]
    #[should_panic(expected = "did not invoke its callback")]
    fn test_skipping_the_body_is_fatal() {
        let wrapper = CallbackWrapper::new(|_body| {});
        wrapper.call("test", || 1);
    }

    #[test]
    fn test_registered_fn_mut_keeps_state() {
        let mut counter = 0;
        let mut registered = Registered::new(
            move |step: i32| {
                counter += step;
                counter
            },
            CallbackWrapper::identity(),
        );

        assert_eq!(registered.invoke(|f| f(2)), 2);
        assert_eq!(registered.invoke(|f| f(3)), 5);
    }
}
