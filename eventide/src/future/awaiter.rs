use super::Future;
use super::core::Listener;
use crate::error::AsyncError;
use crate::zone::Zone;

use std::cell::RefCell;
use std::future::{Future as StdFuture, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Slot<T> {
    result: Option<Result<T, AsyncError>>,
    waker: Option<Waker>,
}

/// Awaits a [`Future`] from `async` code.
///
/// The first poll registers a listener in the current zone; the result is
/// delivered like any other listener callback, so it is never observed
/// synchronously.
pub struct FutureAwait<T> {
    future: Future<T>,
    slot: Option<Rc<RefCell<Slot<T>>>>,
}

impl<T: Clone + 'static> StdFuture for FutureAwait<T> {
    type Output = Result<T, AsyncError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(slot) = &this.slot {
            let mut slot = slot.borrow_mut();
            if let Some(result) = slot.result.take() {
                return Poll::Ready(result);
            }
            slot.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let slot = Rc::new(RefCell::new(Slot {
            result: None,
            waker: Some(cx.waker().clone()),
        }));
        let target = slot.clone();

        this.future.add_listener(Listener::new(Zone::current(), move |result, _| {
            let waker = {
                let mut slot = target.borrow_mut();
                slot.result = Some(result);
                slot.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }));
        this.slot = Some(slot);

        Poll::Pending
    }
}

impl<T: Clone + 'static> IntoFuture for Future<T> {
    type Output = Result<T, AsyncError>;
    type IntoFuture = FutureAwait<T>;

    fn into_future(self) -> Self::IntoFuture {
        FutureAwait {
            future: self,
            slot: None,
        }
    }
}
