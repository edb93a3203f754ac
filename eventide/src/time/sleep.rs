use super::Timer;
use crate::zone::Zone;

use std::cell::RefCell;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Creates a future that completes after the given duration.
///
/// The timer is created through the zone the sleep is first polled in.
///
/// # Panics
///
/// Panics if polled outside of a running runtime.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// sleep(Duration::from_millis(10)).await;
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        duration,
        timer: None,
        shared: Rc::new(RefCell::new(Shared::default())),
    }
}

#[derive(Default)]
struct Shared {
    fired: bool,
    waker: Option<Waker>,
}

/// A future that completes once its timer fires.
///
/// This future is **cancel-safe**: dropping it cancels the timer.
pub struct Sleep {
    duration: Duration,

    /// Armed on first poll.
    timer: Option<Timer>,

    shared: Rc<RefCell<Shared>>,
}

impl StdFuture for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        {
            let mut shared = this.shared.borrow_mut();
            if shared.fired {
                return Poll::Ready(());
            }
            shared.waker = Some(cx.waker().clone());
        }

        if this.timer.is_none() {
            let shared = this.shared.clone();
            this.timer = Some(Zone::current().create_timer(this.duration, move || {
                let waker = {
                    let mut shared = shared.borrow_mut();
                    shared.fired = true;
                    shared.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            }));
        }

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }
}
