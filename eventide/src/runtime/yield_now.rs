use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A future that yields execution back to the event loop exactly once.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    /// On the first poll, the task requeues itself behind the microtasks
    /// already pending and returns `Poll::Pending`.
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.0 {
            self.0 = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }

        Poll::Ready(())
    }
}

/// Yields to the event loop, letting pending microtasks run first.
///
/// # Examples
///
/// ```rust,ignore
/// eventide::schedule_microtask(|| println!("runs first"));
/// yield_now().await;
/// ```
pub async fn yield_now() {
    YieldOnce(false).await
}
