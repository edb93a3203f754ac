use super::forwarding::{
    Distinct, Expand, Filter, Forward, ForwardingStream, HandleError, Map, Skip, SkipWhile, Take, TakeWhile, TryMap,
};
use super::subscription::{StreamHandlers, StreamSubscription};
use crate::error::AsyncError;

use std::fmt;
use std::rc::Rc;

/// Where a stream's events come from.
pub(crate) trait StreamSource<T> {
    fn listen(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T>;

    fn is_broadcast(&self) -> bool {
        false
    }
}

/// An asynchronous sequence of data and error events, ended by a done event.
///
/// A single-subscription stream may be listened to once; a broadcast stream
/// any number of times. Listening returns a [`StreamSubscription`] through
/// which the listener pauses, resumes or cancels delivery.
///
/// `Stream` is a cheap handle: clones refer to the same source.
///
/// # Examples
///
/// ```rust,ignore
/// let doubled = Stream::from_iter([1, 2, 3])
///     .map(|x| x * 2)
///     .to_list()
///     .await
///     .unwrap();
///
/// assert_eq!(doubled, vec![2, 4, 6]);
/// ```
pub struct Stream<T>(Rc<dyn StreamSource<T>>);

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> Stream<T> {
    pub(crate) fn from_source(source: impl StreamSource<T> + 'static) -> Self {
        Self(Rc::new(source))
    }

    /// Listens with only a data handler. Errors go to the zone's uncaught
    /// error handler.
    pub fn listen(&self, on_data: impl FnMut(T) + 'static) -> StreamSubscription<T> {
        self.listen_with(StreamHandlers::new().on_data(on_data))
    }

    /// Listens with a full set of handlers.
    ///
    /// # Panics
    ///
    /// Panics with [`UsageError::AlreadyListened`](crate::error::UsageError::AlreadyListened)
    /// when a single-subscription stream is listened to a second time.
    pub fn listen_with(&self, handlers: StreamHandlers<T>) -> StreamSubscription<T> {
        self.0.listen(handlers)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.is_broadcast()
    }

    fn forward<U: 'static>(&self, factory: impl Fn() -> Box<dyn Forward<T, U>> + 'static) -> Stream<U> {
        Stream::from_source(ForwardingStream::new(self.clone(), factory))
    }

    /// Transforms every data event. A panic in `transform` becomes an error
    /// event.
    pub fn map<U: 'static>(&self, transform: impl Fn(T) -> U + 'static) -> Stream<U> {
        let transform: Rc<dyn Fn(T) -> U> = Rc::new(transform);
        self.forward(move || {
            Box::new(Map {
                transform: transform.clone(),
            })
        })
    }

    /// Like [`map`](Self::map); an `Err` becomes an error event.
    pub fn try_map<U: 'static>(&self, transform: impl Fn(T) -> Result<U, AsyncError> + 'static) -> Stream<U> {
        let transform: Rc<dyn Fn(T) -> Result<U, AsyncError>> = Rc::new(transform);
        self.forward(move || {
            Box::new(TryMap {
                transform: transform.clone(),
            })
        })
    }

    /// Keeps the data events accepted by `test`.
    pub fn filter(&self, test: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let test: Rc<dyn Fn(&T) -> bool> = Rc::new(test);
        self.forward(move || Box::new(Filter { test: test.clone() }))
    }

    /// Replaces every data event by the values `expand` yields for it.
    pub fn expand<U: 'static, I>(&self, expand: impl Fn(T) -> I + 'static) -> Stream<U>
    where
        I: IntoIterator<Item = U>,
        I::IntoIter: 'static,
    {
        let expand: Rc<dyn Fn(T) -> Box<dyn Iterator<Item = U>>> =
            Rc::new(move |data| Box::new(expand(data).into_iter()));
        self.forward(move || {
            Box::new(Expand {
                expand: expand.clone(),
            })
        })
    }

    /// Intercepts every error event. Data passes through.
    ///
    /// A panic in `on_error` becomes an error event.
    pub fn handle_error(&self, on_error: impl Fn(AsyncError) + 'static) -> Stream<T> {
        let on_error: Rc<dyn Fn(AsyncError)> = Rc::new(on_error);
        self.forward(move || {
            Box::new(HandleError {
                on_error: on_error.clone(),
                test: None,
            })
        })
    }

    /// Intercepts the error events accepted by `test`; others pass through.
    pub fn handle_error_where(
        &self,
        on_error: impl Fn(AsyncError) + 'static,
        test: impl Fn(&AsyncError) -> bool + 'static,
    ) -> Stream<T> {
        let on_error: Rc<dyn Fn(AsyncError)> = Rc::new(on_error);
        let test: Rc<dyn Fn(&AsyncError) -> bool> = Rc::new(test);
        self.forward(move || {
            Box::new(HandleError {
                on_error: on_error.clone(),
                test: Some(test.clone()),
            })
        })
    }

    /// The first `count` data events, then done.
    ///
    /// The source subscription is canceled as soon as the last one arrives.
    /// With `count == 0` the source is listened to and canceled at once.
    pub fn take(&self, count: usize) -> Stream<T> {
        self.forward(move || Box::new(Take { remaining: count }))
    }

    pub fn skip(&self, count: usize) -> Stream<T> {
        self.forward(move || Box::new(Skip { remaining: count }))
    }

    /// Data events up to the first one rejected by `test`.
    pub fn take_while(&self, test: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let test: Rc<dyn Fn(&T) -> bool> = Rc::new(test);
        self.forward(move || Box::new(TakeWhile { test: test.clone() }))
    }

    /// Data events from the first one rejected by `test` on.
    pub fn skip_while(&self, test: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let test: Rc<dyn Fn(&T) -> bool> = Rc::new(test);
        self.forward(move || {
            Box::new(SkipWhile {
                test: test.clone(),
                has_failed: false,
            })
        })
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Drops data events equal to the previous one.
    pub fn distinct(&self) -> Stream<T>
    where
        T: PartialEq,
    {
        self.distinct_by(|previous, next| previous == next)
    }

    /// Drops data events that `equals` considers equal to the previous one.
    pub fn distinct_by(&self, equals: impl Fn(&T, &T) -> bool + 'static) -> Stream<T> {
        let equals: Rc<dyn Fn(&T, &T) -> bool> = Rc::new(equals);
        self.forward(move || {
            Box::new(Distinct {
                equals: equals.clone(),
                previous: None,
            })
        })
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("broadcast", &self.0.is_broadcast())
            .finish()
    }
}
