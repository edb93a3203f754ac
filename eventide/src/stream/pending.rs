use crate::error::AsyncError;

use std::collections::VecDeque;
use std::fmt;

/// An event waiting to be delivered to a subscription.
pub(crate) enum Event<T> {
    Data(T),
    Error(AsyncError),
    Done,
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Data(_) => f.write_str("Data"),
            Event::Error(error) => write!(f, "Error({error})"),
            Event::Done => f.write_str("Done"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Unscheduled,
    Scheduled,

    /// A microtask is queued but must not deliver anything.
    Canceled,
}

/// Buffered events of one subscription, delivered one per microtask.
///
/// Besides queued events, the buffer may hold a lazily pulled source of data
/// events that is drained after the queue.
pub(crate) struct PendingEvents<T> {
    queue: VecDeque<Event<T>>,
    source: Option<Box<dyn Iterator<Item = T>>>,
    schedule: Schedule,
}

impl<T> PendingEvents<T> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            source: None,
            schedule: Schedule::Unscheduled,
        }
    }

    pub(crate) fn from_source(source: Box<dyn Iterator<Item = T>>) -> Self {
        Self {
            source: Some(source),
            ..Self::new()
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.source.is_none()
    }

    pub(crate) fn push(&mut self, event: Event<T>) {
        self.queue.push_back(event);
    }

    /// Appends every event of `other`, keeping order.
    pub(crate) fn append(&mut self, other: PendingEvents<T>) {
        self.queue.extend(other.queue);
        if other.source.is_some() {
            self.source = other.source;
        }
    }

    /// Marks the buffer scheduled. Returns `true` when the caller must queue
    /// the delivery microtask.
    pub(crate) fn schedule(&mut self) -> bool {
        match self.schedule {
            Schedule::Scheduled => false,
            Schedule::Canceled => {
                self.schedule = Schedule::Scheduled;
                false
            }
            Schedule::Unscheduled => {
                self.schedule = Schedule::Scheduled;
                true
            }
        }
    }

    pub(crate) fn cancel_schedule(&mut self) {
        if self.schedule == Schedule::Scheduled {
            self.schedule = Schedule::Canceled;
        }
    }

    /// Called by the delivery microtask. Returns whether it may deliver.
    pub(crate) fn begin_delivery(&mut self) -> bool {
        let previous = std::mem::replace(&mut self.schedule, Schedule::Unscheduled);
        previous == Schedule::Scheduled
    }

    pub(crate) fn pop_queued(&mut self) -> Option<Event<T>> {
        self.queue.pop_front()
    }

    pub(crate) fn take_source(&mut self) -> Option<Box<dyn Iterator<Item = T>>> {
        self.source.take()
    }

    pub(crate) fn restore_source(&mut self, source: Box<dyn Iterator<Item = T>>) {
        self.source = Some(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_state_machine() {
        let mut pending = PendingEvents::<u8>::new();
        pending.push(Event::Data(1));

        assert!(pending.schedule());
        assert!(!pending.schedule());

        // Pausing cancels the queued delivery; resuming reuses the microtask.
        pending.cancel_schedule();
        assert!(!pending.schedule());
        assert!(pending.begin_delivery());

        pending.cancel_schedule();
        assert!(!pending.begin_delivery());
    }

    #[test]
    fn test_queue_drains_before_source() {
        let mut pending = PendingEvents::from_source(Box::new(vec![2, 3].into_iter()));
        pending.push(Event::Data(1));

        assert!(matches!(pending.pop_queued(), Some(Event::Data(1))));
        assert!(pending.pop_queued().is_none());
        assert!(!pending.is_empty());

        let mut source = pending.take_source().expect("source");
        assert_eq!(source.next(), Some(2));
        pending.restore_source(source);
        assert!(!pending.is_empty());

        assert_eq!(pending.take_source().map(|rest| rest.count()), Some(1));
        assert!(pending.is_empty());
    }
}
