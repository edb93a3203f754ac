use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

/// Identifier of a timer armed on the event loop.
pub(crate) type TimerId = u64;

/// An entry in the timer heap.
///
/// Entries are ordered by deadline, ties broken by arming order, so that
/// timers with equal deadlines fire in the order they were created.
#[derive(Debug)]
pub(crate) struct TimerEntry {
    /// Loop time at which the timer should fire.
    pub(crate) deadline: Duration,

    /// Identifier of the timer slot (also the arming sequence number).
    pub(crate) id: TimerId,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by deadline, then id.
    ///
    /// Note that the comparison is **reversed** so that a
    /// `BinaryHeap<TimerEntry>` behaves as a min-heap,
    /// where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Callback stored in a timer slot.
pub(crate) enum TimerCallback {
    Once(Box<dyn FnOnce()>),
    Periodic(Box<dyn FnMut()>),
}

struct TimerSlot {
    /// `None` while the callback is running.
    callback: Option<TimerCallback>,
    period: Option<Duration>,
    deadline: Duration,
}

/// A fired timer, handed back to the loop for execution.
pub(crate) struct Expired {
    pub(crate) id: TimerId,
    pub(crate) callback: TimerCallback,
}

/// Deadline-ordered set of armed timers.
///
/// Cancelling removes the slot; the stale heap entry is skipped when popped.
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    slots: HashMap<TimerId, TimerSlot>,
    next_id: TimerId,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            slots: HashMap::new(),
            next_id: 0,
        }
    }

    /// Arms a one-shot timer.
    pub(crate) fn insert_once(&mut self, deadline: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        self.insert(deadline, None, TimerCallback::Once(callback))
    }

    /// Arms a periodic timer whose first tick is at `deadline`.
    pub(crate) fn insert_periodic(
        &mut self,
        deadline: Duration,
        period: Duration,
        callback: Box<dyn FnMut()>,
    ) -> TimerId {
        self.insert(deadline, Some(period), TimerCallback::Periodic(callback))
    }

    fn insert(&mut self, deadline: Duration, period: Option<Duration>, callback: TimerCallback) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;

        self.slots.insert(
            id,
            TimerSlot {
                callback: Some(callback),
                period,
                deadline,
            },
        );
        self.heap.push(TimerEntry { deadline, id });

        id
    }

    /// Disarms a timer. Returns whether it was still armed.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.slots.remove(&id).is_some()
    }

    pub(crate) fn is_armed(&self, id: TimerId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Deadline of the earliest live timer.
    pub(crate) fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_stale();
        self.heap.peek().map(|entry| entry.deadline)
    }

    pub(crate) fn is_empty(&mut self) -> bool {
        self.next_deadline().is_none()
    }

    /// Pops the earliest timer if its deadline is at or before `now`.
    ///
    /// One-shot slots are removed. Periodic slots stay armed with their callback
    /// taken out; the loop hands it back through [`TimerQueue::rearm`].
    pub(crate) fn pop_expired(&mut self, now: Duration) -> Option<Expired> {
        self.discard_stale();

        let entry = self.heap.peek()?;
        if entry.deadline > now {
            return None;
        }

        let entry = self.heap.pop()?;
        let slot = self.slots.get_mut(&entry.id)?;

        if slot.period.is_some() {
            let callback = slot.callback.take()?;
            Some(Expired {
                id: entry.id,
                callback,
            })
        } else {
            let slot = self.slots.remove(&entry.id)?;
            Some(Expired {
                id: entry.id,
                callback: slot.callback?,
            })
        }
    }

    /// Returns a periodic callback after it ran, scheduling its next tick.
    ///
    /// Does nothing if the timer was cancelled while its callback was running.
    pub(crate) fn rearm(&mut self, id: TimerId, callback: TimerCallback, now: Duration) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        let Some(period) = slot.period else {
            return;
        };

        let mut deadline = slot.deadline.saturating_add(period);
        if deadline < now && !period.is_zero() {
            // Skip ticks that were missed while the loop was busy.
            deadline = next_tick_after(deadline, period, now);
        } else if period.is_zero() {
            deadline = now;
        }

        slot.deadline = deadline;
        slot.callback = Some(callback);
        self.heap.push(TimerEntry { deadline, id });
    }

    fn discard_stale(&mut self) {
        while let Some(entry) = self.heap.peek() {
            match self.slots.get(&entry.id) {
                Some(slot) if slot.deadline == entry.deadline && slot.callback.is_some() => break,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}

/// First tick of `period` past `deadline` that lands after `now`.
fn next_tick_after(deadline: Duration, period: Duration, now: Duration) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;

    let period = period.as_nanos();
    let behind = (now - deadline).as_nanos() / period;
    let next = deadline.as_nanos() + period * (behind + 1);
    match u64::try_from(next / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (next % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}
