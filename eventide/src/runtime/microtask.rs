use std::collections::VecDeque;

/// A callback scheduled to run before the loop yields to timers.
pub(crate) type Microtask = Box<dyn FnOnce()>;

/// FIFO microtask queue with a priority lane.
///
/// Priority microtasks (used for reporting uncaught errors) run before any
/// normal microtask pending at the time, but keep FIFO order among themselves.
pub(crate) struct MicrotaskQueue {
    priority: VecDeque<Microtask>,
    normal: VecDeque<Microtask>,
}

impl MicrotaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            priority: VecDeque::new(),
            normal: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, task: Microtask) {
        self.normal.push_back(task);
    }

    pub(crate) fn push_priority(&mut self, task: Microtask) {
        self.priority.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<Microtask> {
        self.priority
            .pop_front()
            .or_else(|| self.normal.pop_front())
    }

    pub(crate) fn len(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Microtask {
        let log = log.clone();
        Box::new(move || log.borrow_mut().push(name))
    }

    #[test]
    fn test_priority_lane_runs_first_in_fifo_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = MicrotaskQueue::new();

        queue.push(record(&log, "a"));
        queue.push_priority(record(&log, "p1"));
        queue.push(record(&log, "b"));
        queue.push_priority(record(&log, "p2"));
        assert_eq!(queue.len(), 4);

        while let Some(task) = queue.pop() {
            task();
        }

        assert_eq!(*log.borrow(), vec!["p1", "p2", "a", "b"]);
        assert!(queue.is_empty());
    }
}
