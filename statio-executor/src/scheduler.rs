//! The timed-callback queue shared by the event loop and every component.

use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

use crate::time::{TimeSpan, Timestamp};

/// Token identifying a scheduled callback, for [`Scheduler::cancel`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimerToken(u64);

pub(crate) struct TimedEvent {
    pub(crate) due: Timestamp,
    seq: u64,
    pub(crate) action: Box<dyn FnOnce()>,
}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimedEvent {}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Sequence breaks due-time ties so equal-time callbacks run in
        // scheduling order.
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct SchedulerInner {
    queue: BinaryHeap<Reverse<TimedEvent>>,
    cancelled: HashSet<u64>,
    next_seq: u64,
    stopped: bool,
}

/// Cloneable handle to the event loop's timed-callback queue.
///
/// All methods take `&self`; handles are cheap clones sharing one queue, which
/// is only ever touched from the loop's own thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                queue: BinaryHeap::new(),
                cancelled: HashSet::new(),
                next_seq: 0,
                stopped: false,
            })),
        }
    }

    /// Schedules `action` to run once `delay` has elapsed.
    pub fn schedule(&self, delay: TimeSpan, action: impl FnOnce() + 'static) -> TimerToken {
        self.schedule_at(Timestamp::now_utc() + delay, action)
    }

    /// Schedules `action` to run at `due`. Since the loop blocks while a
    /// callback runs, the action may be invoked later than `due`, never
    /// earlier.
    pub fn schedule_at(&self, due: Timestamp, action: impl FnOnce() + 'static) -> TimerToken {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(Reverse(TimedEvent {
            due,
            seq,
            action: Box::new(action),
        }));
        TimerToken(seq)
    }

    /// Schedules `action` to run as soon as the loop gets to it.
    pub fn invoke(&self, action: impl FnOnce() + 'static) -> TimerToken {
        self.schedule(TimeSpan::ZERO, action)
    }

    /// Suppresses the callback registered under `token`, if it has not run
    /// yet.
    pub fn cancel(&self, token: TimerToken) {
        self.inner.borrow_mut().cancelled.insert(token.0);
    }

    /// Asks the owning [`EventLoop`](crate::EventLoop) to return from `run`
    /// even while callbacks remain queued. Needed to shut down servers, whose
    /// poll loops otherwise reschedule forever.
    pub fn stop(&self) {
        self.inner.borrow_mut().stopped = true;
    }

    pub(crate) fn stopped(&self) -> bool {
        self.inner.borrow().stopped
    }

    /// Pops the earliest pending callback, discarding cancelled entries.
    pub(crate) fn take_next(&self) -> Option<TimedEvent> {
        let mut inner = self.inner.borrow_mut();
        while let Some(Reverse(event)) = inner.queue.pop() {
            if inner.cancelled.remove(&event.seq) {
                continue;
            }
            return Some(event);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_due_callback_pops_first() {
        let scheduler = Scheduler::new();
        let base = Timestamp::now_utc();
        scheduler.schedule_at(base + TimeSpan::from_milliseconds(10.0), || {});
        scheduler.schedule_at(base + TimeSpan::from_milliseconds(5.0), || {});

        let first = scheduler.take_next().expect("two callbacks queued");
        assert_eq!(first.due, base + TimeSpan::from_milliseconds(5.0));
    }

    #[test]
    fn equal_due_times_pop_in_scheduling_order() {
        let scheduler = Scheduler::new();
        let due = Timestamp::now_utc();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let seen = Rc::clone(&seen);
            scheduler.schedule_at(due, move || seen.borrow_mut().push(label));
        }

        while let Some(event) = scheduler.take_next() {
            (event.action)();
        }
        assert_eq!(*seen.borrow(), ["a", "b", "c"]);
    }

    #[test]
    fn cancelled_callbacks_never_pop() {
        let scheduler = Scheduler::new();
        let token = scheduler.invoke(|| panic!("cancelled callback ran"));
        scheduler.cancel(token);
        assert!(scheduler.take_next().is_none());
    }
}
