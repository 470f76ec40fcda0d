//! The loop that drains the scheduler, sleeping while nothing is due.

use log::{debug, trace};

use crate::scheduler::Scheduler;
use crate::time::{TimeSpan, Timestamp};

/// Runs scheduled callbacks until none remain.
///
/// The loop is strictly cooperative: each callback runs to completion before
/// the next is dequeued, and the thread sleeps whenever the earliest callback
/// lies in the future. Time spent asleep is accounted as idle, which is what
/// [`utilization`](EventLoop::utilization) reports against wall time.
pub struct EventLoop {
    scheduler: Scheduler,
    started: Timestamp,
    idle: TimeSpan,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Creates a loop with an empty queue.
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            started: Timestamp::now_utc(),
            idle: TimeSpan::ZERO,
        }
    }

    /// A handle for scheduling callbacks onto this loop.
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Drains the queue. Returns when no callbacks remain, or as soon as
    /// [`Scheduler::stop`] has been called.
    pub fn run(&mut self) {
        loop {
            if self.scheduler.stopped() {
                debug!("event loop stopped with callbacks still queued");
                break;
            }

            let Some(event) = self.scheduler.take_next() else {
                trace!("event loop drained");
                break;
            };

            let now = Timestamp::now_utc();
            if event.due > now {
                let wait = event.due - now;
                std::thread::sleep(wait.as_std());
                self.idle += wait;
            }

            (event.action)();
        }
    }

    /// The busy fraction of wall time since the loop was created: 0.0 means
    /// fully idle, 1.0 means the loop never slept.
    pub fn utilization(&self) -> f64 {
        let elapsed = Timestamp::now_utc() - self.started;
        if !elapsed.is_positive() {
            return 0.0;
        }
        (elapsed - self.idle).total_milliseconds() / elapsed.total_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn callbacks_run_in_due_order_and_loop_returns_when_empty() {
        let mut event_loop = EventLoop::new();
        let scheduler = event_loop.scheduler();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let a = Rc::clone(&seen);
        scheduler.schedule(TimeSpan::from_milliseconds(10.0), move || {
            a.borrow_mut().push("a")
        });
        let b = Rc::clone(&seen);
        scheduler.schedule(TimeSpan::from_milliseconds(5.0), move || {
            b.borrow_mut().push("b")
        });

        event_loop.run();
        assert_eq!(*seen.borrow(), ["b", "a"]);
    }

    #[test]
    fn callbacks_may_schedule_more_callbacks() {
        let mut event_loop = EventLoop::new();
        let scheduler = event_loop.scheduler();
        let count = Rc::new(RefCell::new(0));

        fn tick(scheduler: Scheduler, count: Rc<RefCell<u32>>) {
            *count.borrow_mut() += 1;
            if *count.borrow() < 3 {
                let inner = scheduler.clone();
                scheduler.invoke(move || tick(inner.clone(), count));
            }
        }

        let inner = scheduler.clone();
        let counted = Rc::clone(&count);
        scheduler.invoke(move || tick(inner.clone(), counted));

        event_loop.run();
        assert_eq!(*count.borrow(), 3);
    }

    #[test]
    fn stop_interrupts_a_busy_queue() {
        let mut event_loop = EventLoop::new();
        let scheduler = event_loop.scheduler();
        let count = Rc::new(RefCell::new(0));

        fn forever(scheduler: Scheduler, count: Rc<RefCell<u32>>) {
            *count.borrow_mut() += 1;
            if *count.borrow() == 5 {
                scheduler.stop();
            }
            let inner = scheduler.clone();
            scheduler.invoke(move || forever(inner.clone(), count));
        }

        let inner = scheduler.clone();
        let counted = Rc::clone(&count);
        scheduler.invoke(move || forever(inner.clone(), counted));

        event_loop.run();
        assert_eq!(*count.borrow(), 5);
    }
}
