//! Ordered subscriber lists with snapshot dispatch.

use std::cell::RefCell;
use std::rc::Rc;

/// Token returned by [`Event::subscribe`], used to remove the handler later.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Subscription(u64);

struct EventInner<A> {
    next_id: u64,
    handlers: Vec<(u64, Rc<RefCell<dyn FnMut(&A)>>)>,
}

/// An ordered list of handlers invoked with a shared argument.
///
/// `Event` handles are cheap clones of the same underlying list, so a
/// component can keep one copy internally and hand others out through an
/// accessor. [`emit`](Event::emit) iterates a snapshot of the list taken
/// before the first handler runs; handlers are therefore free to subscribe or
/// unsubscribe (including themselves) during dispatch, and the change takes
/// effect from the next emission.
pub struct Event<A> {
    inner: Rc<RefCell<EventInner<A>>>,
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: 'static> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> Event<A> {
    /// Creates an event with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(EventInner {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Appends `handler` to the list and returns its removal token.
    pub fn subscribe(&self, handler: impl FnMut(&A) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.push((id, Rc::new(RefCell::new(handler))));
        Subscription(id)
    }

    /// Removes the handler registered under `subscription`, if still present.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner
            .borrow_mut()
            .handlers
            .retain(|(id, _)| *id != subscription.0);
    }

    /// Invokes every handler, in subscription order, with `args`.
    pub fn emit(&self, args: &A) {
        let snapshot: Vec<Rc<RefCell<dyn FnMut(&A)>>> = self
            .inner
            .borrow()
            .handlers
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();

        for handler in snapshot {
            (handler.borrow_mut())(args);
        }
    }

    /// Whether any handlers are subscribed.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_run_in_subscription_order() {
        let event: Event<u32> = Event::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let first = Rc::clone(&seen);
        event.subscribe(move |n| first.borrow_mut().push(("first", *n)));
        let second = Rc::clone(&seen);
        event.subscribe(move |n| second.borrow_mut().push(("second", *n)));

        event.emit(&7);
        assert_eq!(*seen.borrow(), [("first", 7), ("second", 7)]);
    }

    #[test]
    fn unsubscribed_handlers_stop_firing() {
        let event: Event<()> = Event::new();
        let count = Rc::new(RefCell::new(0));

        let counter = Rc::clone(&count);
        let sub = event.subscribe(move |_| *counter.borrow_mut() += 1);

        event.emit(&());
        event.unsubscribe(sub);
        event.emit(&());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let event: Event<()> = Event::new();
        let count = Rc::new(RefCell::new(0));

        let own = event.clone();
        let counter = Rc::clone(&count);
        let sub = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&sub);
        let token = event.subscribe(move |_| {
            *counter.borrow_mut() += 1;
            if let Some(token) = slot.borrow_mut().take() {
                own.unsubscribe(token);
            }
        });
        *sub.borrow_mut() = Some(token);

        event.emit(&());
        event.emit(&());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn clones_share_the_subscriber_list() {
        let event: Event<()> = Event::new();
        let alias = event.clone();
        let count = Rc::new(RefCell::new(0));

        let counter = Rc::clone(&count);
        alias.subscribe(move |_| *counter.borrow_mut() += 1);

        event.emit(&());
        assert_eq!(*count.borrow(), 1);
    }
}
