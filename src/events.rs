//! Event channels with an explicit subscription lifecycle.
//!
//! The reconcilers express their anti-echo discipline as subscribe and
//! unsubscribe ordering around programmatic writes, so the primitive here is
//! deliberately small: a channel dispatches synchronously on the UI thread,
//! and a [`Subscription`] detaches its handler when dropped. Handlers may
//! subscribe and unsubscribe (including themselves) while a dispatch is in
//! flight: handlers added during a dispatch are not invoked by it, handlers
//! removed during a dispatch are not invoked after their removal.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

type Handler<T> = Box<dyn FnMut(&T)>;

struct Registry<T> {
    next_id: u64,
    // A handler slot is `None` while that handler is being invoked; a
    // re-entrant emit skips it instead of re-entering it.
    handlers: BTreeMap<u64, Option<Handler<T>>>,
}

/// A single-threaded broadcast channel.
///
/// Cloning the channel clones the handle, not the subscriber list: every
/// clone emits to and subscribes on the same registry.
pub struct EventChannel<T> {
    registry: Rc<RefCell<Registry<T>>>,
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Rc::clone(&self.registry),
        }
    }
}

impl<T: 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> EventChannel<T> {
    /// Creates a channel with no subscribers.
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                handlers: BTreeMap::new(),
            })),
        }
    }

    /// Attaches `handler` to the channel. The handler runs on every [`emit`]
    /// until the returned [`Subscription`] is dropped.
    ///
    /// [`emit`]: EventChannel::emit
    pub fn subscribe(&self, handler: impl FnMut(&T) + 'static) -> Subscription {
        let id = {
            let mut registry = self.registry.borrow_mut();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.handlers.insert(id, Some(Box::new(handler)));
            id
        };

        let registry = Rc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.borrow_mut().handlers.remove(&id);
                }
            })),
        }
    }

    /// Dispatches `event` to every live subscriber, in subscription order.
    pub fn emit(&self, event: &T) {
        let ids: Vec<u64> = self.registry.borrow().handlers.keys().copied().collect();
        for id in ids {
            let taken = self
                .registry
                .borrow_mut()
                .handlers
                .get_mut(&id)
                .and_then(|slot| slot.take());
            let Some(mut handler) = taken else {
                // Unsubscribed by an earlier handler, or already running.
                continue;
            };
            handler(event);
            let mut registry = self.registry.borrow_mut();
            if let Some(slot) = registry.handlers.get_mut(&id) {
                *slot = Some(handler);
            }
        }
    }

    /// The number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry.borrow().handlers.len()
    }
}

/// A handle to an attached handler. Dropping it detaches the handler.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Detaches the handler now. Equivalent to dropping the subscription.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn emits_to_subscribers_in_order() {
        let channel = EventChannel::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let first = {
            let seen = Rc::clone(&seen);
            channel.subscribe(move |value: &i32| seen.borrow_mut().push(("first", *value)))
        };
        let second = {
            let seen = Rc::clone(&seen);
            channel.subscribe(move |value: &i32| seen.borrow_mut().push(("second", *value)))
        };

        channel.emit(&7);
        assert_eq!(*seen.borrow(), vec![("first", 7), ("second", 7)]);

        drop(first);
        drop(second);
        channel.emit(&8);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn dropping_subscription_detaches() {
        let channel = EventChannel::new();
        let count = Rc::new(Cell::new(0));

        let sub = {
            let count = Rc::clone(&count);
            channel.subscribe(move |_: &()| count.set(count.get() + 1))
        };
        channel.emit(&());
        sub.unsubscribe();
        channel.emit(&());

        assert_eq!(count.get(), 1);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn handler_can_unsubscribe_itself_during_dispatch() {
        // One-shot handler, the shape the reconcilers use for move-end.
        let channel: EventChannel<()> = EventChannel::new();
        let count = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let sub = {
            let count = Rc::clone(&count);
            let slot = Rc::clone(&slot);
            channel.subscribe(move |_| {
                count.set(count.get() + 1);
                *slot.borrow_mut() = None;
            })
        };
        *slot.borrow_mut() = Some(sub);

        channel.emit(&());
        channel.emit(&());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn handler_added_during_dispatch_waits_for_the_next_emit() {
        let channel: EventChannel<()> = EventChannel::new();
        let late_count = Rc::new(Cell::new(0));
        let late_subs: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let _sub = {
            let channel = channel.clone();
            let late_count = Rc::clone(&late_count);
            let late_subs = Rc::clone(&late_subs);
            channel.clone().subscribe(move |_| {
                let late_count = Rc::clone(&late_count);
                let sub = channel.subscribe(move |_| late_count.set(late_count.get() + 1));
                late_subs.borrow_mut().push(sub);
            })
        };

        channel.emit(&());
        assert_eq!(late_count.get(), 0);
        channel.emit(&());
        assert_eq!(late_count.get(), 1);
    }

    #[test]
    fn unsubscribe_outlives_channel() {
        let channel: EventChannel<()> = EventChannel::new();
        let sub = channel.subscribe(|_| {});
        drop(channel);
        // Must not panic: the registry is gone, the cancel is a no-op.
        sub.unsubscribe();
    }
}
