use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use dashmap::DashMap;
use parking_lot::Mutex;
use crate::core::error::Result;

type Target = dyn Any + Send + Sync;
type Invoke<A> = Arc<dyn Fn(Option<&Target>, &dyn Any, &A) -> Result<()> + Send + Sync>;

struct Subscription<A> {
    /// `None` for static handlers
    target: Option<Weak<Target>>,
    target_id: usize,
    handler_id: usize,
    invoke: Invoke<A>,
}

impl<A> Subscription<A> {
    fn is_alive(&self) -> bool {
        match &self.target {
            Some(weak) => weak.strong_count() > 0,
            None => true,
        }
    }

    fn matches(&self, target_id: usize, handler_id: usize) -> bool {
        self.target_id == target_id && self.handler_id == handler_id
    }
}

/// Event registry that never keeps a subscriber alive.
///
/// Subscribers are held through `Weak` and identified by allocation address
/// plus handler function pointer, so subscribing the same pair twice is a
/// no-op. Dead entries are pruned on the next dispatch or subscribe of their
/// event. Handler errors and panics are logged and never reach the caller.
pub struct WeakEventManager<A: 'static> {
    events: DashMap<String, Arc<Mutex<Vec<Subscription<A>>>>>,
}

impl<A: 'static> Default for WeakEventManager<A> {
    fn default() -> Self {
        WeakEventManager { events: DashMap::new() }
    }
}

impl<A: 'static> WeakEventManager<A> {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, event: &str) -> Arc<Mutex<Vec<Subscription<A>>>> {
        if let Some(list) = self.events.get(event) {
            return list.value().clone();
        }
        self.events.entry(event.to_string()).or_default().value().clone()
    }

    fn add(&self, event: &str, subscription: Subscription<A>) -> bool {
        let list = self.list(event);
        let mut subs = list.lock();
        subs.retain(Subscription::is_alive);
        if subs.iter().any(|s| s.matches(subscription.target_id, subscription.handler_id)) {
            return false;
        }
        subs.push(subscription);
        true
    }

    fn remove(&self, event: &str, target_id: usize, handler_id: usize) -> bool {
        let Some(list) = self.events.get(event).map(|l| l.value().clone()) else {
            return false;
        };
        let mut subs = list.lock();
        let before = subs.len();
        subs.retain(|s| s.is_alive() && !s.matches(target_id, handler_id));
        subs.len() < before
    }

    /// Register `handler` to run with `subscriber` on `event`. Returns false if already registered.
    pub fn subscribe<T>(&self, event: &str, subscriber: &Arc<T>, handler: fn(&T, &dyn Any, &A) -> Result<()>) -> bool
    where
        T: Any + Send + Sync,
    {
        let strong: Arc<Target> = subscriber.clone();
        let invoke: Invoke<A> = Arc::new(move |target: Option<&Target>, sender: &dyn Any, args: &A| {
            match target.and_then(|t| t.downcast_ref::<T>()) {
                Some(t) => handler(t, sender, args),
                None => Ok(()),
            }
        });
        self.add(
            event,
            Subscription {
                target: Some(Arc::downgrade(&strong)),
                target_id: address(subscriber),
                handler_id: handler as usize,
                invoke,
            },
        )
    }

    /// Register a handler with no subscriber object
    pub fn subscribe_static(&self, event: &str, handler: fn(&dyn Any, &A) -> Result<()>) -> bool {
        let invoke: Invoke<A> = Arc::new(move |_: Option<&Target>, sender: &dyn Any, args: &A| handler(sender, args));
        self.add(
            event,
            Subscription {
                target: None,
                target_id: 0,
                handler_id: handler as usize,
                invoke,
            },
        )
    }

    pub fn unsubscribe<T>(&self, event: &str, subscriber: &Arc<T>, handler: fn(&T, &dyn Any, &A) -> Result<()>) -> bool
    where
        T: Any + Send + Sync,
    {
        self.remove(event, address(subscriber), handler as usize)
    }

    pub fn unsubscribe_static(&self, event: &str, handler: fn(&dyn Any, &A) -> Result<()>) -> bool {
        self.remove(event, 0, handler as usize)
    }

    /// Invoke every live handler of `event`; returns how many ran successfully
    pub fn dispatch(&self, event: &str, sender: &dyn Any, args: &A) -> usize {
        let Some(list) = self.events.get(event).map(|l| l.value().clone()) else {
            return 0;
        };
        // upgrade under the lock, invoke outside it so handlers may (un)subscribe
        let live: Vec<(Option<Arc<Target>>, Invoke<A>)> = {
            let mut subs = list.lock();
            subs.retain(Subscription::is_alive);
            subs.iter()
                .filter_map(|s| match &s.target {
                    Some(weak) => weak.upgrade().map(|t| (Some(t), s.invoke.clone())),
                    None => Some((None, s.invoke.clone())),
                })
                .collect()
        };

        let mut delivered = 0;
        for (target, invoke) in live {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (*invoke)(target.as_deref(), sender, args)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => log::warn!("handler for event '{}' failed: {}", event, e),
                Err(_) => log::error!("handler for event '{}' panicked", event),
            }
        }
        delivered
    }

    /// Live subscriptions for `event`
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.events
            .get(event)
            .map(|l| l.value().lock().iter().filter(|s| s.is_alive()).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.events.clear();
    }
}

fn address<T>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}
