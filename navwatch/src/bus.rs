//! Notification bus fanning status changes out to observers.
//!
//! Service observers are keyed by service id and are replayed the current registry value
//! when they subscribe. Global observers hear about probe and policy transitions only.
//! Every delivery iterates a snapshot of the subscriber list taken outside the lock, so a
//! callback may subscribe or unsubscribe without upsetting the delivery in progress.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error};
use serde::Serialize;

use crate::registry::StatusRegistry;
use crate::status::{ProbeState, ServiceStatus};

/// Callback for a single service
pub type ServiceCallback = Arc<dyn Fn(&ServiceStatus) + Send + Sync>;
/// Callback for gate level state
pub type GlobalCallback = Arc<dyn Fn(&GlobalState) + Send + Sync>;

/// Gate level state delivered to global observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalState {
    pub probe: ProbeState,
    pub enabled: bool,
}

/// Handle returned by a subscribe call, used to unsubscribe again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type ServiceSubscribers = HashMap<String, Vec<(Subscription, ServiceCallback)>>;

#[derive(Clone)]
pub struct NotificationBus {
    registry: StatusRegistry,
    next: Arc<AtomicU64>,
    services: Arc<Mutex<ServiceSubscribers>>,
    global: Arc<Mutex<Vec<(Subscription, GlobalCallback)>>>,
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NotificationBus(services: {}, global: {})",
            lock(&self.services).len(),
            lock(&self.global).len()
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Run a callback, logging rather than propagating a panic from it
fn isolate<F: FnOnce()>(target: &str, callback: F) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            "Subscriber for {} panicked: {}",
            target,
            panic_message(panic.as_ref())
        );
    }
}

impl NotificationBus {
    /// Create a bus that writes through to `registry`
    pub fn new(registry: StatusRegistry) -> Self {
        Self {
            registry,
            next: Arc::new(AtomicU64::new(0)),
            services: Arc::new(Mutex::new(HashMap::new())),
            global: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    fn next_subscription(&self) -> Subscription {
        Subscription(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Observe status changes for `id`.
    ///
    /// If the registry already holds a status for `id` the callback is invoked with it
    /// before this returns.
    pub fn subscribe_service<F>(&self, id: &str, callback: F) -> Subscription
    where
        F: Fn(&ServiceStatus) + Send + Sync + 'static,
    {
        let subscription = self.next_subscription();
        let callback: ServiceCallback = Arc::new(callback);

        lock(&self.services)
            .entry(id.to_owned())
            .or_default()
            .push((subscription, callback.clone()));

        if let Some(current) = self.registry.lookup(id) {
            debug!("Replaying {} to new subscriber", current);
            isolate(id, || callback(&current));
        }
        subscription
    }

    /// Stop observing `id`. Returns false when the subscription was not present.
    pub fn unsubscribe_service(&self, id: &str, subscription: Subscription) -> bool {
        let mut services = lock(&self.services);
        let Some(subscribers) = services.get_mut(id) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != subscription);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            services.remove(id);
        }
        removed
    }

    /// Observe probe and policy transitions. There is no replay.
    pub fn subscribe_global<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&GlobalState) + Send + Sync + 'static,
    {
        let subscription = self.next_subscription();
        lock(&self.global).push((subscription, Arc::new(callback)));
        subscription
    }

    pub fn unsubscribe_global(&self, subscription: Subscription) -> bool {
        let mut global = lock(&self.global);
        let before = global.len();
        global.retain(|(existing, _)| *existing != subscription);
        global.len() != before
    }

    /// Store `status` in the registry, then deliver it to every subscriber of its id in
    /// subscription order.
    pub fn publish(&self, status: ServiceStatus) {
        self.registry.set(&status.id, status.clone());
        self.deliver(&status);
    }

    /// As [publish](Self::publish), but only while the registry is still in `epoch`. A
    /// status from before a clear is neither stored nor delivered. Returns true when
    /// published.
    pub fn publish_in(&self, status: ServiceStatus, epoch: u64) -> bool {
        if !self.registry.set_if_epoch(&status.id, status.clone(), epoch) {
            debug!("Dropping {} from a cleared session", status);
            return false;
        }
        self.deliver(&status);
        true
    }

    fn deliver(&self, status: &ServiceStatus) {
        let subscribers = lock(&self.services)
            .get(&status.id)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .map(|(_, callback)| callback.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for callback in subscribers {
            isolate(&status.id, || callback(status));
        }
    }

    /// Deliver a gate level state to every global subscriber
    pub fn publish_global(&self, state: GlobalState) {
        let subscribers = lock(&self.global)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect::<Vec<_>>();

        for callback in subscribers {
            isolate("global state", || callback(&state));
        }
    }

    /// Number of live subscriptions for `id`
    pub fn service_subscribers(&self, id: &str) -> usize {
        lock(&self.services).get(id).map_or(0, Vec::len)
    }
}
