//! Cold-to-hot conversion: `publish`, `connect` and `auto_connect`.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock, Weak,
    },
};

use tracing::{debug, trace};

use crate::{
    config::DEFAULT_PREFETCH,
    error::FlowError,
    producer::{Item, Multi, Publisher, Timing},
    signal::Terminal,
    subscriber::Disposable,
    subscription::{DemandGate, Subscriber, Subscription},
    util::{lock, SubscriptionSlot},
};

/// A producer shared by every subscriber once connected.
///
/// Nothing is requested from the source until [`connect`](Self::connect) (or the
/// [`auto_connect`](Self::auto_connect) threshold). From then on a single upstream
/// subscription feeds all subscribers in lockstep: a value is emitted once every current
/// subscriber has demand for it. Subscribers only see values emitted after they attached.
/// While connected with no subscribers, values stay queued up to the prefetch and the
/// source is not asked for more until someone subscribes.
pub struct ConnectableMulti<T>(Arc<Inner<T>>);

struct Inner<T> {
    source: Arc<dyn Publisher<T>>,
    subscribers: Mutex<Vec<Arc<PublishSubscription<T>>>>,
    queue: Mutex<VecDeque<T>>,
    terminal: Mutex<Option<Terminal>>,
    connection: OnceLock<Arc<SubscriptionSlot>>,
    consumed: AtomicU64,
    ids: AtomicU64,
    wip: AtomicUsize,
    me: Weak<Inner<T>>,
}

struct PublishSubscription<T> {
    id: u64,
    gate: DemandGate,
    downstream: Arc<dyn Subscriber<T>>,
    hub: Weak<Inner<T>>,
}

/// The hub's own subscription to the source
struct SourceSubscriber<T> {
    hub: Arc<Inner<T>>,
    upstream: Arc<SubscriptionSlot>,
}

impl<T> Clone for ConnectableMulti<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: Item + Clone> Inner<T> {
    fn replenish(&self, emitted: u64) {
        let limit = DEFAULT_PREFETCH - DEFAULT_PREFETCH / 4;
        let total = self.consumed.fetch_add(emitted, Ordering::AcqRel) + emitted;
        if total >= limit {
            self.consumed.fetch_sub(limit, Ordering::AcqRel);
            if let Some(upstream) = self.connection.get() {
                upstream.request(limit);
            }
        }
    }

    fn remove(&self, id: u64) { lock(&self.subscribers).retain(|s| s.id != id) }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            let mut emitted = 0;
            loop {
                let subscribers = lock(&self.subscribers).clone();
                if subscribers.is_empty() {
                    trace!("published values held until a subscriber arrives");
                    break;
                }
                if subscribers.iter().any(|s| s.gate.demand() == 0) {
                    break;
                }
                let next = lock(&self.queue).pop_front();
                let Some(value) = next else { break };
                emitted += 1;
                for subscription in &subscribers {
                    if subscription.gate.try_consume() {
                        subscription.downstream.on_next(value.clone());
                    }
                }
            }
            if emitted > 0 {
                self.replenish(emitted);
            }
            let terminal = if lock(&self.queue).is_empty() { lock(&self.terminal).clone() } else { None };
            if let Some(terminal) = terminal {
                let subscribers = std::mem::take(&mut *lock(&self.subscribers));
                for subscription in subscribers {
                    if subscription.gate.terminate() {
                        terminal.clone().deliver(&*subscription.downstream);
                    }
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }
}

impl<T: Item + Clone> ConnectableMulti<T> {
    fn new(source: Arc<dyn Publisher<T>>) -> Self {
        Self(Arc::new_cyclic(|me| Inner {
            source,
            subscribers: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            terminal: Mutex::new(None),
            connection: OnceLock::new(),
            consumed: AtomicU64::new(0),
            ids: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            me: me.clone(),
        }))
    }

    /// Subscribes to the source. Connecting again returns a handle to the same connection.
    pub fn connect(&self) -> Disposable {
        let mut created = false;
        let upstream = self
            .0
            .connection
            .get_or_init(|| {
                created = true;
                Arc::new(SubscriptionSlot::new())
            })
            .clone();
        if created {
            debug!("connecting published producer");
            self.0.source.subscribe(Arc::new(SourceSubscriber { hub: self.0.clone(), upstream: upstream.clone() }));
        }
        Disposable::from_slot(upstream)
    }

    pub fn is_connected(&self) -> bool { self.0.connection.get().is_some() }

    pub fn subscriber_count(&self) -> usize { lock(&self.0.subscribers).len() }

    /// A producer that connects once `subscribers` have subscribed to it. Zero connects now.
    pub fn auto_connect(&self, subscribers: usize) -> Multi<T> {
        if subscribers == 0 {
            self.connect();
        }
        Multi::from_publisher(AutoConnect { hub: self.clone(), threshold: subscribers, seen: AtomicUsize::new(0) }, Timing::Eager)
    }

    /// View to subscribe through without affecting the connection
    pub fn multi(&self) -> Multi<T> { Multi::from_publisher(self.clone(), Timing::Eager) }
}

impl<T: Item + Clone> Publisher<T> for ConnectableMulti<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let subscription = Arc::new(PublishSubscription {
            id: self.0.ids.fetch_add(1, Ordering::Relaxed),
            gate: DemandGate::active(),
            downstream: subscriber.clone(),
            hub: self.0.me.clone(),
        });
        subscriber.on_subscribe(subscription.clone());
        if !subscription.gate.is_done() {
            lock(&self.0.subscribers).push(subscription);
        }
        self.0.drain();
    }
}

impl<T: Item + Clone> Subscription for PublishSubscription<T> {
    fn request(&self, n: u64) {
        if self.gate.request(n).is_some() {
            if let Some(hub) = self.hub.upgrade() {
                hub.drain();
            }
        }
    }

    fn cancel(&self) {
        if self.gate.cancel() {
            if let Some(hub) = self.hub.upgrade() {
                hub.remove(self.id);
                hub.drain();
            }
        }
    }
}

impl<T: Item + Clone> Subscriber<T> for SourceSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription) {
            self.upstream.request(DEFAULT_PREFETCH);
        }
    }

    fn on_next(&self, value: T) {
        lock(&self.hub.queue).push_back(value);
        self.hub.drain();
    }

    fn on_error(&self, error: FlowError) {
        lock(&self.hub.terminal).get_or_insert(Terminal::Error(error));
        self.hub.drain();
    }

    fn on_complete(&self) {
        lock(&self.hub.terminal).get_or_insert(Terminal::Complete);
        self.hub.drain();
    }
}

struct AutoConnect<T> {
    hub: ConnectableMulti<T>,
    threshold: usize,
    seen: AtomicUsize,
}

impl<T: Item + Clone> Publisher<T> for AutoConnect<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.hub.subscribe(subscriber);
        if self.seen.fetch_add(1, Ordering::AcqRel) + 1 == self.threshold {
            self.hub.connect();
        }
    }
}

impl<T: Item + Clone> Multi<T> {
    /// Shares this producer between subscribers. See [`ConnectableMulti`].
    pub fn publish(&self) -> ConnectableMulti<T> { ConnectableMulti::new(self.publisher()) }
}
