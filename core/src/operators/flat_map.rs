//! `flat_map` and `merge`: inner producers run concurrently and their values interleave in
//! arrival order.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    error::FlowError,
    producer::{IntoPublisher, Item, Multi, Publisher},
    signal::Terminal,
    subscription::{Subscriber, Subscription, UNBOUNDED},
    util::{DrainQueue, SubscriptionSlot},
};

struct FlatMapPublisher<T, U, F> {
    upstream: Arc<dyn Publisher<T>>,
    f: Arc<F>,
    _marker: PhantomData<fn(T) -> U>,
}

/// Shared state of one `flat_map` subscription.
///
/// The upstream and every inner producer are requested unbounded; values are parked in the
/// drain queue until the subscriber asks for them. The sequence completes when the upstream
/// and all inners have completed. The first error wins and cancels everything else.
struct FlatMapCoordinator<T, U, F> {
    f: Arc<F>,
    queue: DrainQueue<U>,
    upstream: SubscriptionSlot,
    inners: DashMap<u64, Arc<SubscriptionSlot>>,
    next_inner: AtomicU64,
    /// upstream plus running inners
    active: AtomicUsize,
    me: Weak<Self>,
    _marker: PhantomData<fn(T)>,
}

struct InnerSubscriber<T, U, F> {
    parent: Arc<FlatMapCoordinator<T, U, F>>,
    id: u64,
    slot: Arc<SubscriptionSlot>,
}

impl<T, U, F, P> Publisher<U> for FlatMapPublisher<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        let coordinator = Arc::new_cyclic(|me: &Weak<FlatMapCoordinator<T, U, F>>| {
            let on_cancel = me.clone();
            FlatMapCoordinator {
                f: self.f.clone(),
                queue: DrainQueue::builder()
                    .eager_error()
                    .on_cancel(move || {
                        if let Some(coordinator) = on_cancel.upgrade() {
                            coordinator.cancel_all();
                        }
                    })
                    .build(),
                upstream: SubscriptionSlot::new(),
                inners: DashMap::new(),
                next_inner: AtomicU64::new(0),
                active: AtomicUsize::new(1),
                me: me.clone(),
                _marker: PhantomData,
            }
        });
        coordinator.queue.attach(subscriber);
        self.upstream.subscribe(coordinator);
    }
}

impl<T, U, F, P> FlatMapCoordinator<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn finish_one(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queue.terminate(Terminal::Complete);
        }
    }

    fn fail(&self, error: FlowError) {
        if self.queue.terminate(Terminal::Error(error)) {
            self.cancel_all();
        }
    }

    fn cancel_all(&self) {
        self.upstream.cancel();
        let inners: Vec<_> = self.inners.iter().map(|entry| entry.value().clone()).collect();
        debug!("flat_map cancelling {} inner subscriptions", inners.len());
        self.inners.clear();
        for inner in inners {
            inner.cancel();
        }
    }
}

impl<T, U, F, P> Subscriber<T> for FlatMapCoordinator<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription) {
            self.upstream.request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: T) {
        if self.queue.is_closed() || self.queue.is_cancelled() {
            return;
        }
        let Some(parent) = self.me.upgrade() else { return };
        let inner = (self.f)(value).into_publisher();
        let id = self.next_inner.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(SubscriptionSlot::new());
        self.active.fetch_add(1, Ordering::AcqRel);
        self.inners.insert(id, slot.clone());
        inner.subscribe(Arc::new(InnerSubscriber { parent, id, slot }));
    }

    fn on_error(&self, error: FlowError) { self.fail(error) }

    fn on_complete(&self) { self.finish_one() }
}

impl<T, U, F, P> Subscriber<U> for InnerSubscriber<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.slot.set(subscription) {
            self.slot.request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: U) { self.parent.queue.push(value); }

    fn on_error(&self, error: FlowError) { self.parent.fail(error) }

    fn on_complete(&self) {
        self.parent.inners.remove(&self.id);
        self.parent.finish_one();
    }
}

impl<T: Item> Multi<T> {
    /// Maps each value to an inner producer and merges all inner values in arrival order
    pub fn flat_map<U, P, F>(&self, f: F) -> Multi<U>
    where
        U: Item,
        P: IntoPublisher<U>,
        F: Fn(T) -> P + Send + Sync + 'static,
    {
        self.derive(FlatMapPublisher { upstream: self.publisher(), f: Arc::new(f), _marker: PhantomData })
    }

    /// Interleaves `sources` in arrival order. Completes when all complete; the first
    /// error cancels the rest.
    pub fn merge(sources: impl IntoIterator<Item = Multi<T>>) -> Multi<T> { Multi::from_iter(sources).flat_map(|source| source) }

    pub fn merge_with(&self, other: Multi<T>) -> Multi<T> { Multi::merge([self.clone(), other]) }
}
