//! `concat_map` and `concat`: inner producers run one at a time, in upstream order.

use std::{
    collections::VecDeque,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
};

use crate::{
    config::CONCAT_PREFETCH,
    error::FlowError,
    producer::{IntoPublisher, Item, Multi, Publisher, Single},
    subscription::{Subscriber, Subscription},
    util::{lock, SubscriptionArbiter, SubscriptionSlot},
};

struct ConcatMapPublisher<T, U, F> {
    upstream: Arc<dyn Publisher<T>>,
    f: Arc<F>,
    _marker: PhantomData<fn(T) -> U>,
}

/// Queues upstream values and subscribes to the inner producer of the next one only after
/// the current inner completes. Downstream demand is carried from inner to inner by the
/// arbiter. An error from either side terminates immediately.
struct ConcatMapCoordinator<T, U, F> {
    f: Arc<F>,
    downstream: Arc<dyn Subscriber<U>>,
    arbiter: SubscriptionArbiter,
    upstream: SubscriptionSlot,
    pending: Mutex<VecDeque<T>>,
    inner_active: AtomicBool,
    upstream_done: AtomicBool,
    done: AtomicBool,
    wip: AtomicUsize,
    me: Weak<Self>,
}

struct ConcatInner<T, U, F> {
    parent: Arc<ConcatMapCoordinator<T, U, F>>,
}

impl<T, U, F, P> Publisher<U> for ConcatMapPublisher<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        let coordinator = Arc::new_cyclic(|me| ConcatMapCoordinator {
            f: self.f.clone(),
            downstream: subscriber.clone(),
            arbiter: SubscriptionArbiter::new(),
            upstream: SubscriptionSlot::new(),
            pending: Mutex::new(VecDeque::new()),
            inner_active: AtomicBool::new(false),
            upstream_done: AtomicBool::new(false),
            done: AtomicBool::new(false),
            wip: AtomicUsize::new(0),
            me: me.clone(),
        });
        subscriber.on_subscribe(coordinator.clone());
        self.upstream.subscribe(coordinator);
    }
}

impl<T, U, F, P> ConcatMapCoordinator<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            if self.done.load(Ordering::Acquire) {
                return;
            }
            if !self.inner_active.load(Ordering::Acquire) {
                let next = lock(&self.pending).pop_front();
                match next {
                    Some(value) => {
                        self.upstream.request(1);
                        self.inner_active.store(true, Ordering::Release);
                        if let Some(parent) = self.me.upgrade() {
                            (self.f)(value).into_publisher().subscribe(Arc::new(ConcatInner { parent }));
                        }
                    }
                    None if self.upstream_done.load(Ordering::Acquire) => {
                        if !self.done.swap(true, Ordering::AcqRel) {
                            self.downstream.on_complete();
                        }
                        return;
                    }
                    None => {}
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn fail(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.upstream.cancel();
        self.arbiter.cancel();
        lock(&self.pending).clear();
        self.downstream.on_error(error);
    }

    fn inner_complete(&self) {
        self.inner_active.store(false, Ordering::Release);
        self.drain();
    }
}

impl<T, U, F, P> Subscriber<T> for ConcatMapCoordinator<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription) {
            self.upstream.request(CONCAT_PREFETCH);
        }
    }

    fn on_next(&self, value: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        lock(&self.pending).push_back(value);
        self.drain();
    }

    fn on_error(&self, error: FlowError) { self.fail(error) }

    fn on_complete(&self) {
        self.upstream_done.store(true, Ordering::Release);
        self.drain();
    }
}

impl<T, U, F, P> Subscription for ConcatMapCoordinator<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn request(&self, n: u64) { self.arbiter.request(n) }

    fn cancel(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.arbiter.cancel();
        self.upstream.cancel();
        lock(&self.pending).clear();
    }
}

impl<T, U, F, P> Subscriber<U> for ConcatInner<T, U, F>
where
    T: Item,
    U: Item,
    F: Fn(T) -> P + Send + Sync + 'static,
    P: IntoPublisher<U>,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.parent.arbiter.set(subscription) }

    fn on_next(&self, value: U) {
        if self.parent.done.load(Ordering::Acquire) {
            return;
        }
        self.parent.arbiter.produced(1);
        self.parent.downstream.on_next(value);
    }

    fn on_error(&self, error: FlowError) { self.parent.fail(error) }

    fn on_complete(&self) { self.parent.inner_complete() }
}

impl<T: Item> Multi<T> {
    /// Maps each value to an inner producer and emits the inners' values one producer at a
    /// time, in upstream order
    pub fn concat_map<U, P, F>(&self, f: F) -> Multi<U>
    where
        U: Item,
        P: IntoPublisher<U>,
        F: Fn(T) -> P + Send + Sync + 'static,
    {
        self.derive(ConcatMapPublisher { upstream: self.publisher(), f: Arc::new(f), _marker: PhantomData })
    }

    /// Emits all of each source before subscribing to the next
    pub fn concat(sources: impl IntoIterator<Item = Multi<T>>) -> Multi<T> { Multi::from_iter(sources).concat_map(|source| source) }

    pub fn concat_with(&self, other: Multi<T>) -> Multi<T> { Multi::concat([self.clone(), other]) }
}

impl<T: Item> Single<T> {
    /// Continues with the single produced from this one's value
    pub fn flat_map<U, F>(&self, f: F) -> Single<U>
    where
        U: Item,
        F: Fn(T) -> Single<U> + Send + Sync + 'static,
    {
        self.to_multi().concat_map(f).into_single()
    }

    /// Continues with the multi produced from this one's value
    pub fn flat_map_many<U, F>(&self, f: F) -> Multi<U>
    where
        U: Item,
        F: Fn(T) -> Multi<U> + Send + Sync + 'static,
    {
        self.to_multi().concat_map(f)
    }
}
