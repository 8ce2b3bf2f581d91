//! Execution-context switching: `subscribe_on` and `publish_on`.

use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    config::DEFAULT_PREFETCH,
    error::FlowError,
    producer::{Item, Multi, Publisher, Single},
    recovery::ContinueStrategy,
    scheduler::Scheduler,
    signal::Terminal,
    subscription::{Subscriber, Subscription},
    util::{DrainQueue, SubscriptionSlot},
};

thread_local! {
    /// Set while a `subscribe_on` is subscribing upstream on its scheduler. Any `subscribe_on`
    /// further upstream sees it and stays inert.
    static RELOCATED: Cell<bool> = const { Cell::new(false) };
}

struct SubscribeOnPublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    scheduler: Scheduler,
}

/// Clears the relocation flag once the source has answered, so subscriptions made later from
/// inside `on_next` (inner producers) are free to relocate again
struct SubscribeOnSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
}

impl<T: Item> Publisher<T> for SubscribeOnPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        if RELOCATED.with(Cell::get) {
            return self.upstream.subscribe(subscriber);
        }
        let upstream = self.upstream.clone();
        self.scheduler.schedule(move || {
            RELOCATED.with(|flag| flag.set(true));
            upstream.subscribe(Arc::new(SubscribeOnSubscriber { downstream: subscriber }));
            RELOCATED.with(|flag| flag.set(false));
        });
    }
}

impl<T: Item> Subscriber<T> for SubscribeOnSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        RELOCATED.with(|flag| flag.set(false));
        self.downstream.on_subscribe(subscription)
    }

    fn on_next(&self, value: T) { self.downstream.on_next(value) }
    fn on_error(&self, error: FlowError) { self.downstream.on_error(error) }
    fn on_complete(&self) { self.downstream.on_complete() }
    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

struct PublishOnPublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    scheduler: Scheduler,
    prefetch: u64,
}

/// Hands every signal to a queue drained on the scheduler. Upstream is prefetched and
/// replenished each time three quarters of the prefetch have been delivered.
struct PublishOnSubscriber<T> {
    queue: DrainQueue<T>,
    downstream: Arc<dyn Subscriber<T>>,
    upstream: Arc<SubscriptionSlot>,
    prefetch: u64,
}

impl<T: Item> Publisher<T> for PublishOnPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let upstream = Arc::new(SubscriptionSlot::new());
        let limit = (self.prefetch - self.prefetch / 4).max(1);
        let consumed = AtomicU64::new(0);
        let (replenish, cancel) = (upstream.clone(), upstream.clone());
        let queue = DrainQueue::builder()
            .executor(self.scheduler.clone())
            .on_consumed(move |n| {
                let total = consumed.fetch_add(n, Ordering::AcqRel) + n;
                if total >= limit {
                    consumed.fetch_sub(limit, Ordering::AcqRel);
                    replenish.request(limit);
                }
            })
            .on_cancel(move || cancel.cancel())
            .build();
        queue.attach(subscriber.clone());
        self.upstream.subscribe(Arc::new(PublishOnSubscriber { queue, downstream: subscriber, upstream, prefetch: self.prefetch }));
    }
}

impl<T: Item> Subscriber<T> for PublishOnSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription) {
            self.upstream.request(self.prefetch);
        }
    }

    fn on_next(&self, value: T) { self.queue.push(value); }

    fn on_error(&self, error: FlowError) { self.queue.terminate(Terminal::Error(error)); }

    fn on_complete(&self) { self.queue.terminate(Terminal::Complete); }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

impl<T: Item> Multi<T> {
    /// Subscribes to everything upstream on `scheduler`. When several are chained, the one
    /// nearest the subscriber decides.
    pub fn subscribe_on(&self, scheduler: Scheduler) -> Multi<T> { self.derive(SubscribeOnPublisher { upstream: self.publisher(), scheduler }) }

    /// Delivers every signal from here on using `scheduler`
    pub fn publish_on(&self, scheduler: Scheduler) -> Multi<T> { self.derive(PublishOnPublisher { upstream: self.publisher(), scheduler, prefetch: DEFAULT_PREFETCH }) }
}

impl<T: Item> Single<T> {
    pub fn subscribe_on(&self, scheduler: Scheduler) -> Single<T> { self.derive(SubscribeOnPublisher { upstream: self.publisher(), scheduler }) }

    pub fn publish_on(&self, scheduler: Scheduler) -> Single<T> { self.derive(PublishOnPublisher { upstream: self.publisher(), scheduler, prefetch: 1 }) }
}
