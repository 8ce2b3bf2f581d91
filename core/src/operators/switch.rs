use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use crate::{
    error::FlowError,
    producer::{IntoPublisher, Item, Multi, Publisher, Single},
    recovery::ContinueStrategy,
    subscription::{Subscriber, Subscription},
    util::SubscriptionArbiter,
};

struct SwitchIfEmptyPublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    fallback: Arc<dyn Publisher<T>>,
}

/// Subscribes to the fallback when the upstream completes without a value
struct SwitchIfEmptySubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    fallback: Arc<dyn Publisher<T>>,
    arbiter: Arc<SubscriptionArbiter>,
    seen_value: AtomicBool,
    switched: AtomicBool,
    me: Weak<Self>,
}

impl<T: Item> Publisher<T> for SwitchIfEmptyPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let arbiter = Arc::new(SubscriptionArbiter::new());
        let switch = Arc::new_cyclic(|me| SwitchIfEmptySubscriber {
            downstream: subscriber.clone(),
            fallback: self.fallback.clone(),
            arbiter: arbiter.clone(),
            seen_value: AtomicBool::new(false),
            switched: AtomicBool::new(false),
            me: me.clone(),
        });
        subscriber.on_subscribe(arbiter);
        self.upstream.subscribe(switch);
    }
}

impl<T: Item> Subscriber<T> for SwitchIfEmptySubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.arbiter.set(subscription) }

    fn on_next(&self, value: T) {
        self.seen_value.store(true, Ordering::Release);
        self.arbiter.produced(1);
        self.downstream.on_next(value)
    }

    fn on_error(&self, error: FlowError) { self.downstream.on_error(error) }

    fn on_complete(&self) {
        if self.seen_value.load(Ordering::Acquire) || self.switched.swap(true, Ordering::AcqRel) || self.arbiter.is_cancelled() {
            return self.downstream.on_complete();
        }
        if let Some(me) = self.me.upgrade() {
            self.fallback.subscribe(me);
        }
    }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

impl<T: Item> Multi<T> {
    /// Continues with `fallback` if this sequence completes empty
    pub fn switch_if_empty(&self, fallback: impl IntoPublisher<T>) -> Multi<T> {
        self.derive(SwitchIfEmptyPublisher { upstream: self.publisher(), fallback: fallback.into_publisher() })
    }

    pub fn default_if_empty(&self, value: T) -> Multi<T>
    where T: Clone {
        self.switch_if_empty(Single::just(value))
    }
}

impl<T: Item> Single<T> {
    /// Continues with `fallback` if this single completes empty. An eagerly built fallback
    /// has already run its side effects; a deferred one runs them only if it is used.
    pub fn switch_if_empty(&self, fallback: Single<T>) -> Single<T> {
        self.derive(SwitchIfEmptyPublisher { upstream: self.publisher(), fallback: fallback.into_publisher() })
    }

    pub fn default_if_empty(&self, value: T) -> Single<T>
    where T: Clone {
        self.switch_if_empty(Single::just(value))
    }
}
