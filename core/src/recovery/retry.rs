use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc, Weak,
};

use tracing::debug;

use crate::{
    error::FlowError,
    producer::{Item, Multi, Publisher, Single},
    recovery::ContinueStrategy,
    subscription::{Subscriber, Subscription},
    util::SubscriptionArbiter,
};

struct RetryPublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    attempts: u32,
}

/// Resubscribes to the upstream after each domain error until the retries run out.
///
/// Resubscription goes through a trampoline so a source that fails synchronously on every
/// subscribe does not grow the stack.
struct RetrySubscriber<T> {
    upstream: Arc<dyn Publisher<T>>,
    downstream: Arc<dyn Subscriber<T>>,
    arbiter: Arc<SubscriptionArbiter>,
    remaining: AtomicU32,
    wip: AtomicUsize,
    me: Weak<Self>,
}

impl<T: Item> Publisher<T> for RetryPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let arbiter = Arc::new(SubscriptionArbiter::new());
        let retry = Arc::new_cyclic(|me| RetrySubscriber {
            upstream: self.upstream.clone(),
            downstream: subscriber.clone(),
            arbiter: arbiter.clone(),
            remaining: AtomicU32::new(self.attempts),
            wip: AtomicUsize::new(0),
            me: me.clone(),
        });
        subscriber.on_subscribe(arbiter);
        retry.resubscribe();
    }
}

impl<T: Item> RetrySubscriber<T> {
    fn resubscribe(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let Some(me) = self.me.upgrade() else { return };
        loop {
            if self.arbiter.is_cancelled() {
                return;
            }
            self.upstream.subscribe(me.clone());
            if self.wip.fetch_sub(1, Ordering::AcqRel) == 1 {
                return;
            }
        }
    }

    /// Takes one retry; false once they are used up
    fn take_attempt(&self) -> bool { self.remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)).is_ok() }
}

impl<T: Item> Subscriber<T> for RetrySubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.arbiter.set(subscription) }

    fn on_next(&self, value: T) {
        self.arbiter.produced(1);
        self.downstream.on_next(value)
    }

    fn on_error(&self, error: FlowError) {
        if !error.is_recoverable() || self.arbiter.is_cancelled() || !self.take_attempt() {
            return self.downstream.on_error(error);
        }
        debug!("retrying after error ({} retries left): {error}", self.remaining.load(Ordering::Acquire));
        self.resubscribe()
    }

    fn on_complete(&self) { self.downstream.on_complete() }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

impl<T: Item> Multi<T> {
    /// Resubscribes up to `attempts` times after a domain error. Values delivered before a
    /// failure are not withdrawn, so a retried source may repeat them.
    pub fn retry(&self, attempts: u32) -> Multi<T> { self.derive(RetryPublisher { upstream: self.publisher(), attempts }) }
}

impl<T: Item> Single<T> {
    pub fn retry(&self, attempts: u32) -> Single<T> { self.derive(RetryPublisher { upstream: self.publisher(), attempts }) }
}
