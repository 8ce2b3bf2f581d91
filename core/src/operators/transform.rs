//! Per-value operators: map, try_map, filter, distinct, take.

use std::{
    any::Any,
    hash::Hash,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use tracing::debug;

use crate::{
    error::FlowError,
    producer::{Item, Multi, Publisher, Single},
    recovery::ContinueStrategy,
    subscription::{Subscriber, Subscription},
    util::{SeenSet, SubscriptionSlot},
};

struct MapPublisher<T, U, F> {
    upstream: Arc<dyn Publisher<T>>,
    f: Arc<F>,
    _marker: PhantomData<fn(T) -> U>,
}

struct MapSubscriber<T, U, F> {
    downstream: Arc<dyn Subscriber<U>>,
    f: Arc<F>,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T: Item, U: Item, F> Publisher<U> for MapPublisher<T, U, F>
where F: Fn(T) -> U + Send + Sync + 'static
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        self.upstream.subscribe(Arc::new(MapSubscriber { downstream: subscriber, f: self.f.clone(), _marker: PhantomData }))
    }
}

impl<T: Item, U: Item, F> Subscriber<T> for MapSubscriber<T, U, F>
where F: Fn(T) -> U + Send + Sync + 'static
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.downstream.on_subscribe(subscription) }
    fn on_next(&self, value: T) { self.downstream.on_next((self.f)(value)) }
    fn on_error(&self, error: FlowError) { self.downstream.on_error(error) }
    fn on_complete(&self) { self.downstream.on_complete() }
    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

struct TryMapPublisher<T, U, F> {
    upstream: Arc<dyn Publisher<T>>,
    f: Arc<F>,
    _marker: PhantomData<fn(T) -> U>,
}

/// Runs a fallible transform. A failure terminates the sequence unless a downstream
/// `on_error_continue` accepts it, in which case the value is dropped and one more is requested.
struct TryMapSubscriber<T, U, F> {
    downstream: Arc<dyn Subscriber<U>>,
    f: Arc<F>,
    upstream: SubscriptionSlot,
    strategy: OnceLock<Option<ContinueStrategy>>,
    done: AtomicBool,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T, U, E, F> Publisher<U> for TryMapPublisher<T, U, F>
where
    T: Item + Clone,
    U: Item,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        self.upstream.subscribe(Arc::new(TryMapSubscriber {
            downstream: subscriber,
            f: self.f.clone(),
            upstream: SubscriptionSlot::new(),
            strategy: OnceLock::new(),
            done: AtomicBool::new(false),
            _marker: PhantomData,
        }))
    }
}

impl<T, U, E, F> Subscriber<T> for TryMapSubscriber<T, U, F>
where
    T: Item + Clone,
    U: Item,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.upstream.set(subscription.clone());
        self.downstream.on_subscribe(subscription)
    }

    fn on_next(&self, value: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let input = value.clone();
        let error = match (self.f)(value) {
            Ok(mapped) => return self.downstream.on_next(mapped),
            Err(error) => FlowError::domain(error),
        };
        let strategy = self.strategy.get_or_init(|| self.downstream.continue_strategy());
        match strategy {
            Some(strategy) if strategy.matches(&error) => {
                strategy.report(&error, &input as &dyn Any);
                self.upstream.request(1);
            }
            _ => {
                if !self.done.swap(true, Ordering::AcqRel) {
                    self.upstream.cancel();
                    self.downstream.on_error(error);
                }
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.downstream.on_error(error)
        }
    }

    fn on_complete(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.downstream.on_complete()
        }
    }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

/// Drops values failing `predicate`, replacing each with a request upstream
struct FilterPublisher<T, F> {
    upstream: Arc<dyn Publisher<T>>,
    predicate: Arc<F>,
}

struct FilterSubscriber<T, F> {
    downstream: Arc<dyn Subscriber<T>>,
    predicate: Arc<F>,
    upstream: SubscriptionSlot,
}

impl<T: Item, F> Publisher<T> for FilterPublisher<T, F>
where F: Fn(&T) -> bool + Send + Sync + 'static
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.upstream.subscribe(Arc::new(FilterSubscriber { downstream: subscriber, predicate: self.predicate.clone(), upstream: SubscriptionSlot::new() }))
    }
}

impl<T: Item, F> Subscriber<T> for FilterSubscriber<T, F>
where F: Fn(&T) -> bool + Send + Sync + 'static
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.upstream.set(subscription.clone());
        self.downstream.on_subscribe(subscription)
    }

    fn on_next(&self, value: T) {
        if (self.predicate)(&value) {
            self.downstream.on_next(value)
        } else {
            self.upstream.request(1)
        }
    }

    fn on_error(&self, error: FlowError) { self.downstream.on_error(error) }
    fn on_complete(&self) { self.downstream.on_complete() }
    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

struct TakePublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    limit: u64,
}

struct TakeSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    remaining: AtomicU64,
    upstream: SubscriptionSlot,
    done: AtomicBool,
}

impl<T: Item> Publisher<T> for TakePublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.upstream.subscribe(Arc::new(TakeSubscriber {
            downstream: subscriber,
            remaining: AtomicU64::new(self.limit),
            upstream: SubscriptionSlot::new(),
            done: AtomicBool::new(false),
        }))
    }
}

impl<T: Item> TakeSubscriber<T> {
    fn finish(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.upstream.cancel();
            self.downstream.on_complete();
        }
    }
}

impl<T: Item> Subscriber<T> for TakeSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.upstream.set(subscription.clone());
        self.downstream.on_subscribe(subscription);
        if self.remaining.load(Ordering::Acquire) == 0 {
            self.finish();
        }
    }

    fn on_next(&self, value: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let Ok(before) = self.remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)) else { return };
        self.downstream.on_next(value);
        if before == 1 {
            self.finish();
        }
    }

    fn on_error(&self, error: FlowError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.downstream.on_error(error)
        }
    }

    fn on_complete(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.downstream.on_complete()
        }
    }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

struct DistinctPublisher<T, K, F> {
    upstream: Arc<dyn Publisher<T>>,
    key: Arc<F>,
    _marker: PhantomData<fn(&T) -> K>,
}

struct DistinctSubscriber<T, K: Hash + Eq, F> {
    downstream: Arc<dyn Subscriber<T>>,
    key: Arc<F>,
    seen: SeenSet<K>,
    upstream: SubscriptionSlot,
}

impl<T: Item, K, F> Publisher<T> for DistinctPublisher<T, K, F>
where
    K: Hash + Eq + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.upstream.subscribe(Arc::new(DistinctSubscriber { downstream: subscriber, key: self.key.clone(), seen: SeenSet::new(), upstream: SubscriptionSlot::new() }))
    }
}

impl<T: Item, K, F> Subscriber<T> for DistinctSubscriber<T, K, F>
where
    K: Hash + Eq + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.upstream.set(subscription.clone());
        self.downstream.on_subscribe(subscription)
    }

    fn on_next(&self, value: T) {
        if self.seen.first_sighting((self.key)(&value)) {
            self.downstream.on_next(value)
        } else {
            self.upstream.request(1)
        }
    }

    fn on_error(&self, error: FlowError) {
        self.seen.clear();
        self.downstream.on_error(error)
    }

    fn on_complete(&self) {
        debug!("distinct saw {} keys", self.seen.len());
        self.seen.clear();
        self.downstream.on_complete()
    }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

impl<T: Item> Multi<T> {
    pub fn map<U, F>(&self, f: F) -> Multi<U>
    where
        U: Item,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.derive(MapPublisher { upstream: self.publisher(), f: Arc::new(f), _marker: PhantomData })
    }

    /// Fallible map. The first failure is sent downstream as an error and upstream is
    /// cancelled, unless a downstream `on_error_continue` accepts the error.
    pub fn try_map<U, E, F>(&self, f: F) -> Multi<U>
    where
        T: Clone,
        U: Item,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        self.derive(TryMapPublisher { upstream: self.publisher(), f: Arc::new(f), _marker: PhantomData })
    }

    pub fn filter<F>(&self, predicate: F) -> Multi<T>
    where F: Fn(&T) -> bool + Send + Sync + 'static {
        self.derive(FilterPublisher { upstream: self.publisher(), predicate: Arc::new(predicate) })
    }

    /// Suppresses values equal to one already emitted on this subscription
    pub fn distinct(&self) -> Multi<T>
    where T: Hash + Eq + Clone {
        self.distinct_by(T::clone)
    }

    /// Suppresses values whose key was already seen on this subscription
    pub fn distinct_by<K, F>(&self, key: F) -> Multi<T>
    where
        K: Hash + Eq + Send + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.derive(DistinctPublisher { upstream: self.publisher(), key: Arc::new(key), _marker: PhantomData })
    }

    /// Emits the first `n` values, then cancels upstream and completes
    pub fn take(&self, n: u64) -> Multi<T> { self.derive(TakePublisher { upstream: self.publisher(), limit: n }) }
}

impl<T: Item> Single<T> {
    pub fn map<U, F>(&self, f: F) -> Single<U>
    where
        U: Item,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.derive(MapPublisher { upstream: self.publisher(), f: Arc::new(f), _marker: PhantomData })
    }

    pub fn try_map<U, E, F>(&self, f: F) -> Single<U>
    where
        T: Clone,
        U: Item,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        self.derive(TryMapPublisher { upstream: self.publisher(), f: Arc::new(f), _marker: PhantomData })
    }

    pub fn filter<F>(&self, predicate: F) -> Single<T>
    where F: Fn(&T) -> bool + Send + Sync + 'static {
        self.derive(FilterPublisher { upstream: self.publisher(), predicate: Arc::new(predicate) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestSubscriber;

    #[derive(Debug, thiserror::Error)]
    #[error("odd value {0}")]
    struct Odd(u64);

    #[test]
    fn map_and_filter_respect_demand() {
        let subscriber = TestSubscriber::with_request(2);
        Multi::range(0..10).filter(|n| n % 3 == 0).map(|n| n * 10).subscribe_with(subscriber.subscriber());
        assert_eq!(subscriber.values(), vec![0, 30]);
        subscriber.request(10);
        assert_eq!(subscriber.values(), vec![0, 30, 60, 90]);
        assert!(subscriber.is_complete());
        assert!(subscriber.violations().is_empty());
    }

    #[test]
    fn failing_transform_errors_and_cancels_upstream() {
        let subscriber = TestSubscriber::new();
        Multi::range(0..10)
            .try_map(|n| if n == 3 { Err(Odd(n)) } else { Ok(n) })
            .subscribe_with(subscriber.subscriber());
        assert_eq!(subscriber.values(), vec![0, 1, 2]);
        assert!(subscriber.error().is_some_and(|e| e.is::<Odd>()));
        assert_eq!(subscriber.completions(), 0);
    }

    #[test]
    fn distinct_keeps_first_occurrence() {
        let subscriber = TestSubscriber::new();
        Multi::just(vec!["kiwi", "orange", "kiwi", "lemon", "orange"]).distinct().subscribe_with(subscriber.subscriber());
        assert_eq!(subscriber.values(), vec!["kiwi", "orange", "lemon"]);
    }

    #[test]
    fn distinct_by_key() {
        let subscriber = TestSubscriber::new();
        Multi::just(vec!["apple", "avocado", "banana", "blueberry", "cherry"])
            .distinct_by(|s| s.chars().next())
            .subscribe_with(subscriber.subscriber());
        assert_eq!(subscriber.values(), vec!["apple", "banana", "cherry"]);
    }

    #[test]
    fn take_limits_and_completes() {
        let subscriber = TestSubscriber::new();
        Multi::range(0..1_000_000).take(3).subscribe_with(subscriber.subscriber());
        assert_eq!(subscriber.values(), vec![0, 1, 2]);
        assert_eq!(subscriber.completions(), 1);

        let none = TestSubscriber::new();
        Multi::range(0..5).take(0).subscribe_with(none.subscriber());
        assert!(none.values().is_empty());
        assert!(none.is_complete());
    }
}
