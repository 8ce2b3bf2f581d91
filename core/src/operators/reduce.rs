//! Aggregations that collapse a `Multi` into a `Single` once the upstream completes.

use std::sync::{Arc, Mutex};

use crate::{
    error::FlowError,
    producer::{Item, Multi, Publisher, Single},
    subscription::{Subscriber, Subscription, UNBOUNDED},
    util::{lock, ScalarSubscription},
};

type Seed<A> = Arc<dyn Fn() -> Option<A> + Send + Sync>;
type Step<A, T> = Arc<dyn Fn(Option<A>, T) -> A + Send + Sync>;

struct FoldPublisher<T, A> {
    upstream: Arc<dyn Publisher<T>>,
    seed: Seed<A>,
    step: Step<A, T>,
}

struct FoldSubscriber<T, A> {
    result: Arc<ScalarSubscription<A>>,
    accumulator: Mutex<Option<A>>,
    step: Step<A, T>,
}

impl<T: Item, A: Item> Publisher<A> for FoldPublisher<T, A> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<A>>) {
        let result = ScalarSubscription::new(subscriber);
        result.downstream().on_subscribe(result.clone());
        self.upstream.subscribe(Arc::new(FoldSubscriber { result, accumulator: Mutex::new((self.seed)()), step: self.step.clone() }));
    }
}

impl<T: Item, A: Item> Subscriber<T> for FoldSubscriber<T, A> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.result.upstream().set(subscription) {
            self.result.upstream().request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: T) {
        if self.result.is_done() {
            return;
        }
        let mut accumulator = lock(&self.accumulator);
        let current = accumulator.take();
        *accumulator = Some((self.step)(current, value));
    }

    fn on_error(&self, error: FlowError) {
        lock(&self.accumulator).take();
        self.result.error(error)
    }

    fn on_complete(&self) {
        let value = lock(&self.accumulator).take();
        self.result.complete(value)
    }
}

impl<T: Item> Multi<T> {
    /// Combines values pairwise; emits the result on completion, nothing for an empty sequence
    pub fn reduce<F>(&self, f: F) -> Single<T>
    where F: Fn(T, T) -> T + Send + Sync + 'static {
        let step: Step<T, T> = Arc::new(move |acc, value| match acc {
            Some(acc) => f(acc, value),
            None => value,
        });
        self.fold(Arc::new(|| None), step)
    }

    /// Folds into an accumulator created per subscription; always emits
    pub fn reduce_with<A, I, F>(&self, init: I, f: F) -> Single<A>
    where
        A: Item,
        I: Fn() -> A + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        let init = Arc::new(init);
        let seed_init = init.clone();
        let step: Step<A, T> = Arc::new(move |acc, value| f(acc.unwrap_or_else(|| init()), value));
        self.fold(Arc::new(move || Some(seed_init())), step)
    }

    pub fn count(&self) -> Single<u64> { self.reduce_with(|| 0, |n, _| n + 1) }

    pub fn collect_list(&self) -> Single<Vec<T>> {
        self.reduce_with(Vec::new, |mut list, value| {
            list.push(value);
            list
        })
    }

    fn fold<A: Item>(&self, seed: Seed<A>, step: Step<A, T>) -> Single<A> { self.derive(FoldPublisher { upstream: self.publisher(), seed, step }).into_single() }
}
