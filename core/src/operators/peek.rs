//! Side-effect observers. They see signals as they pass and never alter them.

use std::{fmt::Debug, sync::Arc};

use tracing::info;

use crate::{
    error::FlowError,
    producer::{Item, Multi, Publisher, Single},
    recovery::ContinueStrategy,
    signal::Signal,
    subscription::{Subscriber, Subscription},
};

type Observer<T> = Arc<dyn Fn(&Signal<T>) + Send + Sync>;

struct PeekPublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    observer: Observer<T>,
}

struct PeekSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    observer: Observer<T>,
}

impl<T: Item> Publisher<T> for PeekPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.upstream.subscribe(Arc::new(PeekSubscriber { downstream: subscriber, observer: self.observer.clone() }))
    }
}

impl<T: Item> Subscriber<T> for PeekSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.downstream.on_subscribe(subscription) }

    fn on_next(&self, value: T) {
        let signal = Signal::Next(value);
        (self.observer)(&signal);
        if let Signal::Next(value) = signal {
            self.downstream.on_next(value)
        }
    }

    fn on_error(&self, error: FlowError) {
        let signal = Signal::Error(error);
        (self.observer)(&signal);
        if let Signal::Error(error) = signal {
            self.downstream.on_error(error)
        }
    }

    fn on_complete(&self) {
        (self.observer)(&Signal::Complete);
        self.downstream.on_complete()
    }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

/// Records every signal, request and cancel passing this point at `info` level
struct LogPublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    category: Arc<str>,
}

struct LogSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    category: Arc<str>,
}

struct LogSubscription {
    upstream: Arc<dyn Subscription>,
    category: Arc<str>,
}

impl<T: Item + Debug> Publisher<T> for LogPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.upstream.subscribe(Arc::new(LogSubscriber { downstream: subscriber, category: self.category.clone() }))
    }
}

impl<T: Item + Debug> Subscriber<T> for LogSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        info!(category = %self.category, "onSubscribe");
        self.downstream.on_subscribe(Arc::new(LogSubscription { upstream: subscription, category: self.category.clone() }))
    }

    fn on_next(&self, value: T) {
        info!(category = %self.category, "onNext({value:?})");
        self.downstream.on_next(value)
    }

    fn on_error(&self, error: FlowError) {
        info!(category = %self.category, "onError({error})");
        self.downstream.on_error(error)
    }

    fn on_complete(&self) {
        info!(category = %self.category, "onComplete()");
        self.downstream.on_complete()
    }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

impl Subscription for LogSubscription {
    fn request(&self, n: u64) {
        if n == u64::MAX {
            info!(category = %self.category, "request(unbounded)");
        } else {
            info!(category = %self.category, "request({n})");
        }
        self.upstream.request(n)
    }

    fn cancel(&self) {
        info!(category = %self.category, "cancel()");
        self.upstream.cancel()
    }
}

fn on_value<T: 'static>(f: impl Fn(&T) + Send + Sync + 'static) -> impl Fn(&Signal<T>) + Send + Sync + 'static {
    move |signal: &Signal<T>| {
        if let Signal::Next(value) = signal {
            f(value)
        }
    }
}

fn on_failure<T: 'static>(f: impl Fn(&FlowError) + Send + Sync + 'static) -> impl Fn(&Signal<T>) + Send + Sync + 'static {
    move |signal: &Signal<T>| {
        if let Signal::Error(error) = signal {
            f(error)
        }
    }
}

fn on_completion<T: 'static>(f: impl Fn() + Send + Sync + 'static) -> impl Fn(&Signal<T>) + Send + Sync + 'static {
    move |signal: &Signal<T>| {
        if let Signal::Complete = signal {
            f()
        }
    }
}

impl<T: Item> Multi<T> {
    pub fn do_on_each<F>(&self, observer: F) -> Multi<T>
    where F: Fn(&Signal<T>) + Send + Sync + 'static {
        self.derive(PeekPublisher { upstream: self.publisher(), observer: Arc::new(observer) })
    }

    pub fn do_on_next<F>(&self, f: F) -> Multi<T>
    where F: Fn(&T) + Send + Sync + 'static {
        self.do_on_each(on_value(f))
    }

    pub fn do_on_error<F>(&self, f: F) -> Multi<T>
    where F: Fn(&FlowError) + Send + Sync + 'static {
        self.do_on_each(on_failure(f))
    }

    pub fn do_on_complete<F>(&self, f: F) -> Multi<T>
    where F: Fn() + Send + Sync + 'static {
        self.do_on_each(on_completion(f))
    }

    /// Logs signals and demand at this point of the pipeline under `category`
    pub fn log(&self, category: impl Into<String>) -> Multi<T>
    where T: Debug {
        self.derive(LogPublisher { upstream: self.publisher(), category: Arc::from(category.into()) })
    }
}

impl<T: Item> Single<T> {
    pub fn do_on_each<F>(&self, observer: F) -> Single<T>
    where F: Fn(&Signal<T>) + Send + Sync + 'static {
        self.derive(PeekPublisher { upstream: self.publisher(), observer: Arc::new(observer) })
    }

    pub fn do_on_item<F>(&self, f: F) -> Single<T>
    where F: Fn(&T) + Send + Sync + 'static {
        self.do_on_each(on_value(f))
    }

    pub fn do_on_error<F>(&self, f: F) -> Single<T>
    where F: Fn(&FlowError) + Send + Sync + 'static {
        self.do_on_each(on_failure(f))
    }

    pub fn log(&self, category: impl Into<String>) -> Single<T>
    where T: Debug {
        self.derive(LogPublisher { upstream: self.publisher(), category: Arc::from(category.into()) })
    }
}
