//! Producers: the `Multi` and `Single` handles, their sources and construction timing.

mod construction;
mod iter;
mod terminal;
mod time;

pub use construction::Construction;

use std::sync::Arc;

use crate::{
    error::FlowError,
    subscriber::{Disposable, LambdaSubscriber},
    subscription::Subscriber,
};

/// Bound shared by everything that travels through a pipeline
pub trait Item: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Item for T {}

/// Anything a subscriber can subscribe to.
///
/// Each call establishes a new, independent subscription and must call `on_subscribe` on
/// the subscriber exactly once before any other signal.
pub trait Publisher<T>: Send + Sync {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// When a producer computes what it emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Computed once when the producer was built; every subscription sees the same result
    Eager,
    /// Computed anew for every subscription, reading state at subscribe time
    Deferred,
}

/// Producer of zero or more values followed by at most one terminal signal.
///
/// A `Multi` is a cold description of a pipeline: nothing runs until it is subscribed, and
/// every subscription runs it again.
pub struct Multi<T> {
    publisher: Arc<dyn Publisher<T>>,
    timing: Timing,
}

/// Producer of at most one value: a value then completion, completion alone, or an error.
pub struct Single<T> {
    publisher: Arc<dyn Publisher<T>>,
    timing: Timing,
}

impl<T> Clone for Multi<T> {
    fn clone(&self) -> Self { Self { publisher: self.publisher.clone(), timing: self.timing } }
}

impl<T> Clone for Single<T> {
    fn clone(&self) -> Self { Self { publisher: self.publisher.clone(), timing: self.timing } }
}

impl<T> std::fmt::Debug for Multi<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("Multi").field("timing", &self.timing).finish() }
}

impl<T> std::fmt::Debug for Single<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("Single").field("timing", &self.timing).finish() }
}

impl<T: Item> Multi<T> {
    pub fn from_publisher(publisher: impl Publisher<T> + 'static, timing: Timing) -> Self { Self { publisher: Arc::new(publisher), timing } }

    pub fn timing(&self) -> Timing { self.timing }

    pub fn publisher(&self) -> Arc<dyn Publisher<T>> { self.publisher.clone() }

    pub fn subscribe_with(&self, subscriber: Arc<dyn Subscriber<T>>) { self.publisher.subscribe(subscriber) }

    /// Subscribes with unbounded demand. An error signal is logged and otherwise ignored.
    pub fn subscribe<F>(&self, on_next: F) -> Disposable
    where F: Fn(T) + Send + Sync + 'static {
        let subscriber = LambdaSubscriber::new(on_next, None, None);
        let disposable = subscriber.disposable();
        self.subscribe_with(Arc::new(subscriber));
        disposable
    }

    pub fn subscribe_all<N, E, C>(&self, on_next: N, on_error: E, on_complete: C) -> Disposable
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(FlowError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        let subscriber = LambdaSubscriber::new(on_next, Some(Box::new(on_error)), Some(Box::new(on_complete)));
        let disposable = subscriber.disposable();
        self.subscribe_with(Arc::new(subscriber));
        disposable
    }

    /// Wraps an operator publisher, keeping this producer's timing tag
    pub(crate) fn derive<U: Item>(&self, publisher: impl Publisher<U> + 'static) -> Multi<U> { Multi::from_publisher(publisher, self.timing) }

    /// Reinterprets the sequence as at most one value
    pub(crate) fn into_single(self) -> Single<T> { Single { publisher: self.publisher, timing: self.timing } }
}

impl<T: Item> Single<T> {
    pub fn from_publisher(publisher: impl Publisher<T> + 'static, timing: Timing) -> Self { Self { publisher: Arc::new(publisher), timing } }

    pub fn timing(&self) -> Timing { self.timing }

    pub fn publisher(&self) -> Arc<dyn Publisher<T>> { self.publisher.clone() }

    pub fn subscribe_with(&self, subscriber: Arc<dyn Subscriber<T>>) { self.publisher.subscribe(subscriber) }

    pub fn subscribe<F>(&self, on_item: F) -> Disposable
    where F: Fn(T) + Send + Sync + 'static {
        self.to_multi().subscribe(on_item)
    }

    pub fn subscribe_all<N, E, C>(&self, on_item: N, on_error: E, on_complete: C) -> Disposable
    where
        N: Fn(T) + Send + Sync + 'static,
        E: Fn(FlowError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        self.to_multi().subscribe_all(on_item, on_error, on_complete)
    }

    pub fn to_multi(&self) -> Multi<T> { Multi { publisher: self.publisher.clone(), timing: self.timing } }

    pub(crate) fn derive<U: Item>(&self, publisher: impl Publisher<U> + 'static) -> Single<U> { Single::from_publisher(publisher, self.timing) }
}

impl<T> From<Single<T>> for Multi<T> {
    fn from(single: Single<T>) -> Self { Multi { publisher: single.publisher, timing: single.timing } }
}

/// Producers accepted where an operator expects an inner or fallback source
pub trait IntoPublisher<T> {
    fn into_publisher(self) -> Arc<dyn Publisher<T>>;
}

impl<T> IntoPublisher<T> for Multi<T> {
    fn into_publisher(self) -> Arc<dyn Publisher<T>> { self.publisher }
}

impl<T> IntoPublisher<T> for Single<T> {
    fn into_publisher(self) -> Arc<dyn Publisher<T>> { self.publisher }
}

impl<T> IntoPublisher<T> for Arc<dyn Publisher<T>> {
    fn into_publisher(self) -> Arc<dyn Publisher<T>> { self }
}
