use std::{any::Any, sync::Arc};

use tracing::debug;

use crate::{
    error::FlowError,
    producer::{Item, Multi, Publisher},
    subscription::{Subscriber, Subscription},
};

type Predicate = Box<dyn Fn(&FlowError) -> bool + Send + Sync>;
type Handler = Box<dyn Fn(&FlowError, &dyn Any) + Send + Sync>;

/// Installed by `on_error_continue`. A fallible per-value operator upstream (`try_map`)
/// consults it to drop a failing value instead of terminating.
#[derive(Clone)]
pub struct ContinueStrategy(Arc<Strategy>);

struct Strategy {
    predicate: Predicate,
    handler: Handler,
}

impl ContinueStrategy {
    pub fn new<P, H>(predicate: P, handler: H) -> Self
    where
        P: Fn(&FlowError) -> bool + Send + Sync + 'static,
        H: Fn(&FlowError, &dyn Any) + Send + Sync + 'static,
    {
        Self(Arc::new(Strategy { predicate: Box::new(predicate), handler: Box::new(handler) }))
    }

    /// Whether a failure with `error` should be skipped
    pub fn matches(&self, error: &FlowError) -> bool { error.is_recoverable() && (self.0.predicate)(error) }

    /// Reports the dropped value and its error
    pub fn report(&self, error: &FlowError, value: &dyn Any) {
        debug!("on_error_continue dropping a value: {error}");
        (self.0.handler)(error, value)
    }
}

impl std::fmt::Debug for ContinueStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("ContinueStrategy") }
}

struct ContinuePublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    strategy: ContinueStrategy,
}

struct ContinueSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    strategy: ContinueStrategy,
}

impl<T: Item> Publisher<T> for ContinuePublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.upstream.subscribe(Arc::new(ContinueSubscriber { downstream: subscriber, strategy: self.strategy.clone() }))
    }
}

impl<T: Item> Subscriber<T> for ContinueSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.downstream.on_subscribe(subscription) }
    fn on_next(&self, value: T) { self.downstream.on_next(value) }
    fn on_error(&self, error: FlowError) { self.downstream.on_error(error) }
    fn on_complete(&self) { self.downstream.on_complete() }
    fn continue_strategy(&self) -> Option<ContinueStrategy> { Some(self.strategy.clone()) }
}

/// Adapts a typed handler; values of another type are reported without the value
fn typed<V: 'static>(handler: impl Fn(&FlowError, &V) + Send + Sync + 'static) -> impl Fn(&FlowError, &dyn Any) + Send + Sync + 'static {
    move |error: &FlowError, value: &dyn Any| match value.downcast_ref::<V>() {
        Some(value) => handler(error, value),
        None => debug!("on_error_continue handler expects a different value type; skipped report of {error}"),
    }
}

impl<T: Item> Multi<T> {
    /// Drops values whose transform failed, reporting each failure with the value that
    /// caused it, and keeps going.
    pub fn on_error_continue<V, H>(&self, handler: H) -> Multi<T>
    where
        V: 'static,
        H: Fn(&FlowError, &V) + Send + Sync + 'static,
    {
        self.on_error_continue_if(|_| true, handler)
    }

    /// As [`Multi::on_error_continue`], for errors accepted by `predicate`
    pub fn on_error_continue_if<V, P, H>(&self, predicate: P, handler: H) -> Multi<T>
    where
        V: 'static,
        P: Fn(&FlowError) -> bool + Send + Sync + 'static,
        H: Fn(&FlowError, &V) + Send + Sync + 'static,
    {
        self.derive(ContinuePublisher { upstream: self.publisher(), strategy: ContinueStrategy::new(predicate, typed(handler)) })
    }
}
