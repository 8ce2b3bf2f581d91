use std::sync::Arc;

use super::{IntoPublisher, Item, Multi, Publisher, Single, Timing};
use crate::{error::FlowError, subscription::Subscriber, util::ScalarSubscription};

type Factory<T> = Arc<dyn Fn() -> Arc<dyn Publisher<T>> + Send + Sync>;
type Callable<T> = Arc<dyn Fn() -> Result<T, FlowError> + Send + Sync>;

/// How a constructed producer obtains what it emits
pub enum Construction<T> {
    /// A value captured when the producer was built
    Eager(T),
    /// A producer built anew for each subscription
    Factory(Factory<T>),
    /// A computation run for each subscription
    Callable(Callable<T>),
}

impl<T> Construction<T> {
    pub fn timing(&self) -> Timing {
        match self {
            Construction::Eager(_) => Timing::Eager,
            Construction::Factory(_) | Construction::Callable(_) => Timing::Deferred,
        }
    }
}

impl<T: Item + Clone> Publisher<T> for Construction<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        match self {
            Construction::Factory(factory) => factory().subscribe(subscriber),
            Construction::Eager(value) => {
                let scalar = ScalarSubscription::new(subscriber);
                scalar.downstream().on_subscribe(scalar.clone());
                scalar.complete(Some(value.clone()));
            }
            Construction::Callable(callable) => {
                let scalar = ScalarSubscription::new(subscriber);
                scalar.downstream().on_subscribe(scalar.clone());
                match callable() {
                    Ok(value) => scalar.complete(Some(value)),
                    Err(error) => scalar.error(error),
                }
            }
        }
    }
}

impl<T: Item + Clone> Single<T> {
    /// Emits `value`, which was computed before this call
    pub fn just(value: T) -> Self { Self::construct(Construction::Eager(value)) }

    /// Runs `callable` on every subscription and emits its result
    pub fn from_callable<F>(callable: F) -> Self
    where F: Fn() -> Result<T, FlowError> + Send + Sync + 'static {
        Self::construct(Construction::Callable(Arc::new(callable)))
    }

    /// Builds the producer to subscribe to on every subscription
    pub fn defer<F>(factory: F) -> Self
    where F: Fn() -> Single<T> + Send + Sync + 'static {
        Self::construct(Construction::Factory(Arc::new(move || factory().into_publisher())))
    }

    pub fn construct(construction: Construction<T>) -> Self {
        let timing = construction.timing();
        Single::from_publisher(construction, timing)
    }
}

impl<T: Item> Multi<T> {
    /// Builds the producer to subscribe to on every subscription
    pub fn defer<F>(factory: F) -> Self
    where F: Fn() -> Multi<T> + Send + Sync + 'static {
        Multi::from_publisher(DeferredMulti(Arc::new(move || factory().into_publisher())), Timing::Deferred)
    }
}

/// `Construction::Factory` without the `Clone` bound the scalar variants need
struct DeferredMulti<T>(Factory<T>);

impl<T: Item> Publisher<T> for DeferredMulti<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) { (self.0)().subscribe(subscriber) }
}
