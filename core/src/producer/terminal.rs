use std::sync::Arc;

use super::{Item, Multi, Publisher, Single, Timing};
use crate::{
    error::FlowError,
    subscription::{self, Subscriber},
};

struct Empty;
struct Failed(FlowError);
struct Never;

impl<T> Publisher<T> for Empty {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) { subscription::complete(&*subscriber) }
}

impl<T> Publisher<T> for Failed {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) { subscription::fail(&*subscriber, self.0.clone()) }
}

impl<T> Publisher<T> for Never {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) { subscriber.on_subscribe(subscription::noop()) }
}

impl<T: Item> Multi<T> {
    /// Completes immediately
    pub fn empty() -> Self { Multi::from_publisher(Empty, Timing::Eager) }

    /// Fails every subscriber with `error`
    pub fn error(error: impl Into<FlowError>) -> Self { Multi::from_publisher(Failed(error.into()), Timing::Eager) }

    /// Emits nothing and never terminates
    pub fn never() -> Self { Multi::from_publisher(Never, Timing::Eager) }
}

impl<T: Item> Single<T> {
    pub fn empty() -> Self { Single::from_publisher(Empty, Timing::Eager) }

    pub fn error(error: impl Into<FlowError>) -> Self { Single::from_publisher(Failed(error.into()), Timing::Eager) }

    pub fn never() -> Self { Single::from_publisher(Never, Timing::Eager) }
}
