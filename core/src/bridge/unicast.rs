use std::sync::Arc;

use tracing::{trace, warn};

use super::Sink;
use crate::{
    error::{FlowError, ProtocolViolation},
    producer::{Item, Multi, Publisher, Timing},
    signal::Terminal,
    subscription::{fail, Subscriber, Subscription},
    util::{DrainQueue, Push, SubscriptionSlot},
};

/// Single-subscriber bridge. Values pushed before anyone subscribes, or beyond the
/// subscriber's demand, wait in a queue.
///
/// A second subscriber is refused with [`ProtocolViolation::SingleSubscriber`]. With a
/// capacity, pushing into a full queue fails the subscriber with
/// [`ProtocolViolation::BufferOverflow`].
pub struct UnicastBridge<T>(Arc<Inner<T>>);

struct Inner<T> {
    queue: DrainQueue<T>,
    capacity: Option<usize>,
    upstream: Arc<SubscriptionSlot>,
}

impl<T> Clone for UnicastBridge<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: Item> Default for UnicastBridge<T> {
    fn default() -> Self { Self::new() }
}

impl<T: Item> UnicastBridge<T> {
    pub fn new() -> Self { Self::build(None) }

    pub fn with_capacity(capacity: usize) -> Self { Self::build(Some(capacity)) }

    fn build(capacity: Option<usize>) -> Self {
        let upstream = Arc::new(SubscriptionSlot::new());
        let cancel = upstream.clone();
        let mut builder = DrainQueue::builder().on_cancel(move || cancel.cancel());
        if let Some(capacity) = capacity {
            builder = builder.capacity(capacity);
        }
        Self(Arc::new(Inner { queue: builder.build(), capacity, upstream }))
    }

    pub fn as_multi(&self) -> Multi<T> { Multi::from_publisher(self.clone(), Timing::Eager) }

    pub fn has_subscriber(&self) -> bool { self.0.queue.is_attached() }

    /// Values waiting for demand
    pub fn len(&self) -> usize { self.0.queue.len() }

    pub fn is_empty(&self) -> bool { self.0.queue.is_empty() }
}

impl<T: Item> Sink<T> for UnicastBridge<T> {
    fn next(&self, value: T) -> Result<(), ProtocolViolation> {
        match self.0.queue.push(value) {
            Push::Accepted => Ok(()),
            Push::Closed => {
                trace!("UnicastBridge ignoring value pushed after termination");
                Ok(())
            }
            Push::Full => {
                let overflow = ProtocolViolation::BufferOverflow(self.0.capacity.unwrap_or_default());
                warn!("UnicastBridge {overflow}");
                self.0.upstream.cancel();
                self.0.queue.terminate_now(Terminal::Error(overflow.clone().into()));
                Err(overflow)
            }
        }
    }

    fn error(&self, error: FlowError) -> Result<(), ProtocolViolation> {
        if !self.0.queue.terminate(Terminal::Error(error)) {
            trace!("UnicastBridge ignoring error after termination");
        }
        Ok(())
    }

    fn complete(&self) -> Result<(), ProtocolViolation> {
        if !self.0.queue.terminate(Terminal::Complete) {
            trace!("UnicastBridge ignoring completion after termination");
        }
        Ok(())
    }
}

impl<T: Item> Publisher<T> for UnicastBridge<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        if !self.0.queue.attach(subscriber.clone()) {
            warn!("UnicastBridge already has a subscriber");
            fail(&*subscriber, ProtocolViolation::SingleSubscriber("UnicastBridge").into());
        }
    }
}

super::sink_subscriber!(UnicastBridge);
