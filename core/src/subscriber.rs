use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::error;

use crate::{
    error::FlowError,
    subscription::{Subscriber, Subscription, UNBOUNDED},
    util::SubscriptionSlot,
};

type OnError = Box<dyn Fn(FlowError) + Send + Sync>;
type OnComplete = Box<dyn Fn() + Send + Sync>;

/// Callback subscriber behind `subscribe` and `subscribe_all`. Requests unbounded demand.
pub(crate) struct LambdaSubscriber<T> {
    on_next: Box<dyn Fn(T) + Send + Sync>,
    on_error: Option<OnError>,
    on_complete: Option<OnComplete>,
    slot: Arc<SubscriptionSlot>,
    done: AtomicBool,
}

impl<T> LambdaSubscriber<T> {
    pub fn new(on_next: impl Fn(T) + Send + Sync + 'static, on_error: Option<OnError>, on_complete: Option<OnComplete>) -> Self {
        Self { on_next: Box::new(on_next), on_error, on_complete, slot: Arc::new(SubscriptionSlot::new()), done: AtomicBool::new(false) }
    }

    pub fn disposable(&self) -> Disposable { Disposable { slot: self.slot.clone() } }
}

impl<T: Send> Subscriber<T> for LambdaSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.slot.set(subscription) {
            self.slot.request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: T) {
        if !self.done.load(Ordering::Acquire) && !self.slot.is_cancelled() {
            (self.on_next)(value)
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) || self.slot.is_cancelled() {
            return;
        }
        match &self.on_error {
            Some(on_error) => on_error(error),
            None => error!("unhandled error signal: {error}"),
        }
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) || self.slot.is_cancelled() {
            return;
        }
        if let Some(on_complete) = &self.on_complete {
            on_complete()
        }
    }
}

/// Handle returned by `subscribe`; disposing cancels the subscription
#[derive(Clone)]
pub struct Disposable {
    slot: Arc<SubscriptionSlot>,
}

impl Disposable {
    pub(crate) fn from_slot(slot: Arc<SubscriptionSlot>) -> Self { Self { slot } }

    pub fn dispose(&self) { self.slot.cancel() }

    pub fn is_disposed(&self) -> bool { self.slot.is_cancelled() }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("Disposable").field("disposed", &self.is_disposed()).finish() }
}
