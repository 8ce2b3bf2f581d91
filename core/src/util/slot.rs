use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, OnceLock,
};

use crate::subscription::Subscription;

/// Holds an upstream subscription that may arrive after demand or cancellation was already issued.
///
/// Requests made before `set` are accumulated and forwarded once the subscription is installed.
/// A cancel before `set` cancels whatever is installed later.
#[derive(Default)]
pub struct SubscriptionSlot {
    upstream: OnceLock<Arc<dyn Subscription>>,
    pending: AtomicU64,
    cancelled: AtomicBool,
}

impl SubscriptionSlot {
    pub fn new() -> Self { Self::default() }

    /// Installs the upstream subscription.
    ///
    /// Returns false, cancelling `subscription`, when the slot is already filled (a duplicate
    /// `on_subscribe`) or has been cancelled.
    pub fn set(&self, subscription: Arc<dyn Subscription>) -> bool {
        if self.upstream.set(subscription.clone()).is_err() {
            tracing::warn!("duplicate on_subscribe, cancelling the extra subscription");
            subscription.cancel();
            return false;
        }
        if self.cancelled.load(Ordering::Acquire) {
            subscription.cancel();
            return false;
        }
        self.flush(&subscription);
        true
    }

    pub fn get(&self) -> Option<&Arc<dyn Subscription>> { self.upstream.get() }

    pub fn is_set(&self) -> bool { self.upstream.get().is_some() }

    pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }

    fn flush(&self, upstream: &Arc<dyn Subscription>) {
        let pending = self.pending.swap(0, Ordering::AcqRel);
        if pending > 0 {
            upstream.request(pending);
        }
    }
}

impl Subscription for SubscriptionSlot {
    fn request(&self, n: u64) {
        if n == 0 || self.is_cancelled() {
            return;
        }
        if let Some(upstream) = self.upstream.get() {
            upstream.request(n);
            return;
        }
        let _ = self.pending.fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some(p.saturating_add(n)));
        // `set` may have raced past the pending swap
        if let Some(upstream) = self.upstream.get() {
            self.flush(upstream);
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(upstream) = self.upstream.get() {
            upstream.cancel();
        }
    }
}
