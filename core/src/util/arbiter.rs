use std::sync::{Arc, Mutex};

use super::lock;
use crate::subscription::{Subscription, UNBOUNDED};

/// Presents a sequence of upstream subscriptions to the subscriber as a single one.
///
/// Used wherever an operator moves from one source to the next (concatenation, fallbacks,
/// retries). Outstanding demand is carried over: a newly set subscription is asked for
/// whatever the previous ones did not deliver.
#[derive(Default)]
pub struct SubscriptionArbiter {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    current: Option<Arc<dyn Subscription>>,
    requested: u64,
    cancelled: bool,
}

impl SubscriptionArbiter {
    pub fn new() -> Self { Self::default() }

    /// Switches to `subscription`. The previous one is assumed finished and is not cancelled.
    pub fn set(&self, subscription: Arc<dyn Subscription>) {
        let requested = {
            let mut state = lock(&self.state);
            if state.cancelled {
                None
            } else {
                state.current = Some(subscription.clone());
                Some(state.requested)
            }
        };
        match requested {
            None => subscription.cancel(),
            Some(0) => {}
            Some(n) => subscription.request(n),
        }
    }

    /// Records `n` values delivered by the current subscription
    pub fn produced(&self, n: u64) {
        let mut state = lock(&self.state);
        if state.requested != UNBOUNDED {
            state.requested = state.requested.saturating_sub(n);
        }
    }

    pub fn requested(&self) -> u64 { lock(&self.state).requested }

    pub fn is_cancelled(&self) -> bool { lock(&self.state).cancelled }
}

impl Subscription for SubscriptionArbiter {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let current = {
            let mut state = lock(&self.state);
            if state.cancelled {
                return;
            }
            state.requested = state.requested.saturating_add(n);
            state.current.clone()
        };
        if let Some(current) = current {
            current.request(n);
        }
    }

    fn cancel(&self) {
        let current = {
            let mut state = lock(&self.state);
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.current.take()
        };
        if let Some(current) = current {
            current.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counting {
        requested: AtomicU64,
        cancelled: AtomicU64,
    }

    impl Subscription for Counting {
        fn request(&self, n: u64) { self.requested.fetch_add(n, Ordering::SeqCst); }
        fn cancel(&self) { self.cancelled.fetch_add(1, Ordering::SeqCst); }
    }

    #[test]
    fn outstanding_demand_moves_to_next_subscription() {
        let arbiter = SubscriptionArbiter::new();
        arbiter.request(5);

        let first = Arc::new(Counting::default());
        arbiter.set(first.clone());
        assert_eq!(first.requested.load(Ordering::SeqCst), 5);

        arbiter.produced(3);
        let second = Arc::new(Counting::default());
        arbiter.set(second.clone());
        assert_eq!(second.requested.load(Ordering::SeqCst), 2);

        arbiter.request(4);
        assert_eq!(second.requested.load(Ordering::SeqCst), 6);
        assert_eq!(first.requested.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn unbounded_demand_is_never_decremented() {
        let arbiter = SubscriptionArbiter::new();
        arbiter.request(UNBOUNDED);
        arbiter.produced(1_000);
        assert_eq!(arbiter.requested(), UNBOUNDED);
    }

    #[test]
    fn cancel_reaches_current_and_rejects_later_ones() {
        let arbiter = SubscriptionArbiter::new();
        let first = Arc::new(Counting::default());
        arbiter.set(first.clone());
        arbiter.cancel();
        arbiter.cancel();
        assert_eq!(first.cancelled.load(Ordering::SeqCst), 1);

        let late = Arc::new(Counting::default());
        arbiter.set(late.clone());
        assert_eq!(late.cancelled.load(Ordering::SeqCst), 1);
        assert!(arbiter.is_cancelled());
    }
}
