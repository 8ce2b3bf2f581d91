use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};

use crate::{error::FlowError, recovery::ContinueStrategy};

/// Demand meaning "no limit". Requests saturate here rather than overflow.
pub const UNBOUNDED: u64 = u64::MAX;

/// Demand-negotiation handle shared by a producer (emitter side) and its subscriber (demand side).
pub trait Subscription: Send + Sync {
    /// Grants `n` more values. Accumulates with earlier requests and saturates at [`UNBOUNDED`].
    fn request(&self, n: u64);
    /// Stops delivery and releases producer resources. Idempotent, and a no-op after termination.
    fn cancel(&self);
}

/// Consumer side of the protocol.
///
/// `on_subscribe` is always the first call. `on_next` is only called within granted demand,
/// and at most one of `on_error` / `on_complete` ends the sequence.
pub trait Subscriber<T>: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, value: T);
    fn on_error(&self, error: FlowError);
    fn on_complete(&self);

    /// Strategy installed downstream by `on_error_continue`. Per-value operators forward this
    /// so that a failing transform upstream can drop the value instead of terminating.
    fn continue_strategy(&self) -> Option<ContinueStrategy> { None }
}

/// Observable lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Active(u64),
    Cancelled,
    Terminated,
}

const UNSUBSCRIBED: u8 = 0;
const ACTIVE: u8 = 1;
const CANCELLED: u8 = 2;
const TERMINATED: u8 = 3;

/// Lock-free demand counter plus lifecycle for one subscription.
///
/// Every transition is validated: demand only accumulates before termination, and the first
/// of `cancel` / `terminate` wins.
#[derive(Debug)]
pub struct DemandGate {
    demand: AtomicU64,
    phase: AtomicU8,
}

impl Default for DemandGate {
    fn default() -> Self { Self::new() }
}

impl DemandGate {
    pub fn new() -> Self { Self { demand: AtomicU64::new(0), phase: AtomicU8::new(UNSUBSCRIBED) } }

    pub fn active() -> Self { Self { demand: AtomicU64::new(0), phase: AtomicU8::new(ACTIVE) } }

    pub fn activate(&self) -> bool { self.phase.compare_exchange(UNSUBSCRIBED, ACTIVE, Ordering::AcqRel, Ordering::Acquire).is_ok() }

    pub fn state(&self) -> SubscriptionState {
        match self.phase.load(Ordering::Acquire) {
            UNSUBSCRIBED => SubscriptionState::Unsubscribed,
            ACTIVE => SubscriptionState::Active(self.demand.load(Ordering::Acquire)),
            CANCELLED => SubscriptionState::Cancelled,
            _ => SubscriptionState::Terminated,
        }
    }

    /// Adds demand and returns the previous amount.
    /// `None` when `n` is zero or the subscription has already ended.
    pub fn request(&self, n: u64) -> Option<u64> {
        if n == 0 || self.phase.load(Ordering::Acquire) > ACTIVE {
            return None;
        }
        self.demand.fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_add(n))).ok()
    }

    pub fn demand(&self) -> u64 { self.demand.load(Ordering::Acquire) }

    /// Records `n` delivered values and returns the demand that remains.
    pub fn produced(&self, n: u64) -> u64 {
        match self.demand.fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| (d != UNBOUNDED).then(|| d.saturating_sub(n))) {
            Ok(previous) => previous.saturating_sub(n),
            Err(_) => UNBOUNDED,
        }
    }

    /// Takes one unit of demand if any is outstanding. Always false once the subscription
    /// was cancelled or terminated.
    pub fn try_consume(&self) -> bool {
        if self.is_done() {
            return false;
        }
        self.demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| match d {
                0 => None,
                UNBOUNDED => Some(UNBOUNDED),
                d => Some(d - 1),
            })
            .is_ok()
    }

    /// Returns true for the call that actually cancelled
    pub fn cancel(&self) -> bool { self.transition(CANCELLED) }

    /// Returns true for the call that is allowed to deliver the terminal signal
    pub fn terminate(&self) -> bool { self.transition(TERMINATED) }

    pub fn is_cancelled(&self) -> bool { self.phase.load(Ordering::Acquire) == CANCELLED }

    pub fn is_done(&self) -> bool { self.phase.load(Ordering::Acquire) > ACTIVE }

    fn transition(&self, to: u8) -> bool {
        self.phase.fetch_update(Ordering::AcqRel, Ordering::Acquire, |phase| (phase <= ACTIVE).then_some(to)).is_ok()
    }
}

/// Subscription for producers that are done before anyone could ask for anything
pub(crate) struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

pub(crate) fn noop() -> Arc<dyn Subscription> { Arc::new(NoopSubscription) }

/// Subscribes and immediately fails
pub(crate) fn fail<T>(subscriber: &dyn Subscriber<T>, error: FlowError) {
    subscriber.on_subscribe(noop());
    subscriber.on_error(error);
}

/// Subscribes and immediately completes
pub(crate) fn complete<T>(subscriber: &dyn Subscriber<T>) {
    subscriber.on_subscribe(noop());
    subscriber.on_complete();
}
