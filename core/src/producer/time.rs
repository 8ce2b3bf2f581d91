use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};

use tracing::warn;

use super::{Multi, Publisher, Single, Timing};
use crate::{
    error::ProtocolViolation,
    scheduler::{Scheduler, TaskHandle},
    subscription::{DemandGate, Subscriber, Subscription},
    util::ScalarSubscription,
};

/// Cancels a pending timer when the subscription is cancelled
struct TimerSubscription(TaskHandle);

impl Subscription for TimerSubscription {
    fn request(&self, _n: u64) {}
    fn cancel(&self) { self.0.cancel() }
}

struct Delay {
    after: Duration,
    scheduler: Scheduler,
}

impl Publisher<u64> for Delay {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<u64>>) {
        let scalar = ScalarSubscription::new(subscriber);
        scalar.downstream().on_subscribe(scalar.clone());
        let target = scalar.clone();
        let timer = self.scheduler.schedule_after(self.after, move || target.complete(Some(0)));
        scalar.upstream().set(Arc::new(TimerSubscription(timer)));
    }
}

impl Single<u64> {
    /// Emits `0` after `after` on the parallel pool
    pub fn delay(after: Duration) -> Self { Self::delay_on(after, Scheduler::parallel()) }

    pub fn delay_on(after: Duration, scheduler: Scheduler) -> Self { Single::from_publisher(Delay { after, scheduler }, Timing::Deferred) }
}

struct Interval {
    period: Duration,
    scheduler: Scheduler,
}

struct IntervalSubscription {
    downstream: Arc<dyn Subscriber<u64>>,
    gate: DemandGate,
    ticks: AtomicU64,
    timer: OnceLock<TaskHandle>,
}

impl IntervalSubscription {
    fn tick(&self) {
        if self.gate.is_done() {
            return;
        }
        if self.gate.try_consume() {
            self.downstream.on_next(self.ticks.fetch_add(1, Ordering::AcqRel));
        } else if self.gate.terminate() {
            warn!("interval tick {} has no outstanding demand", self.ticks.load(Ordering::Acquire));
            self.stop();
            self.downstream.on_error(ProtocolViolation::MissingDemand.into());
        }
    }

    fn stop(&self) {
        if let Some(timer) = self.timer.get() {
            timer.cancel();
        }
    }
}

impl Subscription for IntervalSubscription {
    fn request(&self, n: u64) { self.gate.request(n); }

    fn cancel(&self) {
        if self.gate.cancel() {
            self.stop();
        }
    }
}

impl Publisher<u64> for Interval {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<u64>>) {
        let subscription = Arc::new(IntervalSubscription { downstream: subscriber.clone(), gate: DemandGate::active(), ticks: AtomicU64::new(0), timer: OnceLock::new() });
        subscriber.on_subscribe(subscription.clone());
        let ticking = Arc::downgrade(&subscription);
        let timer = self.scheduler.schedule_periodically(self.period, self.period, move || {
            if let Some(subscription) = ticking.upgrade() {
                subscription.tick();
            }
        });
        let _ = subscription.timer.set(timer);
        // cancelled or failed before the timer was stored
        if subscription.gate.is_done() {
            subscription.stop();
        }
    }
}

impl Multi<u64> {
    /// Emits 0, 1, 2, ... every `period` on the parallel pool.
    ///
    /// A tick with no outstanding demand fails the subscription with
    /// [`ProtocolViolation::MissingDemand`].
    pub fn interval(period: Duration) -> Self { Self::interval_on(period, Scheduler::parallel()) }

    pub fn interval_on(period: Duration, scheduler: Scheduler) -> Self { Multi::from_publisher(Interval { period, scheduler }, Timing::Deferred) }
}
