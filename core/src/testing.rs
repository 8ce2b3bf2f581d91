//! Test support: a subscriber that records everything it receives and checks the protocol.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Duration,
};

use tokio::sync::watch;

use crate::{
    error::FlowError,
    subscription::{Subscriber, Subscription, UNBOUNDED},
    util::lock,
};

/// Recording subscriber with manual demand control.
///
/// Clones share state, so one clone can be handed to a pipeline via
/// [`subscriber`](Self::subscriber) while another is inspected.
pub struct TestSubscriber<T>(Arc<Recorder<T>>);

struct Recorder<T> {
    initial: u64,
    subscription: OnceLock<Arc<dyn Subscription>>,
    pending: AtomicU64,
    outstanding: AtomicU64,
    values: Mutex<Vec<T>>,
    errors: Mutex<Vec<FlowError>>,
    completions: AtomicUsize,
    done: AtomicBool,
    violations: Mutex<Vec<String>>,
    threads: Mutex<Vec<String>>,
    terminated: watch::Sender<bool>,
}

impl<T> Clone for TestSubscriber<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: Send + Sync + 'static> Default for TestSubscriber<T> {
    fn default() -> Self { Self::new() }
}

impl<T: Send + Sync + 'static> TestSubscriber<T> {
    /// Requests unbounded demand as soon as it is subscribed
    pub fn new() -> Self { Self::with_request(UNBOUNDED) }

    /// Requests `n` on subscribe; zero requests nothing
    pub fn with_request(n: u64) -> Self {
        Self(Arc::new(Recorder {
            initial: n,
            subscription: OnceLock::new(),
            pending: AtomicU64::new(0),
            outstanding: AtomicU64::new(0),
            values: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            violations: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            terminated: watch::channel(false).0,
        }))
    }

    pub fn subscriber(&self) -> Arc<dyn Subscriber<T>> { self.0.clone() }

    pub fn request(&self, n: u64) {
        match self.0.subscription.get() {
            Some(subscription) => {
                self.0.add_demand(n);
                subscription.request(n);
            }
            None => {
                self.0.pending.fetch_add(n, Ordering::AcqRel);
            }
        }
    }

    pub fn cancel(&self) {
        if let Some(subscription) = self.0.subscription.get() {
            subscription.cancel();
        }
    }

    pub fn values(&self) -> Vec<T>
    where T: Clone {
        lock(&self.0.values).clone()
    }

    pub fn errors(&self) -> Vec<FlowError> { lock(&self.0.errors).clone() }

    pub fn error(&self) -> Option<FlowError> { lock(&self.0.errors).first().cloned() }

    pub fn is_complete(&self) -> bool { self.completions() > 0 }

    pub fn completions(&self) -> usize { self.0.completions.load(Ordering::Acquire) }

    pub fn is_terminated(&self) -> bool { self.0.done.load(Ordering::Acquire) }

    /// Protocol breaches observed so far, as readable descriptions
    pub fn violations(&self) -> Vec<String> { lock(&self.0.violations).clone() }

    /// Name of the thread each signal arrived on, in arrival order
    pub fn threads(&self) -> Vec<String> { lock(&self.0.threads).clone() }

    /// Waits for a terminal signal; false if none arrived within `timeout`
    pub async fn await_terminal(&self, timeout: Duration) -> bool {
        let mut terminated = self.0.terminated.subscribe();
        // bound to a local so the borrow of `terminated` ends before it drops
        #[allow(clippy::let_and_return)]
        let reached = matches!(tokio::time::timeout(timeout, terminated.wait_for(|done| *done)).await, Ok(Ok(_)));
        reached
    }
}

impl<T> Recorder<T> {
    fn add_demand(&self, n: u64) {
        let _ = self.outstanding.fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_add(n)));
    }

    fn violation(&self, description: impl Into<String>) { lock(&self.violations).push(description.into()) }

    fn observe(&self) {
        let thread = std::thread::current().name().unwrap_or("unnamed").to_string();
        lock(&self.threads).push(thread);
        if self.subscription.get().is_none() {
            self.violation("signal before on_subscribe");
        }
    }

    fn terminal(&self, kind: &str) {
        self.observe();
        if self.done.swap(true, Ordering::AcqRel) {
            self.violation(format!("{kind} after terminal signal"));
        }
    }
}

impl<T: Send + Sync + 'static> Subscriber<T> for Recorder<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.subscription.set(subscription.clone()).is_err() {
            self.violation("duplicate on_subscribe");
            subscription.cancel();
            return;
        }
        let n = self.initial.saturating_add(self.pending.swap(0, Ordering::AcqRel));
        if n > 0 {
            self.add_demand(n);
            subscription.request(n);
        }
    }

    fn on_next(&self, value: T) {
        self.observe();
        if self.done.load(Ordering::Acquire) {
            self.violation("onNext after terminal signal");
        }
        let consumed = self.outstanding.fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| match d {
            0 => None,
            UNBOUNDED => Some(UNBOUNDED),
            d => Some(d - 1),
        });
        if consumed.is_err() {
            self.violation("onNext beyond requested demand");
        }
        lock(&self.values).push(value);
    }

    fn on_error(&self, error: FlowError) {
        lock(&self.errors).push(error);
        self.terminal("onError");
        self.terminated.send_replace(true);
    }

    fn on_complete(&self) {
        self.completions.fetch_add(1, Ordering::AcqRel);
        self.terminal("onComplete");
        self.terminated.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::noop;

    #[test]
    fn flags_values_beyond_demand_and_after_terminal() {
        let recorder = TestSubscriber::with_request(1);
        let subscriber = recorder.subscriber();
        subscriber.on_subscribe(noop());
        subscriber.on_next(1);
        subscriber.on_next(2);
        subscriber.on_complete();
        subscriber.on_complete();
        assert_eq!(recorder.values(), vec![1, 2]);
        assert_eq!(recorder.completions(), 2);
        assert_eq!(recorder.violations(), vec!["onNext beyond requested demand", "onComplete after terminal signal"]);
    }

    #[test]
    fn flags_signals_before_subscription() {
        let recorder = TestSubscriber::<u8>::new();
        recorder.subscriber().on_error(FlowError::msg("early"));
        assert_eq!(recorder.violations(), vec!["signal before on_subscribe"]);
        assert!(recorder.is_terminated());
    }
}
