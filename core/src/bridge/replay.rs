use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
};

use tracing::{debug, trace};

use super::Sink;
use crate::{
    error::{FlowError, ProtocolViolation},
    producer::{Item, Multi, Publisher, Timing},
    signal::Terminal,
    subscription::{DemandGate, Subscriber, Subscription},
    util::{lock, SubscriptionSlot},
};

/// Multi-subscriber bridge that remembers what it has seen.
///
/// A subscriber first receives the retained history, then live values, each at its own
/// pace. With a capacity only the most recent `capacity` values are retained; a subscriber
/// that lags behind the window skips to its oldest retained value.
pub struct ReplayBridge<T>(Arc<Inner<T>>);

struct Inner<T> {
    state: Mutex<State<T>>,
    ids: AtomicU64,
    upstream: SubscriptionSlot,
}

struct State<T> {
    history: VecDeque<T>,
    /// Values dropped off the front of `history`, so absolute index = evicted + offset
    evicted: u64,
    capacity: Option<usize>,
    terminal: Option<Terminal>,
    subscribers: Vec<Arc<ReplaySubscription<T>>>,
}

enum Step<T> {
    Value(T),
    Terminal(Terminal),
    Idle,
}

impl<T: Clone> State<T> {
    fn push(&mut self, value: T) {
        self.history.push_back(value);
        if matches!(self.capacity, Some(capacity) if self.history.len() > capacity) {
            self.history.pop_front();
            self.evicted += 1;
        }
    }

    fn step(&self, cursor: &mut u64, has_demand: bool) -> Step<T> {
        *cursor = (*cursor).max(self.evicted);
        let offset = (*cursor - self.evicted) as usize;
        match self.history.get(offset) {
            Some(_) if !has_demand => Step::Idle,
            Some(value) => {
                *cursor += 1;
                Step::Value(value.clone())
            }
            None => match &self.terminal {
                Some(terminal) => Step::Terminal(terminal.clone()),
                None => Step::Idle,
            },
        }
    }
}

struct ReplaySubscription<T> {
    id: u64,
    downstream: Arc<dyn Subscriber<T>>,
    bridge: Weak<Inner<T>>,
    cursor: AtomicU64,
    gate: DemandGate,
    wip: AtomicUsize,
}

impl<T> Clone for ReplayBridge<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Inner<T> {
    fn remove(&self, id: u64) { lock(&self.state).subscribers.retain(|s| s.id != id) }
}

impl<T: Item + Clone> ReplayBridge<T> {
    /// Retains the last `capacity` values
    pub fn new(capacity: usize) -> Self { Self::build(Some(capacity)) }

    /// Retains everything
    pub fn unbounded() -> Self { Self::build(None) }

    /// Retains only the most recent value
    pub fn latest() -> Self { Self::new(1) }

    fn build(capacity: Option<usize>) -> Self {
        let state = State { history: VecDeque::new(), evicted: 0, capacity, terminal: None, subscribers: Vec::new() };
        Self(Arc::new(Inner { state: Mutex::new(state), ids: AtomicU64::new(0), upstream: SubscriptionSlot::new() }))
    }

    pub fn as_multi(&self) -> Multi<T> { Multi::from_publisher(self.clone(), Timing::Eager) }

    pub fn subscriber_count(&self) -> usize { lock(&self.0.state).subscribers.len() }

    /// The retained values, oldest first
    pub fn history(&self) -> Vec<T> { lock(&self.0.state).history.iter().cloned().collect() }

    fn terminate(&self, terminal: Terminal) {
        let subscribers = {
            let mut state = lock(&self.0.state);
            if state.terminal.is_some() {
                trace!("ReplayBridge ignoring terminal signal after termination");
                return;
            }
            state.terminal = Some(terminal);
            state.subscribers.clone()
        };
        debug!("ReplayBridge terminated ({} subscribers)", subscribers.len());
        for subscription in subscribers {
            subscription.drain();
        }
    }
}

impl<T: Item + Clone> ReplaySubscription<T> {
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let Some(bridge) = self.bridge.upgrade() else { return };
        let mut missed = 1;
        loop {
            loop {
                if self.gate.is_done() {
                    return;
                }
                let step = {
                    let state = lock(&bridge.state);
                    let mut cursor = self.cursor.load(Ordering::Acquire);
                    let step = state.step(&mut cursor, self.gate.demand() > 0);
                    self.cursor.store(cursor, Ordering::Release);
                    step
                };
                match step {
                    Step::Value(value) => {
                        self.gate.produced(1);
                        self.downstream.on_next(value);
                    }
                    Step::Terminal(terminal) => {
                        if self.gate.terminate() {
                            bridge.remove(self.id);
                            terminal.deliver(&*self.downstream);
                        }
                        return;
                    }
                    Step::Idle => break,
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }
}

impl<T: Item + Clone> Subscription for ReplaySubscription<T> {
    fn request(&self, n: u64) {
        if self.gate.request(n).is_some() {
            self.drain();
        }
    }

    fn cancel(&self) {
        if self.gate.cancel() {
            if let Some(bridge) = self.bridge.upgrade() {
                bridge.remove(self.id);
            }
        }
    }
}

impl<T: Item + Clone> Sink<T> for ReplayBridge<T> {
    fn next(&self, value: T) -> Result<(), ProtocolViolation> {
        let subscribers = {
            let mut state = lock(&self.0.state);
            if state.terminal.is_some() {
                trace!("ReplayBridge ignoring value pushed after termination");
                return Ok(());
            }
            state.push(value);
            state.subscribers.clone()
        };
        for subscription in subscribers {
            subscription.drain();
        }
        Ok(())
    }

    fn error(&self, error: FlowError) -> Result<(), ProtocolViolation> {
        self.terminate(Terminal::Error(error));
        Ok(())
    }

    fn complete(&self) -> Result<(), ProtocolViolation> {
        self.terminate(Terminal::Complete);
        Ok(())
    }
}

impl<T: Item + Clone> Publisher<T> for ReplayBridge<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let subscription = Arc::new(ReplaySubscription {
            id: self.0.ids.fetch_add(1, Ordering::Relaxed),
            downstream: subscriber.clone(),
            bridge: Arc::downgrade(&self.0),
            cursor: AtomicU64::new(0),
            gate: DemandGate::active(),
            wip: AtomicUsize::new(0),
        });
        subscriber.on_subscribe(subscription.clone());
        {
            let mut state = lock(&self.0.state);
            if state.terminal.is_none() && !subscription.gate.is_done() {
                state.subscribers.push(subscription.clone());
            }
        }
        subscription.drain();
    }
}

super::sink_subscriber!(ReplayBridge, Clone);
