use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
};

use tracing::{debug, trace, warn};

use super::Sink;
use crate::{
    error::{FlowError, ProtocolViolation},
    producer::{Item, Multi, Publisher, Timing},
    signal::Terminal,
    subscription::{noop, DemandGate, Subscriber, Subscription},
    util::{lock, SubscriptionSlot},
};

/// Unbuffered hot bridge. Each value goes straight to every subscriber that has demand for
/// it; a subscriber without demand is failed with [`ProtocolViolation::MissingDemand`] and
/// dropped from the bridge.
///
/// Pushes from any thread are serialized: one caller at a time drains the pending signals,
/// so a value accepted before the terminal is always delivered before it.
pub struct DirectBridge<T>(Arc<Inner<T>>);

struct Inner<T> {
    state: Mutex<State<T>>,
    ids: AtomicU64,
    wip: AtomicUsize,
    upstream: SubscriptionSlot,
}

struct State<T> {
    subscribers: Vec<Arc<DirectSubscription<T>>>,
    pending: VecDeque<T>,
    terminal: Option<Terminal>,
    terminal_sent: bool,
}

enum Emission<T> {
    Value(T, Vec<Arc<DirectSubscription<T>>>),
    Terminal(Terminal, Vec<Arc<DirectSubscription<T>>>),
}

struct DirectSubscription<T> {
    id: u64,
    gate: DemandGate,
    downstream: Arc<dyn Subscriber<T>>,
    bridge: Weak<Inner<T>>,
}

impl<T> Clone for DirectBridge<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: Item + Clone> Default for DirectBridge<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Inner<T> {
    fn remove(&self, id: u64) { lock(&self.state).subscribers.retain(|s| s.id != id) }
}

impl<T: Item + Clone> DirectBridge<T> {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            state: Mutex::new(State { subscribers: Vec::new(), pending: VecDeque::new(), terminal: None, terminal_sent: false }),
            ids: AtomicU64::new(0),
            wip: AtomicUsize::new(0),
            upstream: SubscriptionSlot::new(),
        }))
    }

    pub fn as_multi(&self) -> Multi<T> { Multi::from_publisher(self.clone(), Timing::Eager) }

    pub fn subscriber_count(&self) -> usize { lock(&self.0.state).subscribers.len() }

    pub fn is_terminated(&self) -> bool { lock(&self.0.state).terminal.is_some() }

    fn terminate(&self, terminal: Terminal) -> Result<(), ProtocolViolation> {
        {
            let mut state = lock(&self.0.state);
            if state.terminal.is_some() {
                trace!("DirectBridge ignoring terminal signal after termination");
                return Err(ProtocolViolation::Terminated);
            }
            state.terminal = Some(terminal);
        }
        self.drain();
        Ok(())
    }

    /// Delivers pending signals in push order. Only one thread drains at a time; pushes that
    /// arrive meanwhile are picked up by the thread already draining.
    fn drain(&self) {
        if self.0.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            while let Some(emission) = self.next_emission() {
                match emission {
                    Emission::Value(value, subscribers) => self.emit(value, subscribers),
                    Emission::Terminal(terminal, subscribers) => {
                        debug!("DirectBridge terminated ({} subscribers)", subscribers.len());
                        for subscription in subscribers {
                            if subscription.gate.terminate() {
                                terminal.clone().deliver(&*subscription.downstream);
                            }
                        }
                    }
                }
            }
            missed = self.0.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn next_emission(&self) -> Option<Emission<T>> {
        let mut state = lock(&self.0.state);
        if let Some(value) = state.pending.pop_front() {
            return Some(Emission::Value(value, state.subscribers.clone()));
        }
        match &state.terminal {
            Some(terminal) if !state.terminal_sent => {
                let terminal = terminal.clone();
                state.terminal_sent = true;
                Some(Emission::Terminal(terminal, std::mem::take(&mut state.subscribers)))
            }
            _ => None,
        }
    }

    fn emit(&self, value: T, subscribers: Vec<Arc<DirectSubscription<T>>>) {
        if subscribers.is_empty() {
            trace!("DirectBridge dropped a value with no subscribers");
        }
        for subscription in subscribers {
            if subscription.gate.try_consume() {
                subscription.downstream.on_next(value.clone());
            } else if subscription.gate.terminate() {
                warn!("DirectBridge subscriber {} has no outstanding demand", subscription.id);
                self.0.remove(subscription.id);
                subscription.downstream.on_error(ProtocolViolation::MissingDemand.into());
            }
        }
    }
}

impl<T: Item + Clone> Sink<T> for DirectBridge<T> {
    fn next(&self, value: T) -> Result<(), ProtocolViolation> {
        {
            let mut state = lock(&self.0.state);
            if state.terminal.is_some() {
                trace!("DirectBridge ignoring value pushed after termination");
                return Err(ProtocolViolation::Terminated);
            }
            state.pending.push_back(value);
        }
        self.drain();
        Ok(())
    }

    fn error(&self, error: FlowError) -> Result<(), ProtocolViolation> { self.terminate(Terminal::Error(error)) }

    fn complete(&self) -> Result<(), ProtocolViolation> { self.terminate(Terminal::Complete) }
}

impl<T: Item + Clone> Publisher<T> for DirectBridge<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let retained = lock(&self.0.state).terminal.clone();
        if let Some(terminal) = retained {
            subscriber.on_subscribe(noop());
            return terminal.deliver(&*subscriber);
        }
        let subscription = Arc::new(DirectSubscription {
            id: self.0.ids.fetch_add(1, Ordering::Relaxed),
            gate: DemandGate::active(),
            downstream: subscriber.clone(),
            bridge: Arc::downgrade(&self.0),
        });
        subscriber.on_subscribe(subscription.clone());
        // a terminal may have landed while on_subscribe ran
        let retained = {
            let mut state = lock(&self.0.state);
            match &state.terminal {
                Some(terminal) => Some(terminal.clone()),
                None if subscription.gate.is_done() => None,
                None => {
                    state.subscribers.push(subscription.clone());
                    None
                }
            }
        };
        if let Some(terminal) = retained {
            if subscription.gate.terminate() {
                terminal.deliver(&*subscriber);
            }
        }
    }
}

impl<T: Item> Subscription for DirectSubscription<T> {
    fn request(&self, n: u64) { self.gate.request(n); }

    fn cancel(&self) {
        if self.gate.cancel() {
            if let Some(bridge) = self.bridge.upgrade() {
                bridge.remove(self.id);
            }
        }
    }
}

super::sink_subscriber!(DirectBridge, Clone);
