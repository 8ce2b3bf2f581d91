use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

use tracing::{debug, trace, warn};

use super::Sink;
use crate::{
    config::SMALL_BUFFER_SIZE,
    error::{FlowError, ProtocolViolation},
    producer::{Item, Multi, Publisher, Timing},
    signal::Terminal,
    subscription::{noop, Subscriber},
    util::{lock, DrainQueue, Push, SubscriptionSlot},
};

/// Multi-subscriber bridge with a bounded queue per subscriber.
///
/// Each subscriber sees the values pushed after it attached, at its own pace. One that
/// falls more than `capacity` values behind is failed with
/// [`ProtocolViolation::BufferOverflow`] without affecting the others.
///
/// Values pushed while nobody is subscribed are held in a backlog of up to `capacity`
/// values and handed to the next subscriber, even one arriving after the terminal. A push
/// into a full backlog is refused with `BufferOverflow`. A value racing a terminal from
/// another thread is either delivered before it or not at all.
pub struct EmitterBridge<T>(Arc<Inner<T>>);

struct Inner<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    ids: AtomicU64,
    upstream: SubscriptionSlot,
}

struct State<T> {
    subscribers: Vec<(u64, DrainQueue<T>)>,
    backlog: VecDeque<T>,
    terminal: Option<Terminal>,
}

impl<T> Clone for EmitterBridge<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: Item + Clone> Default for EmitterBridge<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Inner<T> {
    fn remove(&self, id: u64) { lock(&self.state).subscribers.retain(|(subscriber, _)| *subscriber != id) }
}

impl<T: Item + Clone> EmitterBridge<T> {
    pub fn new() -> Self { Self::with_capacity(SMALL_BUFFER_SIZE) }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(Inner {
            state: Mutex::new(State { subscribers: Vec::new(), backlog: VecDeque::new(), terminal: None }),
            capacity,
            ids: AtomicU64::new(0),
            upstream: SubscriptionSlot::new(),
        }))
    }

    pub fn as_multi(&self) -> Multi<T> { Multi::from_publisher(self.clone(), Timing::Eager) }

    pub fn subscriber_count(&self) -> usize { lock(&self.0.state).subscribers.len() }

    fn terminate(&self, terminal: Terminal) {
        let subscribers = {
            let mut state = lock(&self.0.state);
            if state.terminal.is_some() {
                trace!("EmitterBridge ignoring terminal signal after termination");
                return;
            }
            state.terminal = Some(terminal.clone());
            std::mem::take(&mut state.subscribers)
        };
        debug!("EmitterBridge terminated ({} subscribers)", subscribers.len());
        for (_, queue) in subscribers {
            queue.terminate(terminal.clone());
        }
    }
}

impl<T: Item + Clone> Sink<T> for EmitterBridge<T> {
    fn next(&self, value: T) -> Result<(), ProtocolViolation> {
        let subscribers = {
            let mut state = lock(&self.0.state);
            if state.terminal.is_some() {
                trace!("EmitterBridge ignoring value pushed after termination");
                return Ok(());
            }
            if state.subscribers.is_empty() {
                if state.backlog.len() >= self.0.capacity {
                    let overflow = ProtocolViolation::BufferOverflow(self.0.capacity);
                    warn!("EmitterBridge backlog: {overflow}");
                    return Err(overflow);
                }
                trace!("EmitterBridge holding a value until a subscriber arrives");
                state.backlog.push_back(value);
                return Ok(());
            }
            state.subscribers.clone()
        };
        for (id, queue) in subscribers {
            if queue.push(value.clone()) == Push::Full {
                let overflow = ProtocolViolation::BufferOverflow(self.0.capacity);
                warn!("EmitterBridge subscriber {id}: {overflow}");
                self.0.remove(id);
                queue.terminate_now(Terminal::Error(overflow.into()));
            }
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

impl<T: Item + Clone> Publisher<T> for EmitterBridge<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let id = self.0.ids.fetch_add(1, Ordering::Relaxed);
        let bridge: Weak<Inner<T>> = Arc::downgrade(&self.0);
        let queue = DrainQueue::builder()
            .capacity(self.0.capacity)
            .on_cancel(move || {
                if let Some(bridge) = bridge.upgrade() {
                    bridge.remove(id);
                }
            })
            .build();
        let retained = {
            let mut state = lock(&self.0.state);
            let backlog = std::mem::take(&mut state.backlog);
            if !backlog.is_empty() {
                debug!("EmitterBridge handing {} held values to subscriber {id}", backlog.len());
            }
            for value in backlog {
                queue.push(value);
            }
            match state.terminal.clone() {
                Some(terminal) if queue.is_empty() => Some(terminal),
                Some(terminal) => {
                    queue.terminate(terminal);
                    None
                }
                None => {
                    state.subscribers.push((id, queue.clone()));
                    None
                }
            }
        };
        match retained {
            Some(terminal) => {
                subscriber.on_subscribe(noop());
                terminal.deliver(&*subscriber);
            }
            None => {
                queue.attach(subscriber);
            }
        }
    }
}

super::sink_subscriber!(EmitterBridge, Clone);
