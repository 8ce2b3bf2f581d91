use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use super::lock;
use crate::{
    scheduler::Scheduler,
    signal::Terminal,
    subscription::{DemandGate, Subscriber, Subscription},
};

/// Outcome of [`DrainQueue::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Accepted,
    /// The bounded buffer is at capacity; the value was not queued
    Full,
    /// The queue has terminated or been cancelled; the value was dropped
    Closed,
}

type Hook = Box<dyn Fn(u64) + Send + Sync>;

/// Buffer between a producer and one subscriber that only emits within granted demand.
///
/// Pushes may come from any thread; delivery is serialized by a work-in-progress counter so
/// exactly one thread drains at a time. The terminal signal is delivered once the buffer is
/// empty, whether or not demand is outstanding. With an executor, draining runs on that
/// scheduler instead of the pushing thread.
pub struct DrainQueue<T>(Arc<Inner<T>>);

struct Inner<T> {
    downstream: OnceLock<Arc<dyn Subscriber<T>>>,
    buffer: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    gate: DemandGate,
    wip: AtomicUsize,
    closed: AtomicBool,
    terminal: Mutex<Option<Terminal>>,
    eager_error: bool,
    executor: Option<Scheduler>,
    on_consumed: Option<Hook>,
    on_cancel: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<T> Clone for DrainQueue<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: Send + 'static> Default for DrainQueue<T> {
    fn default() -> Self { Self::builder().build() }
}

/// Configures a [`DrainQueue`] before it is shared
pub struct DrainQueueBuilder<T> {
    capacity: Option<usize>,
    eager_error: bool,
    executor: Option<Scheduler>,
    on_consumed: Option<Hook>,
    on_cancel: Option<Box<dyn Fn() + Send + Sync>>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: Send + 'static> DrainQueueBuilder<T> {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Deliver an error as soon as it arrives, discarding buffered values
    pub fn eager_error(mut self) -> Self {
        self.eager_error = true;
        self
    }

    pub fn executor(mut self, scheduler: Scheduler) -> Self {
        self.executor = Some(scheduler);
        self
    }

    /// Called after each drain pass with the number of values delivered
    pub fn on_consumed(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_consumed = Some(Box::new(hook));
        self
    }

    /// Called once when the subscriber cancels
    pub fn on_cancel(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> DrainQueue<T> {
        DrainQueue(Arc::new(Inner {
            downstream: OnceLock::new(),
            buffer: Mutex::new(VecDeque::new()),
            capacity: self.capacity,
            gate: DemandGate::new(),
            wip: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            terminal: Mutex::new(None),
            eager_error: self.eager_error,
            executor: self.executor,
            on_consumed: self.on_consumed,
            on_cancel: self.on_cancel,
        }))
    }
}

impl<T: Send + 'static> DrainQueue<T> {
    pub fn builder() -> DrainQueueBuilder<T> {
        DrainQueueBuilder { capacity: None, eager_error: false, executor: None, on_consumed: None, on_cancel: None, _marker: Default::default() }
    }

    pub fn new() -> Self { Self::default() }

    /// Connects the subscriber and starts delivering anything already buffered.
    /// Returns false if a subscriber was already attached.
    pub fn attach(&self, subscriber: Arc<dyn Subscriber<T>>) -> bool {
        if self.0.downstream.set(subscriber.clone()).is_err() {
            return false;
        }
        self.0.gate.activate();
        subscriber.on_subscribe(Arc::new(self.clone()));
        self.drain();
        true
    }

    pub fn is_attached(&self) -> bool { self.0.downstream.get().is_some() }

    pub fn push(&self, value: T) -> Push {
        if self.0.closed.load(Ordering::Acquire) || self.0.gate.is_done() {
            return Push::Closed;
        }
        {
            let mut buffer = lock(&self.0.buffer);
            if matches!(self.0.capacity, Some(capacity) if buffer.len() >= capacity) {
                return Push::Full;
            }
            buffer.push_back(value);
        }
        self.drain();
        Push::Accepted
    }

    /// Records the terminal signal; only the first one counts
    pub fn terminate(&self, terminal: Terminal) -> bool {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *lock(&self.0.terminal) = Some(terminal);
        self.drain();
        true
    }

    /// Discards the buffer and terminates, regardless of outstanding demand
    pub fn terminate_now(&self, terminal: Terminal) -> bool {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        lock(&self.0.buffer).clear();
        *lock(&self.0.terminal) = Some(terminal);
        self.drain();
        true
    }

    pub fn len(&self) -> usize { lock(&self.0.buffer).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn is_closed(&self) -> bool { self.0.closed.load(Ordering::Acquire) }

    pub fn is_cancelled(&self) -> bool { self.0.gate.is_cancelled() }

    fn drain(&self) {
        if self.0.downstream.get().is_none() {
            return;
        }
        if self.0.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        match &self.0.executor {
            Some(scheduler) => {
                let this = self.clone();
                scheduler.schedule(move || this.drain_loop());
            }
            None => self.drain_loop(),
        }
    }

    fn drain_loop(&self) {
        let inner = &*self.0;
        let Some(downstream) = inner.downstream.get() else { return };
        let mut missed = 1;
        loop {
            let mut emitted = 0;
            loop {
                if inner.gate.is_done() {
                    lock(&inner.buffer).clear();
                    return;
                }
                if inner.eager_error && matches!(&*lock(&inner.terminal), Some(Terminal::Error(_))) {
                    lock(&inner.buffer).clear();
                }
                let next = {
                    let mut buffer = lock(&inner.buffer);
                    if buffer.is_empty() {
                        None
                    } else if inner.gate.try_consume() {
                        buffer.pop_front()
                    } else {
                        break;
                    }
                };
                match next {
                    Some(value) => {
                        downstream.on_next(value);
                        emitted += 1;
                    }
                    None => {
                        let terminal = lock(&inner.terminal).clone();
                        match terminal {
                            Some(terminal) if inner.gate.terminate() => {
                                terminal.deliver(&**downstream);
                                return;
                            }
                            Some(_) => return,
                            None => break,
                        }
                    }
                }
            }
            if emitted > 0 {
                if let Some(hook) = &inner.on_consumed {
                    hook(emitted);
                }
            }
            missed = inner.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

impl<T: Send + 'static> Subscription for DrainQueue<T> {
    fn request(&self, n: u64) {
        if self.0.gate.request(n).is_some() {
            self.drain();
        }
    }

    fn cancel(&self) {
        if !self.0.gate.cancel() {
            return;
        }
        lock(&self.0.buffer).clear();
        if let Some(hook) = &self.0.on_cancel {
            hook();
        }
    }
}
