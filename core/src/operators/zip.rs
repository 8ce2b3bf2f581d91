//! `zip`: combines the nth value of every source.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    config::ZIP_PREFETCH,
    error::FlowError,
    producer::{Item, Multi, Publisher, Single, Timing},
    subscription::{self, DemandGate, Subscriber, Subscription},
    util::{lock, SubscriptionSlot},
};

/// Per-source queues. Each source owns one lane; a row takes the front of every lane.
trait Lanes: Send + Sync + 'static {
    type Row: Item;

    fn count(&self) -> usize;

    fn is_empty(&self, index: usize) -> bool;

    /// Pops one value from every lane, or nothing if some lane is empty
    fn pop_row(&self) -> Option<Self::Row>;

    fn clear(&self);
}

/// `count` lanes of one type, combined into a `Vec`
struct Uniform<T> {
    queues: Vec<Mutex<VecDeque<T>>>,
}

/// A left and a right lane of different types, combined into a tuple
struct Pair<A, B> {
    left: Mutex<VecDeque<A>>,
    right: Mutex<VecDeque<B>>,
}

impl<T: Item> Lanes for Uniform<T> {
    type Row = Vec<T>;

    fn count(&self) -> usize { self.queues.len() }

    fn is_empty(&self, index: usize) -> bool { lock(&self.queues[index]).is_empty() }

    fn pop_row(&self) -> Option<Vec<T>> {
        let mut guards: Vec<_> = self.queues.iter().map(lock).collect();
        if guards.iter().any(|queue| queue.is_empty()) {
            return None;
        }
        guards.iter_mut().map(|queue| queue.pop_front()).collect()
    }

    fn clear(&self) {
        for queue in &self.queues {
            lock(queue).clear();
        }
    }
}

impl<A: Item, B: Item> Lanes for Pair<A, B> {
    type Row = (A, B);

    fn count(&self) -> usize { 2 }

    fn is_empty(&self, index: usize) -> bool {
        match index {
            0 => lock(&self.left).is_empty(),
            _ => lock(&self.right).is_empty(),
        }
    }

    fn pop_row(&self) -> Option<(A, B)> {
        let (mut left, mut right) = (lock(&self.left), lock(&self.right));
        if left.is_empty() || right.is_empty() {
            return None;
        }
        Some((left.pop_front()?, right.pop_front()?))
    }

    fn clear(&self) {
        lock(&self.left).clear();
        lock(&self.right).clear();
    }
}

fn uniform_lane<T>(lanes: &Uniform<T>, index: usize) -> &Mutex<VecDeque<T>> { &lanes.queues[index] }

fn left_lane<A, B>(lanes: &Pair<A, B>, _: usize) -> &Mutex<VecDeque<A>> { &lanes.left }

fn right_lane<A, B>(lanes: &Pair<A, B>, _: usize) -> &Mutex<VecDeque<B>> { &lanes.right }

struct ZipPublisher<T> {
    sources: Vec<Arc<dyn Publisher<T>>>,
}

struct ZipPairPublisher<A, B> {
    left: Arc<dyn Publisher<A>>,
    right: Arc<dyn Publisher<B>>,
}

/// Drains the lanes row by row. A row is emitted only when every lane has a value and the
/// subscriber has demand. The sequence completes as soon as some source has completed with
/// nothing left to pair.
struct ZipCoordinator<L: Lanes> {
    downstream: Arc<dyn Subscriber<L::Row>>,
    lanes: L,
    finished: Vec<AtomicBool>,
    slots: Vec<SubscriptionSlot>,
    gate: DemandGate,
    error: Mutex<Option<FlowError>>,
    wip: AtomicUsize,
}

/// Feeds one source into its lane
struct ZipInner<L: Lanes, T> {
    parent: Arc<ZipCoordinator<L>>,
    index: usize,
    lane: fn(&L, usize) -> &Mutex<VecDeque<T>>,
}

impl<T: Item> Publisher<Vec<T>> for ZipPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<Vec<T>>>) {
        if self.sources.is_empty() {
            return subscription::complete(&*subscriber);
        }
        let lanes = Uniform { queues: self.sources.iter().map(|_| Mutex::new(VecDeque::new())).collect() };
        let Some(coordinator) = ZipCoordinator::start(subscriber, lanes) else { return };
        for (index, source) in self.sources.iter().enumerate() {
            if coordinator.gate.is_done() {
                break;
            }
            source.subscribe(Arc::new(ZipInner { parent: coordinator.clone(), index, lane: uniform_lane }));
        }
    }
}

impl<A: Item, B: Item> Publisher<(A, B)> for ZipPairPublisher<A, B> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<(A, B)>>) {
        let lanes = Pair { left: Mutex::new(VecDeque::new()), right: Mutex::new(VecDeque::new()) };
        let Some(coordinator) = ZipCoordinator::start(subscriber, lanes) else { return };
        self.left.subscribe(Arc::new(ZipInner { parent: coordinator.clone(), index: 0, lane: left_lane }));
        if !coordinator.gate.is_done() {
            self.right.subscribe(Arc::new(ZipInner { parent: coordinator, index: 1, lane: right_lane }));
        }
    }
}

impl<L: Lanes> ZipCoordinator<L> {
    /// Hands the coordinator to `downstream`; nothing if it cancelled straight away
    fn start(downstream: Arc<dyn Subscriber<L::Row>>, lanes: L) -> Option<Arc<Self>> {
        let n = lanes.count();
        let coordinator = Arc::new(ZipCoordinator {
            downstream: downstream.clone(),
            lanes,
            finished: (0..n).map(|_| AtomicBool::new(false)).collect(),
            slots: (0..n).map(|_| SubscriptionSlot::new()).collect(),
            gate: DemandGate::active(),
            error: Mutex::new(None),
            wip: AtomicUsize::new(0),
        });
        downstream.on_subscribe(coordinator.clone());
        (!coordinator.gate.is_done()).then_some(coordinator)
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let n = self.lanes.count();
        let mut missed = 1;
        loop {
            loop {
                if self.gate.is_done() {
                    return;
                }
                let error = lock(&self.error).take();
                if let Some(error) = error {
                    if self.gate.terminate() {
                        self.cancel_sources();
                        self.downstream.on_error(error);
                    }
                    return;
                }
                let exhausted = (0..n).any(|index| self.finished[index].load(Ordering::Acquire) && self.lanes.is_empty(index));
                if exhausted {
                    if self.gate.terminate() {
                        self.cancel_sources();
                        self.downstream.on_complete();
                    }
                    return;
                }
                if (0..n).any(|index| self.lanes.is_empty(index)) || !self.gate.try_consume() {
                    break;
                }
                // only this loop pops, so every lane still holds a value
                let Some(row) = self.lanes.pop_row() else { break };
                for slot in &self.slots {
                    slot.request(1);
                }
                self.downstream.on_next(row);
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn cancel_sources(&self) {
        for slot in &self.slots {
            slot.cancel();
        }
        self.lanes.clear();
    }
}

impl<L: Lanes> Subscription for ZipCoordinator<L> {
    fn request(&self, n: u64) {
        if self.gate.request(n).is_some() {
            self.drain();
        }
    }

    fn cancel(&self) {
        if self.gate.cancel() {
            self.cancel_sources();
        }
    }
}

impl<L: Lanes, T: Item> Subscriber<T> for ZipInner<L, T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let slot = &self.parent.slots[self.index];
        if slot.set(subscription) {
            slot.request(ZIP_PREFETCH);
        }
    }

    fn on_next(&self, value: T) {
        lock((self.lane)(&self.parent.lanes, self.index)).push_back(value);
        self.parent.drain();
    }

    fn on_error(&self, error: FlowError) {
        lock(&self.parent.error).get_or_insert(error);
        self.parent.drain();
    }

    fn on_complete(&self) {
        self.parent.finished[self.index].store(true, Ordering::Release);
        self.parent.drain();
    }
}

fn timing_of(timings: impl IntoIterator<Item = Timing>) -> Timing {
    if timings.into_iter().any(|t| t == Timing::Deferred) {
        Timing::Deferred
    } else {
        Timing::Eager
    }
}

impl<T: Item> Multi<T> {
    /// Emits a row holding the nth value of every source
    pub fn zip_all(sources: impl IntoIterator<Item = Multi<T>>) -> Multi<Vec<T>> {
        let sources: Vec<Multi<T>> = sources.into_iter().collect();
        let timing = timing_of(sources.iter().map(Multi::timing));
        Multi::from_publisher(ZipPublisher { sources: sources.iter().map(Multi::publisher).collect() }, timing)
    }

    /// Pairs this sequence's values with `other`'s
    pub fn zip_with<B: Item>(&self, other: &Multi<B>) -> Multi<(T, B)> { Multi::zip(self, other) }

    pub fn zip<B: Item>(left: &Multi<T>, right: &Multi<B>) -> Multi<(T, B)> {
        let timing = timing_of([left.timing(), right.timing()]);
        Multi::from_publisher(ZipPairPublisher { left: left.publisher(), right: right.publisher() }, timing)
    }
}

impl<T: Item> Single<T> {
    /// Waits for both singles; empty if either is empty
    pub fn zip_with<B: Item>(&self, other: &Single<B>) -> Single<(T, B)> { Multi::zip(&self.to_multi(), &other.to_multi()).into_single() }
}
