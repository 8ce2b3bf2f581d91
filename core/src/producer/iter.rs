use std::{
    iter::Peekable,
    ops::Range,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use super::{Item, Multi, Publisher, Timing};
use crate::{
    subscription::{DemandGate, Subscriber, Subscription},
    util::lock,
};

type BoxIter<T> = Box<dyn Iterator<Item = T> + Send>;

/// Emits the items of an iterator created fresh for every subscription
struct IterSource<T> {
    iter: Arc<dyn Fn() -> BoxIter<T> + Send + Sync>,
}

impl<T: Item> Publisher<T> for IterSource<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let subscription = Arc::new(IterSubscription {
            downstream: subscriber.clone(),
            iter: Mutex::new((self.iter)().peekable()),
            gate: DemandGate::active(),
            wip: AtomicUsize::new(0),
        });
        subscriber.on_subscribe(subscription.clone());
        // completes an empty source, and any source the subscriber fully requested in on_subscribe
        subscription.drain();
    }
}

struct IterSubscription<T> {
    downstream: Arc<dyn Subscriber<T>>,
    iter: Mutex<Peekable<BoxIter<T>>>,
    gate: DemandGate,
    wip: AtomicUsize,
}

impl<T: Item> IterSubscription<T> {
    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            loop {
                if self.gate.is_done() {
                    return;
                }
                let next = {
                    let mut iter = lock(&self.iter);
                    if iter.peek().is_none() {
                        None
                    } else if self.gate.try_consume() {
                        iter.next()
                    } else {
                        break;
                    }
                };
                match next {
                    Some(value) => self.downstream.on_next(value),
                    None => {
                        if self.gate.terminate() {
                            self.downstream.on_complete();
                        }
                        return;
                    }
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

impl<T: Item> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if self.gate.request(n).is_some() {
            self.drain();
        }
    }

    fn cancel(&self) { self.gate.cancel(); }
}

impl<T: Item + Clone> Multi<T> {
    /// Emits `values`, captured now, to every subscriber
    pub fn just(values: impl IntoIterator<Item = T>) -> Self { Self::from_iter(values) }

    /// Emits the items of `iter`, collected now, to every subscriber
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter(iter: impl IntoIterator<Item = T>) -> Self {
        let values: Arc<[T]> = iter.into_iter().collect();
        let source = IterSource {
            iter: Arc::new(move || {
                let values = values.clone();
                Box::new((0..values.len()).map(move |i| values[i].clone())) as BoxIter<T>
            }),
        };
        Multi::from_publisher(source, Timing::Eager)
    }
}

impl Multi<u64> {
    /// Emits `range.start` up to but excluding `range.end`
    pub fn range(range: Range<u64>) -> Self {
        let source = IterSource { iter: Arc::new(move || Box::new(range.clone()) as BoxIter<u64>) };
        Multi::from_publisher(source, Timing::Eager)
    }
}
