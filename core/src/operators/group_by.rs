//! `group_by`: partitions a sequence into keyed sub-sequences.

use std::{hash::Hash, marker::PhantomData, ops::Deref, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, trace};

use crate::{
    bridge::{Sink, UnicastBridge},
    error::FlowError,
    producer::{Item, Multi, Publisher},
    signal::Terminal,
    subscription::{Subscriber, Subscription, UNBOUNDED},
    util::{DrainQueue, SubscriptionSlot},
};

/// One partition of a grouped sequence. Dereferences to the partition's values.
///
/// Values for a group are buffered until the group is subscribed. A group that is never
/// subscribed keeps growing; subscribing to every emitted group is the caller's job.
pub struct GroupedMulti<K, T> {
    key: K,
    values: Multi<T>,
}

impl<K, T> GroupedMulti<K, T> {
    pub fn key(&self) -> &K { &self.key }

    pub fn into_multi(self) -> Multi<T> { self.values }
}

impl<K, T> Deref for GroupedMulti<K, T> {
    type Target = Multi<T>;
    fn deref(&self) -> &Multi<T> { &self.values }
}

impl<K: Clone, T> Clone for GroupedMulti<K, T> {
    fn clone(&self) -> Self { Self { key: self.key.clone(), values: self.values.clone() } }
}

impl<K: std::fmt::Debug, T> std::fmt::Debug for GroupedMulti<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("GroupedMulti").field("key", &self.key).finish() }
}

struct GroupByPublisher<T, K, F> {
    upstream: Arc<dyn Publisher<T>>,
    key: Arc<F>,
    _marker: PhantomData<fn(&T) -> K>,
}

struct GroupBySubscriber<T, K, F> {
    key: Arc<F>,
    groups: Arc<DashMap<K, UnicastBridge<T>>>,
    output: DrainQueue<GroupedMulti<K, T>>,
    upstream: Arc<SubscriptionSlot>,
}

impl<T, K, F> Publisher<GroupedMulti<K, T>> for GroupByPublisher<T, K, F>
where
    T: Item,
    K: Item + Hash + Eq + Clone,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<GroupedMulti<K, T>>>) {
        let upstream = Arc::new(SubscriptionSlot::new());
        let groups: Arc<DashMap<K, UnicastBridge<T>>> = Arc::new(DashMap::new());
        let (cancel_upstream, cancel_groups) = (upstream.clone(), groups.clone());
        // cancelling the group stream stops the source and completes the groups already handed out
        let output = DrainQueue::builder()
            .on_cancel(move || {
                cancel_upstream.cancel();
                let open: Vec<_> = cancel_groups.iter().map(|entry| entry.value().clone()).collect();
                cancel_groups.clear();
                for group in open {
                    let _ = group.complete();
                }
            })
            .build();
        output.attach(subscriber);
        self.upstream.subscribe(Arc::new(GroupBySubscriber { key: self.key.clone(), groups, output, upstream }));
    }
}

impl<T, K, F> GroupBySubscriber<T, K, F>
where
    T: Item,
    K: Item + Hash + Eq + Clone,
{
    fn close(&self, terminal: Terminal) {
        let open: Vec<_> = self.groups.iter().map(|entry| entry.value().clone()).collect();
        self.groups.clear();
        debug!("group_by closing {} groups", open.len());
        self.output.terminate(terminal.clone());
        for group in open {
            let _ = match terminal.clone() {
                Terminal::Complete => group.complete(),
                Terminal::Error(error) => group.error(error),
            };
        }
    }
}

impl<T, K, F> Subscriber<T> for GroupBySubscriber<T, K, F>
where
    T: Item,
    K: Item + Hash + Eq + Clone,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription) {
            self.upstream.request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: T) {
        if self.output.is_cancelled() {
            return;
        }
        let key = (self.key)(&value);
        let (group, created) = match self.groups.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let group = UnicastBridge::new();
                entry.insert(group.clone());
                (group, true)
            }
        };
        if created {
            self.output.push(GroupedMulti { key, values: group.as_multi() });
        }
        if group.next(value).is_err() {
            trace!("group_by dropped a value for a closed group");
        }
    }

    fn on_error(&self, error: FlowError) { self.close(Terminal::Error(error)) }

    fn on_complete(&self) { self.close(Terminal::Complete) }
}

impl<T: Item> Multi<T> {
    /// Splits the sequence into one group per distinct key, created on the key's first value.
    pub fn group_by<K, F>(&self, key: F) -> Multi<GroupedMulti<K, T>>
    where
        K: Item + Hash + Eq + Clone,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.derive(GroupByPublisher { upstream: self.publisher(), key: Arc::new(key), _marker: PhantomData })
    }
}
