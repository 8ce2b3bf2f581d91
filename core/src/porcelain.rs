//! Async adapters: await a `Single`, collect a `Multi`, or consume it as a `Stream`.

use std::sync::{Arc, Mutex};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::FlowError,
    producer::{Item, Multi, Single},
    signal::Signal,
    subscription::{Subscriber, Subscription, UNBOUNDED},
    util::{lock, SubscriptionSlot},
};

type Outcome<T> = Result<Option<T>, FlowError>;

struct OneshotSubscriber<T> {
    sender: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
    value: Mutex<Option<T>>,
    upstream: SubscriptionSlot,
}

impl<T: Item> OneshotSubscriber<T> {
    fn settle(&self, outcome: Outcome<T>) {
        let sender = lock(&self.sender).take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

impl<T: Item> Subscriber<T> for OneshotSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription) {
            self.upstream.request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: T) { lock(&self.value).get_or_insert(value); }

    fn on_error(&self, error: FlowError) { self.settle(Err(error)) }

    fn on_complete(&self) {
        let value = lock(&self.value).take();
        self.settle(Ok(value))
    }
}

impl<T: Item> Single<T> {
    /// Subscribes and waits for the outcome: `Some(value)`, `None` for an empty completion,
    /// or the error. Awaits forever on a producer that never terminates.
    pub async fn get(&self) -> Result<Option<T>, FlowError> {
        let (sender, receiver) = oneshot::channel();
        self.subscribe_with(Arc::new(OneshotSubscriber { sender: Mutex::new(Some(sender)), value: Mutex::new(None), upstream: SubscriptionSlot::new() }));
        match receiver.await {
            Ok(outcome) => outcome,
            // the producer let go of the subscriber without terminating
            Err(_) => std::future::pending().await,
        }
    }
}

struct ChannelSubscriber<T> {
    sender: mpsc::UnboundedSender<Signal<T>>,
    upstream: Arc<SubscriptionSlot>,
}

impl<T: Item> Subscriber<T> for ChannelSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.upstream.set(subscription); }
    fn on_next(&self, value: T) { let _ = self.sender.send(Signal::Next(value)); }
    fn on_error(&self, error: FlowError) { let _ = self.sender.send(Signal::Error(error)); }
    fn on_complete(&self) { let _ = self.sender.send(Signal::Complete); }
}

/// Receiving end of [`Multi::into_stream`]; cancels the subscription when dropped
struct StreamState<T> {
    receiver: mpsc::UnboundedReceiver<Signal<T>>,
    upstream: Arc<SubscriptionSlot>,
    done: bool,
}

impl<T> Drop for StreamState<T> {
    fn drop(&mut self) { self.upstream.cancel() }
}

impl<T: Item> Multi<T> {
    /// Collects every value; fails with the first error
    pub async fn to_vec(&self) -> Result<Vec<T>, FlowError> { Ok(self.collect_list().get().await?.unwrap_or_default()) }

    /// Consumes the producer as a stream. Each poll requests one value, so the producer never
    /// runs ahead of the consumer. An error is yielded once and ends the stream.
    pub fn into_stream(&self) -> BoxStream<'static, Result<T, FlowError>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let upstream = Arc::new(SubscriptionSlot::new());
        self.subscribe_with(Arc::new(ChannelSubscriber { sender, upstream: upstream.clone() }));
        let state = StreamState { receiver, upstream, done: false };
        stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            state.upstream.request(1);
            match state.receiver.recv().await? {
                Signal::Next(value) => Some((Ok(value), state)),
                Signal::Error(error) => {
                    state.done = true;
                    Some((Err(error), state))
                }
                Signal::Complete => None,
            }
        })
        .boxed()
    }
}
