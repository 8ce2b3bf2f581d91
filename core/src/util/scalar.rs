use std::sync::{Arc, Mutex};

use super::{lock, SubscriptionSlot};
use crate::{
    error::FlowError,
    subscription::{Subscriber, Subscription},
};

/// Subscription for a producer of at most one value.
///
/// The value may be computed before or after the subscriber asks for it; it is delivered,
/// followed by completion, once both have happened. Errors and empty completion do not wait
/// for demand.
pub struct ScalarSubscription<T> {
    downstream: Arc<dyn Subscriber<T>>,
    state: Mutex<State<T>>,
    upstream: SubscriptionSlot,
}

struct State<T> {
    requested: bool,
    value: Option<T>,
    done: bool,
}

enum Delivery<T> {
    Value(T),
    Empty,
}

impl<T: Send + 'static> ScalarSubscription<T> {
    pub fn new(downstream: Arc<dyn Subscriber<T>>) -> Arc<Self> {
        Arc::new(Self { downstream, state: Mutex::new(State { requested: false, value: None, done: false }), upstream: SubscriptionSlot::new() })
    }

    /// Upstream whose subscription is cancelled along with this one
    pub fn upstream(&self) -> &SubscriptionSlot { &self.upstream }

    pub fn downstream(&self) -> &Arc<dyn Subscriber<T>> { &self.downstream }

    /// Supplies the result: `Some` emits on demand, `None` completes right away
    pub fn complete(&self, value: Option<T>) {
        let delivery = {
            let mut state = lock(&self.state);
            if state.done || state.value.is_some() {
                return;
            }
            match value {
                None => {
                    state.done = true;
                    Some(Delivery::Empty)
                }
                Some(value) if state.requested => {
                    state.done = true;
                    Some(Delivery::Value(value))
                }
                Some(value) => {
                    state.value = Some(value);
                    None
                }
            }
        };
        self.deliver(delivery);
    }

    pub fn error(&self, error: FlowError) {
        {
            let mut state = lock(&self.state);
            if state.done {
                return;
            }
            state.done = true;
            state.value = None;
        }
        self.downstream.on_error(error);
    }

    pub fn is_done(&self) -> bool { lock(&self.state).done }

    fn deliver(&self, delivery: Option<Delivery<T>>) {
        match delivery {
            Some(Delivery::Value(value)) => {
                self.downstream.on_next(value);
                self.downstream.on_complete();
            }
            Some(Delivery::Empty) => self.downstream.on_complete(),
            None => {}
        }
    }
}

impl<T: Send + 'static> Subscription for ScalarSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let delivery = {
            let mut state = lock(&self.state);
            if state.done || state.requested {
                return;
            }
            state.requested = true;
            state.value.take().map(|value| {
                state.done = true;
                Delivery::Value(value)
            })
        };
        self.deliver(delivery);
    }

    fn cancel(&self) {
        {
            let mut state = lock(&self.state);
            if state.done {
                return;
            }
            state.done = true;
            state.value = None;
        }
        self.upstream.cancel();
    }
}
