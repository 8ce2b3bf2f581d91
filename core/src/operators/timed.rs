//! Time-based operators. Timers run on the parallel pool unless another scheduler is given.

use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use tracing::debug;

use crate::{
    error::FlowError,
    producer::{Item, Multi, Publisher, Single},
    recovery::ContinueStrategy,
    scheduler::{Scheduler, TaskHandle},
    subscription::{Subscriber, Subscription, UNBOUNDED},
    util::{lock, ScalarSubscription, SubscriptionSlot},
};

struct DelayElementPublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    delay: Duration,
    scheduler: Scheduler,
}

struct DelayElementSubscriber<T> {
    result: Arc<ScalarSubscription<T>>,
    value: Mutex<Option<T>>,
    delay: Duration,
    scheduler: Scheduler,
}

impl<T: Item> Publisher<T> for DelayElementPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let result = ScalarSubscription::new(subscriber);
        result.downstream().on_subscribe(result.clone());
        self.upstream.subscribe(Arc::new(DelayElementSubscriber { result, value: Mutex::new(None), delay: self.delay, scheduler: self.scheduler.clone() }));
    }
}

impl<T: Item> Subscriber<T> for DelayElementSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.result.upstream().set(subscription) {
            self.result.upstream().request(UNBOUNDED);
        }
    }

    fn on_next(&self, value: T) { lock(&self.value).get_or_insert(value); }

    fn on_error(&self, error: FlowError) { self.result.error(error) }

    fn on_complete(&self) {
        let value = lock(&self.value).take();
        match value {
            Some(value) => {
                let result = self.result.clone();
                // a cancelled result ignores the late completion
                self.scheduler.schedule_after(self.delay, move || result.complete(Some(value)));
            }
            None => self.result.complete(None),
        }
    }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.result.downstream().continue_strategy() }
}

struct TimeoutPublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    window: Duration,
    scheduler: Scheduler,
}

/// Races each wait for the next signal against a timer. Whichever loses is cancelled.
struct TimeoutSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: SubscriptionSlot,
    window: Duration,
    scheduler: Scheduler,
    race: Mutex<Race>,
    me: Weak<Self>,
}

#[derive(Default)]
struct Race {
    generation: u64,
    timer: Option<TaskHandle>,
    done: bool,
}

impl<T: Item> Publisher<T> for TimeoutPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let timeout = Arc::new_cyclic(|me| TimeoutSubscriber {
            downstream: subscriber,
            upstream: SubscriptionSlot::new(),
            window: self.window,
            scheduler: self.scheduler.clone(),
            race: Mutex::new(Race::default()),
            me: me.clone(),
        });
        self.upstream.subscribe(timeout);
    }
}

impl<T: Item> TimeoutSubscriber<T> {
    fn arm(&self, generation: u64) {
        let me = self.me.clone();
        let timer = self.scheduler.schedule_after(self.window, move || {
            if let Some(timeout) = me.upgrade() {
                timeout.expire(generation);
            }
        });
        let mut race = lock(&self.race);
        if race.done || race.generation != generation {
            timer.cancel();
        } else if let Some(previous) = race.timer.replace(timer) {
            previous.cancel();
        }
    }

    fn expire(&self, generation: u64) {
        {
            let mut race = lock(&self.race);
            if race.done || race.generation != generation {
                return;
            }
            race.done = true;
            race.timer = None;
        }
        debug!("no signal within {:?}, cancelling upstream", self.window);
        self.upstream.cancel();
        self.downstream.on_error(FlowError::Timeout(self.window));
    }

    /// Ends the race; false if the timer already won
    fn settle(&self) -> bool {
        let mut race = lock(&self.race);
        if race.done {
            return false;
        }
        race.done = true;
        if let Some(timer) = race.timer.take() {
            timer.cancel();
        }
        true
    }
}

impl<T: Item> Subscriber<T> for TimeoutSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.upstream.set(subscription);
        if let Some(me) = self.me.upgrade() {
            self.downstream.on_subscribe(me);
        }
        self.arm(0);
    }

    fn on_next(&self, value: T) {
        let generation = {
            let mut race = lock(&self.race);
            if race.done {
                return;
            }
            race.generation += 1;
            if let Some(timer) = race.timer.take() {
                timer.cancel();
            }
            race.generation
        };
        self.downstream.on_next(value);
        self.arm(generation);
    }

    fn on_error(&self, error: FlowError) {
        if self.settle() {
            self.downstream.on_error(error)
        }
    }

    fn on_complete(&self) {
        if self.settle() {
            self.downstream.on_complete()
        }
    }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

impl<T: Item> Subscription for TimeoutSubscriber<T> {
    fn request(&self, n: u64) { self.upstream.request(n) }

    fn cancel(&self) {
        self.settle();
        self.upstream.cancel();
    }
}

impl<T: Item> Single<T> {
    /// Emits the value `delay` after it arrives
    pub fn delay_element(&self, delay: Duration) -> Single<T> { self.delay_element_on(delay, Scheduler::parallel()) }

    pub fn delay_element_on(&self, delay: Duration, scheduler: Scheduler) -> Single<T> {
        self.derive(DelayElementPublisher { upstream: self.publisher(), delay, scheduler })
    }

    /// Fails with [`FlowError::Timeout`] unless the single terminates within `window`
    pub fn timeout(&self, window: Duration) -> Single<T> { self.derive(TimeoutPublisher { upstream: self.publisher(), window, scheduler: Scheduler::parallel() }) }
}

impl<T: Item> Multi<T> {
    /// Delays every value by `delay`, keeping order
    pub fn delay_elements(&self, delay: Duration) -> Multi<T>
    where T: Clone {
        self.concat_map(move |value| Single::just(value).delay_element(delay))
    }

    /// Fails with [`FlowError::Timeout`] if no signal arrives within `window` of subscribing
    /// or of the previous value
    pub fn timeout(&self, window: Duration) -> Multi<T> { self.timeout_on(window, Scheduler::parallel()) }

    pub fn timeout_on(&self, window: Duration, scheduler: Scheduler) -> Multi<T> { self.derive(TimeoutPublisher { upstream: self.publisher(), window, scheduler }) }
}
