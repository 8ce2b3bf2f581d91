use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use tracing::debug;

use crate::{
    error::FlowError,
    producer::{IntoPublisher, Item, Multi, Publisher, Single},
    recovery::ContinueStrategy,
    subscription::{Subscriber, Subscription},
    util::SubscriptionArbiter,
};

type Fallback<T> = Arc<dyn Fn(FlowError) -> Result<Arc<dyn Publisher<T>>, FlowError> + Send + Sync>;
type Branch<T> = Box<dyn Fn(&FlowError) -> Option<Arc<dyn Publisher<T>>> + Send + Sync>;

/// Fallback producers chosen by error kind, tried in the order they were added
pub struct ErrorBranches<T> {
    branches: Vec<Branch<T>>,
}

impl<T: Item> Default for ErrorBranches<T> {
    fn default() -> Self { Self::new() }
}

impl<T: Item> ErrorBranches<T> {
    pub fn new() -> Self { Self { branches: Vec::new() } }

    /// Resumes with `f(e)` when the error is a domain error of type `E`
    pub fn on<E, P, F>(mut self, f: F) -> Self
    where
        E: std::error::Error + 'static,
        P: IntoPublisher<T>,
        F: Fn(&E) -> P + Send + Sync + 'static,
    {
        self.branches.push(Box::new(move |error| error.downcast_ref::<E>().map(|e| f(e).into_publisher())));
        self
    }

    /// Resumes with `f(error)` when `predicate` accepts the error
    pub fn when<P, Pred, F>(mut self, predicate: Pred, f: F) -> Self
    where
        P: IntoPublisher<T>,
        Pred: Fn(&FlowError) -> bool + Send + Sync + 'static,
        F: Fn(&FlowError) -> P + Send + Sync + 'static,
    {
        self.branches.push(Box::new(move |error| predicate(error).then(|| f(error).into_publisher())));
        self
    }

    fn select(&self, error: FlowError) -> Result<Arc<dyn Publisher<T>>, FlowError> { self.branches.iter().find_map(|branch| branch(&error)).ok_or(error) }
}

struct ResumePublisher<T> {
    upstream: Arc<dyn Publisher<T>>,
    fallback: Fallback<T>,
}

/// Swaps to a fallback producer on the first recoverable error. Errors from the fallback
/// itself are final.
struct ResumeSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    fallback: Fallback<T>,
    arbiter: Arc<SubscriptionArbiter>,
    resumed: AtomicBool,
    me: Weak<Self>,
}

impl<T: Item> Publisher<T> for ResumePublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let arbiter = Arc::new(SubscriptionArbiter::new());
        let resume = Arc::new_cyclic(|me| ResumeSubscriber {
            downstream: subscriber.clone(),
            fallback: self.fallback.clone(),
            arbiter: arbiter.clone(),
            resumed: AtomicBool::new(false),
            me: me.clone(),
        });
        subscriber.on_subscribe(arbiter);
        self.upstream.subscribe(resume);
    }
}

impl<T: Item> Subscriber<T> for ResumeSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.arbiter.set(subscription) }

    fn on_next(&self, value: T) {
        self.arbiter.produced(1);
        self.downstream.on_next(value)
    }

    fn on_error(&self, error: FlowError) {
        if !error.is_recoverable() || self.resumed.load(Ordering::Acquire) || self.arbiter.is_cancelled() {
            return self.downstream.on_error(error);
        }
        match (self.fallback)(error) {
            Ok(fallback) => {
                self.resumed.store(true, Ordering::Release);
                debug!("resuming with fallback producer");
                if let Some(me) = self.me.upgrade() {
                    fallback.subscribe(me);
                }
            }
            Err(error) => self.downstream.on_error(error),
        }
    }

    fn on_complete(&self) { self.downstream.on_complete() }

    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

struct MapErrorPublisher<T, F> {
    upstream: Arc<dyn Publisher<T>>,
    f: Arc<F>,
}

struct MapErrorSubscriber<T, F> {
    downstream: Arc<dyn Subscriber<T>>,
    f: Arc<F>,
}

impl<T: Item, E, F> Publisher<T> for MapErrorPublisher<T, F>
where
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(FlowError) -> E + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) { self.upstream.subscribe(Arc::new(MapErrorSubscriber { downstream: subscriber, f: self.f.clone() })) }
}

impl<T: Item, E, F> Subscriber<T> for MapErrorSubscriber<T, F>
where
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(FlowError) -> E + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) { self.downstream.on_subscribe(subscription) }
    fn on_next(&self, value: T) { self.downstream.on_next(value) }

    fn on_error(&self, error: FlowError) {
        let error = if error.is_recoverable() { FlowError::domain((self.f)(error)) } else { error };
        self.downstream.on_error(error)
    }

    fn on_complete(&self) { self.downstream.on_complete() }
    fn continue_strategy(&self) -> Option<ContinueStrategy> { self.downstream.continue_strategy() }
}

fn resume_if<T, P, Pred, F>(predicate: Pred, f: F) -> Fallback<T>
where
    T: Item,
    P: IntoPublisher<T>,
    Pred: Fn(&FlowError) -> bool + Send + Sync + 'static,
    F: Fn(FlowError) -> P + Send + Sync + 'static,
{
    Arc::new(move |error| if predicate(&error) { Ok(f(error).into_publisher()) } else { Err(error) })
}

macro_rules! recovery_operators {
    ($producer:ident, $complete_doc:literal) => {
        impl<T: Item> $producer<T> {
            /// Continues with the producer built from the error
            pub fn on_error_resume<P, F>(&self, f: F) -> $producer<T>
            where
                P: IntoPublisher<T>,
                F: Fn(FlowError) -> P + Send + Sync + 'static,
            {
                self.on_error_resume_if(|_| true, f)
            }

            /// Continues with the producer built from the error when `predicate` accepts it;
            /// other errors are re-raised
            pub fn on_error_resume_if<P, Pred, F>(&self, predicate: Pred, f: F) -> $producer<T>
            where
                P: IntoPublisher<T>,
                Pred: Fn(&FlowError) -> bool + Send + Sync + 'static,
                F: Fn(FlowError) -> P + Send + Sync + 'static,
            {
                self.derive(ResumePublisher { upstream: self.publisher(), fallback: resume_if(predicate, f) })
            }

            /// Continues with the first branch matching the error; re-raises when none match
            pub fn on_error_resume_by(&self, branches: ErrorBranches<T>) -> $producer<T> {
                let branches = Arc::new(branches);
                self.derive(ResumePublisher { upstream: self.publisher(), fallback: Arc::new(move |error| branches.select(error)) })
            }

            /// Emits `value` in place of the error, then completes
            pub fn on_error_return(&self, value: T) -> $producer<T>
            where T: Clone {
                self.on_error_resume(move |_| Single::just(value.clone()))
            }

            #[doc = $complete_doc]
            pub fn on_error_complete(&self) -> $producer<T> { self.on_error_complete_if(|_| true) }

            /// Completes in place of errors accepted by `predicate`
            pub fn on_error_complete_if<Pred>(&self, predicate: Pred) -> $producer<T>
            where Pred: Fn(&FlowError) -> bool + Send + Sync + 'static {
                self.on_error_resume_if(predicate, |_| Multi::<T>::empty())
            }

            /// Replaces a domain error with the one `f` derives from it
            pub fn map_error<E, F>(&self, f: F) -> $producer<T>
            where
                E: std::error::Error + Send + Sync + 'static,
                F: Fn(FlowError) -> E + Send + Sync + 'static,
            {
                self.derive(MapErrorPublisher { upstream: self.publisher(), f: Arc::new(f) })
            }
        }
    };
}

recovery_operators!(Multi, "Completes in place of any domain error");
recovery_operators!(Single, "Completes empty in place of any domain error");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ProtocolViolation, testing::TestSubscriber};

    #[derive(Debug, thiserror::Error)]
    #[error("/ by zero")]
    struct DivideByZero;

    #[derive(Debug, thiserror::Error)]
    #[error("missing: {0}")]
    struct Missing(&'static str);

    fn failing() -> Multi<u32> { Multi::just(vec![1, 2]).concat_with(Multi::error(FlowError::domain(DivideByZero))) }

    #[test]
    fn resume_switches_to_fallback() {
        let subscriber = TestSubscriber::new();
        failing().on_error_resume(|_| Multi::just(vec![10, 20])).subscribe_with(subscriber.subscriber());
        assert_eq!(subscriber.values(), vec![1, 2, 10, 20]);
        assert!(subscriber.is_complete());
    }

    #[test]
    fn branches_select_by_kind_and_reraise_otherwise() {
        let branches = || ErrorBranches::new().on(|_: &Missing| Multi::just(vec![0])).on(|_: &DivideByZero| Single::just(99));
        let matched = TestSubscriber::new();
        failing().on_error_resume_by(branches()).subscribe_with(matched.subscriber());
        assert_eq!(matched.values(), vec![1, 2, 99]);

        let unmatched = TestSubscriber::new();
        Multi::<u32>::error(FlowError::msg("other")).on_error_resume_by(branches()).subscribe_with(unmatched.subscriber());
        assert_eq!(unmatched.error().map(|e| e.to_string()).as_deref(), Some("other"));
    }

    #[test]
    fn complete_and_return_substitute_the_error() {
        let completed = TestSubscriber::new();
        failing().on_error_complete_if(|e| e.is::<DivideByZero>()).subscribe_with(completed.subscriber());
        assert_eq!(completed.values(), vec![1, 2]);
        assert!(completed.is_complete());

        let returned = TestSubscriber::new();
        Single::<u32>::error(FlowError::domain(Missing("x"))).on_error_return(7).subscribe_with(returned.subscriber());
        assert_eq!(returned.values(), vec![7]);
    }

    #[test]
    fn map_error_rewrites_domain_errors_only() {
        let mapped = TestSubscriber::new();
        failing().map_error(|_| Missing("divisor")).subscribe_with(mapped.subscriber());
        assert!(mapped.error().is_some_and(|e| e.is::<Missing>()));

        let protocol = TestSubscriber::new();
        Multi::<u32>::error(ProtocolViolation::MissingDemand).map_error(|_| Missing("never")).on_error_complete().subscribe_with(protocol.subscriber());
        assert_eq!(protocol.error().and_then(|e| e.protocol().cloned()), Some(ProtocolViolation::MissingDemand));
    }
}
