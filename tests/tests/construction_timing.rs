mod common;

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use anyhow::Result;
use common::Journal;
use sluice_core::{testing::TestSubscriber, Construction, FlowError, Multi, Single, Timing};

struct DataSource {
    data: AtomicI64,
    calls: Journal,
}

impl DataSource {
    fn new(data: i64) -> Arc<Self> { Arc::new(Self { data: AtomicI64::new(data), calls: Journal::new() }) }

    fn get(&self, caller: &str) -> i64 {
        self.calls.record(format!("called by {caller}"));
        self.data.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn just_captures_while_defer_and_callable_read_at_subscribe() -> Result<()> {
    let source = DataSource::new(99);

    let just = Single::just(source.get("just"));
    let defer = {
        let source = source.clone();
        Single::defer(move || Single::just(source.get("defer")))
    };
    let callable = {
        let source = source.clone();
        Single::from_callable(move || Ok(source.get("callable")))
    };
    assert_eq!(source.calls.take(), vec!["called by just"]);
    assert_eq!((just.timing(), defer.timing(), callable.timing()), (Timing::Eager, Timing::Deferred, Timing::Deferred));

    assert_eq!(just.get().await?, Some(99));
    assert_eq!(defer.get().await?, Some(99));
    assert_eq!(callable.get().await?, Some(99));
    assert_eq!(source.calls.take(), vec!["called by defer", "called by callable"]);

    source.data.store(111, Ordering::SeqCst);
    assert_eq!(just.get().await?, Some(99));
    assert_eq!(defer.get().await?, Some(111));
    assert_eq!(callable.get().await?, Some(111));
    assert_eq!(source.calls.take(), vec!["called by defer", "called by callable"]);
    Ok(())
}

#[test]
fn eager_fallback_is_built_even_when_unused() {
    let journal = Journal::new();
    let execute_when_empty = |journal: &Journal| {
        journal.record("Execute When Empty !");
        Single::just("Other-data")
    };

    let eager = TestSubscriber::new();
    Single::just("Response").switch_if_empty(execute_when_empty(&journal)).subscribe_with(eager.subscriber());
    assert_eq!(eager.values(), vec!["Response"]);
    assert_eq!(journal.take(), vec!["Execute When Empty !"]);

    let deferred = TestSubscriber::new();
    let fallback_journal = journal.clone();
    Single::just("Response").switch_if_empty(Single::defer(move || execute_when_empty(&fallback_journal))).subscribe_with(deferred.subscriber());
    assert_eq!(deferred.values(), vec!["Response"]);
    assert!(journal.entries().is_empty());
}

#[test]
fn deferred_fallback_runs_only_when_empty() {
    let journal = Journal::new();
    let record = journal.clone();
    let subscriber = TestSubscriber::new();
    Single::<&str>::empty()
        .switch_if_empty(Single::defer(move || {
            record.record("fallback built");
            Single::just("Other-data")
        }))
        .subscribe_with(subscriber.subscriber());
    assert_eq!(subscriber.values(), vec!["Other-data"]);
    assert_eq!(journal.entries(), vec!["fallback built"]);
}

#[test]
fn callable_failures_are_delivered_per_subscription() {
    let attempts = Arc::new(AtomicI64::new(0));
    let counter = attempts.clone();
    let single = Single::construct(Construction::Callable(Arc::new(move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            Err(FlowError::msg("cold start"))
        } else {
            Ok(attempt)
        }
    })));

    let first = TestSubscriber::new();
    single.subscribe_with(first.subscriber());
    assert_eq!(first.error().map(|e| e.to_string()).as_deref(), Some("cold start"));

    let second = TestSubscriber::new();
    single.subscribe_with(second.subscriber());
    assert_eq!(second.values(), vec![1]);
    assert!(second.is_complete());
}

#[test]
fn operators_keep_the_timing_of_their_source() {
    let deferred = Multi::defer(|| Multi::just(vec![1, 2, 3]));
    assert_eq!(deferred.map(|n| n * 2).filter(|n| *n > 2).timing(), Timing::Deferred);
    assert_eq!(Multi::just(vec![1]).map(|n| n + 1).timing(), Timing::Eager);
    assert_eq!(Multi::just(vec![1]).zip_with(&deferred).timing(), Timing::Deferred);
}

#[test]
fn deferred_multi_sees_state_at_subscribe() {
    let source = DataSource::new(1);
    let reader = source.clone();
    let multi = Multi::defer(move || Multi::range(0..reader.get("range") as u64));

    let before = TestSubscriber::new();
    multi.subscribe_with(before.subscriber());
    source.data.store(3, Ordering::SeqCst);
    let after = TestSubscriber::new();
    multi.subscribe_with(after.subscriber());

    assert_eq!(before.values(), vec![0]);
    assert_eq!(after.values(), vec![0, 1, 2]);
}
