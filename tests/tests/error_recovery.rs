mod common;

use std::{
    sync::{
        atomic::{AtomicI64, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use common::Journal;
use sluice_core::{config::SchedulerConfig, testing::TestSubscriber, DirectBridge, ErrorBranches, FlowError, Multi, ProtocolViolation, Scheduler, Signal, Single, Sink};
use sluice_tests::{checked_div, DivideByZero};

#[derive(Debug, thiserror::Error)]
#[error("service unavailable")]
struct Unavailable;

#[test]
fn on_error_complete_turns_the_error_into_completion() {
    let datasource = Arc::new(AtomicI64::new(0));
    let journal = Journal::new();
    let (before, after) = (journal.clone(), journal.clone());
    let subscriber = TestSubscriber::new();
    Single::just(datasource)
        .try_map(|source| checked_div(100, source.load(Ordering::SeqCst)))
        .do_on_each(move |signal: &Signal<i64>| before.record(format!("before {}", signal.kind())))
        .on_error_complete()
        .do_on_each(move |signal: &Signal<i64>| after.record(format!("after {}", signal.kind())))
        .subscribe_with(subscriber.subscriber());

    assert!(subscriber.is_complete());
    assert!(subscriber.values().is_empty());
    assert_eq!(journal.entries(), vec!["before onError", "after onComplete"]);
}

#[test]
fn on_error_continue_skips_the_failing_value() {
    let dropped = Journal::new();
    let report = dropped.clone();
    let subscriber = TestSubscriber::new();
    Multi::just(["foo", "", "bar", "baz"])
        .try_map(|word| checked_div(12, word.len() as i64).map(|_| word))
        .on_error_continue(move |error: &FlowError, word: &&'static str| report.record(format!("{word:?}: {error}")))
        .subscribe_with(subscriber.subscriber());

    assert_eq!(subscriber.values(), vec!["foo", "bar", "baz"]);
    assert!(subscriber.is_complete());
    assert_eq!(dropped.entries(), vec![r#""": / by zero"#]);
}

/// Divides by each word's length, with `between` placed ahead of `on_error_continue`
async fn continue_across(between: impl FnOnce(Multi<&'static str>) -> Multi<&'static str>) -> TestSubscriber<&'static str> {
    let subscriber = TestSubscriber::new();
    between(Multi::just(["foo", "", "bar"]).try_map(|word| checked_div(12, word.len() as i64).map(|_| word)))
        .on_error_continue(|_: &FlowError, _: &&'static str| {})
        .subscribe_with(subscriber.subscriber());
    assert!(subscriber.await_terminal(Duration::from_secs(5)).await);
    subscriber
}

#[tokio::test]
async fn on_error_continue_reaches_across_context_switches() -> Result<()> {
    let hop = Scheduler::new(SchedulerConfig::new("hop").workers(1))?;
    let (publish, subscribe) = (hop.clone(), hop);

    let published = continue_across(move |words| words.publish_on(publish)).await;
    let subscribed = continue_across(move |words| words.subscribe_on(subscribe)).await;
    let switched = continue_across(|words| words.switch_if_empty(Multi::just(["fallback"]))).await;
    let timed = continue_across(|words| words.timeout(Duration::from_secs(5))).await;

    for subscriber in [published, subscribed, switched, timed] {
        assert_eq!(subscriber.values(), vec!["foo", "bar"]);
        assert!(subscriber.is_complete());
        assert!(subscriber.violations().is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn on_error_continue_reaches_across_a_delayed_single() -> Result<()> {
    let skipped = Single::just(0i64).try_map(|n| checked_div(1, n)).delay_element(Duration::from_millis(5)).to_multi().on_error_continue(|_: &FlowError, _: &i64| {});
    assert!(skipped.to_vec().await?.is_empty());
    Ok(())
}

#[test]
fn on_error_continue_if_lets_other_kinds_through() {
    let subscriber = TestSubscriber::new();
    Multi::just([4i64, 0, 2])
        .try_map(|n| checked_div(8, n))
        .on_error_continue_if(|error| error.is::<Unavailable>(), |_: &FlowError, _: &i64| {})
        .subscribe_with(subscriber.subscriber());

    assert_eq!(subscriber.values(), vec![2]);
    assert!(subscriber.error().is_some_and(|e| e.is::<DivideByZero>()));
}

#[test]
fn retry_within_budget_yields_only_the_successful_run() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let journal = Journal::new();
    let errors = journal.clone();
    let values = TestSubscriber::new();
    Multi::defer(move || match counter.fetch_add(1, Ordering::SeqCst) {
        0 | 1 => Multi::error(FlowError::domain(Unavailable)),
        _ => Multi::just(vec![1, 2, 3]),
    })
    .retry(3)
    .do_on_error(move |error| errors.record(error.to_string()))
    .subscribe_with(values.subscriber());

    assert_eq!(values.values(), vec![1, 2, 3]);
    assert!(values.is_complete());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(journal.entries().is_empty());
}

#[test]
fn retry_exhaustion_surfaces_the_last_error() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let subscriber = TestSubscriber::<u8>::new();
    Single::from_callable(move || Err(FlowError::msg(format!("failure {}", counter.fetch_add(1, Ordering::SeqCst)))))
        .retry(2)
        .subscribe_with(subscriber.subscriber());

    assert_eq!(subscriber.errors().len(), 1);
    assert_eq!(subscriber.error().map(|e| e.to_string()).as_deref(), Some("failure 2"));
}

#[test]
fn resume_branches_by_error_kind() {
    let branches = || {
        ErrorBranches::new()
            .on(|_: &Unavailable| Multi::just(vec!["cached"]))
            .when(|error| matches!(error, FlowError::Timeout(_)), |_| Single::just("timed out"))
    };

    let unavailable = TestSubscriber::new();
    Multi::just(vec!["live"]).concat_with(Multi::error(FlowError::domain(Unavailable))).on_error_resume_by(branches()).subscribe_with(unavailable.subscriber());
    assert_eq!(unavailable.values(), vec!["live", "cached"]);
    assert!(unavailable.is_complete());

    let other = TestSubscriber::new();
    Multi::<&str>::error(FlowError::domain(DivideByZero)).on_error_resume_by(branches()).subscribe_with(other.subscriber());
    assert!(other.error().is_some_and(|e| e.is::<DivideByZero>()));
}

#[tokio::test]
async fn on_error_return_and_map_error() -> Result<()> {
    let fallback = Single::from_callable(|| checked_div(1, 0).map_err(FlowError::domain)).on_error_return(-1);
    assert_eq!(fallback.get().await?, Some(-1));

    let mapped = Single::<i64>::error(FlowError::domain(DivideByZero)).map_error(|_| Unavailable).get().await;
    assert!(mapped.is_err_and(|e| e.is::<Unavailable>()));
    Ok(())
}

#[test]
fn protocol_faults_bypass_every_recovery_operator() {
    let bridge = DirectBridge::new();
    let subscriber = TestSubscriber::with_request(0);
    bridge
        .as_multi()
        .retry(3)
        .on_error_resume(|_| Multi::just(vec![0]))
        .on_error_return(0)
        .on_error_complete()
        .map_error(|_| Unavailable)
        .subscribe_with(subscriber.subscriber());

    bridge.next(1).unwrap();
    assert_eq!(subscriber.error().and_then(|e| e.protocol().cloned()), Some(ProtocolViolation::MissingDemand));
    assert!(subscriber.values().is_empty());
}
