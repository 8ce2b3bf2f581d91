mod common;

use std::time::Duration;

use anyhow::Result;
use common::{thread_name, Journal};
use sluice_core::{config::SchedulerConfig, testing::TestSubscriber, FlowError, Multi, Scheduler, Single};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn subscribe_on_and_publish_on_move_work_between_pools() -> Result<()> {
    let elastic = Scheduler::new(SchedulerConfig::new("elastic").workers(2))?;
    let single = Scheduler::new(SchedulerConfig::new("publisher").workers(1))?;
    let journal = Journal::new();
    let (upstream, downstream) = (journal.clone(), journal.clone());

    let subscriber = TestSubscriber::new();
    Multi::range(0..3)
        .do_on_next(move |n| upstream.record(format!("produce {n} on {}", thread_name())))
        .subscribe_on(elastic.clone())
        .publish_on(single.clone())
        .do_on_next(move |n| downstream.record(format!("consume {n} on {}", thread_name())))
        .subscribe_with(subscriber.subscriber());

    assert!(subscriber.await_terminal(WAIT).await);
    assert_eq!(subscriber.values(), vec![0, 1, 2]);
    assert!(subscriber.threads().iter().all(|thread| thread.starts_with("publisher-")));
    for entry in journal.entries() {
        let expected = if entry.starts_with("produce") { " on elastic-" } else { " on publisher-" };
        assert!(entry.contains(expected), "unexpected thread in {entry:?}");
    }
    Ok(())
}

#[tokio::test]
async fn nearest_subscribe_on_wins() -> Result<()> {
    let outer = Scheduler::new(SchedulerConfig::new("outer").workers(1))?;
    let inner = Scheduler::new(SchedulerConfig::new("inner").workers(1))?;

    let subscriber = TestSubscriber::new();
    Single::from_callable(|| Ok(thread_name())).subscribe_on(inner).subscribe_on(outer).subscribe_with(subscriber.subscriber());

    assert!(subscriber.await_terminal(WAIT).await);
    assert!(subscriber.values()[0].starts_with("inner-"));
    Ok(())
}

#[tokio::test]
async fn delayed_elements_keep_their_order() -> Result<()> {
    let values = Multi::just(vec!["a", "b", "c"]).delay_elements(Duration::from_millis(10)).to_vec().await?;
    assert_eq!(values, vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn delayed_elements_arrive_on_the_parallel_pool_until_published_elsewhere() {
    let journal = Journal::new();
    let timers = journal.clone();
    let subscriber = TestSubscriber::new();
    Multi::just(vec!["a", "b", "c"])
        .delay_elements(Duration::from_millis(5))
        .do_on_next(move |_| timers.record(thread_name()))
        .publish_on(Scheduler::bounded_elastic())
        .subscribe_with(subscriber.subscriber());

    assert!(subscriber.await_terminal(WAIT).await);
    assert_eq!(subscriber.values(), vec!["a", "b", "c"]);
    let delayed_on = journal.entries();
    assert_eq!(delayed_on.len(), 3);
    assert!(delayed_on.iter().all(|thread| thread.starts_with("parallel-")), "{delayed_on:?}");
    let delivered_on = subscriber.threads();
    assert!(delivered_on.iter().all(|thread| thread.starts_with("bounded-elastic-")), "{delivered_on:?}");
}

#[tokio::test]
async fn interval_ticks_until_take_cancels_it() -> Result<()> {
    let ticker = Scheduler::new(SchedulerConfig::new("ticker").workers(1))?;
    let subscriber = TestSubscriber::new();
    Multi::interval_on(Duration::from_millis(5), ticker).take(3).subscribe_with(subscriber.subscriber());

    assert!(subscriber.await_terminal(WAIT).await);
    assert_eq!(subscriber.values(), vec![0, 1, 2]);
    assert!(subscriber.is_complete());
    assert!(subscriber.threads().iter().all(|thread| thread.starts_with("ticker-")));
    Ok(())
}

#[tokio::test]
async fn interval_without_demand_fails() {
    let subscriber = TestSubscriber::<u64>::with_request(1);
    Multi::interval(Duration::from_millis(5)).subscribe_with(subscriber.subscriber());

    assert!(subscriber.await_terminal(WAIT).await);
    assert_eq!(subscriber.values(), vec![0]);
    assert!(subscriber.error().is_some_and(|e| e.is_protocol()));
}

#[tokio::test]
async fn timeout_fails_a_silent_source_and_passes_a_prompt_one() -> Result<()> {
    let silent = Multi::<u8>::never().timeout(Duration::from_millis(20)).to_vec().await;
    assert!(matches!(silent, Err(FlowError::Timeout(_))));

    let prompt = Single::delay(Duration::from_millis(5)).timeout(Duration::from_secs(2)).get().await?;
    assert_eq!(prompt, Some(0));
    Ok(())
}
