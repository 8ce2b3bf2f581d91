mod common;

use std::time::Duration;

use anyhow::Result;
use common::Journal;
use futures::StreamExt;
use sluice_core::{testing::TestSubscriber, FlowError, Multi, Single};

#[test]
fn side_effects_run_in_signal_order() {
    let journal = Journal::new();
    let (next, done, sink) = (journal.clone(), journal.clone(), journal.clone());
    Multi::just(vec!["apple", "pear"])
        .do_on_next(move |fruit| next.record(format!("peek {fruit}")))
        .do_on_complete(move || done.record("complete"))
        .subscribe(move |fruit| sink.record(format!("got {fruit}")));

    assert_eq!(journal.entries(), vec!["peek apple", "got apple", "peek pear", "got pear", "complete"]);
}

#[test]
fn disposing_stops_delivery() {
    let journal = Journal::new();
    let sink = journal.clone();
    let bridge = sluice_core::DirectBridge::new();
    let disposable = bridge.as_multi().subscribe(move |n: u32| sink.record(n.to_string()));

    sluice_core::Sink::next(&bridge, 1).unwrap();
    disposable.dispose();
    let _ = sluice_core::Sink::next(&bridge, 2);

    assert!(disposable.is_disposed());
    assert_eq!(journal.entries(), vec!["1"]);
    assert_eq!(bridge.subscriber_count(), 0);
}

#[test]
fn map_filter_and_distinct_compose() {
    let subscriber = TestSubscriber::new();
    Multi::just(vec![3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5]).distinct().filter(|n| n % 2 == 1).map(|n| n * 10).subscribe_with(subscriber.subscriber());
    assert_eq!(subscriber.values(), vec![30, 10, 50, 90]);
}

#[test]
fn take_cancels_an_endless_source() {
    let journal = Journal::new();
    let cancelled = journal.clone();
    let subscriber = TestSubscriber::new();
    Multi::range(0..u64::MAX)
        .do_on_each(move |signal| {
            if signal.is_terminal() {
                cancelled.record(signal.kind());
            }
        })
        .take(4)
        .subscribe_with(subscriber.subscriber());

    assert_eq!(subscriber.values(), vec![0, 1, 2, 3]);
    assert!(subscriber.is_complete());
    assert!(journal.entries().is_empty());
}

#[test]
fn concat_keeps_sources_in_sequence() {
    let subscriber = TestSubscriber::new();
    Multi::concat([Multi::just(vec![1, 2]), Multi::empty(), Multi::just(vec![3])]).concat_with(Single::just(4).to_multi()).subscribe_with(subscriber.subscriber());
    assert_eq!(subscriber.values(), vec![1, 2, 3, 4]);
}

#[test]
fn merge_delivers_everything_from_every_source() {
    let subscriber = TestSubscriber::new();
    Multi::merge([Multi::range(0..3), Multi::range(10..12)]).subscribe_with(subscriber.subscriber());

    let mut values = subscriber.values();
    values.sort();
    assert_eq!(values, vec![0, 1, 2, 10, 11]);
    assert!(subscriber.is_complete());
}

#[test]
fn merge_fails_fast() {
    let subscriber = TestSubscriber::new();
    Multi::just(vec![1]).merge_with(Multi::error(FlowError::msg("bad source"))).merge_with(Multi::never()).subscribe_with(subscriber.subscriber());
    assert_eq!(subscriber.error().map(|e| e.to_string()).as_deref(), Some("bad source"));
}

#[test]
fn flat_map_expands_each_value() {
    let subscriber = TestSubscriber::new();
    Multi::just(vec![1u64, 2, 3]).flat_map(|n| Multi::range(0..n)).subscribe_with(subscriber.subscriber());
    assert_eq!(subscriber.values(), vec![0, 0, 1, 0, 1, 2]);
}

#[test]
fn zip_stops_at_the_shortest_source() {
    let subscriber = TestSubscriber::new();
    Multi::just(vec!["a", "b", "c"]).zip_with(&Multi::range(1..10)).subscribe_with(subscriber.subscriber());
    assert_eq!(subscriber.values(), vec![("a", 1), ("b", 2), ("c", 3)]);
    assert!(subscriber.is_complete());

    let rows = TestSubscriber::new();
    Multi::zip_all([Multi::just(vec![1, 2]), Multi::just(vec![10, 20]), Multi::just(vec![100])]).subscribe_with(rows.subscriber());
    assert_eq!(rows.values(), vec![vec![1, 10, 100]]);
}

#[test]
fn group_by_partitions_in_first_seen_order() {
    let subscriber = TestSubscriber::new();
    Multi::range(0..10)
        .group_by(|n| n % 3)
        .flat_map(|group| {
            let key = *group.key();
            group.collect_list().map(move |members| (key, members))
        })
        .subscribe_with(subscriber.subscriber());

    let mut groups = subscriber.values();
    groups.sort();
    assert_eq!(groups, vec![(0, vec![0, 3, 6, 9]), (1, vec![1, 4, 7]), (2, vec![2, 5, 8])]);
}

#[test]
fn reduce_and_count_fold_the_sequence() {
    let total = TestSubscriber::new();
    Multi::range(1..5).reduce(|a, b| a * b).subscribe_with(total.subscriber());
    assert_eq!(total.values(), vec![24]);

    let empty = TestSubscriber::new();
    Multi::<u64>::empty().reduce(|a, b| a + b).subscribe_with(empty.subscriber());
    assert!(empty.values().is_empty());
    assert!(empty.is_complete());

    let count = TestSubscriber::new();
    Multi::just(["x"; 7]).count().subscribe_with(count.subscriber());
    assert_eq!(count.values(), vec![7]);
}

#[test]
fn empty_sources_fall_back() {
    let switched = TestSubscriber::new();
    Multi::<i32>::empty().switch_if_empty(Multi::just(vec![7, 8])).subscribe_with(switched.subscriber());
    assert_eq!(switched.values(), vec![7, 8]);

    let defaulted = TestSubscriber::new();
    Single::<&str>::empty().default_if_empty("none").subscribe_with(defaulted.subscriber());
    assert_eq!(defaulted.values(), vec!["none"]);

    let untouched = TestSubscriber::new();
    Multi::just(vec![1]).default_if_empty(0).subscribe_with(untouched.subscriber());
    assert_eq!(untouched.values(), vec![1]);
}

#[tokio::test]
async fn streams_yield_the_error_last() {
    let items: Vec<Result<u64, FlowError>> = Multi::range(0..2).concat_with(Multi::error(FlowError::msg("cut"))).into_stream().collect().await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[1].as_ref().ok(), Some(&1));
    assert!(items[2].as_ref().is_err_and(|e| e.to_string() == "cut"));
}

#[tokio::test]
async fn timed_singles_resolve_as_futures() -> Result<()> {
    let value = Single::just("late").delay_element(Duration::from_millis(10)).get().await?;
    assert_eq!(value, Some("late"));
    Ok(())
}
