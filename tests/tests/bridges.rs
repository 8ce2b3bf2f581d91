mod common;

use std::{
    sync::{mpsc, Arc},
    thread,
};

use anyhow::Result;
use common::Journal;
use sluice_core::{testing::TestSubscriber, DirectBridge, EmitterBridge, Multi, ProtocolViolation, ReplayBridge, Sink, UnicastBridge};

/// Pushes from another thread while this one completes the bridge midway
fn race_values_against_complete<B: Sink<u32> + Clone + Send + 'static>(bridge: B, subscriber: &TestSubscriber<u32>) {
    let (started_tx, started) = mpsc::channel();
    let source = bridge.clone();
    let pusher = thread::spawn(move || {
        for n in 0..2_000 {
            if n == 100 {
                let _ = started_tx.send(());
            }
            let _ = source.next(n);
        }
    });
    started.recv().unwrap();
    bridge.complete().unwrap();
    pusher.join().unwrap();

    let values = subscriber.values();
    assert!(values.len() >= 100);
    assert_eq!(values, (0..values.len() as u32).collect::<Vec<_>>());
    assert_eq!(subscriber.completions(), 1);
    assert!(subscriber.violations().is_empty(), "{:?}", subscriber.violations());
}

fn journaled(bridge: &Multi<i32>, journal: &Journal, name: &'static str) {
    let (values, errors, completions) = (journal.clone(), journal.clone(), journal.clone());
    bridge.subscribe_all(
        move |value| values.record(format!("{name} {value}")),
        move |error| errors.record(format!("{name} failed: {error}")),
        move || completions.record(format!("Finished {name}")),
    );
}

#[test]
fn direct_bridge_replays_only_the_terminal_to_late_subscribers() {
    let bridge = DirectBridge::new();
    let journal = Journal::new();
    journaled(&bridge.as_multi(), &journal, "1");

    bridge.next(10).unwrap();
    bridge.complete().unwrap();
    journaled(&bridge.as_multi(), &journal, "2");

    assert_eq!(bridge.next(12), Err(ProtocolViolation::Terminated));
    assert_eq!(journal.entries(), vec!["1 10", "Finished 1", "Finished 2"]);
}

#[test]
fn direct_bridge_fails_subscribers_without_demand() {
    let bridge = DirectBridge::new();
    let eager = TestSubscriber::new();
    let idle = TestSubscriber::with_request(0);
    bridge.as_multi().subscribe_with(eager.subscriber());
    bridge.as_multi().subscribe_with(idle.subscriber());

    bridge.next("a").unwrap();
    bridge.next("b").unwrap();

    assert_eq!(eager.values(), vec!["a", "b"]);
    assert_eq!(idle.error().and_then(|e| e.protocol().cloned()), Some(ProtocolViolation::MissingDemand));
    assert_eq!(bridge.subscriber_count(), 1);
}

#[test]
fn unicast_bridge_buffers_for_its_only_subscriber() {
    let bridge = UnicastBridge::new();
    for n in 1..=3 {
        bridge.next(n).unwrap();
    }
    bridge.complete().unwrap();
    assert_eq!(bridge.len(), 3);

    let subscriber = TestSubscriber::with_request(2);
    bridge.as_multi().subscribe_with(subscriber.subscriber());
    assert_eq!(subscriber.values(), vec![1, 2]);
    assert!(!subscriber.is_complete());

    subscriber.request(1);
    assert_eq!(subscriber.values(), vec![1, 2, 3]);
    assert!(subscriber.is_complete());

    let second = TestSubscriber::<i32>::new();
    bridge.as_multi().subscribe_with(second.subscriber());
    assert!(second.error().is_some_and(|e| matches!(e.protocol(), Some(ProtocolViolation::SingleSubscriber(_)))));
}

#[test]
fn emitter_bridge_subscribers_see_values_pushed_after_they_attach() {
    let bridge = EmitterBridge::with_capacity(1);
    let journal = Journal::new();
    journaled(&bridge.as_multi(), &journal, "first");
    for n in 10..=12 {
        bridge.next(n).unwrap();
    }
    journaled(&bridge.as_multi(), &journal, "second");
    for n in 13..=15 {
        bridge.next(n).unwrap();
    }
    bridge.complete().unwrap();

    let entries = journal.entries();
    let of = |name: &str| entries.iter().filter(|entry| entry.starts_with(name)).cloned().collect::<Vec<_>>();
    assert_eq!(of("first"), (10..=15).map(|n| format!("first {n}")).collect::<Vec<_>>());
    assert_eq!(of("second"), (13..=15).map(|n| format!("second {n}")).collect::<Vec<_>>());
    assert_eq!(entries.iter().filter(|entry| entry.starts_with("Finished")).count(), 2);
}

#[test]
fn replay_bridge_feeds_late_subscribers_from_its_history() {
    let bridge = ReplayBridge::new(3);
    Multi::range(10..15).map(|n| n as i32).subscribe_with(Arc::new(bridge.clone()));

    let journal = Journal::new();
    journaled(&bridge.as_multi(), &journal, "late");
    assert_eq!(journal.entries(), vec!["late 12", "late 13", "late 14", "Finished late"]);
    assert_eq!(bridge.history(), vec![12, 13, 14]);
}

#[test]
fn direct_bridge_never_delivers_after_a_racing_complete() {
    let bridge = DirectBridge::new();
    let subscriber = TestSubscriber::new();
    bridge.as_multi().subscribe_with(subscriber.subscriber());
    race_values_against_complete(bridge, &subscriber);
}

#[test]
fn emitter_bridge_never_delivers_after_a_racing_complete() {
    let bridge = EmitterBridge::new();
    let subscriber = TestSubscriber::new();
    bridge.as_multi().subscribe_with(subscriber.subscriber());
    race_values_against_complete(bridge, &subscriber);
}

#[test]
fn replay_bridge_never_delivers_after_a_racing_complete() {
    let bridge = ReplayBridge::unbounded();
    let subscriber = TestSubscriber::new();
    bridge.as_multi().subscribe_with(subscriber.subscriber());
    race_values_against_complete(bridge.clone(), &subscriber);

    let late = TestSubscriber::new();
    bridge.as_multi().subscribe_with(late.subscriber());
    assert_eq!(late.values(), subscriber.values());
    assert!(late.is_complete());
}

#[test]
fn emitter_bridge_hands_its_backlog_to_the_first_subscriber() {
    let bridge = EmitterBridge::with_capacity(2);
    bridge.next(1).unwrap();
    bridge.next(2).unwrap();
    assert_eq!(bridge.next(3), Err(ProtocolViolation::BufferOverflow(2)));

    let first = TestSubscriber::new();
    bridge.as_multi().subscribe_with(first.subscriber());
    bridge.next(4).unwrap();
    assert_eq!(first.values(), vec![1, 2, 4]);
}

#[tokio::test]
async fn bridges_feed_async_consumers() -> Result<()> {
    let bridge = ReplayBridge::unbounded();
    let source = bridge.clone();
    let producer = tokio::spawn(async move {
        for word in ["alpha", "beta", "gamma"] {
            source.next(word.to_owned())?;
            tokio::task::yield_now().await;
        }
        source.complete()
    });
    producer.await??;

    assert_eq!(bridge.as_multi().to_vec().await?, vec!["alpha", "beta", "gamma"]);
    Ok(())
}
