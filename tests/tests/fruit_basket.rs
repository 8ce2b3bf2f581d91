mod common;

use std::time::Duration;

use anyhow::Result;
use sluice_core::testing::TestSubscriber;
use sluice_tests::{basket_pipeline, expected_fruit_infos, summarize, Sharing, BASKET_2};

#[test]
fn cold_baskets_are_summarized_in_order() {
    let subscriber = TestSubscriber::new();
    basket_pipeline(Sharing::Cold).subscribe_with(subscriber.subscriber());

    assert_eq!(subscriber.values(), expected_fruit_infos());
    assert!(subscriber.is_complete());
    assert!(subscriber.violations().is_empty());
}

#[tokio::test]
async fn parallel_halves_join_back_in_basket_order() {
    let subscriber = TestSubscriber::new();
    basket_pipeline(Sharing::Parallel).subscribe_with(subscriber.subscriber());

    assert!(subscriber.await_terminal(Duration::from_secs(5)).await);
    assert_eq!(subscriber.values(), expected_fruit_infos());
    assert!(subscriber.violations().is_empty());
}

#[tokio::test]
async fn hot_basket_is_read_once_for_both_halves() {
    let subscriber = TestSubscriber::new();
    basket_pipeline(Sharing::Hot).subscribe_with(subscriber.subscriber());

    assert!(subscriber.await_terminal(Duration::from_secs(5)).await);
    assert_eq!(subscriber.values(), expected_fruit_infos());
    assert!(subscriber.is_complete());
}

#[tokio::test]
async fn single_basket_summary_resolves_as_a_future() -> Result<()> {
    let basket = BASKET_2.iter().map(|fruit| fruit.to_string()).collect();
    let summary = summarize(basket, Sharing::Cold).to_vec().await?;
    assert_eq!(summary, vec![expected_fruit_infos()[1].clone()]);
    Ok(())
}

#[test]
fn demand_is_respected_across_the_pipeline() {
    let subscriber = TestSubscriber::with_request(1);
    basket_pipeline(Sharing::Cold).subscribe_with(subscriber.subscriber());
    assert_eq!(subscriber.values(), expected_fruit_infos()[..1].to_vec());

    subscriber.request(2);
    assert_eq!(subscriber.values(), expected_fruit_infos());
    assert!(subscriber.is_complete());
    assert!(subscriber.violations().is_empty());
}
